pub mod check;
pub mod context;
pub mod decide;
pub mod inspect;
pub mod serve;
pub mod sweep;
