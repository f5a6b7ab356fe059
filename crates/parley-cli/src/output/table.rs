use comfy_table::{Table, presets::UTF8_FULL_CONDENSED};

/// A two-column key/value table.
pub fn key_value_table<K, V>(rows: impl IntoIterator<Item = (K, V)>) -> Table
where
    K: ToString,
    V: ToString,
{
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    for (key, value) in rows {
        table.add_row(vec![key.to_string(), value.to_string()]);
    }
    table
}

pub fn print_table(table: Table) {
    println!("{table}");
}
