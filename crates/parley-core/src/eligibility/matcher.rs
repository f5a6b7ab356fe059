use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use regex::Regex;

/// Characters that count as part of a word around a name.
const WORD_CHARS: &str = "a-zA-Z0-9а-яА-ЯЁё";

/// Distinct character name sets kept compiled before the cache is reset.
const MAX_CACHED_SETS: usize = 256;

/// Case-insensitive whole-word matcher over a set of names.
#[derive(Debug, Clone)]
pub struct NameMatcher {
    regex: Option<Regex>,
}

impl NameMatcher {
    /// Build one alternation over all non-blank names. An empty set never matches.
    pub fn new<S: AsRef<str>>(names: &[S]) -> Self {
        let alternatives: Vec<String> = names
            .iter()
            .map(|name| name.as_ref().trim())
            .filter(|name| !name.is_empty())
            .map(regex::escape)
            .collect();

        if alternatives.is_empty() {
            return Self { regex: None };
        }

        let pattern = format!(
            "(?im)(?:^|[^{WORD_CHARS}])(?:{})(?:[^{WORD_CHARS}]|$)",
            alternatives.join("|")
        );
        // Escaped literals always form a valid pattern; a failure degrades to never matching.
        let regex = match Regex::new(&pattern) {
            Ok(regex) => Some(regex),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to compile name matcher");
                None
            }
        };
        Self { regex }
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.as_ref().is_some_and(|regex| regex.is_match(text))
    }
}

/// Compiled matchers for the global names plus each chat's character names.
///
/// A chat without a character uses the global matcher directly; each distinct
/// character name set is compiled once.
#[derive(Debug)]
pub struct NameMatcherCache {
    global_names: Vec<String>,
    global: Arc<NameMatcher>,
    by_character: Mutex<HashMap<Vec<String>, Arc<NameMatcher>>>,
}

impl NameMatcherCache {
    pub fn new(global_names: Vec<String>) -> Self {
        let global = Arc::new(NameMatcher::new(&global_names));
        Self {
            global_names,
            global,
            by_character: Mutex::new(HashMap::new()),
        }
    }

    /// Matcher for the global names joined with `character_names`.
    pub fn matcher(&self, character_names: &[String]) -> Arc<NameMatcher> {
        if character_names.is_empty() {
            return self.global.clone();
        }

        let mut cache = self.by_character.lock();
        if let Some(matcher) = cache.get(character_names) {
            return matcher.clone();
        }
        if cache.len() >= MAX_CACHED_SETS {
            cache.clear();
        }

        let all_names: Vec<&String> = self.global_names.iter().chain(character_names).collect();
        let matcher = Arc::new(NameMatcher::new(&all_names));
        cache.insert(character_names.to_vec(), matcher.clone());
        matcher
    }

    pub fn cached_sets(&self) -> usize {
        self.by_character.lock().len()
    }
}
