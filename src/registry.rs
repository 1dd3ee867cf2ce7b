//! Handler tables.
//!
//! A `Registry` maps names to handlers with one extra wildcard slot, filled by
//! registering under `"*"`. Names containing `*` or `#` words are topic
//! patterns, matched the way the broker matches bindings. Lookup order is the
//! exact name, then the first matching pattern in name order, then the
//! wildcard.

use std::collections::{BTreeMap, HashMap};

use crate::broker::topic_matches;
use crate::message::WILDCARD;

pub struct Registry<H> {
    handlers: HashMap<String, H>,
    patterns: BTreeMap<String, H>,
    wildcard: Option<H>,
}

impl<H> Default for Registry<H> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
            patterns: BTreeMap::new(),
            wildcard: None,
        }
    }
}

/// True when `name` has a `*` or `#` word.
pub fn is_pattern(name: &str) -> bool {
    name.split('.').any(|word| word == "*" || word == "#")
}

impl<H> Registry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. A later registration under the same name wins.
    pub fn insert(&mut self, name: &str, handler: H) {
        if name == WILDCARD {
            self.wildcard = Some(handler);
        } else if is_pattern(name) {
            self.patterns.insert(name.to_string(), handler);
        } else {
            self.handlers.insert(name.to_string(), handler);
        }
    }

    /// The handler for `name`: exact, then pattern, then wildcard.
    pub fn get(&self, name: &str) -> Option<&H> {
        self.handlers
            .get(name)
            .or_else(|| {
                self.patterns
                    .iter()
                    .find(|(pattern, _)| topic_matches(pattern, name))
                    .map(|(_, handler)| handler)
            })
            .or(self.wildcard.as_ref())
    }

    /// Registered names, sorted, including `"*"` when the wildcard is set.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .handlers
            .keys()
            .chain(self.patterns.keys())
            .map(String::as_str)
            .collect();
        names.sort_unstable();
        if self.wildcard.is_some() {
            names.push(WILDCARD);
        }
        names
    }

    pub fn has_wildcard(&self) -> bool {
        self.wildcard.is_some()
    }

    pub fn len(&self) -> usize {
        self.handlers.len() + self.patterns.len() + usize::from(self.wildcard.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
