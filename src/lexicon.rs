//! The term→id table is a collaborator this crate consumes through a
//! trait, not something it owns: a host database supplies its own
//! lexicon (with its own storage, locking, and key encoding). The
//! in-memory default here exists so the crate is independently testable.

use std::collections::BTreeMap;

pub trait Lexicon: Send {
    fn get_id(&self, term: &str) -> Option<u32>;
    fn get_or_create_id(&mut self, term: &str) -> u32;
    fn get_term(&self, id: u32) -> Option<&str>;
    fn prefix_search(&self, prefix: &str) -> Vec<u32>;
    fn suffix_search(&self, suffix: &str) -> Vec<u32>;
    /// Term ids lexically adjacent to `id`, used by the updater to find a
    /// buffer segment likely to already hold nearby terms.
    fn neighbors(&self, id: u32, radius: usize) -> Vec<u32>;
}

#[derive(Debug, Default)]
pub struct InMemoryLexicon {
    by_term: BTreeMap<String, u32>,
    by_id: Vec<String>,
}

impl InMemoryLexicon {
    pub fn new() -> Self {
        InMemoryLexicon::default()
    }
}

impl Lexicon for InMemoryLexicon {
    fn get_id(&self, term: &str) -> Option<u32> {
        self.by_term.get(term).copied()
    }

    fn get_or_create_id(&mut self, term: &str) -> u32 {
        if let Some(&id) = self.by_term.get(term) {
            return id;
        }
        let id = self.by_id.len() as u32;
        self.by_id.push(term.to_string());
        self.by_term.insert(term.to_string(), id);
        id
    }

    fn get_term(&self, id: u32) -> Option<&str> {
        self.by_id.get(id as usize).map(|s| s.as_str())
    }

    fn prefix_search(&self, prefix: &str) -> Vec<u32> {
        self.by_term
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(_, &id)| id)
            .collect()
    }

    fn suffix_search(&self, suffix: &str) -> Vec<u32> {
        self.by_term
            .iter()
            .filter(|(k, _)| k.ends_with(suffix))
            .map(|(_, &id)| id)
            .collect()
    }

    fn neighbors(&self, id: u32, radius: usize) -> Vec<u32> {
        let Some(term) = self.get_term(id) else {
            return Vec::new();
        };
        let rank = self.by_term.keys().position(|k| k == term);
        let Some(rank) = rank else { return Vec::new() };
        let keys: Vec<&String> = self.by_term.keys().collect();
        let lo = rank.saturating_sub(radius);
        let hi = (rank + radius + 1).min(keys.len());
        keys[lo..hi]
            .iter()
            .filter_map(|k| self.by_term.get(*k).copied())
            .filter(|&nid| nid != id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_is_stable() {
        let mut lex = InMemoryLexicon::new();
        let a = lex.get_or_create_id("apple");
        let b = lex.get_or_create_id("apple");
        assert_eq!(a, b);
        assert_eq!(lex.get_term(a), Some("apple"));
    }

    #[test]
    fn prefix_search_finds_matching_terms() {
        let mut lex = InMemoryLexicon::new();
        lex.get_or_create_id("cat");
        lex.get_or_create_id("car");
        lex.get_or_create_id("dog");
        let mut hits: Vec<&str> = lex
            .prefix_search("ca")
            .into_iter()
            .map(|id| lex.get_term(id).unwrap())
            .collect();
        hits.sort();
        assert_eq!(hits, vec!["car", "cat"]);
    }

    #[test]
    fn suffix_search_finds_matching_terms() {
        let mut lex = InMemoryLexicon::new();
        lex.get_or_create_id("running");
        lex.get_or_create_id("jumping");
        lex.get_or_create_id("fast");
        let mut hits: Vec<&str> = lex
            .suffix_search("ing")
            .into_iter()
            .map(|id| lex.get_term(id).unwrap())
            .collect();
        hits.sort();
        assert_eq!(hits, vec!["jumping", "running"]);
    }

    #[test]
    fn neighbors_returns_lexically_adjacent_terms() {
        let mut lex = InMemoryLexicon::new();
        for t in ["alpha", "bravo", "charlie", "delta", "echo"] {
            lex.get_or_create_id(t);
        }
        let id = lex.get_id("charlie").unwrap();
        let neighbor_terms: Vec<&str> = lex
            .neighbors(id, 1)
            .into_iter()
            .map(|i| lex.get_term(i).unwrap())
            .collect();
        assert_eq!(neighbor_terms, vec!["bravo", "delta"]);
    }
}
