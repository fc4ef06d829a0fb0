//! Minimal query-string normalization, grounded in the teacher's
//! `query_parser::tokenizer::clean_word`/`is_valid_token` but without stop
//! word removal: a query token being common shouldn't make it disappear
//! from a lookup.

pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(clean_word)
        .filter(|w| !w.is_empty())
        .collect()
}

/// Strips all non-alphanumeric characters and lowercases, for
/// `TERM_EXTRACT`'s whole-string scan.
pub fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

fn clean_word(word: &str) -> String {
    word.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_strips_punctuation_and_lowercases() {
        assert_eq!(tokenize("Rust, fast!"), vec!["rust", "fast"]);
    }

    #[test]
    fn normalize_drops_whitespace_and_punctuation() {
        assert_eq!(normalize("Tokyo Tower!"), "tokyotower");
    }
}
