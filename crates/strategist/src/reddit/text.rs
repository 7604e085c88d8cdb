//! Text normalization for scraped content.

use regex::Regex;
use std::sync::LazyLock;

static INVISIBLE_ENTITIES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)&#x200B;|&#x200C;|&#x200D;|&#xFEFF;").expect("valid entity regex")
});

/// Strip zero-width characters and their HTML entity forms.
pub fn clean_text(text: &str) -> String {
    INVISIBLE_ENTITIES
        .replace_all(text, "")
        .chars()
        .filter(|c| !matches!(c, '\u{200B}'..='\u{200D}' | '\u{FEFF}'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_entities_and_chars() {
        assert_eq!(clean_text("Hello&#x200B; world"), "Hello world");
        assert_eq!(clean_text("zero\u{200B}width\u{FEFF}"), "zerowidth");
        assert_eq!(clean_text("&#X200b;kept"), "kept");
    }

    #[test]
    fn test_leaves_normal_text() {
        assert_eq!(clean_text("Best shoes for 50k?"), "Best shoes for 50k?");
    }
}
