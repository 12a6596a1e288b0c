//! Sort-key generation for film titles.
//!
//! Festival listings are ordered by a normalized sort title: lowercased,
//! diacritics stripped, and the leading article removed for the title's
//! language. "The Zone" sorts under z, "De Noorderlingen" under n.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Leading articles per ISO 639-1 language code.
const ARTICLES: &[(&str, &[&str])] = &[
    ("en", &["the", "a", "an"]),
    ("nl", &["de", "het", "een"]),
    ("fr", &["le", "la", "les", "un", "une", "des"]),
    ("de", &["der", "die", "das", "ein", "eine"]),
    ("es", &["el", "la", "los", "las", "un", "una"]),
    ("it", &["il", "lo", "la", "i", "gli", "le", "un", "una"]),
];

/// Lowercase and strip diacritics (NFD, combining marks dropped).
pub fn fold_title(title: &str) -> String {
    title
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

/// Build the sort title for `title` in `language` (2-letter code).
///
/// Unknown languages fold but keep their article; an article is only
/// stripped when followed by more text, so a film actually titled "The"
/// keeps its name.
pub fn sort_title(title: &str, language: &str) -> String {
    let folded = fold_title(title.trim());
    let articles = ARTICLES
        .iter()
        .find(|(lang, _)| *lang == language)
        .map(|(_, arts)| *arts);

    if let Some(articles) = articles {
        // French elisions come glued to the word: "l'argent" -> "argent"
        if language == "fr" {
            if let Some(rest) = folded.strip_prefix("l'").or_else(|| folded.strip_prefix("l\u{2019}")) {
                if !rest.is_empty() {
                    return rest.to_string();
                }
            }
        }
        for article in articles {
            if let Some(rest) = folded.strip_prefix(article) {
                if let Some(rest) = rest.strip_prefix(' ') {
                    if !rest.is_empty() {
                        return rest.to_string();
                    }
                }
            }
        }
    }
    folded
}
