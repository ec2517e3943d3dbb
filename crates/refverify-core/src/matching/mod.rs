//! Pure matching functions shared by every source adapter.
//!
//! Nothing in here performs I/O. Each comparison is tolerant in the
//! direction citations tend to err (abbreviation, truncation, omission) and
//! strict where a difference is material.

pub mod identifiers;
pub mod names;
pub mod title;
pub mod venue;

pub use identifiers::{ArxivId, extract_arxiv_id, extract_doi, normalize_doi};
pub use names::{compare_authors, is_name_match};
pub use title::{normalize_title, title_similarity};
pub use venue::venues_differ;

use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Transliterate letters that do not decompose (ł, ø, ß, …) and strip
/// combining accents. Case is preserved.
pub fn fold_diacritics(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            'ł' => out.push('l'),
            'Ł' => out.push('L'),
            'ø' => out.push('o'),
            'Ø' => out.push('O'),
            'ß' => out.push_str("ss"),
            'ẞ' => out.push_str("SS"),
            'æ' => out.push_str("ae"),
            'Æ' => out.push_str("AE"),
            'œ' => out.push_str("oe"),
            'Œ' => out.push_str("OE"),
            'đ' | 'ð' => out.push('d'),
            'Đ' | 'Ð' => out.push('D'),
            'þ' => out.push_str("th"),
            'Þ' => out.push_str("TH"),
            'ı' => out.push('i'),
            'ħ' => out.push('h'),
            'Ħ' => out.push('H'),
            _ => out.push(c),
        }
    }
    out.nfd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Fold diacritics and lowercase.
pub fn fold(s: &str) -> String {
    fold_diacritics(s).to_lowercase()
}

/// Compare two cited/authoritative years.
///
/// Any difference between two present years is flagged; a missing year on
/// either side never is.
pub fn year_differs(cited: Option<i32>, correct: Option<i32>) -> (bool, Option<String>) {
    match (cited, correct) {
        (Some(c), Some(k)) if c != k => (
            true,
            Some(format!("Year mismatch: cited {c}, correct {k}")),
        ),
        _ => (false, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_handles_non_decomposing_letters() {
        assert_eq!(fold("Łukasz Wróbel"), "lukasz wrobel");
        assert_eq!(fold("Søren Straße"), "soren strasse");
        assert_eq!(fold("José Müller"), "jose muller");
    }

    #[test]
    fn year_equal_is_not_flagged() {
        assert_eq!(year_differs(Some(2023), Some(2023)), (false, None));
    }

    #[test]
    fn year_difference_is_flagged_with_both_years() {
        let (differs, msg) = year_differs(Some(2022), Some(2023));
        assert!(differs);
        let msg = msg.unwrap();
        assert!(msg.contains("2022") && msg.contains("2023"));
    }

    #[test]
    fn year_off_by_one_still_flagged() {
        assert!(year_differs(Some(2016), Some(2017)).0);
    }

    #[test]
    fn missing_year_never_flagged() {
        assert_eq!(year_differs(None, Some(2023)), (false, None));
        assert_eq!(year_differs(Some(2023), None), (false, None));
        assert_eq!(year_differs(None, None), (false, None));
    }
}
