//! Author name equivalence and author-list comparison.
//!
//! Names are parsed into a surname and a list of given-name parts. Two names
//! are equivalent when their surnames agree and their given names are
//! compatible, where an initial is compatible with any name starting with
//! that letter and middle names may be omitted on either side.

use once_cell::sync::Lazy;
use regex::Regex;

use super::fold;

/// Surname particles grouped with the token that follows them.
const PARTICLES: &[&str] = &[
    "von", "van", "de", "der", "den", "del", "della", "di", "da", "du", "des", "le", "la", "mc",
    "mac", "st", "ten", "ter", "bin", "ibn", "al", "el", "dos", "das", "zu", "af",
];

/// Generational suffixes dropped before parsing.
const SUFFIXES: &[&str] = &["jr", "sr", "ii", "iii", "iv"];

/// Positional checking applies up to this many compared authors.
const POSITIONAL_LIMIT: usize = 5;

fn is_particle(token: &str) -> bool {
    PARTICLES.contains(&token.trim_end_matches('.').to_lowercase().as_str())
}

fn is_suffix(token: &str) -> bool {
    SUFFIXES.contains(&token.trim_end_matches('.').to_lowercase().as_str())
}

/// Lowercase, accent-free, punctuation-free comparison form.
fn canonical(name: &str) -> String {
    let folded = fold(name);
    let cleaned: String = folded
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Letters of a token, dots and apostrophes removed, original case kept.
fn letters(token: &str) -> String {
    token.chars().filter(|c| c.is_alphabetic()).collect()
}

/// Whether a raw token reads as run-together initials: "LP", "G.V.", "J".
fn is_initials_token(token: &str) -> bool {
    let l = letters(token);
    let n = l.chars().count();
    (1..=3).contains(&n) && l.chars().all(|c| c.is_uppercase())
}

#[derive(Debug, Clone, PartialEq)]
struct ParsedName {
    /// Surname words, lowercase and folded, particles included.
    surname: Vec<String>,
    /// Given-name parts, lowercase; initials are single letters.
    given: Vec<String>,
}

impl ParsedName {
    /// Every plausible reading of `raw`; empty when nothing name-like is left.
    fn parse(raw: &str) -> Vec<Self> {
        static PARENS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\([^)]*\)").unwrap());
        let folded = fold_case_preserving(&PARENS.replace_all(raw, " "));
        let trimmed = folded.trim().trim_matches(|c: char| c == ',' || c == ';').trim();
        if trimmed.is_empty() {
            return Vec::new();
        }

        // "Last, First" (a trailing ", Jr." is not a comma form)
        if let Some((before, after)) = trimmed.split_once(',') {
            let after = after.trim();
            let after_tokens: Vec<&str> = after
                .split(|c: char| c.is_whitespace() || c == ',')
                .filter(|t| !t.is_empty() && !is_suffix(t))
                .collect();
            if !after_tokens.is_empty() {
                let surname_tokens: Vec<&str> = before
                    .split_whitespace()
                    .filter(|t| !is_suffix(t))
                    .collect();
                if surname_tokens.is_empty() {
                    return Vec::new();
                }
                return vec![Self {
                    surname: surname_words(&surname_tokens),
                    given: given_parts(&after_tokens),
                }];
            }
            return Self::parse_tokens(
                &before
                    .split_whitespace()
                    .filter(|t| !is_suffix(t))
                    .collect::<Vec<_>>(),
            );
        }

        let tokens: Vec<&str> = trimmed
            .split_whitespace()
            .filter(|t| !is_suffix(t))
            .collect();
        Self::parse_tokens(&tokens)
    }

    fn parse_tokens(tokens: &[&str]) -> Vec<Self> {
        let tokens: Vec<&str> = tokens
            .iter()
            .copied()
            .filter(|t| !letters(t).is_empty())
            .collect();
        match tokens.len() {
            0 => Vec::new(),
            1 => vec![Self {
                surname: surname_words(&tokens),
                given: Vec::new(),
            }],
            n => {
                let mut readings = vec![Self::given_first(&tokens)];
                // A trailing all-caps token is either initials ("Kaelbling LP",
                // "SMITH J") or a capitalized surname ("Dan XU", "WEI LI").
                // Both readings are kept; a match on either counts.
                if is_initials_token(tokens[n - 1]) {
                    readings.push(Self {
                        surname: surname_words(&tokens[..n - 1]),
                        given: given_parts(&tokens[n - 1..]),
                    });
                }
                readings
            }
        }
    }

    /// Given names first; particles before the last token belong to the
    /// surname. A capitalized leading particle with nothing before it is a
    /// given name ("Van Nguyen").
    fn given_first(tokens: &[&str]) -> Self {
        let n = tokens.len();
        let mut start = n - 1;
        while start > 0 && is_particle(tokens[start - 1]) {
            let candidate = tokens[start - 1];
            if start - 1 == 0 && candidate.chars().next().is_some_and(|c| c.is_uppercase()) {
                break;
            }
            start -= 1;
        }
        Self {
            surname: surname_words(&tokens[start..]),
            given: given_parts(&tokens[..start]),
        }
    }

    /// A bare surname citing the first half of a space-separated compound
    /// surname: "Garcia" against "Maria Garcia Lopez", where the second
    /// given-name slot is really part of the surname.
    fn inner_surname_of(&self, full: &ParsedName) -> bool {
        if !self.given.is_empty() || full.given.len() < 2 {
            return false;
        }
        let key = self.surname_key();
        key.chars().count() > 1 && full.given[1..].iter().any(|g| *g == key)
    }

    /// Surname with particles, spaces, hyphens and apostrophes removed.
    fn surname_key(&self) -> String {
        self.surname
            .iter()
            .flat_map(|w| w.chars())
            .filter(|c| c.is_alphanumeric())
            .collect()
    }

    /// Surname components without particles, split on hyphens.
    fn surname_components(&self) -> Vec<String> {
        self.surname
            .iter()
            .filter(|w| !is_particle(w))
            .flat_map(|w| w.split('-'))
            .map(|w| w.chars().filter(|c| c.is_alphanumeric()).collect::<String>())
            .filter(|w| !w.is_empty())
            .collect()
    }
}

/// Fold accents but keep case, which matters for spotting initials.
fn fold_case_preserving(s: &str) -> String {
    super::fold_diacritics(s)
}

fn surname_words(tokens: &[&str]) -> Vec<String> {
    tokens
        .iter()
        .map(|t| {
            t.to_lowercase()
                .chars()
                .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '\'')
                .collect::<String>()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

/// Expand given-name tokens into parts: hyphenated names split, run-together
/// initials split into letters.
fn given_parts(tokens: &[&str]) -> Vec<String> {
    let mut parts = Vec::new();
    for token in tokens {
        for piece in token.split('-') {
            if piece.is_empty() {
                continue;
            }
            if piece.contains('.') {
                // "J.", "G.V.", "Ch."
                for sub in piece.split('.') {
                    let l = letters(sub);
                    if l.is_empty() {
                        continue;
                    }
                    if is_initials_token(&l) && l.chars().count() > 1 {
                        parts.extend(l.chars().map(|c| c.to_lowercase().to_string()));
                    } else {
                        parts.push(l.to_lowercase());
                    }
                }
            } else if is_initials_token(piece) {
                parts.extend(letters(piece).chars().map(|c| c.to_lowercase().to_string()));
            } else {
                let l = letters(piece);
                if !l.is_empty() {
                    parts.push(l.to_lowercase());
                }
            }
        }
    }
    parts
}

/// A given-name part agrees with another if equal, or if one is an initial
/// (or a prefix abbreviation such as "Ch.") of the other.
fn part_agrees(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    short.chars().count() == 1 && long.starts_with(short)
}

/// Given names are compatible when the first parts agree and the shorter
/// list's remaining parts appear, in order, in the longer list.
fn given_compatible(a: &[String], b: &[String]) -> bool {
    if a.is_empty() || b.is_empty() {
        return true;
    }
    if !part_agrees(&a[0], &b[0]) {
        // "J.-P." against "Jean Pierre" already splits; a joined compound
        // ("jeanpierre") against separate initials is checked here.
        return compound_against_initials(a, b) || compound_against_initials(b, a);
    }
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let mut rest = long[1..].iter();
    short[1..]
        .iter()
        .all(|part| rest.by_ref().any(|candidate| part_agrees(part, candidate)))
}

/// "Jeanpierre" vs ["j", "p"]: a single joined given name against several
/// initials, matched when the initials are consistent with its start.
fn compound_against_initials(joined: &[String], initials: &[String]) -> bool {
    joined.len() == 1
        && initials.len() > 1
        && initials.iter().all(|p| p.chars().count() == 1)
        && joined[0].starts_with(initials[0].as_str())
}

fn surnames_agree(a: &ParsedName, b: &ParsedName) -> bool {
    let (ka, kb) = (a.surname_key(), b.surname_key());
    if ka.is_empty() || kb.is_empty() {
        return false;
    }
    if ka == kb {
        return true;
    }
    let (ca, cb) = (a.surname_components(), b.surname_components());
    if ca.is_empty() || cb.is_empty() {
        return false;
    }
    // "van Beethoven" vs "Beethoven", "Garcia-Lopez" vs "Garcia"
    if ca == cb {
        return true;
    }
    (ca.len() == 1 && cb.contains(&ca[0])) || (cb.len() == 1 && ca.contains(&cb[0]))
}

/// Whether two author names refer to the same person.
///
/// Tried in order until one succeeds:
/// 1. exact match after folding case, accents and punctuation;
/// 2. "Last, First" against "First Last";
/// 3. initials against full given names, either way, including run-together
///    initials ("GV") and trailing initials ("Kaelbling LP");
/// 4. omitted middle names or initials, either way;
/// 5. hyphenated given names against separate initials;
/// 6. a bare surname against the full name's surname or a component of a
///    compound surname, hyphenated or space-separated.
///
/// Different surnames never match.
pub fn is_name_match(a: &str, b: &str) -> bool {
    let (ca, cb) = (canonical(a), canonical(b));
    if ca.is_empty() || cb.is_empty() {
        return false;
    }
    if ca == cb {
        return true;
    }
    let (ra, rb) = (ParsedName::parse(a), ParsedName::parse(b));
    ra.iter().any(|pa| {
        rb.iter().any(|pb| {
            (surnames_agree(pa, pb) && given_compatible(&pa.given, &pb.given))
                || pa.inner_surname_of(pb)
                || pb.inner_surname_of(pa)
        })
    })
}

/// Remove "et al."-style markers; returns the explicit authors and whether
/// the list was marked as partial.
pub fn strip_et_al(authors: &[String]) -> (Vec<String>, bool) {
    static MARKER: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)^(?:and\s+)?(?:et\.?\s*al\.?|others|\.\.\.|…)$").unwrap()
    });
    static TRAILING: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)[\s,]*(?:et\.?\s*al\.?|and\s+others)\s*$").unwrap());

    let mut partial = false;
    let mut out = Vec::with_capacity(authors.len());
    for author in authors {
        let trimmed = author.trim();
        if MARKER.is_match(trimmed) {
            partial = true;
            continue;
        }
        let stripped = TRAILING.replace(trimmed, "");
        if stripped.len() != trimmed.len() {
            partial = true;
        }
        let stripped = stripped.trim();
        if !stripped.is_empty() {
            out.push(stripped.to_string());
        }
    }
    (out, partial)
}

/// Compare a cited author list against an authoritative one.
///
/// Returns `(true, None)` when the lists agree, otherwise `(false, message)`.
/// An empty list on either side is not compared.
pub fn compare_authors(cited: &[String], correct: &[String]) -> (bool, Option<String>) {
    let (cited, partial) = strip_et_al(cited);
    if cited.is_empty() || correct.is_empty() {
        return (true, None);
    }

    if !is_name_match(&cited[0], &correct[0]) {
        // A partial list might not lead with the first author; only complain
        // when the cited first author is absent altogether.
        let anywhere = partial && correct.iter().any(|c| is_name_match(&cited[0], c));
        if !anywhere {
            return (
                false,
                Some(format!(
                    "First author mismatch: cited '{}', correct '{}'",
                    cited[0], correct[0]
                )),
            );
        }
    }

    // A lone name against a longer record is an abbreviated citation of the
    // lead author, as if followed by "et al.".
    if cited.len() == 1 {
        return (true, None);
    }

    if partial {
        let missing: Vec<&str> = cited
            .iter()
            .filter(|name| !correct.iter().any(|c| is_name_match(name, c)))
            .map(String::as_str)
            .collect();
        return if missing.is_empty() {
            (true, None)
        } else {
            (
                false,
                Some(format!("Cited authors not found: {}", missing.join(", "))),
            )
        };
    }

    let diff = cited.len().abs_diff(correct.len());
    if diff > 1 {
        return (
            false,
            Some(format!(
                "Author count mismatch: cited {} authors, correct {}",
                cited.len(),
                correct.len()
            )),
        );
    }

    let n = cited.len().min(correct.len());
    if n <= POSITIONAL_LIMIT {
        for i in 1..n {
            if !is_name_match(&cited[i], &correct[i]) {
                return (
                    false,
                    Some(format!(
                        "Author {} mismatch: cited '{}', correct '{}'",
                        i + 1,
                        cited[i],
                        correct[i]
                    )),
                );
            }
        }
    } else {
        let missing: Vec<&str> = cited[1..n]
            .iter()
            .filter(|name| !correct.iter().any(|c| is_name_match(name, c)))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return (
                false,
                Some(format!("Cited authors not found: {}", missing.join(", "))),
            );
        }
    }

    (true, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn reflexive() {
        for n in [
            "Kaelbling LP",
            "J. Smith",
            "Smith, John",
            "Ludwig van Beethoven",
            "Łukasz Kaiser",
            "GV Smith",
            "Vaswani",
            "WEI LI",
        ] {
            assert!(is_name_match(n, n), "{n}");
        }
    }

    #[test]
    fn trailing_initials_form() {
        assert!(is_name_match("Kaelbling LP", "L. Kaelbling"));
        assert!(is_name_match("Kaelbling LP", "Leslie Pack Kaelbling"));
        assert!(is_name_match("Smith J", "John Smith"));
    }

    #[test]
    fn all_caps_names() {
        assert!(is_name_match("SMITH J", "John Smith"));
        assert!(is_name_match("Dan XU", "D. Xu"));
        assert!(is_name_match("WEI LI", "Wei Li"));
        assert!(is_name_match("KAELBLING LP", "Leslie Pack Kaelbling"));
        assert!(!is_name_match("SMITH J", "John Jones"));
        assert!(!is_name_match("Dan XU", "D. Wu"));
    }

    #[test]
    fn comma_form() {
        assert!(is_name_match("Smith, John", "J. Smith"));
        assert!(is_name_match("Smith, J.", "John Smith"));
        assert!(is_name_match("Smith, John A.", "John Smith"));
        assert!(!is_name_match("Smith, John", "Jane Smith"));
    }

    #[test]
    fn different_surnames_never_match() {
        assert!(!is_name_match("Smith", "Jones"));
        assert!(!is_name_match("John Smith", "John Smyth"));
        assert!(!is_name_match("J. Smith", "J. Jones"));
    }

    #[test]
    fn concatenated_initials() {
        assert!(is_name_match("GV Smith", "G. V. Smith"));
        assert!(is_name_match("G.V. Smith", "George Victor Smith"));
        assert!(!is_name_match("GV Smith", "A. V. Smith"));
    }

    #[test]
    fn middle_name_omission_either_way() {
        assert!(is_name_match("John Smith", "John A. Smith"));
        assert!(is_name_match("John Albert Smith", "John Smith"));
        assert!(is_name_match("J. A. Smith", "John Smith"));
        assert!(!is_name_match("John A. Smith", "John B. Smith"));
    }

    #[test]
    fn hyphenated_given_names() {
        assert!(is_name_match("Jean-Pierre Dupont", "J.-P. Dupont"));
        assert!(is_name_match("Jean-Pierre Dupont", "J. P. Dupont"));
        assert!(is_name_match("Jean-Pierre Dupont", "JP Dupont"));
        assert!(is_name_match("Jean-Pierre Dupont", "J. Dupont"));
        assert!(is_name_match("Jeanpierre Dupont", "J. P. Dupont"));
    }

    #[test]
    fn surname_only_citation() {
        assert!(is_name_match("Vaswani", "Ashish Vaswani"));
        assert!(is_name_match("Beethoven", "Ludwig van Beethoven"));
        assert!(is_name_match("Garcia", "Maria Garcia-Lopez"));
        assert!(is_name_match("Garcia", "Maria Garcia Lopez"));
        assert!(is_name_match("Lopez", "Maria Garcia Lopez"));
        assert!(!is_name_match("Ashish", "Ashish Vaswani"));
        assert!(!is_name_match("Maria", "Maria Garcia Lopez"));
    }

    #[test]
    fn particles_grouped_with_surname() {
        assert!(is_name_match("van der Berg, Anna", "Anna van der Berg"));
        assert!(is_name_match("A. van der Berg", "Anna Berg"));
        assert!(is_name_match("Van Nguyen", "V. Nguyen"));
    }

    #[test]
    fn diacritics_are_folded() {
        assert!(is_name_match("Łukasz Kaiser", "Lukasz Kaiser"));
        assert!(is_name_match("José García", "J. Garcia"));
        assert!(is_name_match("Søren Kierkegaard", "S. Kierkegaard"));
        assert!(is_name_match("Müller, H.", "Hans Muller"));
    }

    #[test]
    fn empty_names_never_match() {
        assert!(!is_name_match("", ""));
        assert!(!is_name_match("  ", "Smith"));
    }

    #[test]
    fn et_al_marks_partial() {
        let (list, partial) = strip_et_al(&names(&["A. Smith", "B. Jones et al."]));
        assert!(partial);
        assert_eq!(list, names(&["A. Smith", "B. Jones"]));

        let (list, partial) = strip_et_al(&names(&["A. Smith", "others"]));
        assert!(partial);
        assert_eq!(list, names(&["A. Smith"]));

        let (_, partial) = strip_et_al(&names(&["A. Smith", "B. Jones"]));
        assert!(!partial);
    }

    #[test]
    fn partial_list_is_order_independent() {
        let correct = names(&["Ashish Vaswani", "Noam Shazeer", "Niki Parmar", "Jakob Uszkoreit"]);
        let (ok, msg) = compare_authors(&names(&["A. Vaswani", "N. Parmar", "et al."]), &correct);
        assert!(ok, "{msg:?}");

        let (ok, msg) = compare_authors(&names(&["A. Vaswani", "Z. Nobody", "et al."]), &correct);
        assert!(!ok);
        assert!(msg.unwrap().contains("Nobody"));
    }

    #[test]
    fn first_author_mismatch_reported_distinctly() {
        let (ok, msg) = compare_authors(
            &names(&["Noam Shazeer", "Ashish Vaswani"]),
            &names(&["Ashish Vaswani", "Noam Shazeer"]),
        );
        assert!(!ok);
        assert!(msg.unwrap().starts_with("First author mismatch"));
    }

    #[test]
    fn count_difference_of_one_tolerated() {
        let (ok, _) = compare_authors(
            &names(&["A. Smith", "B. Jones"]),
            &names(&["Alice Smith", "Bob Jones", "Carol White"]),
        );
        assert!(ok);
    }

    #[test]
    fn lone_lead_author_reads_as_abbreviated_list() {
        let correct = names(&[
            "Ashish Vaswani",
            "Noam Shazeer",
            "Niki Parmar",
            "Jakob Uszkoreit",
            "Llion Jones",
            "Aidan N. Gomez",
            "Lukasz Kaiser",
            "Illia Polosukhin",
        ]);
        assert_eq!(compare_authors(&names(&["Ashish Vaswani"]), &correct), (true, None));
        assert_eq!(compare_authors(&names(&["Vaswani, A."]), &correct), (true, None));

        let (ok, msg) = compare_authors(&names(&["Noam Shazeer"]), &correct);
        assert!(!ok);
        assert!(msg.unwrap().starts_with("First author mismatch"));
    }

    #[test]
    fn count_difference_over_one_is_hard_mismatch() {
        let (ok, msg) = compare_authors(
            &names(&["A. Smith", "B. Jones"]),
            &names(&["Alice Smith", "Bob Jones", "Carol White", "Dan Green"]),
        );
        assert!(!ok);
        assert!(msg.unwrap().contains("count"));
    }

    #[test]
    fn short_lists_checked_positionally() {
        let (ok, msg) = compare_authors(
            &names(&["A. Smith", "C. White", "B. Jones"]),
            &names(&["Alice Smith", "Bob Jones", "Carol White"]),
        );
        assert!(!ok);
        assert!(msg.unwrap().contains("Author 2"));
    }

    #[test]
    fn long_lists_checked_by_membership() {
        let correct = names(&["A One", "B Two", "C Three", "D Four", "E Five", "F Six", "G Seven"]);
        let cited = names(&["A One", "C Three", "B Two", "D Four", "F Six", "E Five", "G Seven"]);
        assert!(compare_authors(&cited, &correct).0);

        let mut wrong = cited.clone();
        wrong[3] = "X Nobody".into();
        assert!(!compare_authors(&wrong, &correct).0);
    }

    #[test]
    fn empty_lists_not_compared() {
        assert_eq!(compare_authors(&[], &names(&["A"])), (true, None));
        assert_eq!(compare_authors(&names(&["A"]), &[]), (true, None));
        assert_eq!(compare_authors(&names(&["et al."]), &names(&["A"])), (true, None));
    }
}
