//! Venue equivalence.
//!
//! Citations abbreviate venues freely ("Phys. Rev. Lett.", "Proc. CVPR",
//! "NeurIPS 2023"), so comparison works on cleaned, expanded token lists
//! and accepts acronyms and truncations before declaring a difference.

use once_cell::sync::Lazy;
use regex::Regex;

use super::fold;

/// Abbreviated tokens and their expansions.
const ABBREVIATIONS: &[(&str, &str)] = &[
    ("phys", "physical"),
    ("rev", "review"),
    ("lett", "letters"),
    ("proc", "proceedings"),
    ("procs", "proceedings"),
    ("conf", "conference"),
    ("intl", "international"),
    ("int", "international"),
    ("j", "journal"),
    ("jour", "journal"),
    ("trans", "transactions"),
    ("syst", "systems"),
    ("sys", "systems"),
    ("technol", "technology"),
    ("tech", "technology"),
    ("intell", "intelligence"),
    ("artif", "artificial"),
    ("sci", "science"),
    ("eng", "engineering"),
    ("res", "research"),
    ("mach", "machine"),
    ("learn", "learning"),
    ("anal", "analysis"),
    ("inf", "information"),
    ("inform", "information"),
    ("appl", "applied"),
    ("math", "mathematics"),
    ("stat", "statistics"),
    ("natl", "national"),
    ("acad", "academy"),
    ("soc", "society"),
    ("assoc", "association"),
    ("commun", "communications"),
    ("comm", "communications"),
    ("netw", "networks"),
    ("softw", "software"),
    ("lang", "language"),
    ("symp", "symposium"),
    ("adv", "advances"),
    ("electron", "electronics"),
    ("annu", "annual"),
    ("comput", "computing"),
    ("ling", "linguistics"),
    ("process", "processing"),
    ("rep", "reports"),
    ("med", "medicine"),
    ("biol", "biology"),
    ("chem", "chemistry"),
    ("econ", "economics"),
    ("mgmt", "management"),
    ("found", "foundations"),
    ("theor", "theoretical"),
    ("vis", "vision"),
    ("recogn", "recognition"),
    ("robot", "robotics"),
    ("auton", "autonomous"),
    ("distrib", "distributed"),
    ("oper", "operating"),
    ("princ", "principles"),
    ("secur", "security"),
    ("priv", "privacy"),
    ("bioinform", "bioinformatics"),
];

/// Well-known venue acronyms and their full names.
const ALIASES: &[(&str, &str)] = &[
    ("neurips", "neural information processing systems"),
    ("nips", "neural information processing systems"),
    ("icml", "international conference on machine learning"),
    ("iclr", "international conference on learning representations"),
    ("cvpr", "computer vision and pattern recognition"),
    ("iccv", "international conference on computer vision"),
    ("eccv", "european conference on computer vision"),
    ("acl", "association for computational linguistics"),
    ("emnlp", "empirical methods in natural language processing"),
    ("naacl", "north american chapter of the association for computational linguistics"),
    ("coling", "international conference on computational linguistics"),
    ("aaai", "aaai conference on artificial intelligence"),
    ("ijcai", "international joint conference on artificial intelligence"),
    ("kdd", "knowledge discovery and data mining"),
    ("sigkdd", "knowledge discovery and data mining"),
    ("www", "world wide web conference"),
    ("chi", "human factors in computing systems"),
    ("ccs", "computer and communications security"),
    ("ndss", "network and distributed system security symposium"),
    ("osdi", "operating systems design and implementation"),
    ("sosp", "symposium on operating systems principles"),
    ("nsdi", "networked systems design and implementation"),
    ("sigmod", "management of data"),
    ("vldb", "very large data bases"),
    ("icse", "international conference on software engineering"),
    ("uai", "uncertainty in artificial intelligence"),
    ("aistats", "artificial intelligence and statistics"),
    ("colt", "conference on learning theory"),
    ("icra", "international conference on robotics and automation"),
    ("iros", "intelligent robots and systems"),
    ("tpami", "transactions on pattern analysis and machine intelligence"),
    ("pami", "pattern analysis and machine intelligence"),
    ("jmlr", "journal of machine learning research"),
    ("tmlr", "transactions on machine learning research"),
    ("pnas", "proceedings of the national academy of sciences"),
    ("jair", "journal of artificial intelligence research"),
    ("tacl", "transactions of the association for computational linguistics"),
];

/// Root pairs that shared prefixes alone do not catch.
const TOKEN_PAIRS: &[(&str, &str)] = &[
    ("syst", "systems"),
    ("computer", "computing"),
    ("computational", "computing"),
    ("statistical", "statistics"),
    ("mathematical", "mathematics"),
    ("biological", "biology"),
    ("chemical", "chemistry"),
    ("economic", "economics"),
    ("linguistic", "linguistics"),
    ("sciences", "science"),
];

const ORGANIZATIONS: &[&str] = &[
    "ieee", "acm", "usenix", "siam", "springer", "elsevier", "cvf", "ieeecvf", "aps", "ams",
];

const LEADING_NOISE: &[&str] = &["in", "proceedings", "of", "the"];

const STOP_WORDS: &[&str] = &["of", "the", "and", "in", "on", "for", "at", "to", "a", "an"];

/// Words naming the kind of venue rather than its subject.
const VENUE_KIND_WORDS: &[&str] = &[
    "conference",
    "proceedings",
    "journal",
    "international",
    "annual",
    "symposium",
    "workshop",
    "transactions",
    "meeting",
    "acm",
    "ieee",
];

static NOISE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\b(?:vol|volume)\.?\s*\d+",
        r"\b(?:no|num|number|issue)\.?\s*\d+",
        r"\b(?:pp|pages?)\.?\s*\d+(?:\s*[-–]\s*\d+)?",
        r"\d+\s*\(\s*\d+\s*\)",
        r"\d+\s*[-–]\s*\d+",
        r"\b(?:19|20)\d{2}\b",
        r"'\d{2}\b",
        r"\b\d+(?:st|nd|rd|th)\b",
        r"\b(?:first|second|third|fourth|fifth|sixth|seventh|eighth|ninth|tenth)\b",
        r"\b\d+\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

fn expand(token: &str) -> &str {
    ABBREVIATIONS
        .iter()
        .find(|(abbr, _)| *abbr == token)
        .map(|(_, full)| *full)
        .unwrap_or(token)
}

fn alias(token: &str) -> Option<&'static str> {
    ALIASES
        .iter()
        .find(|(acronym, _)| *acronym == token)
        .map(|(_, full)| *full)
}

/// Clean, expand and de-noise a venue into comparison tokens.
fn clean_tokens(venue: &str) -> Vec<String> {
    let mut s = fold(venue).replace('&', " and ");
    for re in NOISE_PATTERNS.iter() {
        s = re.replace_all(&s, " ").into_owned();
    }
    let spaced: String = s
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    let mut tokens: Vec<String> = Vec::new();
    for raw in spaced.split_whitespace() {
        match alias(raw) {
            Some(full) => tokens.extend(full.split_whitespace().map(str::to_string)),
            None => tokens.push(expand(raw).to_string()),
        }
    }

    let without_orgs: Vec<String> = tokens
        .iter()
        .filter(|t| !ORGANIZATIONS.contains(&t.as_str()))
        .cloned()
        .collect();
    let start = without_orgs
        .iter()
        .take_while(|t| LEADING_NOISE.contains(&t.as_str()))
        .count();
    let stripped = without_orgs[start..].to_vec();
    if stripped.is_empty() { tokens } else { stripped }
}

/// Tokens of the raw venue that look like acronyms: "CVPR", "NeurIPS", or
/// the venue's only word when it is short.
fn acronym_tokens(venue: &str) -> Vec<String> {
    let words: Vec<&str> = venue
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().any(|c| c.is_alphabetic()))
        .collect();
    let mut out: Vec<String> = words
        .iter()
        .filter(|w| {
            let len = w.chars().count();
            (2..=8).contains(&len)
                && w.chars().all(|c| c.is_alphabetic())
                && w.chars().filter(|c| c.is_uppercase()).count() >= 2
        })
        .map(|w| fold(w))
        .collect();
    if words.len() == 1 {
        let only = fold(words[0]);
        if (2..=8).contains(&only.chars().count()) && !out.contains(&only) {
            out.push(only);
        }
    }
    out
}

fn initials<'a>(tokens: impl Iterator<Item = &'a String>) -> String {
    tokens.filter_map(|t| t.chars().next()).collect()
}

/// Acronym candidates from a full venue under three filtering policies.
fn acronym_candidates(tokens: &[String]) -> Vec<String> {
    let all = initials(tokens.iter());
    let no_stop = initials(tokens.iter().filter(|t| !STOP_WORDS.contains(&t.as_str())));
    let no_kind = initials(tokens.iter().filter(|t| {
        !STOP_WORDS.contains(&t.as_str()) && !VENUE_KIND_WORDS.contains(&t.as_str())
    }));
    [all, no_stop, no_kind]
        .into_iter()
        .filter(|c| c.len() >= 2)
        .collect()
}

fn acronym_equivalent(full_tokens: &[String], other_raw: &str) -> bool {
    let candidates = acronym_candidates(full_tokens);
    acronym_tokens(other_raw)
        .iter()
        .any(|acr| candidates.iter().any(|c| c == acr))
}

fn depluralize(t: &str) -> &str {
    if t.len() > 3 {
        t.strip_suffix('s').unwrap_or(t)
    } else {
        t
    }
}

fn tokens_match(a: &str, b: &str) -> bool {
    if a == b || depluralize(a) == depluralize(b) {
        return true;
    }
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if short.len() >= 3 && long.starts_with(short) {
        return true;
    }
    TOKEN_PAIRS
        .iter()
        .any(|(x, y)| (*x == a && *y == b) || (*x == b && *y == a))
}

fn significant(tokens: &[String]) -> Vec<&str> {
    tokens
        .iter()
        .map(String::as_str)
        .filter(|t| !STOP_WORDS.contains(t))
        .collect()
}

/// Fraction of the shorter list's tokens matched, in order, in the longer.
fn aligned_coverage(a: &[String], b: &[String]) -> f64 {
    let (a, b) = (significant(a), significant(b));
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if short.is_empty() {
        return 0.0;
    }
    let mut matched = 0;
    let mut pos = 0;
    for token in &short {
        if let Some(offset) = long[pos..].iter().position(|l| tokens_match(token, l)) {
            matched += 1;
            pos += offset + 1;
        }
    }
    matched as f64 / short.len() as f64
}

/// Whether two venue strings name different venues.
///
/// An empty venue on either side never differs.
pub fn venues_differ(a: &str, b: &str) -> bool {
    if a.trim().is_empty() || b.trim().is_empty() {
        return false;
    }
    let (ta, tb) = (clean_tokens(a), clean_tokens(b));
    if ta.is_empty() || tb.is_empty() || ta == tb {
        return false;
    }
    if acronym_equivalent(&ta, b) || acronym_equivalent(&tb, a) {
        return false;
    }
    aligned_coverage(&ta, &tb) < 0.8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abbreviated_journal_matches() {
        assert!(!venues_differ("Phys. Rev. Lett.", "Physical Review Letters"));
        assert!(!venues_differ(
            "IEEE Trans. Pattern Anal. Mach. Intell.",
            "IEEE Transactions on Pattern Analysis and Machine Intelligence"
        ));
        assert!(!venues_differ(
            "J. Mach. Learn. Res.",
            "Journal of Machine Learning Research"
        ));
    }

    #[test]
    fn different_journals_differ() {
        assert!(venues_differ("Nature", "Science"));
        assert!(venues_differ(
            "Journal of Machine Learning Research",
            "Computer Vision and Pattern Recognition"
        ));
    }

    #[test]
    fn conference_acronyms() {
        assert!(!venues_differ(
            "NeurIPS 2023",
            "Advances in Neural Information Processing Systems"
        ));
        assert!(!venues_differ(
            "ICML",
            "International Conference on Machine Learning"
        ));
        assert!(!venues_differ(
            "Proc. CVPR",
            "Proceedings of the IEEE/CVF Conference on Computer Vision and Pattern Recognition"
        ));
    }

    #[test]
    fn acronym_built_from_full_name() {
        // Not in the alias table; found by initials.
        assert!(!venues_differ(
            "ISWC",
            "International Semantic Web Conference"
        ));
    }

    #[test]
    fn years_volumes_and_pages_ignored() {
        assert!(!venues_differ(
            "Nature, vol. 521, no. 7553, pp. 436-444, 2015",
            "Nature"
        ));
        assert!(!venues_differ(
            "Proceedings of the 34th International Conference on Machine Learning",
            "International Conference on Machine Learning"
        ));
    }

    #[test]
    fn truncated_names_align() {
        assert!(!venues_differ(
            "Proc. VLDB Endow.",
            "Proceedings of the VLDB Endowment"
        ));
    }

    #[test]
    fn empty_never_differs() {
        assert!(!venues_differ("", "Nature"));
        assert!(!venues_differ("Nature", "   "));
    }
}
