//! Title normalization and similarity scoring.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use super::fold;

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "of", "and", "or", "in", "on", "for", "to", "with", "by", "at", "from",
    "via", "as", "is", "are", "its", "into", "using", "towards", "toward",
];

const GREEK: &[(char, &str)] = &[
    ('α', "alpha"),
    ('β', "beta"),
    ('γ', "gamma"),
    ('δ', "delta"),
    ('ε', "epsilon"),
    ('ζ', "zeta"),
    ('η', "eta"),
    ('θ', "theta"),
    ('κ', "kappa"),
    ('λ', "lambda"),
    ('μ', "mu"),
    ('ν', "nu"),
    ('ξ', "xi"),
    ('π', "pi"),
    ('ρ', "rho"),
    ('σ', "sigma"),
    ('τ', "tau"),
    ('φ', "phi"),
    ('χ', "chi"),
    ('ψ', "psi"),
    ('ω', "omega"),
    ('Δ', "delta"),
    ('Σ', "sigma"),
    ('Ω', "omega"),
];

const ENTITIES: &[(&str, &str)] = &[
    ("&amp;", "&"),
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&quot;", "\""),
    ("&#39;", "'"),
    ("&apos;", "'"),
    ("&nbsp;", " "),
    ("&ndash;", "-"),
    ("&mdash;", "-"),
];

/// Spelling variants collapsed to one form. Applied after hyphens are kept
/// but before they become spaces, so "fine-tuning" and "finetuning" meet.
const JARGON: &[(&str, &str)] = &[
    ("data set", "dataset"),
    ("data-set", "dataset"),
    ("fine-tuning", "finetuning"),
    ("fine tuning", "finetuning"),
    ("fine-tuned", "finetuned"),
    ("fine tuned", "finetuned"),
    ("real-time", "realtime"),
    ("real time", "realtime"),
    ("end-to-end", "endtoend"),
    ("end to end", "endtoend"),
    ("state-of-the-art", "stateoftheart"),
    ("state of the art", "stateoftheart"),
    ("zero-shot", "zeroshot"),
    ("zero shot", "zeroshot"),
    ("few-shot", "fewshot"),
    ("few shot", "fewshot"),
    ("open-source", "opensource"),
    ("open source", "opensource"),
    ("e-mail", "email"),
    ("on-line", "online"),
    ("web site", "website"),
    ("tool kit", "toolkit"),
    ("work flow", "workflow"),
    ("large-scale", "largescale"),
    ("large scale", "largescale"),
];

static COMPOUND_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(pre|post|multi|non|self|co|semi|cross|inter|intra|sub|super|meta|anti|over|under|un|re|bi|tri|micro|macro|auto|hyper|mid|ultra)[\s\-]+([a-z])",
    )
    .unwrap()
});

static EDITION_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\s+(?:\d+(?:st|nd|rd|th)|first|second|third|fourth|fifth|sixth|seventh|eighth|ninth|tenth|revised|international|global)\s+(?:edition|ed)$",
    )
    .unwrap()
});

static ACRONYM: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[A-Z]{2,}[0-9]*\b").unwrap());

static QUOTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"["“”']([^"“”']{3,})["“”']"#).unwrap());

/// Normalize a title for comparison and cache keys.
///
/// Decodes common HTML entities, spells out Greek letters, folds case and
/// accents, joins compound prefixes ("pre-training" → "pretraining"),
/// unifies jargon spellings, turns hyphens into spaces, strips punctuation
/// and edition suffixes, and collapses whitespace.
pub fn normalize_title(title: &str) -> String {
    let mut s = title.to_string();
    for (entity, replacement) in ENTITIES {
        if s.contains(entity) {
            s = s.replace(entity, replacement);
        }
    }
    let s = s.replace('&', " and ");

    let mut spelled = String::with_capacity(s.len());
    for c in s.chars() {
        match GREEK.iter().find(|(g, _)| *g == c) {
            Some((_, name)) => {
                spelled.push(' ');
                spelled.push_str(name);
                spelled.push(' ');
            }
            None => spelled.push(c),
        }
    }

    let folded = fold(&spelled);
    let mut s = COMPOUND_PREFIX.replace_all(&folded, "$1$2").into_owned();
    for (from, to) in JARGON {
        if s.contains(from) {
            s = s.replace(from, to);
        }
    }

    let cleaned: String = s
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    EDITION_SUFFIX.replace(&collapsed, "").trim().to_string()
}

fn content_tokens(normalized: &str) -> HashSet<&str> {
    normalized
        .split_whitespace()
        .filter(|t| !STOP_WORDS.contains(t))
        .collect()
}

/// Distinctive phrases: lead topic before a colon, quoted phrases and
/// all-caps acronyms, normalized.
fn key_phrases(raw: &str) -> HashSet<String> {
    let mut phrases = HashSet::new();
    if let Some((lead, _)) = raw.split_once(':') {
        let lead = normalize_title(lead);
        if !lead.is_empty() {
            phrases.insert(lead);
        }
    }
    for caps in QUOTED.captures_iter(raw) {
        let phrase = normalize_title(&caps[1]);
        if !phrase.is_empty() {
            phrases.insert(phrase);
        }
    }
    for m in ACRONYM.find_iter(raw) {
        phrases.insert(m.as_str().to_lowercase());
    }
    phrases
}

/// Similarity of two titles in `[0, 1]`.
///
/// 1.0 only when the normalized titles are identical. A normalized title
/// contained in the other and covering at least 80% of it scores 0.95.
/// Otherwise the score is token Jaccard, boosted when the shorter title is
/// almost fully covered and when key phrases overlap, capped below 1.0.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let (na, nb) = (normalize_title(a), normalize_title(b));
    if na == nb {
        return 1.0;
    }
    if na.is_empty() || nb.is_empty() {
        return 0.0;
    }

    let (shorter, longer) = if na.len() <= nb.len() {
        (&na, &nb)
    } else {
        (&nb, &na)
    };
    if longer.contains(shorter.as_str()) && shorter.len() as f64 / longer.len() as f64 >= 0.8 {
        return 0.95;
    }

    let (ta, tb) = (content_tokens(&na), content_tokens(&nb));
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let shared = ta.intersection(&tb).count() as f64;
    let union = ta.union(&tb).count() as f64;
    let mut score = shared / union;

    let coverage = shared / ta.len().min(tb.len()) as f64;
    if coverage >= 0.9 {
        score += 0.2;
    }

    let (ka, kb) = (key_phrases(a), key_phrases(b));
    if !ka.is_empty() && !kb.is_empty() {
        let overlap = ka.intersection(&kb).count() as f64 / ka.len().max(kb.len()) as f64;
        score += 0.1 * overlap;
    }

    score.min(0.99)
}
