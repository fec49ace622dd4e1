//! Medication name dictionary.
//!
//! Maps spelling variants (brand names, salts, syrup prefixes) to one
//! canonical medication name. Exact variant hits carry confidence 1.0;
//! fuzzy hits are scored by edit-distance ratio and only accepted for
//! longer tokens with an unambiguous best match.

use strsim::{jaro_winkler, normalized_levenshtein};

/// Minimum normalized Levenshtein ratio for a fuzzy dictionary hit.
pub const FUZZY_MIN_RATIO: f32 = 0.84;

/// Tokens shorter than this never fuzzy-match (too many false positives).
const FUZZY_MIN_TOKEN_LEN: usize = 5;

/// `(variant, canonical)` pairs. Sorted by variant for binary search;
/// all lowercase.
const VARIANT_INDEX: &[(&str, &str)] = &[
    ("acetaminophen", "acetaminophen"),
    ("acetylsalicylic acid", "aspirin"),
    ("advil", "ibuprofen"),
    ("aldactone", "spironolactone"),
    ("amlodipine", "amlodipine"),
    ("amoxicillin", "amoxicillin"),
    ("amoxil", "amoxicillin"),
    ("asa", "aspirin"),
    ("aspirin", "aspirin"),
    ("atorvastatin", "atorvastatin"),
    ("augmentin", "augmentin"),
    ("azithromycin", "azithromycin"),
    ("brufen", "ibuprofen"),
    ("calpol", "acetaminophen"),
    ("carvedilol", "carvedilol"),
    ("cetirizine", "cetirizine"),
    ("coreg", "carvedilol"),
    ("cozaar", "losartan"),
    ("cymbalta", "duloxetine"),
    ("duloxetine", "duloxetine"),
    ("furosemide", "furosemide"),
    ("gabapentin", "gabapentin"),
    ("glucophage", "metformin"),
    ("hctz", "hydrochlorothiazide"),
    ("hydrochlorothiazide", "hydrochlorothiazide"),
    ("ibuprofen", "ibuprofen"),
    ("lasix", "furosemide"),
    ("lipitor", "atorvastatin"),
    ("lisinopril", "lisinopril"),
    ("lopressor", "metoprolol"),
    ("losartan", "losartan"),
    ("metformin", "metformin"),
    ("metoprolol", "metoprolol"),
    ("microzide", "hydrochlorothiazide"),
    ("motrin", "ibuprofen"),
    ("neurontin", "gabapentin"),
    ("norvasc", "amlodipine"),
    ("omeprazole", "omeprazole"),
    ("pantoprazole", "pantoprazole"),
    ("paracetamol", "acetaminophen"),
    ("prilosec", "omeprazole"),
    ("prinivil", "lisinopril"),
    ("protonix", "pantoprazole"),
    ("simvastatin", "simvastatin"),
    ("spironolactone", "spironolactone"),
    ("toprol", "metoprolol"),
    ("tramadol", "tramadol"),
    ("trimox", "amoxicillin"),
    ("tylenol", "acetaminophen"),
    ("ultram", "tramadol"),
    ("vit b12", "vitamin b12"),
    ("vit d", "vitamin d"),
    ("vitamin b12", "vitamin b12"),
    ("vitamin d", "vitamin d"),
    ("zestril", "lisinopril"),
    ("zithromax", "azithromycin"),
    ("zocor", "simvastatin"),
    ("zyrtec", "cetirizine"),
];

/// A dictionary hit in normalized text. Offsets are byte positions.
#[derive(Debug, Clone, PartialEq)]
pub struct NameMatch {
    pub canonical: &'static str,
    pub start: usize,
    pub end: usize,
    pub confidence: f32,
}

/// Exact variant lookup (input must already be lowercase).
pub fn exact_lookup(token: &str) -> Option<&'static str> {
    VARIANT_INDEX
        .binary_search_by(|(variant, _)| variant.cmp(&token))
        .ok()
        .map(|idx| VARIANT_INDEX[idx].1)
}

/// Fuzzy variant lookup for a single token.
///
/// Candidates are ranked by a Jaro-Winkler / Levenshtein blend; the
/// reported confidence is the plain edit-distance ratio. Returns `None`
/// for short tokens, weak matches, or ties between different
/// canonical names.
pub fn fuzzy_lookup(token: &str) -> Option<(&'static str, f32)> {
    if token.len() < FUZZY_MIN_TOKEN_LEN {
        return None;
    }

    let mut best: Option<(&'static str, f64, f64)> = None;
    let mut ambiguous = false;

    for (variant, canonical) in VARIANT_INDEX {
        // Length gate: a variant differing by more than 2 chars cannot
        // clear the ratio threshold for tokens this short.
        let len_diff = (token.len() as i64 - variant.len() as i64).unsigned_abs();
        if len_diff > 2 {
            continue;
        }

        let lev = normalized_levenshtein(token, variant);
        if (lev as f32) < FUZZY_MIN_RATIO {
            continue;
        }
        let score = jaro_winkler(token, variant) * 0.6 + lev * 0.4;

        match best {
            Some((best_canonical, best_score, _)) => {
                if score > best_score {
                    ambiguous = false;
                    best = Some((canonical, score, lev));
                } else if (score - best_score).abs() < 1e-9 && *canonical != best_canonical {
                    ambiguous = true;
                }
            }
            None => best = Some((canonical, score, lev)),
        }
    }

    match best {
        Some((canonical, _, lev)) if !ambiguous => Some((canonical, lev as f32)),
        _ => None,
    }
}

/// Find medication names in normalized text: one match per canonical
/// name, earliest occurrence wins. Exact variants first, then a fuzzy
/// token pass for names the OCR garbled.
pub fn find_medication_names(text: &str) -> Vec<NameMatch> {
    let mut matches: Vec<NameMatch> = Vec::new();

    for (variant, canonical) in VARIANT_INDEX {
        let Some(start) = find_with_boundaries(text, variant) else {
            continue;
        };
        let end = start + variant.len();

        match matches.iter_mut().find(|m| m.canonical == *canonical) {
            Some(existing) => {
                if start < existing.start {
                    existing.start = start;
                    existing.end = end;
                }
            }
            None => matches.push(NameMatch {
                canonical,
                start,
                end,
                confidence: 1.0,
            }),
        }
    }

    for (start, token) in tokens_with_offsets(text) {
        if exact_lookup(token).is_some() {
            continue;
        }
        let end = start + token.len();
        if matches.iter().any(|m| spans_overlap(m.start, m.end, start, end)) {
            continue;
        }
        let Some((canonical, ratio)) = fuzzy_lookup(token) else {
            continue;
        };
        if matches.iter().any(|m| m.canonical == canonical) {
            continue;
        }
        matches.push(NameMatch {
            canonical,
            start,
            end,
            confidence: ratio,
        });
    }

    matches.sort_by_key(|m| m.start);
    matches
}

/// "metformin" → "Metformin", "acetylsalicylic acid" → "Acetylsalicylic Acid".
pub fn display_name(canonical: &str) -> String {
    canonical
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Leftmost occurrence of `needle` in `haystack` where neither neighbor
/// is alphanumeric.
fn find_with_boundaries(haystack: &str, needle: &str) -> Option<usize> {
    let mut search_from = 0;
    while let Some(rel) = haystack[search_from..].find(needle) {
        let start = search_from + rel;
        let end = start + needle.len();

        let before_ok = haystack[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let after_ok = haystack[end..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric());

        if before_ok && after_ok {
            return Some(start);
        }
        search_from = start + 1;
    }
    None
}

fn spans_overlap(a_start: usize, a_end: usize, b_start: usize, b_end: usize) -> bool {
    a_start < b_end && b_start < a_end
}

/// Alphabetic tokens with their byte offsets.
fn tokens_with_offsets(text: &str) -> Vec<(usize, &str)> {
    let mut tokens = Vec::new();
    let mut token_start: Option<usize> = None;

    for (idx, c) in text.char_indices() {
        if c.is_alphabetic() {
            if token_start.is_none() {
                token_start = Some(idx);
            }
        } else if let Some(start) = token_start.take() {
            tokens.push((start, &text[start..idx]));
        }
    }
    if let Some(start) = token_start {
        tokens.push((start, &text[start..]));
    }
    tokens
}
