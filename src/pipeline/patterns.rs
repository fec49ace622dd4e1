//! Pattern tables for field extraction.
//!
//! Single source of truth for everything the extractor recognizes
//! besides medication names: dosages, durations, frequency phrases and
//! abbreviations, timing codes, and instruction phrases. All matching
//! expects normalized (lowercase) text and reports byte spans.

use std::sync::OnceLock;

use regex::Regex;

use crate::models::{CanonicalFrequency, Dosage, DoseUnit};

use super::confidence;

// ═══════════════════════════════════════════
// Match types
// ═══════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct DosageMatch {
    pub dosage: Dosage,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DurationMatch {
    pub days: i64,
    pub phrase: String,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyMatch {
    pub frequency: CanonicalFrequency,
    pub phrase: String,
    pub confidence: f32,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstructionMatch {
    pub phrase: &'static str,
    pub start: usize,
    pub end: usize,
}

/// A frequency-shaped phrase the canonical table did not recognize
/// ("every other day", "five times weekly"). Preserved verbatim for the
/// documented once-daily fallback.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeMatch {
    pub phrase: String,
    pub start: usize,
    pub end: usize,
}

// ═══════════════════════════════════════════
// Tables
// ═══════════════════════════════════════════

const M: CanonicalFrequency = CanonicalFrequency::DosePattern {
    morning: true,
    afternoon: false,
    night: false,
};
const N: CanonicalFrequency = CanonicalFrequency::DosePattern {
    morning: false,
    afternoon: false,
    night: true,
};
const MN: CanonicalFrequency = CanonicalFrequency::DosePattern {
    morning: true,
    afternoon: false,
    night: true,
};

/// Canonical frequency phrases and abbreviations. Multi-word phrases
/// carry the higher confidence; clinical shorthand slightly less.
const FREQUENCY_PHRASES: &[(&str, CanonicalFrequency, f32)] = &[
    ("once daily", CanonicalFrequency::OnceDaily, confidence::FREQUENCY_PHRASE),
    ("once a day", CanonicalFrequency::OnceDaily, confidence::FREQUENCY_PHRASE),
    ("1x daily", CanonicalFrequency::OnceDaily, confidence::FREQUENCY_ABBREVIATION),
    ("daily", CanonicalFrequency::OnceDaily, confidence::FREQUENCY_ABBREVIATION),
    ("od", CanonicalFrequency::OnceDaily, confidence::FREQUENCY_ABBREVIATION),
    ("qd", CanonicalFrequency::OnceDaily, confidence::FREQUENCY_ABBREVIATION),
    ("q.d.", CanonicalFrequency::OnceDaily, confidence::FREQUENCY_ABBREVIATION),
    ("twice daily", CanonicalFrequency::TwiceDaily, confidence::FREQUENCY_PHRASE),
    ("twice a day", CanonicalFrequency::TwiceDaily, confidence::FREQUENCY_PHRASE),
    ("2x daily", CanonicalFrequency::TwiceDaily, confidence::FREQUENCY_ABBREVIATION),
    ("bid", CanonicalFrequency::TwiceDaily, confidence::FREQUENCY_ABBREVIATION),
    ("b.i.d.", CanonicalFrequency::TwiceDaily, confidence::FREQUENCY_ABBREVIATION),
    ("bd", CanonicalFrequency::TwiceDaily, confidence::FREQUENCY_ABBREVIATION),
    ("three times daily", CanonicalFrequency::ThreeTimesDaily, confidence::FREQUENCY_PHRASE),
    ("three times a day", CanonicalFrequency::ThreeTimesDaily, confidence::FREQUENCY_PHRASE),
    ("3x daily", CanonicalFrequency::ThreeTimesDaily, confidence::FREQUENCY_ABBREVIATION),
    ("tid", CanonicalFrequency::ThreeTimesDaily, confidence::FREQUENCY_ABBREVIATION),
    ("t.i.d.", CanonicalFrequency::ThreeTimesDaily, confidence::FREQUENCY_ABBREVIATION),
    ("tds", CanonicalFrequency::ThreeTimesDaily, confidence::FREQUENCY_ABBREVIATION),
    ("t.d.s.", CanonicalFrequency::ThreeTimesDaily, confidence::FREQUENCY_ABBREVIATION),
    ("four times daily", CanonicalFrequency::FourTimesDaily, confidence::FREQUENCY_PHRASE),
    ("four times a day", CanonicalFrequency::FourTimesDaily, confidence::FREQUENCY_PHRASE),
    ("4x daily", CanonicalFrequency::FourTimesDaily, confidence::FREQUENCY_ABBREVIATION),
    ("qid", CanonicalFrequency::FourTimesDaily, confidence::FREQUENCY_ABBREVIATION),
    ("q.i.d.", CanonicalFrequency::FourTimesDaily, confidence::FREQUENCY_ABBREVIATION),
    ("qds", CanonicalFrequency::FourTimesDaily, confidence::FREQUENCY_ABBREVIATION),
    ("as needed", CanonicalFrequency::AsNeeded, confidence::FREQUENCY_PHRASE),
    ("when required", CanonicalFrequency::AsNeeded, confidence::FREQUENCY_PHRASE),
    ("prn", CanonicalFrequency::AsNeeded, confidence::FREQUENCY_ABBREVIATION),
    ("p.r.n.", CanonicalFrequency::AsNeeded, confidence::FREQUENCY_ABBREVIATION),
    ("sos", CanonicalFrequency::AsNeeded, confidence::FREQUENCY_ABBREVIATION),
    ("every morning", M, confidence::FREQUENCY_ABBREVIATION),
    ("in the morning", M, confidence::FREQUENCY_ABBREVIATION),
    ("every night", N, confidence::FREQUENCY_ABBREVIATION),
    ("at night", N, confidence::FREQUENCY_ABBREVIATION),
    ("morning and night", MN, confidence::FREQUENCY_PHRASE),
    ("morning and evening", MN, confidence::FREQUENCY_PHRASE),
];

/// Instruction phrases, matched verbatim.
const INSTRUCTION_PHRASES: &[&str] = &[
    "with food",
    "after food",
    "before food",
    "with meals",
    "after meals",
    "before meals",
    "on an empty stomach",
    "empty stomach",
    "at bedtime",
    "before sleep",
    "with water",
    "after breakfast",
    "before breakfast",
];

fn dosage_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\b(\d{1,4}(?:\.\d+)?)\s*(mg|mcg|g|ml|iu|tablets?|tabs?|capsules?|caps?|drops?|puffs?|units?)\b",
        )
        .expect("valid regex")
    })
}

fn duration_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?:(?:for|x)\s*)?(\d{1,3})\s*(days?|weeks?|wks?|months?|mos?|years?|yrs?)\b")
            .expect("valid regex")
    })
}

fn every_hours_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // "every 6 hours" | "q6h" / "q.6.h." | "6 hourly"
        Regex::new(r"\bevery\s+(\d{1,2})\s+hours?\b|\bq\.?(\d{1,2})\.?h\.?|\b(\d{1,2})\s+hourly\b")
            .expect("valid regex")
    })
}

fn timing_code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // Prescription timing codes: 1-0-1, 1 1 1, ...
        Regex::new(r"\b([01])[ -]([01])[ -]([01])\b").expect("valid regex")
    })
}

fn frequency_shape_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\b(?:\d{1,2}|one|two|three|four|five|six|seven|eight|nine|ten|once|twice|thrice)\s*(?:x|times?)?\s*(?:a\s+|per\s+|every\s+)?(?:day|daily|night|week|weekly|month|monthly|hour|hourly)s?\b|\bevery\s+(?:other|alternate|second)\s+(?:day|night|week|morning|evening)s?\b|\balternate\s+(?:days?|nights?)\b|\b(?:weekly|fortnightly|monthly)\b",
        )
        .expect("valid regex")
    })
}

// ═══════════════════════════════════════════
// Matching
// ═══════════════════════════════════════════

/// All dosage expressions in the text.
pub fn find_dosages(text: &str) -> Vec<DosageMatch> {
    dosage_re()
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let value: f64 = caps.get(1)?.as_str().parse().ok()?;
            let unit = DoseUnit::from_str(caps.get(2)?.as_str())?;
            Some(DosageMatch {
                dosage: Dosage::new(value, unit),
                start: whole.start(),
                end: whole.end(),
            })
        })
        .collect()
}

/// All duration expressions, converted to days.
pub fn find_durations(text: &str) -> Vec<DurationMatch> {
    duration_re()
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let count: i64 = caps.get(1)?.as_str().parse().ok()?;
            let days = match caps.get(2)?.as_str() {
                u if u.starts_with("day") => count,
                u if u.starts_with("week") || u.starts_with("wk") => count * 7,
                u if u.starts_with("month") || u.starts_with("mo") => count * 30,
                _ => count * 365,
            };
            Some(DurationMatch {
                days,
                phrase: whole.as_str().to_string(),
                start: whole.start(),
                end: whole.end(),
            })
        })
        .collect()
}

/// All canonical frequency mentions: phrase table, every-N-hours forms,
/// and timing codes. Overlaps resolve to the longer match.
pub fn find_frequencies(text: &str) -> Vec<FrequencyMatch> {
    let mut raw: Vec<FrequencyMatch> = Vec::new();

    for (phrase, frequency, conf) in FREQUENCY_PHRASES {
        for start in find_all_with_boundaries(text, phrase) {
            raw.push(FrequencyMatch {
                frequency: *frequency,
                phrase: (*phrase).to_string(),
                confidence: *conf,
                start,
                end: start + phrase.len(),
            });
        }
    }

    for caps in every_hours_re().captures_iter(text) {
        let whole = match caps.get(0) {
            Some(m) => m,
            None => continue,
        };
        let digits = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3));
        let Some(n) = digits.and_then(|m| m.as_str().parse::<u8>().ok()) else {
            continue;
        };
        if !(1..=24).contains(&n) {
            continue;
        }
        let confidence = if whole.as_str().starts_with("every") {
            confidence::FREQUENCY_PHRASE
        } else {
            confidence::FREQUENCY_ABBREVIATION
        };
        raw.push(FrequencyMatch {
            frequency: CanonicalFrequency::EveryHours(n),
            phrase: whole.as_str().to_string(),
            confidence,
            start: whole.start(),
            end: whole.end(),
        });
    }

    for caps in timing_code_re().captures_iter(text) {
        let whole = match caps.get(0) {
            Some(m) => m,
            None => continue,
        };
        let flag = |i: usize| caps.get(i).map(|m| m.as_str() == "1").unwrap_or(false);
        let (morning, afternoon, night) = (flag(1), flag(2), flag(3));
        if !(morning || afternoon || night) {
            continue;
        }
        raw.push(FrequencyMatch {
            frequency: CanonicalFrequency::DosePattern {
                morning,
                afternoon,
                night,
            },
            phrase: whole.as_str().to_string(),
            confidence: confidence::FREQUENCY_ABBREVIATION,
            start: whole.start(),
            end: whole.end(),
        });
    }

    resolve_overlaps(raw)
}

/// Frequency-shaped text for the unparsed fallback. The caller drops
/// shapes that overlap a recognized frequency or duration.
pub fn find_frequency_shapes(text: &str) -> Vec<ShapeMatch> {
    frequency_shape_re()
        .find_iter(text)
        .map(|m| ShapeMatch {
            phrase: m.as_str().to_string(),
            start: m.start(),
            end: m.end(),
        })
        .collect()
}

/// Instruction phrases, longest match preferred.
pub fn find_instructions(text: &str) -> Vec<InstructionMatch> {
    let mut raw: Vec<InstructionMatch> = Vec::new();
    for phrase in INSTRUCTION_PHRASES {
        for start in find_all_with_boundaries(text, phrase) {
            raw.push(InstructionMatch {
                phrase,
                start,
                end: start + phrase.len(),
            });
        }
    }

    raw.sort_by(|a, b| {
        (b.end - b.start)
            .cmp(&(a.end - a.start))
            .then(a.start.cmp(&b.start))
    });
    let mut accepted: Vec<InstructionMatch> = Vec::new();
    for m in raw {
        if !accepted
            .iter()
            .any(|a| spans_overlap(a.start, a.end, m.start, m.end))
        {
            accepted.push(m);
        }
    }
    accepted.sort_by_key(|m| m.start);
    accepted
}

/// Parse a standalone frequency phrase (user input or a stored verbatim
/// phrase). Returns the dominant canonical frequency, if any.
pub fn parse_frequency_phrase(phrase: &str) -> Option<CanonicalFrequency> {
    let normalized = phrase.trim().to_lowercase();
    find_frequencies(&normalized)
        .into_iter()
        .max_by_key(|m| m.end - m.start)
        .map(|m| m.frequency)
}

/// Longer (more specific) match wins; ties break toward the earlier,
/// higher-confidence match.
fn resolve_overlaps(mut raw: Vec<FrequencyMatch>) -> Vec<FrequencyMatch> {
    raw.sort_by(|a, b| {
        (b.end - b.start)
            .cmp(&(a.end - a.start))
            .then(a.start.cmp(&b.start))
            .then(b.confidence.total_cmp(&a.confidence))
    });

    let mut accepted: Vec<FrequencyMatch> = Vec::new();
    for m in raw {
        if !accepted
            .iter()
            .any(|a| spans_overlap(a.start, a.end, m.start, m.end))
        {
            accepted.push(m);
        }
    }
    accepted.sort_by_key(|m| m.start);
    accepted
}

pub(crate) fn spans_overlap(a_start: usize, a_end: usize, b_start: usize, b_end: usize) -> bool {
    a_start < b_end && b_start < a_end
}

/// Every occurrence of `needle` whose neighbors are not alphanumeric.
fn find_all_with_boundaries(haystack: &str, needle: &str) -> Vec<usize> {
    let mut hits = Vec::new();
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
            hits.push(start);
        }
        search_from = start + 1;
    }
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_metric_dosage() {
        let matches = find_dosages("aspirin 100mg once daily");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].dosage, Dosage::new(100.0, DoseUnit::Mg));
        assert_eq!(&"aspirin 100mg once daily"[matches[0].start..matches[0].end], "100mg");
    }

    #[test]
    fn finds_spaced_and_fractional_dosage() {
        let matches = find_dosages("give 2.5 ml at night");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].dosage, Dosage::new(2.5, DoseUnit::Ml));
    }

    #[test]
    fn finds_count_unit_dosage() {
        let matches = find_dosages("take 2 tablets after meals");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].dosage, Dosage::new(2.0, DoseUnit::Tablet));
    }

    #[test]
    fn dosage_requires_word_boundary() {
        assert!(find_dosages("room 12mlx annex").is_empty());
    }

    #[test]
    fn duration_in_days() {
        let matches = find_durations("metformin 500mg twice daily for 30 days");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].days, 30);
        assert!(matches[0].phrase.contains("30 days"));
    }

    #[test]
    fn duration_units_convert() {
        assert_eq!(find_durations("for 2 weeks")[0].days, 14);
        assert_eq!(find_durations("x 3 months")[0].days, 90);
        assert_eq!(find_durations("for 1 year")[0].days, 365);
    }

    #[test]
    fn frequency_phrase_once_daily() {
        let matches = find_frequencies("aspirin 100mg once daily");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].frequency, CanonicalFrequency::OnceDaily);
        assert_eq!(matches[0].confidence, confidence::FREQUENCY_PHRASE);
    }

    #[test]
    fn longer_phrase_beats_inner_word() {
        // "daily" alone is also in the table; the longer span must win.
        let matches = find_frequencies("twice daily");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].frequency, CanonicalFrequency::TwiceDaily);
        assert_eq!(matches[0].phrase, "twice daily");
    }

    #[test]
    fn abbreviations_resolve() {
        assert_eq!(
            find_frequencies("take bid")[0].frequency,
            CanonicalFrequency::TwiceDaily
        );
        assert_eq!(
            find_frequencies("tab tds")[0].frequency,
            CanonicalFrequency::ThreeTimesDaily
        );
        assert_eq!(
            find_frequencies("prn for pain")[0].frequency,
            CanonicalFrequency::AsNeeded
        );
    }

    #[test]
    fn dotted_abbreviations_resolve() {
        assert_eq!(
            find_frequencies("one tab b.i.d.")[0].frequency,
            CanonicalFrequency::TwiceDaily
        );
    }

    #[test]
    fn every_n_hours_forms() {
        assert_eq!(
            find_frequencies("every 6 hours")[0].frequency,
            CanonicalFrequency::EveryHours(6)
        );
        assert_eq!(
            find_frequencies("q8h")[0].frequency,
            CanonicalFrequency::EveryHours(8)
        );
        assert_eq!(
            find_frequencies("q.12.h.")[0].frequency,
            CanonicalFrequency::EveryHours(12)
        );
        assert_eq!(
            find_frequencies("6 hourly")[0].frequency,
            CanonicalFrequency::EveryHours(6)
        );
    }

    #[test]
    fn every_n_hours_rejects_out_of_range() {
        assert!(find_frequencies("every 48 hours").is_empty());
    }

    #[test]
    fn timing_codes_map_to_dose_patterns() {
        let m = &find_frequencies("tab vomilast 1-0-1")[0];
        assert_eq!(
            m.frequency,
            CanonicalFrequency::DosePattern {
                morning: true,
                afternoon: false,
                night: true
            }
        );

        let m = &find_frequencies("0-0-1 after meals")[0];
        assert_eq!(
            m.frequency,
            CanonicalFrequency::DosePattern {
                morning: false,
                afternoon: false,
                night: true
            }
        );
    }

    #[test]
    fn spaced_timing_code_matches() {
        let matches = find_frequencies("syp calpol 1 0 1");
        assert_eq!(matches.len(), 1);
        assert_eq!(
            matches[0].frequency,
            CanonicalFrequency::DosePattern {
                morning: true,
                afternoon: false,
                night: true
            }
        );
    }

    #[test]
    fn all_zero_timing_code_ignored() {
        assert!(find_frequencies("0-0-0").is_empty());
    }

    #[test]
    fn two_medications_two_frequency_hits() {
        let text = "aspirin once daily and metformin twice daily";
        let matches = find_frequencies(text);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].frequency, CanonicalFrequency::OnceDaily);
        assert_eq!(matches[1].frequency, CanonicalFrequency::TwiceDaily);
    }

    #[test]
    fn shape_catches_unknown_frequency() {
        let shapes = find_frequency_shapes("take five times a day");
        assert_eq!(shapes.len(), 1);
        assert_eq!(shapes[0].phrase, "five times a day");
    }

    #[test]
    fn shape_catches_every_other_day() {
        let shapes = find_frequency_shapes("one tab every other day");
        assert!(!shapes.is_empty());
        assert!(shapes[0].phrase.contains("every other day"));
    }

    #[test]
    fn instructions_found_with_longest_span() {
        let matches = find_instructions("take on an empty stomach");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].phrase, "on an empty stomach");
    }

    #[test]
    fn instruction_bedtime() {
        let matches = find_instructions("one tablet at bedtime with water");
        let phrases: Vec<_> = matches.iter().map(|m| m.phrase).collect();
        assert_eq!(phrases, vec!["at bedtime", "with water"]);
    }

    #[test]
    fn parse_phrase_canonicalizes() {
        assert_eq!(
            parse_frequency_phrase("Twice Daily"),
            Some(CanonicalFrequency::TwiceDaily)
        );
        assert_eq!(
            parse_frequency_phrase("q6h"),
            Some(CanonicalFrequency::EveryHours(6))
        );
        assert_eq!(parse_frequency_phrase("whenever convenient"), None);
    }
}
