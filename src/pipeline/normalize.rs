//! OCR text normalization, the first pipeline stage.
//!
//! Total and pure: never fails, worst case returns an empty string.
//! Output is lowercase with single-space word separation, which the
//! extractor's byte-offset proximity windows rely on.

use std::sync::OnceLock;

use regex::Regex;

/// Punctuation that survives normalization. Everything else outside
/// alphanumerics and whitespace is an OCR artifact.
const KEPT_PUNCTUATION: &[char] = &[
    '.', ',', ':', ';', '(', ')', '[', ']', '{', '}', '/', '\\', '-', '+', '=', '%',
];

fn unit_trail_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // "100mg," / "5 ml.": punctuation glued to a dosage unit.
        Regex::new(r"(\d(?:\.\d+)?\s?(?:mg|mcg|g|ml|iu))[.,;:]+").expect("valid regex")
    })
}

/// Normalize raw OCR output for extraction.
///
/// Steps: strip artifact characters, collapse whitespace, lowercase,
/// then apply the fixed OCR substitution table (digit/letter confusions
/// and stray punctuation after dosage units).
pub fn normalize(raw: &str) -> String {
    let filtered: String = raw
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() || KEPT_PUNCTUATION.contains(&c) {
                c
            } else {
                ' '
            }
        })
        .collect();

    let collapsed = filtered
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    let fixed = fix_digit_confusions(&collapsed);
    let fixed = fix_standalone_tokens(&fixed);
    unit_trail_re().replace_all(&fixed, "$1").into_owned()
}

/// Digits misread inside words: `metf0rmin` → `metformin`,
/// `amoxici11in` → `amoxicillin`. Only applies when both neighbors are
/// alphabetic, so `q12h` and `500mg` pass through untouched.
fn fix_digit_confusions(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    // Tracks the character actually emitted, so runs like "11" inside a
    // word resolve left to right ("ci11in" → "cillin").
    let mut prev: Option<char> = None;

    for (i, &c) in chars.iter().enumerate() {
        let emitted = match c {
            '0' | '1' => {
                let prev_alpha = prev.is_some_and(|p| p.is_alphabetic());
                let next_alpha = chars
                    .get(i + 1)
                    .is_some_and(|n| n.is_alphabetic() || matches!(n, '0' | '1'));
                if prev_alpha && next_alpha {
                    if c == '0' {
                        'o'
                    } else {
                        'l'
                    }
                } else {
                    c
                }
            }
            _ => c,
        };
        out.push(emitted);
        prev = Some(emitted);
    }
    out
}

/// Single-character tokens that OCR produces for letters: a lone `0` is
/// an `o`, a lone `l` is an `i`.
fn fix_standalone_tokens(text: &str) -> String {
    text.split(' ')
        .map(|token| match token {
            "0" => "o",
            "l" => "i",
            other => other,
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_returns_empty() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   \n\t "), "");
    }

    #[test]
    fn lowercases_and_collapses_whitespace() {
        assert_eq!(
            normalize("Aspirin  100mg\n\nOnce   Daily"),
            "aspirin 100mg once daily"
        );
    }

    #[test]
    fn strips_ocr_artifacts() {
        let raw = "Metformin\x00 500mg ~!@#$ twice daily";
        let clean = normalize(raw);
        assert!(!clean.contains('\x00'));
        assert!(!clean.contains('~'));
        assert!(!clean.contains('@'));
        assert!(clean.contains("metformin 500mg"));
    }

    #[test]
    fn preserves_dosage_and_schedule_punctuation() {
        assert_eq!(normalize("Dose: 2.5ml (oral) 1-0-1"), "dose: 2.5ml (oral) 1-0-1");
    }

    #[test]
    fn fixes_zero_inside_word() {
        assert_eq!(normalize("Metf0rmin"), "metformin");
    }

    #[test]
    fn fixes_one_inside_word() {
        assert_eq!(normalize("tab1et"), "tablet");
        assert_eq!(normalize("amoxici11in"), "amoxicillin");
    }

    #[test]
    fn leaves_numbers_in_numeric_context() {
        // 0 and 1 next to digits are real digits.
        assert_eq!(normalize("100mg"), "100mg");
        assert_eq!(normalize("q12h"), "q12h");
        assert_eq!(normalize("1-0-1"), "1-0-1");
    }

    #[test]
    fn fixes_standalone_confusion_tokens() {
        assert_eq!(normalize("take 0 tablet l daily"), "take o tablet i daily");
    }

    #[test]
    fn strips_punctuation_after_units() {
        assert_eq!(normalize("Aspirin 100mg, once daily"), "aspirin 100mg once daily");
        assert_eq!(normalize("take 5 ml. at night"), "take 5 ml at night");
    }

    #[test]
    fn total_on_arbitrary_bytes() {
        // Must never panic, whatever the OCR engine produced.
        let noisy = "§§¶•ª º\u{7f}∆˚¬…æ«Aspirin»";
        let clean = normalize(noisy);
        assert!(clean.contains("aspirin"));
    }
}
