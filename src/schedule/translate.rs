//! Frequency → daily dose times.
//!
//! Maps a canonical frequency onto the fixed clock times its reminder
//! slots fire at. Defaults anchor the first dose at 08:00; caller
//! anchor times shift the whole set while preserving the spacing
//! between doses. Pure and deterministic: the same inputs always
//! produce the same slot list.

use chrono::{NaiveTime, Timelike};

use crate::models::CanonicalFrequency;

const SECS_PER_DAY: i64 = 86_400;

/// Clock time from literal hour/minute pairs.
fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

fn time_from_secs(secs: i64) -> NaiveTime {
    let secs = secs.rem_euclid(SECS_PER_DAY) as u32;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, 0).unwrap_or(NaiveTime::MIN)
}

fn secs(time: NaiveTime) -> i64 {
    i64::from(time.num_seconds_from_midnight())
}

/// Dose times for a frequency, in dose order (wrapped slots keep their
/// position: q6h yields 08:00, 14:00, 20:00, 02:00).
pub fn default_slots(frequency: CanonicalFrequency) -> Vec<NaiveTime> {
    match frequency {
        CanonicalFrequency::OnceDaily => vec![hm(8, 0)],
        CanonicalFrequency::TwiceDaily => vec![hm(8, 0), hm(20, 0)],
        CanonicalFrequency::ThreeTimesDaily => vec![hm(8, 0), hm(14, 0), hm(20, 0)],
        CanonicalFrequency::FourTimesDaily => {
            vec![hm(8, 0), hm(12, 0), hm(16, 0), hm(20, 0)]
        }
        CanonicalFrequency::EveryHours(n) => {
            let step = i64::from(n).max(1);
            let count = (24 / step).max(1);
            (0..count)
                .map(|i| time_from_secs(secs(hm(8, 0)) + i * step * 3_600))
                .collect()
        }
        CanonicalFrequency::AsNeeded => Vec::new(),
        CanonicalFrequency::DosePattern {
            morning,
            afternoon,
            night,
        } => {
            let mut slots = Vec::new();
            if morning {
                slots.push(hm(8, 0));
            }
            if afternoon {
                slots.push(hm(14, 0));
            }
            if night {
                slots.push(hm(20, 0));
            }
            slots
        }
    }
}

/// Translate a frequency into dose times, optionally aligned to the
/// owner's preferred anchor times.
///
/// Alignment shifts the whole slot set by one delta: the first slot
/// moves to its nearest anchor (shortest way around the 24h clock,
/// ties going forward) and every other slot moves with it, so the
/// inter-dose spacing never changes. Aligning an already aligned set
/// is a no-op.
pub fn translate(
    frequency: CanonicalFrequency,
    anchors: Option<&[NaiveTime]>,
) -> Vec<NaiveTime> {
    let slots = default_slots(frequency);
    match anchors {
        Some(anchors) if !anchors.is_empty() && !slots.is_empty() => {
            align_to_anchors(&slots, anchors)
        }
        _ => slots,
    }
}

fn align_to_anchors(slots: &[NaiveTime], anchors: &[NaiveTime]) -> Vec<NaiveTime> {
    let first = secs(slots[0]);
    let nearest = anchors
        .iter()
        .map(|a| secs(*a))
        .min_by_key(|a| circular_distance(first, *a))
        .unwrap_or(first);
    let delta = signed_delta(first, nearest);
    slots
        .iter()
        .map(|slot| time_from_secs(secs(*slot) + delta))
        .collect()
}

/// Distance between two clock times on the 24h circle.
fn circular_distance(a: i64, b: i64) -> i64 {
    let d = (a - b).rem_euclid(SECS_PER_DAY);
    d.min(SECS_PER_DAY - d)
}

/// Shortest signed shift taking `from` to `to`, in (-12h, +12h].
fn signed_delta(from: i64, to: i64) -> i64 {
    let forward = (to - from).rem_euclid(SECS_PER_DAY);
    if forward <= SECS_PER_DAY / 2 {
        forward
    } else {
        forward - SECS_PER_DAY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn once_daily_is_morning_dose() {
        assert_eq!(
            translate(CanonicalFrequency::OnceDaily, None),
            vec![t(8, 0)]
        );
    }

    #[test]
    fn twice_daily_is_morning_and_evening() {
        assert_eq!(
            translate(CanonicalFrequency::TwiceDaily, None),
            vec![t(8, 0), t(20, 0)]
        );
    }

    #[test]
    fn three_times_daily_spreads_across_the_day() {
        assert_eq!(
            translate(CanonicalFrequency::ThreeTimesDaily, None),
            vec![t(8, 0), t(14, 0), t(20, 0)]
        );
    }

    #[test]
    fn four_times_daily_is_four_hour_spacing() {
        assert_eq!(
            translate(CanonicalFrequency::FourTimesDaily, None),
            vec![t(8, 0), t(12, 0), t(16, 0), t(20, 0)]
        );
    }

    #[test]
    fn every_six_hours_wraps_past_midnight() {
        assert_eq!(
            translate(CanonicalFrequency::EveryHours(6), None),
            vec![t(8, 0), t(14, 0), t(20, 0), t(2, 0)]
        );
    }

    #[test]
    fn every_eight_hours_wraps_to_midnight() {
        assert_eq!(
            translate(CanonicalFrequency::EveryHours(8), None),
            vec![t(8, 0), t(16, 0), t(0, 0)]
        );
    }

    #[test]
    fn every_twelve_hours_matches_twice_daily() {
        assert_eq!(
            translate(CanonicalFrequency::EveryHours(12), None),
            translate(CanonicalFrequency::TwiceDaily, None)
        );
    }

    #[test]
    fn every_twenty_four_hours_matches_once_daily() {
        assert_eq!(
            translate(CanonicalFrequency::EveryHours(24), None),
            translate(CanonicalFrequency::OnceDaily, None)
        );
    }

    #[test]
    fn as_needed_creates_no_slots() {
        assert!(translate(CanonicalFrequency::AsNeeded, None).is_empty());
    }

    #[test]
    fn dose_pattern_selects_named_times() {
        let morning_and_night = CanonicalFrequency::DosePattern {
            morning: true,
            afternoon: false,
            night: true,
        };
        assert_eq!(
            translate(morning_and_night, None),
            vec![t(8, 0), t(20, 0)]
        );

        let afternoon_only = CanonicalFrequency::DosePattern {
            morning: false,
            afternoon: true,
            night: false,
        };
        assert_eq!(translate(afternoon_only, None), vec![t(14, 0)]);
    }

    #[test]
    fn anchor_shifts_whole_set() {
        let slots = translate(CanonicalFrequency::TwiceDaily, Some(&[t(7, 0)]));
        assert_eq!(slots, vec![t(7, 0), t(19, 0)]);
    }

    #[test]
    fn anchor_shift_preserves_wrapped_spacing() {
        let slots = translate(CanonicalFrequency::EveryHours(6), Some(&[t(6, 30)]));
        assert_eq!(slots, vec![t(6, 30), t(12, 30), t(18, 30), t(0, 30)]);
    }

    #[test]
    fn anchor_across_midnight_shifts_backward() {
        // 23:30 is 8.5h behind 08:00 going backward vs 15.5h forward.
        let slots = translate(CanonicalFrequency::TwiceDaily, Some(&[t(23, 30)]));
        assert_eq!(slots, vec![t(23, 30), t(11, 30)]);
    }

    #[test]
    fn nearest_anchor_wins() {
        let anchors = [t(12, 0), t(9, 0)];
        let slots = translate(CanonicalFrequency::TwiceDaily, Some(&anchors));
        assert_eq!(slots, vec![t(9, 0), t(21, 0)]);
    }

    #[test]
    fn empty_anchor_list_keeps_defaults() {
        assert_eq!(
            translate(CanonicalFrequency::ThreeTimesDaily, Some(&[])),
            translate(CanonicalFrequency::ThreeTimesDaily, None)
        );
    }

    #[test]
    fn alignment_is_idempotent() {
        let anchors = [t(7, 30)];
        let once = translate(CanonicalFrequency::ThreeTimesDaily, Some(&anchors));
        let again = align_to_anchors(&once, &anchors);
        assert_eq!(once, again);
    }

    #[test]
    fn translation_is_deterministic() {
        for freq in [
            CanonicalFrequency::OnceDaily,
            CanonicalFrequency::EveryHours(6),
            CanonicalFrequency::DosePattern {
                morning: true,
                afternoon: true,
                night: false,
            },
        ] {
            assert_eq!(translate(freq, None), translate(freq, None));
        }
    }

    #[test]
    fn slot_count_matches_doses_per_day() {
        for freq in [
            CanonicalFrequency::OnceDaily,
            CanonicalFrequency::TwiceDaily,
            CanonicalFrequency::ThreeTimesDaily,
            CanonicalFrequency::FourTimesDaily,
            CanonicalFrequency::EveryHours(4),
            CanonicalFrequency::EveryHours(6),
            CanonicalFrequency::EveryHours(8),
            CanonicalFrequency::AsNeeded,
        ] {
            assert_eq!(
                translate(freq, None).len() as u32,
                freq.doses_per_day(),
                "slot count for {freq:?}"
            );
        }
    }
}
