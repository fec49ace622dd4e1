//! Medication domain types.
//!
//! `MedicationRecord` is the persisted form of an extracted (or manually
//! entered) medication. Records are logically deleted (`is_active = false`),
//! never purged, so reminder slots and delivery events can keep pointing
//! at them for compliance history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ═══════════════════════════════════════════
// Dose units
// ═══════════════════════════════════════════

/// Units a prescription dosage can be expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoseUnit {
    Mg,
    Mcg,
    G,
    Ml,
    Iu,
    Tablet,
    Capsule,
    Drop,
    Puff,
    Unit,
}

impl DoseUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mg => "mg",
            Self::Mcg => "mcg",
            Self::G => "g",
            Self::Ml => "ml",
            Self::Iu => "iu",
            Self::Tablet => "tablet",
            Self::Capsule => "capsule",
            Self::Drop => "drop",
            Self::Puff => "puff",
            Self::Unit => "unit",
        }
    }

    /// Parse a unit token, tolerating plurals and common short forms.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "mg" => Some(Self::Mg),
            "mcg" | "ug" => Some(Self::Mcg),
            "g" | "gm" => Some(Self::G),
            "ml" => Some(Self::Ml),
            "iu" => Some(Self::Iu),
            "tablet" | "tablets" | "tab" | "tabs" => Some(Self::Tablet),
            "capsule" | "capsules" | "cap" | "caps" => Some(Self::Capsule),
            "drop" | "drops" => Some(Self::Drop),
            "puff" | "puffs" => Some(Self::Puff),
            "unit" | "units" => Some(Self::Unit),
            _ => None,
        }
    }

    /// Metric units attach directly to the number ("500mg"); count
    /// units read better with a space ("2 tablets").
    pub fn is_metric(&self) -> bool {
        matches!(self, Self::Mg | Self::Mcg | Self::G | Self::Ml | Self::Iu)
    }

    pub fn all() -> &'static [DoseUnit] {
        &[
            Self::Mg,
            Self::Mcg,
            Self::G,
            Self::Ml,
            Self::Iu,
            Self::Tablet,
            Self::Capsule,
            Self::Drop,
            Self::Puff,
            Self::Unit,
        ]
    }
}

impl std::fmt::Display for DoseUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A dosage: amount plus unit ("500 mg", "2 tablets").
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dosage {
    pub value: f64,
    pub unit: DoseUnit,
}

impl Dosage {
    pub fn new(value: f64, unit: DoseUnit) -> Self {
        Self { value, unit }
    }

    /// Two dosages are the same prescription strength when value and
    /// unit both agree.
    pub fn same_as(&self, other: &Dosage) -> bool {
        self.unit == other.unit && (self.value - other.value).abs() < 1e-9
    }
}

impl std::fmt::Display for Dosage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = if self.value.fract() == 0.0 {
            format!("{}", self.value as i64)
        } else {
            format!("{}", self.value)
        };
        if self.unit.is_metric() {
            write!(f, "{value}{}", self.unit)
        } else if (self.value - 1.0).abs() < 1e-9 {
            write!(f, "{value} {}", self.unit)
        } else {
            write!(f, "{value} {}s", self.unit)
        }
    }
}

// ═══════════════════════════════════════════
// Canonical frequency
// ═══════════════════════════════════════════

/// Normalized frequency category mapped from the many textual variants
/// ("bid", "b.i.d.", "twice a day", "1-0-1" all collapse to `TwiceDaily`
/// or an equivalent dose pattern).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalFrequency {
    OnceDaily,
    TwiceDaily,
    ThreeTimesDaily,
    FourTimesDaily,
    /// Evenly spaced doses every N hours (q6h, q8h, q12h, ...).
    EveryHours(u8),
    /// No schedule; taken on demand (prn / sos). Creates no slots.
    AsNeeded,
    /// Explicit morning/afternoon/night selection from timing codes
    /// like "1-0-1" (morning + night).
    DosePattern {
        morning: bool,
        afternoon: bool,
        night: bool,
    },
}

impl CanonicalFrequency {
    /// Stable storage token, round-trips through [`Self::from_token`].
    pub fn token(&self) -> String {
        match self {
            Self::OnceDaily => "once_daily".to_string(),
            Self::TwiceDaily => "twice_daily".to_string(),
            Self::ThreeTimesDaily => "three_times_daily".to_string(),
            Self::FourTimesDaily => "four_times_daily".to_string(),
            Self::EveryHours(n) => format!("every_{n}_hours"),
            Self::AsNeeded => "as_needed".to_string(),
            Self::DosePattern {
                morning,
                afternoon,
                night,
            } => format!(
                "pattern_{}_{}_{}",
                *morning as u8, *afternoon as u8, *night as u8
            ),
        }
    }

    pub fn from_token(s: &str) -> Option<Self> {
        match s {
            "once_daily" => return Some(Self::OnceDaily),
            "twice_daily" => return Some(Self::TwiceDaily),
            "three_times_daily" => return Some(Self::ThreeTimesDaily),
            "four_times_daily" => return Some(Self::FourTimesDaily),
            "as_needed" => return Some(Self::AsNeeded),
            _ => {}
        }
        if let Some(rest) = s.strip_prefix("every_") {
            let n: u8 = rest.strip_suffix("_hours")?.parse().ok()?;
            if (1..=24).contains(&n) {
                return Some(Self::EveryHours(n));
            }
            return None;
        }
        if let Some(rest) = s.strip_prefix("pattern_") {
            let mut flags = rest.split('_');
            let morning = flags.next()? == "1";
            let afternoon = flags.next()? == "1";
            let night = flags.next()? == "1";
            if flags.next().is_some() || !(morning || afternoon || night) {
                return None;
            }
            return Some(Self::DosePattern {
                morning,
                afternoon,
                night,
            });
        }
        None
    }

    /// Scheduled doses per day. Zero for as-needed.
    pub fn doses_per_day(&self) -> u32 {
        match self {
            Self::OnceDaily => 1,
            Self::TwiceDaily => 2,
            Self::ThreeTimesDaily => 3,
            Self::FourTimesDaily => 4,
            Self::EveryHours(n) => {
                let n = u32::from(*n).max(1);
                (24 / n).max(1)
            }
            Self::AsNeeded => 0,
            Self::DosePattern {
                morning,
                afternoon,
                night,
            } => u32::from(*morning) + u32::from(*afternoon) + u32::from(*night),
        }
    }
}

impl std::fmt::Display for CanonicalFrequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OnceDaily => write!(f, "once daily"),
            Self::TwiceDaily => write!(f, "twice daily"),
            Self::ThreeTimesDaily => write!(f, "three times daily"),
            Self::FourTimesDaily => write!(f, "four times daily"),
            Self::EveryHours(n) => write!(f, "every {n} hours"),
            Self::AsNeeded => write!(f, "as needed"),
            Self::DosePattern {
                morning,
                afternoon,
                night,
            } => {
                let mut parts = Vec::new();
                if *morning {
                    parts.push("morning");
                }
                if *afternoon {
                    parts.push("afternoon");
                }
                if *night {
                    parts.push("night");
                }
                write!(f, "{}", parts.join(" and "))
            }
        }
    }
}

// ═══════════════════════════════════════════
// Medication record
// ═══════════════════════════════════════════

/// A persisted medication, owned by a single user.
///
/// Created by the merge step of prescription processing or by manual
/// entry; mutated by edit operations; deactivated when the treatment
/// ends or the user deletes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedicationRecord {
    pub id: Uuid,
    pub owner_id: Uuid,
    /// Display name ("Metformin").
    pub name: String,
    /// Lowercased name used for duplicate detection.
    pub normalized_name: String,
    pub dosage: Option<Dosage>,
    /// The frequency text as it appeared on the prescription.
    pub frequency_phrase: Option<String>,
    /// Parsed canonical frequency; `None` when the phrase was not
    /// recognized (the record then carries `needs_review`).
    pub frequency: Option<CanonicalFrequency>,
    pub duration_start: Option<DateTime<Utc>>,
    pub duration_end: Option<DateTime<Utc>>,
    pub instructions: Option<String>,
    /// Set when extraction fell back to a default the user should
    /// confirm (unparsed frequency).
    pub needs_review: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MedicationRecord {
    pub fn dosage_label(&self) -> Option<String> {
        self.dosage.map(|d| d.to_string())
    }

    /// True once the prescribed course has run out.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.duration_end.is_some_and(|end| end < now)
    }

    /// Frequency driving the reminder schedule: the parsed value, or
    /// the once-daily fallback when only an unrecognized phrase exists.
    /// `None` means no schedule at all (nothing was ever stated).
    pub fn effective_frequency(&self) -> Option<CanonicalFrequency> {
        match (self.frequency, &self.frequency_phrase) {
            (Some(freq), _) => Some(freq),
            (None, Some(_)) => Some(CanonicalFrequency::OnceDaily),
            (None, None) => None,
        }
    }
}

/// Lowercase + collapse inner whitespace; the duplicate-detection key.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
