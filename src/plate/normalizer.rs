use crate::config::PlateFormatConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::{Display, Formatter};

/// Plate text after OCR correction and length validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedPlate(String);

impl NormalizedPlate {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap a value read back from storage, which was normalized on the way in.
    pub(crate) fn from_stored(value: String) -> Self {
        Self(value)
    }
}

impl Display for NormalizedPlate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NormalizedPlate {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Why a raw plate was refused
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RejectReason {
    Empty,
    Length { len: usize, min: usize, max: usize },
}

impl Display for RejectReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::Empty => write!(f, "empty plate"),
            RejectReason::Length { len, min, max } => {
                write!(f, "length {} outside [{}, {}]", len, min, max)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalization {
    Normalized(NormalizedPlate),
    Rejected(RejectReason),
}

/// Digit read where the plate format only allows a letter.
fn letter_lookalike(c: char) -> Option<char> {
    match c {
        '0' => Some('O'),
        '1' => Some('I'),
        '4' => Some('A'),
        '5' => Some('S'),
        '7' => Some('T'),
        '8' => Some('B'),
        _ => None,
    }
}

/// Corrects common OCR confusions in recognized plate text.
#[derive(Debug, Clone)]
pub struct PlateNormalizer {
    letter_positions: HashSet<usize>,
    numeric_positions: HashSet<usize>,
    min_len: usize,
    max_len: usize,
}

impl PlateNormalizer {
    pub fn new(format: &PlateFormatConfig) -> Self {
        Self {
            letter_positions: format.letter_positions.iter().copied().collect(),
            numeric_positions: format.numeric_positions.iter().copied().collect(),
            min_len: format.min_len,
            max_len: format.max_len,
        }
    }

    pub fn normalize(&self, raw: &str) -> Normalization {
        let chars: Vec<char> = raw
            .chars()
            .filter(|c| !c.is_whitespace())
            .flat_map(char::to_uppercase)
            .collect();

        if chars.is_empty() {
            return Normalization::Rejected(RejectReason::Empty);
        }

        let corrected: String = chars
            .into_iter()
            .enumerate()
            .map(|(i, c)| {
                if self.letter_positions.contains(&i) {
                    letter_lookalike(c).unwrap_or(c)
                } else if c == '0' && !self.numeric_positions.contains(&i) {
                    'O'
                } else {
                    c
                }
            })
            .collect();

        let len = corrected.chars().count();
        if len < self.min_len || len > self.max_len {
            return Normalization::Rejected(RejectReason::Length {
                len,
                min: self.min_len,
                max: self.max_len,
            });
        }

        Normalization::Normalized(NormalizedPlate(corrected))
    }
}

impl Default for PlateNormalizer {
    fn default() -> Self {
        Self::new(&PlateFormatConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalized(raw: &str) -> String {
        match PlateNormalizer::default().normalize(raw) {
            Normalization::Normalized(plate) => plate.as_str().to_string(),
            Normalization::Rejected(reason) => panic!("{} rejected: {}", raw, reason),
        }
    }

    #[test]
    fn clean_plate_is_unchanged() {
        assert_eq!(normalized("AB05CDE"), "AB05CDE");
        assert_eq!(normalized("LM21XYZ"), "LM21XYZ");
    }

    #[test]
    fn digits_in_letter_slots_become_letters() {
        assert_eq!(normalized("8512C7E"), "BS12CTE");
        assert_eq!(normalized("A1234DE"), "AI23ADE");
        assert_eq!(normalized("0B12C0E"), "OB12COE");
    }

    #[test]
    fn zero_is_kept_inside_numeric_block_only() {
        // position 7 is neither a letter slot nor in the numeric block
        assert_eq!(normalized("AB00CDE0"), "AB00CDEO");
        // unmapped digits in letter slots are left alone
        assert_eq!(normalized("AB12C9E"), "AB12C9E");
    }

    #[test]
    fn whitespace_and_case_are_ignored() {
        assert_eq!(normalized("ab05 cde"), "AB05CDE");
        assert_eq!(normalized(" AB05\tCDE "), "AB05CDE");
    }

    #[test]
    fn length_outside_bounds_is_rejected() {
        let normalizer = PlateNormalizer::default();
        assert_eq!(
            normalizer.normalize("AB05CD"),
            Normalization::Rejected(RejectReason::Length {
                len: 6,
                min: 7,
                max: 8
            })
        );
        assert!(matches!(
            normalizer.normalize("AB05CDEFG"),
            Normalization::Rejected(RejectReason::Length { len: 9, .. })
        ));
        assert_eq!(
            normalizer.normalize("   "),
            Normalization::Rejected(RejectReason::Empty)
        );
        assert_eq!(
            normalizer.normalize(""),
            Normalization::Rejected(RejectReason::Empty)
        );
    }

    #[test]
    fn normalization_is_idempotent() {
        let normalizer = PlateNormalizer::default();
        for raw in [
            "AB05CDE", "8512C7E", "0000000", "11111111", "ab 12 cde", "A0B0C0D0", "4B57X0Z",
        ] {
            let once = match normalizer.normalize(raw) {
                Normalization::Normalized(plate) => plate,
                Normalization::Rejected(_) => continue,
            };
            assert_eq!(
                normalizer.normalize(once.as_str()),
                Normalization::Normalized(once.clone()),
                "{} not idempotent",
                raw
            );
        }
    }

    #[test]
    fn output_length_always_within_bounds() {
        let normalizer = PlateNormalizer::default();
        for len in 0..12 {
            let raw: String = "A1B2C3D4E5F6".chars().take(len).collect();
            match normalizer.normalize(&raw) {
                Normalization::Normalized(plate) => {
                    let n = plate.as_str().chars().count();
                    assert!((7..=8).contains(&n));
                }
                Normalization::Rejected(_) => assert!(!(7..=8).contains(&len)),
            }
        }
    }

    #[test]
    fn positions_are_configurable() {
        let normalizer = PlateNormalizer::new(&PlateFormatConfig {
            letter_positions: vec![0, 1, 2],
            numeric_positions: vec![3, 4, 5, 6],
            min_len: 7,
            max_len: 7,
        });
        assert_eq!(
            normalizer.normalize("150 0001"),
            Normalization::Normalized(NormalizedPlate("ISO0001".to_string()))
        );
    }
}
