//! Disclosure-safe range labels
//!
//! Exact proportions never leave a site. Every ratio is reported as one of
//! five coarse bands instead.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;

/// One of the five fixed bands replacing an exact percentage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RangeLabel {
    #[serde(rename = "0%")]
    None,
    #[serde(rename = "1-25%")]
    UpToQuarter,
    #[serde(rename = "26-50%")]
    UpToHalf,
    #[serde(rename = "51-75%")]
    UpToThreeQuarters,
    #[serde(rename = "76-100%")]
    Most,
}

impl RangeLabel {
    pub const ALL: [RangeLabel; 5] = [
        RangeLabel::None,
        RangeLabel::UpToQuarter,
        RangeLabel::UpToHalf,
        RangeLabel::UpToThreeQuarters,
        RangeLabel::Most,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RangeLabel::None => "0%",
            RangeLabel::UpToQuarter => "1-25%",
            RangeLabel::UpToHalf => "26-50%",
            RangeLabel::UpToThreeQuarters => "51-75%",
            RangeLabel::Most => "76-100%",
        }
    }
}

impl fmt::Display for RangeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RangeLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RangeLabel::ALL
            .into_iter()
            .find(|label| label.as_str() == s.trim())
            .ok_or_else(|| format!("Unknown range label: {}", s))
    }
}

/// Map a percentage in `[0, 100]` to its band.
///
/// Upper bounds are inclusive, so 25, 50 and 75 land in the lower band.
/// Only an exact zero maps to `0%`. Inputs outside `[0, 100]` must be
/// clamped by the caller.
pub fn bucketize(percentage: f64) -> RangeLabel {
    if percentage == 0.0 {
        RangeLabel::None
    } else if percentage <= 25.0 {
        RangeLabel::UpToQuarter
    } else if percentage <= 50.0 {
        RangeLabel::UpToHalf
    } else if percentage <= 75.0 {
        RangeLabel::UpToThreeQuarters
    } else {
        RangeLabel::Most
    }
}

/// Bucketize `count / total` as a percentage
pub fn ratio_label(count: usize, total: NonZeroUsize) -> RangeLabel {
    bucketize(count as f64 / total.get() as f64 * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucketize_table() {
        let cases = [
            (0.0, "0%"),
            (0.0001, "1-25%"),
            (1.0, "1-25%"),
            (25.0, "1-25%"),
            (25.0001, "26-50%"),
            (50.0, "26-50%"),
            (50.5, "51-75%"),
            (75.0, "51-75%"),
            (75.01, "76-100%"),
            (99.9, "76-100%"),
            (100.0, "76-100%"),
        ];

        for (input, expected) in cases {
            assert_eq!(bucketize(input).as_str(), expected, "bucketize({})", input);
        }
    }

    #[test]
    fn test_bucketize_is_monotonic_over_range() {
        let mut previous = bucketize(0.0);
        for step in 1..=10_000 {
            let label = bucketize(step as f64 / 100.0);
            assert!(label >= previous, "band went backwards at {}", step);
            assert_ne!(label, RangeLabel::None);
            previous = label;
        }
        assert_eq!(previous, RangeLabel::Most);
    }

    #[test]
    fn test_ratio_label() {
        let total = NonZeroUsize::new(8).unwrap();
        assert_eq!(ratio_label(0, total), RangeLabel::None);
        assert_eq!(ratio_label(2, total), RangeLabel::UpToQuarter);
        assert_eq!(ratio_label(3, total), RangeLabel::UpToHalf);
        assert_eq!(ratio_label(6, total), RangeLabel::UpToThreeQuarters);
        assert_eq!(ratio_label(8, total), RangeLabel::Most);
    }

    #[test]
    fn test_label_serde_uses_display_form() {
        let json = serde_json::to_string(&RangeLabel::UpToHalf).unwrap();
        assert_eq!(json, "\"26-50%\"");

        let parsed: RangeLabel = serde_json::from_str("\"76-100%\"").unwrap();
        assert_eq!(parsed, RangeLabel::Most);
        assert_eq!("0%".parse::<RangeLabel>().unwrap(), RangeLabel::None);
        assert!("12%".parse::<RangeLabel>().is_err());
    }
}
