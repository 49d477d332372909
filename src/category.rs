// Campsite categories offered by the reservation site
// Each category is queried separately upstream via its `place_cd` code

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampCategory {
    Premium,
    Standard,
    Gravel,
    Deck,
}

impl CampCategory {
    // Fixed query order; aggregates are keyed in this order too
    pub const ALL: [CampCategory; 4] = [
        CampCategory::Premium,
        CampCategory::Standard,
        CampCategory::Gravel,
        CampCategory::Deck,
    ];

    // Upstream `place_cd` value
    pub fn code(&self) -> &'static str {
        match self {
            CampCategory::Premium => "1",
            CampCategory::Standard => "2",
            CampCategory::Gravel => "4",
            CampCategory::Deck => "5",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CampCategory::Premium => "premium",
            CampCategory::Standard => "standard",
            CampCategory::Gravel => "gravel",
            CampCategory::Deck => "deck",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|category| category.code() == code)
    }
}

impl fmt::Display for CampCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("1", Some(CampCategory::Premium); "premium")]
    #[test_case("2", Some(CampCategory::Standard); "standard")]
    #[test_case("4", Some(CampCategory::Gravel); "gravel")]
    #[test_case("5", Some(CampCategory::Deck); "deck")]
    #[test_case("3", None; "unused code")]
    #[test_case("", None; "empty")]
    fn test_from_code(code: &str, expected: Option<CampCategory>) {
        assert_eq!(CampCategory::from_code(code), expected);
    }

    #[test]
    fn test_codes_are_unique() {
        let mut codes: Vec<&str> = CampCategory::ALL.iter().map(|c| c.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), CampCategory::ALL.len());
    }

    #[test]
    fn test_serializes_as_label() {
        let json = serde_json::to_string(&CampCategory::Gravel).unwrap();
        assert_eq!(json, "\"gravel\"");
        assert_eq!(CampCategory::Deck.to_string(), "deck");
    }
}
