use std::{fmt, str::FromStr};

use serde::Serialize;

use crate::errors::LesionSegError;

/// Dermoscopic feature a model is trained to segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LesionType {
    Globules,
    Streaks,
    Pigment,
    Negative,
    Milia,
}

impl LesionType {
    pub const ALL: [Self; 5] = [
        Self::Globules,
        Self::Streaks,
        Self::Pigment,
        Self::Negative,
        Self::Milia,
    ];

    /// Canonical key used in routes, public ids and responses.
    pub const fn key(self) -> &'static str {
        match self {
            Self::Globules => "globules",
            Self::Streaks => "streaks",
            Self::Pigment => "pigment",
            Self::Negative => "negative",
            Self::Milia => "milia",
        }
    }

    /// File name of the exported model inside the model directory.
    pub const fn artifact_name(self) -> &'static str {
        match self {
            Self::Globules => "globules_model.onnx",
            Self::Streaks => "streaks_model.onnx",
            Self::Pigment => "pigmentN_model.onnx",
            Self::Negative => "negative_model.onnx",
            Self::Milia => "milia_like_model.onnx",
        }
    }
}

impl FromStr for LesionType {
    type Err = LesionSegError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "globules" => Ok(Self::Globules),
            "streaks" => Ok(Self::Streaks),
            "pigment" | "pigmentNetwork" => Ok(Self::Pigment),
            "negative" | "negativeNetwork" => Ok(Self::Negative),
            "milia" | "miliaLikeCysts" => Ok(Self::Milia),
            _ => Err(LesionSegError::InvalidLesionType { key: s.to_string() }),
        }
    }
}

impl fmt::Display for LesionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_canonical_keys() {
        for lesion in LesionType::ALL {
            assert_eq!(lesion.key().parse::<LesionType>().unwrap(), lesion);
        }
    }

    #[test]
    fn test_parse_legacy_aliases() {
        let cases = [
            ("pigmentNetwork", LesionType::Pigment),
            ("negativeNetwork", LesionType::Negative),
            ("miliaLikeCysts", LesionType::Milia),
        ];
        for (alias, expected) in cases {
            assert_eq!(alias.parse::<LesionType>().unwrap(), expected);
        }
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let err = "unknown".parse::<LesionType>().unwrap_err();
        assert!(matches!(err, LesionSegError::InvalidLesionType { ref key } if key == "unknown"));
        assert!("Globules".parse::<LesionType>().is_err());
        assert!("".parse::<LesionType>().is_err());
    }

    #[test]
    fn test_every_type_has_a_distinct_artifact() {
        let mut names: Vec<_> = LesionType::ALL.iter().map(|l| l.artifact_name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), LesionType::ALL.len());
    }

    #[test]
    fn test_serializes_as_canonical_key() {
        for lesion in LesionType::ALL {
            let json = serde_json::to_string(&lesion).unwrap();
            assert_eq!(json, format!("\"{}\"", lesion.key()));
        }
    }
}
