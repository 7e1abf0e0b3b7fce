use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// The closed set of platforms a user can connect and publish to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    TikTok,
    Instagram,
}

impl Platform {
    pub const ALL: [Platform; 2] = [Platform::TikTok, Platform::Instagram];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::TikTok => "tiktok",
            Platform::Instagram => "instagram",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Platform::TikTok => "TikTok",
            Platform::Instagram => "Instagram",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tiktok" => Ok(Platform::TikTok),
            "instagram" => Ok(Platform::Instagram),
            other => Err(AppError::UnsupportedPlatform(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_platforms_case_insensitively() {
        assert_eq!("TikTok".parse::<Platform>().unwrap(), Platform::TikTok);
        assert_eq!(" instagram ".parse::<Platform>().unwrap(), Platform::Instagram);
    }

    #[test]
    fn rejects_platforms_outside_the_closed_set() {
        let err = "youtube".parse::<Platform>().unwrap_err();
        assert!(matches!(err, AppError::UnsupportedPlatform(p) if p == "youtube"));
    }

    #[test]
    fn serde_uses_lowercase_names() {
        assert_eq!(serde_json::to_string(&Platform::TikTok).unwrap(), "\"tiktok\"");
        let parsed: Platform = serde_json::from_str("\"instagram\"").unwrap();
        assert_eq!(parsed, Platform::Instagram);
    }
}
