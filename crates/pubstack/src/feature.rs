// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A category of analytics events that can be enabled or disabled remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Feature {
    #[serde(rename = "auction")]
    Auction,
    #[serde(rename = "video")]
    Video,
    #[serde(rename = "amp")]
    Amp,
    #[serde(rename = "cookie_sync")]
    CookieSync,
    #[serde(rename = "setuid")]
    SetUid,
}

impl Feature {
    pub const ALL: [Feature; 5] = [
        Feature::Auction,
        Feature::Video,
        Feature::Amp,
        Feature::CookieSync,
        Feature::SetUid,
    ];

    /// Name used in configuration documents and as the intake route segment.
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Auction => "auction",
            Feature::Video => "video",
            Feature::Amp => "amp",
            Feature::CookieSync => "cookie_sync",
            Feature::SetUid => "setuid",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown feature '{0}'")]
pub struct UnknownFeature(pub String);

impl FromStr for Feature {
    type Err = UnknownFeature;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Feature::ALL
            .into_iter()
            .find(|feature| feature.as_str() == s)
            .ok_or_else(|| UnknownFeature(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_matches_parse() {
        for feature in Feature::ALL {
            assert_eq!(feature.as_str().parse::<Feature>(), Ok(feature));
            assert_eq!(feature.to_string(), feature.as_str());
        }
    }

    #[test]
    fn test_unknown_feature() {
        assert_eq!(
            "banner".parse::<Feature>(),
            Err(UnknownFeature("banner".to_string()))
        );
        assert!("Auction".parse::<Feature>().is_err());
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&Feature::CookieSync).expect("serialize failed");
        assert_eq!(json, "\"cookie_sync\"");
        let parsed: Feature = serde_json::from_str("\"setuid\"").expect("deserialize failed");
        assert_eq!(parsed, Feature::SetUid);
    }
}
