use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of a live signaling connection, unique for the process lifetime
pub type ConnectionId = Uuid;

/// Human-typeable session code.
///
/// Codes are case-insensitive on input and always stored uppercase, so two
/// `SessionId`s compare equal whenever their codes match ignoring case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    pub fn new(code: impl AsRef<str>) -> Self {
        Self(code.as_ref().trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(code: String) -> Self {
        Self::new(code)
    }
}

impl From<&str> for SessionId {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Target quality tier, ordered `Low < Medium < High < Ultra`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Low,
    Medium,
    High,
    Ultra,
}

impl QualityTier {
    /// Encoder preset associated with the tier
    pub fn settings(self) -> QualitySettings {
        match self {
            QualityTier::Ultra => QualitySettings {
                bitrate: 50_000_000,
                resolution: Resolution::Uhd4k,
                compression: 0.1,
            },
            QualityTier::High => QualitySettings {
                bitrate: 25_000_000,
                resolution: Resolution::Qhd1440p,
                compression: 0.3,
            },
            QualityTier::Medium => QualitySettings {
                bitrate: 10_000_000,
                resolution: Resolution::Fhd1080p,
                compression: 0.5,
            },
            QualityTier::Low => QualitySettings {
                bitrate: 3_000_000,
                resolution: Resolution::Hd720p,
                compression: 0.7,
            },
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QualityTier::Low => "low",
            QualityTier::Medium => "medium",
            QualityTier::High => "high",
            QualityTier::Ultra => "ultra",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "4K")]
    Uhd4k,
    #[serde(rename = "1440p")]
    Qhd1440p,
    #[serde(rename = "1080p")]
    Fhd1080p,
    #[serde(rename = "720p")]
    Hd720p,
}

/// Encoder settings the media pipeline applies for a tier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualitySettings {
    /// Bits per second
    pub bitrate: u64,
    pub resolution: Resolution,
    /// 0.0 (none) to 1.0 (maximum)
    pub compression: f64,
}

/// Short-term direction of network conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Stable,
    Degrading,
}

/// Why the controller picked its current decision, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdaptationReason {
    HighLatency,
    HighJitter,
    PacketLoss,
    UnstableNetwork,
    Optimization,
}

/// Coarse link classification reported with `network_stats`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionQuality {
    Excellent,
    Good,
    Fair,
    Poor,
}

/// Machine-readable error code carried by `error` frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    SessionNotFound,
    InvalidPassword,
    MalformedMessage,
    UnauthorizedRelay,
    SessionIdExhausted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_is_case_insensitive() {
        assert_eq!(SessionId::new("qx7k2b9a"), SessionId::new("QX7K2B9A"));
        assert_eq!(SessionId::new(" qx7k2b9a ").as_str(), "QX7K2B9A");
    }

    #[test]
    fn test_session_id_deserializes_uppercase() {
        let id: SessionId = serde_json::from_str("\"ab12cd34\"").unwrap();
        assert_eq!(id.as_str(), "AB12CD34");
    }

    #[test]
    fn test_quality_tier_ordering() {
        assert!(QualityTier::Ultra > QualityTier::High);
        assert!(QualityTier::High > QualityTier::Medium);
        assert!(QualityTier::Medium > QualityTier::Low);
    }

    #[test]
    fn test_tier_settings_serialize() {
        let json = serde_json::to_value(QualityTier::High.settings()).unwrap();
        assert_eq!(json["bitrate"], 25_000_000);
        assert_eq!(json["resolution"], "1440p");
    }
}
