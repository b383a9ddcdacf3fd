//! Availability: whether a device can currently be controlled.

use serde::{Deserialize, Serialize};

/// Availability of a device, with an optional user-facing reason when it
/// is unavailable.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum Availability {
    #[default]
    Available,
    Unavailable {
        message: Option<String>,
    },
}

impl Availability {
    #[must_use]
    pub fn unavailable(message: Option<String>) -> Self {
        Self::Unavailable { message }
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available)
    }

    /// The reason shown to the user, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Available => None,
            Self::Unavailable { message } => message.as_deref(),
        }
    }
}

impl std::fmt::Display for Availability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Available => f.write_str("available"),
            Self::Unavailable { message: None } => f.write_str("unavailable"),
            Self::Unavailable {
                message: Some(message),
            } => write!(f, "unavailable ({message})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_default_to_available() {
        assert!(Availability::default().is_available());
    }

    #[test]
    fn should_report_unavailable_with_message() {
        let availability = Availability::unavailable(Some("out of range".to_string()));
        assert!(!availability.is_available());
        assert_eq!(availability.message(), Some("out of range"));
    }

    #[test]
    fn should_have_no_message_when_available() {
        assert_eq!(Availability::Available.message(), None);
    }

    #[test]
    fn should_display_reason_when_present() {
        assert_eq!(Availability::Available.to_string(), "available");
        assert_eq!(
            Availability::unavailable(None).to_string(),
            "unavailable"
        );
        assert_eq!(
            Availability::unavailable(Some("offline".to_string())).to_string(),
            "unavailable (offline)"
        );
    }

    #[test]
    fn should_roundtrip_through_serde_json() {
        let availability = Availability::unavailable(Some("offline".to_string()));
        let json = serde_json::to_string(&availability).unwrap();
        assert_eq!(json, r#"{"state":"unavailable","message":"offline"}"#);
        let parsed: Availability = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, availability);
    }
}
