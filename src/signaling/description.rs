//! Session description codec
//!
//! Offer/answer payloads and the JSON shapes exchanged with the HTTP layer.
//! The SDP body itself is opaque here; its grammar belongs to the
//! connectivity engine. Only the minimal envelope checks are done.

use serde::{Deserialize, Serialize};

/// Offer or answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

impl std::fmt::Display for SdpType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SdpType::Offer => f.write_str("offer"),
            SdpType::Answer => f.write_str("answer"),
        }
    }
}

/// A session description (type + opaque body)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    /// Build an offer, validating the envelope
    pub fn offer(sdp: impl Into<String>) -> Result<Self, DescriptionError> {
        let desc = Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        };
        desc.validate()?;
        Ok(desc)
    }

    /// Build an answer, validating the envelope
    pub fn answer(sdp: impl Into<String>) -> Result<Self, DescriptionError> {
        let desc = Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        };
        desc.validate()?;
        Ok(desc)
    }

    /// Check the body is non-empty and starts with a version line
    pub fn validate(&self) -> Result<(), DescriptionError> {
        let body = self.sdp.trim_start();
        if body.is_empty() {
            return Err(DescriptionError::Empty);
        }
        if !body.starts_with("v=") {
            return Err(DescriptionError::MissingVersion);
        }
        Ok(())
    }

    pub fn is_offer(&self) -> bool {
        self.sdp_type == SdpType::Offer
    }
}

/// Rejected session description
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptionError {
    /// Body is empty or whitespace
    Empty,
    /// Body does not start with a `v=` line
    MissingVersion,
    /// Expected an offer but got something else
    UnexpectedType(SdpType),
}

impl std::fmt::Display for DescriptionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DescriptionError::Empty => write!(f, "session description is empty"),
            DescriptionError::MissingVersion => {
                write!(f, "session description does not start with a version line")
            }
            DescriptionError::UnexpectedType(t) => {
                write!(f, "expected an offer, got an {}", t)
            }
        }
    }
}

impl std::error::Error for DescriptionError {}

/// Inbound signaling request: `{ "sdp": { "sdp": "..." } }`
///
/// Browsers post their `RTCSessionDescription` as-is, so a `type` field may
/// be present inside; it is ignored and the body is always read as an offer.
#[derive(Debug, Clone, Deserialize)]
pub struct SignalingRequest {
    pub sdp: OfferBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OfferBody {
    pub sdp: String,
}

impl SignalingRequest {
    /// Interpret the request as an offer
    pub fn into_offer(self) -> Result<SessionDescription, DescriptionError> {
        SessionDescription::offer(self.sdp.sdp)
    }
}

/// Outbound signaling response: `{ "type": "answer", "sdp": "..." }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignalingResponse {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl From<SessionDescription> for SignalingResponse {
    fn from(desc: SessionDescription) -> Self {
        Self {
            sdp_type: desc.sdp_type,
            sdp: desc.sdp,
        }
    }
}

/// Error response: `{ "error": "..." }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFER: &str = "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";

    #[test]
    fn test_parse_request() {
        let json = r#"{"sdp":{"type":"offer","sdp":"v=0\r\ns=-\r\n"}}"#;
        let req: SignalingRequest = serde_json::from_str(json).unwrap();

        let offer = req.into_offer().unwrap();
        assert!(offer.is_offer());
        assert_eq!(offer.sdp, "v=0\r\ns=-\r\n");
    }

    #[test]
    fn test_request_without_nested_sdp_is_rejected() {
        let json = r#"{"sdp":"v=0"}"#;
        assert!(serde_json::from_str::<SignalingRequest>(json).is_err());
    }

    #[test]
    fn test_validate() {
        assert!(SessionDescription::offer(OFFER).is_ok());
        assert_eq!(
            SessionDescription::offer("  \r\n").unwrap_err(),
            DescriptionError::Empty
        );
        assert_eq!(
            SessionDescription::offer("o=- 1 2 IN IP4 0.0.0.0").unwrap_err(),
            DescriptionError::MissingVersion
        );
    }

    #[test]
    fn test_response_shape() {
        let answer = SessionDescription::answer(OFFER).unwrap();
        let json = serde_json::to_value(SignalingResponse::from(answer)).unwrap();

        assert_eq!(json["type"], "answer");
        assert_eq!(json["sdp"], OFFER);
    }

    #[test]
    fn test_error_shape() {
        let body = ErrorResponse {
            error: "no broadcast".into(),
        };
        assert_eq!(
            serde_json::to_string(&body).unwrap(),
            r#"{"error":"no broadcast"}"#
        );
    }
}
