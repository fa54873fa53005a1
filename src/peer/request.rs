//! Peer protocol requests and responses.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha384};

use super::PeerError;

pub const RATE_ACCEPTED: &str = "RATE_ACCEPTED";
pub const RATE_TOO_LOW: &str = "RATE_TOO_LOW";

/// A single request, its kind decided by which field it carries.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerRequest {
    Availability(AvailabilityRequest),
    PaymentRate(PaymentRateRequest),
    Blob(BlobRequest),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityRequest {
    pub requested_blobs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRateRequest {
    pub blob_data_payment_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobRequest {
    pub requested_blob: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityResponse {
    pub lbrycrd_address: String,
    pub available_blobs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRateResponse {
    /// [RATE_ACCEPTED] or [RATE_TOO_LOW]
    pub blob_data_payment_rate: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobResponse {
    pub incoming_blob: IncomingBlob,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingBlob {
    pub blob_hash: String,
    pub length: usize,
}

#[derive(Debug, Clone, Copy)]
enum RequestKind {
    Availability,
    PaymentRate,
    Blob,
}

/// Discriminating fields, in priority order.
const REQUEST_KINDS: [(&str, RequestKind); 3] = [
    ("requested_blobs", RequestKind::Availability),
    ("blob_data_payment_rate", RequestKind::PaymentRate),
    ("requested_blob", RequestKind::Blob),
];

impl PeerRequest {
    /// Parse a single framed request.
    pub fn from_slice(bytes: &[u8]) -> Result<PeerRequest, PeerError> {
        let fields: Map<String, Value> = serde_json::from_slice(bytes)?;

        let kind = REQUEST_KINDS
            .iter()
            .find(|(field, _)| fields.contains_key(*field))
            .map(|(_, kind)| *kind)
            .ok_or(PeerError::UnknownRequest)?;

        let value = Value::Object(fields);

        Ok(match kind {
            RequestKind::Availability => PeerRequest::Availability(serde_json::from_value(value)?),
            RequestKind::PaymentRate => PeerRequest::PaymentRate(serde_json::from_value(value)?),
            RequestKind::Blob => PeerRequest::Blob(serde_json::from_value(value)?),
        })
    }
}

impl PaymentRateRequest {
    /// Every non negative rate is accepted.
    pub fn response(&self) -> PaymentRateResponse {
        let reply = if self.blob_data_payment_rate < 0.0 {
            RATE_TOO_LOW
        } else {
            RATE_ACCEPTED
        };

        PaymentRateResponse {
            blob_data_payment_rate: reply.to_string(),
        }
    }
}

/// Lowercase hex of the SHA-384 hash of a blob.
pub fn blob_hash(blob: &[u8]) -> String {
    hex::encode(Sha384::digest(blob))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_availability() {
        let request = PeerRequest::from_slice(br#"{"requested_blobs": ["a", "b"]}"#).unwrap();

        assert_eq!(
            request,
            PeerRequest::Availability(AvailabilityRequest {
                requested_blobs: vec!["a".to_string(), "b".to_string()]
            })
        );
    }

    #[test]
    fn parse_payment_rate() {
        let request = PeerRequest::from_slice(br#"{"blob_data_payment_rate": 0.5}"#).unwrap();

        assert_eq!(
            request,
            PeerRequest::PaymentRate(PaymentRateRequest {
                blob_data_payment_rate: 0.5
            })
        );
    }

    #[test]
    fn parse_blob() {
        let request = PeerRequest::from_slice(br#"{"requested_blob": "abc"}"#).unwrap();

        assert_eq!(
            request,
            PeerRequest::Blob(BlobRequest {
                requested_blob: "abc".to_string()
            })
        );
    }

    #[test]
    fn combined_request_priority() {
        let request = PeerRequest::from_slice(
            br#"{"requested_blob": "abc", "blob_data_payment_rate": 0.0, "requested_blobs": []}"#,
        )
        .unwrap();
        assert!(matches!(request, PeerRequest::Availability(_)));

        let request =
            PeerRequest::from_slice(br#"{"requested_blob": "abc", "blob_data_payment_rate": 0.0}"#)
                .unwrap();
        assert!(matches!(request, PeerRequest::PaymentRate(_)));
    }

    #[test]
    fn unknown_request() {
        assert!(matches!(
            PeerRequest::from_slice(br#"{"something": "else"}"#),
            Err(PeerError::UnknownRequest)
        ));
    }

    #[test]
    fn invalid_field_type() {
        assert!(matches!(
            PeerRequest::from_slice(br#"{"requested_blobs": "not a list"}"#),
            Err(PeerError::Json(_))
        ));
    }

    #[test]
    fn not_an_object() {
        assert!(matches!(
            PeerRequest::from_slice(b"[1, 2, 3]"),
            Err(PeerError::Json(_))
        ));
    }

    #[test]
    fn payment_rate_response() {
        let accepted = PaymentRateRequest {
            blob_data_payment_rate: 0.0,
        };
        let too_low = PaymentRateRequest {
            blob_data_payment_rate: -1.0,
        };

        assert_eq!(accepted.response().blob_data_payment_rate, RATE_ACCEPTED);
        assert_eq!(too_low.response().blob_data_payment_rate, RATE_TOO_LOW);
    }

    #[test]
    fn hash() {
        assert_eq!(
            blob_hash(b""),
            "38b060a751ac96384cd9327eb1b1e36a21fdb71114be07434c0cc7bf63f6e1da274edebfe76f65fbd51ad2f14898b95b"
        );
    }
}
