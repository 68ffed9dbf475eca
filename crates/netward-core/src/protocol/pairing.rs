//! Bodies returned by the pairing endpoints.

use serde::{Deserialize, Serialize};

/// `POST pairing/challenge`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeResponse {
    /// Hex-encoded single-use challenge.
    pub challenge: String,
    pub sensor_id: String,
}

/// `POST pairing/verify`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub verified: bool,
    /// The sensor's own tag over the challenge, for mutual verification.
    #[serde(default)]
    pub sensor_tag: Option<String>,
}

/// `POST pairing/csr`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateResponse {
    /// Issued client certificate (PEM).
    pub certificate: String,
    #[serde(default)]
    pub ca_certificate: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_verify_response_without_sensor_tag() {
        let response: VerifyResponse = serde_json::from_value(json!({ "verified": true })).unwrap();
        assert!(response.verified);
        assert!(response.sensor_tag.is_none());
    }

    #[test]
    fn test_challenge_response_reads_sensor_id() {
        let response: ChallengeResponse =
            serde_json::from_value(json!({ "challenge": "00ff", "sensorId": "s-9" })).unwrap();
        assert_eq!(response.sensor_id, "s-9");
    }
}
