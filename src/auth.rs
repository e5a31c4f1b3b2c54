//! Token-request signing for the `/auth` endpoint.
//!
//! The vendor authenticates token issuance with a shared-secret signature:
//! `sign = SHA256(app_key + timestamp + master_secret)`, hex-encoded, where
//! `timestamp` is milliseconds since the Unix epoch at the moment of the
//! call. No other request carries a signature; everything else uses the
//! issued token.

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::types::UniPushConfig;

/// Milliseconds since the Unix epoch, as the vendor expects in `timestamp`.
pub fn timestamp_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

/// Lowercase hex `SHA256(app_key + timestamp + master_secret)`.
pub fn sign(app_key: &str, timestamp: &str, master_secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(app_key.as_bytes());
    hasher.update(timestamp.as_bytes());
    hasher.update(master_secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Build the `/auth` request body for the current instant.
pub fn auth_body(config: &UniPushConfig) -> Value {
    let timestamp = timestamp_millis().to_string();
    let sign = sign(&config.app_key, &timestamp, &config.master_secret);
    json!({
        "timestamp": timestamp,
        "sign": sign,
        "appkey": config.app_key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_known_vector() {
        // SHA256("ak" + "1645671600000" + "ms")
        assert_eq!(
            sign("ak", "1645671600000", "ms"),
            "709cab8d36d895c5f99ecf3708a748a2d280fbeeb81e8fe883efd4942152e152"
        );
    }

    #[test]
    fn test_sign_concatenation_order() {
        // SHA256("appkey-123" + "1600000000000" + "master-secret-456")
        assert_eq!(
            sign("appkey-123", "1600000000000", "master-secret-456"),
            "7d438f839a12e872e05dbc9e59a4ecc3f680781d0d84b635bd0093e72296e67b"
        );
        // Swapping key and secret must not produce the same digest
        assert_ne!(
            sign("appkey-123", "1600000000000", "master-secret-456"),
            sign("master-secret-456", "1600000000000", "appkey-123")
        );
    }

    #[test]
    fn test_auth_body_shape() {
        let config = UniPushConfig {
            app_id: "app".to_string(),
            app_key: "appkey-123".to_string(),
            app_secret: String::new(),
            master_secret: "master-secret-456".to_string(),
            base_url: None,
        };
        let body = auth_body(&config);

        assert_eq!(body["appkey"], "appkey-123");
        let timestamp = body["timestamp"].as_str().unwrap();
        assert!(timestamp.chars().all(|c| c.is_ascii_digit()));
        // The sign must match the timestamp embedded in this exact body
        assert_eq!(
            body["sign"].as_str().unwrap(),
            sign("appkey-123", timestamp, "master-secret-456")
        );
        assert_eq!(body["sign"].as_str().unwrap().len(), 64);
    }
}
