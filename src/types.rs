use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default endpoint for the UniPush v2 REST API. The per-app base URL is
/// `{REST_API}/{app_id}`.
pub const REST_API: &str = "https://restapi.getui.com/v2";

/// Credentials and connection settings for one UniPush application.
#[derive(Debug, Clone, Default)]
pub struct UniPushConfig {
    pub app_id: String,
    pub app_key: String,
    pub app_secret: String,
    /// Signs `/auth` requests together with `app_key`.
    pub master_secret: String,
    /// Override the vendor endpoint (tests, private deployments).
    pub base_url: Option<String>,
}

/// The vendor's standard response envelope: `{code, msg, data}`.
///
/// Returned to callers verbatim. The only code this crate acts on is
/// [`codes::TOKEN_INVALID`]; everything else is the caller's to interpret
/// against the vendor documentation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    pub code: i32,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        self.code == codes::SUCCESS
    }
}

/// Payload of a successful `/auth` call.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthData {
    pub token: String,
    /// Vendor-reported expiry (epoch millis as a string). Token lifetime is
    /// handled by the cache TTL instead, so this is informational only.
    #[serde(default)]
    pub expire_time: Option<String>,
}

/// Vendor result codes
pub mod codes {
    pub const SUCCESS: i32 = 0;
    /// Token missing, invalid or expired. Triggers one re-auth and retry.
    pub const TOKEN_INVALID: i32 = 10001;
}

/// Cid lists that appear inside URL paths, comma-joined.
///
/// Endpoints like `/user/black/cid/{cids}` take several cids in one path
/// segment. Callers can pass a pre-joined `"cid1,cid2"` string or a slice;
/// both produce the same segment.
pub trait CidParam {
    fn into_segment(self) -> String;
}

impl CidParam for &str {
    fn into_segment(self) -> String {
        self.to_string()
    }
}

impl CidParam for String {
    fn into_segment(self) -> String {
        self
    }
}

impl<S: AsRef<str>> CidParam for &[S] {
    fn into_segment(self) -> String {
        self.iter()
            .map(|s| s.as_ref())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl<S: AsRef<str>, const N: usize> CidParam for &[S; N] {
    fn into_segment(self) -> String {
        self.as_slice().into_segment()
    }
}

impl<S: AsRef<str>> CidParam for Vec<S> {
    fn into_segment(self) -> String {
        self.as_slice().into_segment()
    }
}
