use anyhow::{Context, Result};
use reqwest::{Client, Method};
use serde_json::{Value, json};

use crate::request_id::generate_request_id;
use crate::token_store::TokenStore;
use crate::types::{ApiResponse, CidParam, REST_API, UniPushConfig, codes};

/// One retry after a token-invalid response; never loops further.
const MAX_AUTH_RETRIES: u32 = 1;

/// Client for the UniPush v2 REST API.
///
/// Cheap to clone: clones share the HTTP connection pool and the token
/// cache, so a single instance (or its clones) can serve a whole
/// application.
///
/// Endpoint methods are a mechanical mapping onto the vendor's API: JSON
/// bodies go through as [`serde_json::Value`] and come back inside the
/// vendor's `{code, msg, data}` envelope untouched. The client only steps
/// in for authentication: it attaches the cached token to every call and
/// transparently re-authenticates once when the vendor reports the token
/// invalid.
#[derive(Clone)]
pub struct UniPushClient {
    http: Client,
    config: UniPushConfig,
    base_url: String,
    tokens: TokenStore,
}

impl UniPushClient {
    pub fn new(config: UniPushConfig) -> Result<Self> {
        Self::with_token_store(config, TokenStore::new())
    }

    /// Build a client on an existing [`TokenStore`], for hosts that keep one
    /// cache across several app configurations.
    pub fn with_token_store(config: UniPushConfig, tokens: TokenStore) -> Result<Self> {
        let http = Client::builder().build()?;
        let base_url = format!(
            "{}/{}",
            config.base_url.as_deref().unwrap_or(REST_API),
            config.app_id
        );
        Ok(Self {
            http,
            config,
            base_url,
            tokens,
        })
    }

    pub fn config(&self) -> &UniPushConfig {
        &self.config
    }

    /// Current bearer token, fetching via `/auth` on a cache miss.
    pub async fn token(&self) -> Result<String> {
        if let Some(token) = self.tokens.get_valid(&self.config.app_id).await {
            return Ok(token);
        }
        self.tokens
            .refresh(&self.http, &self.base_url, &self.config)
            .await
    }

    /// Issue one API call, attaching auth and recovering once from a stale
    /// token.
    ///
    /// Transport failures and non-2xx statuses are errors; vendor codes
    /// inside a 2xx envelope are data for the caller, with one exception:
    /// `code == 10001` (token invalid) drops the cached token and replays
    /// the identical request a single time.
    async fn request(&self, method: Method, api: &str, body: Option<&Value>) -> Result<ApiResponse> {
        let url = format!("{}{}", self.base_url, api);
        let mut auth_retries = 0;

        loop {
            let mut request = self.http.request(method.clone(), url.as_str());

            // The token issuance endpoints are the only unauthenticated ones
            if !api.starts_with("/auth") {
                request = request.header("token", self.token().await?);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request.send().await?;
            let status = response.status();
            let text = response.text().await?;
            if !status.is_success() {
                anyhow::bail!("API request failed: {} {}", status, text);
            }

            let envelope: ApiResponse = serde_json::from_str(&text)
                .with_context(|| format!("malformed response from {}", api))?;

            if envelope.code == codes::TOKEN_INVALID && auth_retries < MAX_AUTH_RETRIES {
                tracing::warn!(api, "token rejected, re-authenticating");
                self.tokens.invalidate(&self.config.app_id).await;
                auth_retries += 1;
                continue;
            }

            return Ok(envelope);
        }
    }

    // push

    /// Push one message to a single device (cid target).
    pub async fn push_single_cid(&self, message: Value) -> Result<ApiResponse> {
        self.request(
            Method::POST,
            "/push/single/cid",
            Some(&with_request_id(message)),
        )
        .await
    }

    /// Push one message to a single user (alias target).
    pub async fn push_single_alias(&self, message: Value) -> Result<ApiResponse> {
        self.request(
            Method::POST,
            "/push/single/alias",
            Some(&with_request_id(message)),
        )
        .await
    }

    /// Push individually-addressed messages to many devices in one call.
    ///
    /// Every entry of `msg_list` gets its own `request_id`; the vendor
    /// deduplicates per message, not per batch.
    pub async fn push_single_batch_cid(&self, msg_list: Vec<Value>) -> Result<ApiResponse> {
        self.request(
            Method::POST,
            "/push/single/batch/cid",
            Some(&batch_payload(msg_list)),
        )
        .await
    }

    /// Alias-addressed variant of [`push_single_batch_cid`](Self::push_single_batch_cid).
    pub async fn push_single_batch_alias(&self, msg_list: Vec<Value>) -> Result<ApiResponse> {
        self.request(
            Method::POST,
            "/push/single/batch/alias",
            Some(&batch_payload(msg_list)),
        )
        .await
    }

    /// Store a message body for list pushes; the returned data carries the
    /// taskid to address it by.
    pub async fn push_list_message(&self, message: Value) -> Result<ApiResponse> {
        self.request(
            Method::POST,
            "/push/list/message",
            Some(&with_request_id(message)),
        )
        .await
    }

    /// Push a stored message (by taskid) to a list of cids.
    pub async fn push_list_cid(&self, payload: Value) -> Result<ApiResponse> {
        self.request(Method::POST, "/push/list/cid", Some(&payload)).await
    }

    /// Push a stored message (by taskid) to a list of aliases.
    pub async fn push_list_alias(&self, payload: Value) -> Result<ApiResponse> {
        self.request(Method::POST, "/push/list/alias", Some(&payload))
            .await
    }

    /// Broadcast to every device of the application.
    pub async fn push_all(&self, message: Value) -> Result<ApiResponse> {
        self.request(Method::POST, "/push/all", Some(&with_request_id(message)))
            .await
    }

    /// Push to devices selected by tag conditions.
    pub async fn push_tag(&self, message: Value) -> Result<ApiResponse> {
        self.request(Method::POST, "/push/tag", Some(&with_request_id(message)))
            .await
    }

    /// Push to devices carrying a single custom tag (fast path).
    pub async fn push_fast_custom_tag(&self, message: Value) -> Result<ApiResponse> {
        self.request(
            Method::POST,
            "/push/fast_custom_tag",
            Some(&with_request_id(message)),
        )
        .await
    }

    // task

    /// Stop a running push task and delete it.
    pub async fn task_delete(&self, task_id: &str) -> Result<ApiResponse> {
        self.request(Method::DELETE, &format!("/task/{}", task_id), None)
            .await
    }

    /// Query a scheduled task.
    pub async fn task_schedule(&self, task_id: &str) -> Result<ApiResponse> {
        self.request(Method::GET, &format!("/task/schedule/{}", task_id), None)
            .await
    }

    /// Cancel a scheduled task.
    pub async fn task_schedule_delete(&self, task_id: &str) -> Result<ApiResponse> {
        self.request(Method::DELETE, &format!("/task/schedule/{}", task_id), None)
            .await
    }

    /// Delivery detail of one task on one device.
    pub async fn task_detail(&self, cid: &str, task_id: &str) -> Result<ApiResponse> {
        self.request(
            Method::GET,
            &format!("/task/detail/{}/{}", cid, task_id),
            None,
        )
        .await
    }

    // report

    pub async fn report_push_task(&self, task_id: &str) -> Result<ApiResponse> {
        self.request(Method::GET, &format!("/report/push/task/{}", task_id), None)
            .await
    }

    pub async fn report_push_task_group(&self, group_name: &str) -> Result<ApiResponse> {
        self.request(
            Method::GET,
            &format!("/report/push/task_group/{}", group_name),
            None,
        )
        .await
    }

    pub async fn report_push_task_detail(&self, task_id: &str) -> Result<ApiResponse> {
        self.request(
            Method::GET,
            &format!("/report/push/task/{}/detail", task_id),
            None,
        )
        .await
    }

    /// Push statistics for a day (`YYYY-MM-DD`).
    pub async fn report_push_date(&self, date: &str) -> Result<ApiResponse> {
        self.request(Method::GET, &format!("/report/push/date/{}", date), None)
            .await
    }

    /// Push totals over the last 24 hours.
    pub async fn report_push_count(&self) -> Result<ApiResponse> {
        self.request(Method::GET, "/report/push/count", None).await
    }

    /// User statistics for a day (`YYYY-MM-DD`).
    pub async fn report_user_date(&self, date: &str) -> Result<ApiResponse> {
        self.request(Method::GET, &format!("/report/user/date/{}", date), None)
            .await
    }

    pub async fn report_online_user(&self) -> Result<ApiResponse> {
        self.request(Method::GET, "/report/online_user", None).await
    }

    // user

    /// Bind aliases to cids; `data_list` entries are `{cid, alias}` pairs.
    pub async fn user_alias_bind(&self, data_list: Value) -> Result<ApiResponse> {
        self.request(
            Method::POST,
            "/user/alias",
            Some(&json!({ "data_list": data_list })),
        )
        .await
    }

    /// Unbind specific `{cid, alias}` pairs.
    pub async fn user_alias_unbind(&self, data_list: Value) -> Result<ApiResponse> {
        self.request(
            Method::DELETE,
            "/user/alias",
            Some(&json!({ "data_list": data_list })),
        )
        .await
    }

    /// Alias currently bound to a cid.
    pub async fn user_alias_by_cid(&self, cid: &str) -> Result<ApiResponse> {
        self.request(Method::GET, &format!("/user/alias/cid/{}", cid), None)
            .await
    }

    /// All cids bound to an alias.
    pub async fn user_cid_by_alias(&self, alias: &str) -> Result<ApiResponse> {
        self.request(Method::GET, &format!("/user/cid/alias/{}", alias), None)
            .await
    }

    /// Unbind every cid from an alias.
    pub async fn user_alias_unbind_all(&self, alias: &str) -> Result<ApiResponse> {
        self.request(Method::DELETE, &format!("/user/alias/{}", alias), None)
            .await
    }

    /// Replace the custom tags of one device.
    pub async fn user_custom_tag_set(&self, cid: &str, custom_tag: Value) -> Result<ApiResponse> {
        self.request(
            Method::POST,
            &format!("/user/custom_tag/cid/{}", cid),
            Some(&json!({ "custom_tag": custom_tag })),
        )
        .await
    }

    /// Custom tags of one device.
    pub async fn user_custom_tags(&self, cid: &str) -> Result<ApiResponse> {
        self.request(Method::GET, &format!("/user/custom_tag/cid/{}", cid), None)
            .await
    }

    /// Attach one custom tag to a list of cids.
    pub async fn user_custom_tag_batch_add(
        &self,
        custom_tag: &str,
        cid: Value,
    ) -> Result<ApiResponse> {
        self.request(
            Method::PUT,
            &format!("/user/custom_tag/batch/{}", custom_tag),
            Some(&json!({ "cid": cid })),
        )
        .await
    }

    /// Detach one custom tag from a list of cids.
    pub async fn user_custom_tag_batch_delete(
        &self,
        custom_tag: &str,
        cid: Value,
    ) -> Result<ApiResponse> {
        self.request(
            Method::DELETE,
            &format!("/user/custom_tag/batch/{}", custom_tag),
            Some(&json!({ "cid": cid })),
        )
        .await
    }

    /// Add cids to the push blacklist.
    pub async fn user_black_cid_add(&self, cids: impl CidParam) -> Result<ApiResponse> {
        self.request(
            Method::POST,
            &format!("/user/black/cid/{}", cids.into_segment()),
            None,
        )
        .await
    }

    /// Remove cids from the push blacklist.
    pub async fn user_black_cid_delete(&self, cids: impl CidParam) -> Result<ApiResponse> {
        self.request(
            Method::DELETE,
            &format!("/user/black/cid/{}", cids.into_segment()),
            None,
        )
        .await
    }

    /// Online/offline status per cid.
    pub async fn user_status(&self, cids: impl CidParam) -> Result<ApiResponse> {
        self.request(
            Method::GET,
            &format!("/user/status/{}", cids.into_segment()),
            None,
        )
        .await
    }

    /// Device-level status (last online, notification switch) per cid.
    pub async fn user_device_status(&self, cids: impl CidParam) -> Result<ApiResponse> {
        self.request(
            Method::GET,
            &format!("/user/deviceStatus/{}", cids.into_segment()),
            None,
        )
        .await
    }

    /// Device detail (brand, client version, ...) per cid.
    pub async fn user_detail(&self, cids: impl CidParam) -> Result<ApiResponse> {
        self.request(
            Method::GET,
            &format!("/user/detail/{}", cids.into_segment()),
            None,
        )
        .await
    }

    /// Set the iOS badge for a list of cids. `badge` is the vendor's opcode
    /// string: an absolute number, `"+N"` or `"-N"`.
    pub async fn user_badge_set(&self, cids: impl CidParam, badge: &str) -> Result<ApiResponse> {
        self.request(
            Method::POST,
            &format!("/user/badge/cid/{}", cids.into_segment()),
            Some(&json!({ "badge": badge })),
        )
        .await
    }

    /// Count devices matching tag conditions (pass-through payload).
    pub async fn user_count(&self, conditions: Value) -> Result<ApiResponse> {
        self.request(Method::POST, "/user/count", Some(&conditions))
            .await
    }

    // auth

    /// Revoke a previously issued token. Unauthenticated, like `/auth`
    /// itself.
    pub async fn auth_delete(&self, token: &str) -> Result<ApiResponse> {
        self.request(Method::DELETE, &format!("/auth/{}", token), None)
            .await
    }
}

/// Tag an outgoing push payload with a fresh `request_id`. Caller-supplied
/// ids are kept, so resubmissions stay idempotent.
fn with_request_id(mut message: Value) -> Value {
    if let Some(map) = message.as_object_mut() {
        map.entry("request_id")
            .or_insert_with(|| Value::String(generate_request_id()));
    }
    message
}

/// Wrap a batch message list, tagging every entry with its own request id.
fn batch_payload(msg_list: Vec<Value>) -> Value {
    let msg_list: Vec<Value> = msg_list.into_iter().map(with_request_id).collect();
    json!({ "is_async": true, "msg_list": msg_list })
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::{DELETE, GET, POST};
    use httpmock::MockServer;

    fn test_client(server: &MockServer) -> UniPushClient {
        UniPushClient::new(UniPushConfig {
            app_id: "test-app".to_string(),
            app_key: "appkey-123".to_string(),
            app_secret: "appsecret-789".to_string(),
            master_secret: "master-secret-456".to_string(),
            base_url: Some(format!("{}/v2", server.base_url())),
        })
        .unwrap()
    }

    async fn mock_auth<'a>(server: &'a MockServer, token: &str) -> httpmock::Mock<'a> {
        let token = token.to_string();
        server
            .mock_async(move |when, then| {
                when.method(POST).path("/v2/test-app/auth");
                then.status(200)
                    .header("Content-Type", "application/json")
                    .json_body(serde_json::json!({
                        "code": 0,
                        "msg": "success",
                        "data": {"token": token, "expire_time": "1645671600000"}
                    }));
            })
            .await
    }

    #[tokio::test]
    async fn test_cached_token_is_reused() {
        let server = MockServer::start_async().await;
        let auth = mock_auth(&server, "tok-1").await;
        let report = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v2/test-app/report/online_user")
                    .header("token", "tok-1");
                then.status(200)
                    .header("Content-Type", "application/json")
                    .json_body(serde_json::json!({"code": 0, "msg": "success", "data": {"online_num": 7}}));
            })
            .await;

        let client = test_client(&server);
        for _ in 0..3 {
            let envelope = client.report_online_user().await.unwrap();
            assert!(envelope.is_success());
        }

        assert_eq!(report.hits_async().await, 3);
        // One /auth for three calls: the cached token served the rest
        assert_eq!(auth.hits_async().await, 1);
    }

    #[tokio::test]
    async fn test_token_invalid_invalidates_and_retries_once() {
        let server = MockServer::start_async().await;

        // Seed the cache with tok-stale
        let mut auth_stale = mock_auth(&server, "tok-stale").await;
        let seed = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v2/test-app/report/push/count")
                    .header("token", "tok-stale");
                then.status(200)
                    .header("Content-Type", "application/json")
                    .json_body(serde_json::json!({"code": 0, "msg": "success", "data": {}}));
            })
            .await;

        let client = test_client(&server);
        client.report_push_count().await.unwrap();
        assert_eq!(seed.hits_async().await, 1);
        assert_eq!(auth_stale.hits_async().await, 1);

        // From now on /auth issues tok-fresh; the vendor rejects tok-stale
        auth_stale.delete_async().await;
        let auth_fresh = mock_auth(&server, "tok-fresh").await;
        let push_rejected = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v2/test-app/push/single/cid")
                    .header("token", "tok-stale");
                then.status(200)
                    .header("Content-Type", "application/json")
                    .json_body(serde_json::json!({"code": 10001, "msg": "token error"}));
            })
            .await;
        let push_accepted = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v2/test-app/push/single/cid")
                    .header("token", "tok-fresh");
                then.status(200)
                    .header("Content-Type", "application/json")
                    .json_body(serde_json::json!({"code": 0, "msg": "success", "data": {"taskid": "RASL_1"}}));
            })
            .await;

        let envelope = client
            .push_single_cid(serde_json::json!({
                "audience": {"cid": ["cid-1"]},
                "push_message": {"notification": {"title": "t", "body": "b", "click_type": "none"}}
            }))
            .await
            .unwrap();

        // Recovery is invisible to the caller
        assert!(envelope.is_success());
        assert_eq!(envelope.data.unwrap()["taskid"], "RASL_1");
        // Exactly one failed attempt, one re-auth, one replay
        assert_eq!(push_rejected.hits_async().await, 1);
        assert_eq!(auth_fresh.hits_async().await, 1);
        assert_eq!(push_accepted.hits_async().await, 1);
    }

    #[tokio::test]
    async fn test_persistently_invalid_token_gives_up_after_one_retry() {
        let server = MockServer::start_async().await;
        let auth = mock_auth(&server, "tok-1").await;
        let push = server
            .mock_async(|when, then| {
                when.method(POST).path("/v2/test-app/push/single/cid");
                then.status(200)
                    .header("Content-Type", "application/json")
                    .json_body(serde_json::json!({"code": 10001, "msg": "token error"}));
            })
            .await;

        let client = test_client(&server);
        let envelope = client
            .push_single_cid(serde_json::json!({"audience": {"cid": ["cid-1"]}}))
            .await
            .unwrap();

        // The second 10001 goes back to the caller instead of looping
        assert_eq!(envelope.code, codes::TOKEN_INVALID);
        assert_eq!(push.hits_async().await, 2);
        assert_eq!(auth.hits_async().await, 2);
    }

    #[tokio::test]
    async fn test_other_vendor_codes_pass_through_without_retry() {
        let server = MockServer::start_async().await;
        let auth = mock_auth(&server, "tok-1").await;
        let push = server
            .mock_async(|when, then| {
                when.method(POST).path("/v2/test-app/push/single/cid");
                then.status(200)
                    .header("Content-Type", "application/json")
                    .json_body(serde_json::json!({"code": 10005, "msg": "black cid"}));
            })
            .await;

        let client = test_client(&server);
        let envelope = client
            .push_single_cid(serde_json::json!({"audience": {"cid": ["cid-1"]}}))
            .await
            .unwrap();

        assert_eq!(envelope.code, 10005);
        assert_eq!(envelope.msg.as_deref(), Some("black cid"));
        assert_eq!(push.hits_async().await, 1);
        assert_eq!(auth.hits_async().await, 1);
    }

    #[tokio::test]
    async fn test_http_failure_is_an_error() {
        let server = MockServer::start_async().await;
        mock_auth(&server, "tok-1").await;
        // No mock for the endpoint: the server answers 404

        let client = test_client(&server);
        let err = client.report_push_count().await.unwrap_err();
        assert!(
            err.to_string().contains("API request failed"),
            "unexpected error: {err}"
        );
    }

    #[tokio::test]
    async fn test_token_revocation_needs_no_token() {
        let server = MockServer::start_async().await;
        // Deliberately no POST /auth mock: fetching a token would 404
        let revoke = server
            .mock_async(|when, then| {
                when.method(DELETE).path("/v2/test-app/auth/tok-old");
                then.status(200)
                    .header("Content-Type", "application/json")
                    .json_body(serde_json::json!({"code": 0, "msg": "success"}));
            })
            .await;

        let client = test_client(&server);
        let envelope = client.auth_delete("tok-old").await.unwrap();
        assert!(envelope.is_success());
        assert_eq!(revoke.hits_async().await, 1);
    }

    #[tokio::test]
    async fn test_black_cid_list_and_string_hit_the_same_path() {
        let server = MockServer::start_async().await;
        let auth = mock_auth(&server, "tok-1").await;
        let black = server
            .mock_async(|when, then| {
                when.method(POST).path("/v2/test-app/user/black/cid/cid1,cid2");
                then.status(200)
                    .header("Content-Type", "application/json")
                    .json_body(serde_json::json!({"code": 0, "msg": "success"}));
            })
            .await;

        let client = test_client(&server);
        client.user_black_cid_add(&["cid1", "cid2"]).await.unwrap();
        client.user_black_cid_add("cid1,cid2").await.unwrap();

        assert_eq!(black.hits_async().await, 2);
        assert_eq!(auth.hits_async().await, 1);
    }

    #[test]
    fn test_request_id_injected_and_preserved() {
        let tagged = with_request_id(serde_json::json!({"audience": "all"}));
        let id = tagged["request_id"].as_str().unwrap();
        assert!((10..=32).contains(&id.len()));

        let kept = with_request_id(serde_json::json!({"request_id": "caller-id-0001"}));
        assert_eq!(kept["request_id"], "caller-id-0001");
    }

    #[test]
    fn test_batch_entries_get_distinct_request_ids() {
        let payload = batch_payload(vec![
            serde_json::json!({"audience": {"cid": ["a"]}}),
            serde_json::json!({"audience": {"cid": ["b"]}}),
            serde_json::json!({"audience": {"cid": ["c"]}}),
        ]);

        assert_eq!(payload["is_async"], true);
        let msg_list = payload["msg_list"].as_array().unwrap();
        assert_eq!(msg_list.len(), 3);

        let ids: std::collections::HashSet<&str> = msg_list
            .iter()
            .map(|msg| msg["request_id"].as_str().unwrap())
            .collect();
        assert_eq!(ids.len(), 3, "request ids must be distinct per entry");
    }
}
