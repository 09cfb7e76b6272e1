use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use sha2::Sha256;
use tracing::{debug, warn};

use crate::config::{Credentials, HttpConfig};
use crate::error::UpstreamError;

type HmacSha256 = Hmac<Sha256>;

/// Maximum response-body length carried inside error messages.
const ERROR_SNIPPET_LEN: usize = 2000;

/// Jitter added on top of the linear backoff, in seconds.
const BACKOFF_JITTER_SECS: f64 = 0.6;

/// Parsed upstream response body.
///
/// The platform is not strict about content types, so parsing degrades from
/// JSON to raw text instead of erroring.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
    Empty,
}

impl ResponseBody {
    fn parse(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Self::Empty;
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => Self::Json(value),
            Err(_) => Self::Text(trimmed.to_string()),
        }
    }

    pub fn into_json(self) -> Option<Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }
}

/// Observation window sent to the stats endpoint, ISO dates inclusive.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TimeRange {
    pub since: String,
    pub until: String,
}

impl TimeRange {
    /// Today's local date on both ends — the reference observation window.
    pub fn today() -> Self {
        let today = chrono::Local::now().date_naive().to_string();
        Self {
            since: today.clone(),
            until: today,
        }
    }
}

/// Query parameters for the stats endpoint.
///
/// The wire protocol expects serialized scalars for GET parameters: `ids` as a
/// comma-joined string, `fields` and `timeRange` as JSON-encoded strings, and
/// `timeIncrement` as its string form. `to_query` performs that normalization.
#[derive(Debug, Clone)]
pub struct StatsParams {
    pub ids: Vec<String>,
    pub fields: Vec<String>,
    pub time_range: TimeRange,
    pub time_increment: Option<u32>,
    pub breakdown: Option<String>,
}

impl StatsParams {
    pub fn to_query(&self) -> Vec<(String, String)> {
        let mut query = vec![
            ("ids".to_string(), self.ids.join(",")),
            (
                "fields".to_string(),
                serde_json::to_string(&self.fields).unwrap_or_default(),
            ),
            (
                "timeRange".to_string(),
                serde_json::to_string(&self.time_range).unwrap_or_default(),
            ),
        ];
        if let Some(increment) = self.time_increment {
            query.push(("timeIncrement".to_string(), increment.to_string()));
        }
        if let Some(breakdown) = &self.breakdown {
            query.push(("breakdown".to_string(), breakdown.clone()));
        }
        query
    }
}

/// Signed HTTP client for the SearchAd API.
///
/// Every request carries a fresh `{timestampMillis}.{METHOD}.{path}` signature
/// (HMAC-SHA256, base64). 429/5xx/transport failures are retried with a linear
/// backoff plus jitter; other 4xx responses fail immediately with the body.
pub struct SignedClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    secret_key: String,
    customer_id: String,
    retry_attempts: u32,
    retry_backoff_secs: f64,
}

impl SignedClient {
    pub fn new(creds: &Credentials, http: &HttpConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(http.timeout_secs))
            .build()?;
        Ok(Self {
            http: client,
            base_url: creds.api_base.trim_end_matches('/').to_string(),
            api_key: creds.api_key.clone(),
            secret_key: creds.secret_key.clone(),
            customer_id: creds.customer_id.clone(),
            retry_attempts: http.retry_attempts.max(1),
            retry_backoff_secs: http.retry_backoff_secs,
        })
    }

    /// GET `path` with the given query pairs, returning the parsed body.
    pub async fn get(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<ResponseBody, UpstreamError> {
        self.request(Method::GET, path, query).await
    }

    /// Perform a signed request with retry. Non-GET methods send the query
    /// pairs as a JSON object body (the listing/stats surface is GET-only,
    /// but entity mutations use the same signing scheme).
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        params: &[(String, String)],
    ) -> Result<ResponseBody, UpstreamError> {
        let url = format!("{}{}", self.base_url, path);
        let mut last_err: Option<UpstreamError> = None;

        for attempt in 1..=self.retry_attempts {
            // Fresh timestamp and signature on every attempt, retries included.
            let timestamp = chrono::Utc::now().timestamp_millis();
            let signature = sign(&self.secret_key, timestamp, method.as_str(), path);

            let request = self
                .http
                .request(method.clone(), &url)
                .header("Content-Type", "application/json; charset=UTF-8")
                .header("X-Timestamp", timestamp.to_string())
                .header("X-API-KEY", &self.api_key)
                .header("X-Customer", &self.customer_id)
                .header("X-Signature", signature);
            let request = if method == Method::GET {
                request.query(params)
            } else {
                let body: serde_json::Map<String, Value> = params
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect();
                request.json(&Value::Object(body))
            };

            let response = match request.send().await {
                Ok(r) => r,
                Err(e) => {
                    let err = UpstreamError::from(e);
                    warn!("{method} {path} attempt {attempt} failed: {err}");
                    last_err = Some(err);
                    if attempt < self.retry_attempts {
                        self.backoff_sleep(attempt).await;
                    }
                    continue;
                }
            };

            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(ERROR_SNIPPET_LEN).collect();

            if status.as_u16() == 429 || status.is_server_error() {
                let err = UpstreamError::transient(
                    Some(status.as_u16()),
                    format!("HTTP {status} {url}: {snippet}"),
                );
                warn!("{method} {path} attempt {attempt}: {err}");
                last_err = Some(err);
                if attempt < self.retry_attempts {
                    self.backoff_sleep(attempt).await;
                }
                continue;
            }

            if status.is_client_error() {
                return Err(UpstreamError::fatal(status.as_u16(), snippet));
            }

            debug!("{method} {path} -> HTTP {status} ({} bytes)", text.len());
            return Ok(ResponseBody::parse(&text));
        }

        Err(last_err.unwrap_or_else(|| {
            UpstreamError::transient(None, format!("unknown error calling {url}"))
        }))
    }

    async fn backoff_sleep(&self, failed_attempt: u32) {
        let secs = self.retry_backoff_secs * failed_attempt as f64
            + fastrand::f64() * BACKOFF_JITTER_SECS;
        tokio::time::sleep(Duration::from_secs_f64(secs)).await;
    }
}

/// Compute the request signature: base64 of HMAC-SHA256 over
/// `"{timestamp}.{METHOD}.{path}"`.
pub fn sign(secret_key: &str, timestamp_ms: i64, method: &str, path: &str) -> String {
    let message = format!("{timestamp_ms}.{method}.{path}");
    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(message.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ── signing ────────────────────────────────────────────────────

    #[test]
    fn signature_known_vector() {
        let sig = sign("secret-key", 1755000000000, "GET", "/stats");
        assert_eq!(sig, "Y4NzlfaL7Ii8m5nZ46J+N1GCVv3wWKIKRwpNPW5PXTw=");
    }

    #[test]
    fn signature_is_deterministic_and_keyed() {
        let a = sign("secret", 1700000000000, "GET", "/ncc/campaigns");
        let b = sign("secret", 1700000000000, "GET", "/ncc/campaigns");
        assert_eq!(a, b);
        assert_ne!(a, sign("other", 1700000000000, "GET", "/ncc/campaigns"));
        assert_ne!(a, sign("secret", 1700000000001, "GET", "/ncc/campaigns"));
        assert_ne!(a, sign("secret", 1700000000000, "PUT", "/ncc/campaigns"));
    }

    #[test]
    fn signature_decodes_to_sha256_digest() {
        let sig = sign("k", 1, "GET", "/stats");
        let raw = BASE64.decode(sig).expect("valid base64");
        assert_eq!(raw.len(), 32);
    }

    // ── stats query normalization ──────────────────────────────────

    fn sample_params() -> StatsParams {
        StatsParams {
            ids: vec!["nkw-a001".to_string(), "nkw-a002".to_string()],
            fields: vec![
                "impCnt".to_string(),
                "clkCnt".to_string(),
                "avgRnk".to_string(),
            ],
            time_range: TimeRange {
                since: "2026-08-29".to_string(),
                until: "2026-08-29".to_string(),
            },
            time_increment: None,
            breakdown: Some("pcMblTp".to_string()),
        }
    }

    #[test]
    fn ids_are_comma_joined() {
        let query = sample_params().to_query();
        assert_eq!(query[0], ("ids".to_string(), "nkw-a001,nkw-a002".to_string()));
    }

    #[test]
    fn fields_and_time_range_are_json_encoded() {
        let query = sample_params().to_query();
        assert_eq!(
            query[1],
            (
                "fields".to_string(),
                r#"["impCnt","clkCnt","avgRnk"]"#.to_string()
            )
        );
        assert_eq!(
            query[2],
            (
                "timeRange".to_string(),
                r#"{"since":"2026-08-29","until":"2026-08-29"}"#.to_string()
            )
        );
    }

    #[test]
    fn time_increment_becomes_string() {
        let mut params = sample_params();
        params.time_increment = Some(1);
        let query = params.to_query();
        assert!(query.contains(&("timeIncrement".to_string(), "1".to_string())));
    }

    #[test]
    fn breakdown_omitted_when_absent() {
        let mut params = sample_params();
        params.breakdown = None;
        let query = params.to_query();
        assert!(query.iter().all(|(k, _)| k != "breakdown"));
    }

    // ── response parsing ───────────────────────────────────────────

    #[test]
    fn body_parses_json() {
        assert_eq!(
            ResponseBody::parse(r#"[{"id":"nkw-1"}]"#),
            ResponseBody::Json(json!([{"id": "nkw-1"}]))
        );
    }

    #[test]
    fn body_degrades_to_text() {
        assert_eq!(
            ResponseBody::parse("<html>gateway error</html>"),
            ResponseBody::Text("<html>gateway error</html>".to_string())
        );
    }

    #[test]
    fn body_empty() {
        assert_eq!(ResponseBody::parse("   \n"), ResponseBody::Empty);
    }
}
