use crate::common::error::{PipelineError, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::debug;

/// Shared GET-and-decode path for every provider adapter.
///
/// Failures are classified once here so adapters only deal with payload shape:
/// transport errors, timeouts and 5xx become `SourceUnavailable`; credential
/// rejections become `AuthenticationError`; a body that is not JSON becomes
/// `MalformedResponse`.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    provider: &'static str,
}

impl HttpFetcher {
    pub fn new(provider: &'static str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("earth_data/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PipelineError::Config(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self { client, provider })
    }

    pub fn provider(&self) -> &'static str {
        self.provider
    }

    /// GET `url` with query parameters and decode the body as JSON.
    ///
    /// `api_key` is sent as the `Authorization` header when present.
    pub async fn get_json(
        &self,
        url: &str,
        query: &[(&str, String)],
        api_key: Option<&str>,
    ) -> Result<Value> {
        let mut headers = HeaderMap::new();
        if let Some(key) = api_key {
            let value = HeaderValue::from_str(key)
                .map_err(|_| PipelineError::auth(self.provider, "API key is not a valid header value"))?;
            headers.insert(AUTHORIZATION, value);
        }

        let started = Instant::now();
        let resp = self
            .client
            .get(url)
            .headers(headers)
            .query(query)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let status = resp.status();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = resp.bytes().await.map_err(|e| self.transport_error(e))?;
        debug!(
            provider = self.provider,
            status = status.as_u16(),
            bytes = bytes.len(),
            content_type = %content_type,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Provider response"
        );

        classify_status(self.provider, status, &bytes)?;
        serde_json::from_slice(&bytes).map_err(|e| {
            PipelineError::malformed(self.provider, format!("body is not JSON ({}): {}", content_type, e))
        })
    }

    fn transport_error(&self, err: reqwest::Error) -> PipelineError {
        let reason = if err.is_timeout() {
            "request timed out"
        } else if err.is_connect() {
            "connection failed"
        } else {
            "transport error"
        };
        PipelineError::unavailable(self.provider, format!("{}: {}", reason, err))
    }
}

/// Map a non-success status to the pipeline error it stands for.
pub fn classify_status(provider: &str, status: StatusCode, body: &[u8]) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    let snippet: String = String::from_utf8_lossy(body).chars().take(200).collect();
    let message = format!("HTTP {}: {}", status.as_u16(), snippet.trim());
    match status {
        StatusCode::UNAUTHORIZED
        | StatusCode::PAYMENT_REQUIRED
        | StatusCode::FORBIDDEN
        | StatusCode::TOO_MANY_REQUESTS => Err(PipelineError::auth(provider, message)),
        s if s.is_server_error() || s == StatusCode::REQUEST_TIMEOUT => {
            Err(PipelineError::unavailable(provider, message))
        }
        _ => Err(PipelineError::malformed(provider, message)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(classify_status("noaa", StatusCode::OK, b"").is_ok());
        assert!(matches!(
            classify_status("stormglass", StatusCode::UNAUTHORIZED, b"bad key"),
            Err(PipelineError::AuthenticationError { .. })
        ));
        assert!(matches!(
            classify_status("stormglass", StatusCode::PAYMENT_REQUIRED, b"quota"),
            Err(PipelineError::AuthenticationError { .. })
        ));
        assert!(matches!(
            classify_status("noaa", StatusCode::BAD_GATEWAY, b""),
            Err(PipelineError::SourceUnavailable { .. })
        ));
        assert!(matches!(
            classify_status("usno", StatusCode::BAD_REQUEST, b"bad date"),
            Err(PipelineError::MalformedResponse { .. })
        ));
    }
}
