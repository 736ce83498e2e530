use async_trait::async_trait;
use chrono::{DateTime, Local};
use facegate_common::{AttendanceEvent, AttendanceEventType};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::AttendanceSink;
use crate::config::AttendanceApiConfig;
use crate::error::{Result, TrackerError};

const DATE_FORMAT: &str = "dd-MM-yyyy HH:mm:ss";
const TIMESTAMP_FORMAT: &str = "%d-%m-%Y %H:%M:%S";
const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;

pub fn is_retryable(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
}

/// Delay before retry number `retry` (0-based): `base`, doubling each time.
pub fn backoff_delay(base: Duration, retry: u32) -> Duration {
    base.saturating_mul(1u32 << retry.min(16))
}

/// Query parameters of the "log attendance" call.
pub fn attendance_params(
    identity: &str,
    event_type: AttendanceEventType,
    at: DateTime<Local>,
) -> Vec<(&'static str, String)> {
    let timestamp = at.format(TIMESTAMP_FORMAT).to_string();
    let time_key = match event_type {
        AttendanceEventType::CheckIn => "checkIn",
        AttendanceEventType::CheckOut => "checkOut",
    };
    vec![
        ("empId", identity.to_string()),
        ("dateFormat", DATE_FORMAT.to_string()),
        (time_key, timestamp),
    ]
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_lifetime")]
    expires_in: u64,
}

fn default_token_lifetime() -> u64 {
    DEFAULT_TOKEN_LIFETIME_SECS
}

#[derive(Debug, Default)]
struct TokenState {
    access_token: String,
    expires_at: Option<Instant>,
}

impl TokenState {
    fn is_valid(&self, margin: Duration, now: Instant) -> bool {
        !self.access_token.is_empty() && matches!(self.expires_at, Some(at) if at > now + margin)
    }
}

/// Client for the external HR attendance API: refresh-token grant plus an
/// authenticated attendance call, both retried on throttling and 5xx.
pub struct AttendanceApiClient {
    client: Client,
    config: AttendanceApiConfig,
    token: Mutex<TokenState>,
}

impl AttendanceApiClient {
    pub fn new(config: AttendanceApiConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        let token = TokenState {
            access_token: config.access_token.clone(),
            expires_at: None,
        };

        Ok(Self {
            client,
            config,
            token: Mutex::new(token),
        })
    }

    pub async fn log_attendance(&self, identity: &str, event_type: AttendanceEventType) -> Result<()> {
        let token = self.access_token().await?;
        let params = attendance_params(identity, event_type, Local::now());
        let url = self.config.attendance_url();

        let response = self
            .send_with_retry(|| self.client.post(&url).bearer_auth(&token).query(&params))
            .await?;

        let status = response.status();
        if status == StatusCode::OK {
            info!(identity, event = event_type.as_str(), "Attendance forwarded");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(TrackerError::AttendanceApiError(format!(
            "attendance call for {} returned {}: {}",
            identity, status, body
        )))
    }

    /// Returns a token valid beyond the refresh margin, refreshing it first
    /// when needed. A failed refresh clears the cached token.
    async fn access_token(&self) -> Result<String> {
        let mut token = self.token.lock().await;
        let margin = Duration::from_secs(self.config.refresh_margin_secs);
        if token.is_valid(margin, Instant::now()) {
            return Ok(token.access_token.clone());
        }

        info!("Refreshing attendance API access token");
        match self.refresh().await {
            Ok(refreshed) => {
                token.access_token = refreshed.access_token;
                token.expires_at = Some(Instant::now() + Duration::from_secs(refreshed.expires_in));
                info!(expires_in = refreshed.expires_in, "Access token refreshed");
                Ok(token.access_token.clone())
            }
            Err(e) => {
                *token = TokenState::default();
                Err(e)
            }
        }
    }

    async fn refresh(&self) -> Result<TokenResponse> {
        let params = [
            ("refresh_token", self.config.refresh_token.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("grant_type", "refresh_token"),
        ];
        let response = self
            .send_with_retry(|| self.client.post(&self.config.token_url).query(&params))
            .await?
            .error_for_status()?;
        Ok(response.json::<TokenResponse>().await?)
    }

    async fn send_with_retry<F>(&self, build: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let base = Duration::from_millis(self.config.backoff_ms);
        let mut retry = 0;
        loop {
            match build().send().await {
                Ok(response) if is_retryable(response.status()) && retry < self.config.max_retries => {
                    warn!(status = %response.status(), retry, "Retryable response from attendance API");
                }
                Ok(response) => return Ok(response),
                Err(e) if retry < self.config.max_retries => {
                    warn!(retry, "Attendance API request failed: {}", e);
                }
                Err(e) => return Err(e.into()),
            }
            tokio::time::sleep(backoff_delay(base, retry)).await;
            retry += 1;
        }
    }
}

#[async_trait]
impl AttendanceSink for AttendanceApiClient {
    async fn forward(&self, event: &AttendanceEvent) -> Result<()> {
        self.log_attendance(&event.identity, event.event_type).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_retryable_statuses() {
        for code in [429, 500, 502, 503, 504] {
            assert!(is_retryable(StatusCode::from_u16(code).unwrap()));
        }
        for code in [200, 400, 401, 404, 501] {
            assert!(!is_retryable(StatusCode::from_u16(code).unwrap()));
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let base = Duration::from_millis(1000);
        assert_eq!(backoff_delay(base, 0), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(4));
    }

    #[test]
    fn test_attendance_params() {
        let at = Local.with_ymd_and_hms(2024, 3, 5, 9, 7, 2).unwrap();
        let params = attendance_params("E1", AttendanceEventType::CheckOut, at);
        assert_eq!(
            params,
            vec![
                ("empId", "E1".to_string()),
                ("dateFormat", "dd-MM-yyyy HH:mm:ss".to_string()),
                ("checkOut", "05-03-2024 09:07:02".to_string()),
            ]
        );
    }

    #[test]
    fn test_token_validity_respects_margin() {
        let now = Instant::now();
        let margin = Duration::from_secs(300);
        let mut token = TokenState {
            access_token: "abc".to_string(),
            expires_at: Some(now + Duration::from_secs(3600)),
        };
        assert!(token.is_valid(margin, now));

        token.expires_at = Some(now + Duration::from_secs(120));
        assert!(!token.is_valid(margin, now));

        token.expires_at = None;
        assert!(!token.is_valid(margin, now));
    }

    #[tokio::test]
    async fn test_unreachable_api_fails_without_panicking() {
        let config = AttendanceApiConfig {
            enabled: true,
            base_url: "http://127.0.0.1:9".to_string(),
            token_url: "http://127.0.0.1:9/token".to_string(),
            max_retries: 1,
            backoff_ms: 1,
            timeout_secs: 2,
            ..AttendanceApiConfig::default()
        };
        let client = AttendanceApiClient::new(config).unwrap();
        let result = client.log_attendance("E1", AttendanceEventType::CheckIn).await;
        assert!(result.is_err());
        assert!(client.token.lock().await.access_token.is_empty());
    }
}
