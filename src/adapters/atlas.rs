//! Client for the ATLAS forced photometry server.

use crate::domain::coords::Coordinates;
use crate::utils::error::{AtCleanError, Result};
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::LazyLock;
use std::time::Duration;

pub const DEFAULT_ATLAS_URL: &str = "https://fallingstar-data.com/forcedphot";

/// Columns of an empty result (no data within the MJD range).
pub const ATLAS_COLUMNS: [&str; 20] = [
    "MJD", "m", "dm", "uJy", "duJy", "F", "err", "chi/N", "RA", "Dec", "x", "y", "maj", "min",
    "phi", "apfit", "Sky", "ZP", "Obs", "Mask",
];

static WAIT_SECONDS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"available in (\d+) seconds").ok());
static WAIT_MINUTES: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"available in (\d+) minutes").ok());

/// Polling and retry timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AtlasTiming {
    pub queued_poll_seconds: u64,
    pub running_poll_seconds: u64,
    /// Wait after a throttled request whose message carries no wait time.
    pub throttle_wait_seconds: u64,
    pub retry_delay_seconds: u64,
    pub max_retries: u32,
}

impl Default for AtlasTiming {
    fn default() -> Self {
        Self {
            queued_poll_seconds: 4,
            running_poll_seconds: 2,
            throttle_wait_seconds: 10,
            retry_delay_seconds: 20,
            max_retries: 3,
        }
    }
}

/// Seconds to wait according to a throttling message.
pub fn parse_wait_seconds(message: &str, default_seconds: u64) -> u64 {
    let capture = |re: &Option<Regex>| -> Option<u64> {
        re.as_ref()?
            .captures(message)?
            .get(1)?
            .as_str()
            .parse()
            .ok()
    };
    capture(&WAIT_SECONDS)
        .or_else(|| capture(&WAIT_MINUTES).map(|minutes| minutes * 60))
        .unwrap_or(default_seconds)
}

/// Result of polling a queued task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskStatus {
    Queued,
    Running,
    Finished { result_url: Option<String> },
}

pub struct AtlasClient {
    client: Client,
    base_url: String,
    token: String,
    timing: AtlasTiming,
}

impl AtlasClient {
    /// Requests an API token with the given credentials.
    pub async fn connect(
        base_url: &str,
        username: &str,
        password: &str,
        timing: AtlasTiming,
    ) -> Result<Self> {
        let client = Client::new();
        let base_url = base_url.trim_end_matches('/').to_string();
        tracing::info!("Connecting to ATLAS API at {}", base_url);

        let response = client
            .post(format!("{}/api-token-auth/", base_url))
            .form(&[("username", username), ("password", password)])
            .send()
            .await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(AtCleanError::AtlasError {
                status: status.as_u16(),
                message: "Could not obtain an API token".to_string(),
            });
        }
        let body: Value = response.json().await?;
        let token = body
            .get("token")
            .and_then(Value::as_str)
            .ok_or_else(|| AtCleanError::AtlasError {
                status: status.as_u16(),
                message: "Token missing from authentication response".to_string(),
            })?
            .to_string();
        tracing::debug!("ATLAS token obtained");

        Ok(Self {
            client,
            base_url,
            token,
            timing,
        })
    }

    fn auth_header(&self) -> String {
        format!("Token {}", self.token)
    }

    /// Queues a forced photometry task and returns its URL, waiting out
    /// throttled (429) responses.
    pub async fn queue(&self, coords: &Coordinates, min_mjd: f64, max_mjd: f64) -> Result<String> {
        let form = [
            ("ra", coords.ra.to_string()),
            ("dec", coords.dec.to_string()),
            ("mjd_min", min_mjd.to_string()),
            ("mjd_max", max_mjd.to_string()),
            ("send_email", "False".to_string()),
        ];
        loop {
            let response = self
                .client
                .post(format!("{}/queue/", self.base_url))
                .header("Authorization", self.auth_header())
                .header("Accept", "application/json")
                .form(&form)
                .send()
                .await?;
            let status = response.status();

            match status {
                StatusCode::CREATED => {
                    let body: Value = response.json().await?;
                    let url = body
                        .get("url")
                        .and_then(Value::as_str)
                        .ok_or_else(|| AtCleanError::AtlasError {
                            status: status.as_u16(),
                            message: "Task URL missing from queue response".to_string(),
                        })?;
                    tracing::debug!("Task url: {}", url);
                    return Ok(url.to_string());
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    let body: Value = response.json().await.unwrap_or(Value::Null);
                    let detail = body.get("detail").and_then(Value::as_str).unwrap_or("");
                    let wait = parse_wait_seconds(detail, self.timing.throttle_wait_seconds);
                    tracing::warn!("⏳ ATLAS throttled the request ({}); waiting {} s", detail, wait);
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                }
                _ => {
                    let message = response.text().await.unwrap_or_default();
                    return Err(AtCleanError::AtlasError {
                        status: status.as_u16(),
                        message,
                    });
                }
            }
        }
    }

    pub async fn task_status(&self, task_url: &str) -> Result<TaskStatus> {
        let response = self
            .client
            .get(task_url)
            .header("Authorization", self.auth_header())
            .header("Accept", "application/json")
            .send()
            .await?;
        let status = response.status();
        if status != StatusCode::OK {
            let message = response.text().await.unwrap_or_default();
            return Err(AtCleanError::AtlasError {
                status: status.as_u16(),
                message,
            });
        }
        let body: Value = response.json().await?;
        let is_set = |key: &str| body.get(key).is_some_and(|v| !v.is_null());

        if is_set("finishtimestamp") {
            let result_url = body
                .get("result_url")
                .and_then(Value::as_str)
                .map(str::to_string);
            Ok(TaskStatus::Finished { result_url })
        } else if is_set("starttimestamp") {
            Ok(TaskStatus::Running)
        } else {
            Ok(TaskStatus::Queued)
        }
    }

    /// Polls until the task finishes and returns its result URL.
    pub async fn wait_for_result(&self, task_url: &str) -> Result<Option<String>> {
        let mut announced = false;
        loop {
            match self.task_status(task_url).await? {
                TaskStatus::Finished { result_url } => return Ok(result_url),
                TaskStatus::Running => {
                    if !announced {
                        tracing::info!("Task is running...");
                        announced = true;
                    }
                    tokio::time::sleep(Duration::from_secs(self.timing.running_poll_seconds)).await;
                }
                TaskStatus::Queued => {
                    tokio::time::sleep(Duration::from_secs(self.timing.queued_poll_seconds)).await;
                }
            }
        }
    }

    pub async fn fetch_result(&self, result_url: &str) -> Result<String> {
        let response = self
            .client
            .get(result_url)
            .header("Authorization", self.auth_header())
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AtCleanError::AtlasError {
                status: status.as_u16(),
                message: format!("Could not fetch result at {}", result_url),
            });
        }
        Ok(response.text().await?.replace("###", ""))
    }

    async fn query_once(&self, coords: &Coordinates, min_mjd: f64, max_mjd: f64) -> Result<String> {
        let task_url = self.queue(coords, min_mjd, max_mjd).await?;
        match self.wait_for_result(&task_url).await? {
            Some(result_url) => self.fetch_result(&result_url).await,
            None => {
                tracing::warn!("Empty light curve (no data within this MJD range)");
                Ok(format!("{}\n", ATLAS_COLUMNS.join(" ")))
            }
        }
    }

    /// Raw forced photometry text for one position, retrying failed
    /// queries up to `max_retries` times.
    pub async fn query(&self, coords: &Coordinates, min_mjd: f64, max_mjd: f64) -> Result<String> {
        tracing::info!(
            "Downloading ATLAS light curve at {} from {} MJD to {} MJD",
            coords,
            min_mjd,
            max_mjd
        );
        let mut attempt = 0;
        loop {
            match self.query_once(coords, min_mjd, max_mjd).await {
                Ok(text) => return Ok(text),
                Err(e) if attempt < self.timing.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        "⚠️ ATLAS query failed ({}); retry {}/{} in {} s",
                        e,
                        attempt,
                        self.timing.max_retries,
                        self.timing.retry_delay_seconds
                    );
                    tokio::time::sleep(Duration::from_secs(self.timing.retry_delay_seconds)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn fast_timing() -> AtlasTiming {
        AtlasTiming {
            queued_poll_seconds: 0,
            running_poll_seconds: 0,
            throttle_wait_seconds: 0,
            retry_delay_seconds: 0,
            max_retries: 1,
        }
    }

    #[test]
    fn test_parse_wait_seconds() {
        assert_eq!(parse_wait_seconds("Request was throttled. Expected available in 12 seconds.", 10), 12);
        assert_eq!(parse_wait_seconds("available in 2 minutes", 10), 120);
        assert_eq!(parse_wait_seconds("slow down", 10), 10);
    }

    #[tokio::test]
    async fn test_query_flow() {
        let server = MockServer::start_async().await;
        let auth = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api-token-auth/")
                    .body_contains("username=user");
                then.status(200).json_body(json!({"token": "abc"}));
            })
            .await;
        let queue = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/queue/")
                    .header("Authorization", "Token abc")
                    .body_contains("send_email=False");
                then.status(201)
                    .json_body(json!({"url": server.url("/queue/1/")}));
            })
            .await;
        let task = server
            .mock_async(|when, then| {
                when.method(GET).path("/queue/1/");
                then.status(200).json_body(json!({
                    "starttimestamp": "2024-01-01T00:00:00Z",
                    "finishtimestamp": "2024-01-01T00:01:00Z",
                    "result_url": server.url("/result/1.txt"),
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/result/1.txt");
                then.status(200)
                    .body("###MJD uJy duJy F chi/N\n59000.0 10 5 o 1.0\n");
            })
            .await;

        let client = AtlasClient::connect(&server.base_url(), "user", "pw", fast_timing())
            .await
            .unwrap();
        let text = client
            .query(&Coordinates::new(10.0, -5.0), 59000.0, 59100.0)
            .await
            .unwrap();

        assert_eq!(text, "MJD uJy duJy F chi/N\n59000.0 10 5 o 1.0\n");
        auth.assert_async().await;
        queue.assert_async().await;
        task.assert_async().await;
    }

    #[tokio::test]
    async fn test_finished_task_without_result_is_empty() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api-token-auth/");
                then.status(200).json_body(json!({"token": "abc"}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/queue/");
                then.status(201).json_body(json!({"url": server.url("/queue/2/")}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/queue/2/");
                then.status(200).json_body(json!({
                    "starttimestamp": "2024-01-01T00:00:00Z",
                    "finishtimestamp": "2024-01-01T00:01:00Z",
                    "result_url": null,
                }));
            })
            .await;

        let client = AtlasClient::connect(&server.base_url(), "user", "pw", fast_timing())
            .await
            .unwrap();
        let text = client
            .query(&Coordinates::new(10.0, -5.0), 59000.0, 59100.0)
            .await
            .unwrap();
        assert!(text.starts_with("MJD m dm uJy duJy F"));
        assert_eq!(text.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_rejected_queue_is_retried_then_fails() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api-token-auth/");
                then.status(200).json_body(json!({"token": "abc"}));
            })
            .await;
        let queue = server
            .mock_async(|when, then| {
                when.method(POST).path("/queue/");
                then.status(500).body("server error");
            })
            .await;

        let client = AtlasClient::connect(&server.base_url(), "user", "pw", fast_timing())
            .await
            .unwrap();
        let err = client
            .query(&Coordinates::new(10.0, -5.0), 59000.0, 59100.0)
            .await
            .unwrap_err();
        assert!(matches!(err, AtCleanError::AtlasError { status: 500, .. }));
        queue.assert_hits_async(2).await;
    }

    #[tokio::test]
    async fn test_bad_credentials() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api-token-auth/");
                then.status(400).json_body(json!({"non_field_errors": ["bad"]}));
            })
            .await;
        let result = AtlasClient::connect(&server.base_url(), "user", "wrong", fast_timing()).await;
        assert!(matches!(result, Err(AtCleanError::AtlasError { status: 400, .. })));
    }
}
