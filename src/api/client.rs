use std::time::Duration;

use rand::Rng;
use reqwest::{Client, Method};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::api::errors::{ApiError, ClientError};
use crate::api::rate_limiter::RateWindow;
use crate::models::AppConfig;

const TOKEN_HEADER: &str = "X-Finnhub-Token";
const MALFORMED_PREVIEW_CHARS: usize = 200;

/// Exponential backoff with additive jitter.
///
/// The sleep before retry `attempt` (1-based) is
/// `unit * (factor^attempt + uniform(0, jitter * factor^attempt))`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_factor: f64,
    pub jitter: f64,
    pub unit: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_factor: config.retry_backoff_factor,
            jitter: config.retry_jitter,
            unit: Duration::from_secs(1),
        }
    }

    /// Non-jittered part of the delay before retry `attempt`.
    pub fn backoff_component(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        self.unit.mul_f64(self.backoff_factor.powi(exponent))
    }

    pub fn delay<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.backoff_component(attempt);
        let max_jitter = base.as_secs_f64() * self.jitter;
        if max_jitter <= 0.0 {
            return base;
        }
        base + Duration::from_secs_f64(rng.gen_range(0.0..=max_jitter))
    }
}

enum Attempt {
    Success(Value),
    Retryable(ClientError),
    Fatal(ClientError),
}

/// The single chokepoint for outbound Finnhub calls: quota pacing,
/// retry with backoff, and translation of error responses.
pub struct FinnhubClient {
    http: Client,
    base_url: String,
    api_key: String,
    window: RateWindow,
    policy: RetryPolicy,
    default_timeout: Duration,
}

impl FinnhubClient {
    pub fn new(config: &AppConfig) -> Result<Self, ClientError> {
        let http = Client::builder().timeout(config.request_timeout()).build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.finnhub_api_key.clone(),
            window: RateWindow::new(config.rate_limit_rpm, config.rate_limit_period()),
            policy: RetryPolicy::from_config(config),
            default_timeout: config.request_timeout(),
        })
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get(&self, path: &str, params: &[(String, String)]) -> Result<Value, ClientError> {
        self.request(Method::GET, path, params, None).await
    }

    /// Perform one logical request, retrying transient failures.
    ///
    /// Every attempt takes a quota slot; backoff sleeps do not. HTTP 400, 401,
    /// 403 and 404 fail immediately. 429 and 5xx gateway statuses are retried
    /// up to `max_retries` times before surfacing as [`ClientError::Api`].
    /// Network failures are retried the same way and then surface as the
    /// original [`ClientError::Network`].
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        params: &[(String, String)],
        timeout: Option<Duration>,
    ) -> Result<Value, ClientError> {
        let path = normalize_path(path);
        let url = format!("{}{}", self.base_url, path);
        let timeout = timeout.unwrap_or(self.default_timeout);
        let mut attempt: u32 = 0;

        loop {
            self.window.acquire().await;

            let reason = match self.attempt(&method, &url, &path, params, timeout).await {
                Attempt::Success(value) => return Ok(value),
                Attempt::Fatal(err) => {
                    error!("Non-retryable failure for {}: {}", path, err);
                    return Err(err);
                }
                Attempt::Retryable(err) => err,
            };

            attempt += 1;
            if attempt > self.policy.max_retries {
                error!(
                    "Max retries ({}) exceeded for {}: {}",
                    self.policy.max_retries, path, reason
                );
                return Err(reason);
            }

            let delay = self.policy.delay(attempt, &mut rand::thread_rng());
            warn!(
                "Retry {}/{} for {} after {}, sleeping {:.2}s",
                attempt,
                self.policy.max_retries,
                path,
                reason.kind_name(),
                delay.as_secs_f64()
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt(
        &self,
        method: &Method,
        url: &str,
        path: &str,
        params: &[(String, String)],
        timeout: Duration,
    ) -> Attempt {
        debug!("Finnhub request: {} {} with {} params", method, path, params.len());

        let sent = self
            .http
            .request(method.clone(), url)
            .header(TOKEN_HEADER, &self.api_key)
            .query(params)
            .timeout(timeout)
            .send()
            .await;

        let response = match sent {
            Ok(response) => response,
            Err(err) => return Attempt::Retryable(ClientError::Network(err)),
        };

        let status = response.status().as_u16();
        let request_url = response.url().to_string();
        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => return Attempt::Retryable(ClientError::Network(err)),
        };

        if (200..300).contains(&status) {
            return match serde_json::from_str::<Value>(&body) {
                Ok(value) => Attempt::Success(value),
                Err(_) => Attempt::Fatal(ClientError::MalformedResponse {
                    endpoint: path.to_string(),
                    preview: body.chars().take(MALFORMED_PREVIEW_CHARS).collect(),
                }),
            };
        }

        let api_error = ApiError::from_response(status, request_url, params.to_vec(), &body);
        if api_error.is_retryable() {
            Attempt::Retryable(api_error.into())
        } else {
            Attempt::Fatal(api_error.into())
        }
    }
}

fn normalize_path(path: &str) -> String {
    format!("/{}", path.trim_start_matches('/'))
}
