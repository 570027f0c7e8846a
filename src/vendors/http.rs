use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::time::Duration;

use crate::retry::{self, RetryPolicy};
use crate::vendors::error::{VendorError, VendorResult};

/// Shared HTTP client for vendor adapters: bounded timeout, retry with
/// jittered backoff on transient failures, and canonical error translation.
///
/// Only transport-level problems are retried here (connect errors, timeouts,
/// 429 and 5xx). A 4xx is the vendor telling us the request is wrong; it
/// surfaces immediately. A 409 means the vendor already holds this reference
/// and is mapped to `VendorError::Duplicate` so adapters can answer with a
/// `Pending` outcome instead of an error.
#[derive(Clone)]
pub struct VendorHttpClient {
    client: Client,
    vendor: &'static str,
    timeout: Duration,
    policy: RetryPolicy,
}

impl VendorHttpClient {
    pub fn new(vendor: &'static str, timeout: Duration, max_attempts: u32) -> VendorResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VendorError::Network {
                vendor: vendor.to_string(),
                message: format!("failed to initialise HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            vendor,
            timeout,
            policy: RetryPolicy::new(
                max_attempts,
                Duration::from_millis(500),
                Duration::from_secs(8),
            ),
        })
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        headers: &[(&str, String)],
        reference: Option<&str>,
    ) -> VendorResult<T> {
        self.request_json(Method::GET, url, headers, None, reference)
            .await
    }

    pub async fn post_json<T: DeserializeOwned>(
        &self,
        url: &str,
        headers: &[(&str, String)],
        body: &JsonValue,
        reference: Option<&str>,
    ) -> VendorResult<T> {
        self.request_json(Method::POST, url, headers, Some(body), reference)
            .await
    }

    async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        headers: &[(&str, String)],
        body: Option<&JsonValue>,
        reference: Option<&str>,
    ) -> VendorResult<T> {
        retry::with_backoff(self.policy, VendorError::is_retryable, || {
            self.attempt(method.clone(), url, headers, body, reference)
        })
        .await
    }

    async fn attempt<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        headers: &[(&str, String)],
        body: Option<&JsonValue>,
        reference: Option<&str>,
    ) -> VendorResult<T> {
        let mut request = self.client.request(method, url);
        for (name, value) in headers {
            request = request.header(*name, value.as_str());
        }
        if let Some(payload) = body {
            request = request.json(payload);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                VendorError::Timeout {
                    vendor: self.vendor.to_string(),
                    timeout_secs: self.timeout.as_secs(),
                }
            } else {
                VendorError::Network {
                    vendor: self.vendor.to_string(),
                    message: format!("request failed: {}", e),
                }
            }
        })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if status.is_success() {
            return serde_json::from_str::<T>(&text).map_err(|e| VendorError::Upstream {
                vendor: self.vendor.to_string(),
                message: format!("invalid JSON response: {}", e),
                vendor_code: None,
                retryable: false,
            });
        }

        match status {
            StatusCode::CONFLICT => Err(VendorError::Duplicate {
                vendor: self.vendor.to_string(),
                reference: reference.unwrap_or_default().to_string(),
            }),
            StatusCode::TOO_MANY_REQUESTS => Err(VendorError::RateLimit {
                vendor: self.vendor.to_string(),
                retry_after_seconds: None,
            }),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(VendorError::Authentication {
                vendor: self.vendor.to_string(),
                message: format!("HTTP {}: {}", status, text),
            }),
            _ => Err(VendorError::Upstream {
                vendor: self.vendor.to_string(),
                message: format!("HTTP {}: {}", status, text),
                vendor_code: Some(status.as_u16().to_string()),
                retryable: status.is_server_error(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_builds_with_defaults() {
        let client = VendorHttpClient::new("vtpass", Duration::from_secs(5), 2);
        assert!(client.is_ok());
    }
}
