use miette::Diagnostic;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// How often and how quickly failed requests are retried. Only failures that
/// plausibly resolve themselves (timeouts, connection resets, 5xx responses)
/// are retried; everything else surfaces immediately.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total number of attempts per request.
    pub attempts: u32,

    /// Delay before the first retry; doubles on every further retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    fn delay(&self, retry: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(retry)
    }
}

/// Error performing a registry request.
#[derive(Debug, Error, Diagnostic)]
pub enum HttpError {
    /// The resource does not exist. Not retried.
    #[error("resource not found: {url}")]
    NotFound {
        /// The requested URL.
        url: Url,
    },

    /// The server answered with a non-retryable error status.
    #[error("request to {url} failed with status {status}")]
    Status {
        /// The requested URL.
        url: Url,
        /// The response status.
        status: StatusCode,
    },

    /// A network-level failure or server error that persisted through every
    /// retry attempt.
    #[error("transient failure requesting {url}, gave up after {attempts} attempts")]
    Transient {
        /// The requested URL.
        url: Url,
        /// How many attempts were made.
        attempts: u32,
        /// The last underlying error, if the failure was network-level.
        #[source]
        source: Option<reqwest::Error>,
    },

    /// The request could not be performed at all.
    #[error("failed to request {url}")]
    Request {
        /// The requested URL.
        url: Url,
        /// The underlying error.
        #[source]
        source: reqwest::Error,
    },

    /// The response body could not be read or decoded.
    #[error("malformed response from {url}")]
    Malformed {
        /// The requested URL.
        url: Url,
        /// The underlying error.
        #[source]
        source: reqwest::Error,
    },
}

impl HttpError {
    /// True when the error means "this resource does not exist" rather than
    /// "something went wrong talking to the registry".
    pub fn is_not_found(&self) -> bool {
        matches!(self, HttpError::NotFound { .. })
    }
}

/// A thin, retrying wrapper around the HTTP client. All registry traffic
/// goes through here so that retry behavior and error classification are
/// uniform across callers.
#[derive(Debug, Clone)]
pub struct Http {
    client: Client,
    retries: RetryPolicy,
}

impl Http {
    /// Constructs a new instance.
    pub fn new(client: Client, retries: RetryPolicy) -> Self {
        Self { client, retries }
    }

    /// Performs a GET request, retrying transient failures per the
    /// [`RetryPolicy`].
    pub async fn get(&self, url: Url, accept: Option<&str>) -> Result<Response, HttpError> {
        let mut last_transient: Option<reqwest::Error> = None;

        for attempt in 0..self.retries.attempts {
            if attempt > 0 {
                let delay = self.retries.delay(attempt - 1);
                tracing::debug!(url=%url, attempt, ?delay, "retrying request");
                tokio::time::sleep(delay).await;
            }

            let mut request = self.client.get(url.clone());
            if let Some(accept) = accept {
                request = request.header(reqwest::header::ACCEPT, accept);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    if status == StatusCode::NOT_FOUND {
                        return Err(HttpError::NotFound { url });
                    }
                    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                        tracing::debug!(url=%url, %status, "server error, will retry");
                        last_transient = None;
                        continue;
                    }
                    return Err(HttpError::Status { url, status });
                }
                Err(e) if e.is_timeout() || e.is_connect() || e.is_body() => {
                    tracing::debug!(url=%url, error=%e, "network error, will retry");
                    last_transient = Some(e);
                }
                Err(e) => return Err(HttpError::Request { url, source: e }),
            }
        }

        Err(HttpError::Transient {
            url,
            attempts: self.retries.attempts,
            source: last_transient,
        })
    }

    /// Performs a GET request and decodes the response body as JSON.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        accept: Option<&str>,
    ) -> Result<T, HttpError> {
        let response = self.get(url.clone(), accept).await?;
        response
            .json()
            .await
            .map_err(|e| HttpError::Malformed { url, source: e })
    }

    /// Performs a GET request and returns the raw response body.
    pub async fn get_bytes(&self, url: Url) -> Result<Vec<u8>, HttpError> {
        let response = self.get(url.clone(), None).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| HttpError::Malformed { url, source: e })?;
        Ok(bytes.to_vec())
    }
}
