//! Shared plumbing for provider adapters: HTTP error translation, cost
//! arithmetic, and SSE line framing.

use orchestrator_core::{GatewayError, ProviderId, UsageUnits};
use reqwest::StatusCode;
use std::time::Duration;

/// Translate a transport-level failure into the shared vocabulary.
pub(crate) fn map_transport_error(
    provider: &ProviderId,
    error: &reqwest::Error,
    read_timeout: Duration,
) -> GatewayError {
    if error.is_timeout() {
        GatewayError::timeout(provider.clone(), read_timeout)
    } else if error.is_connect() {
        GatewayError::provider_internal(
            provider.clone(),
            format!("connection failed: {error}"),
            None,
        )
    } else {
        GatewayError::provider_internal(provider.clone(), error.to_string(), None)
    }
}

/// Translate a non-success HTTP status into the shared vocabulary.
pub(crate) fn map_status_error(
    provider: &ProviderId,
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
) -> GatewayError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            GatewayError::invalid_credentials(provider.clone())
        }
        StatusCode::TOO_MANY_REQUESTS => GatewayError::rate_limited(provider.clone(), retry_after),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            GatewayError::timeout(provider.clone(), Duration::ZERO)
        }
        status => GatewayError::provider_internal(
            provider.clone(),
            truncate(body, 200),
            Some(status.as_u16()),
        ),
    }
}

/// Parse a `Retry-After` header value (seconds form only).
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Cost in USD for the given usage at the adapter's configured rates.
pub(crate) fn cost_for_usage(units: UsageUnits, input_per_1k: f64, output_per_1k: f64) -> f64 {
    f64::from(units.input_tokens) / 1000.0 * input_per_1k
        + f64::from(units.output_tokens) / 1000.0 * output_per_1k
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_string()
    } else {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &text[..end])
    }
}

/// Incremental framer for `text/event-stream` bodies.
///
/// Feed raw bytes as they arrive; complete `data:` payloads come out. Event
/// names and comments are dropped, which is all the provider streams here
/// need.
#[derive(Debug, Default)]
pub(crate) struct SseFramer {
    buffer: String,
}

impl SseFramer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes, returning every completed `data:` payload.
    pub(crate) fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        let mut payloads = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = line.trim_end();
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim_start();
                if !data.is_empty() {
                    payloads.push(data.to_string());
                }
            }
        }
        payloads
    }
}
