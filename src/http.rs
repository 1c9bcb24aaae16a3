//! Shared blocking HTTP plumbing for the token endpoint and Cloud Code calls.

use std::time::Duration;

pub const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// Status and body of a completed request, whatever the status.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Agent that reports non-2xx statuses as replies so the provider's error body can be read.
pub fn agent() -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(HTTP_TIMEOUT))
        .http_status_as_error(false)
        .build()
        .into()
}

pub fn read_reply(
    mut response: ureq::http::Response<ureq::Body>,
) -> Result<HttpReply, ureq::Error> {
    let status = response.status().as_u16();
    let body = response.body_mut().read_to_string()?;
    Ok(HttpReply { status, body })
}

/// Pulls a human-readable message out of a Google-style error body.
///
/// Handles both `{"error": {"message", "status"}}` and the OAuth
/// `{"error": "...", "error_description": "..."}` shapes.
pub fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let error = value.get("error")?;
    if let Some(code) = error.as_str() {
        return Some(match value.get("error_description").and_then(|d| d.as_str()) {
            Some(desc) => format!("{}: {}", code, desc),
            None => code.to_string(),
        });
    }
    let message = error.get("message").and_then(|m| m.as_str());
    let status = error.get("status").and_then(|s| s.as_str());
    match (message, status) {
        (Some(m), Some(s)) => Some(format!("{} ({})", m, s)),
        (Some(m), None) => Some(m.to_string()),
        (None, Some(s)) => Some(s.to_string()),
        (None, None) => None,
    }
}
