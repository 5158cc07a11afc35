//! HTTP utilities for GCP REST API calls

use crate::error::{Error, Result};
use anyhow::Context;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Sanitize response body for logging
/// Truncates long responses and strips control characters
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let mut end = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..end], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// HTTP client wrapper for GCP API calls
#[derive(Clone)]
pub struct GcpHttpClient {
    client: Client,
}

impl GcpHttpClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("serego/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    pub async fn get(&self, url: &str, token: &str) -> Result<Value> {
        tracing::debug!("GET {}", url);
        self.send(self.client.get(url).bearer_auth(token)).await
    }

    pub async fn post(&self, url: &str, token: &str, body: Option<&Value>) -> Result<Value> {
        tracing::debug!("POST {}", url);
        let mut request = self.client.post(url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }
        self.send(request).await
    }

    pub async fn patch(&self, url: &str, token: &str, body: &Value) -> Result<Value> {
        tracing::debug!("PATCH {}", url);
        self.send(self.client.patch(url).bearer_auth(token).json(body))
            .await
    }

    pub async fn delete(&self, url: &str, token: &str) -> Result<Value> {
        tracing::debug!("DELETE {}", url);
        self.send(self.client.delete(url).bearer_auth(token)).await
    }

    /// Send a request and map the response status onto registry errors
    async fn send(&self, request: RequestBuilder) -> Result<Value> {
        let response = request.send().await.context("Failed to send request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        match status {
            StatusCode::NOT_FOUND => return Err(Error::NotFound),
            StatusCode::CONFLICT => return Err(Error::AlreadyExists),
            _ => {}
        }

        if !status.is_success() {
            // Security: Only log sanitized/truncated error body to avoid leaking sensitive data
            tracing::error!("API error: {} - {}", status, sanitize_for_log(&body));
            return Err(anyhow::anyhow!("API request failed: {}", status).into());
        }

        if body.is_empty() {
            return Ok(Value::Null);
        }

        Ok(serde_json::from_str(&body).context("Failed to parse response JSON")?)
    }
}

/// Format an error for display on the command line
/// Security: Sanitizes error messages to avoid leaking sensitive API details
pub fn format_gcp_error(error: &anyhow::Error) -> String {
    if let Some(err) = error.downcast_ref::<Error>() {
        if err.is_not_found() || err.is_precondition() || err.is_context_done() {
            return err.to_string();
        }
        match err {
            Error::AlreadyExists => return "Resource already exists.".to_string(),
            Error::OperationFailed(_) | Error::InvalidRecord { .. } => return err.to_string(),
            _ => {}
        }
    }

    let error_str = error.to_string();

    if error_str.contains("403") {
        return "Permission denied. Check your GCP IAM permissions.".to_string();
    }
    if error_str.contains("401") {
        return "Authentication failed. Run 'gcloud auth application-default login'.".to_string();
    }
    if error_str.contains("429") {
        return "Rate limit exceeded. Please try again later.".to_string();
    }
    if error_str.contains("400") {
        return "Invalid request. Check your parameters.".to_string();
    }
    if error_str.contains("500") || error_str.contains("503") {
        return "GCP service temporarily unavailable. Please try again.".to_string();
    }

    // Security: Don't expose raw API error messages to users
    if error_str.contains("API request failed") {
        return "Request failed. Check your network connection and try again.".to_string();
    }

    let sanitized = error_str
        .chars()
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .take(80)
        .collect::<String>();

    if sanitized.len() < error_str.len() {
        format!("{}...", sanitized)
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_truncates_long_bodies() {
        let body = "x".repeat(500);
        let sanitized = sanitize_for_log(&body);
        assert!(sanitized.starts_with(&"x".repeat(MAX_LOG_BODY_LENGTH)));
        assert!(sanitized.contains("500 bytes total"));
    }

    #[test]
    fn test_sanitize_strips_control_characters() {
        assert_eq!(sanitize_for_log("bad\r\nbody\t!"), "badbody!");
    }

    #[test]
    fn test_format_registry_errors() {
        let err: anyhow::Error = Error::NamespaceNotFound.into();
        assert_eq!(format_gcp_error(&err), "namespace not found");

        let err: anyhow::Error = Error::AlreadyExists.into();
        assert_eq!(format_gcp_error(&err), "Resource already exists.");
    }

    #[test]
    fn test_format_transport_errors() {
        let err = anyhow::anyhow!("API request failed: 403 Forbidden");
        assert!(format_gcp_error(&err).starts_with("Permission denied"));

        let err = anyhow::anyhow!("API request failed: 418 I'm a teapot");
        assert!(format_gcp_error(&err).starts_with("Request failed"));
    }
}
