//! REST client for the backend's settings and send-email endpoints.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::config::{ConfigError, ServerSettings};
use crate::domain::EmailId;

/// Errors that can occur during REST calls.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {status} - {message}")]
    Status { status: u16, message: String },

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("Server rejected the request: {0}")]
    Rejected(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for REST calls.
pub type ApiResult<T> = Result<T, ApiError>;

fn default_days_to_analyze() -> u32 {
    7
}

/// Settings the backend exposes to the client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteSettings {
    #[serde(default)]
    pub email_preferences: EmailPreferences,
    #[serde(default)]
    pub ai_features: AiFeatures,
}

impl RemoteSettings {
    /// Colour configured for a custom category, if any.
    pub fn category_color(&self, name: &str) -> Option<&str> {
        self.ai_features
            .custom_categories
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .map(|c| c.color.as_str())
    }
}

/// Mailbox analysis preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailPreferences {
    /// How many days of mail the backend analyzes.
    #[serde(default = "default_days_to_analyze")]
    pub days_to_analyze: u32,
}

impl Default for EmailPreferences {
    fn default() -> Self {
        Self {
            days_to_analyze: default_days_to_analyze(),
        }
    }
}

/// AI feature configuration relevant to display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiFeatures {
    #[serde(default)]
    pub custom_categories: Vec<CustomCategory>,
}

/// A user-defined category and its display colour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomCategory {
    pub name: String,
    #[serde(default)]
    pub color: String,
}

/// Outgoing email form, also the send-email request body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeForm {
    pub to: String,
    #[serde(default)]
    pub cc: String,
    pub subject: String,
    pub content: String,
    /// Email being replied to, if any.
    pub original_email_id: Option<EmailId>,
}

impl ComposeForm {
    /// Creates a reply form addressed to the original sender.
    pub fn reply_to(original: &crate::domain::Email) -> Self {
        let subject = if original.subject.to_ascii_lowercase().starts_with("re:") {
            original.subject.clone()
        } else {
            format!("Re: {}", original.subject)
        };
        Self {
            to: original.sender_address().email,
            cc: String::new(),
            subject,
            content: String::new(),
            original_email_id: Some(original.id.clone()),
        }
    }
}

/// Response from the send-email endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    /// Transport the backend used, e.g. `gmail` or `smtp`.
    #[serde(default)]
    pub sent_via: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Backend REST operations used by the client.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MailApi: Send + Sync {
    /// Fetches the user's settings.
    async fn fetch_settings(&self) -> ApiResult<RemoteSettings>;

    /// Sends an email; succeeds only if the backend reports success.
    async fn send_email(&self, form: &ComposeForm) -> ApiResult<SendResponse>;
}

/// [`MailApi`] over HTTP.
pub struct HttpMailApi {
    client: reqwest::Client,
    settings_url: Url,
    send_url: Url,
}

impl HttpMailApi {
    /// Creates a client for the configured server.
    pub fn new(server: &ServerSettings) -> ApiResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(server.request_timeout())
            .build()?;
        Ok(Self {
            client,
            settings_url: server.endpoint(&server.settings_path)?,
            send_url: server.endpoint(&server.send_path)?,
        })
    }

    /// Overrides the HTTP client (useful for custom timeouts or proxies).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn build_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers
    }

    async fn handle_error_response(response: reqwest::Response) -> ApiError {
        let status = response.status().as_u16();
        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body
                .message
                .or(body.error)
                .unwrap_or_else(|| format!("HTTP {}", status)),
            Err(_) => format!("HTTP {}", status),
        };
        ApiError::Status { status, message }
    }
}

#[async_trait]
impl MailApi for HttpMailApi {
    async fn fetch_settings(&self) -> ApiResult<RemoteSettings> {
        let response = self
            .client
            .get(self.settings_url.clone())
            .headers(Self::build_headers())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::handle_error_response(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse settings: {}", e)))
    }

    async fn send_email(&self, form: &ComposeForm) -> ApiResult<SendResponse> {
        tracing::debug!(to = %form.to, subject = %form.subject, "Sending email");

        let response = self
            .client
            .post(self.send_url.clone())
            .headers(Self::build_headers())
            .json(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::handle_error_response(response).await);
        }

        let body: SendResponse = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse send result: {}", e)))?;

        check_send_response(body)
    }
}

/// Turns a well-formed but unsuccessful send result into an error.
fn check_send_response(body: SendResponse) -> ApiResult<SendResponse> {
    if body.success {
        Ok(body)
    } else {
        Err(ApiError::Rejected(
            body.message
                .unwrap_or_else(|| "send failed without a reason".to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Email;
    use chrono::Utc;

    #[test]
    fn remote_settings_parsing() {
        let json = r##"{
            "email_preferences": {"days_to_analyze": 14},
            "ai_features": {"custom_categories": [{"name": "Invoices", "color": "#ff8800"}]},
            "theme": "dark"
        }"##;
        let settings: RemoteSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.email_preferences.days_to_analyze, 14);
        assert_eq!(settings.category_color("invoices"), Some("#ff8800"));
        assert_eq!(settings.category_color("Travel"), None);
    }

    #[test]
    fn remote_settings_defaults_when_sections_missing() {
        let settings: RemoteSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.email_preferences.days_to_analyze, 7);
        assert!(settings.ai_features.custom_categories.is_empty());
    }

    #[test]
    fn compose_form_serializes_request_shape() {
        let form = ComposeForm {
            to: "ada@example.com".to_string(),
            cc: String::new(),
            subject: "Hi".to_string(),
            content: "Hello".to_string(),
            original_email_id: Some(EmailId::from("m-1")),
        };
        let json: serde_json::Value = serde_json::to_value(&form).unwrap();
        assert_eq!(json["to"], "ada@example.com");
        assert_eq!(json["original_email_id"], "m-1");
        assert_eq!(json["cc"], "");
    }

    #[test]
    fn reply_form_prefixes_subject_once() {
        let mut original = Email::new("m-1", Utc::now());
        original.sender = "Ada <ada@example.com>".to_string();
        original.subject = "Lunch".to_string();

        let form = ComposeForm::reply_to(&original);
        assert_eq!(form.to, "ada@example.com");
        assert_eq!(form.subject, "Re: Lunch");

        original.subject = "RE: Lunch".to_string();
        assert_eq!(ComposeForm::reply_to(&original).subject, "RE: Lunch");
    }

    #[test]
    fn unsuccessful_send_is_rejected() {
        let body = SendResponse {
            success: false,
            message: Some("quota exceeded".to_string()),
            sent_via: None,
        };
        assert!(matches!(
            check_send_response(body),
            Err(ApiError::Rejected(msg)) if msg == "quota exceeded"
        ));
    }

    #[test]
    fn successful_send_passes_through() {
        let body: SendResponse =
            serde_json::from_str(r#"{"success": true, "message": "ok", "sent_via": "gmail"}"#)
                .unwrap();
        let result = check_send_response(body).unwrap();
        assert_eq!(result.sent_via.as_deref(), Some("gmail"));
    }

    #[test]
    fn client_resolves_endpoints() {
        let api = HttpMailApi::new(&ServerSettings::default()).unwrap();
        assert_eq!(api.settings_url.path(), "/api/settings");
        assert_eq!(api.send_url.path(), "/api/send-email");
    }
}
