//! User-facing notifications.
//!
//! Two surfaces are tracked:
//! - short-lived toasts (send results, stream completion, warnings)
//! - a single persistent banner for conditions that need attention, such as
//!   a lost stream connection
//!
//! Nothing here is fatal; notifications are informational only.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::providers::sse::StreamStats;

/// Errors that can occur during notification operations.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// Notification not found.
    #[error("notification not found: {0}")]
    NotFound(String),

    /// Same category raised again too soon.
    #[error("notification rate limit exceeded for {0:?}")]
    RateLimited(NotificationCategory),
}

/// Result type for notification operations.
pub type NotificationResult<T> = Result<T, NotificationError>;

/// Visual severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Severity {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

impl Severity {
    /// Short tag used by the terminal painter.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "ok",
            Self::Warning => "warn",
            Self::Error => "error",
        }
    }
}

/// What a notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationCategory {
    /// The stream could not be established.
    ConnectionLost,
    /// Progress message from the stream.
    StreamStatus,
    /// The stream delivered its summary.
    StreamComplete,
    /// An email was sent.
    EmailSent,
    /// Sending an email failed.
    SendFailed,
    /// Remote settings could not be loaded.
    SettingsUnavailable,
}

/// A notification to show.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Unique identifier.
    pub id: String,
    pub category: NotificationCategory,
    pub severity: Severity,
    pub title: String,
    pub body: Option<String>,
    /// Auto-dismiss after this duration; `None` keeps it until dismissed.
    pub auto_dismiss: Option<Duration>,
}

impl Notification {
    /// Creates a toast that dismisses itself after five seconds.
    pub fn new(category: NotificationCategory, title: impl Into<String>) -> Self {
        Self {
            id: format!("notif-{}", uuid::Uuid::new_v4()),
            category,
            severity: Severity::Info,
            title: title.into(),
            body: None,
            auto_dismiss: Some(Duration::from_secs(5)),
        }
    }

    /// Sets the body text.
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Sets the severity.
    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Sets auto-dismiss duration.
    pub fn dismiss_after(mut self, duration: Duration) -> Self {
        self.auto_dismiss = Some(duration);
        self
    }

    /// Disables auto-dismiss.
    pub fn persistent(mut self) -> Self {
        self.auto_dismiss = None;
        self
    }

    /// Returns true if this should be shown as the banner rather than a toast.
    pub fn is_banner(&self) -> bool {
        self.auto_dismiss.is_none()
    }

    /// Banner shown when retries are exhausted.
    pub fn connection_lost(attempts: u32, last_error: &str) -> Self {
        Self::new(
            NotificationCategory::ConnectionLost,
            format!("Connection lost after {attempts} attempts"),
        )
        .body(format!("{last_error}. Use `reconnect` to try again."))
        .severity(Severity::Error)
        .persistent()
    }

    /// Progress toast from a `status` event.
    pub fn stream_status(message: &str) -> Self {
        Self::new(NotificationCategory::StreamStatus, message).dismiss_after(Duration::from_secs(3))
    }

    /// Toast for the stream's terminal summary.
    pub fn stream_complete(stats: &StreamStats) -> Self {
        let title = match stats.total {
            0 => "No emails to analyze".to_string(),
            1 => "1 email loaded".to_string(),
            n => format!("{n} emails loaded"),
        };
        Self::new(NotificationCategory::StreamComplete, title)
            .body(format!(
                "{} analyzed, {} from cache",
                stats.processed, stats.cached
            ))
            .severity(Severity::Success)
    }

    /// Toast for a successful send.
    pub fn email_sent(sent_via: Option<&str>) -> Self {
        let notification = Self::new(NotificationCategory::EmailSent, "Email sent")
            .severity(Severity::Success)
            .dismiss_after(Duration::from_secs(3));
        match sent_via {
            Some(via) => notification.body(format!("via {via}")),
            None => notification,
        }
    }

    /// Toast for a failed send; the compose form is kept.
    pub fn send_failed(message: &str) -> Self {
        Self::new(NotificationCategory::SendFailed, "Failed to send email")
            .body(message)
            .severity(Severity::Error)
            .dismiss_after(Duration::from_secs(8))
    }

    /// Warning when remote settings fall back to defaults.
    pub fn settings_unavailable(message: &str) -> Self {
        Self::new(
            NotificationCategory::SettingsUnavailable,
            "Using default settings",
        )
        .body(message)
        .severity(Severity::Warning)
        .dismiss_after(Duration::from_secs(10))
    }
}

#[derive(Debug, Clone)]
struct Shown {
    notification: Notification,
    shown_at: Instant,
}

impl Shown {
    fn expired(&self, now: Instant) -> bool {
        self.notification
            .auto_dismiss
            .is_some_and(|after| now.duration_since(self.shown_at) >= after)
    }
}

/// Settings for notification behavior.
#[derive(Debug, Clone)]
pub struct NotificationSettings {
    /// Maximum toasts kept at once; the oldest is dropped first.
    pub max_visible: usize,
    /// Minimum time between toasts of the same category.
    pub rate_limit: Duration,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            max_visible: 5,
            rate_limit: Duration::from_millis(500),
        }
    }
}

/// Tracks the banner and active toasts.
#[derive(Debug)]
pub struct NotificationService {
    settings: NotificationSettings,
    banner: Option<Notification>,
    toasts: VecDeque<Shown>,
    last_by_category: HashMap<NotificationCategory, Instant>,
}

impl NotificationService {
    /// Creates a new notification service.
    pub fn new(settings: NotificationSettings) -> Self {
        Self {
            settings,
            banner: None,
            toasts: VecDeque::new(),
            last_by_category: HashMap::new(),
        }
    }

    /// Shows a notification and returns its id.
    ///
    /// Persistent notifications replace the banner and are never rate
    /// limited.
    pub fn notify(&mut self, notification: Notification) -> NotificationResult<String> {
        let id = notification.id.clone();
        let now = Instant::now();

        if notification.is_banner() {
            tracing::info!(title = %notification.title, "Showing banner");
            self.banner = Some(notification);
            return Ok(id);
        }

        if let Some(last) = self.last_by_category.get(&notification.category) {
            if now.duration_since(*last) < self.settings.rate_limit {
                return Err(NotificationError::RateLimited(notification.category));
            }
        }

        tracing::debug!(title = %notification.title, severity = notification.severity.tag(), "Showing toast");
        self.last_by_category.insert(notification.category, now);
        self.toasts.push_back(Shown {
            notification,
            shown_at: now,
        });
        while self.toasts.len() > self.settings.max_visible {
            self.toasts.pop_front();
        }
        Ok(id)
    }

    /// Current banner, if any.
    pub fn banner(&self) -> Option<&Notification> {
        self.banner.as_ref()
    }

    /// Removes the banner.
    pub fn clear_banner(&mut self) {
        self.banner = None;
    }

    /// Dismisses a toast or the banner by id.
    pub fn dismiss(&mut self, id: &str) -> NotificationResult<()> {
        if self.banner.as_ref().is_some_and(|b| b.id == id) {
            self.banner = None;
            return Ok(());
        }
        let before = self.toasts.len();
        self.toasts.retain(|t| t.notification.id != id);
        if self.toasts.len() == before {
            return Err(NotificationError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Drops expired toasts.
    pub fn cleanup(&mut self) {
        let now = Instant::now();
        self.toasts.retain(|t| !t.expired(now));
    }

    /// Toasts that have not expired, oldest first.
    pub fn active_toasts(&self) -> Vec<&Notification> {
        let now = Instant::now();
        self.toasts
            .iter()
            .filter(|t| !t.expired(now))
            .map(|t| &t.notification)
            .collect()
    }
}

impl Default for NotificationService {
    fn default() -> Self {
        Self::new(NotificationSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unlimited() -> NotificationService {
        NotificationService::new(NotificationSettings {
            max_visible: 3,
            rate_limit: Duration::ZERO,
        })
    }

    #[test]
    fn builders_set_fields() {
        let notif = Notification::new(NotificationCategory::StreamStatus, "Loading")
            .body("step 1")
            .severity(Severity::Warning);

        assert_eq!(notif.title, "Loading");
        assert_eq!(notif.body.as_deref(), Some("step 1"));
        assert_eq!(notif.severity, Severity::Warning);
        assert!(notif.id.starts_with("notif-"));
        assert!(!notif.is_banner());
    }

    #[test]
    fn connection_lost_is_a_banner() {
        let notif = Notification::connection_lost(3, "HTTP 502");
        assert!(notif.is_banner());
        assert_eq!(notif.title, "Connection lost after 3 attempts");
        assert!(notif.body.unwrap().contains("HTTP 502"));
    }

    #[test]
    fn stream_complete_counts() {
        let stats = StreamStats {
            processed: 4,
            cached: 6,
            total: 10,
        };
        let notif = Notification::stream_complete(&stats);
        assert_eq!(notif.title, "10 emails loaded");
        assert_eq!(notif.body.as_deref(), Some("4 analyzed, 6 from cache"));
    }

    #[tokio::test(start_paused = true)]
    async fn banner_is_separate_from_toasts() {
        let mut service = unlimited();
        service.notify(Notification::email_sent(Some("gmail"))).unwrap();
        let banner_id = service
            .notify(Notification::connection_lost(3, "boom"))
            .unwrap();

        assert_eq!(service.active_toasts().len(), 1);
        assert_eq!(service.banner().map(|b| b.id.as_str()), Some(banner_id.as_str()));

        service.dismiss(&banner_id).unwrap();
        assert!(service.banner().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn toasts_expire() {
        let mut service = unlimited();
        service.notify(Notification::email_sent(None)).unwrap();
        service.notify(Notification::send_failed("nope")).unwrap();

        tokio::time::advance(Duration::from_secs(4)).await;
        let active: Vec<_> = service.active_toasts().iter().map(|n| n.category).collect();
        assert_eq!(active, vec![NotificationCategory::SendFailed]);

        tokio::time::advance(Duration::from_secs(5)).await;
        service.cleanup();
        assert!(service.active_toasts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn same_category_is_rate_limited() {
        let mut service = NotificationService::default();
        service.notify(Notification::stream_status("one")).unwrap();
        assert!(matches!(
            service.notify(Notification::stream_status("two")),
            Err(NotificationError::RateLimited(NotificationCategory::StreamStatus))
        ));

        tokio::time::advance(Duration::from_secs(1)).await;
        service.notify(Notification::stream_status("three")).unwrap();
        assert_eq!(service.active_toasts().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn oldest_toast_is_dropped_past_the_limit() {
        let mut service = unlimited();
        for i in 0..4 {
            service
                .notify(Notification::stream_status(&format!("step {i}")))
                .unwrap();
        }
        let titles: Vec<_> = service.active_toasts().iter().map(|n| n.title.clone()).collect();
        assert_eq!(titles, vec!["step 1", "step 2", "step 3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn dismissing_unknown_id_fails() {
        let mut service = unlimited();
        assert!(matches!(
            service.dismiss("notif-missing"),
            Err(NotificationError::NotFound(_))
        ));
    }
}
