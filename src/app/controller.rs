//! Page controller.
//!
//! The [`PageController`] drives the page on a single task. It selects over
//! transport events, store render requests, connection state changes, the
//! debounce timer and external commands. Stream events mutate the store;
//! the store's render requests feed the debouncer; the debouncer triggers
//! one paint per burst.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;

use super::commands::Command;
use super::state::PageState;
use crate::config::Settings;
use crate::domain::EmailId;
use crate::providers::sse::{CachedPayload, StreamEvent};
use crate::providers::{MailApi, RemoteSettings};
use crate::services::{
    ConnectionManager, Debouncer, DetailError, DetailLoader, Filters, Notification,
    NotificationError, NotificationService, NotificationSettings, ReconnectPolicy,
    StreamConnector, Termination, TransportEvent,
};
use crate::ui::{ListPainter, PageView};

/// Capacity of the transport event channel.
const EVENT_BUFFER: usize = 256;

/// Drives the list page.
pub struct PageController<P: ListPainter> {
    state: PageState,
    manager: ConnectionManager,
    api: Arc<dyn MailApi>,
    detail: DetailLoader,
    notifications: NotificationService,
    debouncer: Debouncer,
    painter: P,
    show_blocked_image_urls: bool,
}

impl<P: ListPainter> PageController<P> {
    /// Creates a controller; nothing connects until [`run`](Self::run).
    pub fn new(
        settings: &Settings,
        remote: RemoteSettings,
        connector: Arc<dyn StreamConnector>,
        api: Arc<dyn MailApi>,
        painter: P,
    ) -> Self {
        Self {
            state: PageState::new(settings, remote),
            manager: ConnectionManager::new(connector, ReconnectPolicy::from(&settings.stream)),
            api,
            detail: DetailLoader::new(&settings.detail, settings.render.width),
            notifications: NotificationService::new(NotificationSettings::default()),
            debouncer: Debouncer::new(settings.render.debounce(), settings.render.max_wait()),
            painter,
            show_blocked_image_urls: settings.privacy.show_blocked_image_urls,
        }
    }

    /// Read access to the page state.
    pub fn state(&self) -> &PageState {
        &self.state
    }

    /// Read access to notifications.
    pub fn notifications(&self) -> &NotificationService {
        &self.notifications
    }

    /// Queues a notification for the next paint.
    pub fn notify(&mut self, notification: Notification) {
        self.show(notification);
        self.debouncer.request();
    }

    /// Runs until [`Command::Shutdown`], or until the command channel has
    /// closed and the stream has finished.
    ///
    /// Returns the final page state.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) -> Result<PageState> {
        let mut render_rx = self.state.store.subscribe();
        let mut connection_rx = self.manager.subscribe();
        let mut events_rx = self.connect();
        let mut events_open = true;
        let mut commands_open = true;

        while events_open || commands_open {
            let deadline = self.debouncer.deadline();
            tokio::select! {
                event = events_rx.recv(), if events_open => match event {
                    Some(event) => self.handle_transport(event),
                    None => events_open = false,
                },
                Ok(()) = render_rx.changed() => {
                    self.debouncer.request();
                }
                Ok(()) = connection_rx.changed() => {
                    self.state.connection = *connection_rx.borrow_and_update();
                    self.debouncer.request();
                }
                _ = tokio::time::sleep_until(deadline), if self.debouncer.is_pending() => {
                    self.paint().await;
                }
                command = commands.recv(), if commands_open => match command {
                    None => commands_open = false,
                    Some(Command::Shutdown) => break,
                    Some(Command::Reconnect) => {
                        events_rx = self.connect();
                        events_open = true;
                    }
                    Some(command) => self.handle_command(command).await,
                },
            }
        }

        self.manager.close();
        if self.debouncer.is_pending() {
            self.paint().await;
        }
        tracing::info!(emails = self.state.store.len(), "Page controller stopped");
        Ok(self.state)
    }

    fn connect(&mut self) -> mpsc::Receiver<TransportEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        self.notifications.clear_banner();
        self.manager.connect(tx);
        rx
    }

    /// Applies one transport event to the page.
    fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Event(event) => self.handle_stream_event(event),
            TransportEvent::ConnectionLost {
                attempts,
                last_error,
            } => {
                self.show(Notification::connection_lost(attempts, &last_error));
                self.debouncer.request();
            }
            TransportEvent::Finished(Termination::Closed { message }) => {
                if let Some(message) = message {
                    self.state.status = Some(message);
                }
                self.debouncer.request();
            }
            TransportEvent::Finished(Termination::Completed) => {
                tracing::debug!("Stream finished");
            }
        }
    }

    fn handle_stream_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Connected => {
                self.notifications.clear_banner();
                self.state.status = Some("Connected".to_string());
                self.debouncer.request();
            }
            StreamEvent::Status { message } => {
                self.show(Notification::stream_status(&message));
                self.state.status = Some(message);
                self.debouncer.request();
            }
            StreamEvent::Cached(CachedPayload {
                emails,
                replace_previous,
                filtered_count,
            }) => {
                if replace_previous {
                    self.state.store.clear_all();
                    self.state.detail_stale = self.state.selection.is_some();
                }
                let outcome = self.state.store.add_many(emails, true);
                self.state.note_merge(&outcome);
                tracing::info!(
                    inserted = outcome.inserted,
                    updated = outcome.updated.len(),
                    filtered = ?filtered_count,
                    "Loaded cached emails"
                );
            }
            StreamEvent::Email(email) => {
                let is_analyzed = email.is_analyzed;
                let outcome = self.state.store.add_many([*email], is_analyzed);
                self.state.note_merge(&outcome);
                if outcome.skipped > 0 {
                    tracing::debug!("Ignored unanalyzed copy of an analyzed email");
                }
            }
            StreamEvent::Batch { emails } => {
                let outcome = self.state.store.add_many(emails, true);
                self.state.note_merge(&outcome);
                tracing::debug!(
                    inserted = outcome.inserted,
                    updated = outcome.updated.len(),
                    evicted = outcome.evicted.len(),
                    "Merged batch"
                );
            }
            StreamEvent::Stats(stats) => {
                self.show(Notification::stream_complete(&stats));
                self.state.stats = Some(stats);
                self.debouncer.request();
            }
            // The transport turns these into terminations.
            StreamEvent::Close { .. } | StreamEvent::Error { .. } => {}
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Select(id) => self.select(id).await,
            Command::Next => {
                if let Some(id) = self.state.next_id() {
                    self.select(id).await;
                }
            }
            Command::Previous => {
                if let Some(id) = self.state.previous_id() {
                    self.select(id).await;
                }
            }
            Command::Filter(change) => {
                self.state.filters = change.apply(std::mem::take(&mut self.state.filters));
                self.debouncer.request();
            }
            Command::SetFilters(filters) => {
                self.state.filters = filters;
                self.debouncer.request();
            }
            Command::ClearFilters => {
                self.state.filters = Filters::all();
                self.debouncer.request();
            }
            Command::Compose(form) => {
                self.state.compose = Some(form);
            }
            Command::Reply { content } => {
                if self.state.start_reply(content).is_none() {
                    tracing::warn!("Reply requested with no selected email");
                }
            }
            Command::Send => self.send().await,
            Command::DismissBanner => {
                self.notifications.clear_banner();
                self.debouncer.request();
            }
            // Handled by the run loop.
            Command::Reconnect | Command::Shutdown => {}
        }
    }

    /// Selects an email and loads its detail.
    ///
    /// An unknown id leaves both the selection and the detail pane as they were.
    async fn select(&mut self, id: EmailId) {
        match self.detail.load(&self.state.store, &id).await {
            Ok(view) => {
                self.state.selection = Some(id);
                self.state.detail = Some(view);
                self.state.detail_stale = false;
                self.debouncer.request();
            }
            Err(DetailError::NotFound(id)) => {
                tracing::warn!(id = %id, "Selected email is not in the store");
            }
            Err(e) => {
                tracing::warn!(id = %id, error = %e, "Failed to load email detail");
            }
        }
    }

    async fn send(&mut self) {
        let Some(form) = self.state.compose.as_ref() else {
            tracing::warn!("Send requested with nothing to send");
            return;
        };

        match self.api.send_email(form).await {
            Ok(response) => {
                tracing::info!(sent_via = ?response.sent_via, "Email sent");
                self.state.compose = None;
                self.show(Notification::email_sent(response.sent_via.as_deref()));
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to send email");
                self.show(Notification::send_failed(&e.to_string()));
            }
        }
        self.debouncer.request();
    }

    fn show(&mut self, notification: Notification) {
        match self.notifications.notify(notification) {
            Ok(_) => {}
            Err(NotificationError::RateLimited(category)) => {
                tracing::trace!(?category, "Notification rate limited");
            }
            Err(e) => tracing::debug!(error = %e, "Notification dropped"),
        }
    }

    /// Recomputes the list and paints it.
    async fn paint(&mut self) {
        let coalesced = self.debouncer.fire();
        tracing::trace!(coalesced, "Painting");

        if self.state.selection.is_some() && !self.state.selection_is_live() {
            tracing::debug!("Selected email was evicted");
            self.state.clear_selection();
        }
        self.state.refresh_visible();

        // Select the top entry on the first paint with content, and reload a
        // detail whose record was replaced since it was loaded.
        let reload = match &self.state.selection {
            None => self.state.visible.first().map(|e| e.id.clone()),
            Some(id) if self.state.detail_stale => Some(id.clone()),
            Some(_) => None,
        };
        if let Some(id) = reload {
            self.state.detail_stale = false;
            self.select(id).await;
            self.debouncer.fire();
            self.state.refresh_visible();
        }

        self.notifications.cleanup();
        let toasts = self.notifications.active_toasts();
        let view = PageView {
            connection: self.state.connection,
            status: self.state.status.as_deref(),
            stats: self.state.stats.as_ref(),
            entries: &self.state.visible,
            total: self.state.store.len(),
            filters: &self.state.filters,
            detail: self.state.detail.as_ref(),
            banner: self.notifications.banner(),
            toasts: &toasts,
            remote: &self.state.remote,
            show_blocked_image_urls: self.show_blocked_image_urls,
        };
        if let Err(e) = self.painter.paint(&view) {
            tracing::warn!(error = %e, "Paint failed");
        }
    }
}
