//! Page state.
//!
//! Everything the page shows lives in one [`PageState`] owned by the
//! controller: the email store, selection, filters, connection state, the
//! compose form and the last rendered list.

use crate::config::Settings;
use crate::domain::EmailId;
use crate::providers::sse::StreamStats;
use crate::providers::{ComposeForm, RemoteSettings};
use crate::services::{
    compute_visible, ConnectionState, DetailView, EmailStore, Filters, ListEntry, MergeOutcome,
};

/// State for the list page.
#[derive(Debug)]
pub struct PageState {
    /// Bounded email cache.
    pub store: EmailStore,
    /// Selected email, if any.
    pub selection: Option<EmailId>,
    /// Active list filters.
    pub filters: Filters,
    /// Latest connection state.
    pub connection: ConnectionState,
    /// Latest progress message from the stream.
    pub status: Option<String>,
    /// Terminal summary, once received.
    pub stats: Option<StreamStats>,
    /// Outgoing email being edited.
    pub compose: Option<ComposeForm>,
    /// Settings fetched from the backend.
    pub remote: RemoteSettings,
    /// Detail pane contents.
    pub detail: Option<DetailView>,
    /// Set when the selected record changed after its detail was loaded.
    pub detail_stale: bool,
    /// List as of the last paint.
    pub visible: Vec<ListEntry>,
}

impl PageState {
    /// Creates an empty page.
    pub fn new(settings: &Settings, remote: RemoteSettings) -> Self {
        Self {
            store: EmailStore::new(settings.cache.max_emails),
            selection: None,
            filters: Filters::all(),
            connection: ConnectionState::Disconnected,
            status: None,
            stats: None,
            compose: None,
            remote,
            detail: None,
            detail_stale: false,
            visible: Vec::new(),
        }
    }

    /// Recomputes the visible list from the store.
    pub fn refresh_visible(&mut self) -> &[ListEntry] {
        self.visible = compute_visible(&self.store, self.selection.as_ref(), &self.filters);
        &self.visible
    }

    /// Position of the selection in the visible list.
    pub fn selected_index(&self) -> Option<usize> {
        let selected = self.selection.as_ref()?;
        self.visible.iter().position(|e| &e.id == selected)
    }

    /// Identifier after the selection, or the first entry if nothing is selected.
    pub fn next_id(&self) -> Option<EmailId> {
        let index = match self.selected_index() {
            Some(i) if i + 1 < self.visible.len() => i + 1,
            Some(i) => i,
            None => 0,
        };
        self.visible.get(index).map(|e| e.id.clone())
    }

    /// Identifier before the selection, or the first entry if nothing is selected.
    pub fn previous_id(&self) -> Option<EmailId> {
        let index = self.selected_index().map_or(0, |i| i.saturating_sub(1));
        self.visible.get(index).map(|e| e.id.clone())
    }

    /// Returns true if the selection is still in the store.
    pub fn selection_is_live(&self) -> bool {
        self.selection
            .as_ref()
            .is_some_and(|id| self.store.get_by_id(id).is_some())
    }

    /// Drops the selection and detail pane.
    pub fn clear_selection(&mut self) {
        self.selection = None;
        self.detail = None;
        self.detail_stale = false;
    }

    /// Marks the detail pane stale if a merge replaced the selected record.
    pub fn note_merge(&mut self, outcome: &MergeOutcome) {
        if let Some(selected) = &self.selection {
            if outcome.updated.contains(selected) {
                self.detail_stale = true;
            }
        }
    }

    /// Starts a reply to the selected email, keeping any typed content.
    pub fn start_reply(&mut self, content: Option<String>) -> Option<&ComposeForm> {
        let original = self.store.get_by_id(self.selection.as_ref()?)?;
        let mut form = ComposeForm::reply_to(original);
        if let Some(content) = content {
            form.content = content;
        }
        self.compose = Some(form);
        self.compose.as_ref()
    }
}
