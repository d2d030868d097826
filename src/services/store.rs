//! Bounded in-memory email store.
//!
//! The [`EmailStore`] is the only writer of email records. Every mutation
//! publishes a new generation number on a watch channel; the renderer
//! subscribes to it and coalesces bursts into one paint, so the store never
//! renders synchronously.

use std::collections::HashMap;

use tokio::sync::watch;

use crate::domain::{Email, EmailId};

/// What a bulk insert did to the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Records that were not present before.
    pub inserted: usize,
    /// Identifiers whose existing entry was replaced.
    pub updated: Vec<EmailId>,
    /// Records dropped to avoid regressing an analyzed entry.
    pub skipped: usize,
    /// Entries evicted to stay within the size bound, oldest first.
    pub evicted: Vec<EmailId>,
}

impl MergeOutcome {
    /// Returns true if the map changed.
    pub fn changed(&self) -> bool {
        self.inserted > 0 || !self.updated.is_empty() || !self.evicted.is_empty()
    }
}

/// Email records keyed by identifier, bounded in size.
#[derive(Debug)]
pub struct EmailStore {
    emails: HashMap<EmailId, Email>,
    max_emails: usize,
    generation: u64,
    render_tx: watch::Sender<u64>,
}

impl EmailStore {
    /// Creates an empty store holding at most `max_emails` records.
    pub fn new(max_emails: usize) -> Self {
        let (render_tx, _) = watch::channel(0);
        Self {
            emails: HashMap::new(),
            max_emails: max_emails.max(1),
            generation: 0,
            render_tx,
        }
    }

    /// Subscribes to render requests.
    ///
    /// The value is a generation counter that increases on every mutation.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.render_tx.subscribe()
    }

    /// Merges `records` into the store, marking each with `is_analyzed`.
    ///
    /// A record is skipped when the stored entry for its identifier is
    /// analyzed and the incoming one is not. Afterwards the oldest entries
    /// by date are evicted until the store is back within its bound.
    pub fn add_many(
        &mut self,
        records: impl IntoIterator<Item = Email>,
        is_analyzed: bool,
    ) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();

        for mut record in records {
            record.is_analyzed = is_analyzed;
            match self.emails.get(&record.id) {
                Some(existing) if existing.is_analyzed && !record.is_analyzed => {
                    tracing::trace!(id = %record.id, "Keeping analyzed record over placeholder");
                    outcome.skipped += 1;
                }
                Some(_) => {
                    outcome.updated.push(record.id.clone());
                    self.emails.insert(record.id.clone(), record);
                }
                None => {
                    self.emails.insert(record.id.clone(), record);
                    outcome.inserted += 1;
                }
            }
        }

        outcome.evicted = self.evict_oldest();
        if !outcome.evicted.is_empty() {
            tracing::debug!(
                count = outcome.evicted.len(),
                max = self.max_emails,
                "Evicted oldest emails"
            );
        }

        if outcome.changed() {
            self.request_render();
        }
        outcome
    }

    /// Looks up a record.
    pub fn get_by_id(&self, id: &EmailId) -> Option<&Email> {
        self.emails.get(id)
    }

    /// Removes a record, returning it if present.
    pub fn remove(&mut self, id: &EmailId) -> Option<Email> {
        let removed = self.emails.remove(id);
        if removed.is_some() {
            self.request_render();
        }
        removed
    }

    /// Removes every record.
    pub fn clear_all(&mut self) {
        if !self.emails.is_empty() {
            self.emails.clear();
            self.request_render();
        }
    }

    /// Number of records held.
    pub fn len(&self) -> usize {
        self.emails.len()
    }

    /// Returns true if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.emails.is_empty()
    }

    /// Iterates over all records in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Email> {
        self.emails.values()
    }

    /// Configured size bound.
    pub fn max_emails(&self) -> usize {
        self.max_emails
    }

    /// Current mutation generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn evict_oldest(&mut self) -> Vec<EmailId> {
        let excess = self.emails.len().saturating_sub(self.max_emails);
        if excess == 0 {
            return Vec::new();
        }

        let mut by_age: Vec<(chrono::DateTime<chrono::Utc>, &EmailId)> =
            self.emails.values().map(|e| (e.date, &e.id)).collect();
        by_age.sort_unstable();

        let victims: Vec<EmailId> = by_age
            .into_iter()
            .take(excess)
            .map(|(_, id)| id.clone())
            .collect();
        for id in &victims {
            self.emails.remove(id);
        }
        victims
    }

    fn request_render(&mut self) {
        self.generation += 1;
        self.render_tx.send_replace(self.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
    }

    fn email(id: &str, minutes: i64) -> Email {
        let mut email = Email::new(id, base() + Duration::minutes(minutes));
        email.subject = format!("subject {id}");
        email
    }

    #[test]
    fn inserts_and_looks_up() {
        let mut store = EmailStore::new(10);
        let outcome = store.add_many(vec![email("a", 0), email("b", 1)], true);

        assert_eq!(outcome.inserted, 2);
        assert_eq!(store.len(), 2);
        assert!(store.get_by_id(&EmailId::from("a")).unwrap().is_analyzed);
        assert!(store.get_by_id(&EmailId::from("zzz")).is_none());
    }

    #[test]
    fn analyzed_record_is_never_regressed() {
        let mut store = EmailStore::new(10);
        store.add_many(vec![email("a", 0)], false);

        let mut analyzed = email("a", 0);
        analyzed.summary = Some("analyzed".to_string());
        let outcome = store.add_many(vec![analyzed], true);
        assert_eq!(outcome.updated, vec![EmailId::from("a")]);

        let mut stale = email("a", 0);
        stale.summary = None;
        let outcome = store.add_many(vec![stale], false);
        assert_eq!(outcome.skipped, 1);
        assert!(!outcome.changed());

        let held = store.get_by_id(&EmailId::from("a")).unwrap();
        assert!(held.is_analyzed);
        assert_eq!(held.summary.as_deref(), Some("analyzed"));
    }

    #[test]
    fn analyzed_record_accepts_newer_analysis() {
        let mut store = EmailStore::new(10);
        store.add_many(vec![email("a", 0)], true);

        let mut newer = email("a", 0);
        newer.category = Some("Finance".to_string());
        store.add_many(vec![newer], true);

        assert_eq!(
            store.get_by_id(&EmailId::from("a")).unwrap().category.as_deref(),
            Some("Finance")
        );
    }

    #[test]
    fn placeholder_replaces_placeholder() {
        let mut store = EmailStore::new(10);
        store.add_many(vec![email("a", 0)], false);
        let outcome = store.add_many(vec![email("a", 5)], false);
        assert_eq!(outcome.updated.len(), 1);
        assert_eq!(store.get_by_id(&EmailId::from("a")).unwrap().date, base() + Duration::minutes(5));
    }

    #[test]
    fn evicts_single_oldest_when_one_over() {
        let mut store = EmailStore::new(500);
        let records: Vec<Email> = (0..501).map(|i| email(&format!("m{i}"), i + 1)).collect();
        // Oldest record arrives last to show eviction is by date, not insertion order.
        let mut shuffled = records[1..].to_vec();
        shuffled.push(email("oldest", -100));

        let outcome = store.add_many(shuffled, true);

        assert_eq!(store.len(), 500);
        assert_eq!(outcome.evicted, vec![EmailId::from("oldest")]);
        assert!(store.get_by_id(&EmailId::from("oldest")).is_none());
    }

    #[test]
    fn size_bound_holds_across_many_inserts() {
        let mut store = EmailStore::new(5);
        for round in 0..10 {
            let batch: Vec<Email> = (0..3)
                .map(|i| email(&format!("r{round}-{i}"), round * 10 + i))
                .collect();
            store.add_many(batch, true);
            assert!(store.len() <= 5);
        }

        // The five newest survive.
        let min_kept = store.iter().map(|e| e.date).min().unwrap();
        assert_eq!(min_kept, base() + Duration::minutes(81));
    }

    #[test]
    fn remove_and_clear() {
        let mut store = EmailStore::new(10);
        store.add_many(vec![email("a", 0), email("b", 1)], true);

        assert!(store.remove(&EmailId::from("a")).is_some());
        assert!(store.remove(&EmailId::from("a")).is_none());
        assert_eq!(store.len(), 1);

        store.clear_all();
        assert!(store.is_empty());
    }

    #[test]
    fn mutations_publish_render_requests() {
        let mut store = EmailStore::new(10);
        let rx = store.subscribe();
        assert_eq!(*rx.borrow(), 0);

        store.add_many(vec![email("a", 0)], true);
        assert_eq!(*rx.borrow(), 1);

        // A fully skipped merge changes nothing and requests nothing.
        store.add_many(vec![email("a", 0)], false);
        assert_eq!(*rx.borrow(), 1);

        store.remove(&EmailId::from("a"));
        assert_eq!(*rx.borrow(), 2);
        assert_eq!(store.generation(), 2);

        // Clearing an empty store is a no-op.
        store.clear_all();
        assert_eq!(store.generation(), 2);
    }

    #[test]
    fn zero_bound_is_clamped_to_one() {
        let mut store = EmailStore::new(0);
        store.add_many(vec![email("a", 0), email("b", 1)], true);
        assert_eq!(store.max_emails(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.get_by_id(&EmailId::from("b")).is_some());
    }
}
