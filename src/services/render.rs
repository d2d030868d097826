//! Visible-list computation and render debouncing.
//!
//! [`compute_visible`] is a pure function of the store, the selection and the
//! active [`Filters`]; painting the result is left to a
//! [`ListPainter`](crate::ui::ListPainter). The [`Debouncer`] turns a burst
//! of store mutations into a single paint.

use std::cmp::Ordering;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::store::EmailStore;
use crate::domain::{Email, EmailId, PriorityLevel};

/// Priority predicate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityFilter {
    #[default]
    Any,
    Equals(PriorityLevel),
}

/// Category predicate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryFilter {
    #[default]
    Any,
    /// Matches case-insensitively.
    Equals(String),
}

/// Needs-action predicate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionFilter {
    #[default]
    Any,
    Required,
    Excluded,
}

/// Conjunction of independent list predicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filters {
    pub priority: PriorityFilter,
    pub category: CategoryFilter,
    pub needs_action: ActionFilter,
    /// Case-insensitive substring over subject, sender and summary.
    pub query: Option<String>,
}

impl Filters {
    /// Filters that let everything through.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, level: PriorityLevel) -> Self {
        self.priority = PriorityFilter::Equals(level);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = CategoryFilter::Equals(category.into());
        self
    }

    pub fn with_needs_action(mut self, filter: ActionFilter) -> Self {
        self.needs_action = filter;
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        let query = query.into();
        self.query = (!query.trim().is_empty()).then_some(query);
        self
    }

    /// Returns true if no predicate narrows the list.
    pub fn is_unfiltered(&self) -> bool {
        *self == Self::default()
    }

    /// Returns true if `email` satisfies every predicate.
    pub fn matches(&self, email: &Email) -> bool {
        let priority = match self.priority {
            PriorityFilter::Any => true,
            PriorityFilter::Equals(level) => email.priority_level == Some(level),
        };
        let category = match &self.category {
            CategoryFilter::Any => true,
            CategoryFilter::Equals(wanted) => email
                .category
                .as_deref()
                .is_some_and(|c| c.eq_ignore_ascii_case(wanted)),
        };
        let action = match self.needs_action {
            ActionFilter::Any => true,
            ActionFilter::Required => email.needs_action,
            ActionFilter::Excluded => !email.needs_action,
        };
        let query = match &self.query {
            None => true,
            Some(q) => {
                let q = q.to_lowercase();
                email.subject.to_lowercase().contains(&q)
                    || email.sender.to_lowercase().contains(&q)
                    || email
                        .summary
                        .as_deref()
                        .is_some_and(|s| s.to_lowercase().contains(&q))
            }
        };
        priority && category && action && query
    }
}

/// One row of the rendered list.
#[derive(Debug, Clone, PartialEq)]
pub struct ListEntry {
    pub id: EmailId,
    pub subject: String,
    /// Sender display label.
    pub sender: String,
    pub date: DateTime<Utc>,
    pub priority: Option<PriorityLevel>,
    pub category: Option<String>,
    pub needs_action: bool,
    pub summary: Option<String>,
    pub is_analyzed: bool,
    pub selected: bool,
}

impl ListEntry {
    fn from_email(email: &Email, selected: bool) -> Self {
        Self {
            id: email.id.clone(),
            subject: email.subject.clone(),
            sender: email.sender_address().short().to_string(),
            date: email.date,
            priority: email.priority_level,
            category: email.category.clone(),
            needs_action: email.needs_action,
            summary: email.summary.clone(),
            is_analyzed: email.is_analyzed,
            selected,
        }
    }
}

/// Display order: needs-action first, then priority, then newest first.
///
/// The identifier breaks remaining ties so the order is total.
pub fn compare_for_display(a: &Email, b: &Email) -> Ordering {
    b.needs_action
        .cmp(&a.needs_action)
        .then_with(|| b.priority_rank().cmp(&a.priority_rank()))
        .then_with(|| b.date.cmp(&a.date))
        .then_with(|| a.id.cmp(&b.id))
}

/// Computes the filtered, sorted list for display.
pub fn compute_visible(
    store: &EmailStore,
    selection: Option<&EmailId>,
    filters: &Filters,
) -> Vec<ListEntry> {
    let mut visible: Vec<&Email> = store.iter().filter(|e| filters.matches(e)).collect();
    visible.sort_by(|a, b| compare_for_display(a, b));
    visible
        .into_iter()
        .map(|email| ListEntry::from_email(email, selection == Some(&email.id)))
        .collect()
}

/// Coalesces render requests into one deferred paint.
///
/// Each [`request`](Self::request) pushes the deadline out by the quiet
/// period, but never past `max_wait` after the first request of the burst.
/// The owner sleeps until [`deadline`](Self::deadline) and then calls
/// [`fire`](Self::fire).
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    max_wait: Duration,
    burst_start: Option<Instant>,
    deadline: Option<Instant>,
    coalesced: u64,
}

impl Debouncer {
    /// Creates a debouncer with the given quiet period and burst cap.
    pub fn new(delay: Duration, max_wait: Duration) -> Self {
        Self {
            delay,
            max_wait: max_wait.max(delay),
            burst_start: None,
            deadline: None,
            coalesced: 0,
        }
    }

    /// Records a render request, restarting the quiet period.
    pub fn request(&mut self) {
        let now = Instant::now();
        let cap = *self.burst_start.get_or_insert(now) + self.max_wait;
        self.deadline = Some((now + self.delay).min(cap));
        self.coalesced += 1;
    }

    /// Returns true if a paint is scheduled.
    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// When the pending paint is due; far in the future if none is pending.
    pub fn deadline(&self) -> Instant {
        self.deadline
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(86_400))
    }

    /// Returns true if a pending paint is due at `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Clears the pending paint, returning how many requests it absorbed.
    pub fn fire(&mut self) -> u64 {
        self.deadline = None;
        self.burst_start = None;
        std::mem::take(&mut self.coalesced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use pretty_assertions::assert_eq;

    fn t(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap() + ChronoDuration::minutes(minutes)
    }

    fn email(id: &str, minutes: i64, priority: Option<PriorityLevel>, needs_action: bool) -> Email {
        let mut email = Email::new(id, t(minutes));
        email.priority_level = priority;
        email.needs_action = needs_action;
        email
    }

    fn ids(entries: &[ListEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.id.as_str()).collect()
    }

    #[test]
    fn high_priority_newer_record_comes_first() {
        let mut store = EmailStore::new(10);
        store.add_many(
            vec![
                email("A", 0, Some(PriorityLevel::Low), false),
                email("B", 1, Some(PriorityLevel::High), false),
            ],
            true,
        );

        let visible = compute_visible(&store, None, &Filters::all());
        assert_eq!(ids(&visible), vec!["B", "A"]);
    }

    #[test]
    fn sort_order_is_action_then_priority_then_date() {
        let mut store = EmailStore::new(10);
        store.add_many(
            vec![
                email("low-new", 50, Some(PriorityLevel::Low), false),
                email("pending", 60, Some(PriorityLevel::Pending), false),
                email("unset", 40, None, false),
                email("high-old", 0, Some(PriorityLevel::High), false),
                email("high-new", 30, Some(PriorityLevel::High), false),
                email("action-low", 10, Some(PriorityLevel::Low), true),
                email("action-medium", 5, Some(PriorityLevel::Medium), true),
            ],
            true,
        );

        let visible = compute_visible(&store, None, &Filters::all());
        assert_eq!(
            ids(&visible),
            vec![
                "action-medium",
                "action-low",
                "high-new",
                "high-old",
                "low-new",
                "pending",
                "unset",
            ]
        );
    }

    #[test]
    fn order_is_independent_of_insertion_order() {
        let records = vec![
            email("a", 3, Some(PriorityLevel::Medium), false),
            email("b", 2, Some(PriorityLevel::Medium), true),
            email("c", 1, None, false),
            email("d", 4, Some(PriorityLevel::High), false),
        ];

        let mut forward = EmailStore::new(10);
        forward.add_many(records.clone(), true);
        let mut backward = EmailStore::new(10);
        for record in records.into_iter().rev() {
            backward.add_many(vec![record], true);
        }

        assert_eq!(
            compute_visible(&forward, None, &Filters::all()),
            compute_visible(&backward, None, &Filters::all())
        );
    }

    #[test]
    fn filters_combine_as_conjunction() {
        let mut store = EmailStore::new(10);
        let mut work_high = email("w-high", 0, Some(PriorityLevel::High), true);
        work_high.category = Some("Work".to_string());
        let mut work_low = email("w-low", 1, Some(PriorityLevel::Low), true);
        work_low.category = Some("Work".to_string());
        let mut home_high = email("h-high", 2, Some(PriorityLevel::High), false);
        home_high.category = Some("Home".to_string());
        store.add_many(vec![work_high, work_low, home_high], true);

        let filters = Filters::all()
            .with_priority(PriorityLevel::High)
            .with_category("work")
            .with_needs_action(ActionFilter::Required);
        assert_eq!(ids(&compute_visible(&store, None, &filters)), vec!["w-high"]);

        let excluded = Filters::all().with_needs_action(ActionFilter::Excluded);
        assert_eq!(ids(&compute_visible(&store, None, &excluded)), vec!["h-high"]);
    }

    #[test]
    fn query_matches_subject_sender_and_summary() {
        let mut store = EmailStore::new(10);
        let mut by_subject = email("s", 0, None, false);
        by_subject.subject = "Invoice #42".to_string();
        let mut by_sender = email("f", 1, None, false);
        by_sender.sender = "Billing <invoices@example.com>".to_string();
        let mut by_summary = email("m", 2, None, false);
        by_summary.summary = Some("Overdue INVOICE reminder".to_string());
        store.add_many(vec![by_subject, by_sender, by_summary, email("x", 3, None, false)], true);

        let filters = Filters::all().with_query("invoice");
        assert_eq!(ids(&compute_visible(&store, None, &filters)), vec!["m", "f", "s"]);
    }

    #[test]
    fn filtering_is_idempotent() {
        let mut store = EmailStore::new(10);
        store.add_many(
            (0..6).map(|i| {
                let level = if i % 2 == 0 { PriorityLevel::High } else { PriorityLevel::Low };
                email(&format!("e{i}"), i, Some(level), i % 3 == 0)
            }),
            true,
        );
        let filters = Filters::all().with_priority(PriorityLevel::High);

        let once = compute_visible(&store, None, &filters);
        let mut refiltered = EmailStore::new(10);
        refiltered.add_many(
            once.iter()
                .filter_map(|entry| store.get_by_id(&entry.id).cloned()),
            true,
        );
        let twice = compute_visible(&refiltered, None, &filters);

        assert_eq!(once, twice);
    }

    #[test]
    fn selection_is_marked() {
        let mut store = EmailStore::new(10);
        store.add_many(vec![email("a", 0, None, false), email("b", 1, None, false)], true);

        let selected = EmailId::from("a");
        let visible = compute_visible(&store, Some(&selected), &Filters::all());
        assert!(visible.iter().find(|e| e.id == selected).unwrap().selected);
        assert_eq!(visible.iter().filter(|e| e.selected).count(), 1);
    }

    #[test]
    fn blank_query_does_not_filter() {
        assert!(Filters::all().with_query("   ").is_unfiltered());
    }

    #[tokio::test(start_paused = true)]
    async fn debouncer_coalesces_a_burst() {
        let mut debouncer = Debouncer::new(Duration::from_millis(100), Duration::from_secs(1));
        assert!(!debouncer.is_pending());

        for _ in 0..5 {
            debouncer.request();
            tokio::time::advance(Duration::from_millis(30)).await;
        }
        assert!(!debouncer.is_due(Instant::now()));

        tokio::time::sleep_until(debouncer.deadline()).await;
        assert!(debouncer.is_due(Instant::now()));
        assert_eq!(debouncer.fire(), 5);
        assert!(!debouncer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn steady_requests_still_paint_by_max_wait() {
        let mut debouncer = Debouncer::new(Duration::from_millis(100), Duration::from_millis(300));
        let start = Instant::now();

        let mut painted_at = None;
        for _ in 0..20 {
            debouncer.request();
            tokio::time::advance(Duration::from_millis(50)).await;
            if debouncer.is_due(Instant::now()) {
                painted_at = Some(Instant::now() - start);
                debouncer.fire();
                break;
            }
        }

        assert_eq!(painted_at, Some(Duration::from_millis(300)));
        debouncer.request();
        assert_eq!(debouncer.deadline(), Instant::now() + Duration::from_millis(100));
    }
}
