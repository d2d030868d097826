//! Paint step for the list page.
//!
//! Painting is the last, imperative step: [`PageView`] is a borrowed
//! snapshot assembled by the controller after the visible list is computed,
//! and a [`ListPainter`] writes it somewhere.

use std::fmt;
use std::io::{self, Write};

use crate::providers::sse::StreamStats;
use crate::providers::RemoteSettings;
use crate::services::{
    strip_control_chars, ConnectionState, DetailView, Filters, ListEntry, Notification,
};

/// Everything one paint needs.
#[derive(Debug, Clone, Copy)]
pub struct PageView<'a> {
    pub connection: ConnectionState,
    pub status: Option<&'a str>,
    pub stats: Option<&'a StreamStats>,
    pub entries: &'a [ListEntry],
    /// Records in the store, before filtering.
    pub total: usize,
    pub filters: &'a Filters,
    pub detail: Option<&'a DetailView>,
    pub banner: Option<&'a Notification>,
    pub toasts: &'a [&'a Notification],
    pub remote: &'a RemoteSettings,
    /// List blocked remote image URLs instead of only counting them.
    pub show_blocked_image_urls: bool,
}

/// Receives painted page snapshots.
pub trait ListPainter {
    /// Paints one snapshot.
    fn paint(&mut self, view: &PageView<'_>) -> io::Result<()>;
}

/// Plain-text painter for terminals and logs.
pub struct TerminalPainter<W: Write> {
    out: W,
    width: usize,
}

impl<W: Write> TerminalPainter<W> {
    /// Creates a painter writing rows at most `width` columns wide.
    pub fn new(out: W, width: usize) -> Self {
        Self {
            out,
            width: width.max(40),
        }
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.out
    }

    /// Writes one line with control characters removed, so text from an
    /// email or the server cannot drive the terminal.
    fn line(&mut self, args: fmt::Arguments<'_>) -> io::Result<()> {
        let text = args.to_string();
        writeln!(self.out, "{}", strip_control_chars(&text))
    }

    fn status_line(&mut self, view: &PageView<'_>) -> io::Result<()> {
        let mut line = format!("[{}] {}", view.connection.label(), view.entries.len());
        if view.entries.len() != view.total {
            line.push_str(&format!(" of {}", view.total));
        }
        line.push_str(" emails");
        if let Some(stats) = view.stats {
            line.push_str(&format!(
                " | {} analyzed, {} cached",
                stats.processed, stats.cached
            ));
        }
        if let Some(status) = view.status {
            line.push_str(" | ");
            line.push_str(status);
        }
        if !view.filters.is_unfiltered() {
            line.push_str(" | filtered");
        }
        self.line(format_args!("{}", truncate(&line, self.width)))
    }

    fn row(&mut self, entry: &ListEntry, remote: &RemoteSettings) -> io::Result<()> {
        let marker = if entry.selected { '>' } else { ' ' };
        let action = if entry.needs_action { '!' } else { ' ' };
        let badge = match entry.priority {
            Some(level) => level.as_str().chars().next().unwrap_or(' '),
            None => '-',
        };
        let analyzing = if entry.is_analyzed { "" } else { " (analyzing)" };
        let category = match entry.category.as_deref() {
            Some(name) => match remote.category_color(name) {
                Some(color) if !color.is_empty() => format!(" [{name} {color}]"),
                _ => format!(" [{name}]"),
            },
            None => String::new(),
        };

        let line = format!(
            "{marker}{action}{badge} {date}  {sender:<20}  {subject}{category}{analyzing}",
            date = entry.date.format("%b %d %H:%M"),
            sender = truncate(&entry.sender, 20),
            subject = entry.subject,
        );
        self.line(format_args!("{}", truncate(&line, self.width)))
    }

    fn detail(&mut self, detail: &DetailView, show_urls: bool) -> io::Result<()> {
        let rule = "-".repeat(self.width);
        self.line(format_args!("{rule}"))?;
        self.line(format_args!("From:    {}", detail.sender.display()))?;
        if !detail.recipients.is_empty() {
            let to: Vec<String> = detail.recipients.iter().map(|a| a.display()).collect();
            let to = truncate(&to.join(", "), self.width - 9);
            self.line(format_args!("To:      {to}"))?;
        }
        let date = detail.date.format("%a, %d %b %Y %H:%M");
        self.line(format_args!("Date:    {date}"))?;
        self.line(format_args!("Subject: {}", detail.subject))?;

        let mut tags = Vec::new();
        if let Some(level) = detail.priority {
            tags.push(level.as_str().to_string());
        }
        if let Some(category) = &detail.category {
            tags.push(category.clone());
        }
        tags.extend(
            detail
                .custom_categories
                .iter()
                .map(|(name, value)| format!("{name}: {value}")),
        );
        if !tags.is_empty() {
            self.line(format_args!("Tags:    {}", tags.join(" | ")))?;
        }
        if let Some(summary) = &detail.summary {
            self.line(format_args!("Summary: {summary}"))?;
        }
        if !detail.action_items.is_empty() {
            self.line(format_args!("Actions:"))?;
            for item in &detail.action_items {
                match &item.due_date {
                    Some(due) => self.line(format_args!("  - {} (due {due})", item.description))?,
                    None => self.line(format_args!("  - {}", item.description))?,
                }
            }
        }
        self.line(format_args!(""))?;
        self.line(format_args!("{}", detail.body.text))?;

        let blocked = &detail.body.blocked_images;
        if !blocked.is_empty() {
            self.line(format_args!("[{} remote image(s) blocked]", blocked.len()))?;
            if show_urls {
                for url in blocked {
                    self.line(format_args!("  {url}"))?;
                }
            }
        }
        Ok(())
    }
}

impl<W: Write> ListPainter for TerminalPainter<W> {
    fn paint(&mut self, view: &PageView<'_>) -> io::Result<()> {
        if let Some(banner) = view.banner {
            self.line(format_args!("!! {}", banner.title))?;
            if let Some(body) = &banner.body {
                self.line(format_args!("!! {body}"))?;
            }
        }
        self.status_line(view)?;

        if view.entries.is_empty() {
            let message = if view.total == 0 {
                "No emails yet."
            } else {
                "No emails match the current filters."
            };
            self.line(format_args!("  {message}"))?;
        }
        for entry in view.entries {
            self.row(entry, view.remote)?;
        }

        if let Some(detail) = view.detail {
            self.detail(detail, view.show_blocked_image_urls)?;
        }
        for toast in view.toasts {
            match &toast.body {
                Some(body) => self.line(format_args!(
                    "({}) {}: {body}",
                    toast.severity.tag(),
                    toast.title
                ))?,
                None => self.line(format_args!("({}) {}", toast.severity.tag(), toast.title))?,
            }
        }
        self.line(format_args!(""))?;
        self.out.flush()
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}
