//! Email domain types.
//!
//! Represents the analyzed email records pushed by the backend stream,
//! together with the priority scale and action items produced by analysis.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::EmailId;

/// An email record as delivered by the analysis stream.
///
/// Records start out as metadata-only placeholders (`is_analyzed == false`)
/// and are later replaced by fully analyzed versions carrying priority,
/// category and summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Email {
    /// Unique identifier, stable across all delivery paths.
    pub id: EmailId,
    /// Email subject line.
    #[serde(default, deserialize_with = "wire::null_as_default")]
    pub subject: String,
    /// Raw sender header value, e.g. `"Ada <ada@example.com>"`.
    #[serde(default, alias = "from", deserialize_with = "wire::null_as_default")]
    pub sender: String,
    /// Raw recipient header values.
    #[serde(default, alias = "to", deserialize_with = "wire::string_or_list")]
    pub recipients: Vec<String>,
    /// Date the email was sent.
    #[serde(default, deserialize_with = "wire::timestamp")]
    pub date: DateTime<Utc>,
    /// Body content, possibly HTML.
    #[serde(default, deserialize_with = "wire::null_as_default")]
    pub body: String,
    /// Analysis summary.
    #[serde(default)]
    pub summary: Option<String>,
    /// Analysis category.
    #[serde(default)]
    pub category: Option<String>,
    /// Analysis priority; `None` when the backend sent nothing usable.
    #[serde(default, alias = "priority", deserialize_with = "wire::priority")]
    pub priority_level: Option<PriorityLevel>,
    /// Whether the email asks something of the reader.
    #[serde(default, deserialize_with = "wire::null_as_default")]
    pub needs_action: bool,
    /// Extracted action items, in the order the analysis produced them.
    #[serde(default, deserialize_with = "wire::null_as_default")]
    pub action_items: Vec<ActionItem>,
    /// Values for user-defined categories, keyed by category name.
    #[serde(default, deserialize_with = "wire::null_as_default")]
    pub custom_categories: BTreeMap<String, serde_json::Value>,
    /// Whether analysis has completed for this record.
    #[serde(
        rename = "isAnalyzed",
        alias = "is_analyzed",
        default = "wire::analyzed_by_default"
    )]
    pub is_analyzed: bool,
}

impl Email {
    /// Creates a bare placeholder record.
    pub fn new(id: impl Into<EmailId>, date: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            subject: String::new(),
            sender: String::new(),
            recipients: Vec::new(),
            date,
            body: String::new(),
            summary: None,
            category: None,
            priority_level: None,
            needs_action: false,
            action_items: Vec::new(),
            custom_categories: BTreeMap::new(),
            is_analyzed: false,
        }
    }

    /// Sort rank of this record's priority; higher is more urgent.
    pub fn priority_rank(&self) -> u8 {
        PriorityLevel::rank(self.priority_level)
    }

    /// Parsed sender address.
    pub fn sender_address(&self) -> Address {
        Address::parse_list(&self.sender)
            .into_iter()
            .next()
            .unwrap_or_else(|| Address::new(self.sender.trim()))
    }

    /// Parsed recipient addresses, flattening comma-separated header values.
    pub fn recipient_addresses(&self) -> Vec<Address> {
        self.recipients
            .iter()
            .flat_map(|raw| Address::parse_list(raw))
            .collect()
    }

    /// Returns true if the body appears to be HTML markup.
    pub fn has_html_body(&self) -> bool {
        looks_like_html(&self.body)
    }

    /// Custom category values rendered as display strings.
    pub fn custom_category_labels(&self) -> Vec<(String, String)> {
        self.custom_categories
            .iter()
            .map(|(name, value)| {
                let shown = match value {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Null => String::new(),
                    other => other.to_string(),
                };
                (name.clone(), shown)
            })
            .collect()
    }
}

/// Priority assigned by analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PriorityLevel {
    High,
    Medium,
    Low,
    /// Analysis has not produced a priority yet.
    Pending,
}

impl PriorityLevel {
    /// Parses a priority name in any letter case.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "HIGH" => Some(Self::High),
            "MEDIUM" => Some(Self::Medium),
            "LOW" => Some(Self::Low),
            "PENDING" => Some(Self::Pending),
            _ => None,
        }
    }

    /// Sort rank: HIGH > MEDIUM > LOW > PENDING/unset.
    pub fn rank(level: Option<Self>) -> u8 {
        match level {
            Some(Self::High) => 3,
            Some(Self::Medium) => 2,
            Some(Self::Low) => 1,
            Some(Self::Pending) | None => 0,
        }
    }

    /// Wire name of this level.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
            Self::Pending => "PENDING",
        }
    }
}

/// A follow-up extracted from an email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionItem {
    /// What needs doing.
    pub description: String,
    /// Free-form due date as reported by analysis.
    pub due_date: Option<String>,
}

impl<'de> Deserialize<'de> for ActionItem {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Full {
            #[serde(alias = "action", alias = "text")]
            description: String,
            #[serde(default, alias = "due")]
            due_date: Option<String>,
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Full(Full),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Full(full) => Self {
                description: full.description,
                due_date: full.due_date.filter(|d| !d.trim().is_empty()),
            },
            Raw::Text(description) => Self {
                description,
                due_date: None,
            },
        })
    }
}

/// An email address with optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Email address.
    pub email: String,
    /// Display name (e.g., "John Doe").
    pub name: Option<String>,
}

impl Address {
    /// Creates a new address with just an email.
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: None,
        }
    }

    /// Creates a new address with email and display name.
    pub fn with_name(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: Some(name.into()),
        }
    }

    /// Parses a header value that may hold several comma-separated addresses.
    ///
    /// Values `mailparse` cannot make sense of are kept verbatim as a single
    /// bare address, so nothing the backend sent is silently lost.
    pub fn parse_list(raw: &str) -> Vec<Address> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Vec::new();
        }

        match mailparse::addrparse(raw) {
            Ok(list) => {
                let mut parsed = Vec::new();
                for addr in list.iter() {
                    match addr {
                        mailparse::MailAddr::Single(info) => parsed.push(Self::from_info(info)),
                        mailparse::MailAddr::Group(group) => {
                            parsed.extend(group.addrs.iter().map(Self::from_info))
                        }
                    }
                }
                if parsed.is_empty() {
                    vec![Self::new(raw)]
                } else {
                    parsed
                }
            }
            Err(e) => {
                tracing::debug!(value = raw, error = %e, "Unparsable address header");
                vec![Self::new(raw)]
            }
        }
    }

    fn from_info(info: &mailparse::SingleInfo) -> Self {
        Self {
            email: info.addr.clone(),
            name: info
                .display_name
                .clone()
                .filter(|name| !name.trim().is_empty()),
        }
    }

    /// Returns the display representation of this address.
    ///
    /// If a name is present, returns "Name <email>", otherwise just the email.
    pub fn display(&self) -> String {
        match &self.name {
            Some(name) => format!("{} <{}>", name, self.email),
            None => self.email.clone(),
        }
    }

    /// Short label for list rows: the name if known, else the address.
    pub fn short(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.email)
    }
}

/// Returns true if `body` appears to be HTML markup.
pub fn looks_like_html(body: &str) -> bool {
    let head = body.trim_start();
    let end = head
        .char_indices()
        .nth(512)
        .map_or(head.len(), |(index, _)| index);
    let lower = head[..end].to_ascii_lowercase();
    lower.starts_with("<!doctype")
        || lower.starts_with("<html")
        || ["<div", "<p>", "<p ", "<br", "<table", "<body", "<span"]
            .iter()
            .any(|tag| lower.contains(tag))
}

/// Parses the timestamp formats seen on the stream.
///
/// Accepts RFC 3339, RFC 2822, naive `YYYY-MM-DD HH:MM:SS` (read as UTC) and
/// unix epoch integers in seconds or milliseconds.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    raw.parse::<i64>().ok().and_then(timestamp_from_epoch)
}

fn timestamp_from_epoch(value: i64) -> Option<DateTime<Utc>> {
    // Anything past year 5138 in seconds is really milliseconds.
    if value.abs() >= 100_000_000_000 {
        DateTime::from_timestamp_millis(value)
    } else {
        DateTime::from_timestamp(value, 0)
    }
}

/// Lenient deserializers for stream payloads.
mod wire {
    use super::*;

    pub(super) fn analyzed_by_default() -> bool {
        true
    }

    pub(super) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: Default + Deserialize<'de>,
    {
        Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
    }

    pub(super) fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            One(String),
            Many(Vec<String>),
        }

        Ok(match Option::<Raw>::deserialize(deserializer)? {
            Some(Raw::One(s)) if s.trim().is_empty() => Vec::new(),
            Some(Raw::One(s)) => vec![s],
            Some(Raw::Many(list)) => list,
            None => Vec::new(),
        })
    }

    pub(super) fn timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Float(f64),
            Text(String),
        }

        let parsed = match Option::<Raw>::deserialize(deserializer)? {
            Some(Raw::Int(n)) => timestamp_from_epoch(n),
            Some(Raw::Float(f)) => timestamp_from_epoch(f as i64),
            Some(Raw::Text(s)) => {
                let parsed = parse_timestamp(&s);
                if parsed.is_none() {
                    tracing::debug!(value = %s, "Unrecognized date, treating as epoch");
                }
                parsed
            }
            None => None,
        };
        Ok(parsed.unwrap_or_default())
    }

    pub(super) fn priority<'de, D>(deserializer: D) -> Result<Option<PriorityLevel>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<String>::deserialize(deserializer)?
            .as_deref()
            .and_then(PriorityLevel::parse))
    }
}
