//! Page commands and their line syntax.
//!
//! The binary reads one command per line from stdin:
//!
//! ```text
//! select <id>          next | prev
//! filter priority <high|medium|low|pending|any>
//! filter category <name|any>
//! filter action <required|excluded|any>
//! filter query <text...>
//! clear                reply <text...>      send
//! dismiss              reconnect            quit
//! ```

use thiserror::Error;

use crate::domain::{EmailId, PriorityLevel};
use crate::providers::ComposeForm;
use crate::services::{ActionFilter, CategoryFilter, Filters, PriorityFilter};

/// Errors from parsing a command line.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    Unknown(String),

    #[error("missing {0}")]
    MissingArgument(&'static str),

    #[error("invalid {what}: {value}")]
    InvalidValue { what: &'static str, value: String },
}

/// One change to the active filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterChange {
    Priority(PriorityFilter),
    Category(CategoryFilter),
    Action(ActionFilter),
    Query(Option<String>),
}

impl FilterChange {
    /// Applies the change, leaving other predicates untouched.
    pub fn apply(self, mut filters: Filters) -> Filters {
        match self {
            Self::Priority(p) => filters.priority = p,
            Self::Category(c) => filters.category = c,
            Self::Action(a) => filters.needs_action = a,
            Self::Query(Some(q)) => filters = filters.with_query(q),
            Self::Query(None) => filters.query = None,
        }
        filters
    }
}

/// Instructions for the page controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Select an email and load its detail.
    Select(EmailId),
    /// Select the next visible email.
    Next,
    /// Select the previous visible email.
    Previous,
    /// Change one filter predicate.
    Filter(FilterChange),
    /// Replace all filters.
    SetFilters(Filters),
    /// Reset filters to show everything.
    ClearFilters,
    /// Replace the compose form.
    Compose(ComposeForm),
    /// Start a reply to the selected email.
    Reply { content: Option<String> },
    /// Send the compose form.
    Send,
    /// Dismiss the banner.
    DismissBanner,
    /// Drop the current stream and connect again.
    Reconnect,
    /// Close the stream and stop.
    Shutdown,
}

impl Command {
    /// Parses one input line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, CommandError> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };
        let rest = |words: std::str::SplitWhitespace<'_>| words.collect::<Vec<_>>().join(" ");

        let command = match verb.to_ascii_lowercase().as_str() {
            "select" | "s" => {
                let id = words.next().ok_or(CommandError::MissingArgument("email id"))?;
                Self::Select(EmailId::from(id))
            }
            "next" | "n" | "j" => Self::Next,
            "prev" | "previous" | "p" | "k" => Self::Previous,
            "filter" | "f" => Self::Filter(parse_filter(&mut words)?),
            "clear" => Self::ClearFilters,
            "reply" | "r" => {
                let content = rest(words);
                Self::Reply {
                    content: (!content.is_empty()).then_some(content),
                }
            }
            "send" => Self::Send,
            "dismiss" => Self::DismissBanner,
            "reconnect" => Self::Reconnect,
            "quit" | "q" | "exit" => Self::Shutdown,
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(Some(command))
    }
}

fn parse_filter(words: &mut std::str::SplitWhitespace<'_>) -> Result<FilterChange, CommandError> {
    let field = words
        .next()
        .ok_or(CommandError::MissingArgument("filter field"))?;
    let value: Vec<&str> = words.collect();
    let value = value.join(" ");
    let is_any = value.is_empty() || value.eq_ignore_ascii_case("any");

    match field.to_ascii_lowercase().as_str() {
        "priority" => {
            if is_any {
                return Ok(FilterChange::Priority(PriorityFilter::Any));
            }
            PriorityLevel::parse(&value)
                .map(|level| FilterChange::Priority(PriorityFilter::Equals(level)))
                .ok_or(CommandError::InvalidValue {
                    what: "priority",
                    value,
                })
        }
        "category" => Ok(FilterChange::Category(if is_any {
            CategoryFilter::Any
        } else {
            CategoryFilter::Equals(value)
        })),
        "action" => match value.to_ascii_lowercase().as_str() {
            "" | "any" => Ok(FilterChange::Action(ActionFilter::Any)),
            "required" | "yes" => Ok(FilterChange::Action(ActionFilter::Required)),
            "excluded" | "no" => Ok(FilterChange::Action(ActionFilter::Excluded)),
            _ => Err(CommandError::InvalidValue {
                what: "action filter",
                value,
            }),
        },
        "query" | "search" => Ok(FilterChange::Query((!value.is_empty()).then_some(value))),
        other => Err(CommandError::InvalidValue {
            what: "filter field",
            value: other.to_string(),
        }),
    }
}
