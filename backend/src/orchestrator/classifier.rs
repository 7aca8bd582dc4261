//! Request classifier
//!
//! Maps request text to the capability categories it plausibly needs.
//! Matching is keyword based over whole lowercased words (or whole phrases),
//! so "doctor" never counts as "doc". No external calls are made.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Capability a request may need, declared in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryKind {
    /// Sending or replying to email
    Email,
    /// Searching or browsing the web
    Web,
    /// Creating or editing documents
    Docs,
    /// Scheduling and reminders
    Calendar,
    /// Analysis and calculations
    Data,
}

impl CategoryKind {
    /// Every category, highest priority first
    pub const ALL: [CategoryKind; 5] = [
        CategoryKind::Email,
        CategoryKind::Web,
        CategoryKind::Docs,
        CategoryKind::Calendar,
        CategoryKind::Data,
    ];

    /// Stable identifier ("email", "web", ...)
    pub fn id(&self) -> &'static str {
        match self {
            CategoryKind::Email => "email",
            CategoryKind::Web => "web",
            CategoryKind::Docs => "docs",
            CategoryKind::Calendar => "calendar",
            CategoryKind::Data => "data",
        }
    }

    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            CategoryKind::Email => "Communication",
            CategoryKind::Web => "Research",
            CategoryKind::Docs => "Documents",
            CategoryKind::Calendar => "Scheduling",
            CategoryKind::Data => "Data Analysis",
        }
    }

    fn keywords(&self) -> &'static [&'static str] {
        match self {
            CategoryKind::Email => &[
                "email",
                "emails",
                "emailed",
                "e-mail",
                "mail",
                "inbox",
                "send a message",
                "reply to",
            ],
            CategoryKind::Web => &[
                "search", "look up", "lookup", "google", "browse", "website", "online", "news",
            ],
            CategoryKind::Docs => &[
                "document",
                "documents",
                "doc",
                "docs",
                "draft",
                "write up",
                "notes",
                "spreadsheet",
            ],
            CategoryKind::Calendar => &[
                "schedule",
                "meeting",
                "calendar",
                "appointment",
                "remind",
                "reminder",
            ],
            CategoryKind::Data => &[
                "analyze",
                "analyse",
                "chart",
                "statistics",
                "dataset",
                "calculate",
            ],
        }
    }
}

impl fmt::Display for CategoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// A classification result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    /// Category identifier
    pub id: CategoryKind,
    /// Human-readable label
    pub label: String,
}

impl From<CategoryKind> for Category {
    fn from(kind: CategoryKind) -> Self {
        Self {
            id: kind,
            label: kind.label().to_string(),
        }
    }
}

/// Classify request text into zero or more categories, highest priority first
///
/// An empty result is not an error: it means no tool is needed.
pub fn categorize(text: &str) -> Vec<Category> {
    let normalized = normalize(text);
    if normalized.trim().is_empty() {
        return Vec::new();
    }

    CategoryKind::ALL
        .iter()
        .filter(|kind| {
            kind.keywords()
                .iter()
                .any(|keyword| normalized.contains(&format!(" {} ", keyword)))
        })
        .map(|kind| Category::from(*kind))
        .collect()
}

/// Select the category that drives the tool branch
pub fn primary(categories: &[Category]) -> Option<&Category> {
    categories.iter().min_by_key(|category| category.id)
}

/// Lowercase the text and rejoin its words with single spaces, padded on both
/// ends so keywords can be matched as ` word `.
fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !(c.is_alphanumeric() || c == '-'))
        .filter(|word| !word.is_empty())
        .collect();
    format!(" {} ", words.join(" "))
}
