//! Domain records exchanged with the HR API.
pub mod dashboard;
pub mod document;
pub mod employee;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub use dashboard::DashboardSummary;
pub use document::{Document, DocumentDraft, DocumentKind, DocumentQuery};
pub use employee::{Employee, EmployeeDraft, EmployeeFilters, EmployeeQuery, EmployeeStatus};

/// Days before expiry at which a document counts as expiring soon.
pub const DEFAULT_EXPIRY_WARNING_DAYS: i64 = 30;

/// State of a dated identity document relative to a reference day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentValidity {
    Valid,
    ExpiringSoon,
    Expired,
    Missing,
}

impl DocumentValidity {
    /// `ExpiringSoon` covers `today ..= today + warning_days`; the expiry day
    /// itself is still usable.
    pub fn evaluate(expiry: Option<NaiveDate>, today: NaiveDate, warning_days: i64) -> Self {
        let Some(expiry) = expiry else {
            return Self::Missing;
        };
        let days_left = (expiry - today).num_days();
        if days_left < 0 {
            Self::Expired
        } else if days_left <= warning_days {
            Self::ExpiringSoon
        } else {
            Self::Valid
        }
    }

    pub fn needs_attention(self) -> bool {
        matches!(self, Self::ExpiringSoon | Self::Expired)
    }
}

/// Case-insensitive substring match used for client-side filtering.
pub(crate) fn contains_ignore_case(haystack: &str, needle_lower: &str) -> bool {
    haystack.to_lowercase().contains(needle_lower)
}
