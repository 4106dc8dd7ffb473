use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{DocumentValidity, contains_ignore_case};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Passport,
    Visa,
    EmiratesId,
    LabourCard,
    Contract,
    Other,
}

impl DocumentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Passport => "passport",
            Self::Visa => "visa",
            Self::EmiratesId => "emirates_id",
            Self::LabourCard => "labour_card",
            Self::Contract => "contract",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub employee_id: String,
    pub kind: DocumentKind,
    pub title: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default)]
    pub issue_date: Option<NaiveDate>,
    #[serde(default)]
    pub expiry_date: Option<NaiveDate>,
    #[serde(default)]
    pub uploaded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Document {
    pub fn validity(&self, today: NaiveDate, warning_days: i64) -> DocumentValidity {
        DocumentValidity::evaluate(self.expiry_date, today, warning_days)
    }

    /// Expires within `days` of `today`, or already has.
    pub fn expires_within(&self, today: NaiveDate, days: i64) -> bool {
        self.expiry_date
            .is_some_and(|expiry| (expiry - today).num_days() <= days)
    }

    /// `query_lower` must already be lowercased.
    pub fn matches(&self, query_lower: &str) -> bool {
        contains_ignore_case(&self.title, query_lower)
            || contains_ignore_case(&self.file_name, query_lower)
            || contains_ignore_case(self.kind.as_str(), query_lower)
            || self
                .notes
                .as_deref()
                .is_some_and(|notes| contains_ignore_case(notes, query_lower))
    }
}

/// Metadata sent when uploading a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentDraft {
    pub employee_id: String,
    pub kind: DocumentKind,
    pub title: String,
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub issue_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

/// Upload size ceiling enforced before sending.
pub const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

impl DocumentDraft {
    pub fn validate(&self) -> Result<(), String> {
        if self.employee_id.trim().is_empty() {
            return Err("document must belong to an employee".to_string());
        }
        if self.title.trim().is_empty() {
            return Err("document title is required".to_string());
        }
        if self.size_bytes > MAX_UPLOAD_BYTES {
            return Err(format!(
                "file is {} bytes, the limit is {MAX_UPLOAD_BYTES}",
                self.size_bytes
            ));
        }
        if let (Some(issued), Some(expires)) = (self.issue_date, self.expiry_date) {
            if expires < issued {
                return Err("expiry date precedes issue date".to_string());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentQuery {
    pub employee_id: Option<String>,
    pub kind: Option<DocumentKind>,
    pub search: Option<String>,
}

impl DocumentQuery {
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(employee_id) = &self.employee_id {
            pairs.push(("employeeId", employee_id.clone()));
        }
        if let Some(kind) = self.kind {
            pairs.push(("kind", kind.as_str().to_string()));
        }
        if let Some(search) = self.search.as_ref().filter(|s| !s.is_empty()) {
            pairs.push(("search", search.clone()));
        }
        pairs
    }

    pub fn cache_key(&self) -> String {
        let params = self
            .to_pairs()
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        format!("documents:{params}")
    }
}
