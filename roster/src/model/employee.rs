use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{DocumentValidity, contains_ignore_case};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmployeeStatus {
    #[default]
    Active,
    OnLeave,
    Inactive,
    Terminated,
}

impl EmployeeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::OnLeave => "on_leave",
            Self::Inactive => "inactive",
            Self::Terminated => "terminated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Employee {
    pub id: String,
    pub employee_number: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub department: String,
    #[serde(default)]
    pub position: String,
    #[serde(default)]
    pub nationality: Option<String>,
    #[serde(default)]
    pub hire_date: Option<NaiveDate>,
    #[serde(default)]
    pub status: EmployeeStatus,
    #[serde(default)]
    pub passport_number: Option<String>,
    #[serde(default)]
    pub passport_expiry: Option<NaiveDate>,
    #[serde(default)]
    pub visa_type: Option<String>,
    #[serde(default)]
    pub visa_expiry: Option<NaiveDate>,
    #[serde(default)]
    pub emirates_id: Option<String>,
    #[serde(default)]
    pub emirates_id_expiry: Option<NaiveDate>,
}

impl Employee {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn passport_validity(&self, today: NaiveDate, warning_days: i64) -> DocumentValidity {
        DocumentValidity::evaluate(self.passport_expiry, today, warning_days)
    }

    pub fn visa_validity(&self, today: NaiveDate, warning_days: i64) -> DocumentValidity {
        DocumentValidity::evaluate(self.visa_expiry, today, warning_days)
    }

    pub fn emirates_id_validity(&self, today: NaiveDate, warning_days: i64) -> DocumentValidity {
        DocumentValidity::evaluate(self.emirates_id_expiry, today, warning_days)
    }

    /// Whether any dated identity document is expired or about to be.
    pub fn needs_renewal(&self, today: NaiveDate, warning_days: i64) -> bool {
        [
            self.passport_validity(today, warning_days),
            self.visa_validity(today, warning_days),
            self.emirates_id_validity(today, warning_days),
        ]
        .into_iter()
        .any(DocumentValidity::needs_attention)
    }

    /// Client-side search over name, email, number, department and position.
    /// `query_lower` must already be lowercased.
    pub fn matches(&self, query_lower: &str) -> bool {
        [
            self.first_name.as_str(),
            self.last_name.as_str(),
            self.email.as_str(),
            self.employee_number.as_str(),
            self.department.as_str(),
            self.position.as_str(),
        ]
        .into_iter()
        .any(|field| contains_ignore_case(field, query_lower))
            || contains_ignore_case(&self.full_name(), query_lower)
    }
}

/// Fields accepted when creating an employee.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeDraft {
    pub employee_number: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub department: String,
    pub position: String,
    pub nationality: Option<String>,
    pub hire_date: Option<NaiveDate>,
    pub status: EmployeeStatus,
    pub passport_number: Option<String>,
    pub passport_expiry: Option<NaiveDate>,
    pub visa_type: Option<String>,
    pub visa_expiry: Option<NaiveDate>,
    pub emirates_id: Option<String>,
    pub emirates_id_expiry: Option<NaiveDate>,
}

impl EmployeeDraft {
    /// Minimal checks before anything is sent.
    pub fn validate(&self) -> Result<(), String> {
        if self.first_name.trim().is_empty() || self.last_name.trim().is_empty() {
            return Err("first and last name are required".to_string());
        }
        if self.employee_number.trim().is_empty() {
            return Err("employee number is required".to_string());
        }
        validate_email(&self.email)
    }
}

pub(crate) fn validate_email(email: &str) -> Result<(), String> {
    match email.split_once('@') {
        Some((user, domain)) if !user.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(format!("`{email}` is not a valid email address")),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeFilters {
    pub department: Option<String>,
    pub status: Option<EmployeeStatus>,
    pub nationality: Option<String>,
}

impl EmployeeFilters {
    pub fn is_empty(&self) -> bool {
        self.department.is_none() && self.status.is_none() && self.nationality.is_none()
    }

    pub fn matches(&self, employee: &Employee) -> bool {
        self.department
            .as_ref()
            .is_none_or(|d| d.eq_ignore_ascii_case(&employee.department))
            && self.status.is_none_or(|s| s == employee.status)
            && self.nationality.as_ref().is_none_or(|n| {
                employee
                    .nationality
                    .as_ref()
                    .is_some_and(|own| own.eq_ignore_ascii_case(n))
            })
    }
}

/// One page request against the employee list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeQuery {
    pub page: usize,
    pub limit: usize,
    pub search: Option<String>,
    pub filters: EmployeeFilters,
}

impl EmployeeQuery {
    pub fn new(page: usize, limit: usize) -> Self {
        Self {
            page,
            limit,
            search: None,
            filters: EmployeeFilters::default(),
        }
    }

    /// Query string pairs in a stable order, also used for cache keys.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("page", self.page.to_string()),
            ("limit", self.limit.to_string()),
        ];
        if let Some(search) = self.search.as_ref().filter(|s| !s.is_empty()) {
            pairs.push(("search", search.clone()));
        }
        if let Some(department) = &self.filters.department {
            pairs.push(("department", department.clone()));
        }
        if let Some(status) = self.filters.status {
            pairs.push(("status", status.as_str().to_string()));
        }
        if let Some(nationality) = &self.filters.nationality {
            pairs.push(("nationality", nationality.clone()));
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
        format!("employees:{params}")
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_api_shape() {
        let json = r#"{
            "id": "17",
            "employeeNumber": "E-0017",
            "firstName": "Ada",
            "lastName": "Lovelace",
            "email": "ada@example.com",
            "department": "Engineering",
            "position": "Lead",
            "status": "on_leave",
            "visaExpiry": "2025-01-31"
        }"#;
        let employee: Employee = serde_json::from_str(json).unwrap();
        assert_eq!(employee.full_name(), "Ada Lovelace");
        assert_eq!(employee.status, EmployeeStatus::OnLeave);
        assert_eq!(employee.visa_expiry, NaiveDate::from_ymd_opt(2025, 1, 31));
        assert!(employee.passport_expiry.is_none());
    }

    #[test]
    fn test_matches_is_case_insensitive() {
        let employee = fixtures::employee("1", "Ada", "Lovelace", "Engineering");
        assert!(employee.matches("love"));
        assert!(employee.matches("ada lov"));
        assert!(employee.matches("engin"));
        assert!(!employee.matches("finance"));
    }

    #[test]
    fn test_filters() {
        let employee = fixtures::employee("1", "Ada", "Lovelace", "Engineering");
        let mut filters = EmployeeFilters {
            department: Some("engineering".into()),
            ..Default::default()
        };
        assert!(filters.matches(&employee));
        filters.status = Some(EmployeeStatus::Terminated);
        assert!(!filters.matches(&employee));
    }

    #[test]
    fn test_cache_key_is_stable() {
        let mut query = EmployeeQuery::new(2, 20);
        query.search = Some("ada".into());
        query.filters.status = Some(EmployeeStatus::Active);
        assert_eq!(
            query.cache_key(),
            "employees:page=2&limit=20&search=ada&status=active"
        );
    }

    #[test]
    fn test_draft_validation() {
        let mut draft = EmployeeDraft {
            employee_number: "E-1".into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: "ada@example.com".into(),
            ..Default::default()
        };
        assert!(draft.validate().is_ok());
        draft.email = "ada.example.com".into();
        assert!(draft.validate().is_err());
    }
}
