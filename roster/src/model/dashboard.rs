use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{Document, DocumentValidity, Employee, EmployeeStatus};

/// Headline figures for the dashboard.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub total_employees: usize,
    #[serde(default)]
    pub by_status: BTreeMap<String, usize>,
    #[serde(default)]
    pub by_department: BTreeMap<String, usize>,
    #[serde(default)]
    pub documents_expiring_soon: usize,
    #[serde(default)]
    pub documents_expired: usize,
}

impl DashboardSummary {
    /// Compute locally from whatever records are loaded. Dated fields on the
    /// employee record count alongside uploaded documents.
    pub fn from_records(
        employees: &[Employee],
        documents: &[Document],
        today: NaiveDate,
        warning_days: i64,
    ) -> Self {
        let mut summary = Self {
            total_employees: employees.len(),
            ..Default::default()
        };

        let mut tally = |validity: DocumentValidity| match validity {
            DocumentValidity::ExpiringSoon => summary.documents_expiring_soon += 1,
            DocumentValidity::Expired => summary.documents_expired += 1,
            DocumentValidity::Valid | DocumentValidity::Missing => {}
        };
        for employee in employees {
            tally(employee.passport_validity(today, warning_days));
            tally(employee.visa_validity(today, warning_days));
            tally(employee.emirates_id_validity(today, warning_days));
        }
        for document in documents {
            tally(document.validity(today, warning_days));
        }

        for employee in employees {
            *summary
                .by_status
                .entry(employee.status.as_str().to_string())
                .or_default() += 1;
            if !employee.department.is_empty() {
                *summary
                    .by_department
                    .entry(employee.department.clone())
                    .or_default() += 1;
            }
        }
        summary
    }

    pub fn active(&self) -> usize {
        self.by_status
            .get(EmployeeStatus::Active.as_str())
            .copied()
            .unwrap_or(0)
    }
}
