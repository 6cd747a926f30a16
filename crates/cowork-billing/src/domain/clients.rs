use crate::domain::types::{ClientId, ServiceType};
use crate::error::{BillingError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A desk, office or virtual-office package held by a tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub resource: String,
    pub service_type: ServiceType,
    pub start_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
}

impl Assignment {
    pub fn new(resource: impl Into<String>, service_type: ServiceType, start_date: NaiveDate) -> Self {
        Self {
            resource: resource.into(),
            service_type,
            start_date,
            end_date: None,
        }
    }

    /// Whether the assignment is in force on `date`.
    pub fn covers(&self, date: NaiveDate) -> bool {
        date >= self.start_date && self.end_date.map(|end| date <= end).unwrap_or(true)
    }
}

/// Tenant record stored at `clients/{clientId}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: ClientId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub active: bool,
    #[serde(default)]
    pub assignments: Vec<Assignment>,
}

impl Client {
    pub fn new(id: ClientId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            email: None,
            active: true,
            assignments: Vec::new(),
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_assignment(mut self, assignment: Assignment) -> Self {
        self.assignments.push(assignment);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.as_str().trim().is_empty() || self.id.as_str().contains('/') {
            return Err(BillingError::validation(
                "clientId",
                "must be non-empty and contain no '/'",
            ));
        }
        if let Some(email) = &self.email {
            if !email.contains('@') {
                return Err(BillingError::validation(
                    "email",
                    format!("'{}' is not an email address", email),
                ));
            }
        }
        for assignment in &self.assignments {
            if assignment.resource.trim().is_empty() {
                return Err(BillingError::validation("resource", "must not be empty"));
            }
            if let Some(end) = assignment.end_date {
                if end < assignment.start_date {
                    return Err(BillingError::validation(
                        "endDate",
                        format!(
                            "assignment of {} ends before it starts",
                            assignment.resource
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn find_assignment(&self, resource: &str, service_type: ServiceType) -> Option<&Assignment> {
        self.assignments
            .iter()
            .filter(|a| a.resource == resource && a.service_type == service_type)
            .max_by_key(|a| a.start_date)
    }

    pub fn active_assignments(&self, date: NaiveDate) -> impl Iterator<Item = &Assignment> {
        self.assignments.iter().filter(move |a| a.covers(date))
    }
}
