use crate::error::SchedulerError;
use crate::models::{Person, PtoMap, Task};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a stored PTO request. Only approved entries feed the
/// scheduling PTO map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PtoStatus {
    Approved,
    Pending,
    Denied,
}

impl PtoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PtoStatus::Approved => "approved",
            PtoStatus::Pending => "pending",
            PtoStatus::Denied => "denied",
        }
    }

    pub fn parse(value: &str) -> Result<Self, SchedulerError> {
        match value {
            "approved" => Ok(PtoStatus::Approved),
            "pending" => Ok(PtoStatus::Pending),
            "denied" => Ok(PtoStatus::Denied),
            other => Err(SchedulerError::invalid_input(format!(
                "unknown PTO status '{}'",
                other
            ))),
        }
    }
}

/// The narrow storage contract the core consumes. Implementations live at
/// the edge (the `db` module ships a SQLite adapter); the core only ever
/// sees this trait, passed in by the host.
#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    async fn list_departments(&self) -> Result<Vec<String>, SchedulerError>;

    /// People of one department, skills materialized as a set.
    async fn list_people_in(&self, department: &str) -> Result<Vec<Person>, SchedulerError>;

    /// Tasks whose active interval intersects [start_date, end_date].
    async fn list_tasks_overlapping(
        &self,
        department: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<Task>, SchedulerError>;

    /// Approved absences in the inclusive date range.
    async fn read_pto(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<PtoMap, SchedulerError>;

    /// Idempotent upsert keyed (person, date).
    async fn write_pto(
        &self,
        person_id: &str,
        days: &[NaiveDate],
        status: PtoStatus,
    ) -> Result<(), SchedulerError>;

    /// Idempotent removal keyed (person, date).
    async fn delete_pto(&self, person_id: &str, days: &[NaiveDate])
        -> Result<(), SchedulerError>;
}
