use crate::calendar::parse_iso_date;
use crate::error::SchedulerError;
use crate::models::Assignment;
use chrono::{Duration, NaiveDate};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};

/// Rolling cap: no person works more than this many days in any window of
/// seven consecutive calendar days.
pub const MAX_DAYS_PER_WINDOW: u32 = 5;

/// Per-person ledger of committed work days.
///
/// The store models days only, never tasks. It is the single mutable
/// structure inside a solve; the driver writes to it through `commit` at the
/// end of each successful day, and the admission check operates on a clone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanStore {
    days_by_person: BTreeMap<String, BTreeSet<NaiveDate>>,
}

/// Accepted wire shapes for a serialized store: the flat portable mapping,
/// the same mapping wrapped under `days_by_person`, or the portable JSON
/// embedded as a string under `json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PlanStoreInput {
    Wrapped {
        days_by_person: BTreeMap<String, Vec<String>>,
    },
    Embedded {
        json: String,
    },
    Flat(BTreeMap<String, Vec<String>>),
}

impl PlanStore {
    pub fn new() -> Self {
        PlanStore::default()
    }

    /// Seed prior history, e.g. commitments that predate the horizon.
    pub fn preload(&mut self, assignments: &[Assignment]) {
        for a in assignments {
            self.preload_day(&a.person_id, a.day);
        }
    }

    pub fn preload_day(&mut self, person_id: &str, day: NaiveDate) {
        self.days_by_person
            .entry(person_id.to_string())
            .or_default()
            .insert(day);
    }

    pub fn assigned_on(&self, person_id: &str, day: NaiveDate) -> bool {
        self.days_by_person
            .get(person_id)
            .map(|days| days.contains(&day))
            .unwrap_or(false)
    }

    /// Committed days in the inclusive date range [start_day, end_day].
    pub fn count_in_window(&self, person_id: &str, start_day: NaiveDate, end_day: NaiveDate) -> u32 {
        self.days_by_person
            .get(person_id)
            .map(|days| days.range(start_day..=end_day).count() as u32)
            .unwrap_or(0)
    }

    /// Two-phase rolling-cap check over the window [day-6, day].
    ///
    /// With `pending_same_day == false` the caller asks whether the person is
    /// still eligible to pick up `day`: the committed count must leave room
    /// for one more (<= 4). With `pending_same_day == true` the caller is
    /// probing a tentative same-day assignment that is not yet committed
    /// here, so the day itself is counted in before comparing against the
    /// cap (<= 5).
    pub fn can_assign(&self, person_id: &str, day: NaiveDate, pending_same_day: bool) -> bool {
        let window_start = day - Duration::days(6);
        let mut used = self.count_in_window(person_id, window_start, day);
        if pending_same_day && !self.assigned_on(person_id, day) {
            used += 1;
        }
        let limit = if pending_same_day {
            MAX_DAYS_PER_WINDOW
        } else {
            MAX_DAYS_PER_WINDOW - 1
        };
        used <= limit
    }

    /// Idempotently record (person, day) for each assignment.
    pub fn commit(&mut self, assignments: &[Assignment]) {
        for a in assignments {
            self.days_by_person
                .entry(a.person_id.clone())
                .or_default()
                .insert(a.day);
        }
    }

    /// Portable form: person id -> sorted ISO dates.
    pub fn to_portable(&self) -> BTreeMap<String, Vec<String>> {
        self.days_by_person
            .iter()
            .map(|(pid, days)| {
                (
                    pid.clone(),
                    days.iter().map(|d| d.format("%Y-%m-%d").to_string()).collect(),
                )
            })
            .collect()
    }

    /// Rebuild from the portable form. Duplicate dates are tolerated; bad
    /// dates are InvalidInput.
    pub fn from_portable(
        portable: &BTreeMap<String, Vec<String>>,
    ) -> Result<Self, SchedulerError> {
        let mut store = PlanStore::new();
        for (pid, days) in portable {
            let parsed = store.days_by_person.entry(pid.clone()).or_default();
            for day in days {
                parsed.insert(parse_iso_date(day)?);
            }
        }
        Ok(store)
    }

    pub fn to_json(&self) -> Result<String, SchedulerError> {
        serde_json::to_string(&self.to_portable())
            .map_err(|e| SchedulerError::invalid_input(format!("plan store encode: {}", e)))
    }

    pub fn from_json(payload: &str) -> Result<Self, SchedulerError> {
        let portable: BTreeMap<String, Vec<String>> = serde_json::from_str(payload)
            .map_err(|e| SchedulerError::invalid_input(format!("plan store payload: {}", e)))?;
        PlanStore::from_portable(&portable)
    }

    /// Normalize any accepted wire shape into a store.
    pub fn from_wire(input: PlanStoreInput) -> Result<Self, SchedulerError> {
        match input {
            PlanStoreInput::Wrapped { days_by_person } => PlanStore::from_portable(&days_by_person),
            PlanStoreInput::Embedded { json } => PlanStore::from_json(&json),
            PlanStoreInput::Flat(mapping) => PlanStore::from_portable(&mapping),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.days_by_person.values().all(|days| days.is_empty())
    }
}
