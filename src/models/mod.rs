use crate::calendar::parse_iso_date;
use crate::error::SchedulerError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Residual uncovered headcount, keyed task display name -> skill -> count.
pub type DeficitMap = BTreeMap<String, BTreeMap<String, u32>>;

/// Approved absences: calendar day -> person ids absent that day.
pub type PtoMap = BTreeMap<NaiveDate, BTreeSet<String>>;

pub const MAX_PREWORKED: u8 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub person_id: String,
    pub name: String,
    pub skills: BTreeSet<String>,
    /// How many of the six days before the horizon start this person
    /// already worked, in [0, 5].
    pub preworked_in_last_6: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub name: String,
    /// Active interval [start_ts, end_ts) in epoch seconds.
    pub start_ts: i64,
    pub end_ts: i64,
    /// Per-day headcount by skill; applies identically to every active day.
    pub daily_requirements: BTreeMap<String, u32>,
}

impl Task {
    /// Half-open interval test: active iff the task overlaps the day's
    /// local-midnight bounds. A task starting exactly at the day's end is
    /// not active on that day.
    pub fn active_on(&self, day_start_ts: i64, day_end_ts: i64) -> bool {
        self.start_ts < day_end_ts && self.end_ts > day_start_ts
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub day: NaiveDate,
    pub person_id: String,
    pub task_id: String,
    /// The skills this person was counted for on this task, sorted.
    pub skills_contributed: Vec<String>,
}

/// Coverage record for one task on one day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCoverage {
    pub task_id: String,
    /// skill -> persons covering it; each list length equals the required count.
    pub skill_coverage: BTreeMap<String, Vec<String>>,
    /// Reverse index: person -> skills contributed on this task.
    pub people_contributions: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaySchedule {
    pub date: NaiveDate,
    pub assignments: Vec<TaskCoverage>,
}

impl DaySchedule {
    pub fn empty(date: NaiveDate) -> Self {
        DaySchedule {
            date,
            assignments: Vec::new(),
        }
    }
}

/// An infeasible day and what remained uncovered on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayDeficit {
    pub date: NaiveDate,
    pub deficits: DeficitMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HorizonSchedule {
    pub start_iso: String,
    pub end_iso: String,
    pub tz_offset_hours: i32,
    pub current_ts: i64,
    pub allow_future: bool,
    pub feasible: bool,
    pub violations: Vec<String>,
    pub days: Vec<DaySchedule>,
    /// Per-day residual deficits for every violated day.
    pub unsatisfied: Vec<DayDeficit>,
}

// ---------------------------------------------------------------------------
// Wire inputs
//
// Each boundary payload has exactly one normalizer that accepts the variant
// key names seen in the wild, rejects missing or out-of-range fields with
// InvalidInput, and returns the canonical record.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct PersonInput {
    #[serde(alias = "id")]
    pub person_id: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default, alias = "preworked_in_last_7")]
    pub preworked_in_last_6: Option<u8>,
}

impl PersonInput {
    pub fn into_person(self) -> Result<Person, SchedulerError> {
        let person_id = self
            .person_id
            .ok_or_else(|| SchedulerError::invalid_input("person requires 'person_id' (or 'id')"))?;
        let name = self.name.ok_or_else(|| {
            SchedulerError::invalid_input(format!("person '{}' requires 'name'", person_id))
        })?;
        let preworked = self.preworked_in_last_6.unwrap_or(0);
        if preworked > MAX_PREWORKED {
            return Err(SchedulerError::invalid_input(format!(
                "person '{}': preworked_in_last_6 must be in [0, 5], got {}",
                person_id, preworked
            )));
        }
        Ok(Person {
            person_id,
            name,
            skills: self.skills.into_iter().collect(),
            preworked_in_last_6: preworked,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskInput {
    #[serde(alias = "id")]
    pub task_id: Option<String>,
    pub name: Option<String>,
    #[serde(alias = "start")]
    pub start_epoch: Option<i64>,
    #[serde(alias = "end")]
    pub end_epoch: Option<i64>,
    #[serde(alias = "requirements")]
    pub daily_requirements: Option<BTreeMap<String, i64>>,
}

impl TaskInput {
    pub fn into_task(self) -> Result<Task, SchedulerError> {
        let task_id = self
            .task_id
            .ok_or_else(|| SchedulerError::invalid_input("task requires 'task_id' (or 'id')"))?;
        let name = self.name.ok_or_else(|| {
            SchedulerError::invalid_input(format!("task '{}' requires 'name'", task_id))
        })?;
        let start_ts = self.start_epoch.ok_or_else(|| {
            SchedulerError::invalid_input(format!(
                "task '{}' requires 'start_epoch' (or 'start')",
                task_id
            ))
        })?;
        let end_ts = self.end_epoch.ok_or_else(|| {
            SchedulerError::invalid_input(format!(
                "task '{}' requires 'end_epoch' (or 'end')",
                task_id
            ))
        })?;
        let raw = self.daily_requirements.ok_or_else(|| {
            SchedulerError::invalid_input(format!(
                "task '{}' requires 'daily_requirements' (or 'requirements')",
                task_id
            ))
        })?;
        let mut daily_requirements = BTreeMap::new();
        for (skill, count) in raw {
            if count <= 0 {
                return Err(SchedulerError::invalid_input(format!(
                    "task '{}': requirement for skill '{}' must be positive, got {}",
                    task_id, skill, count
                )));
            }
            daily_requirements.insert(skill, count as u32);
        }
        Ok(Task {
            task_id,
            name,
            start_ts,
            end_ts,
            daily_requirements,
        })
    }
}

/// Normalize a wire PTO map (`ISO date -> [person_id]`) into the canonical
/// day-keyed form, union semantics per day.
pub fn pto_map_from_wire(wire: &BTreeMap<String, Vec<String>>) -> Result<PtoMap, SchedulerError> {
    let mut map = PtoMap::new();
    for (day, people) in wire {
        let day = parse_iso_date(day)?;
        map.entry(day)
            .or_insert_with(BTreeSet::new)
            .extend(people.iter().cloned());
    }
    Ok(map)
}

/// Render the canonical PTO map back to its wire form.
pub fn pto_map_to_wire(map: &PtoMap) -> BTreeMap<String, Vec<String>> {
    map.iter()
        .map(|(day, ids)| {
            (
                day.format("%Y-%m-%d").to_string(),
                ids.iter().cloned().collect(),
            )
        })
        .collect()
}

pub fn parse_people(inputs: Vec<PersonInput>) -> Result<Vec<Person>, SchedulerError> {
    inputs.into_iter().map(PersonInput::into_person).collect()
}

pub fn parse_tasks(inputs: Vec<TaskInput>) -> Result<Vec<Task>, SchedulerError> {
    inputs.into_iter().map(TaskInput::into_task).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_person_input_accepts_canonical_keys() {
        let input: PersonInput = serde_json::from_str(
            r#"{"person_id": "p1", "name": "Ana", "skills": ["RN", "Triage"], "preworked_in_last_6": 2}"#,
        )
        .unwrap();
        let person = input.into_person().unwrap();
        assert_eq!(person.person_id, "p1");
        assert_eq!(person.preworked_in_last_6, 2);
        assert!(person.skills.contains("RN"));
    }

    #[test]
    fn test_person_input_accepts_id_alias() {
        let input: PersonInput =
            serde_json::from_str(r#"{"id": "p2", "name": "Bo", "skills": []}"#).unwrap();
        let person = input.into_person().unwrap();
        assert_eq!(person.person_id, "p2");
        assert_eq!(person.preworked_in_last_6, 0);
    }

    #[test]
    fn test_person_input_missing_name_rejected() {
        let input: PersonInput = serde_json::from_str(r#"{"id": "p3"}"#).unwrap();
        let err = input.into_person().unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidInput(_)));
    }

    #[test]
    fn test_person_input_preworked_out_of_range() {
        let input: PersonInput =
            serde_json::from_str(r#"{"id": "p4", "name": "Cy", "preworked_in_last_6": 6}"#).unwrap();
        assert!(input.into_person().is_err());
    }

    #[test]
    fn test_task_input_accepts_alias_keys() {
        let input: TaskInput = serde_json::from_str(
            r#"{"id": "t1", "name": "ER", "start": 100, "end": 200, "requirements": {"RN": 1}}"#,
        )
        .unwrap();
        let task = input.into_task().unwrap();
        assert_eq!(task.task_id, "t1");
        assert_eq!(task.start_ts, 100);
        assert_eq!(task.end_ts, 200);
        assert_eq!(task.daily_requirements.get("RN"), Some(&1));
    }

    #[test]
    fn test_task_input_rejects_non_positive_counts() {
        let input: TaskInput = serde_json::from_str(
            r#"{"id": "t1", "name": "ER", "start": 0, "end": 1, "daily_requirements": {"RN": 0}}"#,
        )
        .unwrap();
        assert!(input.into_task().is_err());
    }

    #[test]
    fn test_task_input_missing_interval_rejected() {
        let input: TaskInput =
            serde_json::from_str(r#"{"id": "t1", "name": "ER", "requirements": {}}"#).unwrap();
        assert!(input.into_task().is_err());
    }

    #[test]
    fn test_task_activity_half_open_interval() {
        let task = Task {
            task_id: "t".into(),
            name: "t".into(),
            start_ts: 1000,
            end_ts: 2000,
            daily_requirements: BTreeMap::new(),
        };
        assert!(task.active_on(500, 1500));
        assert!(task.active_on(1500, 2500));
        // Starting exactly at the day's end: not active on that day.
        assert!(!task.active_on(0, 1000));
        // Ending exactly at the day's start: not active either.
        assert!(!task.active_on(2000, 3000));
    }

    #[test]
    fn test_pto_map_wire_round_trip() {
        let mut wire = BTreeMap::new();
        wire.insert(
            "2024-01-02".to_string(),
            vec!["b".to_string(), "a".to_string()],
        );
        wire.insert("2024-01-01".to_string(), vec!["a".to_string()]);
        let map = pto_map_from_wire(&wire).unwrap();
        assert_eq!(map.len(), 2);
        let back = pto_map_to_wire(&map);
        assert_eq!(
            back.get("2024-01-02").unwrap(),
            &vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn test_pto_map_from_wire_rejects_bad_date() {
        let mut wire = BTreeMap::new();
        wire.insert("01/02/2024".to_string(), vec!["a".to_string()]);
        assert!(pto_map_from_wire(&wire).is_err());
    }
}
