use crate::calendar::{monday_on_or_before, PlannerCalendar};
use crate::error::SchedulerError;
use crate::models::{pto_map_to_wire, Assignment, DayDeficit, Person, PtoMap, Task};
use crate::scheduler::{HorizonDriver, SpanOutcome};
use crate::solver::CancelToken;
use crate::store::PlanStore;
use chrono::{Duration, NaiveDate};
use log::info;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Union-merge PTO maps: a day may list several absent people.
pub fn merge_pto_maps(maps: &[&PtoMap]) -> PtoMap {
    let mut merged = PtoMap::new();
    for map in maps {
        for (day, ids) in map.iter() {
            merged
                .entry(*day)
                .or_insert_with(BTreeSet::new)
                .extend(ids.iter().cloned());
        }
    }
    merged
}

/// Decision record for one candidate absence request.
#[derive(Debug, Clone, Serialize)]
pub struct AdmissionOutcome {
    pub pto_person_id: String,
    pub pto_days: Vec<NaiveDate>,
    pub feasible: bool,
    pub unsatisfied: Vec<DayDeficit>,
    pub assignments: Vec<Assignment>,
    pub combined_pto_map: BTreeMap<String, Vec<String>>,
}

/// Admission control: would approving a candidate absence leave every
/// affected week feasible?
///
/// The check itself is mode-agnostic: a fresh (empty) starting store asks
/// whether the team can cover ignoring history, a populated one applies
/// everyone's recent workload. Both run on throwaway stores; the caller's
/// inputs are never mutated.
pub struct PtoAdmission {
    people: Vec<Person>,
    tasks: Vec<Task>,
    calendar: PlannerCalendar,
    now_epoch: i64,
    cancel: CancelToken,
}

impl PtoAdmission {
    pub fn new(
        people: Vec<Person>,
        tasks: Vec<Task>,
        calendar: PlannerCalendar,
        now_epoch: i64,
    ) -> Self {
        PtoAdmission {
            people,
            tasks,
            calendar,
            now_epoch,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn driver(&self) -> HorizonDriver {
        HorizonDriver::new(
            self.people.clone(),
            self.tasks.clone(),
            self.calendar,
            self.now_epoch,
        )
        .with_cancel_token(self.cancel.clone())
    }

    fn candidate_map(person_id: &str, days: &[NaiveDate]) -> PtoMap {
        let mut map = PtoMap::new();
        for day in days {
            map.entry(*day)
                .or_insert_with(BTreeSet::new)
                .insert(person_id.to_string());
        }
        map
    }

    fn cohort_map(cohort: &BTreeMap<String, Vec<NaiveDate>>) -> PtoMap {
        let mut map = PtoMap::new();
        for (person_id, days) in cohort {
            for day in days {
                map.entry(*day)
                    .or_insert_with(BTreeSet::new)
                    .insert(person_id.clone());
            }
        }
        map
    }

    /// Monday-anchored weeks touching the candidate days.
    fn affected_weeks(days: &[NaiveDate]) -> (NaiveDate, NaiveDate) {
        let first = days.iter().min().copied().unwrap();
        let last = days.iter().max().copied().unwrap();
        (monday_on_or_before(first), monday_on_or_before(last))
    }

    fn outcome(
        person_id: &str,
        pto_days: &[NaiveDate],
        combined: &PtoMap,
        outcome: SpanOutcome,
    ) -> AdmissionOutcome {
        let mut days: Vec<NaiveDate> = pto_days.to_vec();
        days.sort();
        days.dedup();
        AdmissionOutcome {
            pto_person_id: person_id.to_string(),
            pto_days: days,
            feasible: outcome.violations.is_empty(),
            unsatisfied: outcome.unsatisfied,
            assignments: outcome.assignments,
            combined_pto_map: pto_map_to_wire(combined),
        }
    }

    fn trivial_outcome(person_id: &str) -> AdmissionOutcome {
        AdmissionOutcome {
            pto_person_id: person_id.to_string(),
            pto_days: Vec::new(),
            feasible: true,
            unsatisfied: Vec::new(),
            assignments: Vec::new(),
            combined_pto_map: BTreeMap::new(),
        }
    }

    /// History-blind check: every affected week is solved on its own empty
    /// store, honoring only the merged PTO map.
    pub fn check_fresh(
        &self,
        person_id: &str,
        pto_days: &[NaiveDate],
        baseline: &PtoMap,
    ) -> Result<AdmissionOutcome, SchedulerError> {
        if pto_days.is_empty() {
            return Ok(Self::trivial_outcome(person_id));
        }
        let candidate = Self::candidate_map(person_id, pto_days);
        let combined = merge_pto_maps(&[baseline, &candidate]);

        let (start_week, end_week) = Self::affected_weeks(pto_days);
        info!(
            "fresh admission check for {}: weeks {}..={}",
            person_id, start_week, end_week
        );

        let driver = self.driver();
        let mut total = SpanOutcome::default();
        let mut cursor = start_week;
        while cursor <= end_week {
            let mut week_store = PlanStore::new();
            let week = driver.schedule_week(&mut week_store, cursor, &combined)?;
            total.assignments.extend(week.assignments);
            total.days.extend(week.days);
            total.unsatisfied.extend(week.unsatisfied);
            total.violations.extend(week.violations);
            cursor += Duration::days(7);
        }
        Ok(Self::outcome(person_id, pto_days, &combined, total))
    }

    /// Strict check: clones `base_store` so the rolling window reflects real
    /// history, merges baseline + candidate + cohort PTO, and schedules
    /// every affected week on the clone.
    pub fn check_strict(
        &self,
        person_id: &str,
        pto_days: &[NaiveDate],
        base_store: &PlanStore,
        baseline: &PtoMap,
        cohort: &BTreeMap<String, Vec<NaiveDate>>,
    ) -> Result<AdmissionOutcome, SchedulerError> {
        if pto_days.is_empty() {
            return Ok(Self::trivial_outcome(person_id));
        }
        let candidate = Self::candidate_map(person_id, pto_days);
        let cohort = Self::cohort_map(cohort);
        let combined = merge_pto_maps(&[baseline, &candidate, &cohort]);

        // The live store stays untouched; the probe runs on a clone.
        let mut probe = base_store.clone();

        let (start_week, end_week) = Self::affected_weeks(pto_days);
        info!(
            "strict admission check for {}: weeks {}..={}",
            person_id, start_week, end_week
        );

        let driver = self.driver();
        let mut total = SpanOutcome::default();
        let mut cursor = start_week;
        while cursor <= end_week {
            let week = driver.schedule_week(&mut probe, cursor, &combined)?;
            total.assignments.extend(week.assignments);
            total.days.extend(week.days);
            total.unsatisfied.extend(week.unsatisfied);
            total.violations.extend(week.violations);
            cursor += Duration::days(7);
        }
        Ok(Self::outcome(person_id, pto_days, &combined, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn person(id: &str, skills: &[&str]) -> Person {
        Person {
            person_id: id.to_string(),
            name: id.to_string(),
            skills: skills.iter().map(|s| s.to_string()).collect(),
            preworked_in_last_6: 0,
        }
    }

    fn task_days(
        cal: &PlannerCalendar,
        id: &str,
        name: &str,
        reqs: &[(&str, u32)],
        start_day: NaiveDate,
        end_day: NaiveDate,
    ) -> Task {
        Task {
            task_id: id.to_string(),
            name: name.to_string(),
            start_ts: cal.day_bounds(start_day).0,
            end_ts: cal.day_bounds(end_day).1,
            daily_requirements: reqs.iter().map(|(s, c)| (s.to_string(), *c)).collect(),
        }
    }

    // Monday 2024-01-01.
    fn monday() -> NaiveDate {
        date(2024, 1, 1)
    }

    fn er_admission() -> PtoAdmission {
        let cal = PlannerCalendar::utc();
        let people = vec![
            person("p1", &["RN", "Triage"]),
            person("p2", &["MD", "ER"]),
            person("p3", &["RN", "ICU"]),
        ];
        let tasks = vec![task_days(
            &cal,
            "er",
            "ER",
            &[("RN", 1), ("MD", 1)],
            monday(),
            date(2024, 1, 7),
        )];
        let now = cal.day_bounds(monday()).0;
        PtoAdmission::new(people, tasks, cal, now)
    }

    #[test]
    fn test_merge_pto_maps_unions_days() {
        let mut a = PtoMap::new();
        a.insert(monday(), ["x".to_string()].into_iter().collect());
        let mut b = PtoMap::new();
        b.insert(monday(), ["y".to_string()].into_iter().collect());
        b.insert(date(2024, 1, 2), ["z".to_string()].into_iter().collect());
        let merged = merge_pto_maps(&[&a, &b]);
        assert_eq!(merged[&monday()].len(), 2);
        assert_eq!(merged[&date(2024, 1, 2)].len(), 1);
    }

    #[test]
    fn test_sole_md_absence_is_rejected_with_md_deficit() {
        let admission = er_admission();
        let store = PlanStore::new();
        let days = vec![date(2024, 1, 2), date(2024, 1, 3)];
        let outcome = admission
            .check_strict("p2", &days, &store, &PtoMap::new(), &BTreeMap::new())
            .unwrap();

        assert!(!outcome.feasible);
        let unsat_days: Vec<NaiveDate> = outcome.unsatisfied.iter().map(|u| u.date).collect();
        assert_eq!(unsat_days, days);
        for unsat in &outcome.unsatisfied {
            assert_eq!(unsat.deficits["ER"]["MD"], 1);
            assert_eq!(unsat.deficits["ER"].len(), 1);
        }
        // Candidate days surface in the combined map.
        assert_eq!(
            outcome.combined_pto_map.get("2024-01-02").unwrap(),
            &vec!["p2".to_string()]
        );
        // The base store is untouched by the probe.
        assert!(store.is_empty());
    }

    #[test]
    fn test_absence_with_alternate_is_approved() {
        let cal = PlannerCalendar::utc();
        let people = vec![
            person("a1", &["frontend"]),
            person("a2", &["frontend"]),
            person("b", &["backend"]),
        ];
        let tasks = vec![task_days(
            &cal,
            "t",
            "T",
            &[("frontend", 1), ("backend", 1)],
            monday(),
            date(2024, 1, 3),
        )];
        let now = cal.day_bounds(monday()).0;
        let admission = PtoAdmission::new(people, tasks, cal, now);
        let outcome = admission
            .check_strict(
                "a1",
                &[monday()],
                &PlanStore::new(),
                &PtoMap::new(),
                &BTreeMap::new(),
            )
            .unwrap();

        assert!(outcome.feasible);
        assert!(outcome
            .assignments
            .iter()
            .filter(|a| a.day == monday())
            .all(|a| a.person_id != "a1"));
        assert!(outcome
            .assignments
            .iter()
            .any(|a| a.day == monday() && a.person_id == "a2"));
    }

    #[test]
    fn test_cohort_requests_count_against_coverage() {
        let cal = PlannerCalendar::utc();
        let people = vec![person("a1", &["frontend"]), person("a2", &["frontend"])];
        let tasks = vec![task_days(
            &cal,
            "t",
            "T",
            &[("frontend", 1)],
            monday(),
            date(2024, 1, 3),
        )];
        let now = cal.day_bounds(monday()).0;
        let admission = PtoAdmission::new(people, tasks, cal, now);

        // Alone, a1's absence is coverable by a2.
        let alone = admission
            .check_strict(
                "a1",
                &[monday()],
                &PlanStore::new(),
                &PtoMap::new(),
                &BTreeMap::new(),
            )
            .unwrap();
        assert!(alone.feasible);

        // With a2 requesting the same day, nobody is left.
        let mut cohort = BTreeMap::new();
        cohort.insert("a2".to_string(), vec![monday()]);
        let contested = admission
            .check_strict("a1", &[monday()], &PlanStore::new(), &PtoMap::new(), &cohort)
            .unwrap();
        assert!(!contested.feasible);
        assert_eq!(
            contested.combined_pto_map.get("2024-01-01").unwrap(),
            &vec!["a1".to_string(), "a2".to_string()]
        );
    }

    #[test]
    fn test_baseline_pto_always_considered() {
        let cal = PlannerCalendar::utc();
        let people = vec![person("a1", &["frontend"]), person("a2", &["frontend"])];
        let tasks = vec![task_days(
            &cal,
            "t",
            "T",
            &[("frontend", 1)],
            monday(),
            date(2024, 1, 3),
        )];
        let now = cal.day_bounds(monday()).0;
        let admission = PtoAdmission::new(people, tasks, cal, now);

        let mut baseline = PtoMap::new();
        baseline.insert(monday(), ["a2".to_string()].into_iter().collect());
        let outcome = admission
            .check_strict(
                "a1",
                &[monday()],
                &PlanStore::new(),
                &baseline,
                &BTreeMap::new(),
            )
            .unwrap();
        assert!(!outcome.feasible);
    }

    #[test]
    fn test_strict_mode_applies_store_history() {
        let cal = PlannerCalendar::utc();
        // Two RNs; candidate asks day 4 off while the alternate has already
        // worked five of the trailing days.
        let people = vec![person("r1", &["RN"]), person("r2", &["RN"])];
        let tasks = vec![task_days(
            &cal,
            "t",
            "Ward",
            &[("RN", 1)],
            date(2024, 1, 4),
            date(2024, 1, 4),
        )];
        let now = cal.day_bounds(monday()).0;
        let admission = PtoAdmission::new(people, tasks, cal, now);

        let mut store = PlanStore::new();
        for d in 30..=31 {
            store.preload_day("r2", date(2023, 12, d));
        }
        for d in 1..=3 {
            store.preload_day("r2", date(2024, 1, d));
        }

        // Fresh check ignores the history and approves.
        let fresh = admission
            .check_fresh("r1", &[date(2024, 1, 4)], &PtoMap::new())
            .unwrap();
        assert!(fresh.feasible);

        // Strict check sees r2 at the cap and rejects.
        let strict = admission
            .check_strict(
                "r1",
                &[date(2024, 1, 4)],
                &store,
                &PtoMap::new(),
                &BTreeMap::new(),
            )
            .unwrap();
        assert!(!strict.feasible);
    }

    #[test]
    fn test_affected_span_covers_every_candidate_week() {
        // Candidate days straddle two Monday-anchored weeks.
        let cal = PlannerCalendar::utc();
        let people = vec![person("p1", &["RN"]), person("p3", &["RN"])];
        let tasks = vec![task_days(
            &cal,
            "ward",
            "Ward",
            &[("RN", 1)],
            monday(),
            date(2024, 1, 14),
        )];
        let now = cal.day_bounds(monday()).0;
        let two_week = PtoAdmission::new(people, tasks, cal, now);
        let outcome = two_week
            .check_fresh("p1", &[date(2024, 1, 5), date(2024, 1, 9)], &PtoMap::new())
            .unwrap();
        assert!(outcome.feasible);
        // Every day of both affected weeks was scheduled.
        let staffed: BTreeSet<NaiveDate> = outcome.assignments.iter().map(|a| a.day).collect();
        assert_eq!(staffed.len(), 14);
        assert!(staffed.contains(&monday()));
        assert!(staffed.contains(&date(2024, 1, 14)));
    }

    #[test]
    fn test_empty_request_is_trivially_feasible() {
        let admission = er_admission();
        let outcome = admission
            .check_strict(
                "p2",
                &[],
                &PlanStore::new(),
                &PtoMap::new(),
                &BTreeMap::new(),
            )
            .unwrap();
        assert!(outcome.feasible);
        assert!(outcome.assignments.is_empty());
    }
}
