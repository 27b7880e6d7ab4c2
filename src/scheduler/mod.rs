use crate::calendar::{self, PlannerCalendar};
use crate::error::SchedulerError;
use crate::models::{
    Assignment, DayDeficit, DaySchedule, HorizonSchedule, Person, PtoMap, Task,
};
use crate::solver::{CancelToken, DayOutcome, DaySolver};
use crate::store::PlanStore;
use chrono::{Duration, NaiveDate};
use log::{debug, info, warn};
use std::collections::BTreeSet;

/// Aggregated result of a multi-day run.
#[derive(Debug, Clone, Default)]
pub struct SpanOutcome {
    pub assignments: Vec<Assignment>,
    pub days: Vec<DaySchedule>,
    pub unsatisfied: Vec<DayDeficit>,
    pub violations: Vec<String>,
}

impl SpanOutcome {
    pub fn feasible(&self) -> bool {
        self.violations.is_empty()
    }

    fn absorb(&mut self, other: SpanOutcome) {
        self.assignments.extend(other.assignments);
        self.days.extend(other.days);
        self.unsatisfied.extend(other.unsatisfied);
        self.violations.extend(other.violations);
    }
}

/// Month run: a span plus the month it covers.
#[derive(Debug, Clone)]
pub struct MonthOutcome {
    pub year: i32,
    pub month: u32,
    pub outcome: SpanOutcome,
}

/// Sequences day solves across a horizon, carrying the rolling-window
/// history forward through the caller's `PlanStore`.
///
/// The loop is strictly day-ordered: day N+1 observes the post-commit state
/// of day N. The driver owns no mutable state of its own; everything it
/// writes goes through `PlanStore::commit` at the end of a successful day.
pub struct HorizonDriver {
    people: Vec<Person>,
    tasks: Vec<Task>,
    calendar: PlannerCalendar,
    current_ts: i64,
    allow_future: bool,
    cancel: CancelToken,
}

impl HorizonDriver {
    pub fn new(
        people: Vec<Person>,
        tasks: Vec<Task>,
        calendar: PlannerCalendar,
        current_ts: i64,
    ) -> Self {
        let mut people = people;
        people.sort_by(|a, b| (&a.name, &a.person_id).cmp(&(&b.name, &b.person_id)));
        let mut tasks = tasks;
        tasks.sort_by(|a, b| (&a.name, &a.task_id).cmp(&(&b.name, &b.task_id)));
        HorizonDriver {
            people,
            tasks,
            calendar,
            current_ts,
            allow_future: true,
            cancel: CancelToken::new(),
        }
    }

    /// When disabled, days strictly after `current_ts` are skipped with an
    /// empty schedule instead of being solved.
    pub fn allow_future(mut self, allow: bool) -> Self {
        self.allow_future = allow;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Express each person's `preworked_in_last_6` as committed history: the
    /// oldest k of the six days before `horizon_start`, so the walking
    /// window relaxes one day at a time as the horizon advances.
    pub fn seed_history(&self, store: &mut PlanStore, horizon_start: NaiveDate) {
        for person in &self.people {
            let k = i64::from(person.preworked_in_last_6.min(5));
            for i in 0..k {
                store.preload_day(&person.person_id, horizon_start - Duration::days(6 - i));
            }
        }
    }

    fn active_tasks_for(&self, day_start_ts: i64, day_end_ts: i64) -> Vec<&Task> {
        // Tasks that already ended before the wall clock are history; they
        // are never staffed retroactively.
        self.tasks
            .iter()
            .filter(|t| t.active_on(day_start_ts, day_end_ts) && t.end_ts >= self.current_ts)
            .collect()
    }

    fn attempt_day(
        &self,
        store: &mut PlanStore,
        day: NaiveDate,
        pto: &PtoMap,
    ) -> Result<DayResult, SchedulerError> {
        self.cancel.checkpoint()?;
        let (day_start, day_end) = self.calendar.day_bounds(day);

        if !self.allow_future && day_start > self.current_ts {
            debug!("{}: skipping future day beyond current_ts", day);
            return Ok(DayResult::empty(day));
        }

        let active = self.active_tasks_for(day_start, day_end);
        if active.is_empty() {
            debug!("{}: no active tasks", day);
            return Ok(DayResult::empty(day));
        }
        info!(
            "{}: solving {} active task(s)",
            day,
            active.len()
        );

        let pto_today: BTreeSet<String> = pto.get(&day).cloned().unwrap_or_default();
        let solver = DaySolver::new(day, &self.people, active, store, pto_today);
        match solver.solve(&self.cancel)? {
            DayOutcome::Feasible {
                assignments,
                schedule,
            } => {
                store.commit(&assignments);
                info!("{}: solved with {} assignment(s)", day, assignments.len());
                Ok(DayResult {
                    schedule,
                    assignments,
                    deficits: None,
                })
            }
            DayOutcome::Infeasible { deficits } => {
                warn!("{}: unsatisfiable day, deficits: {:?}", day, deficits);
                Ok(DayResult {
                    schedule: DaySchedule::empty(day),
                    assignments: Vec::new(),
                    deficits: Some(deficits),
                })
            }
        }
    }

    /// Run consecutive days, committing each successful day before moving on.
    pub fn run_span(
        &self,
        store: &mut PlanStore,
        start_day: NaiveDate,
        span_days: u32,
        pto: &PtoMap,
    ) -> Result<SpanOutcome, SchedulerError> {
        let mut outcome = SpanOutcome::default();
        let end_day = start_day + Duration::days(i64::from(span_days) - 1);
        for day in calendar::iter_days(start_day, end_day) {
            let result = self.attempt_day(store, day, pto)?;
            if let Some(deficits) = result.deficits {
                outcome.violations.push(format!(
                    "{}: could not satisfy all active tasks within constraints",
                    day
                ));
                outcome.unsatisfied.push(DayDeficit { date: day, deficits });
            }
            outcome.assignments.extend(result.assignments);
            outcome.days.push(result.schedule);
        }
        Ok(outcome)
    }

    /// Seven days anchored on a Monday. History comes solely from the
    /// caller's store; nothing is seeded here.
    pub fn schedule_week(
        &self,
        store: &mut PlanStore,
        week_start: NaiveDate,
        pto: &PtoMap,
    ) -> Result<SpanOutcome, SchedulerError> {
        self.run_span(store, week_start, 7, pto)
    }

    /// Solve a whole horizon and assemble the schedule document. Seeds each
    /// person's preworked history at `start_day` first.
    pub fn build_horizon(
        &self,
        store: &mut PlanStore,
        start_day: NaiveDate,
        span_days: u32,
        pto: &PtoMap,
    ) -> Result<HorizonSchedule, SchedulerError> {
        self.seed_history(store, start_day);
        let outcome = self.run_span(store, start_day, span_days, pto)?;
        let feasible = outcome.feasible();

        let mut days = outcome.days;
        if !feasible {
            // Source behavior: an infeasible horizon publishes no per-day
            // assignments; `feasible` and the violation list stay authoritative.
            for day in &mut days {
                day.assignments.clear();
            }
        }

        let end_day = start_day + Duration::days(i64::from(span_days));
        Ok(HorizonSchedule {
            start_iso: self.calendar.day_start(start_day).to_rfc3339(),
            end_iso: self.calendar.day_start(end_day).to_rfc3339(),
            tz_offset_hours: self.calendar.offset_hours(),
            current_ts: self.current_ts,
            allow_future: self.allow_future,
            feasible,
            violations: outcome.violations,
            days,
            unsatisfied: outcome.unsatisfied,
        })
    }

    /// Schedule a calendar month week by week, from the Monday on or before
    /// the 1st through the week containing the last day. The shared store
    /// makes the rolling cap persist across week boundaries.
    pub fn schedule_month(
        &self,
        store: &mut PlanStore,
        year: i32,
        month: u32,
        pto: &PtoMap,
    ) -> Result<MonthOutcome, SchedulerError> {
        let (first, last) = calendar::month_bounds(year, month)?;
        let mut cursor = calendar::monday_on_or_before(first);
        self.seed_history(store, cursor);

        info!(
            "scheduling month {}-{:02} from week of {}",
            year, month, cursor
        );
        let mut outcome = SpanOutcome::default();
        while cursor <= last {
            let week = self.schedule_week(store, cursor, pto)?;
            outcome.absorb(week);
            cursor += Duration::days(7);
        }
        Ok(MonthOutcome {
            year,
            month,
            outcome,
        })
    }
}

struct DayResult {
    schedule: DaySchedule,
    assignments: Vec<Assignment>,
    deficits: Option<crate::models::DeficitMap>,
}

impl DayResult {
    fn empty(day: NaiveDate) -> Self {
        DayResult {
            schedule: DaySchedule::empty(day),
            assignments: Vec::new(),
            deficits: None,
        }
    }
}
