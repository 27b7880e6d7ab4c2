use crate::admission::{merge_pto_maps, AdmissionOutcome, PtoAdmission};
use crate::calendar::{month_bounds, parse_iso_date, PlannerCalendar};
use crate::error::SchedulerError;
use crate::models::{
    parse_people, parse_tasks, pto_map_from_wire, Assignment, DayDeficit, DeficitMap,
    PersonInput, PtoMap, TaskInput,
};
use crate::repository::{PtoStatus, ScheduleRepository};
use crate::scheduler::HorizonDriver;
use crate::store::{PlanStore, PlanStoreInput};
use chrono::{Duration, NaiveDate, Utc};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use uuid::Uuid;

fn default_true() -> bool {
    true
}

fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

fn iso(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

// ---------------------------------------------------------------------------
// Wire views shared by both operations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentView {
    pub day: String,
    pub person_id: String,
    pub task_id: String,
    pub skills_contributed: Vec<String>,
}

impl From<&Assignment> for AssignmentView {
    fn from(a: &Assignment) -> Self {
        AssignmentView {
            day: iso(a.day),
            person_id: a.person_id.clone(),
            task_id: a.task_id.clone(),
            skills_contributed: a.skills_contributed.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsatisfiedDay {
    pub date: String,
    pub deficits: DeficitMap,
}

impl From<&DayDeficit> for UnsatisfiedDay {
    fn from(d: &DayDeficit) -> Self {
        UnsatisfiedDay {
            date: iso(d.date),
            deficits: d.deficits.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Calendar computation
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CalendarRequest {
    /// Starting PlanStore in any accepted shape.
    #[serde(default)]
    pub store: Option<PlanStoreInput>,
    /// Alternative key for the same payload, kept for older clients.
    #[serde(default)]
    pub plan_data: Option<PlanStoreInput>,
    /// Extra absences to merge on top of the stored baseline.
    #[serde(default)]
    pub additional_pto: Option<BTreeMap<String, Vec<String>>>,
    #[serde(default)]
    pub tz_offset_hours: i32,
    #[serde(default = "default_true")]
    pub use_global_pto: bool,
    /// Wall clock override; defaults to the host's clock.
    #[serde(default)]
    pub now_epoch: Option<i64>,
}

impl Default for CalendarRequest {
    fn default() -> Self {
        CalendarRequest {
            store: None,
            plan_data: None,
            additional_pto: None,
            tz_offset_hours: 0,
            use_global_pto: true,
            now_epoch: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CalendarResponse {
    pub request_id: String,
    pub success: bool,
    pub took_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub assignments: Vec<AssignmentView>,
    pub unsatisfied: Vec<UnsatisfiedDay>,
}

/// Compute the schedule for the month containing `now_epoch`, pooling every
/// department's people and tasks.
pub async fn compute_calendar(
    repo: &dyn ScheduleRepository,
    request: CalendarRequest,
) -> CalendarResponse {
    let started = Instant::now();
    let request_id = new_request_id();
    debug!("[{}] compute_calendar", request_id);

    match compute_calendar_inner(repo, request).await {
        Ok((year, month, assignments, unsatisfied)) => {
            info!(
                "[{}] month {}-{:02}: {} assignment(s), {} unsatisfied day(s)",
                request_id,
                year,
                month,
                assignments.len(),
                unsatisfied.len()
            );
            CalendarResponse {
                request_id,
                success: true,
                took_ms: started.elapsed().as_millis() as u64,
                error: None,
                year: Some(year),
                month: Some(month),
                assignments,
                unsatisfied,
            }
        }
        Err(e) => {
            error!("[{}] compute_calendar failed: {}", request_id, e);
            CalendarResponse {
                request_id,
                success: false,
                took_ms: started.elapsed().as_millis() as u64,
                error: Some(e.to_string()),
                year: None,
                month: None,
                assignments: Vec::new(),
                unsatisfied: Vec::new(),
            }
        }
    }
}

async fn compute_calendar_inner(
    repo: &dyn ScheduleRepository,
    request: CalendarRequest,
) -> Result<(i32, u32, Vec<AssignmentView>, Vec<UnsatisfiedDay>), SchedulerError> {
    let calendar = PlannerCalendar::from_offset_hours(request.tz_offset_hours)?;
    let now_epoch = request.now_epoch.unwrap_or_else(|| Utc::now().timestamp());
    let (year, month) = calendar.month_of(now_epoch)?;
    let (first, last) = month_bounds(year, month)?;

    let mut store = match request.store.or(request.plan_data) {
        Some(input) => PlanStore::from_wire(input)?,
        None => PlanStore::new(),
    };

    let mut people = Vec::new();
    let mut tasks = Vec::new();
    for department in repo.list_departments().await? {
        people.extend(repo.list_people_in(&department).await?);
        tasks.extend(repo.list_tasks_overlapping(&department, first, last).await?);
    }

    let additional = match &request.additional_pto {
        Some(wire) => pto_map_from_wire(wire)?,
        None => PtoMap::new(),
    };
    let pto = if request.use_global_pto {
        let global = repo.read_pto(first, last).await?;
        merge_pto_maps(&[&global, &additional])
    } else {
        additional
    };

    let driver = HorizonDriver::new(people, tasks, calendar, now_epoch);
    let outcome = driver.schedule_month(&mut store, year, month, &pto)?;

    let assignments = outcome.outcome.assignments.iter().map(AssignmentView::from).collect();
    let unsatisfied = outcome.outcome.unsatisfied.iter().map(UnsatisfiedDay::from).collect();
    Ok((year, month, assignments, unsatisfied))
}

// ---------------------------------------------------------------------------
// PTO approval (strict)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ApprovePtoRequest {
    pub person_id: String,
    pub pto_days: Vec<String>,
    pub people: Vec<PersonInput>,
    pub tasks: Vec<TaskInput>,
    pub now_epoch: i64,
    pub base_store: PlanStoreInput,
    #[serde(default)]
    pub baseline_pto_map: Option<BTreeMap<String, Vec<String>>>,
    #[serde(default)]
    pub cohort_pto_requests: Option<BTreeMap<String, Vec<String>>>,
    #[serde(default = "default_true")]
    pub use_global_pto: bool,
    #[serde(default)]
    pub save_approved_pto: bool,
    #[serde(default)]
    pub tz_offset_hours: i32,
}

#[derive(Debug, Serialize)]
pub struct AdmissionView {
    pub pto_person_id: String,
    pub pto_days: Vec<String>,
    pub feasible: bool,
    pub unsatisfied: Vec<UnsatisfiedDay>,
    pub assignments: Vec<AssignmentView>,
    pub combined_pto_map: BTreeMap<String, Vec<String>>,
    pub pto_saved_to_global: bool,
}

#[derive(Debug, Serialize)]
pub struct ApprovePtoResponse {
    pub request_id: String,
    pub success: bool,
    pub took_ms: u64,
    pub feasible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub result: Option<AdmissionView>,
}

/// Strict admission: history from the caller's store applies, baseline and
/// cohort absences are merged in, and an approved result may be persisted.
pub async fn approve_pto(
    repo: &dyn ScheduleRepository,
    request: ApprovePtoRequest,
) -> ApprovePtoResponse {
    let started = Instant::now();
    let request_id = new_request_id();
    debug!(
        "[{}] approve_pto for {} ({} day(s))",
        request_id,
        request.person_id,
        request.pto_days.len()
    );

    match approve_pto_inner(repo, request).await {
        Ok(view) => {
            info!(
                "[{}] admission decision for {}: feasible={}",
                request_id, view.pto_person_id, view.feasible
            );
            ApprovePtoResponse {
                request_id,
                success: true,
                took_ms: started.elapsed().as_millis() as u64,
                feasible: view.feasible,
                error: None,
                result: Some(view),
            }
        }
        Err(e) => {
            error!("[{}] approve_pto failed: {}", request_id, e);
            ApprovePtoResponse {
                request_id,
                success: false,
                took_ms: started.elapsed().as_millis() as u64,
                feasible: false,
                error: Some(e.to_string()),
                result: None,
            }
        }
    }
}

async fn approve_pto_inner(
    repo: &dyn ScheduleRepository,
    request: ApprovePtoRequest,
) -> Result<AdmissionView, SchedulerError> {
    let calendar = PlannerCalendar::from_offset_hours(request.tz_offset_hours)?;
    let people = parse_people(request.people)?;
    let tasks = parse_tasks(request.tasks)?;
    let base_store = PlanStore::from_wire(request.base_store)?;

    let mut pto_days = Vec::new();
    for day in &request.pto_days {
        pto_days.push(parse_iso_date(day)?);
    }

    let mut baseline = match &request.baseline_pto_map {
        Some(wire) => pto_map_from_wire(wire)?,
        None => PtoMap::new(),
    };
    if request.use_global_pto && !pto_days.is_empty() {
        let first = *pto_days.iter().min().unwrap();
        let last = *pto_days.iter().max().unwrap();
        let global = repo.read_pto(first, last).await?;
        baseline = merge_pto_maps(&[&global, &baseline]);
    }

    let mut cohort: BTreeMap<String, Vec<NaiveDate>> = BTreeMap::new();
    if let Some(requests) = &request.cohort_pto_requests {
        for (person_id, days) in requests {
            let mut parsed = Vec::new();
            for day in days {
                parsed.push(parse_iso_date(day)?);
            }
            cohort.insert(person_id.clone(), parsed);
        }
    }

    let admission = PtoAdmission::new(people, tasks, calendar, request.now_epoch);
    let outcome = admission.check_strict(
        &request.person_id,
        &pto_days,
        &base_store,
        &baseline,
        &cohort,
    )?;

    let mut saved = false;
    if outcome.feasible && request.save_approved_pto {
        match repo
            .write_pto(&outcome.pto_person_id, &outcome.pto_days, PtoStatus::Approved)
            .await
        {
            Ok(()) => saved = true,
            Err(e) => error!("Failed to save approved PTO request: {}", e),
        }
    }

    Ok(admission_view(outcome, saved))
}

fn admission_view(outcome: AdmissionOutcome, saved: bool) -> AdmissionView {
    AdmissionView {
        pto_person_id: outcome.pto_person_id,
        pto_days: outcome.pto_days.iter().map(|d| iso(*d)).collect(),
        feasible: outcome.feasible,
        unsatisfied: outcome.unsatisfied.iter().map(UnsatisfiedDay::from).collect(),
        assignments: outcome.assignments.iter().map(AssignmentView::from).collect(),
        combined_pto_map: outcome.combined_pto_map,
        pto_saved_to_global: saved,
    }
}

// ---------------------------------------------------------------------------
// Siloed per-department week runs
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct DepartmentWeek {
    pub assignments: Vec<AssignmentView>,
    pub unsatisfied: Vec<UnsatisfiedDay>,
    pub plan_store: BTreeMap<String, Vec<String>>,
}

/// Schedule one Monday-anchored week for every department in isolation:
/// each department sees only its own people, tasks, and a fresh store.
pub async fn schedule_departments_week(
    repo: &dyn ScheduleRepository,
    week_start: NaiveDate,
    now_epoch: i64,
    calendar: PlannerCalendar,
    use_global_pto: bool,
) -> Result<BTreeMap<String, DepartmentWeek>, SchedulerError> {
    let week_end = week_start + Duration::days(6);
    let pto = if use_global_pto {
        repo.read_pto(week_start, week_end).await?
    } else {
        PtoMap::new()
    };

    let mut results = BTreeMap::new();
    for department in repo.list_departments().await? {
        let people = repo.list_people_in(&department).await?;
        let tasks = repo
            .list_tasks_overlapping(&department, week_start, week_end)
            .await?;
        let driver = HorizonDriver::new(people, tasks, calendar, now_epoch);
        let mut store = PlanStore::new();
        let outcome = driver.schedule_week(&mut store, week_start, &pto)?;
        results.insert(
            department,
            DepartmentWeek {
                assignments: outcome.assignments.iter().map(AssignmentView::from).collect(),
                unsatisfied: outcome.unsatisfied.iter().map(UnsatisfiedDay::from).collect(),
                plan_store: store.to_portable(),
            },
        );
    }
    Ok(results)
}
