use crate::error::SchedulerError;
use crate::models::{Assignment, DaySchedule, DeficitMap, Person, Task, TaskCoverage};
use crate::store::PlanStore;
use chrono::{Duration, NaiveDate};
use log::debug;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag, checked between day iterations and
/// between backtracking branches. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    pub(crate) fn checkpoint(&self) -> Result<(), SchedulerError> {
        if self.is_cancelled() {
            Err(SchedulerError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Result of one day-level solve. Infeasibility is a value, not an error.
#[derive(Debug, Clone)]
pub enum DayOutcome {
    Feasible {
        assignments: Vec<Assignment>,
        schedule: DaySchedule,
    },
    Infeasible {
        deficits: DeficitMap,
    },
}

/// Deterministic backtracking solver for a single day.
///
/// State is a per-task-per-skill deficit table plus the set of people
/// already placed today. Subgoals are chosen most-constrained-first with
/// total-order tie-breaks, so identical inputs always walk the same tree.
pub struct DaySolver<'a> {
    day: NaiveDate,
    people: Vec<&'a Person>,
    tasks: Vec<&'a Task>,
    store: &'a PlanStore,
    pto_today: BTreeSet<String>,

    deficits: BTreeMap<String, BTreeMap<String, u32>>,
    assigned_today: BTreeMap<String, AssignedSlot>,
    coverage: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

#[derive(Debug, Clone)]
struct AssignedSlot {
    task_id: String,
    skills: Vec<String>,
}

impl<'a> DaySolver<'a> {
    pub fn new(
        day: NaiveDate,
        people: &'a [Person],
        tasks: Vec<&'a Task>,
        store: &'a PlanStore,
        pto_today: BTreeSet<String>,
    ) -> Self {
        let mut people: Vec<&Person> = people.iter().collect();
        people.sort_by(|a, b| (&a.name, &a.person_id).cmp(&(&b.name, &b.person_id)));
        let mut tasks = tasks;
        tasks.sort_by(|a, b| (&a.name, &a.task_id).cmp(&(&b.name, &b.task_id)));

        let deficits = tasks
            .iter()
            .map(|t| {
                (
                    t.task_id.clone(),
                    t.daily_requirements
                        .iter()
                        .filter(|(_, c)| **c > 0)
                        .map(|(s, c)| (s.clone(), *c))
                        .collect(),
                )
            })
            .collect();

        DaySolver {
            day,
            people,
            tasks,
            store,
            pto_today,
            deficits,
            assigned_today: BTreeMap::new(),
            coverage: BTreeMap::new(),
        }
    }

    fn is_pto(&self, person_id: &str) -> bool {
        self.pto_today.contains(person_id)
    }

    fn all_satisfied(&self) -> bool {
        self.deficits
            .values()
            .all(|skills| skills.values().all(|c| *c == 0))
    }

    /// The open (task, skill) pair with the largest deficit; ties fall to
    /// the lexicographically smallest (task name, skill).
    fn select_next_need(&self) -> Option<(usize, String)> {
        let mut best: Option<(usize, String)> = None;
        let mut best_need = 0u32;
        for (idx, task) in self.tasks.iter().enumerate() {
            if let Some(skills) = self.deficits.get(&task.task_id) {
                for (skill, count) in skills {
                    if *count > best_need {
                        best = Some((idx, skill.clone()));
                        best_need = *count;
                    }
                }
            }
        }
        best
    }

    /// Eligible people for (task, skill), ranked by how many open skills of
    /// this task they would cover (desc), then how little they worked in the
    /// prior six days (asc), then name.
    fn candidates_for(&self, task_idx: usize, required_skill: &str) -> Vec<usize> {
        let task = self.tasks[task_idx];
        let needs = &self.deficits[&task.task_id];
        let window_start = self.day - Duration::days(6);
        let window_end = self.day - Duration::days(1);

        let mut ranked: Vec<(usize, u32, u32)> = Vec::new();
        for (p_idx, person) in self.people.iter().enumerate() {
            if self.is_pto(&person.person_id) {
                continue;
            }
            if self.assigned_today.contains_key(&person.person_id) {
                continue;
            }
            if !person.skills.contains(required_skill) {
                continue;
            }
            // Redundant given the skill check above; kept as a guard against
            // tasks whose requirement keys drift from the skill vocabulary.
            if !task
                .daily_requirements
                .keys()
                .any(|s| person.skills.contains(s))
            {
                continue;
            }
            if !self.store.can_assign(&person.person_id, self.day, false) {
                continue;
            }
            let multi_cover = task
                .daily_requirements
                .keys()
                .filter(|s| person.skills.contains(*s) && needs.get(*s).copied().unwrap_or(0) > 0)
                .count() as u32;
            let used_last6 =
                self.store
                    .count_in_window(&person.person_id, window_start, window_end);
            ranked.push((p_idx, multi_cover, used_last6));
        }
        // People are pre-sorted by name, so a stable sort on the first two
        // keys leaves name as the final tie-break.
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
        ranked.into_iter().map(|(idx, _, _)| idx).collect()
    }

    /// Tentatively place `person` on `task`, decrementing every open deficit
    /// the person can cover. Returns the covered skills for undo.
    fn assign(&mut self, person: &Person, task: &Task) -> Vec<String> {
        let mut covered = Vec::new();
        let needs = self.deficits.get_mut(&task.task_id).unwrap();
        for skill in task.daily_requirements.keys() {
            if person.skills.contains(skill) {
                if let Some(count) = needs.get_mut(skill) {
                    if *count > 0 {
                        *count -= 1;
                        self.coverage
                            .entry(task.task_id.clone())
                            .or_default()
                            .entry(skill.clone())
                            .or_default()
                            .push(person.person_id.clone());
                        covered.push(skill.clone());
                    }
                }
            }
        }
        self.assigned_today.insert(
            person.person_id.clone(),
            AssignedSlot {
                task_id: task.task_id.clone(),
                skills: covered.clone(),
            },
        );
        covered
    }

    fn undo(&mut self, person: &Person, task: &Task, covered: &[String]) {
        let needs = self.deficits.get_mut(&task.task_id).unwrap();
        for skill in covered {
            *needs.get_mut(skill).unwrap() += 1;
            if let Some(lists) = self.coverage.get_mut(&task.task_id) {
                if let Some(list) = lists.get_mut(skill) {
                    list.pop();
                }
            }
        }
        self.assigned_today.remove(&person.person_id);
    }

    fn backtrack(&mut self, cancel: &CancelToken) -> Result<bool, SchedulerError> {
        cancel.checkpoint()?;
        if self.all_satisfied() {
            return Ok(true);
        }
        let (task_idx, skill) = match self.select_next_need() {
            Some(need) => need,
            None => return Ok(true),
        };
        let task = self.tasks[task_idx];
        for p_idx in self.candidates_for(task_idx, &skill) {
            let person = self.people[p_idx];
            let covered = self.assign(person, task);
            // Re-probe the cap with the tentative same-day assignment recorded.
            if !self.store.can_assign(&person.person_id, self.day, true) {
                self.undo(person, task, &covered);
                continue;
            }
            if self.backtrack(cancel)? {
                return Ok(true);
            }
            self.undo(person, task, &covered);
        }
        Ok(false)
    }

    /// Best-effort pass used only for reporting: fill every subgoal that
    /// still has candidates, skip the ones that don't, and leave the truly
    /// uncoverable units as the residual deficit.
    fn fill_best_effort(&mut self) {
        let mut skipped: BTreeSet<(String, String)> = BTreeSet::new();
        loop {
            let mut next: Option<(usize, String)> = None;
            let mut best_need = 0u32;
            for (idx, task) in self.tasks.iter().enumerate() {
                if let Some(skills) = self.deficits.get(&task.task_id) {
                    for (skill, count) in skills {
                        if *count > best_need
                            && !skipped.contains(&(task.task_id.clone(), skill.clone()))
                        {
                            next = Some((idx, skill.clone()));
                            best_need = *count;
                        }
                    }
                }
            }
            let (task_idx, skill) = match next {
                Some(need) => need,
                None => break,
            };
            let task = self.tasks[task_idx];
            let mut placed = false;
            for p_idx in self.candidates_for(task_idx, &skill) {
                let person = self.people[p_idx];
                let covered = self.assign(person, task);
                if self.store.can_assign(&person.person_id, self.day, true) {
                    placed = true;
                    break;
                }
                self.undo(person, task, &covered);
            }
            if !placed {
                skipped.insert((task.task_id.clone(), skill));
            }
        }
    }

    fn residual_deficits(&self) -> DeficitMap {
        let mut remaining = DeficitMap::new();
        for task in &self.tasks {
            if let Some(skills) = self.deficits.get(&task.task_id) {
                for (skill, count) in skills {
                    if *count > 0 {
                        *remaining
                            .entry(task.name.clone())
                            .or_default()
                            .entry(skill.clone())
                            .or_insert(0) += count;
                    }
                }
            }
        }
        remaining
    }

    fn reset(&mut self) {
        for task in &self.tasks {
            let needs = self.deficits.get_mut(&task.task_id).unwrap();
            for (skill, count) in &task.daily_requirements {
                if *count > 0 {
                    needs.insert(skill.clone(), *count);
                }
            }
        }
        self.assigned_today.clear();
        self.coverage.clear();
    }

    fn build_assignments(&self) -> Vec<Assignment> {
        let mut by_name: Vec<(&Person, &AssignedSlot)> = self
            .people
            .iter()
            .filter_map(|p| self.assigned_today.get(&p.person_id).map(|slot| (*p, slot)))
            .collect();
        by_name.sort_by(|a, b| (&a.0.name, &a.0.person_id).cmp(&(&b.0.name, &b.0.person_id)));
        by_name
            .into_iter()
            .map(|(person, slot)| Assignment {
                day: self.day,
                person_id: person.person_id.clone(),
                task_id: slot.task_id.clone(),
                skills_contributed: slot.skills.clone(),
            })
            .collect()
    }

    fn build_schedule(&self, assignments: &[Assignment]) -> DaySchedule {
        let mut records = Vec::new();
        for task in &self.tasks {
            let skill_coverage = match self.coverage.get(&task.task_id) {
                Some(cov) if !cov.is_empty() => cov.clone(),
                _ => continue,
            };
            let mut people_contributions: BTreeMap<String, Vec<String>> = BTreeMap::new();
            for a in assignments {
                if a.task_id == task.task_id {
                    people_contributions
                        .insert(a.person_id.clone(), a.skills_contributed.clone());
                }
            }
            records.push(TaskCoverage {
                task_id: task.task_id.clone(),
                skill_coverage,
                people_contributions,
            });
        }
        DaySchedule {
            date: self.day,
            assignments: records,
        }
    }

    pub fn solve(mut self, cancel: &CancelToken) -> Result<DayOutcome, SchedulerError> {
        if self.all_satisfied() {
            return Ok(DayOutcome::Feasible {
                assignments: Vec::new(),
                schedule: DaySchedule::empty(self.day),
            });
        }
        if self.backtrack(cancel)? {
            let assignments = self.build_assignments();
            let schedule = self.build_schedule(&assignments);
            Ok(DayOutcome::Feasible {
                assignments,
                schedule,
            })
        } else {
            debug!(
                "{}: backtracking exhausted, computing residual deficits",
                self.day
            );
            self.reset();
            self.fill_best_effort();
            Ok(DayOutcome::Infeasible {
                deficits: self.residual_deficits(),
            })
        }
    }
}
