use crate::calendar::{parse_iso_date, PlannerCalendar};
use crate::error::SchedulerError;
use crate::models::{Person, PtoMap, Task};
use crate::repository::{PtoStatus, ScheduleRepository};
use async_trait::async_trait;
use chrono::NaiveDate;
use log::{debug, error, info};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions},
    Pool, Sqlite,
};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::str::FromStr;

pub type DbPool = Pool<Sqlite>;

/// Open (creating if missing) the file-backed database and run migrations.
pub async fn init_database(path: Option<PathBuf>) -> Result<DbPool, sqlx::Error> {
    debug!("Initializing database connection");

    let db_path = match path {
        Some(path) => path,
        None => {
            let app_dir = get_app_data_dir();
            std::fs::create_dir_all(&app_dir).expect("Failed to create app data directory");
            app_dir.join("roster_planner.db")
        }
    };
    let db_url = format!("sqlite://{}", db_path.display());

    debug!("Database path: {}", db_path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?.create_if_missing(true);

    let pool = SqlitePool::connect_with(options).await.map_err(|e| {
        error!("Failed to connect to database: {}", e);
        e
    })?;

    run_migrations(&pool).await?;

    info!("Database initialized successfully");
    Ok(pool)
}

/// In-memory database on a single connection, for tests and ephemeral runs.
pub async fn init_memory_database() -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

fn get_app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".roster-planner")
}

async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    debug!("Running database migrations");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS departments (
            name TEXT PRIMARY KEY,
            created_at TEXT DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Skills are stored as a JSON array of strings.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS people (
            person_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            department TEXT NOT NULL,
            skills TEXT NOT NULL DEFAULT '[]',
            preworked_in_last_6 INTEGER NOT NULL DEFAULT 0,
            created_at TEXT DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (department) REFERENCES departments(name) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // The active interval is [start_ts, end_ts) in UTC epoch seconds;
    // daily_requirements is a JSON object of skill -> headcount.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            task_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            department TEXT NOT NULL,
            start_ts INTEGER NOT NULL,
            end_ts INTEGER NOT NULL,
            daily_requirements TEXT NOT NULL DEFAULT '{}',
            created_at TEXT DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (department) REFERENCES departments(name) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pto_requests (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            person_id TEXT NOT NULL,
            pto_date TEXT NOT NULL,
            status TEXT NOT NULL CHECK(status IN ('approved', 'pending', 'denied')),
            created_at TEXT DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(person_id, pto_date)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_people_department ON people(department)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_department ON tasks(department)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_interval ON tasks(start_ts, end_ts)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pto_person ON pto_requests(person_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pto_date ON pto_requests(pto_date)")
        .execute(pool)
        .await?;

    info!("Database migrations completed successfully");
    Ok(())
}

// Row shapes as stored; converted to the canonical models on read.

#[derive(Debug, sqlx::FromRow)]
struct PersonRow {
    person_id: String,
    name: String,
    skills: String,
    preworked_in_last_6: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct TaskRow {
    task_id: String,
    name: String,
    start_ts: i64,
    end_ts: i64,
    daily_requirements: String,
}

#[derive(Debug, sqlx::FromRow)]
struct PtoRow {
    person_id: String,
    pto_date: String,
}

impl PersonRow {
    fn into_person(self) -> Result<Person, SchedulerError> {
        let skills: Vec<String> = serde_json::from_str(&self.skills).map_err(|e| {
            SchedulerError::repository(format!(
                "person '{}': malformed skills column: {}",
                self.person_id, e
            ))
        })?;
        let preworked = u8::try_from(self.preworked_in_last_6).unwrap_or(0).min(5);
        Ok(Person {
            person_id: self.person_id,
            name: self.name,
            skills: skills.into_iter().collect::<BTreeSet<String>>(),
            preworked_in_last_6: preworked,
        })
    }
}

impl TaskRow {
    fn into_task(self) -> Result<Task, SchedulerError> {
        let daily_requirements = serde_json::from_str(&self.daily_requirements).map_err(|e| {
            SchedulerError::repository(format!(
                "task '{}': malformed requirements column: {}",
                self.task_id, e
            ))
        })?;
        Ok(Task {
            task_id: self.task_id,
            name: self.name,
            start_ts: self.start_ts,
            end_ts: self.end_ts,
            daily_requirements,
        })
    }
}

/// SQLite adapter for the repository contract.
pub struct SqliteRepository {
    pool: DbPool,
    calendar: PlannerCalendar,
}

impl SqliteRepository {
    pub fn new(pool: DbPool) -> Self {
        SqliteRepository {
            pool,
            calendar: PlannerCalendar::utc(),
        }
    }

    /// Interpret repository date ranges in a non-UTC planning offset.
    pub fn with_calendar(mut self, calendar: PlannerCalendar) -> Self {
        self.calendar = calendar;
        self
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub async fn insert_department(&self, name: &str) -> Result<(), SchedulerError> {
        sqlx::query("INSERT INTO departments (name) VALUES (?) ON CONFLICT(name) DO NOTHING")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to insert department: {}", e);
                SchedulerError::repository(e.to_string())
            })?;
        Ok(())
    }

    pub async fn insert_person(
        &self,
        person: &Person,
        department: &str,
    ) -> Result<(), SchedulerError> {
        let skills: Vec<&String> = person.skills.iter().collect();
        let skills_json = serde_json::to_string(&skills)
            .map_err(|e| SchedulerError::repository(e.to_string()))?;
        sqlx::query(
            "INSERT INTO people (person_id, name, department, skills, preworked_in_last_6)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(person_id) DO UPDATE SET
                 name = excluded.name,
                 department = excluded.department,
                 skills = excluded.skills,
                 preworked_in_last_6 = excluded.preworked_in_last_6",
        )
        .bind(&person.person_id)
        .bind(&person.name)
        .bind(department)
        .bind(&skills_json)
        .bind(i64::from(person.preworked_in_last_6))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to insert person: {}", e);
            SchedulerError::repository(e.to_string())
        })?;
        Ok(())
    }

    pub async fn insert_task(&self, task: &Task, department: &str) -> Result<(), SchedulerError> {
        let requirements_json = serde_json::to_string(&task.daily_requirements)
            .map_err(|e| SchedulerError::repository(e.to_string()))?;
        sqlx::query(
            "INSERT INTO tasks (task_id, name, department, start_ts, end_ts, daily_requirements)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(task_id) DO UPDATE SET
                 name = excluded.name,
                 department = excluded.department,
                 start_ts = excluded.start_ts,
                 end_ts = excluded.end_ts,
                 daily_requirements = excluded.daily_requirements",
        )
        .bind(&task.task_id)
        .bind(&task.name)
        .bind(department)
        .bind(task.start_ts)
        .bind(task.end_ts)
        .bind(&requirements_json)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to insert task: {}", e);
            SchedulerError::repository(e.to_string())
        })?;
        Ok(())
    }
}

#[async_trait]
impl ScheduleRepository for SqliteRepository {
    async fn list_departments(&self) -> Result<Vec<String>, SchedulerError> {
        debug!("Fetching departments");
        let names = sqlx::query_scalar::<_, String>("SELECT name FROM departments ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to fetch departments: {}", e);
                SchedulerError::repository(e.to_string())
            })?;
        Ok(names)
    }

    async fn list_people_in(&self, department: &str) -> Result<Vec<Person>, SchedulerError> {
        debug!("Fetching people in department: {}", department);
        let rows = sqlx::query_as::<_, PersonRow>(
            "SELECT person_id, name, skills, preworked_in_last_6
             FROM people WHERE department = ? ORDER BY name, person_id",
        )
        .bind(department)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to fetch people: {}", e);
            SchedulerError::repository(e.to_string())
        })?;

        let people = rows
            .into_iter()
            .map(PersonRow::into_person)
            .collect::<Result<Vec<_>, _>>()?;
        info!(
            "Fetched {} people from department '{}'",
            people.len(),
            department
        );
        Ok(people)
    }

    async fn list_tasks_overlapping(
        &self,
        department: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<Task>, SchedulerError> {
        debug!(
            "Fetching tasks in '{}' overlapping {}..={}",
            department, start_date, end_date
        );
        let (range_start, _) = self.calendar.day_bounds(start_date);
        let (_, range_end) = self.calendar.day_bounds(end_date);
        let rows = sqlx::query_as::<_, TaskRow>(
            "SELECT task_id, name, start_ts, end_ts, daily_requirements
             FROM tasks
             WHERE department = ? AND start_ts < ? AND end_ts > ?
             ORDER BY name, task_id",
        )
        .bind(department)
        .bind(range_end)
        .bind(range_start)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to fetch tasks: {}", e);
            SchedulerError::repository(e.to_string())
        })?;

        let tasks = rows
            .into_iter()
            .map(TaskRow::into_task)
            .collect::<Result<Vec<_>, _>>()?;
        info!(
            "Fetched {} task(s) from department '{}'",
            tasks.len(),
            department
        );
        Ok(tasks)
    }

    async fn read_pto(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<PtoMap, SchedulerError> {
        debug!("Fetching approved PTO {}..={}", start_date, end_date);
        let rows = sqlx::query_as::<_, PtoRow>(
            "SELECT person_id, pto_date FROM pto_requests
             WHERE status = 'approved' AND pto_date >= ? AND pto_date <= ?
             ORDER BY pto_date, person_id",
        )
        .bind(start_date.format("%Y-%m-%d").to_string())
        .bind(end_date.format("%Y-%m-%d").to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to fetch PTO requests: {}", e);
            SchedulerError::repository(e.to_string())
        })?;

        let mut map = PtoMap::new();
        for row in rows {
            let day = parse_iso_date(&row.pto_date)
                .map_err(|e| SchedulerError::repository(e.to_string()))?;
            map.entry(day)
                .or_insert_with(BTreeSet::new)
                .insert(row.person_id);
        }
        Ok(map)
    }

    async fn write_pto(
        &self,
        person_id: &str,
        days: &[NaiveDate],
        status: PtoStatus,
    ) -> Result<(), SchedulerError> {
        debug!(
            "Upserting {} PTO day(s) for {} as {}",
            days.len(),
            person_id,
            status.as_str()
        );
        for day in days {
            sqlx::query(
                "INSERT INTO pto_requests (person_id, pto_date, status)
                 VALUES (?, ?, ?)
                 ON CONFLICT(person_id, pto_date) DO UPDATE SET
                     status = excluded.status,
                     updated_at = CURRENT_TIMESTAMP",
            )
            .bind(person_id)
            .bind(day.format("%Y-%m-%d").to_string())
            .bind(status.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to upsert PTO request: {}", e);
                SchedulerError::repository(e.to_string())
            })?;
        }
        info!("Saved PTO request for {}", person_id);
        Ok(())
    }

    async fn delete_pto(
        &self,
        person_id: &str,
        days: &[NaiveDate],
    ) -> Result<(), SchedulerError> {
        debug!("Deleting {} PTO day(s) for {}", days.len(), person_id);
        for day in days {
            sqlx::query("DELETE FROM pto_requests WHERE person_id = ? AND pto_date = ?")
                .bind(person_id)
                .bind(day.format("%Y-%m-%d").to_string())
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    error!("Failed to delete PTO request: {}", e);
                    SchedulerError::repository(e.to_string())
                })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn person(id: &str, name: &str, skills: &[&str]) -> Person {
        Person {
            person_id: id.to_string(),
            name: name.to_string(),
            skills: skills.iter().map(|s| s.to_string()).collect(),
            preworked_in_last_6: 0,
        }
    }

    fn task_between(id: &str, name: &str, start_ts: i64, end_ts: i64) -> Task {
        let mut daily_requirements = BTreeMap::new();
        daily_requirements.insert("RN".to_string(), 1u32);
        Task {
            task_id: id.to_string(),
            name: name.to_string(),
            start_ts,
            end_ts,
            daily_requirements,
        }
    }

    async fn repo() -> SqliteRepository {
        let pool = init_memory_database().await.expect("in-memory db");
        SqliteRepository::new(pool)
    }

    #[tokio::test]
    async fn test_departments_round_trip() {
        let repo = repo().await;
        repo.insert_department("ICU").await.unwrap();
        repo.insert_department("ER").await.unwrap();
        repo.insert_department("ER").await.unwrap();
        assert_eq!(repo.list_departments().await.unwrap(), vec!["ER", "ICU"]);
    }

    #[tokio::test]
    async fn test_people_round_trip_materializes_skills() {
        let repo = repo().await;
        repo.insert_department("ER").await.unwrap();
        repo.insert_person(&person("p1", "Ana", &["RN", "Triage"]), "ER")
            .await
            .unwrap();
        repo.insert_person(&person("p2", "Bo", &["MD"]), "ER")
            .await
            .unwrap();
        repo.insert_department("ICU").await.unwrap();
        repo.insert_person(&person("p3", "Cy", &["RN"]), "ICU")
            .await
            .unwrap();

        let people = repo.list_people_in("ER").await.unwrap();
        assert_eq!(people.len(), 2);
        assert_eq!(people[0].name, "Ana");
        assert!(people[0].skills.contains("Triage"));
        assert!(repo.list_people_in("Lab").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tasks_overlap_query_is_half_open() {
        let repo = repo().await;
        repo.insert_department("ER").await.unwrap();
        let cal = PlannerCalendar::utc();
        let jan1 = cal.day_bounds(date(2024, 1, 1)).0;
        let jan3_end = cal.day_bounds(date(2024, 1, 3)).1;
        let jan5 = cal.day_bounds(date(2024, 1, 5)).0;

        repo.insert_task(&task_between("t1", "InRange", jan1, jan3_end), "ER")
            .await
            .unwrap();
        // Ends exactly where the queried range begins: not overlapping.
        repo.insert_task(&task_between("t2", "Before", jan1 - 86400, jan1), "ER")
            .await
            .unwrap();
        repo.insert_task(&task_between("t3", "After", jan5, jan5 + 86400), "ER")
            .await
            .unwrap();

        let tasks = repo
            .list_tasks_overlapping("ER", date(2024, 1, 1), date(2024, 1, 4))
            .await
            .unwrap();
        let ids: Vec<&str> = tasks.iter().map(|t| t.task_id.as_str()).collect();
        assert_eq!(ids, vec!["t1"]);
        assert_eq!(tasks[0].daily_requirements["RN"], 1);
    }

    #[tokio::test]
    async fn test_read_pto_returns_only_approved() {
        let repo = repo().await;
        repo.write_pto("p1", &[date(2024, 1, 2)], PtoStatus::Approved)
            .await
            .unwrap();
        repo.write_pto("p2", &[date(2024, 1, 2)], PtoStatus::Pending)
            .await
            .unwrap();
        repo.write_pto("p3", &[date(2024, 2, 1)], PtoStatus::Approved)
            .await
            .unwrap();

        let pto = repo
            .read_pto(date(2024, 1, 1), date(2024, 1, 31))
            .await
            .unwrap();
        assert_eq!(pto.len(), 1);
        let day = pto.get(&date(2024, 1, 2)).unwrap();
        assert!(day.contains("p1"));
        assert!(!day.contains("p2"));
    }

    #[tokio::test]
    async fn test_write_pto_upsert_is_idempotent() {
        let repo = repo().await;
        let day = date(2024, 1, 2);
        repo.write_pto("p1", &[day], PtoStatus::Pending).await.unwrap();
        repo.write_pto("p1", &[day], PtoStatus::Approved)
            .await
            .unwrap();
        repo.write_pto("p1", &[day], PtoStatus::Approved)
            .await
            .unwrap();

        let pto = repo.read_pto(day, day).await.unwrap();
        assert_eq!(pto[&day].len(), 1);
    }

    #[tokio::test]
    async fn test_delete_pto_is_idempotent() {
        let repo = repo().await;
        let day = date(2024, 1, 2);
        repo.write_pto("p1", &[day], PtoStatus::Approved)
            .await
            .unwrap();
        repo.delete_pto("p1", &[day]).await.unwrap();
        repo.delete_pto("p1", &[day]).await.unwrap();
        assert!(repo.read_pto(day, day).await.unwrap().is_empty());
    }
}
