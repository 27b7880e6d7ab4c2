pub mod admission;
pub mod calendar;
pub mod db;
pub mod error;
pub mod logger;
pub mod models;
pub mod repository;
pub mod scheduler;
pub mod service;
pub mod solver;
pub mod store;

pub use admission::{merge_pto_maps, AdmissionOutcome, PtoAdmission};
pub use calendar::PlannerCalendar;
pub use error::SchedulerError;
pub use models::{
    Assignment, DaySchedule, DeficitMap, HorizonSchedule, Person, PtoMap, Task, TaskCoverage,
};
pub use repository::{PtoStatus, ScheduleRepository};
pub use scheduler::HorizonDriver;
pub use solver::{CancelToken, DayOutcome, DaySolver};
pub use store::PlanStore;
