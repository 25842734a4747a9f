pub mod aggregation;
pub mod alerts;
pub mod ingestion;
pub mod normalizer;
pub mod scheduler;
pub mod seeder;

pub use scheduler::{JobId, JobRequest, JobStatus, Scheduler, SchedulerError};
