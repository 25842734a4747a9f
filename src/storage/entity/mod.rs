pub mod alert;
pub mod alert_history;
pub mod app_user;
pub mod daily_stat;
pub mod error_log;
pub mod job_log;
pub mod permission;
pub mod pollutant;
pub mod provider;
pub mod reading;
pub mod recommendation;
pub mod role;
pub mod role_permission;
pub mod station;
