pub mod alert_repo;
pub mod daily_stats_repo;
pub mod log_repo;
pub mod pollutant_repo;
pub mod provider_repo;
pub mod reading_repo;
pub mod station_repo;
pub mod user_repo;

pub use alert_repo::{AlertRepository, NewAlert};
pub use daily_stats_repo::{DailyStatValues, DailyStatsRepository, UpsertOutcome};
pub use log_repo::{JobLogEntry, LogRepository};
pub use pollutant_repo::PollutantRepository;
pub use provider_repo::ProviderRepository;
pub use reading_repo::{NewReading, ReadingRepository};
pub use station_repo::{StationDescriptor, StationRepository};
pub use user_repo::UserRepository;
