use crate::aqi::{calculate_aqi, round2, Pollutant};
use crate::storage::repository::{
    NewReading, PollutantRepository, ProviderRepository, ReadingRepository, StationRepository,
};
use chrono::{DateTime, Datelike, TimeDelta, Timelike, Utc, Weekday};
use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sea_orm::DatabaseConnection;
use serde_json::json;

/// 两次模拟读数的间隔
const STEP_HOURS: i64 = 2;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeedSummary {
    pub stations: usize,
    pub generated: usize,
    pub saved: usize,
    pub duplicates: usize,
}

/// 各污染物的取值范围（canonical 单位）
pub fn value_range(pollutant: Pollutant) -> (f64, f64) {
    match pollutant {
        Pollutant::Pm25 => (5.0, 150.0),
        Pollutant::Pm10 => (10.0, 200.0),
        Pollutant::O3 => (10.0, 120.0),
        Pollutant::No2 => (5.0, 80.0),
        Pollutant::So2 => (0.0, 50.0),
        Pollutant::Co => (0.1, 5.0),
    }
}

/// 白天高、夜间低
pub fn diurnal_factor(hour: u32) -> f64 {
    match hour {
        6..=18 => 1.2,
        22..=23 | 0..=5 => 0.7,
        _ => 1.0,
    }
}

pub fn weekday_factor(day: Weekday) -> f64 {
    match day {
        Weekday::Sat | Weekday::Sun => 0.9,
        _ => 1.1,
    }
}

/// 某一时刻的模拟浓度
pub fn simulated_value<R: Rng>(rng: &mut R, pollutant: Pollutant, at: DateTime<Utc>) -> f64 {
    let (lo, hi) = value_range(pollutant);
    let base = rng.gen_range(lo..=hi);
    round2(base * diurnal_factor(at.hour()) * weekday_factor(at.weekday()))
}

pub async fn seed_history(db: &DatabaseConnection, days: u32) -> anyhow::Result<SeedSummary> {
    let mut rng = StdRng::from_entropy();
    seed_history_at(db, days, Utc::now(), &mut rng).await
}

/// 以 now 为终点向前生成 days 天、每 2 小时一条的读数
pub async fn seed_history_at<R: Rng>(
    db: &DatabaseConnection,
    days: u32,
    now: DateTime<Utc>,
    rng: &mut R,
) -> anyhow::Result<SeedSummary> {
    let stations = StationRepository::list_all(db).await?;
    if stations.is_empty() {
        anyhow::bail!("no stations found; run an ingestion first");
    }
    let provider_id = match ProviderRepository::first_active(db).await? {
        Some(p) => Some(p.id),
        None => {
            warn!("No active provider, seeded readings will have no provider");
            None
        }
    };
    let pollutant_ids = PollutantRepository::id_map(db).await?;

    let end = now
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now);
    let steps = i64::from(days) * 24 / STEP_HOURS;

    info!(
        "Seeding {} days of history for {} stations",
        days,
        stations.len()
    );

    let mut summary = SeedSummary {
        stations: stations.len(),
        ..Default::default()
    };

    for station in &stations {
        for step in 0..steps {
            let at = end - TimeDelta::hours(step * STEP_HOURS);
            for pollutant in Pollutant::ALL {
                let Some(&pollutant_id) = pollutant_ids.get(pollutant.name()) else {
                    continue;
                };
                let value = simulated_value(rng, pollutant, at);
                summary.generated += 1;

                let inserted = ReadingRepository::insert_if_absent(
                    db,
                    NewReading {
                        station_id: station.id,
                        pollutant_id,
                        provider_id,
                        recorded_at: at.timestamp(),
                        value,
                        aqi: calculate_aqi(pollutant, value).ok(),
                        raw_json: json!({ "source": "seeder", "value": value }).to_string(),
                    },
                )
                .await?;
                if inserted {
                    summary.saved += 1;
                } else {
                    summary.duplicates += 1;
                }
            }
        }
    }

    info!(
        "✓ Seeded {} readings ({} duplicates skipped)",
        summary.saved, summary.duplicates
    );
    Ok(summary)
}
