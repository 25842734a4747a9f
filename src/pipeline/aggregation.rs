use crate::notify::{DailyDigest, StationDigest};
use crate::storage::repository::{
    DailyStatValues, DailyStatsRepository, PollutantRepository, ReadingRepository,
    StationRepository, UpsertOutcome,
};
use chrono::{Days, NaiveDate, Utc};
use log::{error, info};
use sea_orm::DatabaseConnection;
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

pub const JOB_NAME: &str = "daily_aggregation";

/// 一组 (站点, 污染物, 日) 读数的统计
#[derive(Debug, Clone, PartialEq)]
pub struct DailySummary {
    pub avg_value: f64,
    pub p95_value: f64,
    pub avg_aqi: Option<i32>,
    pub max_aqi: Option<i32>,
    pub min_aqi: Option<i32>,
    pub count: usize,
}

/// 纯函数：均值、最近秩法 p95、AQI 均值（截断）/最大/最小
pub fn summarize(values: &[f64], aqis: &[i32]) -> Option<DailySummary> {
    if values.is_empty() {
        return None;
    }
    let n = values.len();
    let avg_value = values.iter().sum::<f64>() / n as f64;

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = ((0.95 * n as f64).ceil() as usize).clamp(1, n);
    let p95_value = sorted[rank - 1];

    let (avg_aqi, max_aqi, min_aqi) = if aqis.is_empty() {
        (None, None, None)
    } else {
        let sum: i64 = aqis.iter().map(|&a| i64::from(a)).sum();
        (
            Some((sum as f64 / aqis.len() as f64) as i32),
            aqis.iter().copied().max(),
            aqis.iter().copied().min(),
        )
    };

    Some(DailySummary {
        avg_value,
        p95_value,
        avg_aqi,
        max_aqi,
        min_aqi,
        count: n,
    })
}

/// 某日 UTC 的 [00:00:00, 23:59:59] 秒级区间
pub fn day_bounds(day: NaiveDate) -> (i64, i64) {
    let start = day.and_time(chrono::NaiveTime::MIN).and_utc().timestamp();
    (start, start + 86_399)
}

pub fn yesterday() -> NaiveDate {
    let today = Utc::now().date_naive();
    today.checked_sub_days(Days::new(1)).unwrap_or(today)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregationSummary {
    pub day: String,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: usize,
    pub duration_ms: u128,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackfillSummary {
    pub total_days: usize,
    pub days_processed: usize,
    pub created: usize,
    pub updated: usize,
    pub errors: usize,
}

#[derive(Clone)]
pub struct DailyAggregationJob {
    db: DatabaseConnection,
}

impl DailyAggregationJob {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// 汇总指定日期（默认昨天）的读数并写入 daily_stats，重复执行会原地更新
    pub async fn run(&self, day: Option<NaiveDate>) -> anyhow::Result<AggregationSummary> {
        let day = day.unwrap_or_else(yesterday);
        let day_str = day.format("%Y-%m-%d").to_string();
        info!("Starting daily aggregation for {day_str}");
        let started = Instant::now();

        let (start, end) = day_bounds(day);
        let rows = ReadingRepository::values_between(&self.db, start, end).await?;

        let mut groups: BTreeMap<(i32, i32), (Vec<f64>, Vec<i32>)> = BTreeMap::new();
        for (station_id, pollutant_id, value, aqi) in rows {
            let g = groups.entry((station_id, pollutant_id)).or_default();
            g.0.push(value);
            if let Some(a) = aqi {
                g.1.push(a);
            }
        }

        let stations = StationRepository::list_all(&self.db).await?.len();
        let pollutants = PollutantRepository::list_all(&self.db).await?.len();

        let mut summary = AggregationSummary {
            day: day_str.clone(),
            skipped: (stations * pollutants).saturating_sub(groups.len()),
            ..Default::default()
        };

        for ((station_id, pollutant_id), (values, aqis)) in groups {
            let Some(s) = summarize(&values, &aqis) else {
                summary.skipped += 1;
                continue;
            };
            let v = DailyStatValues {
                avg_value: s.avg_value,
                p95_value: s.p95_value,
                avg_aqi: s.avg_aqi,
                max_aqi: s.max_aqi,
                min_aqi: s.min_aqi,
                readings_count: s.count as i32,
            };
            match DailyStatsRepository::upsert(&self.db, station_id, pollutant_id, &day_str, &v)
                .await
            {
                Ok(UpsertOutcome::Created) => summary.created += 1,
                Ok(UpsertOutcome::Updated) => summary.updated += 1,
                Err(e) => {
                    summary.errors += 1;
                    error!("Error aggregating station {station_id}, pollutant {pollutant_id}: {e}");
                }
            }
        }

        summary.duration_ms = started.elapsed().as_millis();
        info!(
            "Aggregation for {} complete in {} ms. Created: {}, Updated: {}, Errors: {}",
            day_str, summary.duration_ms, summary.created, summary.updated, summary.errors
        );
        Ok(summary)
    }

    /// 逐日补算 [start, end]，某天失败不影响其余日期
    pub async fn backfill(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> anyhow::Result<BackfillSummary> {
        if start > end {
            anyhow::bail!("backfill start {start} is after end {end}");
        }
        let total_days = (end - start).num_days() as usize + 1;
        info!("Starting backfill from {start} to {end} ({total_days} days)");

        let mut out = BackfillSummary {
            total_days,
            ..Default::default()
        };
        for day in start.iter_days().take(total_days) {
            match self.run(Some(day)).await {
                Ok(s) => {
                    out.days_processed += 1;
                    out.created += s.created;
                    out.updated += s.updated;
                    out.errors += s.errors;
                }
                Err(e) => {
                    error!("Error processing {day}: {e:#}");
                    out.errors += 1;
                }
            }
        }
        info!("Backfill complete: {out:?}");
        Ok(out)
    }

    /// 根据已写入的 daily_stats 生成某日汇总；当天没有数据时返回 None
    pub async fn digest(&self, day: NaiveDate) -> anyhow::Result<Option<DailyDigest>> {
        let day_str = day.format("%Y-%m-%d").to_string();
        let rows = DailyStatsRepository::for_day(&self.db, &day_str).await?;
        if rows.is_empty() {
            return Ok(None);
        }

        let total_readings: i64 = rows.iter().map(|r| i64::from(r.readings_count)).sum();
        let aqis: Vec<i32> = rows.iter().filter_map(|r| r.avg_aqi).collect();
        let avg_aqi = if aqis.is_empty() {
            0.0
        } else {
            aqis.iter().map(|&a| f64::from(a)).sum::<f64>() / aqis.len() as f64
        };
        let max_aqi = rows.iter().filter_map(|r| r.max_aqi).max().unwrap_or(0);

        let mut per_station: HashMap<i32, Vec<i32>> = HashMap::new();
        for r in &rows {
            if let Some(a) = r.avg_aqi {
                per_station.entry(r.station_id).or_default().push(a);
            }
        }
        let names: HashMap<i32, String> = StationRepository::list_all(&self.db)
            .await?
            .into_iter()
            .map(|s| (s.id, s.name))
            .collect();
        let mut stations: Vec<StationDigest> = per_station
            .into_iter()
            .map(|(id, v)| StationDigest {
                name: names
                    .get(&id)
                    .cloned()
                    .unwrap_or_else(|| format!("station #{id}")),
                avg_aqi: v.iter().map(|&a| f64::from(a)).sum::<f64>() / v.len() as f64,
            })
            .collect();
        stations.sort_by(|a, b| b.avg_aqi.total_cmp(&a.avg_aqi).then(a.name.cmp(&b.name)));
        stations.truncate(5);

        Ok(Some(DailyDigest {
            date: day_str,
            total_readings,
            avg_aqi,
            max_aqi,
            stations,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::connection::memory_db;
    use crate::storage::repository::{NewReading, StationDescriptor};

    #[test]
    fn summarize_computes_mean_p95_and_aqi_range() {
        let values: Vec<f64> = (1..=20).map(f64::from).collect();
        let s = summarize(&values, &[10, 20, 25]).unwrap();
        assert_eq!(s.avg_value, 10.5);
        // ceil(0.95 * 20) = 19
        assert_eq!(s.p95_value, 19.0);
        assert_eq!(s.avg_aqi, Some(18));
        assert_eq!(s.max_aqi, Some(25));
        assert_eq!(s.min_aqi, Some(10));
        assert_eq!(s.count, 20);
    }

    #[test]
    fn summarize_edge_cases() {
        assert!(summarize(&[], &[]).is_none());
        let one = summarize(&[7.5], &[]).unwrap();
        assert_eq!(one.p95_value, 7.5);
        assert_eq!(one.avg_aqi, None);
    }

    #[test]
    fn day_bounds_cover_whole_utc_day() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        assert_eq!(day_bounds(d), (1_710_028_800, 1_710_115_199));
    }

    async fn seed_day(db: &DatabaseConnection, day: NaiveDate, values: &[(f64, i32)]) -> i32 {
        let station = StationRepository::get_or_create(
            db,
            &StationDescriptor {
                name: "Test Station".to_string(),
                city: "Cali".to_string(),
                country: "Colombia".to_string(),
                latitude: 3.45,
                longitude: -76.53,
            },
            None,
        )
        .await
        .unwrap();
        let pm25 = PollutantRepository::find_by_name(db, "PM2.5")
            .await
            .unwrap()
            .unwrap();
        let (start, _) = day_bounds(day);
        for (i, (v, a)) in values.iter().enumerate() {
            ReadingRepository::insert_if_absent(
                db,
                NewReading {
                    station_id: station.id,
                    pollutant_id: pm25.id,
                    provider_id: None,
                    recorded_at: start + i as i64 * 3600,
                    value: *v,
                    aqi: Some(*a),
                    raw_json: "{}".to_string(),
                },
            )
            .await
            .unwrap();
        }
        station.id
    }

    #[tokio::test]
    async fn aggregation_is_idempotent_and_ignores_other_days() {
        let db = memory_db().await;
        let day = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let next = day.succ_opt().unwrap();
        let station_id = seed_day(&db, day, &[(10.0, 41), (20.0, 67), (30.0, 88)]).await;
        seed_day(&db, next, &[(500.0, 500)]).await;

        let job = DailyAggregationJob::new(db.clone());
        let first = job.run(Some(day)).await.unwrap();
        assert_eq!(first.created, 1);
        assert_eq!(first.updated, 0);
        assert_eq!(first.skipped, 5);

        let second = job.run(Some(day)).await.unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.updated, 1);

        let rows = DailyStatsRepository::recent_for_station(&db, station_id, 10)
            .await
            .unwrap();
        let row = rows.iter().find(|r| r.day == "2024-03-10").unwrap();
        assert_eq!(row.avg_value, 20.0);
        assert_eq!(row.p95_value, 30.0);
        assert_eq!(row.avg_aqi, Some(65));
        assert_eq!(row.readings_count, 3);
        assert_eq!(DailyStatsRepository::for_day(&db, "2024-03-10").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn backfill_runs_inclusive_range_and_rejects_reversed() {
        let db = memory_db().await;
        let d1 = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let d3 = NaiveDate::from_ymd_opt(2024, 3, 3).unwrap();
        seed_day(&db, d1, &[(5.0, 20)]).await;
        seed_day(&db, d3, &[(15.0, 57)]).await;

        let job = DailyAggregationJob::new(db.clone());
        let out = job.backfill(d1, d3).await.unwrap();
        assert_eq!(out.total_days, 3);
        assert_eq!(out.days_processed, 3);
        assert_eq!(out.created, 2);

        assert!(job.backfill(d3, d1).await.is_err());
    }

    #[tokio::test]
    async fn digest_summarizes_stats() {
        let db = memory_db().await;
        let day = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        seed_day(&db, day, &[(10.0, 40), (20.0, 60)]).await;
        let job = DailyAggregationJob::new(db.clone());
        assert!(job.digest(day).await.unwrap().is_none());

        job.run(Some(day)).await.unwrap();
        let d = job.digest(day).await.unwrap().unwrap();
        assert_eq!(d.total_readings, 2);
        assert_eq!(d.avg_aqi, 50.0);
        assert_eq!(d.max_aqi, 60);
        assert_eq!(d.stations.len(), 1);
        assert_eq!(d.stations[0].name, "Test Station");
    }
}
