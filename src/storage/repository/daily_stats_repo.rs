use crate::storage::entity::daily_stat::{
    self, ActiveModel as DailyStatActiveModel, Entity as DailyStat, Model as DailyStatModel,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};

pub struct DailyStatsRepository;

#[derive(Debug, Clone, PartialEq)]
pub struct DailyStatValues {
    pub avg_value: f64,
    pub p95_value: f64,
    pub avg_aqi: Option<i32>,
    pub max_aqi: Option<i32>,
    pub min_aqi: Option<i32>,
    pub readings_count: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

impl DailyStatsRepository {
    pub async fn upsert(
        db: &DatabaseConnection,
        station_id: i32,
        pollutant_id: i32,
        day: &str,
        v: &DailyStatValues,
    ) -> Result<UpsertOutcome, sea_orm::DbErr> {
        let now = Utc::now().timestamp();
        let existing = DailyStat::find()
            .filter(daily_stat::Column::StationId.eq(station_id))
            .filter(daily_stat::Column::PollutantId.eq(pollutant_id))
            .filter(daily_stat::Column::Day.eq(day))
            .one(db)
            .await?;

        if let Some(model) = existing {
            let mut am: DailyStatActiveModel = model.into();
            am.avg_value = Set(v.avg_value);
            am.p95_value = Set(v.p95_value);
            am.avg_aqi = Set(v.avg_aqi);
            am.max_aqi = Set(v.max_aqi);
            am.min_aqi = Set(v.min_aqi);
            am.readings_count = Set(v.readings_count);
            am.updated_at = Set(now);
            am.update(db).await?;
            return Ok(UpsertOutcome::Updated);
        }

        DailyStatActiveModel {
            station_id: Set(station_id),
            pollutant_id: Set(pollutant_id),
            day: Set(day.to_string()),
            avg_value: Set(v.avg_value),
            p95_value: Set(v.p95_value),
            avg_aqi: Set(v.avg_aqi),
            max_aqi: Set(v.max_aqi),
            min_aqi: Set(v.min_aqi),
            readings_count: Set(v.readings_count),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await?;
        Ok(UpsertOutcome::Created)
    }

    pub async fn for_day(
        db: &DatabaseConnection,
        day: &str,
    ) -> Result<Vec<DailyStatModel>, sea_orm::DbErr> {
        DailyStat::find()
            .filter(daily_stat::Column::Day.eq(day))
            .order_by_asc(daily_stat::Column::StationId)
            .order_by_asc(daily_stat::Column::PollutantId)
            .all(db)
            .await
    }

    pub async fn recent_for_station(
        db: &DatabaseConnection,
        station_id: i32,
        limit: u64,
    ) -> Result<Vec<DailyStatModel>, sea_orm::DbErr> {
        DailyStat::find()
            .filter(daily_stat::Column::StationId.eq(station_id))
            .order_by_desc(daily_stat::Column::Day)
            .order_by_asc(daily_stat::Column::PollutantId)
            .limit(limit)
            .all(db)
            .await
    }
}
