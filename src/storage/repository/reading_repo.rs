use crate::storage::entity::reading::{
    self, ActiveModel as ReadingActiveModel, Entity as Reading, Model as ReadingModel,
};
use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};

pub struct ReadingRepository;

#[derive(Debug, Clone)]
pub struct NewReading {
    pub station_id: i32,
    pub pollutant_id: i32,
    pub provider_id: Option<i32>,
    pub recorded_at: i64,
    pub value: f64,
    pub aqi: Option<i32>,
    pub raw_json: String,
}

impl ReadingRepository {
    /// 插入一条读数；命中唯一键 (station, pollutant, recorded_at) 时返回 false
    pub async fn insert_if_absent(
        db: &DatabaseConnection,
        r: NewReading,
    ) -> Result<bool, sea_orm::DbErr> {
        let rows = Reading::insert(ReadingActiveModel {
            station_id: Set(r.station_id),
            pollutant_id: Set(r.pollutant_id),
            provider_id: Set(r.provider_id),
            recorded_at: Set(r.recorded_at),
            value: Set(r.value),
            aqi: Set(r.aqi),
            raw_json: Set(r.raw_json),
            created_at: Set(Utc::now().timestamp()),
            ..Default::default()
        })
        .on_conflict(
            OnConflict::columns([
                reading::Column::StationId,
                reading::Column::PollutantId,
                reading::Column::RecordedAt,
            ])
            .do_nothing()
            .to_owned(),
        )
        .exec_without_returning(db)
        .await?;
        Ok(rows > 0)
    }

    /// since 之后最新的一条读数
    pub async fn latest_for(
        db: &DatabaseConnection,
        station_id: i32,
        pollutant_id: i32,
        since: i64,
    ) -> Result<Option<ReadingModel>, sea_orm::DbErr> {
        Reading::find()
            .filter(reading::Column::StationId.eq(station_id))
            .filter(reading::Column::PollutantId.eq(pollutant_id))
            .filter(reading::Column::RecordedAt.gte(since))
            .order_by_desc(reading::Column::RecordedAt)
            .one(db)
            .await
    }

    pub async fn recent_for_station(
        db: &DatabaseConnection,
        station_id: i32,
        limit: u64,
    ) -> Result<Vec<ReadingModel>, sea_orm::DbErr> {
        Reading::find()
            .filter(reading::Column::StationId.eq(station_id))
            .order_by_desc(reading::Column::RecordedAt)
            .order_by_asc(reading::Column::PollutantId)
            .limit(limit)
            .all(db)
            .await
    }

    /// [start, end] 内的 (station_id, pollutant_id, value, aqi)
    pub async fn values_between(
        db: &DatabaseConnection,
        start: i64,
        end: i64,
    ) -> Result<Vec<(i32, i32, f64, Option<i32>)>, sea_orm::DbErr> {
        Reading::find()
            .select_only()
            .column(reading::Column::StationId)
            .column(reading::Column::PollutantId)
            .column(reading::Column::Value)
            .column(reading::Column::Aqi)
            .filter(reading::Column::RecordedAt.gte(start))
            .filter(reading::Column::RecordedAt.lte(end))
            .order_by_asc(reading::Column::StationId)
            .order_by_asc(reading::Column::PollutantId)
            .into_tuple::<(i32, i32, f64, Option<i32>)>()
            .all(db)
            .await
    }

    pub async fn count(db: &DatabaseConnection) -> Result<u64, sea_orm::DbErr> {
        Reading::find().count(db).await
    }
}
