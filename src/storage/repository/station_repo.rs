use crate::storage::entity::station::{self, ActiveModel as StationActiveModel, Entity as Station};
use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, FromQueryResult, QueryFilter,
    QueryOrder, Set, Statement,
};

pub use crate::storage::entity::station::Model as StationModel;

pub struct StationRepository;

#[derive(Debug, Clone, PartialEq)]
pub struct StationDescriptor {
    pub name: String,
    pub city: String,
    pub country: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, FromQueryResult)]
pub struct StationAqiRow {
    pub station_id: i32,
    pub recorded_at: i64,
    pub aqi: Option<i32>,
}

impl StationRepository {
    /// 按 (name, city) 查找，不存在则创建
    pub async fn get_or_create(
        db: &DatabaseConnection,
        desc: &StationDescriptor,
        provider_id: Option<i32>,
    ) -> Result<StationModel, sea_orm::DbErr> {
        if let Some(s) = Self::find_by_name_city(db, &desc.name, &desc.city).await? {
            return Ok(s);
        }

        Station::insert(StationActiveModel {
            name: Set(desc.name.clone()),
            city: Set(desc.city.clone()),
            country: Set(desc.country.clone()),
            latitude: Set(desc.latitude),
            longitude: Set(desc.longitude),
            provider_id: Set(provider_id),
            created_at: Set(Utc::now().timestamp()),
            ..Default::default()
        })
        .on_conflict(
            OnConflict::columns([station::Column::Name, station::Column::City])
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;

        Self::find_by_name_city(db, &desc.name, &desc.city)
            .await?
            .ok_or_else(|| {
                sea_orm::DbErr::RecordNotFound(format!("station {} / {}", desc.name, desc.city))
            })
    }

    pub async fn find_by_name_city(
        db: &DatabaseConnection,
        name: &str,
        city: &str,
    ) -> Result<Option<StationModel>, sea_orm::DbErr> {
        Station::find()
            .filter(station::Column::Name.eq(name))
            .filter(station::Column::City.eq(city))
            .one(db)
            .await
    }

    pub async fn find_by_id(
        db: &DatabaseConnection,
        id: i32,
    ) -> Result<Option<StationModel>, sea_orm::DbErr> {
        Station::find_by_id(id).one(db).await
    }

    pub async fn list_all(db: &DatabaseConnection) -> Result<Vec<StationModel>, sea_orm::DbErr> {
        Station::find()
            .order_by_asc(station::Column::City)
            .order_by_asc(station::Column::Name)
            .all(db)
            .await
    }

    /// 每个站点最新时刻的最高 AQI
    pub async fn latest_aqi(db: &DatabaseConnection) -> Result<Vec<StationAqiRow>, sea_orm::DbErr> {
        let sql = "SELECT r.station_id AS station_id, r.recorded_at AS recorded_at, MAX(r.aqi) AS aqi \
                   FROM readings r \
                   JOIN (SELECT station_id, MAX(recorded_at) AS ts FROM readings GROUP BY station_id) m \
                   ON m.station_id = r.station_id AND m.ts = r.recorded_at \
                   GROUP BY r.station_id, r.recorded_at";
        StationAqiRow::find_by_statement(Statement::from_string(
            db.get_database_backend(),
            sql.to_string(),
        ))
        .all(db)
        .await
    }
}
