use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "daily_stats")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub station_id: i32,
    pub pollutant_id: i32,
    pub day: String, // YYYY-MM-DD (UTC)
    pub avg_value: f64,
    pub p95_value: f64,
    pub avg_aqi: Option<i32>,
    pub max_aqi: Option<i32>,
    pub min_aqi: Option<i32>,
    pub readings_count: i32,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
