use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 唯一约束 (station_id, pollutant_id, recorded_at) 由 connection.rs 建立
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "readings")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub station_id: i32,
    pub pollutant_id: i32,
    pub provider_id: Option<i32>,
    pub recorded_at: i64,
    pub value: f64,
    pub aqi: Option<i32>,
    pub raw_json: String,
    pub created_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
