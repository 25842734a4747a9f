use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "alerts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub user_id: i32,
    pub station_id: i32,
    pub pollutant_id: i32,
    pub threshold: f64,
    pub trigger_condition: String,   // exceeds / below / equals
    pub notification_method: String, // telegram / email / in-app / all
    pub is_active: bool,
    pub triggered_at: Option<i64>, // 最近一次成功通知，用于冷却
    pub created_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
