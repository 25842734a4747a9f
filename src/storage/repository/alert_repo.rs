use crate::storage::entity::alert::{
    self, ActiveModel as AlertActiveModel, Entity as Alert, Model as AlertModel,
};
use crate::storage::entity::alert_history::{
    self, ActiveModel as AlertHistoryActiveModel, Entity as AlertHistory,
};
use crate::storage::entity::recommendation::{
    self, ActiveModel as RecommendationActiveModel, Entity as Recommendation,
    Model as RecommendationModel,
};
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};

pub struct AlertRepository;

#[derive(Debug, Clone)]
pub struct NewAlert {
    pub user_id: i32,
    pub station_id: i32,
    pub pollutant_id: i32,
    pub threshold: f64,
    pub trigger_condition: String,
    pub notification_method: String,
}

impl AlertRepository {
    pub async fn create(db: &DatabaseConnection, a: NewAlert) -> Result<AlertModel, sea_orm::DbErr> {
        AlertActiveModel {
            user_id: Set(a.user_id),
            station_id: Set(a.station_id),
            pollutant_id: Set(a.pollutant_id),
            threshold: Set(a.threshold),
            trigger_condition: Set(a.trigger_condition),
            notification_method: Set(a.notification_method),
            is_active: Set(true),
            triggered_at: Set(None),
            created_at: Set(Utc::now().timestamp()),
            ..Default::default()
        }
        .insert(db)
        .await
    }

    pub async fn list_active(db: &DatabaseConnection) -> Result<Vec<AlertModel>, sea_orm::DbErr> {
        Alert::find()
            .filter(alert::Column::IsActive.eq(true))
            .order_by_asc(alert::Column::Id)
            .all(db)
            .await
    }

    pub async fn find_by_id(
        db: &DatabaseConnection,
        id: i32,
    ) -> Result<Option<AlertModel>, sea_orm::DbErr> {
        Alert::find_by_id(id).one(db).await
    }

    /// 返回是否有记录被停用
    pub async fn deactivate(db: &DatabaseConnection, id: i32) -> Result<bool, sea_orm::DbErr> {
        let res = Alert::update_many()
            .col_expr(alert::Column::IsActive, Expr::value(false))
            .filter(alert::Column::Id.eq(id))
            .filter(alert::Column::IsActive.eq(true))
            .exec(db)
            .await?;
        Ok(res.rows_affected > 0)
    }

    pub async fn mark_triggered(
        db: &DatabaseConnection,
        id: i32,
        at: i64,
    ) -> Result<(), sea_orm::DbErr> {
        Alert::update_many()
            .col_expr(alert::Column::TriggeredAt, Expr::value(at))
            .filter(alert::Column::Id.eq(id))
            .exec(db)
            .await?;
        Ok(())
    }

    pub async fn record_attempt(
        db: &DatabaseConnection,
        alert_id: i32,
        reading_id: i32,
        value: f64,
        aqi: Option<i32>,
        channel: &str,
        delivered: bool,
        at: i64,
    ) -> Result<(), sea_orm::DbErr> {
        AlertHistory::insert(AlertHistoryActiveModel {
            alert_id: Set(alert_id),
            reading_id: Set(reading_id),
            value: Set(value),
            aqi: Set(aqi),
            channel: Set(channel.to_string()),
            delivered: Set(delivered),
            created_at: Set(at),
            ..Default::default()
        })
        .exec_without_returning(db)
        .await?;
        Ok(())
    }

    /// 最近一次通知尝试（无论是否送达）的时间
    pub async fn last_attempt_at(
        db: &DatabaseConnection,
        alert_id: i32,
    ) -> Result<Option<i64>, sea_orm::DbErr> {
        Ok(AlertHistory::find()
            .filter(alert_history::Column::AlertId.eq(alert_id))
            .order_by_desc(alert_history::Column::CreatedAt)
            .one(db)
            .await?
            .map(|h| h.created_at))
    }

    pub async fn add_recommendation(
        db: &DatabaseConnection,
        user_id: i32,
        station_id: i32,
        aqi_band: i32,
        message: String,
    ) -> Result<(), sea_orm::DbErr> {
        Recommendation::insert(RecommendationActiveModel {
            user_id: Set(user_id),
            station_id: Set(station_id),
            aqi_band: Set(aqi_band),
            message: Set(message),
            created_at: Set(Utc::now().timestamp()),
            ..Default::default()
        })
        .exec_without_returning(db)
        .await?;
        Ok(())
    }

    pub async fn recommendations_for(
        db: &DatabaseConnection,
        user_id: i32,
        limit: u64,
    ) -> Result<Vec<RecommendationModel>, sea_orm::DbErr> {
        Recommendation::find()
            .filter(recommendation::Column::UserId.eq(user_id))
            .order_by_desc(recommendation::Column::Id)
            .limit(limit)
            .all(db)
            .await
    }
}
