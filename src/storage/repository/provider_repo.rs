use crate::storage::entity::provider::{self, Entity as Provider, Model as ProviderModel};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};

pub struct ProviderRepository;

impl ProviderRepository {
    pub async fn list_active(db: &DatabaseConnection) -> Result<Vec<ProviderModel>, sea_orm::DbErr> {
        Provider::find()
            .filter(provider::Column::IsActive.eq(true))
            .order_by_asc(provider::Column::Id)
            .all(db)
            .await
    }

    pub async fn first_active(
        db: &DatabaseConnection,
    ) -> Result<Option<ProviderModel>, sea_orm::DbErr> {
        Provider::find()
            .filter(provider::Column::IsActive.eq(true))
            .order_by_asc(provider::Column::Id)
            .one(db)
            .await
    }

    #[cfg(test)]
    pub async fn find_by_name(
        db: &DatabaseConnection,
        name: &str,
    ) -> Result<Option<ProviderModel>, sea_orm::DbErr> {
        Provider::find()
            .filter(provider::Column::Name.eq(name))
            .one(db)
            .await
    }

    pub async fn mark_ingested(
        db: &DatabaseConnection,
        id: i32,
        at: i64,
    ) -> Result<(), sea_orm::DbErr> {
        Provider::update_many()
            .col_expr(provider::Column::LastIngestedAt, Expr::value(at))
            .filter(provider::Column::Id.eq(id))
            .exec(db)
            .await?;
        Ok(())
    }
}

/// 是否到了该 provider 的拉取时间
pub fn is_due(p: &ProviderModel, now: i64) -> bool {
    match p.last_ingested_at {
        None => true,
        Some(last) => last + i64::from(p.ingestion_frequency_minutes) * 60 <= now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::connection::memory_db;

    #[tokio::test]
    async fn due_follows_frequency() {
        let db = memory_db().await;
        let p = ProviderRepository::find_by_name(&db, "IQAir Mock")
            .await
            .unwrap()
            .unwrap();
        assert!(is_due(&p, 1_000));

        ProviderRepository::mark_ingested(&db, p.id, 1_000).await.unwrap();
        let p = ProviderRepository::find_by_name(&db, "IQAir Mock")
            .await
            .unwrap()
            .unwrap();
        assert!(!is_due(&p, 1_000 + 59 * 60));
        assert!(is_due(&p, 1_000 + 60 * 60));
    }
}
