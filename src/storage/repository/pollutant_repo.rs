use crate::storage::entity::pollutant::{self, Entity as Pollutant, Model as PollutantModel};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use std::collections::HashMap;

pub struct PollutantRepository;

impl PollutantRepository {
    pub async fn list_all(db: &DatabaseConnection) -> Result<Vec<PollutantModel>, sea_orm::DbErr> {
        Pollutant::find()
            .order_by_asc(pollutant::Column::Id)
            .all(db)
            .await
    }

    /// name -> id
    pub async fn id_map(db: &DatabaseConnection) -> Result<HashMap<String, i32>, sea_orm::DbErr> {
        Ok(Self::list_all(db)
            .await?
            .into_iter()
            .map(|p| (p.name, p.id))
            .collect())
    }

    pub async fn find_by_name(
        db: &DatabaseConnection,
        name: &str,
    ) -> Result<Option<PollutantModel>, sea_orm::DbErr> {
        Pollutant::find()
            .filter(pollutant::Column::Name.eq(name))
            .one(db)
            .await
    }
}
