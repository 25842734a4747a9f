use crate::storage::entity::app_user::{
    self, ActiveModel as AppUserActiveModel, Entity as AppUser, Model as AppUserModel,
};
use crate::storage::entity::{permission, role, role_permission};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};

pub struct UserRepository;

impl UserRepository {
    pub async fn create(
        db: &DatabaseConnection,
        username: &str,
        email: &str,
        full_name: Option<String>,
        role_name: &str,
    ) -> Result<AppUserModel, sea_orm::DbErr> {
        let role = role::Entity::find()
            .filter(role::Column::Name.eq(role_name))
            .one(db)
            .await?
            .ok_or_else(|| sea_orm::DbErr::RecordNotFound(format!("role {role_name}")))?;

        let now = Utc::now().timestamp();
        AppUserActiveModel {
            username: Set(username.to_string()),
            email: Set(email.to_string()),
            full_name: Set(full_name),
            role_id: Set(role.id),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await
    }

    pub async fn find_by_id(
        db: &DatabaseConnection,
        id: i32,
    ) -> Result<Option<AppUserModel>, sea_orm::DbErr> {
        AppUser::find_by_id(id).one(db).await
    }

    /// 用户所属角色是否拥有该权限；停用用户没有任何权限
    pub async fn has_permission(
        db: &DatabaseConnection,
        user_id: i32,
        permission_name: &str,
    ) -> Result<bool, sea_orm::DbErr> {
        let Some(user) = Self::find_by_id(db, user_id).await? else {
            return Ok(false);
        };
        if !user.is_active {
            return Ok(false);
        }
        let Some(perm) = permission::Entity::find()
            .filter(permission::Column::Name.eq(permission_name))
            .one(db)
            .await?
        else {
            return Ok(false);
        };
        let grant = role_permission::Entity::find_by_id((user.role_id, perm.id))
            .one(db)
            .await?;
        Ok(grant.is_some())
    }

    pub async fn count_active(db: &DatabaseConnection) -> Result<u64, sea_orm::DbErr> {
        use sea_orm::PaginatorTrait;
        AppUser::find()
            .filter(app_user::Column::IsActive.eq(true))
            .count(db)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::connection::memory_db;

    #[tokio::test]
    async fn role_grants_follow_seed_matrix() {
        let db = memory_db().await;
        let citizen = UserRepository::create(&db, "ana", "ana@example.com", None, "Citizen")
            .await
            .unwrap();
        let admin = UserRepository::create(&db, "root", "root@example.com", None, "Administrator")
            .await
            .unwrap();

        assert!(UserRepository::has_permission(&db, citizen.id, "configure_alerts").await.unwrap());
        assert!(!UserRepository::has_permission(&db, citizen.id, "download_data").await.unwrap());
        assert!(UserRepository::has_permission(&db, admin.id, "system_configuration").await.unwrap());
        assert!(!UserRepository::has_permission(&db, 999, "view_current_aqi").await.unwrap());
    }

    #[tokio::test]
    async fn unknown_role_and_duplicate_username_fail() {
        let db = memory_db().await;
        assert!(UserRepository::create(&db, "x", "x@example.com", None, "Nobody").await.is_err());
        UserRepository::create(&db, "dup", "a@example.com", None, "Citizen").await.unwrap();
        assert!(UserRepository::create(&db, "dup", "b@example.com", None, "Citizen").await.is_err());
        assert_eq!(UserRepository::count_active(&db).await.unwrap(), 1);
    }
}
