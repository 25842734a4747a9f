use crate::aqi::Pollutant;
use crate::storage::entity::{
    alert, alert_history, app_user, daily_stat, error_log, job_log, permission, pollutant,
    provider, reading, recommendation, role, role_permission, station,
};
use chrono::Utc;
use log::info;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr,
    EntityTrait, QueryFilter, Schema, Set,
};
use std::time::Duration;

pub const PERMISSIONS: [(&str, &str); 8] = [
    ("view_current_aqi", "View current air quality readings"),
    ("view_historical_data", "Browse historical readings and daily stats"),
    ("download_data", "Export readings"),
    ("configure_alerts", "Create and manage own alerts"),
    ("generate_reports", "Generate reports"),
    ("manage_users", "Create and deactivate users"),
    ("manage_stations", "Create and edit stations"),
    ("system_configuration", "Change providers and system settings"),
];

/// (角色, 描述, 权限)；空权限列表表示拥有全部权限
pub const ROLES: [(&str, &str, &[&str]); 3] = [
    (
        "Citizen",
        "Regular citizen user",
        &["view_current_aqi", "configure_alerts"],
    ),
    (
        "Researcher",
        "Researcher with data access",
        &[
            "view_current_aqi",
            "view_historical_data",
            "download_data",
            "configure_alerts",
            "generate_reports",
        ],
    ),
    ("Administrator", "System administrator", &[]),
];

/// (名称, 格式, 拉取间隔分钟)
pub const DEFAULT_PROVIDERS: [(&str, &str, i32); 3] = [
    ("AQICN Mock", "aqicn", 30),
    ("Google Air Quality Mock", "google", 30),
    ("IQAir Mock", "iqair", 60),
];

pub async fn establish_connection(db_url: &str) -> Result<DatabaseConnection, DbErr> {
    let in_memory = db_url.contains(":memory:");
    let mut opt = ConnectOptions::new(db_url.to_owned());
    opt.connect_timeout(Duration::from_secs(8))
        .acquire_timeout(Duration::from_secs(8))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Info);
    if in_memory {
        // 内存库每个连接各自独立，只能保留一个连接
        opt.max_connections(1).min_connections(1);
    } else {
        opt.max_connections(10)
            .min_connections(2)
            .idle_timeout(Duration::from_secs(8))
            .max_lifetime(Duration::from_secs(8));
    }

    let db = Database::connect(opt).await?;

    if db.get_database_backend() == sea_orm::DatabaseBackend::Sqlite && !in_memory {
        // 启用 WAL 模式
        db.execute(sea_orm::Statement::from_string(
            sea_orm::DatabaseBackend::Sqlite,
            "PRAGMA journal_mode=WAL;".to_string(),
        ))
        .await?;
    }

    init_schema(&db).await?;
    seed_reference_data(&db).await?;

    info!("Database connection established and schema initialized.");

    Ok(db)
}

/// 创建表（如果不存在）与复合唯一索引
pub async fn init_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    macro_rules! create_table {
        ($entity:expr) => {
            db.execute(builder.build(schema.create_table_from_entity($entity).if_not_exists()))
                .await?;
        };
    }

    create_table!(provider::Entity);
    create_table!(station::Entity);
    create_table!(pollutant::Entity);
    create_table!(reading::Entity);
    create_table!(role::Entity);
    create_table!(permission::Entity);
    create_table!(role_permission::Entity);
    create_table!(app_user::Entity);
    create_table!(alert::Entity);
    create_table!(recommendation::Entity);
    create_table!(daily_stat::Entity);
    create_table!(job_log::Entity);
    create_table!(error_log::Entity);
    create_table!(alert_history::Entity);

    // 唯一索引：去重依赖这些约束
    for sql in [
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_readings_unique ON readings(station_id, pollutant_id, recorded_at);",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_stations_unique ON stations(name, city);",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_daily_stats_unique ON daily_stats(station_id, pollutant_id, day);",
        "CREATE INDEX IF NOT EXISTS idx_readings_recorded_at ON readings(recorded_at);",
        "CREATE INDEX IF NOT EXISTS idx_alerts_active ON alerts(is_active);",
    ] {
        db.execute(sea_orm::Statement::from_string(builder, sql.to_string()))
            .await?;
    }

    Ok(())
}

/// 幂等写入角色、权限、污染物和默认数据源
pub async fn seed_reference_data(db: &DatabaseConnection) -> Result<(), DbErr> {
    let now = Utc::now().timestamp();

    for (name, description) in PERMISSIONS {
        permission::Entity::insert(permission::ActiveModel {
            name: Set(name.to_string()),
            description: Set(description.to_string()),
            ..Default::default()
        })
        .on_conflict(
            OnConflict::column(permission::Column::Name)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;
    }

    let all_permissions = permission::Entity::find().all(db).await?;

    for (name, description, grants) in ROLES {
        role::Entity::insert(role::ActiveModel {
            name: Set(name.to_string()),
            description: Set(description.to_string()),
            created_at: Set(now),
            ..Default::default()
        })
        .on_conflict(OnConflict::column(role::Column::Name).do_nothing().to_owned())
        .exec_without_returning(db)
        .await?;

        let Some(role) = role::Entity::find()
            .filter(role::Column::Name.eq(name))
            .one(db)
            .await?
        else {
            continue;
        };

        for perm in all_permissions
            .iter()
            .filter(|p| grants.is_empty() || grants.contains(&p.name.as_str()))
        {
            role_permission::Entity::insert(role_permission::ActiveModel {
                role_id: Set(role.id),
                permission_id: Set(perm.id),
            })
            .on_conflict(
                OnConflict::columns([
                    role_permission::Column::RoleId,
                    role_permission::Column::PermissionId,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(db)
            .await?;
        }
    }

    for p in Pollutant::ALL {
        pollutant::Entity::insert(pollutant::ActiveModel {
            name: Set(p.name().to_string()),
            unit: Set(p.canonical_unit().symbol().to_string()),
            description: Set(p.description().to_string()),
            ..Default::default()
        })
        .on_conflict(
            OnConflict::column(pollutant::Column::Name)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;
    }

    for (name, format, freq) in DEFAULT_PROVIDERS {
        provider::Entity::insert(provider::ActiveModel {
            name: Set(name.to_string()),
            format: Set(format.to_string()),
            api_endpoint: Set(None),
            api_key: Set(None),
            ingestion_frequency_minutes: Set(freq),
            is_active: Set(true),
            last_ingested_at: Set(None),
            created_at: Set(now),
            ..Default::default()
        })
        .on_conflict(
            OnConflict::column(provider::Column::Name)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;
    }

    Ok(())
}

#[cfg(test)]
pub(crate) async fn memory_db() -> DatabaseConnection {
    establish_connection("sqlite::memory:")
        .await
        .expect("in-memory database")
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::PaginatorTrait;

    #[tokio::test]
    async fn bootstrap_is_idempotent() {
        let db = memory_db().await;
        init_schema(&db).await.unwrap();
        seed_reference_data(&db).await.unwrap();

        assert_eq!(role::Entity::find().count(&db).await.unwrap(), 3);
        assert_eq!(permission::Entity::find().count(&db).await.unwrap(), 8);
        assert_eq!(pollutant::Entity::find().count(&db).await.unwrap(), 6);
        assert_eq!(provider::Entity::find().count(&db).await.unwrap(), 3);
        // Citizen 2 + Researcher 5 + Administrator 8
        assert_eq!(
            role_permission::Entity::find().count(&db).await.unwrap(),
            15
        );
    }

    #[tokio::test]
    async fn pollutant_units_are_canonical() {
        let db = memory_db().await;
        let co = pollutant::Entity::find()
            .filter(pollutant::Column::Name.eq("CO"))
            .one(&db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(co.unit, "ppm");
    }
}
