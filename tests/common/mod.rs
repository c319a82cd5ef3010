#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{Duration, Utc};
use community_backend::{
    authorship::Role,
    db,
    routes::{
        activity::{Activity, ActivityStatus, CreateActivityRequest},
        user::{NewUser, User},
    },
};
use sqlx::{Executor, PgPool, postgres::PgPoolOptions};
use uuid::Uuid;

/// 每个测试一个独立 schema，互不干扰
pub struct TestDb {
    pub pool: PgPool,
    admin: PgPool,
    schema: String,
}

fn database_url() -> Option<String> {
    dotenv::dotenv().ok();
    std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .ok()
}

/// 没有配置数据库时返回 None，调用方直接跳过
pub async fn setup() -> Option<TestDb> {
    let Some(url) = database_url() else {
        eprintln!("未设置 TEST_DATABASE_URL / DATABASE_URL，跳过数据库测试");
        return None;
    };

    let admin = PgPoolOptions::new()
        .max_connections(1)
        .connect(&url)
        .await
        .expect("connect admin pool");
    let schema = format!("t_{}", Uuid::new_v4().simple());
    admin
        .execute(format!("CREATE SCHEMA {schema}").as_str())
        .await
        .expect("create schema");

    let search_path = schema.clone();
    let pool = PgPoolOptions::new()
        .max_connections(12)
        .after_connect(move |conn, _meta| {
            let search_path = search_path.clone();
            Box::pin(async move {
                conn.execute(format!("SET search_path TO {search_path}").as_str())
                    .await?;
                conn.execute("SET TIME ZONE 'UTC';").await?;
                Ok(())
            })
        })
        .connect(&url)
        .await
        .expect("connect test pool");

    db::migrate(&pool).await.expect("run migrations");
    Some(TestDb { pool, admin, schema })
}

impl TestDb {
    pub async fn cleanup(self) {
        self.pool.close().await;
        let _ = self
            .admin
            .execute(format!("DROP SCHEMA {} CASCADE", self.schema).as_str())
            .await;
    }
}

static NEXT_PHONE: AtomicU64 = AtomicU64::new(1);

pub async fn create_user(pool: &PgPool, account: &str, role: Role) -> User {
    User::create(
        pool,
        NewUser {
            account: account.to_string(),
            password_hash: "$2b$04$placeholderplaceholderplaceholderplaceholde".to_string(),
            username: format!("{account}_name"),
            phone: format!("138{:08}", NEXT_PHONE.fetch_add(1, Ordering::Relaxed)),
            email: None,
            role,
        },
    )
    .await
    .expect("create user")
}

/// 未来一小时开始、持续两小时的已发布活动
pub async fn published_activity(pool: &PgPool, organizer_id: i64, max_participants: i32) -> i64 {
    let start = Utc::now() + Duration::hours(1);
    let view = Activity::create(
        pool,
        organizer_id,
        CreateActivityRequest {
            title: "社区义诊".to_string(),
            description: "测试活动".to_string(),
            location: "社区中心".to_string(),
            start_time: Some(start),
            end_time: Some(start + Duration::hours(2)),
            max_participants,
            tags: vec!["健康".to_string()],
            status: Some(ActivityStatus::Published),
        },
    )
    .await
    .expect("create activity");
    view.activity.id
}

/// 把活动时间挪到过去，模拟活动已经结束
pub async fn end_activity(pool: &PgPool, activity_id: i64) {
    sqlx::query(
        "UPDATE activities SET start_time = NOW() - INTERVAL '3 hours', end_time = NOW() - INTERVAL '1 hour' \
         WHERE id = $1",
    )
    .bind(activity_id)
    .execute(pool)
    .await
    .expect("end activity");
}
