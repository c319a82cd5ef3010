mod common;

use chrono::{Duration, Utc};
use community_backend::{
    authorship::Role,
    error::AppError,
    routes::{
        notice::{CreateNoticeRequest, Notice, NoticeStatus, NoticeType, UpdateNoticeRequest},
        user::User,
    },
};
use sqlx::PgPool;

async fn publish(pool: &PgPool, admin_id: i64, title: &str, notice_type: NoticeType) -> i64 {
    Notice::create(
        pool,
        admin_id,
        CreateNoticeRequest {
            title: title.to_string(),
            content: format!("{title}的内容"),
            notice_type,
            expiration: Some(Utc::now() + Duration::days(7)),
            is_top: false,
            status: None,
            attachments: vec![],
        },
    )
    .await
    .unwrap()
    .notice
    .id
}

async fn status_of(pool: &PgPool, id: i64) -> (NoticeStatus, bool) {
    sqlx::query_as("SELECT status, is_expired FROM notices WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn listing_expires_overdue_notices() {
    let Some(db) = common::setup().await else { return };
    let pool = &db.pool;

    let admin = common::create_user(pool, "s6_admin", Role::Admin).await;
    let user = common::create_user(pool, "s6_user", Role::User).await;
    let stale = publish(pool, admin.id, "过期公告", NoticeType::General).await;
    let fresh = publish(pool, admin.id, "有效公告", NoticeType::General).await;

    sqlx::query("UPDATE notices SET expiration = NOW() - INTERVAL '1 second' WHERE id = $1")
        .bind(stale)
        .execute(pool)
        .await
        .unwrap();

    let page = Notice::list(pool, user.id, &Default::default()).await.unwrap();
    let ids: Vec<i64> = page.page.items.iter().map(|n| n.id).collect();
    assert_eq!(ids, vec![fresh]);
    assert_eq!(page.unread_count, 1);
    assert_eq!(status_of(pool, stale).await, (NoticeStatus::Expired, true));

    let detail = Notice::detail(pool, Some(user.id), stale).await;
    assert!(matches!(detail, Err(AppError::Expired(_))));

    // 到期时间推后，公告恢复为已发布
    Notice::update(
        pool,
        admin.id,
        admin.role,
        stale,
        UpdateNoticeRequest {
            title: None,
            content: None,
            notice_type: None,
            expiration: Some(Utc::now() + Duration::days(1)),
            is_top: None,
        },
    )
    .await
    .unwrap();
    assert_eq!(status_of(pool, stale).await, (NoticeStatus::Approved, false));

    db.cleanup().await;
}

#[tokio::test]
async fn marking_read_twice_changes_nothing() {
    let Some(db) = common::setup().await else { return };
    let pool = &db.pool;

    let admin = common::create_user(pool, "l4_admin", Role::Admin).await;
    let user = common::create_user(pool, "l4_user", Role::User).await;
    let notice = publish(pool, admin.id, "社区通知", NoticeType::System).await;

    assert_eq!(Notice::unread_count(pool, user.id).await.unwrap(), 1);
    assert!(Notice::mark_read(pool, user.id, notice).await.unwrap());
    assert!(!Notice::mark_read(pool, user.id, notice).await.unwrap());
    assert_eq!(Notice::unread_count(pool, user.id).await.unwrap(), 0);

    let reads: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notice_reads WHERE notice_id = $1")
        .bind(notice)
        .fetch_one(pool)
        .await
        .unwrap();
    assert_eq!(reads, 1);

    db.cleanup().await;
}

#[tokio::test]
async fn mark_all_reports_inserted_rows_and_respects_visibility() {
    let Some(db) = common::setup().await else { return };
    let pool = &db.pool;

    let admin = common::create_user(pool, "all_admin", Role::Admin).await;
    let user = common::create_user(pool, "all_user", Role::User).await;
    let first = publish(pool, admin.id, "通知一", NoticeType::General).await;
    publish(pool, admin.id, "通知二", NoticeType::Activity).await;
    let legacy: i64 = sqlx::query_scalar(
        "INSERT INTO notices (release_title, release_notice, notice_type, status, author_display) \
         VALUES ('管理员通知', '仅管理员可见', 'ADMIN', 'APPROVED', '管理员（管理员）') RETURNING id",
    )
    .fetch_one(pool)
    .await
    .unwrap();

    Notice::mark_read(pool, user.id, first).await.unwrap();
    assert_eq!(Notice::mark_all(pool, user.id).await.unwrap(), 1);
    assert_eq!(Notice::mark_all(pool, user.id).await.unwrap(), 0);

    let hidden = Notice::detail(pool, Some(user.id), legacy).await;
    assert!(matches!(hidden, Err(AppError::Forbidden(_))));

    assert_eq!(Notice::unread_count(pool, admin.id).await.unwrap(), 3);
    assert_eq!(Notice::mark_all(pool, admin.id).await.unwrap(), 3);

    db.cleanup().await;
}

#[tokio::test]
async fn read_statistics_use_type_specific_targets() {
    let Some(db) = common::setup().await else { return };
    let pool = &db.pool;

    let admin = common::create_user(pool, "stat_admin", Role::Admin).await;
    let reader = common::create_user(pool, "stat_reader", Role::User).await;
    common::create_user(pool, "stat_idle", Role::User).await;
    let general = publish(pool, admin.id, "普通公告", NoticeType::General).await;
    let system = publish(pool, admin.id, "系统公告", NoticeType::System).await;

    Notice::mark_read(pool, reader.id, general).await.unwrap();

    let stats = Notice::read_statistics(pool, general).await.unwrap();
    assert_eq!(stats.target_user_count, 3);
    assert_eq!(stats.read_count, 1);
    assert_eq!(stats.unread_count, 2);
    assert_eq!(stats.read_rate, 33.33);

    let stats = Notice::read_statistics(pool, system).await.unwrap();
    assert_eq!(stats.target_user_count, 3);
    assert_eq!(stats.read_count, 0);

    db.cleanup().await;
}

#[tokio::test]
async fn statistics_count_admins_once_and_skip_deleted_readers() {
    let Some(db) = common::setup().await else { return };
    let pool = &db.pool;

    let admin = common::create_user(pool, "tgt_admin", Role::Admin).await;
    let reader = common::create_user(pool, "tgt_reader", Role::User).await;
    let leaver = common::create_user(pool, "tgt_leaver", Role::User).await;
    let system = publish(pool, admin.id, "系统维护", NoticeType::System).await;
    let general = publish(pool, admin.id, "社区公告", NoticeType::General).await;
    let legacy: i64 = sqlx::query_scalar(
        "INSERT INTO notices (release_title, release_notice, notice_type, status, author_display) \
         VALUES ('管理员例会', '仅管理员可见', 'ADMIN', 'APPROVED', '管理员（管理员）') RETURNING id",
    )
    .fetch_one(pool)
    .await
    .unwrap();

    let stats = Notice::read_statistics(pool, system).await.unwrap();
    assert_eq!(stats.target_user_count, 3);
    let stats = Notice::read_statistics(pool, legacy).await.unwrap();
    assert_eq!(stats.target_user_count, 1);

    Notice::mark_read(pool, admin.id, legacy).await.unwrap();
    let stats = Notice::read_statistics(pool, legacy).await.unwrap();
    assert_eq!(stats.read_count, 1);
    assert_eq!(stats.unread_count, 0);
    assert_eq!(stats.read_rate, 100.0);

    for user_id in [admin.id, reader.id, leaver.id] {
        Notice::mark_read(pool, user_id, general).await.unwrap();
    }
    let stats = Notice::read_statistics(pool, general).await.unwrap();
    assert_eq!((stats.target_user_count, stats.read_count), (3, 3));
    assert_eq!(stats.read_rate, 100.0);

    User::soft_delete(pool, leaver.id).await.unwrap();

    let stats = Notice::read_statistics(pool, general).await.unwrap();
    assert_eq!(stats.target_user_count, 2);
    assert_eq!(stats.read_count, 2);
    assert_eq!(stats.unread_count, 0);
    assert_eq!(stats.read_rate, 100.0);

    let stats = Notice::read_statistics(pool, system).await.unwrap();
    assert_eq!(stats.target_user_count, 2);

    db.cleanup().await;
}

#[tokio::test]
async fn unread_count_skips_overdue_notices_without_a_sweep() {
    let Some(db) = common::setup().await else { return };
    let pool = &db.pool;

    let admin = common::create_user(pool, "ovd_admin", Role::Admin).await;
    let user = common::create_user(pool, "ovd_user", Role::User).await;
    let stale = publish(pool, admin.id, "即将过期", NoticeType::General).await;
    publish(pool, admin.id, "长期有效", NoticeType::General).await;

    sqlx::query("UPDATE notices SET expiration = NOW() - INTERVAL '1 second' WHERE id = $1")
        .bind(stale)
        .execute(pool)
        .await
        .unwrap();

    assert_eq!(Notice::unread_count(pool, user.id).await.unwrap(), 1);
    // 计数不会写库，状态仍停留在 APPROVED
    assert_eq!(status_of(pool, stale).await, (NoticeStatus::Approved, false));

    db.cleanup().await;
}

#[tokio::test]
async fn admin_sweep_expires_and_restores() {
    let Some(db) = common::setup().await else { return };
    let pool = &db.pool;

    let admin = common::create_user(pool, "swp_admin", Role::Admin).await;
    let stale = publish(pool, admin.id, "已过期", NoticeType::General).await;
    let extended = publish(pool, admin.id, "已延期", NoticeType::General).await;

    sqlx::query("UPDATE notices SET expiration = NOW() - INTERVAL '1 second' WHERE id = $1")
        .bind(stale)
        .execute(pool)
        .await
        .unwrap();
    sqlx::query(
        "UPDATE notices SET status = 'EXPIRED', is_expired = TRUE, expiration = NOW() + INTERVAL '1 day' \
         WHERE id = $1",
    )
    .bind(extended)
    .execute(pool)
    .await
    .unwrap();

    let report = Notice::sweep(pool).await.unwrap();
    assert_eq!((report.expired, report.restored), (1, 1));
    assert_eq!(status_of(pool, stale).await, (NoticeStatus::Expired, true));
    assert_eq!(status_of(pool, extended).await, (NoticeStatus::Approved, false));

    let report = Notice::sweep(pool).await.unwrap();
    assert_eq!((report.expired, report.restored), (0, 0));

    db.cleanup().await;
}

#[tokio::test]
async fn notices_require_an_author_display() {
    let Some(db) = common::setup().await else { return };
    let pool = &db.pool;

    let inserted = sqlx::query(
        "INSERT INTO notices (release_title, release_notice, notice_type, status) \
         VALUES ('无署名', '缺少发布人', 'GENERAL', 'APPROVED')",
    )
    .execute(pool)
    .await;
    assert!(inserted.is_err());

    db.cleanup().await;
}

#[tokio::test]
async fn deleting_a_notice_keeps_anonymised_reads() {
    let Some(db) = common::setup().await else { return };
    let pool = &db.pool;

    let admin = common::create_user(pool, "del_admin", Role::Admin).await;
    let user = common::create_user(pool, "del_user", Role::User).await;
    let notice = publish(pool, admin.id, "临时公告", NoticeType::General).await;
    Notice::detail(pool, Some(user.id), notice).await.unwrap();

    assert_eq!(Notice::delete(pool, admin.id, admin.role, notice).await.unwrap(), 1);

    let (notice_id, display, reason): (Option<i64>, Option<String>, Option<String>) = sqlx::query_as(
        "SELECT notice_id, anonymized_user_display, anonymize_reason FROM notice_reads WHERE user_id = $1",
    )
    .bind(user.id)
    .fetch_one(pool)
    .await
    .unwrap();
    assert_eq!(notice_id, None);
    assert_eq!(display.as_deref(), Some("公告已删除"));
    assert_eq!(reason.as_deref(), Some("notice_delete"));

    db.cleanup().await;
}
