mod common;

use chrono::{Duration, Utc};
use community_backend::{
    authorship::{DELETED_USER_DISPLAY, Role},
    routes::{
        booking::Booking,
        discussion::{CreateDiscussionRequest, Discussion},
        notice::{CreateNoticeRequest, Notice, NoticeType},
        rating::{ActivityRating, CreateRatingRequest},
        user::{NewUser, SoftDeleteOutcome, User},
    },
};

#[tokio::test]
async fn soft_delete_anonymises_every_authored_row() {
    let Some(db) = common::setup().await else { return };
    let pool = &db.pool;

    let admin = common::create_user(pool, "s5_admin", Role::Admin).await;
    let user = common::create_user(pool, "s5_user", Role::OrgUser).await;
    let activity = common::published_activity(pool, user.id, 10).await;

    let mut discussions = Vec::new();
    for text in ["第一条讨论", "第二条讨论"] {
        let d = Discussion::create(
            pool,
            user.id,
            activity,
            CreateDiscussionRequest {
                content: text.to_string(),
                image_urls: vec![],
            },
        )
        .await
        .unwrap();
        discussions.push(d.id);
    }

    // 自己组织的活动也能预约、签到后评分
    let booking = Booking::book(pool, user.id, activity, None).await.unwrap();
    sqlx::query("UPDATE activity_bookings SET status = 'attended' WHERE id = $1")
        .bind(booking.id)
        .execute(pool)
        .await
        .unwrap();
    let rating = ActivityRating::create(
        pool,
        user.id,
        activity,
        CreateRatingRequest {
            score: 5,
            comment_content: None,
        },
    )
    .await
    .unwrap();

    let notice = Notice::create(
        pool,
        admin.id,
        CreateNoticeRequest {
            title: "停水通知".to_string(),
            content: "周六上午停水".to_string(),
            notice_type: NoticeType::General,
            expiration: Some(Utc::now() + Duration::days(1)),
            is_top: false,
            status: None,
            attachments: vec![],
        },
    )
    .await
    .unwrap();
    assert!(Notice::mark_read(pool, user.id, notice.notice.id).await.unwrap());

    let outcome = User::soft_delete(pool, user.id).await.unwrap();
    let SoftDeleteOutcome::Deleted { record, anonymised } = outcome else {
        panic!("first delete should anonymise");
    };
    assert_eq!(record.original_user_id, user.id);
    assert_eq!(record.original_account, user.account);
    assert_eq!(anonymised.activities, 1);
    assert_eq!(anonymised.discussions, 2);
    assert_eq!(anonymised.ratings, 1);
    assert_eq!(anonymised.notice_reads, 1);

    let (organizer_id, organizer_display): (Option<i64>, String) =
        sqlx::query_as("SELECT organizer_user_id, organizer_display FROM activities WHERE id = $1")
            .bind(activity)
            .fetch_one(pool)
            .await
            .unwrap();
    assert_eq!(organizer_id, None);
    assert_eq!(organizer_display, DELETED_USER_DISPLAY);

    for id in discussions {
        let (author, display): (Option<i64>, String) =
            sqlx::query_as("SELECT author_user_id, author_display FROM activity_discussions WHERE id = $1")
                .bind(id)
                .fetch_one(pool)
                .await
                .unwrap();
        assert_eq!(author, None);
        assert_eq!(display, DELETED_USER_DISPLAY);
    }

    let (rater, rater_display): (Option<i64>, String) =
        sqlx::query_as("SELECT rater_user_id, rater_display FROM activity_ratings WHERE id = $1")
            .bind(rating.id)
            .fetch_one(pool)
            .await
            .unwrap();
    assert_eq!(rater, None);
    assert_eq!(rater_display, DELETED_USER_DISPLAY);

    let (reader, reader_display, reason): (Option<i64>, Option<String>, Option<String>) = sqlx::query_as(
        "SELECT user_id, anonymized_user_display, anonymize_reason FROM notice_reads WHERE notice_id = $1",
    )
    .bind(notice.notice.id)
    .fetch_one(pool)
    .await
    .unwrap();
    assert_eq!(reader, None);
    assert_eq!(reader_display.as_deref(), Some(DELETED_USER_DISPLAY));
    assert_eq!(reason.as_deref(), Some("user_delete"));

    // 原账号和手机号可以重新注册
    let reborn = User::create(
        pool,
        NewUser {
            account: user.account.clone(),
            password_hash: "hash".to_string(),
            username: "新用户".to_string(),
            phone: user.phone.clone(),
            email: None,
            role: Role::User,
        },
    )
    .await
    .unwrap();
    assert_ne!(reborn.id, user.id);

    db.cleanup().await;
}

#[tokio::test]
async fn second_soft_delete_is_a_no_op() {
    let Some(db) = common::setup().await else { return };
    let pool = &db.pool;

    let user = common::create_user(pool, "l5_user", Role::User).await;
    assert!(matches!(
        User::soft_delete(pool, user.id).await.unwrap(),
        SoftDeleteOutcome::Deleted { .. }
    ));
    assert!(matches!(
        User::soft_delete(pool, user.id).await.unwrap(),
        SoftDeleteOutcome::AlreadyDeleted
    ));

    let records: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM deleted_users WHERE original_user_id = $1")
        .bind(user.id)
        .fetch_one(pool)
        .await
        .unwrap();
    assert_eq!(records, 1);

    db.cleanup().await;
}
