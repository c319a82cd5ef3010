mod common;

use community_backend::{
    authorship::Role,
    error::AppError,
    routes::{
        activity::{Activity, ActivityStatus},
        booking::{BatchOperation, BatchRequest, Booking, BookingStatus, MyBookingsQuery, TotalScope},
        rating::{ActivityRating, CreateRatingRequest},
    },
};

#[tokio::test]
async fn booking_respects_capacity_and_frees_spot_on_cancel() {
    let Some(db) = common::setup().await else { return };
    let pool = &db.pool;

    let organizer = common::create_user(pool, "org_s1", Role::OrgUser).await;
    let u1 = common::create_user(pool, "s1_u1", Role::User).await;
    let u2 = common::create_user(pool, "s1_u2", Role::User).await;
    let u3 = common::create_user(pool, "s1_u3", Role::User).await;
    let activity = common::published_activity(pool, organizer.id, 2).await;

    let (first, second) = tokio::join!(
        Booking::book(pool, u1.id, activity, None),
        Booking::book(pool, u2.id, activity, None),
    );
    assert!(first.is_ok());
    assert!(second.is_ok());

    let third = Booking::book(pool, u3.id, activity, None).await;
    assert!(matches!(third, Err(AppError::CapacityExceeded(_))));

    Booking::cancel(pool, u2.id, activity).await.unwrap();
    let retry = Booking::book(pool, u3.id, activity, None).await.unwrap();
    assert_eq!(retry.status, BookingStatus::Booked);

    let stats = Booking::statistics(pool, activity).await.unwrap();
    assert_eq!(stats.booked_count, 2);
    assert_eq!(stats.cancelled_count, 1);
    assert_eq!(stats.available_spots, 0);

    db.cleanup().await;
}

#[tokio::test]
async fn double_booking_is_a_conflict() {
    let Some(db) = common::setup().await else { return };
    let pool = &db.pool;

    let organizer = common::create_user(pool, "org_l1", Role::OrgUser).await;
    let user = common::create_user(pool, "l1_user", Role::User).await;
    let activity = common::published_activity(pool, organizer.id, 5).await;

    let booking = Booking::book(pool, user.id, activity, None).await.unwrap();
    let again = Booking::book(pool, user.id, activity, None).await;
    assert!(matches!(again, Err(AppError::Conflict(_))));

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM activity_bookings WHERE activity_id = $1")
        .bind(activity)
        .fetch_one(pool)
        .await
        .unwrap();
    assert_eq!(rows, 1);
    let detail = Booking::detail(pool, user.id, booking.id).await.unwrap();
    assert_eq!(detail.updated_at, booking.updated_at);

    db.cleanup().await;
}

#[tokio::test]
async fn rebooking_reactivates_the_cancelled_row() {
    let Some(db) = common::setup().await else { return };
    let pool = &db.pool;

    let organizer = common::create_user(pool, "org_l2", Role::OrgUser).await;
    let user = common::create_user(pool, "l2_user", Role::User).await;
    let activity = common::published_activity(pool, organizer.id, 5).await;

    let original = Booking::book(pool, user.id, activity, Some("靠窗".into())).await.unwrap();
    Booking::cancel(pool, user.id, activity).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let again = Booking::book(pool, user.id, activity, None).await.unwrap();

    assert_eq!(again.id, original.id);
    assert_eq!(again.status, BookingStatus::Booked);
    assert_eq!(again.notes, None);
    assert!(again.updated_at > original.updated_at);

    db.cleanup().await;
}

#[tokio::test]
async fn cancel_is_forbidden_once_activity_completed() {
    let Some(db) = common::setup().await else { return };
    let pool = &db.pool;

    let organizer = common::create_user(pool, "org_done", Role::OrgUser).await;
    let user = common::create_user(pool, "done_user", Role::User).await;
    let activity = common::published_activity(pool, organizer.id, 5).await;
    Booking::book(pool, user.id, activity, None).await.unwrap();

    common::end_activity(pool, activity).await;
    Activity::transition(pool, organizer.id, activity, ActivityStatus::Completed)
        .await
        .unwrap();

    let result = Booking::cancel(pool, user.id, activity).await;
    assert!(matches!(result, Err(AppError::Forbidden(_))));

    db.cleanup().await;
}

#[tokio::test]
async fn rating_requires_attendance_and_is_single_use() {
    let Some(db) = common::setup().await else { return };
    let pool = &db.pool;

    let organizer = common::create_user(pool, "org_rate", Role::OrgUser).await;
    let user = common::create_user(pool, "rate_user", Role::User).await;
    let activity = common::published_activity(pool, organizer.id, 5).await;
    let booking = Booking::book(pool, user.id, activity, None).await.unwrap();

    let early = ActivityRating::create(
        pool,
        user.id,
        activity,
        CreateRatingRequest {
            score: 5,
            comment_content: None,
        },
    )
    .await;
    assert!(matches!(early, Err(AppError::Forbidden(_))));

    let result = Booking::batch(
        pool,
        organizer.id,
        activity,
        BatchRequest {
            operation: BatchOperation::ConfirmAttendance,
            booking_ids: vec![booking.id],
        },
    )
    .await
    .unwrap();
    assert!(result.committed);

    let rating = ActivityRating::create(
        pool,
        user.id,
        activity,
        CreateRatingRequest {
            score: 4,
            comment_content: Some("很好".into()),
        },
    )
    .await
    .unwrap();
    assert_eq!(rating.score, 4);

    let twice = ActivityRating::create(
        pool,
        user.id,
        activity,
        CreateRatingRequest {
            score: 3,
            comment_content: None,
        },
    )
    .await;
    assert!(matches!(twice, Err(AppError::Conflict(_))));

    let stats = ActivityRating::statistics(pool, activity).await.unwrap();
    assert_eq!(stats.total_ratings, 1);
    assert_eq!(stats.average_score, 4.0);
    assert_eq!(stats.distribution.len(), 5);

    db.cleanup().await;
}

#[tokio::test]
async fn batch_commits_only_when_some_row_succeeds() {
    let Some(db) = common::setup().await else { return };
    let pool = &db.pool;

    let organizer = common::create_user(pool, "org_batch", Role::OrgUser).await;
    let user = common::create_user(pool, "batch_user", Role::User).await;
    let activity = common::published_activity(pool, organizer.id, 5).await;
    let booking = Booking::book(pool, user.id, activity, None).await.unwrap();

    let mixed = Booking::batch(
        pool,
        organizer.id,
        activity,
        BatchRequest {
            operation: BatchOperation::MarkAbsent,
            booking_ids: vec![booking.id, booking.id + 1000],
        },
    )
    .await
    .unwrap();
    assert!(mixed.committed);
    assert_eq!(mixed.success_count, 1);
    assert_eq!(mixed.error_count, 1);

    let none = Booking::batch(
        pool,
        organizer.id,
        activity,
        BatchRequest {
            operation: BatchOperation::Cancel,
            booking_ids: vec![booking.id],
        },
    )
    .await
    .unwrap();
    assert!(!none.committed);
    assert_eq!(none.success_count, 0);

    let stored = Booking::detail(pool, user.id, booking.id).await.unwrap();
    assert_eq!(stored.status, BookingStatus::Absent);

    let stranger = common::create_user(pool, "batch_stranger", Role::OrgUser).await;
    let denied = Booking::batch(
        pool,
        stranger.id,
        activity,
        BatchRequest {
            operation: BatchOperation::ConfirmAttendance,
            booking_ids: vec![booking.id],
        },
    )
    .await;
    assert!(matches!(denied, Err(AppError::Forbidden(_))));

    db.cleanup().await;
}

#[tokio::test]
async fn my_bookings_total_follows_requested_scope() {
    let Some(db) = common::setup().await else { return };
    let pool = &db.pool;

    let organizer = common::create_user(pool, "org_scope", Role::OrgUser).await;
    let user = common::create_user(pool, "scope_user", Role::User).await;
    let upcoming = common::published_activity(pool, organizer.id, 5).await;
    let finished = common::published_activity(pool, organizer.id, 5).await;
    Booking::book(pool, user.id, upcoming, None).await.unwrap();
    Booking::book(pool, user.id, finished, None).await.unwrap();
    common::end_activity(pool, finished).await;
    Activity::transition(pool, organizer.id, finished, ActivityStatus::Completed)
        .await
        .unwrap();

    let filtered = Booking::my_bookings(
        pool,
        user.id,
        &MyBookingsQuery {
            activity_status: Some(ActivityStatus::Completed),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(filtered.total, 1);
    assert_eq!(filtered.items.len(), 1);
    assert_eq!(filtered.items[0].activity_id, finished);

    let unfiltered = Booking::my_bookings(
        pool,
        user.id,
        &MyBookingsQuery {
            activity_status: Some(ActivityStatus::Completed),
            total_scope: Some(TotalScope::Unfiltered),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(unfiltered.total, 2);
    assert_eq!(unfiltered.items.len(), 1);

    db.cleanup().await;
}

#[tokio::test]
async fn statistics_for_missing_activity_is_not_found() {
    let Some(db) = common::setup().await else { return };
    let pool = &db.pool;

    let missing = ActivityRating::statistics(pool, 999_999).await;
    assert!(matches!(missing, Err(AppError::NotFound(_))));

    db.cleanup().await;
}
