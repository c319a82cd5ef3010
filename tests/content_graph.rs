mod common;

use std::collections::BTreeSet;

use community_backend::{
    authorship::Role,
    counters::{LikeOutcome, LikeTarget, UnlikeOutcome},
    routes::{
        discussion::{CreateCommentRequest, CreateDiscussionRequest, Discussion, DiscussionComment},
        forum::{self, CreatePostRequest, CreateReplyRequest, Floor, FloorRequest, Post, Reply},
    },
};
use futures_util::future::join_all;
use sqlx::PgPool;

async fn comment(pool: &PgPool, user_id: i64, discussion: i64, parent: Option<i64>, text: &str) -> i64 {
    DiscussionComment::create(
        pool,
        user_id,
        discussion,
        CreateCommentRequest {
            content: text.to_string(),
            parent_comment_id: parent,
        },
    )
    .await
    .unwrap()
    .id
}

async fn parent_of(pool: &PgPool, comment_id: i64) -> Option<Option<i64>> {
    sqlx::query_scalar("SELECT parent_comment_id FROM activity_discussion_comments WHERE id = $1")
        .bind(comment_id)
        .fetch_optional(pool)
        .await
        .unwrap()
}

async fn new_post(pool: &PgPool, user_id: i64) -> Post {
    Post::create(
        pool,
        user_id,
        CreatePostRequest {
            title: "周末徒步".to_string(),
            content: "有人一起吗".to_string(),
            category: None,
            status: None,
        },
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn deleting_a_comment_promotes_its_children() {
    let Some(db) = common::setup().await else { return };
    let pool = &db.pool;

    let user = common::create_user(pool, "s2_user", Role::User).await;
    let activity = common::published_activity(pool, user.id, 10).await;
    let discussion = Discussion::create(
        pool,
        user.id,
        activity,
        CreateDiscussionRequest {
            content: "活动几点集合？".to_string(),
            image_urls: vec![],
        },
    )
    .await
    .unwrap();

    let c1 = comment(pool, user.id, discussion.id, None, "九点").await;
    let c2 = comment(pool, user.id, discussion.id, Some(c1), "收到").await;
    let c3 = comment(pool, user.id, discussion.id, Some(c2), "好的").await;

    let deleted = DiscussionComment::delete(pool, user.id, c2).await.unwrap();
    assert_eq!(deleted.preserved_child_count, 1);

    assert_eq!(parent_of(pool, c1).await, Some(None));
    assert_eq!(parent_of(pool, c2).await, None);
    assert_eq!(parent_of(pool, c3).await, Some(None));

    let nested = DiscussionComment::nested(pool, discussion.id).await.unwrap();
    assert_eq!(nested.total_comments, 2);
    assert_eq!(nested.root_comments_count, 2);

    db.cleanup().await;
}

#[tokio::test]
async fn deleting_a_discussion_cascades_to_comments() {
    let Some(db) = common::setup().await else { return };
    let pool = &db.pool;

    let user = common::create_user(pool, "s3_user", Role::User).await;
    let activity = common::published_activity(pool, user.id, 10).await;
    let discussion = Discussion::create(
        pool,
        user.id,
        activity,
        CreateDiscussionRequest {
            content: "带水吗".to_string(),
            image_urls: vec![],
        },
    )
    .await
    .unwrap();

    let first = comment(pool, user.id, discussion.id, None, "带").await;
    let second = comment(pool, user.id, discussion.id, Some(first), "两瓶").await;
    comment(pool, user.id, discussion.id, Some(second), "够了").await;

    let deleted = Discussion::delete(pool, user.id, discussion.id).await.unwrap();
    assert_eq!(deleted.deleted_comment_count, 3);

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM activity_discussion_comments WHERE discuss_id = $1")
        .bind(discussion.id)
        .fetch_one(pool)
        .await
        .unwrap();
    assert_eq!(remaining, 0);
    assert!(Discussion::find(pool, discussion.id).await.is_err());

    db.cleanup().await;
}

#[tokio::test]
async fn concurrent_floors_get_dense_numbers() {
    let Some(db) = common::setup().await else { return };
    let pool = &db.pool;

    let user = common::create_user(pool, "s4_user", Role::User).await;
    let post = new_post(pool, user.id).await;

    let results = join_all((0..10).map(|i| {
        Floor::create(
            pool,
            user.id,
            post.id,
            FloorRequest {
                content: format!("第{}条", i),
            },
        )
    }))
    .await;

    let numbers: BTreeSet<i32> = results.into_iter().map(|r| r.unwrap().floor_number).collect();
    assert_eq!(numbers, (1..=10).collect::<BTreeSet<_>>());

    let stored = Post::find(pool, post.id).await.unwrap().unwrap();
    assert_eq!(stored.comment_count, 10);

    db.cleanup().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_floor_tasks_never_share_a_number() {
    let Some(db) = common::setup().await else { return };
    let pool = &db.pool;

    let user = common::create_user(pool, "s4_parallel", Role::User).await;
    let post = new_post(pool, user.id).await;

    let spawn_floor = |i: usize| {
        let pool = pool.clone();
        let (user_id, post_id) = (user.id, post.id);
        tokio::spawn(async move {
            Floor::create(
                &pool,
                user_id,
                post_id,
                FloorRequest {
                    content: format!("并发第{}条", i),
                },
            )
            .await
        })
    };

    let (a, b, c, d) = tokio::join!(spawn_floor(0), spawn_floor(1), spawn_floor(2), spawn_floor(3));
    let numbers: BTreeSet<i32> = [a, b, c, d]
        .into_iter()
        .map(|r| r.unwrap().unwrap().floor_number)
        .collect();
    assert_eq!(numbers, (1..=4).collect::<BTreeSet<_>>());

    let stored = Post::find(pool, post.id).await.unwrap().unwrap();
    assert_eq!(stored.comment_count, 4);

    let next = Floor::create(
        pool,
        user.id,
        post.id,
        FloorRequest {
            content: "随后一条".into(),
        },
    )
    .await
    .unwrap();
    assert_eq!(next.floor_number, 5);

    db.cleanup().await;
}

#[tokio::test]
async fn likes_are_idempotent() {
    let Some(db) = common::setup().await else { return };
    let pool = &db.pool;

    let author = common::create_user(pool, "l3_author", Role::User).await;
    let fan = common::create_user(pool, "l3_fan", Role::User).await;
    let post = new_post(pool, author.id).await;

    let first = forum::like(pool, fan.id, LikeTarget::Post, post.id).await.unwrap();
    assert_eq!(first, LikeOutcome::Liked { like_count: 1 });
    let second = forum::like(pool, fan.id, LikeTarget::Post, post.id).await.unwrap();
    assert_eq!(second, LikeOutcome::AlreadyLiked);
    assert_eq!(Post::find(pool, post.id).await.unwrap().unwrap().like_count, 1);

    let removed = forum::unlike(pool, fan.id, LikeTarget::Post, post.id).await.unwrap();
    assert_eq!(removed, UnlikeOutcome::Unliked { like_count: 0 });
    let again = forum::unlike(pool, fan.id, LikeTarget::Post, post.id).await.unwrap();
    assert_eq!(again, UnlikeOutcome::NotLiked);
    assert_eq!(Post::find(pool, post.id).await.unwrap().unwrap().like_count, 0);

    db.cleanup().await;
}

#[tokio::test]
async fn soft_deletes_keep_forum_counters_in_step() {
    let Some(db) = common::setup().await else { return };
    let pool = &db.pool;

    let user = common::create_user(pool, "tree_user", Role::User).await;
    let post = new_post(pool, user.id).await;
    let floor = Floor::create(
        pool,
        user.id,
        post.id,
        FloorRequest {
            content: "沙发".to_string(),
        },
    )
    .await
    .unwrap();
    let reply = Reply::create(
        pool,
        user.id,
        floor.id,
        CreateReplyRequest {
            content: "板凳".to_string(),
            quote_content: None,
            quote_author: None,
        },
    )
    .await
    .unwrap();
    assert_eq!(Floor::find(pool, floor.id).await.unwrap().reply_count, 1);

    let removed = Reply::soft_delete(pool, user.id, reply.id).await.unwrap();
    assert!(removed.counted);
    assert_eq!(Floor::find(pool, floor.id).await.unwrap().reply_count, 0);

    Floor::soft_delete(pool, user.id, floor.id).await.unwrap();
    let stored = Post::find(pool, post.id).await.unwrap().unwrap();
    assert_eq!(stored.comment_count, 0);

    // 已删除的楼层不占号，新楼层号仍然递增
    let next = Floor::create(
        pool,
        user.id,
        post.id,
        FloorRequest {
            content: "再来".to_string(),
        },
    )
    .await
    .unwrap();
    assert_eq!(next.floor_number, 2);

    let report = Post::recount(pool, post.id).await.unwrap();
    assert_eq!(report.post.comment_count, 1);

    Post::hard_delete(pool, post.id).await.unwrap();
    let floors: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM forum_floors WHERE post_id = $1")
        .bind(post.id)
        .fetch_one(pool)
        .await
        .unwrap();
    assert_eq!(floors, 0);

    db.cleanup().await;
}
