use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, post, put},
};
use config::Config;
use redis::Client as RedisClient;
use sqlx::PgPool;

use crate::middleware::{auth_middleware, log_errors};

pub mod authorship;
pub mod config;
pub mod content;
pub mod counters;
pub mod db;
pub mod error;
pub mod fields;
pub mod middleware;
pub mod routes;
pub mod utils;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub redis: Arc<RedisClient>,
}

/// 无需登录的路由
fn public_routes() -> Router<AppState> {
    use routes::{activity, discussion, forum, notice, rating, science, user};

    Router::new()
        .route("/users/register", post(user::register))
        .route("/users/login", post(user::login))
        // 活动
        .route("/public/activities", get(activity::list_activities))
        .route("/public/activities/status-flow", get(activity::activity_status_flow))
        .route("/public/activities/{id}", get(activity::activity_detail))
        .route("/public/activities/{id}/availability", get(activity::activity_availability))
        .route("/public/activities/{id}/ratings", get(rating::activity_ratings))
        .route("/public/activities/{id}/discussions", get(discussion::list_discussions))
        .route("/public/activities/{id}/discussions/search", get(discussion::search_discussions))
        .route("/public/discussions/{id}", get(discussion::discussion_detail))
        .route("/public/discussions/{id}/comments", get(discussion::list_comments))
        .route("/public/discussions/{id}/comments/nested", get(discussion::nested_comments))
        // 论坛
        .route("/public/forum/posts", get(forum::list_posts))
        .route("/public/forum/posts/{id}", get(forum::public_post_detail))
        .route("/public/forum/posts/{id}/floors", get(forum::list_floors))
        .route("/public/forum/floors/{id}", get(forum::floor_detail))
        .route("/public/forum/floors/{id}/replies", get(forum::list_replies))
        .route("/public/forum/replies/{id}", get(forum::reply_detail))
        .route("/public/forum/replies/{id}/quote", get(forum::reply_quote))
        // 公告与科普
        .route("/public/notices", get(notice::public_notices))
        .route("/public/notices/{id}", get(notice::public_notice_detail))
        .route("/public/science/articles", get(science::list_articles))
        .route("/public/science/articles/{id}", get(science::public_article_detail))
}

/// 需要登录的路由，由 `auth_middleware` 注入 `Principal`
fn protected_routes() -> Router<AppState> {
    use routes::{activity, booking, discussion, forum, notice, rating, science, user};

    Router::new()
        // 用户
        .route("/users/me", get(user::me).put(user::update_profile))
        .route("/users/me/delete", post(user::delete_account))
        .route("/admin/users", get(user::admin_list_users))
        .route("/admin/users/{id}", delete(user::admin_delete_user))
        .route("/admin/users/{id}/role", put(user::admin_set_role))
        .route("/admin/fields/{entity}", get(fields::entity_fields))
        // 活动管理
        .route(
            "/activities/admin/activities",
            get(activity::list_activities).post(activity::create_activity),
        )
        .route(
            "/activities/admin/activities/{id}",
            get(activity::activity_detail)
                .put(activity::update_activity)
                .delete(activity::delete_activity),
        )
        .route("/activities/admin/activities/{id}/status", put(activity::change_activity_status))
        .route("/activities/admin/activities/{id}/statistics", get(activity::activity_statistics))
        .route("/activities/admin/activities/{id}/bookings", get(booking::activity_bookings))
        .route("/activities/admin/activities/{id}/bookings/batch", post(booking::batch_bookings))
        .route("/activities/admin/activities/{id}/bookings/statistics", get(booking::booking_statistics))
        .route(
            "/activities/admin/activities/{id}/bookings/{booking_id}",
            put(booking::update_booking_status).delete(booking::delete_booking),
        )
        .route("/activities/admin/summary", get(activity::organizer_summary))
        // 预约
        .route("/activities/booking/activities/{id}/book", post(booking::book_activity))
        .route(
            "/activities/booking/activities/{id}/cancel",
            post(booking::cancel_booking).delete(booking::cancel_booking),
        )
        .route("/activities/booking/my-bookings", get(booking::my_bookings))
        .route("/activities/booking/bookings/{id}", get(booking::booking_detail))
        // 评分与讨论
        .route(
            "/activities/user/activities/{id}/rating",
            post(rating::create_rating)
                .put(rating::update_rating)
                .delete(rating::delete_rating),
        )
        .route("/activities/user/my-ratings", get(rating::my_ratings))
        .route("/activities/user/my-activities", get(activity::my_activities))
        .route("/activities/user/activities/{id}/discussions", post(discussion::create_discussion))
        .route(
            "/activities/user/discussions/{id}",
            put(discussion::update_discussion).delete(discussion::delete_discussion),
        )
        .route("/activities/user/discussions/{id}/comments", post(discussion::create_comment))
        .route(
            "/activities/user/comments/{id}",
            put(discussion::update_comment).delete(discussion::delete_comment),
        )
        // 论坛
        .route("/forum/posts", get(forum::list_posts).post(forum::create_post))
        .route(
            "/forum/posts/{id}",
            get(forum::post_detail)
                .put(forum::update_post)
                .delete(forum::delete_post),
        )
        .route("/forum/posts/{id}/like", post(forum::like_post).delete(forum::unlike_post))
        .route("/forum/floors/post/{post_id}", get(forum::list_floors).post(forum::create_floor))
        .route("/forum/floors/{id}", put(forum::update_floor).delete(forum::delete_floor))
        .route("/forum/floors/{id}/like", post(forum::like_floor).delete(forum::unlike_floor))
        .route("/forum/replies/floor/{floor_id}", get(forum::list_replies).post(forum::create_reply))
        .route("/forum/replies/{id}", put(forum::update_reply).delete(forum::delete_reply))
        .route("/forum/replies/{id}/like", post(forum::like_reply).delete(forum::unlike_reply))
        .route("/forum/likes/status", get(forum::like_status))
        .route("/forum/my/posts", get(forum::my_posts))
        .route("/forum/my/floors", get(forum::my_floors))
        .route("/forum/my/replies", get(forum::my_replies))
        .route("/forum/my/likes", get(forum::my_likes))
        .route("/forum/admin/posts", get(forum::admin_list_posts))
        .route("/forum/admin/posts/{id}", delete(forum::admin_delete_post))
        .route("/forum/admin/posts/{id}/status", put(forum::admin_set_post_status))
        .route("/forum/admin/posts/{id}/recount", post(forum::admin_recount_post))
        .route("/forum/admin/floors/{id}", delete(forum::admin_delete_floor))
        .route("/forum/admin/replies/{id}", delete(forum::admin_delete_reply))
        // 公告
        .route("/notice/list", get(notice::list_notices))
        .route("/notice/detail/{id}", get(notice::notice_detail))
        .route("/notice/read/all", post(notice::mark_all_read))
        .route("/notice/read/{id}", post(notice::mark_notice_read))
        .route("/notice/unread/count", get(notice::notice_unread_count))
        .route("/notice/admin/notices", get(notice::admin_list_notices).post(notice::create_notice))
        .route("/notice/admin/notices/sweep", post(notice::sweep_notices))
        .route(
            "/notice/admin/notices/{id}",
            get(notice::admin_notice_detail)
                .put(notice::update_notice)
                .delete(notice::delete_notice),
        )
        .route("/notice/admin/notices/{id}/submit", post(notice::submit_notice))
        .route("/notice/admin/notices/{id}/review", post(notice::review_notice))
        .route("/notice/admin/notices/{id}/top", post(notice::toggle_notice_top))
        .route("/notice/admin/notices/{id}/attachments", post(notice::add_notice_attachment))
        .route("/notice/admin/notices/{id}/statistics", get(notice::notice_read_statistics))
        // 科普
        .route("/science/articles", post(science::create_article))
        .route("/science/articles/my", get(science::my_articles))
        .route(
            "/science/articles/{id}",
            get(science::article_detail)
                .put(science::update_article)
                .delete(science::delete_article),
        )
        .route("/science/articles/{id}/submit", post(science::submit_article))
        .route("/science/articles/{id}/like", post(science::like_article).delete(science::unlike_article))
        .route("/science/admin/articles", get(science::admin_list_articles))
        .route("/science/admin/articles/{id}", get(science::admin_article_detail))
        .route("/science/admin/articles/{id}/review", post(science::review_article))
}

/// 组装完整路由：公开路由与受保护路由合并后挂在 `api_base_uri` 下
pub fn build_router(state: AppState) -> Router {
    let protected = protected_routes().layer(axum::middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .nest(
            &state.config.api_base_uri,
            Router::new().merge(public_routes()).merge(protected),
        )
        .layer(axum::middleware::from_fn(log_errors))
        .with_state(state)
}
