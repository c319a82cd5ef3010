//! 冗余计数维护。所有计数列只在这里改写，并且总是跟随对应行变更处于同一事务。

use serde::Serialize;
use sqlx::PgConnection;

use crate::db::text_enum;
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    PostViews,
    PostLikes,
    PostComments,
    FloorLikes,
    FloorReplies,
    ReplyLikes,
    ArticleViews,
    ArticleLikes,
}

impl Counter {
    fn table_column(&self) -> (&'static str, &'static str) {
        match self {
            Counter::PostViews => ("forum_posts", "view_count"),
            Counter::PostLikes => ("forum_posts", "like_count"),
            Counter::PostComments => ("forum_posts", "comment_count"),
            Counter::FloorLikes => ("forum_floors", "like_count"),
            Counter::FloorReplies => ("forum_floors", "reply_count"),
            Counter::ReplyLikes => ("forum_replies", "like_count"),
            Counter::ArticleViews => ("science_articles", "view_count"),
            Counter::ArticleLikes => ("science_articles", "like_count"),
        }
    }
}

/// 计数不能为负；返回新值以及是否发生了截断
pub fn clamp_counter(current: i64, delta: i64) -> (i64, bool) {
    let next = current + delta;
    if next < 0 { (0, true) } else { (next, false) }
}

pub async fn adjust(conn: &mut PgConnection, counter: Counter, id: i64, delta: i64) -> AppResult<i64> {
    let (table, column) = counter.table_column();

    let current: Option<i64> = sqlx::query_scalar(&format!(
        "SELECT {column} FROM {table} WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    let Some(current) = current else {
        return Err(AppError::not_found("计数目标不存在"));
    };

    let (next, clamped) = clamp_counter(current, delta);
    if clamped {
        tracing::warn!(
            "{}.{} (id={}) 计数将变为负数: {} + {}，已截断为 0",
            table,
            column,
            id,
            current,
            delta
        );
    }

    sqlx::query(&format!("UPDATE {table} SET {column} = $2 WHERE id = $1"))
        .bind(id)
        .bind(next)
        .execute(&mut *conn)
        .await?;

    Ok(next)
}

text_enum! {
    pub enum LikeTarget {
        Post => "post",
        Floor => "floor",
        Reply => "reply",
        Article => "article",
    }
}

impl LikeTarget {
    fn counter(&self) -> Counter {
        match self {
            LikeTarget::Post => Counter::PostLikes,
            LikeTarget::Floor => Counter::FloorLikes,
            LikeTarget::Reply => Counter::ReplyLikes,
            LikeTarget::Article => Counter::ArticleLikes,
        }
    }

    fn table(&self) -> &'static str {
        self.counter().table_column().0
    }

    fn is_forum(&self) -> bool {
        !matches!(self, LikeTarget::Article)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LikeOutcome {
    Liked { like_count: i64 },
    AlreadyLiked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlikeOutcome {
    Unliked { like_count: i64 },
    NotLiked,
}

async fn ensure_published(conn: &mut PgConnection, target: LikeTarget, target_id: i64) -> AppResult<()> {
    let exists: bool = sqlx::query_scalar(&format!(
        "SELECT EXISTS(SELECT 1 FROM {} WHERE id = $1 AND status = 'published')",
        target.table()
    ))
    .bind(target_id)
    .fetch_one(&mut *conn)
    .await?;

    if exists {
        Ok(())
    } else {
        Err(AppError::not_found("点赞对象不存在"))
    }
}

/// 重复点赞依赖唯一索引 ON CONFLICT DO NOTHING，计数只加一次
pub async fn like(
    conn: &mut PgConnection,
    user_id: i64,
    user_display: &str,
    target: LikeTarget,
    target_id: i64,
) -> AppResult<LikeOutcome> {
    ensure_published(conn, target, target_id).await?;

    let inserted: Option<i64> = if target.is_forum() {
        sqlx::query_scalar(
            r#"
            INSERT INTO forum_likes (user_id, user_display, target_type, target_id, post_id, floor_id, reply_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_id, target_type, target_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(user_display)
        .bind(target)
        .bind(target_id)
        .bind((target == LikeTarget::Post).then_some(target_id))
        .bind((target == LikeTarget::Floor).then_some(target_id))
        .bind((target == LikeTarget::Reply).then_some(target_id))
        .fetch_optional(&mut *conn)
        .await?
    } else {
        sqlx::query_scalar(
            r#"
            INSERT INTO science_article_likes (user_id, article_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id, article_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(target_id)
        .fetch_optional(&mut *conn)
        .await?
    };

    if inserted.is_none() {
        return Ok(LikeOutcome::AlreadyLiked);
    }

    let like_count = adjust(conn, target.counter(), target_id, 1).await?;
    Ok(LikeOutcome::Liked { like_count })
}

pub async fn unlike(
    conn: &mut PgConnection,
    user_id: i64,
    target: LikeTarget,
    target_id: i64,
) -> AppResult<UnlikeOutcome> {
    let removed: Option<i64> = if target.is_forum() {
        sqlx::query_scalar(
            "DELETE FROM forum_likes WHERE user_id = $1 AND target_type = $2 AND target_id = $3 RETURNING id",
        )
        .bind(user_id)
        .bind(target)
        .bind(target_id)
        .fetch_optional(&mut *conn)
        .await?
    } else {
        sqlx::query_scalar(
            "DELETE FROM science_article_likes WHERE user_id = $1 AND article_id = $2 RETURNING id",
        )
        .bind(user_id)
        .bind(target_id)
        .fetch_optional(&mut *conn)
        .await?
    };

    if removed.is_none() {
        return Ok(UnlikeOutcome::NotLiked);
    }

    let like_count = adjust(conn, target.counter(), target_id, -1).await?;
    Ok(UnlikeOutcome::Unliked { like_count })
}

pub async fn has_liked(conn: &mut PgConnection, user_id: i64, target: LikeTarget, target_id: i64) -> AppResult<bool> {
    let liked = if target.is_forum() {
        sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM forum_likes WHERE user_id = $1 AND target_type = $2 AND target_id = $3)",
        )
        .bind(user_id)
        .bind(target)
        .bind(target_id)
        .fetch_one(&mut *conn)
        .await?
    } else {
        sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM science_article_likes WHERE user_id = $1 AND article_id = $2)",
        )
        .bind(user_id)
        .bind(target_id)
        .fetch_one(&mut *conn)
        .await?
    };
    Ok(liked)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitTarget {
    Post,
    Article,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct VisitOutcome {
    pub first_visit: bool,
    pub visit_count: i64,
    pub view_count: i64,
}

/// 首次访问建记录，之后累加；帖子浏览数每次访问都加一
pub async fn on_visit(conn: &mut PgConnection, user_id: i64, target: VisitTarget, target_id: i64) -> AppResult<VisitOutcome> {
    let (sql, counter) = match target {
        VisitTarget::Post => (
            r#"
            INSERT INTO forum_visits (user_id, post_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id, post_id)
            DO UPDATE SET visit_count = forum_visits.visit_count + 1, last_visit_at = NOW()
            RETURNING visit_count
            "#,
            Counter::PostViews,
        ),
        VisitTarget::Article => (
            r#"
            INSERT INTO science_article_visits (user_id, article_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id, article_id)
            DO UPDATE SET visit_count = science_article_visits.visit_count + 1, last_visit_at = NOW()
            RETURNING visit_count
            "#,
            Counter::ArticleViews,
        ),
    };

    let visit_count: i64 = sqlx::query_scalar(sql)
        .bind(user_id)
        .bind(target_id)
        .fetch_one(&mut *conn)
        .await?;

    let view_count = adjust(conn, counter, target_id, 1).await?;

    Ok(VisitOutcome {
        first_visit: visit_count == 1,
        visit_count,
        view_count,
    })
}

/// 锁住帖子行后分配下一个楼层号；帖子不存在或未发布时返回 not_found
pub async fn next_floor_number(conn: &mut PgConnection, post_id: i64) -> AppResult<i32> {
    let status: Option<String> = sqlx::query_scalar("SELECT status FROM forum_posts WHERE id = $1 FOR UPDATE")
        .bind(post_id)
        .fetch_optional(&mut *conn)
        .await?;

    match status.as_deref() {
        Some("published") => {}
        _ => return Err(AppError::not_found("帖子不存在或已删除")),
    }

    let next: i32 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(floor_number), 0) + 1 FROM forum_floors WHERE post_id = $1",
    )
    .bind(post_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(next)
}

/// 活动当前有效预约人数，每次都从预约行重新统计
pub async fn booked_count(conn: &mut PgConnection, activity_id: i64) -> AppResult<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM activity_bookings WHERE activity_id = $1 AND status = 'booked'",
    )
    .bind(activity_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(count)
}

#[derive(Debug, Clone, Copy, Serialize, sqlx::FromRow)]
pub struct PostCounters {
    pub view_count: i64,
    pub like_count: i64,
    pub comment_count: i64,
}

/// 按行级事实重算帖子计数
pub async fn recount_post(conn: &mut PgConnection, post_id: i64) -> AppResult<PostCounters> {
    let counters = sqlx::query_as::<_, PostCounters>(
        r#"
        UPDATE forum_posts p
        SET comment_count = (SELECT COUNT(*) FROM forum_floors f WHERE f.post_id = p.id AND f.status = 'published'),
            like_count = (SELECT COUNT(*) FROM forum_likes l WHERE l.target_type = 'post' AND l.post_id = p.id),
            view_count = (SELECT COALESCE(SUM(v.visit_count), 0) FROM forum_visits v WHERE v.post_id = p.id)::BIGINT
        WHERE p.id = $1
        RETURNING view_count, like_count, comment_count
        "#,
    )
    .bind(post_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::not_found("帖子不存在"))?;
    Ok(counters)
}

#[derive(Debug, Clone, Copy, Serialize, sqlx::FromRow)]
pub struct FloorCounters {
    pub like_count: i64,
    pub reply_count: i64,
}

pub async fn recount_floor(conn: &mut PgConnection, floor_id: i64) -> AppResult<FloorCounters> {
    let counters = sqlx::query_as::<_, FloorCounters>(
        r#"
        UPDATE forum_floors f
        SET reply_count = (SELECT COUNT(*) FROM forum_replies r WHERE r.floor_id = f.id AND r.status = 'published'),
            like_count = (SELECT COUNT(*) FROM forum_likes l WHERE l.target_type = 'floor' AND l.floor_id = f.id)
        WHERE f.id = $1
        RETURNING like_count, reply_count
        "#,
    )
    .bind(floor_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::not_found("楼层不存在"))?;
    Ok(counters)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_keeps_counters_non_negative() {
        assert_eq!(clamp_counter(3, -1), (2, false));
        assert_eq!(clamp_counter(0, 1), (1, false));
        assert_eq!(clamp_counter(0, -1), (0, true));
        assert_eq!(clamp_counter(1, -5), (0, true));
    }

    #[test]
    fn like_targets_map_to_their_counters() {
        assert_eq!(LikeTarget::Post.counter(), Counter::PostLikes);
        assert_eq!(LikeTarget::Reply.table(), "forum_replies");
        assert!(!LikeTarget::Article.is_forum());
        assert_eq!(LikeTarget::Floor.as_str(), "floor");
    }

    #[test]
    fn like_outcome_serialises_as_tag() {
        let v = serde_json::to_value(LikeOutcome::AlreadyLiked).unwrap();
        assert_eq!(v, "already_liked");
        let v = serde_json::to_value(UnlikeOutcome::NotLiked).unwrap();
        assert_eq!(v, "not_liked");
    }
}
