use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};

use crate::{
    authorship::{self, author_join, live_author_columns},
    error::{AppError, AppResult},
    routes::{activity::load_activity, booking::round_to},
    utils::{PageQuery, Paginated},
};

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ActivityRating {
    pub id: i64,
    pub activity_id: i64,
    pub rater_user_id: Option<i64>,
    pub rater_display: String,
    pub rater_avatar: String,
    pub score: i16,
    pub comment_content: Option<String>,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

static RATING_SELECT: LazyLock<String> = LazyLock::new(|| {
    format!(
        "SELECT r.id, r.activity_id, {}, r.score, r.comment_content, r.create_time, r.update_time \
         FROM activity_ratings r {}",
        live_author_columns("r", "rater_user_id", "rater_display", Some("rater_avatar")),
        author_join("r", "rater_user_id"),
    )
});

#[derive(Debug, Deserialize)]
pub struct CreateRatingRequest {
    pub score: i64,
    #[serde(default, alias = "comment")]
    pub comment_content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRatingRequest {
    pub score: Option<i64>,
    pub comment_content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RatingListQuery {
    pub page: Option<i64>,
    pub size: Option<i64>,
}

impl RatingListQuery {
    pub fn paging(&self) -> PageQuery {
        PageQuery {
            page: self.page,
            size: self.size,
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct MyRatingItem {
    pub id: i64,
    pub activity_id: i64,
    pub activity_title: String,
    pub activity_start_time: DateTime<Utc>,
    pub activity_end_time: DateTime<Utc>,
    pub score: i16,
    pub comment_content: Option<String>,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreBucket {
    pub score: i16,
    pub count: i64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatingStatistics {
    pub activity_id: i64,
    pub total_ratings: i64,
    pub average_score: f64,
    pub min_score: Option<i16>,
    pub max_score: Option<i16>,
    /// 从 5 星到 1 星
    pub distribution: Vec<ScoreBucket>,
}

pub fn validate_score(score: i64) -> AppResult<i16> {
    if (1..=5).contains(&score) {
        Ok(score as i16)
    } else {
        Err(AppError::bad_request("评分必须是1-5的整数"))
    }
}

fn clean_comment(comment: Option<String>) -> Option<String> {
    comment.map(|c| c.trim().to_string()).filter(|c| !c.is_empty())
}

/// 由各分值的计数推出统计结果
pub fn summarize_scores(activity_id: i64, counts: &[(i16, i64)]) -> RatingStatistics {
    let total: i64 = counts.iter().map(|(_, n)| n).sum();
    let sum: i64 = counts.iter().map(|(s, n)| *s as i64 * n).sum();
    let present = counts.iter().filter(|(_, n)| *n > 0).map(|(s, _)| *s);

    let distribution = (1..=5)
        .rev()
        .map(|score| {
            let count = counts
                .iter()
                .filter(|(s, _)| *s == score)
                .map(|(_, n)| n)
                .sum();
            ScoreBucket {
                score,
                count,
                percentage: round_to(count as f64 / total.max(1) as f64 * 100.0, 1),
            }
        })
        .collect();

    RatingStatistics {
        activity_id,
        total_ratings: total,
        average_score: if total == 0 {
            0.0
        } else {
            round_to(sum as f64 / total as f64, 2)
        },
        min_score: present.clone().min(),
        max_score: present.max(),
        distribution,
    }
}

/// 评分资格：活动存在、本人有已出席的预约、尚未评过分
async fn check_eligibility(conn: &mut PgConnection, user_id: i64, account: &str, activity_id: i64) -> AppResult<()> {
    load_activity(conn, activity_id).await?;

    let attended: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM activity_bookings \
         WHERE activity_id = $1 AND user_account = $2 AND status = 'attended')",
    )
    .bind(activity_id)
    .bind(account)
    .fetch_one(&mut *conn)
    .await?;
    if !attended {
        return Err(AppError::forbidden("您需要参与活动后才能评分"));
    }

    let rated: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM activity_ratings WHERE activity_id = $1 AND rater_user_id = $2)",
    )
    .bind(activity_id)
    .bind(user_id)
    .fetch_one(&mut *conn)
    .await?;
    if rated {
        return Err(AppError::conflict("您已经为该活动评过分"));
    }
    Ok(())
}

impl ActivityRating {
    pub async fn create(pool: &PgPool, user_id: i64, activity_id: i64, req: CreateRatingRequest) -> AppResult<Self> {
        let score = validate_score(req.score)?;

        let mut tx = pool.begin().await?;
        let (source, author) = authorship::resolve_active(&mut tx, user_id).await?;
        check_eligibility(&mut tx, user_id, &source.account, activity_id).await?;

        let rating = sqlx::query_as::<_, ActivityRating>(
            r#"
            INSERT INTO activity_ratings (activity_id, rater_user_id, rater_display, rater_avatar, score, comment_content)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, activity_id, rater_user_id, rater_display, rater_avatar, score,
                      comment_content, create_time, update_time
            "#,
        )
        .bind(activity_id)
        .bind(author.user_id)
        .bind(&author.display)
        .bind(&author.avatar)
        .bind(score)
        .bind(clean_comment(req.comment_content))
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!("用户 {} 为活动 {} 评分 {} (rating={})", source.account, activity_id, score, rating.id);
        Ok(rating)
    }

    pub async fn update(pool: &PgPool, user_id: i64, activity_id: i64, req: UpdateRatingRequest) -> AppResult<Self> {
        let score = req.score.map(validate_score).transpose()?;

        let rating = sqlx::query_as::<_, ActivityRating>(
            r#"
            UPDATE activity_ratings
            SET score = COALESCE($3, score),
                comment_content = CASE WHEN $4 THEN $5 ELSE comment_content END,
                update_time = NOW()
            WHERE activity_id = $1 AND rater_user_id = $2
            RETURNING id, activity_id, rater_user_id, rater_display, rater_avatar, score,
                      comment_content, create_time, update_time
            "#,
        )
        .bind(activity_id)
        .bind(user_id)
        .bind(score)
        .bind(req.comment_content.is_some())
        .bind(clean_comment(req.comment_content))
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("您还未为该活动评分"))?;

        tracing::info!("评分 {} 已更新", rating.id);
        Ok(rating)
    }

    pub async fn delete(pool: &PgPool, user_id: i64, activity_id: i64) -> AppResult<i64> {
        let id: i64 = sqlx::query_scalar(
            "DELETE FROM activity_ratings WHERE activity_id = $1 AND rater_user_id = $2 RETURNING id",
        )
        .bind(activity_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("您还未为该活动评分"))?;

        tracing::info!("评分 {} 已被用户 {} 删除", id, user_id);
        Ok(id)
    }

    pub async fn list_for_activity(pool: &PgPool, activity_id: i64, query: &RatingListQuery) -> AppResult<Paginated<Self>> {
        let paging = query.paging();
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM activity_ratings WHERE activity_id = $1")
            .bind(activity_id)
            .fetch_one(pool)
            .await?;

        let items = sqlx::query_as::<_, ActivityRating>(&format!(
            "{} WHERE r.activity_id = $1 ORDER BY r.create_time DESC, r.id DESC LIMIT $2 OFFSET $3",
            *RATING_SELECT
        ))
        .bind(activity_id)
        .bind(paging.size())
        .bind(paging.offset())
        .fetch_all(pool)
        .await?;

        Ok(Paginated::new(items, total, &paging))
    }

    pub async fn mine(pool: &PgPool, user_id: i64, query: &RatingListQuery) -> AppResult<Paginated<MyRatingItem>> {
        let paging = query.paging();
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM activity_ratings WHERE rater_user_id = $1")
            .bind(user_id)
            .fetch_one(pool)
            .await?;

        let items = sqlx::query_as::<_, MyRatingItem>(
            r#"
            SELECT r.id, r.activity_id, a.title AS activity_title,
                   a.start_time AS activity_start_time, a.end_time AS activity_end_time,
                   r.score, r.comment_content, r.create_time, r.update_time
            FROM activity_ratings r
            JOIN activities a ON a.id = r.activity_id
            WHERE r.rater_user_id = $1
            ORDER BY r.create_time DESC, r.id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(paging.size())
        .bind(paging.offset())
        .fetch_all(pool)
        .await?;

        Ok(Paginated::new(items, total, &paging))
    }

    /// 评分统计，直接基于评分行聚合
    pub async fn statistics(pool: &PgPool, activity_id: i64) -> AppResult<RatingStatistics> {
        let mut conn = pool.acquire().await?;
        load_activity(&mut conn, activity_id).await?;

        let counts: Vec<(i16, i64)> = sqlx::query_as(
            "SELECT score, COUNT(*) FROM activity_ratings WHERE activity_id = $1 GROUP BY score",
        )
        .bind(activity_id)
        .fetch_all(&mut *conn)
        .await?;
        Ok(summarize_scores(activity_id, &counts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_must_be_one_to_five() {
        assert_eq!(validate_score(1).unwrap(), 1);
        assert_eq!(validate_score(5).unwrap(), 5);
        assert!(matches!(validate_score(0), Err(AppError::BadRequest(_))));
        assert!(matches!(validate_score(6), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn summary_of_empty_activity() {
        let stats = summarize_scores(7, &[]);
        assert_eq!(stats.total_ratings, 0);
        assert_eq!(stats.average_score, 0.0);
        assert_eq!(stats.min_score, None);
        assert_eq!(stats.distribution.len(), 5);
        assert!(stats.distribution.iter().all(|b| b.count == 0 && b.percentage == 0.0));
    }

    #[test]
    fn summary_distribution_and_average() {
        let stats = summarize_scores(1, &[(5, 2), (4, 1), (1, 0)]);
        assert_eq!(stats.total_ratings, 3);
        assert_eq!(stats.average_score, 4.67);
        assert_eq!(stats.min_score, Some(4));
        assert_eq!(stats.max_score, Some(5));
        assert_eq!(stats.distribution[0].score, 5);
        assert_eq!(stats.distribution[0].percentage, 66.7);
        assert_eq!(stats.distribution[1].percentage, 33.3);
        assert_eq!(stats.distribution[4].count, 0);
    }

    #[test]
    fn blank_comment_is_dropped() {
        assert_eq!(clean_comment(Some("  ".into())), None);
        assert_eq!(clean_comment(Some(" 很好 ".into())), Some("很好".into()));
    }
}
