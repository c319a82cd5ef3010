use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};

use crate::{
    authorship::{self, author_join, live_author_columns},
    content,
    counters::{self, LikeOutcome, LikeTarget, UnlikeOutcome, VisitOutcome, VisitTarget},
    db::text_enum,
    error::{AppError, AppResult},
    utils::{PageQuery, Paginated},
};

text_enum! {
    pub enum ArticleStatus {
        Draft => "draft",
        Pending => "pending",
        Published => "published",
        Rejected => "rejected",
    }
}

impl ArticleStatus {
    /// 作者自己能设置的状态，发布必须经过审核
    pub fn author_settable(&self) -> bool {
        matches!(self, ArticleStatus::Draft | ArticleStatus::Pending)
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ScienceArticle {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub cover_image: Option<String>,
    pub status: ArticleStatus,
    pub like_count: i64,
    pub view_count: i64,
    pub published_at: Option<DateTime<Utc>>,
    pub author_user_id: Option<i64>,
    pub author_display: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ArticleDetail {
    #[serde(flatten)]
    pub article: ScienceArticle,
    pub is_liked: bool,
    pub visit: Option<VisitOutcome>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ArticleListQuery {
    pub status: Option<ArticleStatus>,
    pub keyword: Option<String>,
    pub page: Option<i64>,
    pub size: Option<i64>,
}

impl ArticleListQuery {
    pub fn paging(&self) -> PageQuery {
        PageQuery {
            page: self.page,
            size: self.size,
        }
    }

    fn keyword_pattern(&self) -> Option<String> {
        self.keyword
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(|k| format!("%{}%", k))
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateArticleRequest {
    pub title: String,
    pub content: String,
    pub cover_image: Option<String>,
    pub status: Option<ArticleStatus>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateArticleRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub cover_image: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReviewArticleRequest {
    pub approve: bool,
}

static ARTICLE_SELECT: LazyLock<String> = LazyLock::new(|| {
    format!(
        "SELECT a.id, a.title, a.content, a.cover_image, a.status, a.like_count, a.view_count, a.published_at, \
                {}, a.created_at, a.updated_at \
         FROM science_articles a {}",
        live_author_columns("a", "author_user_id", "author_display", None),
        author_join("a", "author_user_id"),
    )
});

const RETURNING: &str = "RETURNING id, title, content, cover_image, status, like_count, view_count, published_at, \
     author_user_id, author_display, created_at, updated_at";

fn clean_cover(cover: Option<String>) -> Option<String> {
    cover.map(|c| c.trim().to_string()).filter(|c| !c.is_empty())
}

async fn lock_article(conn: &mut PgConnection, id: i64) -> AppResult<ScienceArticle> {
    sqlx::query_as::<_, ScienceArticle>(
        "SELECT id, title, content, cover_image, status, like_count, view_count, published_at, \
                author_user_id, author_display, created_at, updated_at \
         FROM science_articles WHERE id = $1 FOR UPDATE",
    )
    .bind(id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| AppError::not_found("文章不存在"))
}

fn ensure_author(article: &ScienceArticle, user_id: i64) -> AppResult<()> {
    if article.author_user_id == Some(user_id) {
        Ok(())
    } else {
        Err(AppError::forbidden("只能操作自己的文章"))
    }
}

impl ScienceArticle {
    /// 普通用户只能建草稿或直接提交审核；管理员可以直接发布
    pub async fn create(pool: &PgPool, user_id: i64, is_admin: bool, req: CreateArticleRequest) -> AppResult<Self> {
        content::validate_title(&req.title)?;
        content::validate_body(&req.content)?;
        let status = req.status.unwrap_or(ArticleStatus::Draft);
        if status == ArticleStatus::Rejected || (!is_admin && !status.author_settable()) {
            return Err(AppError::bad_request("文章状态只能是草稿或待审核"));
        }

        let mut tx = pool.begin().await?;
        let (_, author) = authorship::resolve_active(&mut tx, user_id).await?;
        let article = sqlx::query_as::<_, Self>(&format!(
            "INSERT INTO science_articles (title, content, cover_image, status, published_at, author_user_id, author_display) \
             VALUES ($1, $2, $3, $4, CASE WHEN $4 = 'published' THEN NOW() END, $5, $6) {RETURNING}"
        ))
        .bind(req.title.trim())
        .bind(req.content.trim())
        .bind(clean_cover(req.cover_image))
        .bind(status)
        .bind(author.user_id)
        .bind(&author.display)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::info!("用户 {} 创建科普文章 {} ({})", user_id, article.id, article.status);
        Ok(article)
    }

    /// 编辑自己的文章；已发布或被驳回的文章修改后回到待审核
    pub async fn update(pool: &PgPool, user_id: i64, id: i64, req: UpdateArticleRequest) -> AppResult<Self> {
        if let Some(title) = &req.title {
            content::validate_title(title)?;
        }
        if let Some(body) = &req.content {
            content::validate_body(body)?;
        }

        let mut tx = pool.begin().await?;
        let current = lock_article(&mut tx, id).await?;
        ensure_author(&current, user_id)?;
        let next_status = match current.status {
            ArticleStatus::Published | ArticleStatus::Rejected => ArticleStatus::Pending,
            other => other,
        };

        let article = sqlx::query_as::<_, Self>(&format!(
            "UPDATE science_articles SET title = COALESCE($2, title), content = COALESCE($3, content), \
                 cover_image = COALESCE($4, cover_image), status = $5, updated_at = NOW() \
             WHERE id = $1 {RETURNING}"
        ))
        .bind(id)
        .bind(req.title.as_deref().map(str::trim))
        .bind(req.content.as_deref().map(str::trim))
        .bind(clean_cover(req.cover_image))
        .bind(next_status)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(article)
    }

    /// 草稿或被驳回的文章提交审核
    pub async fn submit(pool: &PgPool, user_id: i64, id: i64) -> AppResult<Self> {
        let mut tx = pool.begin().await?;
        let current = lock_article(&mut tx, id).await?;
        ensure_author(&current, user_id)?;
        if !matches!(current.status, ArticleStatus::Draft | ArticleStatus::Rejected) {
            return Err(AppError::bad_request("只有草稿或被驳回的文章可以提交审核"));
        }

        let article = sqlx::query_as::<_, Self>(&format!(
            "UPDATE science_articles SET status = 'pending', updated_at = NOW() WHERE id = $1 {RETURNING}"
        ))
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(article)
    }

    /// 作者或管理员删除，点赞和访问记录随外键级联
    pub async fn delete(pool: &PgPool, user_id: i64, is_admin: bool, id: i64) -> AppResult<i64> {
        let mut tx = pool.begin().await?;
        let current = lock_article(&mut tx, id).await?;
        if !is_admin {
            ensure_author(&current, user_id)?;
        }
        sqlx::query("DELETE FROM science_articles WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!("科普文章 {} 已被用户 {} 删除", id, user_id);
        Ok(id)
    }

    pub async fn review(pool: &PgPool, reviewer_id: i64, id: i64, approve: bool) -> AppResult<Self> {
        let mut tx = pool.begin().await?;
        let current = lock_article(&mut tx, id).await?;
        if current.status != ArticleStatus::Pending {
            return Err(AppError::bad_request("只有待审核的文章可以审核"));
        }

        let article = sqlx::query_as::<_, Self>(&format!(
            "UPDATE science_articles SET status = $2, \
                 published_at = CASE WHEN $2 = 'published' THEN NOW() ELSE published_at END, updated_at = NOW() \
             WHERE id = $1 {RETURNING}"
        ))
        .bind(id)
        .bind(if approve {
            ArticleStatus::Published
        } else {
            ArticleStatus::Rejected
        })
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::info!("科普文章 {} 审核为 {}，审核人 {}", id, article.status, reviewer_id);
        Ok(article)
    }

    async fn page(
        pool: &PgPool,
        status: Option<ArticleStatus>,
        author: Option<i64>,
        query: &ArticleListQuery,
    ) -> AppResult<Paginated<Self>> {
        let paging = query.paging();
        let keyword = query.keyword_pattern();
        let filter = "($1::TEXT IS NULL OR a.status = $1) AND ($2::BIGINT IS NULL OR a.author_user_id = $2) \
             AND ($3::TEXT IS NULL OR a.title LIKE $3 OR a.content LIKE $3)";

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM science_articles a WHERE {filter}"))
            .bind(status)
            .bind(author)
            .bind(&keyword)
            .fetch_one(pool)
            .await?;

        let items = sqlx::query_as::<_, Self>(&format!(
            "{} WHERE {filter} ORDER BY COALESCE(a.published_at, a.created_at) DESC, a.id DESC LIMIT $4 OFFSET $5",
            *ARTICLE_SELECT
        ))
        .bind(status)
        .bind(author)
        .bind(&keyword)
        .bind(paging.size())
        .bind(paging.offset())
        .fetch_all(pool)
        .await?;

        Ok(Paginated::new(items, total, &paging))
    }

    pub async fn list_published(pool: &PgPool, query: &ArticleListQuery) -> AppResult<Paginated<Self>> {
        Self::page(pool, Some(ArticleStatus::Published), None, query).await
    }

    pub async fn mine(pool: &PgPool, user_id: i64, query: &ArticleListQuery) -> AppResult<Paginated<Self>> {
        Self::page(pool, query.status, Some(user_id), query).await
    }

    pub async fn admin_list(pool: &PgPool, query: &ArticleListQuery) -> AppResult<Paginated<Self>> {
        Self::page(pool, query.status, None, query).await
    }

    pub async fn find(pool: &PgPool, id: i64) -> AppResult<Self> {
        sqlx::query_as::<_, Self>(&format!("{} WHERE a.id = $1", *ARTICLE_SELECT))
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| AppError::not_found("文章不存在"))
    }

    pub async fn find_published(pool: &PgPool, id: i64) -> AppResult<Self> {
        let article = Self::find(pool, id).await?;
        if article.status != ArticleStatus::Published {
            return Err(AppError::forbidden("文章不可访问"));
        }
        Ok(article)
    }

    /// 登录用户查看详情：记一次访问并返回点赞状态
    pub async fn view(pool: &PgPool, user_id: i64, id: i64) -> AppResult<ArticleDetail> {
        Self::find_published(pool, id).await?;

        let mut tx = pool.begin().await?;
        let visit = counters::on_visit(&mut tx, user_id, VisitTarget::Article, id).await?;
        let is_liked = counters::has_liked(&mut tx, user_id, LikeTarget::Article, id).await?;
        tx.commit().await?;

        let article = Self::find(pool, id).await?;
        Ok(ArticleDetail {
            article,
            is_liked,
            visit: Some(visit),
        })
    }

    pub async fn like(pool: &PgPool, user_id: i64, id: i64) -> AppResult<LikeOutcome> {
        let mut tx = pool.begin().await?;
        let (_, author) = authorship::resolve_active(&mut tx, user_id).await?;
        let outcome = counters::like(&mut tx, user_id, &author.display, LikeTarget::Article, id).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    pub async fn unlike(pool: &PgPool, user_id: i64, id: i64) -> AppResult<UnlikeOutcome> {
        let mut tx = pool.begin().await?;
        let outcome = counters::unlike(&mut tx, user_id, LikeTarget::Article, id).await?;
        tx.commit().await?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authors_cannot_publish_directly() {
        assert!(ArticleStatus::Draft.author_settable());
        assert!(ArticleStatus::Pending.author_settable());
        assert!(!ArticleStatus::Published.author_settable());
        assert!(!ArticleStatus::Rejected.author_settable());
    }

    #[test]
    fn blank_cover_is_dropped() {
        assert_eq!(clean_cover(Some("  ".into())), None);
        assert_eq!(clean_cover(Some(" /a.png ".into())), Some("/a.png".into()));
    }

    #[test]
    fn keyword_pattern_ignores_blank() {
        let query = ArticleListQuery {
            keyword: Some("  ".into()),
            ..Default::default()
        };
        assert_eq!(query.keyword_pattern(), None);
        let query = ArticleListQuery {
            keyword: Some("疫苗".into()),
            ..Default::default()
        };
        assert_eq!(query.keyword_pattern().as_deref(), Some("%疫苗%"));
    }
}
