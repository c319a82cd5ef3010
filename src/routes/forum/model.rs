use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};

use crate::{
    authorship::{self, author_join, live_author_columns},
    content,
    counters::{self, Counter, FloorCounters, LikeOutcome, LikeTarget, PostCounters, UnlikeOutcome, VisitOutcome, VisitTarget},
    db::text_enum,
    error::{AppError, AppResult},
    utils::{PageQuery, Paginated},
};

const MAX_REPLY_LEN: usize = 2000;
const MAX_QUOTE_LEN: usize = 500;
const LATEST_REPLIES_PER_FLOOR: i64 = 3;
const DEFAULT_CATEGORY: &str = "general";

text_enum! {
    pub enum PostStatus {
        Published => "published",
        Draft => "draft",
        Deleted => "deleted",
    }
}

text_enum! {
    /// 楼层与回复的状态
    pub enum EntryStatus {
        Published => "published",
        Deleted => "deleted",
    }
}

text_enum! {
    pub enum PostSort {
        Latest => "latest",
        Hottest => "hottest",
        MostViewed => "most_viewed",
        MostLiked => "most_liked",
    }
}

impl PostSort {
    fn order_by(&self) -> &'static str {
        match self {
            PostSort::Latest => "p.created_at DESC, p.id DESC",
            PostSort::Hottest => {
                "(p.like_count + p.comment_count + p.view_count / 10.0) DESC, p.created_at DESC, p.id DESC"
            }
            PostSort::MostViewed => "p.view_count DESC, p.created_at DESC, p.id DESC",
            PostSort::MostLiked => "p.like_count DESC, p.created_at DESC, p.id DESC",
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Post {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub category: String,
    pub view_count: i64,
    pub like_count: i64,
    pub comment_count: i64,
    pub status: PostStatus,
    pub author_user_id: Option<i64>,
    pub author_display: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Floor {
    pub id: i64,
    pub post_id: i64,
    pub author_user_id: Option<i64>,
    pub author_display: String,
    pub content: String,
    pub floor_number: i32,
    pub like_count: i64,
    pub reply_count: i64,
    pub status: EntryStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Reply {
    pub id: i64,
    pub floor_id: i64,
    pub author_user_id: Option<i64>,
    pub author_display: String,
    pub content: String,
    pub quote_content: Option<String>,
    pub quote_author: Option<String>,
    pub like_count: i64,
    pub status: EntryStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct PostDetail {
    #[serde(flatten)]
    pub post: Post,
    pub is_liked: bool,
    pub visit: Option<VisitOutcome>,
}

#[derive(Debug, Serialize)]
pub struct FloorView {
    #[serde(flatten)]
    pub floor: Floor,
    pub floor_label: String,
    pub latest_replies: Vec<Reply>,
}

#[derive(Debug, Serialize)]
pub struct QuoteInfo {
    pub reply: Reply,
    pub floor_id: i64,
    pub floor_number: i32,
    pub floor_author_display: String,
    pub post_id: i64,
    pub post_title: String,
}

#[derive(Debug, Serialize)]
pub struct EntryDeleted {
    pub id: i64,
    /// 删除前处于已发布状态，父级计数因此减一
    pub counted: bool,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct MyLike {
    pub id: i64,
    pub target_type: LikeTarget,
    pub target_id: i64,
    pub post_id: Option<i64>,
    pub post_title: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct RecountReport {
    pub post_id: i64,
    pub post: PostCounters,
    pub floors: Vec<(i64, FloorCounters)>,
}

#[derive(Debug, Serialize)]
pub struct LikeStatus {
    pub target_type: LikeTarget,
    pub target_id: i64,
    pub liked: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct PostListQuery {
    pub category: Option<String>,
    pub status: Option<PostStatus>,
    pub keyword: Option<String>,
    pub author_user_id: Option<i64>,
    pub sort_by: Option<PostSort>,
    pub page: Option<i64>,
    pub size: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ForumPageQuery {
    pub page: Option<i64>,
    pub size: Option<i64>,
}

impl ForumPageQuery {
    pub fn paging(&self) -> PageQuery {
        PageQuery {
            page: self.page,
            size: self.size,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LikeStatusQuery {
    pub target_type: LikeTarget,
    pub target_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreatePostRequest {
    pub title: String,
    pub content: String,
    pub category: Option<String>,
    pub status: Option<PostStatus>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePostRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PostStatusRequest {
    pub status: PostStatus,
}

#[derive(Debug, Deserialize)]
pub struct FloorRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateReplyRequest {
    pub content: String,
    pub quote_content: Option<String>,
    pub quote_author: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateReplyRequest {
    pub content: String,
}

const POST_COLUMNS: &str = "id, title, content, category, view_count, like_count, comment_count, status, \
     author_user_id, author_display, created_at, updated_at";
const FLOOR_COLUMNS: &str = "id, post_id, author_user_id, author_display, content, floor_number, like_count, \
     reply_count, status, created_at, updated_at";
const REPLY_COLUMNS: &str = "id, floor_id, author_user_id, author_display, content, quote_content, quote_author, \
     like_count, status, created_at, updated_at";

static POST_SELECT: LazyLock<String> = LazyLock::new(|| {
    format!(
        "SELECT p.id, p.title, p.content, p.category, p.view_count, p.like_count, p.comment_count, p.status, \
                {}, p.created_at, p.updated_at \
         FROM forum_posts p {}",
        live_author_columns("p", "author_user_id", "author_display", None),
        author_join("p", "author_user_id"),
    )
});

static FLOOR_SELECT: LazyLock<String> = LazyLock::new(|| {
    format!(
        "SELECT f.id, f.post_id, {}, f.content, f.floor_number, f.like_count, f.reply_count, f.status, \
                f.created_at, f.updated_at \
         FROM forum_floors f {}",
        live_author_columns("f", "author_user_id", "author_display", None),
        author_join("f", "author_user_id"),
    )
});

static REPLY_SELECT: LazyLock<String> = LazyLock::new(|| {
    format!(
        "SELECT r.id, r.floor_id, {}, r.content, r.quote_content, r.quote_author, r.like_count, r.status, \
                r.created_at, r.updated_at \
         FROM forum_replies r {}",
        live_author_columns("r", "author_user_id", "author_display", None),
        author_join("r", "author_user_id"),
    )
});

/// 每个楼层最近的若干条已发布回复
static RECENT_REPLIES_SQL: LazyLock<String> = LazyLock::new(|| {
    format!(
        "SELECT {REPLY_COLUMNS} FROM ( \
             SELECT r.id, r.floor_id, {}, r.content, r.quote_content, r.quote_author, r.like_count, r.status, \
                    r.created_at, r.updated_at, \
                    ROW_NUMBER() OVER (PARTITION BY r.floor_id ORDER BY r.created_at DESC, r.id DESC) AS rn \
             FROM forum_replies r {} \
             WHERE r.floor_id = ANY($1) AND r.status = 'published' \
         ) ranked \
         WHERE rn <= $2 \
         ORDER BY floor_id, created_at DESC, id DESC",
        live_author_columns("r", "author_user_id", "author_display", None),
        author_join("r", "author_user_id"),
    )
});

pub fn floor_label(floor_number: i32) -> String {
    format!("#{}楼", floor_number)
}

fn clean_category(category: Option<&str>) -> String {
    category
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(DEFAULT_CATEGORY)
        .to_string()
}

/// 引用内容不拒绝，只做敏感词屏蔽
fn clean_quote(quote: Option<String>) -> AppResult<Option<String>> {
    let Some(quote) = quote.map(|q| q.trim().to_string()).filter(|q| !q.is_empty()) else {
        return Ok(None);
    };
    if quote.chars().count() > MAX_QUOTE_LEN {
        return Err(AppError::bad_request(format!("引用内容不能超过{}个字符", MAX_QUOTE_LEN)));
    }
    Ok(Some(content::mask_sensitive_words(&quote)))
}

async fn lock_post(conn: &mut PgConnection, id: i64) -> AppResult<Post> {
    sqlx::query_as::<_, Post>(&format!("SELECT {POST_COLUMNS} FROM forum_posts WHERE id = $1 FOR UPDATE"))
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| AppError::not_found("帖子不存在"))
}

async fn lock_floor(conn: &mut PgConnection, id: i64) -> AppResult<Floor> {
    sqlx::query_as::<_, Floor>(&format!("SELECT {FLOOR_COLUMNS} FROM forum_floors WHERE id = $1 FOR UPDATE"))
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| AppError::not_found("楼层不存在"))
}

async fn lock_reply(conn: &mut PgConnection, id: i64) -> AppResult<Reply> {
    sqlx::query_as::<_, Reply>(&format!("SELECT {REPLY_COLUMNS} FROM forum_replies WHERE id = $1 FOR UPDATE"))
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| AppError::not_found("回复不存在"))
}

fn ensure_author(author_user_id: Option<i64>, user_id: i64, what: &str) -> AppResult<()> {
    if author_user_id == Some(user_id) {
        Ok(())
    } else {
        Err(AppError::forbidden(format!("无权操作此{}", what)))
    }
}

impl Post {
    pub async fn create(pool: &PgPool, user_id: i64, req: CreatePostRequest) -> AppResult<Self> {
        content::validate_title(&req.title)?;
        content::validate_body(&req.content)?;
        let status = req.status.unwrap_or(PostStatus::Published);
        if status == PostStatus::Deleted {
            return Err(AppError::bad_request("新帖子只能是已发布或草稿状态"));
        }

        let mut tx = pool.begin().await?;
        let (_, author) = authorship::resolve_active(&mut tx, user_id).await?;
        let post = sqlx::query_as::<_, Post>(&format!(
            "INSERT INTO forum_posts (title, content, category, status, author_user_id, author_display) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {POST_COLUMNS}"
        ))
        .bind(req.title.trim())
        .bind(req.content.trim())
        .bind(clean_category(req.category.as_deref()))
        .bind(status)
        .bind(author.user_id)
        .bind(&author.display)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::info!("用户 {} 发布帖子 {}", user_id, post.id);
        Ok(post)
    }

    /// 帖子列表；`include_all` 为假时只看已发布的帖子
    pub async fn list(pool: &PgPool, query: &PostListQuery, include_all: bool) -> AppResult<Paginated<Self>> {
        let paging = PageQuery {
            page: query.page,
            size: query.size,
        };
        let status = if include_all { query.status } else { Some(PostStatus::Published) };
        let keyword = query
            .keyword
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(|k| format!("%{}%", k));
        let category = query.category.as_deref().map(str::trim).filter(|c| !c.is_empty());
        let sort = query.sort_by.unwrap_or(PostSort::Latest);

        let filter = "($1::TEXT IS NULL OR p.status = $1) \
             AND ($2::TEXT IS NULL OR p.category = $2) \
             AND ($3::TEXT IS NULL OR p.title LIKE $3 OR p.content LIKE $3) \
             AND ($4::BIGINT IS NULL OR p.author_user_id = $4)";

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM forum_posts p WHERE {filter}"))
            .bind(status)
            .bind(category)
            .bind(&keyword)
            .bind(query.author_user_id)
            .fetch_one(pool)
            .await?;

        let items = sqlx::query_as::<_, Post>(&format!(
            "{} WHERE {filter} ORDER BY {} LIMIT $5 OFFSET $6",
            *POST_SELECT,
            sort.order_by()
        ))
        .bind(status)
        .bind(category)
        .bind(&keyword)
        .bind(query.author_user_id)
        .bind(paging.size())
        .bind(paging.offset())
        .fetch_all(pool)
        .await?;

        Ok(Paginated::new(items, total, &paging))
    }

    pub async fn find(pool: &PgPool, id: i64) -> AppResult<Option<Self>> {
        let post = sqlx::query_as::<_, Post>(&format!("{} WHERE p.id = $1", *POST_SELECT))
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(post)
    }

    pub async fn find_published(pool: &PgPool, id: i64) -> AppResult<Self> {
        match Self::find(pool, id).await? {
            Some(post) if post.status == PostStatus::Published => Ok(post),
            _ => Err(AppError::not_found("帖子不存在")),
        }
    }

    /// 登录用户查看帖子：记录访问并累加浏览数
    pub async fn view(pool: &PgPool, user_id: i64, id: i64) -> AppResult<PostDetail> {
        let mut tx = pool.begin().await?;
        let published: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM forum_posts WHERE id = $1 AND status = 'published')")
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
        if !published {
            return Err(AppError::not_found("帖子不存在"));
        }
        let visit = counters::on_visit(&mut tx, user_id, VisitTarget::Post, id).await?;
        let is_liked = counters::has_liked(&mut tx, user_id, LikeTarget::Post, id).await?;
        tx.commit().await?;

        let post = Self::find_published(pool, id).await?;
        Ok(PostDetail {
            post,
            is_liked,
            visit: Some(visit),
        })
    }

    pub async fn update(pool: &PgPool, user_id: i64, id: i64, req: UpdatePostRequest) -> AppResult<Self> {
        let mut tx = pool.begin().await?;
        let current = lock_post(&mut tx, id).await?;
        ensure_author(current.author_user_id, user_id, "帖子")?;
        if current.status == PostStatus::Deleted {
            return Err(AppError::not_found("帖子不存在"));
        }

        let title = match req.title {
            Some(title) => {
                content::validate_title(&title)?;
                title.trim().to_string()
            }
            None => current.title,
        };
        let body = match req.content {
            Some(body) => {
                content::validate_body(&body)?;
                body.trim().to_string()
            }
            None => current.content,
        };
        let category = match req.category {
            Some(category) => clean_category(Some(&category)),
            None => current.category,
        };

        let post = sqlx::query_as::<_, Post>(&format!(
            "UPDATE forum_posts SET title = $2, content = $3, category = $4, updated_at = NOW() \
             WHERE id = $1 RETURNING {POST_COLUMNS}"
        ))
        .bind(id)
        .bind(&title)
        .bind(&body)
        .bind(&category)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(post)
    }

    /// 作者删除帖子只是标记为 deleted
    pub async fn soft_delete(pool: &PgPool, user_id: i64, id: i64) -> AppResult<EntryDeleted> {
        let mut tx = pool.begin().await?;
        let current = lock_post(&mut tx, id).await?;
        ensure_author(current.author_user_id, user_id, "帖子")?;
        if current.status == PostStatus::Deleted {
            return Err(AppError::not_found("帖子不存在"));
        }

        sqlx::query("UPDATE forum_posts SET status = 'deleted', updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!("帖子 {} 已被作者 {} 删除", id, user_id);
        Ok(EntryDeleted {
            id,
            counted: current.status == PostStatus::Published,
        })
    }

    pub async fn set_status(pool: &PgPool, id: i64, status: PostStatus) -> AppResult<Self> {
        let post = sqlx::query_as::<_, Post>(&format!(
            "UPDATE forum_posts SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING {POST_COLUMNS}"
        ))
        .bind(id)
        .bind(status)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("帖子不存在"))?;
        tracing::info!("帖子 {} 状态改为 {}", id, status);
        Ok(post)
    }

    /// 管理员物理删除，楼层、回复、点赞和访问记录由外键级联删除
    pub async fn hard_delete(pool: &PgPool, id: i64) -> AppResult<EntryDeleted> {
        let status: PostStatus = sqlx::query_scalar("DELETE FROM forum_posts WHERE id = $1 RETURNING status")
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| AppError::not_found("帖子不存在"))?;
        tracing::info!("帖子 {} 已被管理员物理删除", id);
        Ok(EntryDeleted {
            id,
            counted: status == PostStatus::Published,
        })
    }

    pub async fn recount(pool: &PgPool, id: i64) -> AppResult<RecountReport> {
        let mut tx = pool.begin().await?;
        lock_post(&mut tx, id).await?;

        let floor_ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM forum_floors WHERE post_id = $1 ORDER BY floor_number")
            .bind(id)
            .fetch_all(&mut *tx)
            .await?;
        let mut floors = Vec::with_capacity(floor_ids.len());
        for floor_id in floor_ids {
            floors.push((floor_id, counters::recount_floor(&mut tx, floor_id).await?));
        }
        let post = counters::recount_post(&mut tx, id).await?;
        tx.commit().await?;

        tracing::info!("帖子 {} 计数已重算: {:?}", id, post);
        Ok(RecountReport {
            post_id: id,
            post,
            floors,
        })
    }

    pub async fn mine(pool: &PgPool, user_id: i64, query: &ForumPageQuery) -> AppResult<Paginated<Self>> {
        let paging = query.paging();
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM forum_posts WHERE author_user_id = $1 AND status <> 'deleted'",
        )
        .bind(user_id)
        .fetch_one(pool)
        .await?;

        let items = sqlx::query_as::<_, Post>(&format!(
            "{} WHERE p.author_user_id = $1 AND p.status <> 'deleted' \
             ORDER BY p.created_at DESC, p.id DESC LIMIT $2 OFFSET $3",
            *POST_SELECT
        ))
        .bind(user_id)
        .bind(paging.size())
        .bind(paging.offset())
        .fetch_all(pool)
        .await?;

        Ok(Paginated::new(items, total, &paging))
    }
}

impl Floor {
    /// 楼层号在帖子行锁内取 MAX+1，唯一索引兜底
    pub async fn create(pool: &PgPool, user_id: i64, post_id: i64, req: FloorRequest) -> AppResult<Self> {
        content::validate_body(&req.content)?;

        let mut tx = pool.begin().await?;
        let floor_number = counters::next_floor_number(&mut tx, post_id).await?;
        let (_, author) = authorship::resolve_active(&mut tx, user_id).await?;

        let floor = sqlx::query_as::<_, Floor>(&format!(
            "INSERT INTO forum_floors (post_id, author_user_id, author_display, content, floor_number) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {FLOOR_COLUMNS}"
        ))
        .bind(post_id)
        .bind(author.user_id)
        .bind(&author.display)
        .bind(req.content.trim())
        .bind(floor_number)
        .fetch_one(&mut *tx)
        .await?;
        counters::adjust(&mut tx, Counter::PostComments, post_id, 1).await?;
        tx.commit().await?;

        tracing::info!("帖子 {} 新增楼层 {}（{}）", post_id, floor.id, floor_label(floor_number));
        Ok(floor)
    }

    pub async fn find(pool: &PgPool, id: i64) -> AppResult<Self> {
        sqlx::query_as::<_, Floor>(&format!("{} WHERE f.id = $1 AND f.status = 'published'", *FLOOR_SELECT))
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| AppError::not_found("楼层不存在"))
    }

    /// 已发布楼层按楼层号排序，每层带最近三条回复
    pub async fn list_for_post(pool: &PgPool, post_id: i64, query: &ForumPageQuery) -> AppResult<Paginated<FloorView>> {
        let paging = query.paging();
        Post::find_published(pool, post_id).await?;

        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM forum_floors WHERE post_id = $1 AND status = 'published'")
                .bind(post_id)
                .fetch_one(pool)
                .await?;

        let floors = sqlx::query_as::<_, Floor>(&format!(
            "{} WHERE f.post_id = $1 AND f.status = 'published' ORDER BY f.floor_number ASC LIMIT $2 OFFSET $3",
            *FLOOR_SELECT
        ))
        .bind(post_id)
        .bind(paging.size())
        .bind(paging.offset())
        .fetch_all(pool)
        .await?;

        let floor_ids: Vec<i64> = floors.iter().map(|f| f.id).collect();
        let recent = sqlx::query_as::<_, Reply>(RECENT_REPLIES_SQL.as_str())
            .bind(&floor_ids)
            .bind(LATEST_REPLIES_PER_FLOOR)
            .fetch_all(pool)
            .await?;

        let mut by_floor: HashMap<i64, Vec<Reply>> = HashMap::new();
        for reply in recent {
            by_floor.entry(reply.floor_id).or_default().push(reply);
        }

        let items = floors
            .into_iter()
            .map(|floor| FloorView {
                floor_label: floor_label(floor.floor_number),
                latest_replies: by_floor.remove(&floor.id).unwrap_or_default(),
                floor,
            })
            .collect();

        Ok(Paginated::new(items, total, &paging))
    }

    pub async fn update(pool: &PgPool, user_id: i64, id: i64, req: FloorRequest) -> AppResult<Self> {
        content::validate_body(&req.content)?;

        let mut tx = pool.begin().await?;
        let current = lock_floor(&mut tx, id).await?;
        ensure_author(current.author_user_id, user_id, "楼层")?;
        if current.status != EntryStatus::Published {
            return Err(AppError::not_found("楼层不存在"));
        }

        let floor = sqlx::query_as::<_, Floor>(&format!(
            "UPDATE forum_floors SET content = $2, updated_at = NOW() WHERE id = $1 RETURNING {FLOOR_COLUMNS}"
        ))
        .bind(id)
        .bind(req.content.trim())
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(floor)
    }

    /// 软删除楼层；只有原先已发布才扣减帖子的评论数
    pub async fn soft_delete(pool: &PgPool, user_id: i64, id: i64) -> AppResult<EntryDeleted> {
        let mut tx = pool.begin().await?;
        let current = lock_floor(&mut tx, id).await?;
        ensure_author(current.author_user_id, user_id, "楼层")?;

        let counted = current.status == EntryStatus::Published;
        if counted {
            sqlx::query("UPDATE forum_floors SET status = 'deleted', updated_at = NOW() WHERE id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            counters::adjust(&mut tx, Counter::PostComments, current.post_id, -1).await?;
        }
        tx.commit().await?;

        tracing::info!("楼层 {} 已被作者删除 (计数扣减: {})", id, counted);
        Ok(EntryDeleted { id, counted })
    }

    pub async fn hard_delete(pool: &PgPool, id: i64) -> AppResult<EntryDeleted> {
        let mut tx = pool.begin().await?;
        let current = lock_floor(&mut tx, id).await?;
        let counted = current.status == EntryStatus::Published;
        if counted {
            counters::adjust(&mut tx, Counter::PostComments, current.post_id, -1).await?;
        }
        sqlx::query("DELETE FROM forum_floors WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!("楼层 {} 已被管理员物理删除", id);
        Ok(EntryDeleted { id, counted })
    }

    pub async fn mine(pool: &PgPool, user_id: i64, query: &ForumPageQuery) -> AppResult<Paginated<Self>> {
        let paging = query.paging();
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM forum_floors WHERE author_user_id = $1 AND status = 'published'",
        )
        .bind(user_id)
        .fetch_one(pool)
        .await?;

        let items = sqlx::query_as::<_, Floor>(&format!(
            "{} WHERE f.author_user_id = $1 AND f.status = 'published' \
             ORDER BY f.created_at DESC, f.id DESC LIMIT $2 OFFSET $3",
            *FLOOR_SELECT
        ))
        .bind(user_id)
        .bind(paging.size())
        .bind(paging.offset())
        .fetch_all(pool)
        .await?;

        Ok(Paginated::new(items, total, &paging))
    }
}

impl Reply {
    pub async fn create(pool: &PgPool, user_id: i64, floor_id: i64, req: CreateReplyRequest) -> AppResult<Self> {
        content::validate_content(&req.content, 1, MAX_REPLY_LEN)?;
        let quote_content = clean_quote(req.quote_content)?;
        let quote_author = req.quote_author.map(|a| a.trim().to_string()).filter(|a| !a.is_empty());

        let mut tx = pool.begin().await?;
        let floor = lock_floor(&mut tx, floor_id).await?;
        if floor.status != EntryStatus::Published {
            return Err(AppError::bad_request("只能回复已发布的楼层"));
        }
        let (_, author) = authorship::resolve_active(&mut tx, user_id).await?;

        let reply = sqlx::query_as::<_, Reply>(&format!(
            "INSERT INTO forum_replies (floor_id, author_user_id, author_display, content, quote_content, quote_author) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {REPLY_COLUMNS}"
        ))
        .bind(floor_id)
        .bind(author.user_id)
        .bind(&author.display)
        .bind(req.content.trim())
        .bind(&quote_content)
        .bind(&quote_author)
        .fetch_one(&mut *tx)
        .await?;
        counters::adjust(&mut tx, Counter::FloorReplies, floor_id, 1).await?;
        tx.commit().await?;

        tracing::info!("楼层 {} 新增回复 {}", floor_id, reply.id);
        Ok(reply)
    }

    pub async fn list_for_floor(pool: &PgPool, floor_id: i64, query: &ForumPageQuery) -> AppResult<Paginated<Self>> {
        let paging = query.paging();
        Floor::find(pool, floor_id).await?;

        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM forum_replies WHERE floor_id = $1 AND status = 'published'")
                .bind(floor_id)
                .fetch_one(pool)
                .await?;

        let items = sqlx::query_as::<_, Reply>(&format!(
            "{} WHERE r.floor_id = $1 AND r.status = 'published' ORDER BY r.created_at ASC, r.id ASC LIMIT $2 OFFSET $3",
            *REPLY_SELECT
        ))
        .bind(floor_id)
        .bind(paging.size())
        .bind(paging.offset())
        .fetch_all(pool)
        .await?;

        Ok(Paginated::new(items, total, &paging))
    }

    pub async fn find(pool: &PgPool, id: i64) -> AppResult<Self> {
        sqlx::query_as::<_, Reply>(&format!("{} WHERE r.id = $1 AND r.status = 'published'", *REPLY_SELECT))
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| AppError::not_found("回复不存在"))
    }

    pub async fn quote_info(pool: &PgPool, id: i64) -> AppResult<QuoteInfo> {
        let reply = Self::find(pool, id).await?;
        let floor = Floor::find(pool, reply.floor_id).await?;
        let post_title: String = sqlx::query_scalar("SELECT title FROM forum_posts WHERE id = $1")
            .bind(floor.post_id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| AppError::not_found("帖子不存在"))?;

        Ok(QuoteInfo {
            reply,
            floor_id: floor.id,
            floor_number: floor.floor_number,
            floor_author_display: floor.author_display,
            post_id: floor.post_id,
            post_title,
        })
    }

    pub async fn update(pool: &PgPool, user_id: i64, id: i64, req: UpdateReplyRequest) -> AppResult<Self> {
        content::validate_content(&req.content, 1, MAX_REPLY_LEN)?;

        let mut tx = pool.begin().await?;
        let current = lock_reply(&mut tx, id).await?;
        ensure_author(current.author_user_id, user_id, "回复")?;
        if current.status != EntryStatus::Published {
            return Err(AppError::not_found("回复不存在"));
        }

        let reply = sqlx::query_as::<_, Reply>(&format!(
            "UPDATE forum_replies SET content = $2, updated_at = NOW() WHERE id = $1 RETURNING {REPLY_COLUMNS}"
        ))
        .bind(id)
        .bind(req.content.trim())
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(reply)
    }

    pub async fn soft_delete(pool: &PgPool, user_id: i64, id: i64) -> AppResult<EntryDeleted> {
        let mut tx = pool.begin().await?;
        let current = lock_reply(&mut tx, id).await?;
        ensure_author(current.author_user_id, user_id, "回复")?;

        let counted = current.status == EntryStatus::Published;
        if counted {
            sqlx::query("UPDATE forum_replies SET status = 'deleted', updated_at = NOW() WHERE id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            counters::adjust(&mut tx, Counter::FloorReplies, current.floor_id, -1).await?;
        }
        tx.commit().await?;

        tracing::info!("回复 {} 已被作者删除 (计数扣减: {})", id, counted);
        Ok(EntryDeleted { id, counted })
    }

    pub async fn hard_delete(pool: &PgPool, id: i64) -> AppResult<EntryDeleted> {
        let mut tx = pool.begin().await?;
        let current = lock_reply(&mut tx, id).await?;
        let counted = current.status == EntryStatus::Published;
        if counted {
            counters::adjust(&mut tx, Counter::FloorReplies, current.floor_id, -1).await?;
        }
        sqlx::query("DELETE FROM forum_replies WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!("回复 {} 已被管理员物理删除", id);
        Ok(EntryDeleted { id, counted })
    }

    pub async fn mine(pool: &PgPool, user_id: i64, query: &ForumPageQuery) -> AppResult<Paginated<Self>> {
        let paging = query.paging();
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM forum_replies WHERE author_user_id = $1 AND status = 'published'",
        )
        .bind(user_id)
        .fetch_one(pool)
        .await?;

        let items = sqlx::query_as::<_, Reply>(&format!(
            "{} WHERE r.author_user_id = $1 AND r.status = 'published' \
             ORDER BY r.created_at DESC, r.id DESC LIMIT $2 OFFSET $3",
            *REPLY_SELECT
        ))
        .bind(user_id)
        .bind(paging.size())
        .bind(paging.offset())
        .fetch_all(pool)
        .await?;

        Ok(Paginated::new(items, total, &paging))
    }
}

/// 点赞帖子、楼层或回复；重复点赞返回 already_liked，计数只变一次
pub async fn like(pool: &PgPool, user_id: i64, target: LikeTarget, target_id: i64) -> AppResult<LikeOutcome> {
    if target == LikeTarget::Article {
        return Err(AppError::bad_request("无效的点赞对象"));
    }
    let mut tx = pool.begin().await?;
    let (_, author) = authorship::resolve_active(&mut tx, user_id).await?;
    let outcome = counters::like(&mut tx, user_id, &author.display, target, target_id).await?;
    tx.commit().await?;
    Ok(outcome)
}

pub async fn unlike(pool: &PgPool, user_id: i64, target: LikeTarget, target_id: i64) -> AppResult<UnlikeOutcome> {
    if target == LikeTarget::Article {
        return Err(AppError::bad_request("无效的点赞对象"));
    }
    let mut tx = pool.begin().await?;
    let outcome = counters::unlike(&mut tx, user_id, target, target_id).await?;
    tx.commit().await?;
    Ok(outcome)
}

pub async fn like_status(pool: &PgPool, user_id: i64, target: LikeTarget, target_id: i64) -> AppResult<LikeStatus> {
    let mut conn = pool.acquire().await?;
    let liked = counters::has_liked(&mut conn, user_id, target, target_id).await?;
    Ok(LikeStatus {
        target_type: target,
        target_id,
        liked,
    })
}

pub async fn my_likes(pool: &PgPool, user_id: i64, query: &ForumPageQuery) -> AppResult<Paginated<MyLike>> {
    let paging = query.paging();
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM forum_likes WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(pool)
        .await?;

    let items = sqlx::query_as::<_, MyLike>(
        r#"
        SELECT l.id, l.target_type, l.target_id,
               p.id AS post_id, p.title AS post_title, l.created_at
        FROM forum_likes l
        LEFT JOIN forum_floors f ON f.id = l.floor_id
        LEFT JOIN forum_replies r ON r.id = l.reply_id
        LEFT JOIN forum_floors rf ON rf.id = r.floor_id
        LEFT JOIN forum_posts p ON p.id = COALESCE(l.post_id, f.post_id, rf.post_id)
        WHERE l.user_id = $1
        ORDER BY l.created_at DESC, l.id DESC
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_label_format() {
        assert_eq!(floor_label(1), "#1楼");
        assert_eq!(floor_label(12), "#12楼");
    }

    #[test]
    fn category_defaults_to_general() {
        assert_eq!(clean_category(None), "general");
        assert_eq!(clean_category(Some("  ")), "general");
        assert_eq!(clean_category(Some(" 技术 ")), "技术");
    }

    #[test]
    fn quote_is_masked_not_rejected() {
        assert_eq!(clean_quote(Some("这是广告".into())).unwrap(), Some("这是***".into()));
        assert_eq!(clean_quote(Some("   ".into())).unwrap(), None);
        assert!(clean_quote(Some("字".repeat(MAX_QUOTE_LEN + 1))).is_err());
    }

    #[test]
    fn sort_keys_parse() {
        assert_eq!("most_viewed".parse::<PostSort>().unwrap(), PostSort::MostViewed);
        assert!(PostSort::Hottest.order_by().contains("view_count / 10.0"));
    }
}
