use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};

use crate::{
    authorship::{self, author_join, live_author_columns},
    content,
    db::text_enum,
    error::{AppError, AppResult},
    routes::activity::load_activity,
    utils::{PageQuery, Paginated},
};

const MAX_IMAGES: usize = 9;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Discussion {
    pub id: i64,
    pub activity_id: i64,
    pub author_user_id: Option<i64>,
    pub author_display: String,
    pub author_avatar: String,
    pub content: String,
    pub image_urls: Vec<String>,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

/// 列表项：附带留言数和最近留言时间
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DiscussionView {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub discussion: Discussion,
    pub comment_count: i64,
    pub latest_comment_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DiscussionComment {
    pub id: i64,
    pub discuss_id: i64,
    pub author_user_id: Option<i64>,
    pub author_display: String,
    pub author_avatar: String,
    pub content: String,
    pub parent_comment_id: Option<i64>,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommentNode {
    #[serde(flatten)]
    pub comment: DiscussionComment,
    pub replies: Vec<CommentNode>,
}

#[derive(Debug, Serialize)]
pub struct NestedComments {
    pub discussion_id: i64,
    pub total_comments: usize,
    pub root_comments_count: usize,
    pub comments: Vec<CommentNode>,
}

#[derive(Debug, Serialize)]
pub struct DiscussionDeleted {
    pub id: i64,
    pub deleted_comment_count: i64,
}

#[derive(Debug, Serialize)]
pub struct CommentDeleted {
    pub id: i64,
    pub preserved_child_count: u64,
}

static DISCUSSION_SELECT: LazyLock<String> = LazyLock::new(|| {
    format!(
        "SELECT d.id, d.activity_id, {}, d.content, d.image_urls, d.create_time, d.update_time, \
                stats.comment_count, stats.latest_comment_time \
         FROM activity_discussions d {} \
         CROSS JOIN LATERAL ( \
             SELECT COUNT(*) AS comment_count, MAX(c.create_time) AS latest_comment_time \
             FROM activity_discussion_comments c WHERE c.discuss_id = d.id \
         ) stats",
        live_author_columns("d", "author_user_id", "author_display", Some("author_avatar")),
        author_join("d", "author_user_id"),
    )
});

static COMMENT_SELECT: LazyLock<String> = LazyLock::new(|| {
    format!(
        "SELECT c.id, c.discuss_id, {}, c.content, c.parent_comment_id, c.create_time, c.update_time \
         FROM activity_discussion_comments c {}",
        live_author_columns("c", "author_user_id", "author_display", Some("author_avatar")),
        author_join("c", "author_user_id"),
    )
});

const DISCUSSION_RETURNING: &str =
    "id, activity_id, author_user_id, author_display, author_avatar, content, image_urls, create_time, update_time";
const COMMENT_RETURNING: &str =
    "id, discuss_id, author_user_id, author_display, author_avatar, content, parent_comment_id, create_time, update_time";

text_enum! {
    pub enum DiscussionSort {
        Latest => "latest",
        LatestComment => "latest_comment",
        Hottest => "hottest",
    }
}

impl DiscussionSort {
    fn order_by(&self) -> &'static str {
        match self {
            DiscussionSort::Latest => "d.create_time DESC, d.id DESC",
            DiscussionSort::LatestComment => {
                "COALESCE(stats.latest_comment_time, d.create_time) DESC, d.id DESC"
            }
            DiscussionSort::Hottest => "stats.comment_count DESC, d.create_time DESC, d.id DESC",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DiscussionListQuery {
    pub sort_by: Option<DiscussionSort>,
    pub page: Option<i64>,
    pub size: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DiscussionSearchQuery {
    pub keyword: Option<String>,
    pub page: Option<i64>,
    pub size: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CommentListQuery {
    pub page: Option<i64>,
    pub size: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateDiscussionRequest {
    pub content: String,
    #[serde(default)]
    pub image_urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateDiscussionRequest {
    pub content: Option<String>,
    pub image_urls: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct CreateCommentRequest {
    pub content: String,
    pub parent_comment_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCommentRequest {
    pub content: String,
}

fn clean_images(urls: Vec<String>) -> AppResult<Vec<String>> {
    let urls: Vec<String> = urls
        .into_iter()
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .collect();
    if urls.len() > MAX_IMAGES {
        return Err(AppError::bad_request(format!("图片最多 {} 张", MAX_IMAGES)));
    }
    Ok(urls)
}

/// 嵌套视图的最大层级，更深的回复平铺在最深一层
pub const MAX_NEST_DEPTH: usize = 32;

struct OpenNode {
    comment: DiscussionComment,
    pending: std::vec::IntoIter<DiscussionComment>,
    built: Vec<CommentNode>,
}

impl OpenNode {
    fn new(comment: DiscussionComment, children: &mut HashMap<i64, Vec<DiscussionComment>>) -> Self {
        let pending = children.remove(&comment.id).unwrap_or_default().into_iter();
        OpenNode {
            comment,
            pending,
            built: Vec::new(),
        }
    }
}

/// 把扁平的留言列表组装成树；父留言不在列表中的留言作为根。用显式栈组装，层级不超过 `MAX_NEST_DEPTH`
pub fn build_comment_tree(comments: Vec<DiscussionComment>) -> Vec<CommentNode> {
    let ids: HashSet<i64> = comments.iter().map(|c| c.id).collect();
    let mut children: HashMap<i64, Vec<DiscussionComment>> = HashMap::new();
    let mut roots = Vec::new();

    for comment in comments {
        match comment.parent_comment_id {
            Some(parent) if parent != comment.id && ids.contains(&parent) => {
                children.entry(parent).or_default().push(comment)
            }
            _ => roots.push(comment),
        }
    }

    let mut tree = Vec::with_capacity(roots.len());
    for root in roots {
        let mut stack = vec![OpenNode::new(root, &mut children)];
        loop {
            let depth = stack.len();
            let Some(top) = stack.last_mut() else { break };
            let Some(child) = top.pending.next() else {
                let Some(done) = stack.pop() else { break };
                let node = CommentNode {
                    comment: done.comment,
                    replies: done.built,
                };
                match stack.last_mut() {
                    Some(parent) => parent.built.push(node),
                    None => tree.push(node),
                }
                continue;
            };

            if depth < MAX_NEST_DEPTH {
                stack.push(OpenNode::new(child, &mut children));
                continue;
            }

            // 先序展开整棵子树
            let mut rest = vec![child];
            while let Some(comment) = rest.pop() {
                let mut descendants = children.remove(&comment.id).unwrap_or_default();
                descendants.reverse();
                rest.extend(descendants);
                top.built.push(CommentNode {
                    comment,
                    replies: Vec::new(),
                });
            }
        }
    }
    tree
}

async fn lock_discussion(conn: &mut PgConnection, id: i64) -> AppResult<Discussion> {
    sqlx::query_as::<_, Discussion>(&format!(
        "SELECT {DISCUSSION_RETURNING} FROM activity_discussions WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| AppError::not_found("讨论不存在"))
}

async fn lock_comment(conn: &mut PgConnection, id: i64) -> AppResult<DiscussionComment> {
    sqlx::query_as::<_, DiscussionComment>(&format!(
        "SELECT {COMMENT_RETURNING} FROM activity_discussion_comments WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| AppError::not_found("留言不存在"))
}

impl Discussion {
    pub async fn create(pool: &PgPool, user_id: i64, activity_id: i64, req: CreateDiscussionRequest) -> AppResult<Self> {
        let body = req.content.trim();
        content::validate_body(body)?;
        let images = clean_images(req.image_urls)?;

        let mut tx = pool.begin().await?;
        load_activity(&mut tx, activity_id).await?;
        let (_, author) = authorship::resolve_active(&mut tx, user_id).await?;

        let discussion = sqlx::query_as::<_, Discussion>(&format!(
            "INSERT INTO activity_discussions (activity_id, author_user_id, author_display, author_avatar, content, image_urls) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {DISCUSSION_RETURNING}"
        ))
        .bind(activity_id)
        .bind(author.user_id)
        .bind(&author.display)
        .bind(&author.avatar)
        .bind(body)
        .bind(&images)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!("用户 {} 在活动 {} 发表讨论 {}", user_id, activity_id, discussion.id);
        Ok(discussion)
    }

    pub async fn update(pool: &PgPool, user_id: i64, id: i64, req: UpdateDiscussionRequest) -> AppResult<Self> {
        let mut tx = pool.begin().await?;
        let current = lock_discussion(&mut tx, id).await?;
        if current.author_user_id != Some(user_id) {
            return Err(AppError::forbidden("无权修改此讨论"));
        }

        let body = match req.content.as_deref().map(str::trim) {
            Some(body) => {
                content::validate_body(body)?;
                body.to_string()
            }
            None => current.content,
        };
        let images = match req.image_urls {
            Some(urls) => clean_images(urls)?,
            None => current.image_urls,
        };

        let discussion = sqlx::query_as::<_, Discussion>(&format!(
            "UPDATE activity_discussions SET content = $2, image_urls = $3, update_time = NOW() \
             WHERE id = $1 RETURNING {DISCUSSION_RETURNING}"
        ))
        .bind(id)
        .bind(&body)
        .bind(&images)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(discussion)
    }

    /// 删除讨论，留言随外键级联删除
    pub async fn delete(pool: &PgPool, user_id: i64, id: i64) -> AppResult<DiscussionDeleted> {
        let mut tx = pool.begin().await?;
        let current = lock_discussion(&mut tx, id).await?;
        if current.author_user_id != Some(user_id) {
            return Err(AppError::forbidden("无权删除此讨论"));
        }

        let deleted_comment_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM activity_discussion_comments WHERE discuss_id = $1")
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;

        sqlx::query("DELETE FROM activity_discussions WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::info!("讨论 {} 已删除，级联删除留言 {} 条", id, deleted_comment_count);
        Ok(DiscussionDeleted {
            id,
            deleted_comment_count,
        })
    }

    pub async fn find(pool: &PgPool, id: i64) -> AppResult<DiscussionView> {
        sqlx::query_as::<_, DiscussionView>(&format!("{} WHERE d.id = $1", *DISCUSSION_SELECT))
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| AppError::not_found("讨论不存在"))
    }

    pub async fn list(pool: &PgPool, activity_id: i64, query: &DiscussionListQuery) -> AppResult<Paginated<DiscussionView>> {
        let paging = PageQuery {
            page: query.page,
            size: query.size,
        };
        {
            let mut conn = pool.acquire().await?;
            load_activity(&mut conn, activity_id).await?;
        }
        let sort = query.sort_by.unwrap_or(DiscussionSort::Latest);

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM activity_discussions WHERE activity_id = $1")
            .bind(activity_id)
            .fetch_one(pool)
            .await?;

        let items = sqlx::query_as::<_, DiscussionView>(&format!(
            "{} WHERE d.activity_id = $1 ORDER BY {} LIMIT $2 OFFSET $3",
            *DISCUSSION_SELECT,
            sort.order_by()
        ))
        .bind(activity_id)
        .bind(paging.size())
        .bind(paging.offset())
        .fetch_all(pool)
        .await?;

        Ok(Paginated::new(items, total, &paging))
    }

    pub async fn search(pool: &PgPool, activity_id: i64, query: &DiscussionSearchQuery) -> AppResult<Paginated<DiscussionView>> {
        let keyword = query
            .keyword
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AppError::bad_request("搜索关键词不能为空"))?;
        let pattern = format!("%{}%", keyword);
        let paging = PageQuery {
            page: query.page,
            size: query.size,
        };
        {
            let mut conn = pool.acquire().await?;
            load_activity(&mut conn, activity_id).await?;
        }

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM activity_discussions WHERE activity_id = $1 AND content LIKE $2",
        )
        .bind(activity_id)
        .bind(&pattern)
        .fetch_one(pool)
        .await?;

        let items = sqlx::query_as::<_, DiscussionView>(&format!(
            "{} WHERE d.activity_id = $1 AND d.content LIKE $2 ORDER BY d.create_time DESC, d.id DESC LIMIT $3 OFFSET $4",
            *DISCUSSION_SELECT
        ))
        .bind(activity_id)
        .bind(&pattern)
        .bind(paging.size())
        .bind(paging.offset())
        .fetch_all(pool)
        .await?;

        Ok(Paginated::new(items, total, &paging))
    }
}

impl DiscussionComment {
    /// 发表留言；父留言必须属于同一讨论
    pub async fn create(pool: &PgPool, user_id: i64, discussion_id: i64, req: CreateCommentRequest) -> AppResult<Self> {
        let body = req.content.trim();
        content::validate_body(body)?;

        let mut tx = pool.begin().await?;
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM activity_discussions WHERE id = $1)")
            .bind(discussion_id)
            .fetch_one(&mut *tx)
            .await?;
        if !exists {
            return Err(AppError::not_found("讨论不存在"));
        }

        if let Some(parent_id) = req.parent_comment_id {
            let parent_ok: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM activity_discussion_comments WHERE id = $1 AND discuss_id = $2)",
            )
            .bind(parent_id)
            .bind(discussion_id)
            .fetch_one(&mut *tx)
            .await?;
            if !parent_ok {
                return Err(AppError::not_found("父留言不存在"));
            }
        }

        let (_, author) = authorship::resolve_active(&mut tx, user_id).await?;
        let comment = sqlx::query_as::<_, DiscussionComment>(&format!(
            "INSERT INTO activity_discussion_comments \
                 (discuss_id, author_user_id, author_display, author_avatar, content, parent_comment_id) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {COMMENT_RETURNING}"
        ))
        .bind(discussion_id)
        .bind(author.user_id)
        .bind(&author.display)
        .bind(&author.avatar)
        .bind(body)
        .bind(req.parent_comment_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!("用户 {} 在讨论 {} 发表留言 {}", user_id, discussion_id, comment.id);
        Ok(comment)
    }

    pub async fn update(pool: &PgPool, user_id: i64, id: i64, req: UpdateCommentRequest) -> AppResult<Self> {
        let body = req.content.trim();
        content::validate_body(body)?;

        let mut tx = pool.begin().await?;
        let current = lock_comment(&mut tx, id).await?;
        if current.author_user_id != Some(user_id) {
            return Err(AppError::forbidden("无权修改此留言"));
        }

        let comment = sqlx::query_as::<_, DiscussionComment>(&format!(
            "UPDATE activity_discussion_comments SET content = $2, update_time = NOW() \
             WHERE id = $1 RETURNING {COMMENT_RETURNING}"
        ))
        .bind(id)
        .bind(body)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(comment)
    }

    /// 删除留言；子留言提升为根留言而不是一并删除
    pub async fn delete(pool: &PgPool, user_id: i64, id: i64) -> AppResult<CommentDeleted> {
        let mut tx = pool.begin().await?;
        let current = lock_comment(&mut tx, id).await?;
        if current.author_user_id != Some(user_id) {
            return Err(AppError::forbidden("无权删除此留言"));
        }

        let preserved_child_count = sqlx::query(
            "UPDATE activity_discussion_comments SET parent_comment_id = NULL WHERE parent_comment_id = $1",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query("DELETE FROM activity_discussion_comments WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::info!("留言 {} 已删除，保留子留言 {} 条", id, preserved_child_count);
        Ok(CommentDeleted {
            id,
            preserved_child_count,
        })
    }

    pub async fn list(pool: &PgPool, discussion_id: i64, query: &CommentListQuery) -> AppResult<Paginated<Self>> {
        let paging = PageQuery {
            page: query.page,
            size: query.size,
        };
        Discussion::find(pool, discussion_id).await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM activity_discussion_comments WHERE discuss_id = $1")
            .bind(discussion_id)
            .fetch_one(pool)
            .await?;

        let items = sqlx::query_as::<_, DiscussionComment>(&format!(
            "{} WHERE c.discuss_id = $1 ORDER BY c.create_time ASC, c.id ASC LIMIT $2 OFFSET $3",
            *COMMENT_SELECT
        ))
        .bind(discussion_id)
        .bind(paging.size())
        .bind(paging.offset())
        .fetch_all(pool)
        .await?;

        Ok(Paginated::new(items, total, &paging))
    }

    pub async fn nested(pool: &PgPool, discussion_id: i64) -> AppResult<NestedComments> {
        Discussion::find(pool, discussion_id).await?;

        let comments = sqlx::query_as::<_, DiscussionComment>(&format!(
            "{} WHERE c.discuss_id = $1 ORDER BY c.create_time ASC, c.id ASC",
            *COMMENT_SELECT
        ))
        .bind(discussion_id)
        .fetch_all(pool)
        .await?;

        let total_comments = comments.len();
        let tree = build_comment_tree(comments);
        Ok(NestedComments {
            discussion_id,
            total_comments,
            root_comments_count: tree.len(),
            comments: tree,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment(id: i64, parent: Option<i64>) -> DiscussionComment {
        let now = Utc::now();
        DiscussionComment {
            id,
            discuss_id: 1,
            author_user_id: Some(1),
            author_display: "张三（用户）".into(),
            author_avatar: authorship::DEFAULT_AVATAR.into(),
            content: format!("留言{}", id),
            parent_comment_id: parent,
            create_time: now,
            update_time: now,
        }
    }

    #[test]
    fn tree_nests_children_under_parents() {
        let tree = build_comment_tree(vec![
            comment(1, None),
            comment(2, Some(1)),
            comment(3, Some(2)),
            comment(4, Some(1)),
        ]);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].replies.len(), 2);
        assert_eq!(tree[0].replies[0].comment.id, 2);
        assert_eq!(tree[0].replies[0].replies[0].comment.id, 3);
    }

    #[test]
    fn orphans_surface_as_roots() {
        let tree = build_comment_tree(vec![comment(1, None), comment(3, Some(2))]);
        let roots: Vec<i64> = tree.iter().map(|n| n.comment.id).collect();
        assert_eq!(roots, vec![1, 3]);
    }

    #[test]
    fn child_listed_before_parent_still_nests() {
        let tree = build_comment_tree(vec![comment(5, Some(9)), comment(9, None)]);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].comment.id, 9);
        assert_eq!(tree[0].replies[0].comment.id, 5);
    }

    #[test]
    fn long_reply_chain_is_capped_and_flattened() {
        let chain: Vec<DiscussionComment> = (1..=100)
            .map(|id| comment(id, if id == 1 { None } else { Some(id - 1) }))
            .collect();
        let tree = build_comment_tree(chain);
        assert_eq!(tree.len(), 1);

        let mut node = &tree[0];
        for _ in 1..MAX_NEST_DEPTH {
            assert_eq!(node.replies.len(), 1);
            node = &node.replies[0];
        }
        assert_eq!(node.comment.id, MAX_NEST_DEPTH as i64);
        let flattened: Vec<i64> = node.replies.iter().map(|n| n.comment.id).collect();
        assert_eq!(flattened, (MAX_NEST_DEPTH as i64 + 1..=100).collect::<Vec<_>>());
        assert!(node.replies.iter().all(|n| n.replies.is_empty()));
    }

    #[test]
    fn very_deep_chain_builds_without_recursion() {
        let chain: Vec<DiscussionComment> = (1..=50_000)
            .map(|id| comment(id, if id == 1 { None } else { Some(id - 1) }))
            .collect();
        let tree = build_comment_tree(chain);
        assert_eq!(tree.len(), 1);
        assert!(serde_json::to_string(&tree).is_ok());
    }

    #[test]
    fn flattened_branches_keep_preorder() {
        // 在最深一层下挂两条分支
        let mut comments: Vec<DiscussionComment> = (1..=MAX_NEST_DEPTH as i64)
            .map(|id| comment(id, if id == 1 { None } else { Some(id - 1) }))
            .collect();
        let deepest = MAX_NEST_DEPTH as i64;
        comments.push(comment(1001, Some(deepest)));
        comments.push(comment(1002, Some(1001)));
        comments.push(comment(2001, Some(deepest)));
        let tree = build_comment_tree(comments);

        let mut node = &tree[0];
        while let Some(next) = node.replies.first().filter(|n| n.comment.id <= deepest) {
            node = next;
        }
        let flattened: Vec<i64> = node.replies.iter().map(|n| n.comment.id).collect();
        assert_eq!(flattened, vec![1001, 1002, 2001]);
    }

    #[test]
    fn image_list_is_trimmed_and_bounded() {
        assert_eq!(clean_images(vec![" a.png ".into(), "".into()]).unwrap(), vec!["a.png"]);
        assert!(clean_images(vec!["x".into(); 10]).is_err());
    }
}
