//! 各实体的字段描述表，供管理端动态渲染表单。

use axum::extract::{Extension, Path};
use serde::Serialize;

use crate::{
    db::text_enum,
    error::{ApiResult, AppError},
    middleware::Principal,
    utils::success_to_api_response,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Id,
    Text,
    LongText,
    Integer,
    Boolean,
    DateTime,
    Choice,
    Image,
    Reference,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub kind: FieldKind,
    pub label: &'static str,
    pub readonly: bool,
    pub options: &'static [&'static str],
}

const fn field(name: &'static str, kind: FieldKind, label: &'static str) -> FieldDescriptor {
    FieldDescriptor {
        name,
        kind,
        label,
        readonly: false,
        options: &[],
    }
}

const fn readonly(name: &'static str, kind: FieldKind, label: &'static str) -> FieldDescriptor {
    FieldDescriptor {
        name,
        kind,
        label,
        readonly: true,
        options: &[],
    }
}

const fn choice(name: &'static str, label: &'static str, options: &'static [&'static str]) -> FieldDescriptor {
    FieldDescriptor {
        name,
        kind: FieldKind::Choice,
        label,
        readonly: false,
        options,
    }
}

use FieldKind::*;

const USER_FIELDS: &[FieldDescriptor] = &[
    readonly("id", Id, "用户ID"),
    readonly("account", Text, "账号"),
    field("username", Text, "昵称"),
    field("phone", Text, "手机号"),
    field("email", Text, "邮箱"),
    field("avatar", Image, "头像"),
    choice("role", "角色", &["USER", "ORG_USER", "ADMIN", "SUPER_ADMIN"]),
    readonly("is_deleted", Boolean, "已注销"),
    readonly("created_at", DateTime, "注册时间"),
];

const ACTIVITY_FIELDS: &[FieldDescriptor] = &[
    readonly("id", Id, "活动ID"),
    field("title", Text, "标题"),
    field("description", LongText, "描述"),
    field("location", Text, "地点"),
    field("start_time", DateTime, "开始时间"),
    field("end_time", DateTime, "结束时间"),
    field("max_participants", Integer, "人数上限"),
    choice("status", "状态", &["draft", "published", "cancelled", "completed"]),
    field("tags", Text, "标签"),
    readonly("organizer_display", Text, "组织者"),
    readonly("created_at", DateTime, "创建时间"),
];

const BOOKING_FIELDS: &[FieldDescriptor] = &[
    readonly("id", Id, "预约ID"),
    readonly("activity_id", Reference, "活动"),
    readonly("user_account", Text, "预约账号"),
    choice("status", "状态", &["booked", "cancelled", "attended", "absent"]),
    field("notes", LongText, "备注"),
    readonly("booking_time", DateTime, "预约时间"),
];

const RATING_FIELDS: &[FieldDescriptor] = &[
    readonly("id", Id, "评分ID"),
    readonly("activity_id", Reference, "活动"),
    readonly("rater_display", Text, "评分人"),
    choice("score", "评分", &["1", "2", "3", "4", "5"]),
    field("comment_content", LongText, "评价内容"),
    readonly("create_time", DateTime, "评分时间"),
];

const DISCUSSION_FIELDS: &[FieldDescriptor] = &[
    readonly("id", Id, "讨论ID"),
    readonly("activity_id", Reference, "活动"),
    readonly("author_display", Text, "作者"),
    field("content", LongText, "内容"),
    field("image_urls", Image, "图片"),
    readonly("create_time", DateTime, "发布时间"),
];

const COMMENT_FIELDS: &[FieldDescriptor] = &[
    readonly("id", Id, "评论ID"),
    readonly("discussion_id", Reference, "讨论"),
    readonly("parent_comment_id", Reference, "父评论"),
    readonly("author_display", Text, "作者"),
    field("content", LongText, "内容"),
    readonly("create_time", DateTime, "评论时间"),
];

const POST_FIELDS: &[FieldDescriptor] = &[
    readonly("id", Id, "帖子ID"),
    field("title", Text, "标题"),
    field("content", LongText, "内容"),
    field("category", Text, "分类"),
    choice("status", "状态", &["published", "draft", "deleted"]),
    readonly("view_count", Integer, "浏览数"),
    readonly("like_count", Integer, "点赞数"),
    readonly("comment_count", Integer, "楼层数"),
    readonly("author_display", Text, "作者"),
    readonly("created_at", DateTime, "发布时间"),
];

const FLOOR_FIELDS: &[FieldDescriptor] = &[
    readonly("id", Id, "楼层ID"),
    readonly("post_id", Reference, "帖子"),
    readonly("floor_number", Integer, "楼层号"),
    field("content", LongText, "内容"),
    choice("status", "状态", &["published", "deleted"]),
    readonly("like_count", Integer, "点赞数"),
    readonly("reply_count", Integer, "回复数"),
    readonly("author_display", Text, "作者"),
];

const REPLY_FIELDS: &[FieldDescriptor] = &[
    readonly("id", Id, "回复ID"),
    readonly("floor_id", Reference, "楼层"),
    field("content", LongText, "内容"),
    readonly("quote_content", LongText, "引用内容"),
    readonly("quote_author", Text, "引用作者"),
    choice("status", "状态", &["published", "deleted"]),
    readonly("like_count", Integer, "点赞数"),
    readonly("author_display", Text, "作者"),
];

const NOTICE_FIELDS: &[FieldDescriptor] = &[
    readonly("id", Id, "公告ID"),
    field("release_title", Text, "标题"),
    field("release_notice", LongText, "内容"),
    choice("notice_type", "类型", &["SYSTEM", "GENERAL", "ACTIVITY"]),
    choice("status", "状态", &["DRAFT", "PENDING", "APPROVED", "REJECTED", "EXPIRED"]),
    field("is_top", Boolean, "置顶"),
    field("expiration", DateTime, "到期时间"),
    readonly("author_display", Text, "发布人"),
    readonly("release_time", DateTime, "发布时间"),
];

const ARTICLE_FIELDS: &[FieldDescriptor] = &[
    readonly("id", Id, "文章ID"),
    field("title", Text, "标题"),
    field("content", LongText, "内容"),
    field("cover_image", Image, "封面"),
    choice("status", "状态", &["draft", "pending", "published", "rejected"]),
    readonly("like_count", Integer, "点赞数"),
    readonly("view_count", Integer, "浏览数"),
    readonly("author_display", Text, "作者"),
    readonly("published_at", DateTime, "发布时间"),
];

text_enum! {
    pub enum FieldEntity {
        User => "user",
        Activity => "activity",
        Booking => "booking",
        Rating => "rating",
        Discussion => "discussion",
        Comment => "comment",
        Post => "post",
        Floor => "floor",
        Reply => "reply",
        Notice => "notice",
        Article => "article",
    }
}

impl FieldEntity {
    pub fn descriptors(&self) -> &'static [FieldDescriptor] {
        match self {
            FieldEntity::User => USER_FIELDS,
            FieldEntity::Activity => ACTIVITY_FIELDS,
            FieldEntity::Booking => BOOKING_FIELDS,
            FieldEntity::Rating => RATING_FIELDS,
            FieldEntity::Discussion => DISCUSSION_FIELDS,
            FieldEntity::Comment => COMMENT_FIELDS,
            FieldEntity::Post => POST_FIELDS,
            FieldEntity::Floor => FLOOR_FIELDS,
            FieldEntity::Reply => REPLY_FIELDS,
            FieldEntity::Notice => NOTICE_FIELDS,
            FieldEntity::Article => ARTICLE_FIELDS,
        }
    }
}

pub async fn entity_fields(
    Extension(principal): Extension<Principal>,
    Path(entity): Path<String>,
) -> ApiResult<&'static [FieldDescriptor]> {
    principal.require_admin()?;
    let entity: FieldEntity = entity
        .parse()
        .map_err(|_| AppError::not_found(format!("未知实体: {}", entity)))?;
    Ok(success_to_api_response(entity.descriptors()))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn every_entity_has_unique_field_names() {
        for entity in FieldEntity::ALL {
            let fields = entity.descriptors();
            assert!(fields.first().is_some_and(|f| f.kind == FieldKind::Id && f.readonly));
            let names: HashSet<_> = fields.iter().map(|f| f.name).collect();
            assert_eq!(names.len(), fields.len(), "{} 有重复字段", entity);
        }
    }

    #[test]
    fn choice_fields_carry_options() {
        for entity in FieldEntity::ALL {
            for f in entity.descriptors() {
                assert_eq!(f.kind == FieldKind::Choice, !f.options.is_empty(), "{}.{}", entity, f.name);
            }
        }
    }

    #[test]
    fn legacy_notice_type_is_not_offered() {
        let notice_type = NOTICE_FIELDS.iter().find(|f| f.name == "notice_type");
        assert!(notice_type.is_some_and(|f| !f.options.contains(&"ADMIN")));
    }

    #[test]
    fn descriptor_serializes_kind_in_snake_case() {
        let json = serde_json::to_value(ACTIVITY_FIELDS[2]).unwrap();
        assert_eq!(json["kind"], "long_text");
        assert_eq!(json["readonly"], false);
    }
}
