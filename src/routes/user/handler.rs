use axum::{
    Json,
    extract::{Extension, Path, Query, State},
};

use crate::{
    AppState,
    authorship::Role,
    db::with_deadline,
    error::{ApiResult, AppError},
    middleware::Principal,
    utils::{Paginated, generate_token, hash_password, message_to_api_response, success_to_api_response, verify_password},
};

use super::model::{
    DELETE_CONFIRMATION, DeleteAccountRequest, LoginRequest, LoginResponse, NewUser, RegisterRequest,
    SetRoleRequest, SoftDeleteOutcome, UpdateProfileRequest, User, UserListQuery,
};

fn issue_token(state: &AppState, user: User) -> ApiResult<LoginResponse> {
    let (token, expires_at) = generate_token(user.id, user.role, &state.config).map_err(|e| {
        tracing::error!("生成令牌错误: {:?}", e);
        AppError::Internal("生成令牌失败".into())
    })?;
    Ok(success_to_api_response(LoginResponse {
        user,
        token,
        expires_at,
    }))
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<LoginResponse> {
    // 检查账号格式
    if !req.account.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(AppError::bad_request("账号格式无效，只允许使用字母、数字和下划线"));
    }
    if req.password.chars().count() < 6 {
        return Err(AppError::bad_request("密码长度不能少于6位"));
    }

    let password_hash = hash_password(&req.password)
        .map_err(|e| AppError::Internal(format!("密码加密失败: {}", e)))?;

    let new_user = NewUser {
        account: req.account,
        password_hash,
        username: req.username,
        phone: req.phone,
        email: req.email,
        role: Role::User,
    };
    let user = with_deadline(state.config.tx_timeout(), User::create(&state.pool, new_user)).await?;

    issue_token(&state, user)
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<LoginResponse> {
    let user = User::find_active_by_account(&state.pool, req.account.trim())
        .await?
        .ok_or_else(|| AppError::bad_request("账号或密码错误"))?;

    // 验证密码
    let valid = verify_password(&req.password, &user.password_hash)
        .map_err(|e| AppError::Internal(format!("密码校验失败: {}", e)))?;
    if !valid {
        return Err(AppError::bad_request("账号或密码错误"));
    }

    issue_token(&state, user)
}

pub async fn me(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<User> {
    let user = User::find_by_id(&state.pool, principal.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("用户不存在"))?;
    Ok(success_to_api_response(user))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<UpdateProfileRequest>,
) -> ApiResult<User> {
    let user = with_deadline(
        state.config.tx_timeout(),
        User::update_profile(&state.pool, principal.user_id, req),
    )
    .await?;
    Ok(success_to_api_response(user))
}

pub async fn delete_account(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<DeleteAccountRequest>,
) -> ApiResult<SoftDeleteOutcome> {
    if req.confirmation != DELETE_CONFIRMATION {
        return Err(AppError::bad_request(format!(
            "请输入确认文本 {} 以注销账号",
            DELETE_CONFIRMATION
        )));
    }

    let user = User::find_by_id(&state.pool, principal.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("用户不存在"))?;
    let valid = verify_password(&req.password, &user.password_hash)
        .map_err(|e| AppError::Internal(format!("密码校验失败: {}", e)))?;
    if !valid {
        return Err(AppError::bad_request("密码错误"));
    }

    let outcome = with_deadline(state.config.tx_timeout(), User::soft_delete(&state.pool, user.id)).await?;
    Ok(message_to_api_response("注销成功", outcome))
}

pub async fn admin_list_users(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<UserListQuery>,
) -> ApiResult<Paginated<User>> {
    principal.require_admin()?;
    let page = User::list(&state.pool, &query).await?;
    Ok(success_to_api_response(page))
}

pub async fn admin_delete_user(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(user_id): Path<i64>,
) -> ApiResult<SoftDeleteOutcome> {
    principal.require_admin()?;

    let target = User::find_by_id(&state.pool, user_id)
        .await?
        .ok_or_else(|| AppError::not_found("用户不存在"))?;
    if target.role.is_admin() {
        return Err(AppError::forbidden("不能删除管理员账号"));
    }

    let outcome = with_deadline(state.config.tx_timeout(), User::soft_delete(&state.pool, user_id)).await?;
    tracing::info!("管理员 {} 注销了用户 {}", principal.user_id, user_id);
    Ok(message_to_api_response("用户已注销", outcome))
}

pub async fn admin_set_role(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(user_id): Path<i64>,
    Json(req): Json<SetRoleRequest>,
) -> ApiResult<User> {
    principal.require_admin()?;
    // 只有超级管理员可以授予或收回管理员身份
    if req.role.is_admin() && principal.role != Role::SuperAdmin {
        return Err(AppError::forbidden("只有超级管理员可以授予管理员角色"));
    }

    let user = with_deadline(state.config.tx_timeout(), User::set_role(&state.pool, user_id, req.role)).await?;
    Ok(success_to_api_response(user))
}
