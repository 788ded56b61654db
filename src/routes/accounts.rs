//! Account reads and profile management. Every operation is checked against
//! the authorization policy before the target row is looked up, so a caller
//! without access sees `Forbidden` rather than learning whether the id exists.

use rocket::State;
use rocket::serde::json::Json;
use rocket_okapi::openapi;

use crate::auth::responses::{AccountView, MessageResponse};
use crate::auth::routes::{ApiResult, respond_error};
use crate::auth::{AuthError, AuthState, AuthUser};
use crate::models::AccountPatch;

#[openapi(tag = "Users")]
#[get("/users/me")]
pub async fn current_user(user: AuthUser) -> ApiResult<AccountView> {
    Ok(Json(user.account.into()))
}

#[openapi(tag = "Users")]
#[get("/users/<account_id>")]
pub async fn get_user(
    state: &State<AuthState>,
    user: AuthUser,
    account_id: i32,
) -> ApiResult<AccountView> {
    let account = state
        .service
        .account(&user.account, account_id)
        .await
        .map_err(respond_error)?;

    Ok(Json(account.into()))
}

#[openapi(tag = "Users")]
#[put("/users/<account_id>", data = "<patch>")]
pub async fn update_user(
    state: &State<AuthState>,
    user: AuthUser,
    account_id: i32,
    patch: Json<AccountPatch>,
) -> ApiResult<AccountView> {
    if patch.is_empty() {
        return Err(respond_error(AuthError::Validation(
            "no fields to update".into(),
        )));
    }

    let account = state
        .service
        .update_account(&user.account, account_id, &patch)
        .await
        .map_err(respond_error)?;

    Ok(Json(account.into()))
}

#[openapi(tag = "Users")]
#[delete("/users/<account_id>")]
pub async fn delete_user(
    state: &State<AuthState>,
    user: AuthUser,
    account_id: i32,
) -> ApiResult<MessageResponse> {
    state
        .service
        .delete_account(&user.account, account_id)
        .await
        .map_err(respond_error)?;

    Ok(Json(MessageResponse {
        message: format!("account {account_id} deleted"),
    }))
}
