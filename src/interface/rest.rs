//! REST facade over the same operations the real-time path uses.

use crate::{
    entity::{OrderContext, OrderId, UserId},
    error::{ChatError, Result},
    identity::bearer_token,
    interface::AppState,
    order::OrderStatus,
};
use axum::{
    async_trait,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        FromRequestParts, Path, Query, State,
    },
    http::{request::Parts, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_handler))
        .route("/messages", get(list_messages).post(send_message))
        .route("/messages/read", put(mark_read))
        .route("/messages/unread-count", get(unread_count))
        .route("/conversations", get(list_conversations))
        .route("/orders", post(create_order))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/status", put(update_order_status))
}

/// The authenticated caller, resolved from `Authorization: Bearer <token>`.
pub struct AuthUser(pub UserId);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ChatError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> std::result::Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers);
        state.manager.authenticate(token).await.map(AuthUser)
    }
}

fn json_body<T>(body: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ChatError::validation(rejection.body_text()))
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let hub = state.manager.hub();
    Json(json!({
        "status": "ok",
        "connections": hub.connection_count(),
        "rooms": hub.room_count(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    counterparty_id: Option<String>,
    order_id: Option<String>,
}

async fn list_messages(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    query: std::result::Result<Query<ListQuery>, QueryRejection>,
) -> Result<impl IntoResponse> {
    let Query(query) = query.map_err(|r| ChatError::validation(r.body_text()))?;
    let counterparty = query
        .counterparty_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(UserId::new)
        .ok_or_else(|| ChatError::validation("Counterparty ID is required"))?;
    let context = OrderContext::from_wire(query.order_id.as_deref());

    let messages = state
        .manager
        .list_messages(&user, &counterparty, &context)
        .await?;
    let views: Vec<_> = messages.iter().map(|m| m.view_for(&user)).collect();

    Ok(Json(json!({ "status": "success", "messages": views })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendBody {
    counterparty_id: Option<UserId>,
    #[serde(default)]
    order_id: OrderContext,
    text: Option<String>,
}

async fn send_message(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    body: std::result::Result<Json<SendBody>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let body = json_body(body)?;
    let text = body.text.filter(|t| !t.trim().is_empty());
    let (Some(counterparty), Some(text)) = (body.counterparty_id, text) else {
        return Err(ChatError::validation(
            "Counterparty ID and message text are required",
        ));
    };

    let msg = state
        .manager
        .send_message(crate::chat::NewMessage::direct(
            user.clone(),
            counterparty,
            body.order_id,
            text,
        ))
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "status": "success", "message": msg.view_for(&user) })),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkReadBody {
    counterparty_id: Option<UserId>,
}

async fn mark_read(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    body: std::result::Result<Json<MarkReadBody>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let counterparty = json_body(body)?
        .counterparty_id
        .ok_or_else(|| ChatError::validation("Counterparty ID is required"))?;

    state.manager.mark_read(&user, &counterparty).await?;

    Ok(Json(
        json!({ "status": "success", "message": "Messages marked as read" }),
    ))
}

async fn unread_count(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<impl IntoResponse> {
    let count = state.manager.unread_count(&user).await?;
    Ok(Json(json!({ "status": "success", "count": count })))
}

async fn list_conversations(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<impl IntoResponse> {
    let conversations = state.manager.conversations(&user).await?;
    Ok(Json(
        json!({ "status": "success", "conversations": conversations }),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateOrderBody {
    supplier_id: Option<UserId>,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    body: std::result::Result<Json<CreateOrderBody>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let supplier = json_body(body)?
        .supplier_id
        .ok_or_else(|| ChatError::validation("Supplier ID is required"))?;

    let order = state.manager.create_order(&user, &supplier).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "status": "success", "order": order })),
    ))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let order = state.manager.order_for(&user, &OrderId::new(id)).await?;
    Ok(Json(json!({ "status": "success", "order": order })))
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    status: Option<String>,
    message: Option<String>,
}

async fn update_order_status(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    body: std::result::Result<Json<StatusBody>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let body = json_body(body)?;
    let status: OrderStatus = body
        .status
        .ok_or_else(|| ChatError::validation("Status is required"))?
        .parse()
        .map_err(ChatError::Validation)?;

    let order = state
        .manager
        .update_order_status(&user, &OrderId::new(id), status, body.message)
        .await?;
    Ok(Json(json!({ "status": "success", "order": order })))
}
