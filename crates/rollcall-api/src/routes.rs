use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use rollcall_core::models::{EntityKey, FieldChanges, MemberRecord};
use rollcall_core::sync::{
    AddressUpdate, ApplyRequest, ApplyResponse, ChangeRecord, ChangesResponse, MarkFailedRequest,
    MarkFailedResponse, MarkSyncedRequest, MarkSyncedResponse, StatusResponse, SyncMessage,
};
use rollcall_core::util::parse_timestamp;
use rollcall_core::{RelationalService, ReplicaService};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{extract_bearer_token, TokenVerifier};
use crate::error::AppError;

#[derive(Clone)]
pub struct RelationalState {
    service: RelationalService,
    verifier: Arc<TokenVerifier>,
}

impl RelationalState {
    pub fn new(service: RelationalService, verifier: TokenVerifier) -> Self {
        Self {
            service,
            verifier: Arc::new(verifier),
        }
    }
}

#[derive(Clone)]
pub struct ReplicaState {
    service: ReplicaService,
    verifier: Arc<TokenVerifier>,
}

impl ReplicaState {
    pub fn new(service: ReplicaService, verifier: TokenVerifier) -> Self {
        Self {
            service,
            verifier: Arc::new(verifier),
        }
    }
}

/// Endpoints consumed by the reconciler and the profile updater
pub fn relational_router(state: RelationalState) -> Router {
    let protected_routes = Router::new()
        .route("/changes", get(changes_since))
        .route("/changes/retry", get(retry_backlog))
        .route("/apply", post(apply_changes))
        .route("/mark-synced", post(mark_synced))
        .route("/mark-failed", post(mark_failed))
        .route("/member/{entity_key}", get(get_member).patch(update_member))
        .route("/member/{entity_key}/address", put(update_address))
        .route("/status", get(status))
        .route_layer(middleware::from_fn_with_state(
            state.verifier.clone(),
            require_token,
        ));

    Router::new()
        .route("/healthz", get(healthz))
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

/// Receiving end of the relational push channel
pub fn replica_router(state: ReplicaState) -> Router {
    let protected_routes = Router::new()
        .route("/sync", post(receive_sync))
        .route_layer(middleware::from_fn_with_state(
            state.verifier.clone(),
            require_token,
        ));

    Router::new()
        .route("/healthz", get(healthz))
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
    })
}

async fn require_token(
    State(verifier): State<Arc<TokenVerifier>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(request.headers())?;
    verifier.verify(token).await?;
    Ok(next.run(request).await)
}

#[derive(Debug, Deserialize)]
struct ChangesQuery {
    since: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RetryQuery {
    before: Option<String>,
}

fn timestamp_param(name: &str, raw: &str) -> Result<i64, AppError> {
    parse_timestamp(raw)
        .map(|value| value.timestamp_millis())
        .ok_or_else(|| AppError::bad_request(format!("`{name}` must be an RFC3339 timestamp")))
}

async fn changes_since(
    State(state): State<RelationalState>,
    Query(query): Query<ChangesQuery>,
) -> Result<Json<ChangesResponse>, AppError> {
    let since = query
        .since
        .as_deref()
        .map(|raw| timestamp_param("since", raw))
        .transpose()?;
    let entries = state.service.changes_since(since).await?;
    tracing::info!(count = entries.len(), "Served pending relational changes");
    Ok(Json(ChangesResponse::new(
        entries.into_iter().map(ChangeRecord::from).collect(),
    )))
}

async fn retry_backlog(
    State(state): State<RelationalState>,
    Query(query): Query<RetryQuery>,
) -> Result<Json<ChangesResponse>, AppError> {
    let raw = query
        .before
        .ok_or_else(|| AppError::bad_request("`before` is required"))?;
    let before = timestamp_param("before", &raw)?;
    let entries = state.service.retry_backlog(before).await?;
    Ok(Json(ChangesResponse::new(
        entries.into_iter().map(ChangeRecord::from).collect(),
    )))
}

async fn apply_changes(
    State(state): State<RelationalState>,
    payload: Result<Json<ApplyRequest>, JsonRejection>,
) -> Result<Json<ApplyResponse>, AppError> {
    let Json(request) = payload.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;
    let results = state.service.apply_changes(request.changes).await;
    Ok(Json(ApplyResponse { results }))
}

async fn mark_synced(
    State(state): State<RelationalState>,
    payload: Result<Json<MarkSyncedRequest>, JsonRejection>,
) -> Result<Json<MarkSyncedResponse>, AppError> {
    let Json(request) = payload.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;
    if request.sync_ids.is_empty() {
        return Err(AppError::bad_request("`sync_ids` must not be empty"));
    }
    let marked_synced = state.service.mark_synced(&request.sync_ids).await?;
    tracing::info!(
        requested = request.sync_ids.len(),
        count = marked_synced,
        "Marked relational changes synced"
    );
    Ok(Json(MarkSyncedResponse {
        success: true,
        marked_synced,
    }))
}

async fn mark_failed(
    State(state): State<RelationalState>,
    payload: Result<Json<MarkFailedRequest>, JsonRejection>,
) -> Result<Json<MarkFailedResponse>, AppError> {
    let Json(request) = payload.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;
    let marked = state.service.mark_failed(&request.failures).await?;
    Ok(Json(MarkFailedResponse {
        success: true,
        marked,
    }))
}

fn parse_key(raw: &str) -> Result<EntityKey, AppError> {
    Ok(EntityKey::parse(raw)?)
}

async fn get_member(
    State(state): State<RelationalState>,
    Path(entity_key): Path<String>,
) -> Result<Json<MemberRecord>, AppError> {
    let entity_key = parse_key(&entity_key)?;
    Ok(Json(state.service.get_member(&entity_key).await?))
}

async fn update_member(
    State(state): State<RelationalState>,
    Path(entity_key): Path<String>,
    payload: Result<Json<FieldChanges>, JsonRejection>,
) -> Result<Json<MemberRecord>, AppError> {
    let entity_key = parse_key(&entity_key)?;
    let Json(columns) = payload.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;
    if columns.is_empty() {
        return Err(AppError::bad_request("no columns to update"));
    }
    Ok(Json(state.service.update_member(&entity_key, &columns).await?))
}

async fn update_address(
    State(state): State<RelationalState>,
    Path(entity_key): Path<String>,
    payload: Result<Json<AddressUpdate>, JsonRejection>,
) -> Result<Json<MemberRecord>, AppError> {
    let entity_key = parse_key(&entity_key)?;
    let Json(address) = payload.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;
    Ok(Json(state.service.update_address(&entity_key, &address).await?))
}

async fn status(State(state): State<RelationalState>) -> Result<Json<StatusResponse>, AppError> {
    let summary = state.service.queue_summary().await?;
    Ok(Json(StatusResponse::from(summary)))
}

async fn receive_sync(
    State(state): State<ReplicaState>,
    payload: Result<Json<SyncMessage>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(message) = payload.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;
    message.validate()?;
    state
        .service
        .apply_sync_message(&message)
        .await
        .map_err(|error| match AppError::from(error) {
            bad @ AppError::BadRequest(_) => bad,
            other => AppError::Internal(other.to_string()),
        })?;
    tracing::info!(
        entity = %message.entity_key().masked(),
        action = %message.action(),
        "Applied pushed change"
    );
    Ok(Json(json!({ "success": true })))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{header, Method, StatusCode};
    use http_body_util::BodyExt;
    use pretty_assertions::assert_eq;
    use rollcall_core::models::MemberInput;
    use rollcall_core::secrets::{SecretCache, SecretSource};
    use tower::ServiceExt;

    use super::*;

    const TOKEN: &str = "test-token";
    const KEY: &str = "0101302989";

    fn verifier(source: SecretSource) -> TokenVerifier {
        let secrets = SecretCache::new(Duration::from_secs(60))
            .with_source("token", source)
            .shared();
        TokenVerifier::new(secrets, "token")
    }

    async fn relational() -> (RelationalService, Router) {
        let service = RelationalService::open_in_memory().await.unwrap();
        let router = relational_router(RelationalState::new(
            service.clone(),
            verifier(SecretSource::Value(TOKEN.into())),
        ));
        (service, router)
    }

    async fn replica(source: SecretSource) -> (ReplicaService, Router) {
        let service = ReplicaService::open_in_memory().await.unwrap();
        let router = replica_router(ReplicaState::new(service.clone(), verifier(source)));
        (service, router)
    }

    fn request(method: Method, uri: &str, body: Option<Value>) -> Request {
        let builder = axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"));
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(router: &Router, request: Request) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    async fn seed_member(service: &RelationalService) {
        service
            .create_member(
                EntityKey::parse(KEY).unwrap(),
                MemberInput {
                    name: "Anna".into(),
                    gender: 2,
                    ..MemberInput::default()
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn healthz_needs_no_token() {
        let (_, router) = relational().await;
        let request = axum::http::Request::builder()
            .uri("/healthz")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn protected_routes_reject_missing_or_wrong_token() {
        let (_, router) = relational().await;
        let missing = axum::http::Request::builder()
            .uri("/changes")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&router, missing).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].as_str().unwrap().contains("Authorization"));

        let wrong = axum::http::Request::builder()
            .uri("/status")
            .header(header::AUTHORIZATION, "Bearer nope")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&router, wrong).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn changes_then_mark_synced_drains_the_queue() {
        let (service, router) = relational().await;
        seed_member(&service).await;

        let (status, body) = send(&router, request(Method::GET, "/changes", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);
        assert_eq!(body["changes"][0]["action"], "create");
        assert_eq!(body["changes"][0]["fields_changed"]["gender"], 2);
        let id = body["changes"][0]["id"].as_i64().unwrap();

        let (status, _) = send(
            &router,
            request(Method::POST, "/mark-synced", Some(json!({"sync_ids": []}))),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, body) = send(
            &router,
            request(Method::POST, "/mark-synced", Some(json!({"sync_ids": [id]}))),
        )
        .await;
        assert_eq!(body, json!({"success": true, "marked_synced": 1}));
        let (_, body) = send(
            &router,
            request(Method::POST, "/mark-synced", Some(json!({"sync_ids": [id]}))),
        )
        .await;
        assert_eq!(body["marked_synced"], 0);

        let (_, body) = send(&router, request(Method::GET, "/status", None)).await;
        assert_eq!(body["pending"], 0);
        assert_eq!(body["synced"], 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn changes_rejects_malformed_since() {
        let (_, router) = relational().await;
        let (status, body) =
            send(&router, request(Method::GET, "/changes?since=yesterday", None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("RFC3339"));

        let (status, _) = send(&router, request(Method::GET, "/changes/retry", None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn apply_reports_each_item() {
        let (service, router) = relational().await;
        seed_member(&service).await;

        let body = json!({"changes": [
            {"entity_key": KEY, "action": "update", "changes": {"profile.phone": "555"}},
            {"entity_key": "12", "action": "update", "changes": {"profile.phone": "1"}},
        ]});
        let (status, body) = send(&router, request(Method::POST, "/apply", Some(body))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["results"][0]["status"], "success");
        assert_eq!(body["results"][0]["updated_fields"], json!(["phone"]));
        assert_eq!(body["results"][1]["status"], "rejected");

        let member = service.get_member(&EntityKey::parse(KEY).unwrap()).await.unwrap();
        assert_eq!(member.phone.as_deref(), Some("555"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn member_routes_read_and_update() {
        let (service, router) = relational().await;
        seed_member(&service).await;

        let (status, body) = send(&router, request(Method::GET, "/member/010130-2989", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Anna");

        let (status, body) = send(
            &router,
            request(Method::PATCH, &format!("/member/{KEY}"), Some(json!({"email": "a@b.se"}))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["email"], "a@b.se");

        let (status, body) = send(
            &router,
            request(
                Method::PUT,
                &format!("/member/{KEY}/address"),
                Some(json!({"street": "Storgatan 1", "city": "Lund"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["city"], "Lund");

        let (status, _) = send(&router, request(Method::GET, "/member/0202303979", None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&router, request(Method::GET, "/member/abc", None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn soft_deleted_member_is_not_found() {
        let (service, router) = relational().await;
        seed_member(&service).await;
        service
            .delete_member(&EntityKey::parse(KEY).unwrap())
            .await
            .unwrap();

        let (status, _) = send(&router, request(Method::GET, &format!("/member/{KEY}"), None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sync_applies_pushed_create() {
        let (service, router) = replica(SecretSource::Value(TOKEN.into())).await;
        let body = json!({
            "action": "create",
            "entity_key": KEY,
            "data": {"id": 4, "name": "Anna", "gender": 1}
        });
        let (status, _) = send(&router, request(Method::POST, "/sync", Some(body))).await;
        assert_eq!(status, StatusCode::OK);

        let stored = service
            .get_document(&EntityKey::parse(KEY).unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.document["profile"]["name"], "Anna");
        assert_eq!(stored.document["profile"]["gender"], "male");
        assert!(service.pending_changes(None).await.unwrap().is_empty());
        assert_eq!(service.recent_audit(10).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sync_rejects_malformed_messages() {
        let (_, router) = replica(SecretSource::Value(TOKEN.into())).await;
        for body in [
            json!({"action": "merge", "entity_key": KEY}),
            json!({"action": "update", "entity_key": "abc", "data": {"name": "A"}}),
            json!({"action": "update", "entity_key": KEY, "data": {}}),
        ] {
            let (status, _) = send(&router, request(Method::POST, "/sync", Some(body))).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sync_without_configured_token_is_a_server_error() {
        let (_, router) = replica(SecretSource::Missing).await;
        let body = json!({"action": "delete", "entity_key": KEY});
        let (status, _) = send(&router, request(Method::POST, "/sync", Some(body))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
