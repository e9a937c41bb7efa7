// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Service Broker HTTP API
//!
//! Open Service Broker v2 routes over a [`BrokerService`]. Everything under
//! `/v2` requires HTTP basic authentication and an `X-Broker-API-Version`
//! header; `/health` is open.
//!
//! | Method | Path | Operation |
//! |--------|------|-----------|
//! | GET | `/v2/catalog` | services |
//! | PUT | `/v2/service_instances/{instance_id}` | provision |
//! | GET | `/v2/service_instances/{instance_id}` | get_instance |
//! | PATCH | `/v2/service_instances/{instance_id}` | update |
//! | DELETE | `/v2/service_instances/{instance_id}` | deprovision |
//! | GET | `/v2/service_instances/{instance_id}/last_operation` | last_operation |
//! | PUT | `/v2/service_instances/{instance_id}/service_bindings/{binding_id}` | bind |
//! | DELETE | `/v2/service_instances/{instance_id}/service_bindings/{binding_id}` | unbind |

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{Path, Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use subtle::ConstantTimeEq;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::application::broker::{BrokerError, BrokerService, ProvisionDetails};
use crate::domain::service::{BindDetails, BindResource};

pub const API_VERSION_HEADER: &str = "X-Broker-API-Version";

/// Credentials the platform must present on every `/v2` request
#[derive(Clone)]
pub struct BrokerCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for BrokerCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl BrokerCredentials {
    fn matches(&self, username: &str, password: &str) -> bool {
        let user_ok = self.username.as_bytes().ct_eq(username.as_bytes());
        let pass_ok = self.password.as_bytes().ct_eq(password.as_bytes());
        (user_ok & pass_ok).into()
    }
}

struct ApiState {
    broker: Arc<dyn BrokerService>,
    credentials: BrokerCredentials,
    start_time: Instant,
}

pub fn app(broker: Arc<dyn BrokerService>, credentials: BrokerCredentials) -> Router {
    let state = Arc::new(ApiState {
        broker,
        credentials,
        start_time: Instant::now(),
    });

    let v2 = Router::new()
        .route("/catalog", get(catalog_handler))
        .route(
            "/service_instances/{instance_id}",
            put(provision_handler)
                .get(get_instance_handler)
                .patch(update_handler)
                .delete(deprovision_handler),
        )
        .route(
            "/service_instances/{instance_id}/last_operation",
            get(last_operation_handler),
        )
        .route(
            "/service_instances/{instance_id}/service_bindings/{binding_id}",
            put(bind_handler).delete(unbind_handler),
        )
        .route_layer(middleware::from_fn(require_api_version))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_basic_auth));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/v2", v2)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Errors
// ============================================================================

/// Error response body: `{"error": <code>, "description": <message>}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    description: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, description: impl Into<String>) -> Self {
        Self {
            status,
            code,
            description: description.into(),
        }
    }

    /// Error raised by a specific broker operation. Missing records are 410
    /// on deletes and 404 elsewhere.
    fn from_broker(err: BrokerError) -> Self {
        let status = match &err {
            BrokerError::InstanceAlreadyExists | BrokerError::BindingAlreadyExists => {
                StatusCode::CONFLICT
            }
            BrokerError::InstanceDoesNotExist => StatusCode::NOT_FOUND,
            BrokerError::InstanceGone | BrokerError::BindingGone => StatusCode::GONE,
            BrokerError::RawParamsInvalid
            | BrokerError::AppGuidNotProvided
            | BrokerError::BindOverride(_)
            | BrokerError::UpdateNotSupported => StatusCode::UNPROCESSABLE_ENTITY,
            BrokerError::InvalidConfiguration(_)
            | BrokerError::InvalidReadOnly(_)
            | BrokerError::MountOptions(_)
            | BrokerError::UnrecognizedOperation => StatusCode::BAD_REQUEST,
            BrokerError::Store(_) | BrokerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!("Broker operation failed: {}", err);
        } else {
            debug!("Broker operation rejected ({}): {}", status, err);
        }
        Self::new(status, err.code(), err.to_string())
    }
}

impl From<BrokerError> for ApiError {
    fn from(err: BrokerError) -> Self {
        Self::from_broker(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({
                "error": self.code,
                "description": self.description,
            })),
        )
            .into_response()
    }
}

// ============================================================================
// Middleware
// ============================================================================

async fn require_basic_auth(
    State(state): State<Arc<ApiState>>,
    request: Request,
    next: Next,
) -> Response {
    let authorized = basic_credentials(request.headers())
        .map(|(user, pass)| state.credentials.matches(&user, &pass))
        .unwrap_or(false);

    if !authorized {
        warn!("Rejected unauthenticated request to {}", request.uri().path());
        let mut response = ApiError::new(StatusCode::UNAUTHORIZED, "unauthorized", "Not Authorized")
            .into_response();
        response.headers_mut().insert(
            header::WWW_AUTHENTICATE,
            header::HeaderValue::from_static("Basic realm=\"nfsbroker\""),
        );
        return response;
    }

    next.run(request).await
}

fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

async fn require_api_version(request: Request, next: Next) -> Response {
    if request.headers().get(API_VERSION_HEADER).is_none() {
        return ApiError::new(
            StatusCode::PRECONDITION_FAILED,
            "missing-api-version",
            format!("{} Header not set", API_VERSION_HEADER),
        )
        .into_response();
    }
    next.run(request).await
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler(State(state): State<Arc<ApiState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "uptime_seconds": state.start_time.elapsed().as_secs(),
    }))
}

async fn catalog_handler(State(state): State<Arc<ApiState>>) -> Json<serde_json::Value> {
    Json(json!({ "services": state.broker.services().services }))
}

async fn provision_handler(
    State(state): State<Arc<ApiState>>,
    Path(instance_id): Path<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let details: ProvisionDetails = parse_body(&body)?;
    let provisioned = state.broker.provision(&instance_id, details).await?;

    let status = if provisioned.already_existed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(json!({}))).into_response())
}

async fn get_instance_handler(
    State(state): State<Arc<ApiState>>,
    Path(instance_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let spec = state.broker.get_instance(&instance_id).await?;
    Ok(Json(json!(spec)))
}

async fn update_handler(
    State(state): State<Arc<ApiState>>,
    Path(instance_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.broker.update(&instance_id).await?;
    Ok(Json(json!({})))
}

async fn deprovision_handler(
    State(state): State<Arc<ApiState>>,
    Path(instance_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.broker.deprovision(&instance_id).await?;
    Ok(Json(json!({})))
}

async fn last_operation_handler(
    State(state): State<Arc<ApiState>>,
    Path(instance_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let operation = query.get("operation").map(String::as_str).unwrap_or("");
    state.broker.last_operation(&instance_id, operation).await?;
    Ok(Json(json!({ "state": "succeeded" })))
}

#[derive(Debug, Deserialize)]
struct BindRequest {
    #[serde(default)]
    app_guid: String,
    #[serde(default)]
    plan_id: String,
    #[serde(default)]
    service_id: String,
    #[serde(default)]
    bind_resource: Option<BindResource>,
    #[serde(default)]
    parameters: Option<serde_json::Value>,
}

impl TryFrom<BindRequest> for BindDetails {
    type Error = BrokerError;

    fn try_from(request: BindRequest) -> Result<Self, Self::Error> {
        let parameters = match request.parameters {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::Object(map)) => Some(map),
            Some(_) => return Err(BrokerError::RawParamsInvalid),
        };

        Ok(BindDetails {
            app_guid: request.app_guid,
            plan_id: request.plan_id,
            service_id: request.service_id,
            bind_resource: request.bind_resource,
            parameters,
        })
    }
}

async fn bind_handler(
    State(state): State<Arc<ApiState>>,
    Path((instance_id, binding_id)): Path<(String, String)>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request: BindRequest = parse_body(&body)?;
    let details = BindDetails::try_from(request)?;
    let outcome = state.broker.bind(&instance_id, &binding_id, details).await?;

    let status = if outcome.already_existed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(outcome.binding)).into_response())
}

async fn unbind_handler(
    State(state): State<Arc<ApiState>>,
    Path((instance_id, binding_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.broker.unbind(&instance_id, &binding_id).await?;
    Ok(Json(json!({})))
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| {
        ApiError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "invalid-request-body",
            format!("Invalid request body: {}", e),
        )
    })
}
