mod documents;
mod ingredients;
mod users;

use axum::{
    extract::{DefaultBodyLimit, FromRequest, Request, State},
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use nutri_core::AppConfig;
use nutri_db::{Readiness, Store};
use serde::Serialize;
use serde_json::Value;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::middleware::{
    panic_to_unhandled, parse_cookies, render_unhandled_errors, request_id, resolve_client,
    ErrorPolicy, ProxyTrust, UnhandledError,
};

/// Request bodies larger than this are refused before parsing.
const JSON_BODY_LIMIT: usize = 100 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
}

/// Failures a handler can return. Everything except the explicit client
/// outcomes becomes an unhandled error rendered by the terminal middleware.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Unauthorized(&'static str),
    Unhandled(anyhow::Error),
}

#[derive(Debug, Serialize)]
struct MessageBody {
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(MessageBody { message })).into_response()
            }
            ApiError::Unauthorized(message) => (
                StatusCode::UNAUTHORIZED,
                Json(MessageBody {
                    message: message.to_string(),
                }),
            )
                .into_response(),
            ApiError::Unhandled(error) => UnhandledError(error.to_string().into()).into_response(),
        }
    }
}

impl From<nutri_db::DbError> for ApiError {
    fn from(error: nutri_db::DbError) -> Self {
        ApiError::Unhandled(error.into())
    }
}

/// JSON request body. Malformed or oversized bodies surface as unhandled
/// errors, like any other failure in the request pipeline.
#[derive(Debug)]
pub(crate) struct JsonBody(pub Value);

impl<S> FromRequest<S> for JsonBody
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<Value>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(ApiError::Unhandled(anyhow::anyhow!(rejection.body_text()))),
        }
    }
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct HealthData {
    status: &'static str,
    store: String,
}

pub(super) fn normalize_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(50).clamp(1, 200)
}

fn build_cors(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(origin, error = %e, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-requested-with"),
            header::ACCEPT,
            header::COOKIE,
        ])
        .allow_credentials(true)
}

/// Assembles the HTTP application: middleware in registration order, the two
/// route groups, and the terminal error stage.
pub fn build_app(store: Store, config: &AppConfig) -> Router {
    let routes = Router::new()
        .route("/health", get(health))
        .nest("/ingredients", ingredients::router(store.clone()))
        .nest("/users", users::router(store.clone()));

    with_middleware(routes, store, config)
}

fn with_middleware(routes: Router<AppState>, store: Store, config: &AppConfig) -> Router {
    let policy = ErrorPolicy {
        expose_details: config.exposes_error_details(),
    };

    routes
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn(request_id))
                .layer(DefaultBodyLimit::max(JSON_BODY_LIMIT))
                .layer(axum::middleware::from_fn(parse_cookies))
                .layer(axum::middleware::from_fn_with_state(
                    ProxyTrust { hops: 1 },
                    resolve_client,
                ))
                .layer(build_cors(&config.allowed_origins))
                .layer(axum::middleware::from_fn_with_state(
                    policy,
                    render_unhandled_errors,
                ))
                .layer(CatchPanicLayer::custom(panic_to_unhandled)),
        )
        .with_state(AppState { store })
}

/// Probes the store; also the recovery path out of a degraded store.
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let readiness = state.store.refresh_readiness().await;
    let status = match readiness {
        Readiness::Ready => StatusCode::OK,
        Readiness::Connecting | Readiness::Degraded => StatusCode::SERVICE_UNAVAILABLE,
    };

    (
        status,
        Json(HealthData {
            status: if status == StatusCode::OK { "ok" } else { "degraded" },
            store: readiness.to_string(),
        }),
    )
}
