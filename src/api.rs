use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::controller::{ErrorView, FeedView};
use crate::error::{FetchError, FetchErrorKind};
use crate::post::{Post, Session};
use crate::triggers::{FeedTriggers, Trigger, TriggerOutcome};

/// Router state. The session lives here, on the trigger-source side, and is
/// lent to the controller per call.
#[derive(Clone)]
pub struct AppState {
    pub triggers: FeedTriggers,
    pub session: Session,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/feed", get(feed_view))
        .route("/feed/more", post(feed_more))
        .route("/feed/refresh", post(feed_refresh))
        .route("/feed/reset", post(feed_reset))
        .route("/feed/posts", post(feed_compose))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

pub struct ApiError(FetchError);

impl From<FetchError> for ApiError {
    fn from(e: FetchError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            FetchErrorKind::AuthRequired => StatusCode::UNAUTHORIZED,
            FetchErrorKind::NetworkFailure | FetchErrorKind::MalformedResponse => {
                StatusCode::BAD_GATEWAY
            }
        };
        (status, Json(ErrorView::from(&self.0))).into_response()
    }
}

type ApiResult = Result<Json<TriggerOutcome>, ApiError>;

async fn feed_view(State(state): State<AppState>) -> Json<FeedView> {
    Json(state.triggers.controller().view())
}

async fn run(state: &AppState, trigger: Trigger) -> ApiResult {
    let outcome = state.triggers.dispatch(&state.session, trigger).await?;
    Ok(Json(outcome))
}

async fn feed_more(State(state): State<AppState>) -> ApiResult {
    run(&state, Trigger::NearEnd).await
}

async fn feed_refresh(State(state): State<AppState>) -> ApiResult {
    run(&state, Trigger::TimerTick).await
}

async fn feed_reset(State(state): State<AppState>) -> ApiResult {
    run(&state, Trigger::ContextSwitch).await
}

async fn feed_compose(State(state): State<AppState>, Json(post): Json<Post>) -> ApiResult {
    run(&state, Trigger::ComposeSuccess(post)).await
}
