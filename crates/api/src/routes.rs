//! HTTP routes
//!
//! | Route | Quota | Breaker |
//! |-------|-------|---------|
//! | `POST /api/generate/image` | `image_generation` | `image-gen` |
//! | `POST /api/generate/story` | `default` | `story-gen` |
//! | `GET /api/health/dependencies` | none | none |

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use taleweaver_common::error::ErrorKind;
use taleweaver_common::resilience::{
    CircuitBreakerMetrics, CircuitState, Clock, DependencyCall, DEFAULT_LIMIT_TYPE, IMAGE_GENERATION_LIMIT,
};
use taleweaver_domain::constants::{
    DEPENDENCY_IMAGE_GEN, DEPENDENCY_STORY_GEN, ROUTE_DEPENDENCY_HEALTH, ROUTE_GENERATE_IMAGE,
    ROUTE_GENERATE_STORY,
};
use taleweaver_domain::{
    ImageGenerationRequest, ImageGenerationResponse, StoryGenerationRequest,
    StoryGenerationResponse,
};

use crate::backend::{classify_backend_error, BackendError};
use crate::error::ApiError;
use crate::middleware::{rate_limit, RouteLimit};
use crate::state::AppState;

/// Build the application router
pub fn router<C: Clock>(state: AppState<C>) -> Router {
    let image = Router::new().route(ROUTE_GENERATE_IMAGE, post(generate_image::<C>)).route_layer(
        from_fn_with_state(
            RouteLimit::new(Arc::clone(&state.limiter), IMAGE_GENERATION_LIMIT),
            rate_limit::<C>,
        ),
    );
    let story = Router::new().route(ROUTE_GENERATE_STORY, post(generate_story::<C>)).route_layer(
        from_fn_with_state(
            RouteLimit::new(Arc::clone(&state.limiter), DEFAULT_LIMIT_TYPE),
            rate_limit::<C>,
        ),
    );

    Router::new()
        .merge(image)
        .merge(story)
        .route(ROUTE_DEPENDENCY_HEALTH, get(dependency_health::<C>))
        .with_state(state)
}

fn call_for(
    dependency: &'static str,
    operation: &'static str,
) -> Result<DependencyCall<impl Fn(&BackendError) -> ErrorKind + Send + Sync>, ApiError> {
    DependencyCall::new(dependency, operation, move |err: &BackendError| {
        classify_backend_error(err, dependency)
    })
    .map_err(|e| ApiError::from(anyhow::Error::new(e)))
}

async fn generate_image<C: Clock>(
    State(state): State<AppState<C>>,
    payload: Result<Json<ImageGenerationRequest>, JsonRejection>,
) -> Result<Json<ImageGenerationResponse>, ApiError> {
    let Json(request) = payload.map_err(|r| ApiError::from_rejection("generate_image", &r))?;
    request.validate().map_err(|v| ApiError::validation("generate_image", &v))?;

    let call = call_for(DEPENDENCY_IMAGE_GEN, "generate_image")?;
    let cancel = state.shutdown.child_token();
    let backend = &state.backend;
    let response = state
        .executor
        .execute(&call, &state.policy, &cancel, || backend.generate_image(&request))
        .await
        .map_err(ApiError::from)?;

    Ok(Json(response))
}

async fn generate_story<C: Clock>(
    State(state): State<AppState<C>>,
    payload: Result<Json<StoryGenerationRequest>, JsonRejection>,
) -> Result<Json<StoryGenerationResponse>, ApiError> {
    let Json(request) = payload.map_err(|r| ApiError::from_rejection("generate_story", &r))?;
    request.validate().map_err(|v| ApiError::validation("generate_story", &v))?;

    let call = call_for(DEPENDENCY_STORY_GEN, "generate_story")?;
    let cancel = state.shutdown.child_token();
    let backend = &state.backend;
    let response = state
        .executor
        .execute(&call, &state.policy, &cancel, || backend.generate_story(&request))
        .await
        .map_err(ApiError::from)?;

    Ok(Json(response))
}

/// Breaker view for operators and the health probe
#[derive(Debug, Serialize)]
pub struct DependencyHealth {
    /// True when every breaker is closed
    pub healthy: bool,
    pub dependencies: Vec<CircuitBreakerMetrics>,
}

async fn dependency_health<C: Clock>(State(state): State<AppState<C>>) -> Json<DependencyHealth> {
    let dependencies = state.executor.breakers().snapshot();
    let healthy = dependencies.iter().all(|metrics| metrics.state == CircuitState::Closed);
    Json(DependencyHealth { healthy, dependencies })
}
