//! REST endpoints driving a participant through the study.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::FlowError;

use super::manager::{ChatOutcome, StepOutcome, StudyManager};
use super::model::{
    Education, Employment, Gender, MAX_AGE, MAX_RATING, MIN_AGE, MIN_RATING, POSTTEST_SECTIONS,
    PRETEST_SECTIONS, REFLECTION_PROMPT,
};
use super::session::{FeedbackSubmission, PosttestSubmission, PretestSubmission, SessionView};

/// Shared state for study routes.
#[derive(Clone)]
pub struct StudyRouteState {
    pub manager: Arc<StudyManager>,
}

#[derive(Debug, Deserialize)]
struct ConsentRequest {
    agreed: bool,
}

#[derive(Debug, Deserialize)]
struct MessageRequest {
    text: String,
}

impl IntoResponse for FlowError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        match self {
            FlowError::Validation { issues } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(serde_json::json!({"error": message, "issues": issues})),
            )
                .into_response(),
            FlowError::SessionNotFound(_) => (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({"error": message})),
            )
                .into_response(),
            FlowError::InvalidAction { .. } => (
                StatusCode::CONFLICT,
                Json(serde_json::json!({"error": message})),
            )
                .into_response(),
            FlowError::ChatLocked { remaining } => (
                StatusCode::CONFLICT,
                Json(serde_json::json!({
                    "error": message,
                    "remaining_secs": remaining.as_secs_f64().ceil() as u64,
                })),
            )
                .into_response(),
        }
    }
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "study-runner"
    }))
}

/// GET /api/instruments
///
/// Everything a client needs to render the two surveys.
async fn instruments() -> impl IntoResponse {
    Json(serde_json::json!({
        "rating": {"min": MIN_RATING, "max": MAX_RATING},
        "demographics": {
            "age": {"min": MIN_AGE, "max": MAX_AGE},
            "gender": Gender::labels(),
            "education": Education::labels(),
            "employment": Employment::labels(),
        },
        "pretest": PRETEST_SECTIONS,
        "posttest": POSTTEST_SECTIONS,
        "reflection_prompt": REFLECTION_PROMPT,
    }))
}

async fn start_session(State(state): State<StudyRouteState>) -> impl IntoResponse {
    let view = state.manager.start_session().await;
    (StatusCode::CREATED, Json(view))
}

async fn get_session(
    State(state): State<StudyRouteState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, FlowError> {
    state.manager.view(id).await.map(Json)
}

async fn end_session(
    State(state): State<StudyRouteState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, FlowError> {
    state.manager.end_session(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn consent(
    State(state): State<StudyRouteState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ConsentRequest>,
) -> Result<Json<StepOutcome>, FlowError> {
    state.manager.consent(id, req.agreed).await.map(Json)
}

async fn pretest(
    State(state): State<StudyRouteState>,
    Path(id): Path<Uuid>,
    Json(req): Json<PretestSubmission>,
) -> Result<Json<StepOutcome>, FlowError> {
    state.manager.submit_pretest(id, &req).await.map(Json)
}

async fn begin_chat(
    State(state): State<StudyRouteState>,
    Path(id): Path<Uuid>,
) -> Result<Json<StepOutcome>, FlowError> {
    state.manager.begin_chat(id).await.map(Json)
}

async fn send_message(
    State(state): State<StudyRouteState>,
    Path(id): Path<Uuid>,
    Json(req): Json<MessageRequest>,
) -> Result<Json<ChatOutcome>, FlowError> {
    state.manager.send_message(id, &req.text).await.map(Json)
}

async fn end_chat(
    State(state): State<StudyRouteState>,
    Path(id): Path<Uuid>,
) -> Result<Json<StepOutcome>, FlowError> {
    state.manager.end_chat(id).await.map(Json)
}

async fn posttest(
    State(state): State<StudyRouteState>,
    Path(id): Path<Uuid>,
    Json(req): Json<PosttestSubmission>,
) -> Result<Json<StepOutcome>, FlowError> {
    state.manager.submit_posttest(id, &req).await.map(Json)
}

async fn feedback(
    State(state): State<StudyRouteState>,
    Path(id): Path<Uuid>,
    Json(req): Json<FeedbackSubmission>,
) -> Result<Json<StepOutcome>, FlowError> {
    state.manager.submit_feedback(id, &req).await.map(Json)
}

async fn finish(
    State(state): State<StudyRouteState>,
    Path(id): Path<Uuid>,
) -> Result<Json<StepOutcome>, FlowError> {
    state.manager.finish_without_feedback(id).await.map(Json)
}

/// Build the study REST routes.
pub fn study_routes(state: StudyRouteState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/instruments", get(instruments))
        .route("/api/sessions", post(start_session))
        .route("/api/sessions/{id}", get(get_session).delete(end_session))
        .route("/api/sessions/{id}/consent", post(consent))
        .route("/api/sessions/{id}/pretest", post(pretest))
        .route("/api/sessions/{id}/chat/begin", post(begin_chat))
        .route("/api/sessions/{id}/chat/messages", post(send_message))
        .route("/api/sessions/{id}/chat/end", post(end_chat))
        .route("/api/sessions/{id}/posttest", post(posttest))
        .route("/api/sessions/{id}/feedback", post(feedback))
        .route("/api/sessions/{id}/finish", post(finish))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::FieldIssue;

    #[test]
    fn flow_errors_map_to_status_codes() {
        let cases = [
            (
                FlowError::validation(vec![FieldIssue::new("agreed", "required")]),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                FlowError::SessionNotFound(Uuid::new_v4()),
                StatusCode::NOT_FOUND,
            ),
            (
                FlowError::InvalidAction {
                    screen: "consent".into(),
                    action: "end_chat".into(),
                },
                StatusCode::CONFLICT,
            ),
            (
                FlowError::ChatLocked {
                    remaining: Duration::from_millis(1500),
                },
                StatusCode::CONFLICT,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }
}
