//! Trigger admission endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::error::AppError;
use crate::state::AppState;
use crate::store::TriggerEvent;
use crate::triggers::AdmissionOutcome;

/// Admit a trigger and start the resulting execution.
///
/// POST /api/triggers/{trigger_type}
///
/// A duplicate is still `200 OK`, with `duplicate_prevented: true`.
pub async fn admit(
    State(state): State<AppState>,
    Path(trigger_type): Path<String>,
    Json(payload): Json<serde_json::Value>,
) -> Result<Json<AdmissionOutcome>, AppError> {
    let outcome = state.engine.admit_trigger(&trigger_type, &payload).await?;
    Ok(Json(outcome))
}

/// Queue a trigger for the next poll cycle.
///
/// POST /api/triggers/{trigger_type}/enqueue
pub async fn enqueue(
    State(state): State<AppState>,
    Path(trigger_type): Path<String>,
    Json(payload): Json<serde_json::Value>,
) -> Result<(StatusCode, Json<TriggerEvent>), AppError> {
    let event = state.engine.enqueue_trigger(&trigger_type, &payload).await?;
    Ok((StatusCode::ACCEPTED, Json(event)))
}

#[cfg(test)]
mod tests {
    use crate::handlers::test_support::{app, call};
    use crate::rules::{RuleDefinition, TriggerSpec};
    use crate::testing::{Harness, RecordingSender};
    use axum::http::StatusCode;
    use serde_json::json;

    fn harness(sender: &std::sync::Arc<RecordingSender>) -> Harness {
        Harness::new(
            vec![RuleDefinition::rule(
                "welcome",
                TriggerSpec::new("signup"),
                json!([{"action": "send_email"}]),
            )],
            &[sender],
        )
    }

    #[tokio::test]
    async fn test_admit_then_duplicate() {
        let sender = RecordingSender::new("send_email");
        let h = harness(&sender);
        let payload = json!({"id": "e1", "user_id": "u1"});

        let (status, body) =
            call(app(&h), "POST", "/api/triggers/signup", Some(payload.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["duplicate_prevented"], false);
        assert!(body["execution_id"].is_string());

        let (status, body) = call(app(&h), "POST", "/api/triggers/signup", Some(payload)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["duplicate_prevented"], true);
        assert_eq!(sender.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_payload_is_unprocessable() {
        let sender = RecordingSender::new("send_email");
        let h = harness(&sender);

        let (status, body) =
            call(app(&h), "POST", "/api/triggers/signup", Some(json!({"id": "e1"}))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap().contains("user_id"));

        let (status, _) = call(app(&h), "POST", "/api/triggers/refund", Some(json!({}))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_enqueue_accepts() {
        let sender = RecordingSender::new("send_email");
        let h = harness(&sender);

        let (status, body) = call(
            app(&h),
            "POST",
            "/api/triggers/signup/enqueue",
            Some(json!({"id": "e1", "user_id": "u1"})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["processed"], false);
        assert!(sender.calls().is_empty());
    }
}
