use axum::extract::Path;
use axum::Extension;
use axum::Json;
use chrono::{Duration, Utc};
use object_store::path::Path as ObjectPath;
use object_store::PutPayload;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::authz::AuthContext;
use crate::error::{Error, ErrorDetails};
use crate::gateway_util::{AppState, AppStateData, StructuredJson};
use crate::spend::month_key;
use crate::retention::{artifact_prefix_for, SubmissionRecord, RETENTION_DAYS};
use crate::tool::is_known_tool;

/// POST /v1/tools/{tool}
///
/// Runs a tool for an authorized visitor. The pipeline middleware has
/// already charged the rate limit and checked the spend cap by the time
/// this handler runs.
pub async fn tool_handler(
    axum::extract::State(state): AppState,
    Path(tool): Path<String>,
    Extension(context): Extension<AuthContext>,
    StructuredJson(payload): StructuredJson<Value>,
) -> Result<Json<Value>, Error> {
    if !is_known_tool(&tool) {
        return Err(Error::new(ErrorDetails::UnknownTool { tool }));
    }

    let outcome = state.tool_runner.run(&tool, &payload).await?;
    tracing::info!(
        tool = %tool,
        session_id = %context.session_id,
        input_tokens = outcome.usage.input_tokens,
        output_tokens = outcome.usage.output_tokens,
        "Tool run completed"
    );

    // The run already happened; a bookkeeping failure should not turn a
    // good answer into an error for the visitor.
    if let Err(e) = state
        .spend_tracker
        .record_usage(
            &month_key(Utc::now()),
            outcome.usage.input_tokens,
            outcome.usage.output_tokens,
        )
        .await
    {
        tracing::error!(error = %e, "Failed to record tool usage; month spend may undercount");
    }

    let submission_id = match archive_submission(&state, &tool, &outcome.output).await {
        Ok(id) => Some(id),
        Err(e) => {
            tracing::error!(error = %e, "Failed to archive submission");
            None
        }
    };

    Ok(Json(response_body(outcome.output, submission_id)))
}

/// Persist the tool output as a retained submission: artifact first, then
/// the index record, so the sweeper never sees a record without a prefix
/// it can delete under.
async fn archive_submission(
    state: &AppStateData,
    tool: &str,
    output: &Value,
) -> Result<String, Error> {
    let id = Uuid::new_v4().to_string();
    let artifact_prefix = artifact_prefix_for(&id);

    let bytes = serde_json::to_vec(output).map_err(|e| {
        Error::new(ErrorDetails::InternalError {
            message: format!("Failed to serialize tool output: {e}"),
        })
    })?;
    let location = ObjectPath::from(format!("{artifact_prefix}output.json"));
    state
        .artifact_store
        .put(&location, PutPayload::from(bytes))
        .await
        .map_err(|e| {
            Error::new(ErrorDetails::Storage {
                message: format!("Failed to write artifact {location}: {e}"),
            })
        })?;

    let now = Utc::now();
    state
        .submission_index
        .insert(&SubmissionRecord {
            id: id.clone(),
            tool: tool.to_string(),
            created_at: now,
            expires_at: now + Duration::days(RETENTION_DAYS),
            artifact_prefix,
        })
        .await?;
    Ok(id)
}

fn response_body(output: Value, submission_id: Option<String>) -> Value {
    let mut body = json!({ "success": true, "output": output });
    if let Some(id) = submission_id {
        body["submissionId"] = json!(id);
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_body_carries_output_verbatim() {
        let output = json!({"report": "## Fit\nGood match", "score": 8});
        let body = response_body(output.clone(), Some("abc".to_string()));
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["output"], output);
        assert_eq!(body["submissionId"], json!("abc"));

        let body = response_body(output, None);
        assert!(body.get("submissionId").is_none());
    }

    #[test]
    fn test_uuid_ids_survive_prefix_validation() {
        let id = Uuid::new_v4().to_string();
        crate::retention::validate_artifact_prefix(&artifact_prefix_for(&id)).unwrap();
    }
}
