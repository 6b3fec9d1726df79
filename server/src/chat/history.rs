use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::auth::middleware::Claims;
use crate::chat::{DirectMessage, Identity};
use crate::state::AppState;

/// GET /api/auth/messages/{other_id}
/// Messages between the caller and `other_id`, oldest first. JWT auth required.
pub async fn get_history(
    State(state): State<AppState>,
    claims: Claims,
    Path(other_id): Path<String>,
) -> Result<Json<Vec<DirectMessage>>, (StatusCode, Json<serde_json::Value>)> {
    let me = Identity::new(claims.sub);
    let other = Identity::new(other_id);

    state
        .coordinator
        .history(me.clone(), other)
        .await
        .map(Json)
        .map_err(|e| {
            tracing::error!(user_id = %me, error = %e, "History query failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "msg": "Server error" })),
            )
        })
}
