//! Settings API endpoints for reading and hot-reloading runtime configuration.

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::api::AppState;
use crate::error::ServiceResult;

/// Response for GET /api/settings
#[derive(Debug, Serialize)]
pub struct SettingsResponse {
    /// All current settings (merged: defaults + DB overrides)
    pub settings: HashMap<String, serde_json::Value>,
    /// Which keys have DB overrides (vs using defaults)
    pub overridden: Vec<String>,
}

/// Request body for PUT /api/settings
#[derive(Debug, Deserialize)]
pub struct UpdateSettingsRequest {
    /// Settings to update (key -> value). Use null to delete/revert to default.
    pub settings: HashMap<String, serde_json::Value>,
}

/// GET /api/settings - retrieve all settings with their current values
pub async fn get_settings_handler(
    State(state): State<Arc<AppState>>,
) -> ServiceResult<Json<SettingsResponse>> {
    // Get DB overrides to know which keys are explicitly set
    let db_settings = state.service.db.get_all_settings()?;

    let mut overridden: Vec<String> = db_settings.keys().cloned().collect();
    overridden.sort_unstable();

    Ok(Json(SettingsResponse {
        settings: state.service.get_settings(),
        overridden,
    }))
}

/// PUT /api/settings - update settings (triggers hot reload)
pub async fn update_settings_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<UpdateSettingsRequest>,
) -> ServiceResult<Json<SettingsResponse>> {
    state.service.update_settings(request.settings)?;

    // Return updated settings
    get_settings_handler(State(state)).await
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode, header};
    use tower::ServiceExt;

    use crate::api::tests::{json_body, test_router};
    use crate::service::testing::TestHarness;

    fn put_settings(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(Method::PUT)
            .uri("/api/settings")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_put_then_get_reports_override() {
        let harness = TestHarness::new();
        let router = test_router(&harness);

        let response = router
            .clone()
            .oneshot(put_settings(serde_json::json!({
                "settings": { "ocr.language": "deu" }
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(Request::get("/api/settings").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = json_body(response).await;
        assert_eq!(json["settings"]["ocr.language"], "deu");
        assert_eq!(json["overridden"], serde_json::json!(["ocr.language"]));
    }

    #[tokio::test]
    async fn test_unknown_key_is_rejected() {
        let harness = TestHarness::new();
        let response = test_router(&harness)
            .oneshot(put_settings(serde_json::json!({
                "settings": { "embedding.model": "x" }
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["code"], "invalid_request");
    }

    #[tokio::test]
    async fn test_ocr_executable_is_not_writable() {
        let harness = TestHarness::new();
        let response = test_router(&harness)
            .oneshot(put_settings(serde_json::json!({
                "settings": { "ocr.tesseract_cmd": "/usr/bin/env" }
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["code"], "invalid_request");
    }
}
