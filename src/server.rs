use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::json;
use tokio::sync::Semaphore;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::errors::{LesionSegError, Result};
use crate::lesion::LesionType;
use crate::traits::LesionInference;
use crate::InferenceResult;

/// Shared handler state: the pipeline plus the admission limiter in front of it.
#[derive(Clone)]
pub struct AppState {
    analyzer: Arc<dyn LesionInference>,
    limiter: Arc<Semaphore>,
}

impl AppState {
    pub fn new(analyzer: Arc<dyn LesionInference>, max_concurrent_inferences: usize) -> Self {
        Self {
            analyzer,
            limiter: Arc::new(Semaphore::new(max_concurrent_inferences.max(1))),
        }
    }

    /// Run one pipeline once a permit is free.
    async fn infer(&self, lesion: LesionType, image_url: &str) -> Result<InferenceResult> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|e| LesionSegError::inference("admission", e))?;
        self.analyzer.infer(lesion, image_url).await
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/detect", post(detect))
        .route("/:lesion_type", post(infer_lesion))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct ImageRequest {
    pub image: String,
}

/// `{ "detail": ... }` error body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl From<LesionSegError> for ApiError {
    fn from(err: LesionSegError) -> Self {
        if err.is_client_error() {
            warn!(error = %err, "request rejected");
        } else {
            let source = std::error::Error::source(&err).map(ToString::to_string);
            error!(error = %err, source = ?source, "request failed");
        }
        Self {
            status: StatusCode::from_u16(err.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            detail: err.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        warn!(error = %rejection, "malformed request body");
        Self {
            status: rejection.status(),
            detail: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn infer_lesion(
    State(state): State<AppState>,
    Path(lesion_type): Path<String>,
    body: std::result::Result<Json<ImageRequest>, JsonRejection>,
) -> std::result::Result<Json<InferenceResult>, ApiError> {
    let lesion: LesionType = lesion_type.parse()?;
    let Json(request) = body?;

    let result = state.infer(lesion, &request.image).await?;
    Ok(Json(result))
}

/// Requested lesion types: `"all"`, one key, or a list of keys.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum DetectTypes {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Deserialize)]
pub struct DetectRequest {
    #[serde(rename = "imageURL")]
    pub image_url: Option<String>,
    pub types: Option<DetectTypes>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionSummary {
    pub status: bool,
    pub confidence: f64,
    pub mask_image: Option<String>,
    pub labeled_image: Option<String>,
    pub heatmap_image: Option<String>,
}

impl DetectionSummary {
    fn failed() -> Self {
        Self {
            status: false,
            confidence: 0.0,
            mask_image: None,
            labeled_image: None,
            heatmap_image: None,
        }
    }
}

impl From<InferenceResult> for DetectionSummary {
    fn from(result: InferenceResult) -> Self {
        Self {
            status: result.status,
            confidence: result.confidence,
            mask_image: Some(result.mask_url),
            labeled_image: Some(result.labeled_url),
            heatmap_image: Some(result.heatmap_url),
        }
    }
}

/// Per-type summaries serialized as a JSON object in request order.
#[derive(Debug, Default)]
pub struct DetectResults(Vec<(String, DetectionSummary)>);

impl DetectResults {
    fn push(&mut self, name: String, summary: DetectionSummary) {
        self.0.push((name, summary));
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for DetectResults {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(name, summary)| (name, summary)))
    }
}

#[derive(Debug, Serialize)]
pub struct DetectResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<DetectResults>,
}

impl DetectResponse {
    fn rejected(message: impl Into<String>) -> (StatusCode, Json<Self>) {
        (
            StatusCode::BAD_REQUEST,
            Json(Self {
                success: false,
                message: message.into(),
                results: None,
            }),
        )
    }
}

/// Resolve requested names to lesion types, keyed by the name the client used.
fn resolve_types(types: DetectTypes) -> Result<Vec<(String, LesionType)>> {
    let names = match types {
        DetectTypes::One(name) if name == "all" => LesionType::ALL
            .iter()
            .map(|lesion| lesion.key().to_string())
            .collect(),
        DetectTypes::One(name) => vec![name],
        DetectTypes::Many(names) => names,
    };

    let mut resolved: Vec<(String, LesionType)> = Vec::with_capacity(names.len());
    for name in names {
        let lesion: LesionType = name.parse()?;
        if !resolved.iter().any(|(seen, _)| *seen == name) {
            resolved.push((name, lesion));
        }
    }
    Ok(resolved)
}

async fn detect(
    State(state): State<AppState>,
    body: std::result::Result<Json<DetectRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => return DetectResponse::rejected(rejection.body_text()).into_response(),
    };
    let (Some(image_url), Some(types)) = (request.image_url, request.types) else {
        return DetectResponse::rejected("Image and detection types are required").into_response();
    };
    let lesions = match resolve_types(types) {
        Ok(lesions) => lesions,
        Err(err) => return DetectResponse::rejected(err.to_string()).into_response(),
    };

    let mut results = DetectResults::default();
    for (name, lesion) in lesions {
        let summary = match state.infer(lesion, &image_url).await {
            Ok(result) => result.into(),
            Err(err) => {
                warn!(%lesion, error = %err, "detection failed for lesion type");
                DetectionSummary::failed()
            }
        };
        results.push(name, summary);
    }
    info!(count = results.len(), "aggregate detection completed");

    Json(DetectResponse {
        success: true,
        message: "Detection completed successfully".to_string(),
        results: Some(results),
    })
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_all() -> Result<()> {
        let resolved = resolve_types(DetectTypes::One("all".to_string()))?;
        let lesions: Vec<_> = resolved.iter().map(|(_, lesion)| *lesion).collect();
        assert_eq!(lesions, LesionType::ALL.to_vec());
        Ok(())
    }

    #[test]
    fn test_resolve_keeps_client_names() -> Result<()> {
        let resolved = resolve_types(DetectTypes::Many(vec![
            "pigmentNetwork".to_string(),
            "streaks".to_string(),
            "streaks".to_string(),
        ]))?;

        assert_eq!(
            resolved,
            vec![
                ("pigmentNetwork".to_string(), LesionType::Pigment),
                ("streaks".to_string(), LesionType::Streaks),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_resolve_rejects_unknown() {
        let err = resolve_types(DetectTypes::Many(vec![
            "globules".to_string(),
            "freckles".to_string(),
        ]))
        .unwrap_err();
        assert!(matches!(err, LesionSegError::InvalidLesionType { ref key } if key == "freckles"));
    }

    #[test]
    fn test_detect_types_accepts_string_or_list() {
        let one: DetectRequest =
            serde_json::from_str(r#"{"imageURL":"http://a","types":"globules"}"#).unwrap();
        assert!(matches!(one.types, Some(DetectTypes::One(ref t)) if t == "globules"));

        let many: DetectRequest =
            serde_json::from_str(r#"{"imageURL":"http://a","types":["milia","negative"]}"#)
                .unwrap();
        assert!(matches!(many.types, Some(DetectTypes::Many(ref t)) if t.len() == 2));

        let missing: DetectRequest = serde_json::from_str(r#"{"types":"all"}"#).unwrap();
        assert!(missing.image_url.is_none());
    }

    #[test]
    fn test_detect_results_keep_request_order() {
        let mut results = DetectResults::default();
        results.push("streaks".to_string(), DetectionSummary::failed());
        results.push("globules".to_string(), DetectionSummary::failed());
        let response = DetectResponse {
            success: true,
            message: "ok".to_string(),
            results: Some(results),
        };

        let json = serde_json::to_string(&response).unwrap();
        let streaks = json.find("\"streaks\"").unwrap();
        let globules = json.find("\"globules\"").unwrap();
        assert!(streaks < globules, "{json}");

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["results"]["globules"]["status"], false);
        assert!(value["results"]["streaks"]["maskImage"].is_null());
    }

    #[test]
    fn test_error_status_mapping() {
        let api: ApiError = LesionSegError::InvalidLesionType {
            key: "x".to_string(),
        }
        .into();
        assert_eq!(api.status, StatusCode::BAD_REQUEST);
        assert_eq!(api.detail, "Unknown lesion type: x");

        let api: ApiError = LesionSegError::inference("predict", "boom").into();
        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!api.detail.contains("boom"));
    }
}
