use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use lesion_seg_rs::{
    mocks::{MockImageSource, MockModelLoader, MockStats, MockUploader},
    server::{router, AppState},
    session::LoadPerCall,
    AnalysisOptions, LesionAnalyzer,
};

fn app(loader: MockModelLoader, source: MockImageSource) -> (Router, Arc<MockStats>) {
    let stats = loader.stats();
    let analyzer = LesionAnalyzer::new(
        Arc::new(LoadPerCall::new(loader)),
        source,
        MockUploader::new(),
        AnalysisOptions::default(),
    );
    (router(AppState::new(Arc::new(analyzer), 2)), stats)
}

fn healthy_app() -> (Router, Arc<MockStats>) {
    app(
        MockModelLoader::new(0.7),
        MockImageSource::solid(64, 48, [120, 80, 60]),
    )
}

async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_health() {
    let (app, _) = healthy_app();
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body, json!({ "status": "ok" }));
}

#[tokio::test]
async fn test_infer_returns_result_schema() {
    let (app, stats) = healthy_app();

    let (status, body) = post_json(app, "/streaks", json!({ "image": "http://img/a.jpg" })).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["lesion_type"], "streaks");
    assert_eq!(body["status"], true);
    assert_eq!(body["confidence"], 100.0);
    for key in ["mask_url", "labeled_url", "heatmap_url"] {
        assert!(body[key].as_str().unwrap().starts_with("https://storage.test/lesion_results/"));
    }
    assert_eq!(stats.live_sessions(), 0);
}

#[tokio::test]
async fn test_legacy_alias_route() {
    let (app, _) = healthy_app();

    let (status, body) =
        post_json(app, "/miliaLikeCysts", json!({ "image": "http://img/a.jpg" })).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["lesion_type"], "milia");
}

#[tokio::test]
async fn test_unknown_lesion_acquires_nothing() {
    let (app, stats) = healthy_app();

    let (status, body) = post_json(app, "/freckles", json!({ "image": "http://img/a.jpg" })).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Unknown lesion type: freckles");
    assert_eq!(stats.loads(), 0);
}

#[tokio::test]
async fn test_unreachable_image_is_bad_request() {
    let (app, stats) = app(MockModelLoader::new(0.7), MockImageSource::unreachable());

    let (status, body) = post_json(app, "/globules", json!({ "image": "http://down/a.jpg" })).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("http://down/a.jpg"));
    assert_eq!(stats.loads(), 1);
    assert_eq!(stats.live_sessions(), 0);
}

#[tokio::test]
async fn test_model_failure_is_server_error_without_internals() {
    let (app, _) = app(
        MockModelLoader::new(0.7).failing_predict(),
        MockImageSource::solid(8, 8, [0, 0, 0]),
    );

    let (status, body) = post_json(app, "/pigment", json!({ "image": "http://img/a.jpg" })).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let detail = body["detail"].as_str().unwrap();
    assert!(detail.starts_with("Inference error"));
    assert!(!detail.contains("mock prediction failure"));
}

#[tokio::test]
async fn test_missing_image_field_is_rejected() {
    let (app, stats) = healthy_app();

    let (status, body) = post_json(app, "/globules", json!({ "url": "http://img/a.jpg" })).await;

    assert!(status.is_client_error());
    assert!(body["detail"].is_string());
    assert_eq!(stats.loads(), 0);
}

#[tokio::test]
async fn test_detect_all_types() {
    let (app, stats) = healthy_app();

    let (status, body) = post_json(
        app,
        "/detect",
        json!({ "imageURL": "http://img/a.jpg", "types": "all" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let results = body["results"].as_object().unwrap();
    assert_eq!(results.len(), 5);
    for key in ["globules", "streaks", "pigment", "negative", "milia"] {
        assert_eq!(results[key]["status"], true);
        assert!(results[key]["maskImage"].is_string());
    }
    assert_eq!(stats.loads(), 5);
    assert_eq!(stats.live_sessions(), 0);
}

#[tokio::test]
async fn test_detect_failures_are_per_type() {
    let (app, _) = app(MockModelLoader::new(0.7), MockImageSource::unreachable());

    let (status, body) = post_json(
        app,
        "/detect",
        json!({ "imageURL": "http://down/a.jpg", "types": ["globules", "pigmentNetwork"] }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["results"]["pigmentNetwork"],
        json!({
            "status": false,
            "confidence": 0.0,
            "maskImage": null,
            "labeledImage": null,
            "heatmapImage": null
        })
    );
    assert_eq!(body["results"]["globules"]["status"], false);
}

#[tokio::test]
async fn test_detect_validation() {
    let (app, stats) = healthy_app();

    let (status, body) = post_json(app.clone(), "/detect", json!({ "types": "all" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Image and detection types are required");

    let (status, body) = post_json(
        app,
        "/detect",
        json!({ "imageURL": "http://img/a.jpg", "types": ["globules", "freckles"] }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Unknown lesion type: freckles");
    assert_eq!(stats.loads(), 0);
}
