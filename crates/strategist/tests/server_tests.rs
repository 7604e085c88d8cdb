//! HTTP API tests using in-process requests.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::{TimeZone, Utc};
use llm::{AIMessage, AIProvider, AIResponse, GenerateOptions, LlmResult, TokenUsage};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use strategist::reddit::{CollectError, CollectRequest, Collector};
use strategist::server::{build_router, ServerState};
use strategist::{CollectedPost, Comment, Dataset, Orchestrator, PipelineConfig, ReportWriter};
use tower::ServiceExt;

const TOKEN: &str = "s3cret";

/// Echoes the stage name back as the analysis text.
struct EchoProvider;

#[async_trait]
impl AIProvider for EchoProvider {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn is_configured(&self) -> bool {
        true
    }

    fn supported_models(&self) -> Vec<&str> {
        vec!["test-model"]
    }

    async fn generate_text(
        &self,
        model: &str,
        _messages: &[AIMessage],
        options: &GenerateOptions,
    ) -> LlmResult<AIResponse> {
        let stage = options.metadata.get("stage").cloned().unwrap_or_default();
        Ok(AIResponse {
            text: format!("<result>{stage}</result>"),
            usage: TokenUsage::new(10, 5),
            model: model.to_string(),
            provider: "echo".to_string(),
        })
    }
}

/// Returns a fixed dataset and remembers the last request.
struct StaticCollector {
    posts: Vec<CollectedPost>,
    last: Mutex<Option<CollectRequest>>,
}

#[async_trait]
impl Collector for StaticCollector {
    async fn collect(&self, request: &CollectRequest) -> Result<Dataset, CollectError> {
        *self.last.lock().unwrap() = Some(request.clone());
        Ok(Dataset::new(request.query.clone(), self.posts.clone()))
    }
}

fn posts() -> Vec<CollectedPost> {
    let created = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
    vec![CollectedPost {
        id: "aaa111".to_string(),
        title: "Best trail shoe for wide feet?".to_string(),
        body_text: "Toes keep hitting the front.".to_string(),
        score: 42,
        num_comments: 1,
        subreddit: "trailrunning".to_string(),
        author: "op".to_string(),
        created_at: created,
        url: None,
        comments: vec![Comment {
            author: "ann".to_string(),
            body_text: "Altra Lone Peak".to_string(),
            score: 9,
            created_at: created + chrono::Duration::hours(1),
        }],
    }]
}

fn app(
    collected: Vec<CollectedPost>,
    writer: Option<ReportWriter>,
) -> (Router, Arc<StaticCollector>) {
    let collector = Arc::new(StaticCollector {
        posts: collected,
        last: Mutex::new(None),
    });
    let config = PipelineConfig {
        model: "test-model".to_string(),
        ..PipelineConfig::default()
    };
    let state = Arc::new(ServerState {
        orchestrator: Orchestrator::new(config, Arc::new(EchoProvider)).unwrap(),
        collector: collector.clone(),
        writer,
        api_token: Some(TOKEN.to_string()),
        default_limit: 20,
    });
    (build_router(state), collector)
}

fn authed(method: &str, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_is_open() {
    let (app, _) = app(posts(), None);

    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "healthy");
}

#[tokio::test]
async fn test_api_requires_token() {
    let (app, _) = app(posts(), None);

    let response = app
        .oneshot(
            Request::get("/api/templates")
                .header(header::AUTHORIZATION, "Bearer wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_templates_lists_every_stage() {
    let (app, _) = app(posts(), None);

    let response = app
        .oneshot(authed("GET", "/api/templates", &Value::Null))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let names: Vec<_> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(
        names,
        vec![
            "title_and_post_text_analysis",
            "language_feature_extraction",
            "sentiment_color_tracking",
            "trend_analysis",
            "correlation_analysis",
        ]
    );
}

#[tokio::test]
async fn test_single_template_by_alias() {
    let (app, _) = app(posts(), None);

    let response = app
        .oneshot(authed("GET", "/api/templates/trend", &Value::Null))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["name"], "trend_analysis");
    assert!(body["required_variables"]
        .as_array()
        .unwrap()
        .iter()
        .any(|v| v == "granularity"));
}

#[tokio::test]
async fn test_unknown_template_stage_is_not_found() {
    let (app, _) = app(posts(), None);

    let response = app
        .oneshot(authed("GET", "/api/templates/weather", &Value::Null))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(json_body(response).await["error"]
        .as_str()
        .unwrap()
        .contains("unknown stage 'weather'"));
}

#[tokio::test]
async fn test_report_collects_and_analyzes() {
    let dir = tempfile::tempdir().unwrap();
    let (app, collector) = app(posts(), Some(ReportWriter::new(dir.path().to_path_buf())));

    let response = app
        .oneshot(authed(
            "POST",
            "/api/reports",
            &json!({
                "query": "trail shoes",
                "max_posts": 500,
                "sort": "top",
                "time_filter": "month"
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["report"]["query"], "trail shoes");
    assert_eq!(
        body["report"]["synthesis"]["text"],
        "<result>correlation_analysis</result>"
    );
    // One post with a one-hour span: trend answers locally.
    assert_eq!(body["report"]["sections"][3]["status"], "short_circuited");
    assert!(body["markdown"]
        .as_str()
        .unwrap()
        .starts_with("# Reddit SEO Report: trail shoes"));

    let saved = body["saved"]["markdown"].as_str().unwrap();
    assert!(std::path::Path::new(saved).exists());

    let request = collector.last.lock().unwrap().clone().unwrap();
    assert_eq!(request.limit, 100);
    assert_eq!(request.time_filter.to_string(), "month");
}

#[tokio::test]
async fn test_report_rejects_bad_sort() {
    let (app, _) = app(posts(), None);

    let response = app
        .oneshot(authed(
            "POST",
            "/api/reports",
            &json!({"query": "trail shoes", "sort": "sideways"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_empty_collection_is_unprocessable() {
    let (app, _) = app(Vec::new(), None);

    let response = app
        .oneshot(authed("POST", "/api/reports", &json!({"query": "nothing here"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(json_body(response).await["error"]
        .as_str()
        .unwrap()
        .contains("nothing here"));
}

#[tokio::test]
async fn test_analyze_uploaded_dataset() {
    let (app, collector) = app(Vec::new(), None);
    let dataset = Dataset::new("wide toe box", posts());

    let response = app
        .oneshot(authed(
            "POST",
            "/api/reports/analyze",
            &json!({ "dataset": dataset }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["report"]["query"], "wide toe box");
    assert_eq!(body["report"]["posts_analyzed"], 1);
    assert!(body.get("saved").is_none());
    assert!(collector.last.lock().unwrap().is_none());
}
