//! Integration tests for the Reddit collector against a mock API.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use strategist::reddit::{
    CollectError, CollectRequest, Collector, RedditClient, RedditCredentials, SortOrder,
    TimeFilter,
};
use wiremock::matchers::{basic_auth, bearer_token, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// 2024-05-01T08:00:00Z
const BASE_TS: f64 = 1_714_550_400.0;

// =============================================================================
// Mock Reddit API
// =============================================================================

fn submission(id: &str, hours: f64) -> Value {
    json!({
        "kind": "t3",
        "data": {
            "id": id,
            "title": format!("Best shoe for {id}?&#x200B;"),
            "selftext": "Need grip on wet rock.",
            "score": 42,
            "num_comments": 3,
            "subreddit": "trailrunning",
            "author": "op",
            "created_utc": BASE_TS + hours * 3600.0,
            "permalink": format!("/r/trailrunning/comments/{id}/best_shoe/")
        }
    })
}

fn listing(children: Vec<Value>) -> Value {
    json!({"kind": "Listing", "data": {"children": children}})
}

fn thread(id: &str) -> Value {
    let comments = listing(vec![
        json!({
            "kind": "t1",
            "data": {
                "author": "ann",
                "body": "Speedgoats grip well",
                "score": 10,
                "created_utc": BASE_TS + 3600.0,
                "replies": listing(vec![json!({
                    "kind": "t1",
                    "data": {
                        "author": null,
                        "body": "[removed]",
                        "score": 1,
                        "created_utc": BASE_TS + 7200.0,
                        "replies": ""
                    }
                })])
            }
        }),
        json!({
            "kind": "t1",
            "data": {
                "author": "bob",
                "body": "Cascadias last forever",
                "score": 4,
                "created_utc": BASE_TS + 10800.0,
                "replies": ""
            }
        }),
        json!({"kind": "more", "data": {"count": 12, "children": ["x1", "x2"]}}),
    ]);
    json!([listing(vec![submission(id, 0.0)]), comments])
}

async fn mount_token(server: &MockServer, status: u16) {
    let response = if status == 200 {
        ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok-123",
            "token_type": "bearer",
            "expires_in": 3600
        }))
    } else {
        ResponseTemplate::new(status).set_body_json(json!({"error": "invalid_grant"}))
    };
    Mock::given(method("POST"))
        .and(path("/api/v1/access_token"))
        .and(basic_auth("client", "secret"))
        .respond_with(response)
        .expect(1)
        .mount(server)
        .await;
}

async fn mount_api(server: &MockServer) {
    mount_token(server, 200).await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .and(bearer_token("tok-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(vec![
            submission("aaa111", 0.0),
            submission("bbb222", 30.0),
            submission("aaa111", 0.0),
            submission("gone404", 1.0),
        ])))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/r/trailrunning/top"))
        .and(bearer_token("tok-123"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(listing(vec![submission("bbb222", 30.0)])),
        )
        .mount(server)
        .await;

    for id in ["aaa111", "bbb222"] {
        Mock::given(method("GET"))
            .and(path(format!("/r/trailrunning/comments/{id}/best_shoe")))
            .and(bearer_token("tok-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(thread(id)))
            .mount(server)
            .await;
    }

    Mock::given(method("GET"))
        .and(path("/r/trailrunning/comments/gone404/best_shoe"))
        .respond_with(ResponseTemplate::new(404))
        .mount(server)
        .await;
}

fn client_for(server: &MockServer) -> RedditClient {
    let credentials = RedditCredentials::new("client", "secret", "strategist-tests/0.1").unwrap();
    RedditClient::new(credentials)
        .unwrap()
        .with_endpoints(
            format!("{}/api/v1/access_token", server.uri()),
            server.uri(),
        )
        .with_request_delay(Duration::ZERO)
}

/// Query parameters of the first request to `path`.
async fn query_for(server: &MockServer, path: &str) -> HashMap<String, String> {
    server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.url.path() == path)
        .map(|r| r.url.query_pairs().into_owned().collect())
        .unwrap_or_default()
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_search_collects_deduplicated_posts() {
    let server = MockServer::start().await;
    mount_api(&server).await;

    let dataset = client_for(&server)
        .collect(&CollectRequest::search("trail shoes", 10))
        .await
        .unwrap();

    assert_eq!(dataset.query, "trail shoes");
    // Duplicate permalink fetched once; the 404 post is skipped.
    let ids: Vec<_> = dataset.posts.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["aaa111", "bbb222"]);

    let post = &dataset.posts[0];
    assert_eq!(post.title, "Best shoe for aaa111?");
    assert_eq!(post.subreddit, "trailrunning");
    assert_eq!(
        post.url.as_deref(),
        Some("https://www.reddit.com/r/trailrunning/comments/aaa111/best_shoe/")
    );
    assert_eq!(post.created_at.to_rfc3339(), "2024-05-01T08:00:00+00:00");

    // Thread order with replies flattened after their parent; "more" stubs dropped.
    let authors: Vec<_> = post.comments.iter().map(|c| c.author.as_str()).collect();
    assert_eq!(authors, vec!["ann", "[deleted]", "bob"]);
    assert_eq!(post.comments[2].body_text, "Cascadias last forever");

    let thread_fetches = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path().contains("/comments/aaa111/"))
        .count();
    assert_eq!(thread_fetches, 1);
}

#[tokio::test]
async fn test_search_sends_listing_parameters() {
    let server = MockServer::start().await;
    mount_api(&server).await;

    let request = CollectRequest {
        query: "carbon plate".to_string(),
        subreddit: None,
        sort: SortOrder::Top,
        time_filter: TimeFilter::Week,
        limit: 500,
    };
    client_for(&server).collect(&request).await.unwrap();

    let params = query_for(&server, "/search").await;
    assert_eq!(params["q"], "carbon plate");
    assert_eq!(params["sort"], "top");
    assert_eq!(params["t"], "week");
    assert_eq!(params["limit"], "100");
    assert_eq!(params["type"], "link");
}

#[tokio::test]
async fn test_subreddit_listing() {
    let server = MockServer::start().await;
    mount_api(&server).await;

    let request = CollectRequest {
        query: "shoes".to_string(),
        subreddit: Some("r/trailrunning".to_string()),
        sort: SortOrder::Top,
        time_filter: TimeFilter::Month,
        limit: 5,
    };
    let dataset = client_for(&server).collect(&request).await.unwrap();

    assert_eq!(dataset.posts.len(), 1);
    let params = query_for(&server, "/r/trailrunning/top").await;
    assert_eq!(params["t"], "month");
    assert_eq!(params["limit"], "5");
}

#[tokio::test]
async fn test_auth_failure_is_reported() {
    let server = MockServer::start().await;
    mount_token(&server, 401).await;

    let err = client_for(&server)
        .collect(&CollectRequest::search("trail shoes", 10))
        .await
        .unwrap_err();

    assert!(matches!(err, CollectError::Auth { status: 401, .. }));
}

#[tokio::test]
async fn test_fetch_post_rejects_non_thread_urls() {
    let server = MockServer::start().await;

    let err = client_for(&server)
        .fetch_post("https://www.reddit.com/r/trailrunning/")
        .await
        .unwrap_err();
    assert!(matches!(err, CollectError::InvalidUrl(_)));
    assert!(server.received_requests().await.unwrap().is_empty());
}
