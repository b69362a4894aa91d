#![cfg(feature = "server")]

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use futures::StreamExt;
use tempfile::TempDir;
use tower::ServiceExt;

use finance_analyst::{
    Agent, AgentConfig, AnalystServer, ModelConfig, ProgressConfig, ResponseExporter, StubModel,
    ToolRegistry,
};

fn plain_config() -> AgentConfig {
    AgentConfig {
        model: ModelConfig::default(),
        tools: ToolRegistry::new(),
        description: "You explain finance.".into(),
        instructions: Vec::new(),
        expected_output: None,
        markdown: true,
        show_tool_calls: false,
        add_context: false,
        add_references: false,
    }
}

fn app(responses: Vec<String>, dir: &TempDir) -> (Router, Arc<StubModel>) {
    app_with_progress(responses, dir, ProgressConfig::disabled())
}

fn app_with_progress(
    responses: Vec<String>,
    dir: &TempDir,
    progress: ProgressConfig,
) -> (Router, Arc<StubModel>) {
    let model = StubModel::new(responses);
    let agent = Agent::new(plain_config(), model.clone());
    let server = AnalystServer::new(
        Arc::new(agent),
        ResponseExporter::new(dir.path(), "investment_analysis"),
        progress,
    );
    (server.router(), model)
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn session_cookie(app: &Router) -> String {
    let response = app
        .clone()
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
    set_cookie.split(';').next().unwrap().to_string()
}

fn post_form(uri: &str, cookie: &str, body: &str) -> Request<Body> {
    Request::post(uri)
        .header(header::COOKIE, cookie)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str, cookie: &str) -> Request<Body> {
    Request::get(uri)
        .header(header::COOKIE, cookie)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn health_check() {
    let dir = TempDir::new().unwrap();
    let (app, _) = app(vec![], &dir);
    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "ok");
}

#[tokio::test]
async fn query_then_render_and_download() {
    let dir = TempDir::new().unwrap();
    let (app, model) = app(
        vec![r#"{"action":"respond","content":"An **IPO** is a first share sale."}"#.into()],
        &dir,
    );
    let cookie = session_cookie(&app).await;

    let response = app
        .clone()
        .oneshot(post_form("/query", &cookie, "query=What+is+an+IPO%3F"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(model.calls(), 1);

    let page = body_text(app.clone().oneshot(get("/", &cookie)).await.unwrap()).await;
    assert!(page.contains("What is an IPO?"));
    assert!(page.contains("An <strong>IPO</strong> is a first share sale."));
    assert!(dir.path().join("investment_analysis_1.md").exists());

    let download = app.clone().oneshot(get("/download/1", &cookie)).await.unwrap();
    assert_eq!(download.status(), StatusCode::OK);
    assert_eq!(
        download.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"investment_analysis_1.md\""
    );
    let document = body_text(download).await;
    assert!(document.starts_with("# Investment Analysis\n\n**Query:** What is an IPO?\n\n**Date:** "));
    assert!(document.ends_with("An **IPO** is a first share sale."));
}

#[tokio::test]
async fn blank_query_skips_model() {
    let dir = TempDir::new().unwrap();
    let (app, model) = app(vec![], &dir);
    let cookie = session_cookie(&app).await;

    let response = app
        .clone()
        .oneshot(post_form("/query", &cookie, "query=+++"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(model.calls(), 0);
    let page = body_text(app.oneshot(get("/", &cookie)).await.unwrap()).await;
    assert!(!page.contains("Download this analysis"));
}

#[tokio::test]
async fn clear_removes_rendered_history() {
    let dir = TempDir::new().unwrap();
    let (app, _) = app(vec!["Saving keeps money safe.".into()], &dir);
    let cookie = session_cookie(&app).await;

    app.clone()
        .oneshot(post_form("/query", &cookie, "query=saving+vs+investing"))
        .await
        .unwrap();
    let response = app
        .clone()
        .oneshot(post_form("/clear", &cookie, ""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let page = body_text(app.oneshot(get("/", &cookie)).await.unwrap()).await;
    assert!(!page.contains("saving vs investing"));
}

#[tokio::test]
async fn sessions_are_isolated() {
    let dir = TempDir::new().unwrap();
    let (app, _) = app(vec!["Inflation erodes purchasing power.".into()], &dir);
    let first = session_cookie(&app).await;
    let second = session_cookie(&app).await;
    assert_ne!(first, second);

    app.clone()
        .oneshot(post_form("/query", &first, "query=inflation"))
        .await
        .unwrap();

    let page = body_text(app.oneshot(get("/", &second)).await.unwrap()).await;
    assert!(!page.contains("Inflation erodes purchasing power."));
}

#[tokio::test]
async fn model_failure_is_reported() {
    let dir = TempDir::new().unwrap();
    let (app, model) = app(vec![], &dir);
    let cookie = session_cookie(&app).await;

    let response = app
        .clone()
        .oneshot(post_form("/query", &cookie, "query=credit+score"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert!(body_text(response).await.contains("ran out of scripted responses"));
    assert_eq!(model.calls(), 1);
}

#[tokio::test]
async fn unknown_download_is_not_found() {
    let dir = TempDir::new().unwrap();
    let (app, _) = app(vec![], &dir);
    let response = app
        .oneshot(Request::get("/download/7").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn progress_is_streamed_to_the_session() {
    let dir = TempDir::new().unwrap();
    let progress = ProgressConfig {
        enabled: true,
        steps: 4,
        step_delay_ms: 1,
    };
    let (app, _) = app_with_progress(vec!["Bonds pay coupons.".into()], &dir, progress);
    let cookie = session_cookie(&app).await;

    let events = app.clone().oneshot(get("/events", &cookie)).await.unwrap();
    assert_eq!(events.status(), StatusCode::OK);
    assert_eq!(events.headers()[header::CONTENT_TYPE], "text/event-stream");
    let mut body = events.into_body().into_data_stream();

    let submit = tokio::spawn(
        app.clone()
            .oneshot(post_form("/query", &cookie, "query=how+do+bonds+work")),
    );

    let mut seen = String::new();
    while !seen.contains("data: progress:done") {
        let chunk = tokio::time::timeout(Duration::from_secs(5), body.next())
            .await
            .expect("progress event in time")
            .expect("stream still open")
            .unwrap();
        seen.push_str(std::str::from_utf8(&chunk).unwrap());
    }
    assert!(seen.contains("data: progress:25"));
    assert!(seen.contains("data: progress:100"));

    let response = submit.await.unwrap().unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
}

#[tokio::test]
async fn events_without_cookie_get_no_stream() {
    let dir = TempDir::new().unwrap();
    let (app, _) = app(vec![], &dir);
    let response = app
        .oneshot(Request::get("/events").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(response.headers().get(header::SET_COOKIE).is_none());
}
