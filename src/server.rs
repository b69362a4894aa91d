use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Path, State};
use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use futures::stream::Stream;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio_stream::wrappers::BroadcastStream;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::agent::QueryAgent;
use crate::error::Result;
use crate::export::ResponseExporter;
use crate::progress::{Progress, ProgressConfig};
use crate::render::{render_error, render_page};
use crate::session::Session;

pub const SESSION_COOKIE: &str = "analyst_session";

const DEFAULT_SESSION_IDLE: Duration = Duration::from_secs(3600);

/// One browser's session plus its progress channel.
struct SessionHandle {
    session: Mutex<Session>,
    events: broadcast::Sender<String>,
}

impl SessionHandle {
    fn new() -> Self {
        let (events, _) = broadcast::channel(128);
        Self {
            session: Mutex::new(Session::new()),
            events,
        }
    }
}

struct SessionSlot {
    handle: Arc<SessionHandle>,
    last_seen: Instant,
}

impl SessionSlot {
    fn new(now: Instant) -> Self {
        Self {
            handle: Arc::new(SessionHandle::new()),
            last_seen: now,
        }
    }
}

/// Drops sessions idle for at least `idle`. A session still held by a
/// running request is kept.
fn evict_idle(sessions: &mut HashMap<Uuid, SessionSlot>, now: Instant, idle: Duration) -> usize {
    let before = sessions.len();
    sessions.retain(|_, slot| {
        Arc::strong_count(&slot.handle) > 1 || now.duration_since(slot.last_seen) < idle
    });
    before - sessions.len()
}

/// Serves the chat page. Sessions are keyed by a cookie; interactions within
/// one session run one at a time.
pub struct AnalystServer {
    agent: Arc<dyn QueryAgent>,
    exporter: ResponseExporter,
    progress: ProgressConfig,
    session_idle: Duration,
    sessions: RwLock<HashMap<Uuid, SessionSlot>>,
}

#[derive(Deserialize)]
pub struct QueryForm {
    #[serde(default)]
    query: String,
}

impl AnalystServer {
    pub fn new(
        agent: Arc<dyn QueryAgent>,
        exporter: ResponseExporter,
        progress: ProgressConfig,
    ) -> Self {
        Self {
            agent,
            exporter,
            progress,
            session_idle: DEFAULT_SESSION_IDLE,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// How long an untouched session keeps its history.
    pub fn with_session_idle(mut self, idle: Duration) -> Self {
        self.session_idle = idle;
        self
    }

    pub fn router(self) -> Router {
        let app_state = Arc::new(self);
        Router::new()
            .route("/", get(Self::index))
            .route("/health", get(Self::health))
            .route("/query", post(Self::query))
            .route("/clear", post(Self::clear))
            .route("/download/:number", get(Self::download))
            .route("/events", get(Self::events))
            .layer(TraceLayer::new_for_http())
            .with_state(app_state)
    }

    pub async fn serve(self, addr: SocketAddr) -> Result<()> {
        let app = self.router();
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(%addr, "serving finance analyst");
        axum::serve(listener, app).await?;
        Ok(())
    }

    /// Finds the caller's session, creating one when the cookie is missing or
    /// unknown. Returns the cookie to set for new visitors.
    async fn session_for(&self, headers: &HeaderMap) -> (Arc<SessionHandle>, Option<HeaderValue>) {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        if let Some(slot) = session_cookie(headers).and_then(|id| sessions.get_mut(&id)) {
            slot.last_seen = now;
            return (Arc::clone(&slot.handle), None);
        }

        let evicted = evict_idle(&mut sessions, now, self.session_idle);
        if evicted > 0 {
            tracing::debug!(evicted, remaining = sessions.len(), "dropped idle sessions");
        }
        let id = Uuid::new_v4();
        let slot = SessionSlot::new(now);
        let handle = Arc::clone(&slot.handle);
        sessions.insert(id, slot);
        tracing::debug!(session = %id, "new session");
        let cookie =
            HeaderValue::from_str(&format!("{SESSION_COOKIE}={id}; Path=/; HttpOnly; SameSite=Lax"))
                .ok();
        (handle, cookie)
    }

    /// Looks up the caller's session without creating one.
    async fn existing_session(&self, headers: &HeaderMap) -> Option<Arc<SessionHandle>> {
        let id = session_cookie(headers)?;
        let sessions = self.sessions.read().await;
        sessions.get(&id).map(|slot| Arc::clone(&slot.handle))
    }

    async fn index(State(state): State<Arc<Self>>, headers: HeaderMap) -> Response {
        let (handle, cookie) = state.session_for(&headers).await;
        let session = handle.session.lock().await;
        // Every render rewrites the download files before offering them.
        let page = match state.exporter.export_all(session.history()).await {
            Ok(files) => {
                if let Some(newest) = files.first() {
                    tracing::debug!(
                        count = files.len(),
                        newest = %newest.path.display(),
                        "download files refreshed"
                    );
                }
                Html(render_page(session.history(), &files)).into_response()
            }
            Err(err) => {
                tracing::error!(error = %err, "export failed");
                (StatusCode::INTERNAL_SERVER_ERROR, Html(render_error(&err.to_string())))
                    .into_response()
            }
        };
        with_cookie(page, cookie)
    }

    async fn health() -> impl IntoResponse {
        "ok"
    }

    async fn query(
        State(state): State<Arc<Self>>,
        headers: HeaderMap,
        Form(form): Form<QueryForm>,
    ) -> Response {
        let (handle, cookie) = state.session_for(&headers).await;
        let progress = Progress::new(state.progress.clone(), handle.events.clone());
        let mut session = handle.session.lock().await;
        let outcome = session
            .submit(state.agent.as_ref(), &form.query, Some(&progress))
            .await;
        let response = match outcome {
            Ok(_) => Redirect::to("/").into_response(),
            Err(err) => {
                tracing::error!(error = %err, "query failed");
                (StatusCode::BAD_GATEWAY, Html(render_error(&err.to_string()))).into_response()
            }
        };
        with_cookie(response, cookie)
    }

    async fn clear(State(state): State<Arc<Self>>, headers: HeaderMap) -> Response {
        let (handle, cookie) = state.session_for(&headers).await;
        handle.session.lock().await.clear();
        with_cookie(Redirect::to("/"), cookie)
    }

    async fn download(State(state): State<Arc<Self>>, Path(number): Path<usize>) -> Response {
        match state.exporter.read(number).await {
            Ok(Some(bytes)) => {
                let disposition = format!(
                    "attachment; filename=\"{}\"",
                    state.exporter.file_name(number)
                );
                (
                    [
                        (header::CONTENT_TYPE, "text/markdown; charset=utf-8".to_string()),
                        (header::CONTENT_DISPOSITION, disposition),
                    ],
                    bytes,
                )
                    .into_response()
            }
            Ok(None) => (StatusCode::NOT_FOUND, "no such analysis").into_response(),
            Err(err) => {
                tracing::error!(error = %err, number, "download failed");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
            }
        }
    }

    async fn events(State(state): State<Arc<Self>>, headers: HeaderMap) -> Response {
        match state.existing_session(&headers).await {
            // 204 tells the browser's EventSource not to reconnect.
            None => StatusCode::NO_CONTENT.into_response(),
            Some(handle) => Sse::new(progress_stream(&handle))
                .keep_alive(KeepAlive::default())
                .into_response(),
        }
    }
}

fn progress_stream(
    handle: &SessionHandle,
) -> impl Stream<Item = std::result::Result<Event, Infallible>> {
    BroadcastStream::new(handle.events.subscribe()).filter_map(|msg| async move {
        match msg {
            Ok(line) => Some(Ok::<Event, Infallible>(Event::default().data(line))),
            Err(_) => None,
        }
    })
}

fn session_cookie(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().strip_prefix(SESSION_COOKIE)?.strip_prefix('='))
        .find_map(|id| Uuid::parse_str(id).ok())
}

fn with_cookie(response: impl IntoResponse, cookie: Option<HeaderValue>) -> Response {
    let mut response = response.into_response();
    if let Some(cookie) = cookie {
        response.headers_mut().insert(header::SET_COOKIE, cookie);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_session_cookie_among_others() {
        let id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("theme=dark; {SESSION_COOKIE}={id}; other=1")).unwrap(),
        );
        assert_eq!(session_cookie(&headers), Some(id));
    }

    #[test]
    fn ignores_malformed_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("analyst_session=not-a-uuid"),
        );
        assert_eq!(session_cookie(&headers), None);
        assert_eq!(session_cookie(&HeaderMap::new()), None);
    }

    #[test]
    fn idle_sessions_are_evicted() {
        let idle = Duration::from_secs(60);
        let start = Instant::now();
        let (stale, fresh, busy) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut sessions = HashMap::new();
        sessions.insert(stale, SessionSlot::new(start));
        sessions.insert(fresh, SessionSlot::new(start + Duration::from_secs(90)));
        let busy_slot = SessionSlot::new(start);
        let in_flight = Arc::clone(&busy_slot.handle);
        sessions.insert(busy, busy_slot);

        let evicted = evict_idle(&mut sessions, start + Duration::from_secs(120), idle);

        assert_eq!(evicted, 1);
        assert!(!sessions.contains_key(&stale));
        assert!(sessions.contains_key(&fresh));
        assert!(sessions.contains_key(&busy));
        drop(in_flight);
    }

    fn server(idle: Duration) -> Arc<AnalystServer> {
        let agent = crate::agent::Agent::new(
            crate::agent::AgentConfig {
                model: crate::config::ModelConfig::default(),
                tools: crate::tool::ToolRegistry::new(),
                description: String::new(),
                instructions: Vec::new(),
                expected_output: None,
                markdown: true,
                show_tool_calls: false,
                add_context: false,
                add_references: false,
            },
            crate::llm::StubModel::new(vec![]),
        );
        let dir = std::env::temp_dir();
        Arc::new(
            AnalystServer::new(
                Arc::new(agent),
                ResponseExporter::new(dir, "unused"),
                ProgressConfig::disabled(),
            )
            .with_session_idle(idle),
        )
    }

    #[tokio::test]
    async fn cookieless_visits_do_not_accumulate() {
        let server = server(Duration::ZERO);
        for _ in 0..1000 {
            let (_, cookie) = server.session_for(&HeaderMap::new()).await;
            assert!(cookie.is_some());
        }
        assert_eq!(server.sessions.read().await.len(), 1);
    }

    #[tokio::test]
    async fn known_cookie_keeps_its_session() {
        let server = server(Duration::from_secs(60));
        let (first, cookie) = server.session_for(&HeaderMap::new()).await;
        let cookie = cookie.unwrap();
        let pair = cookie.to_str().unwrap().split(';').next().unwrap().to_string();
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_str(&pair).unwrap());

        let (again, set_cookie) = server.session_for(&headers).await;

        assert!(Arc::ptr_eq(&first, &again));
        assert!(set_cookie.is_none());
        assert_eq!(server.sessions.read().await.len(), 1);
    }

    #[tokio::test]
    async fn events_without_session_create_nothing() {
        let server = server(Duration::from_secs(60));

        let response = AnalystServer::events(State(Arc::clone(&server)), HeaderMap::new()).await;

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(server.sessions.read().await.is_empty());
    }
}
