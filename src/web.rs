use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{FromRequestParts, Query, Request, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Json, Redirect, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::{
    app_state::AppState,
    errors::{InsureError, InsureResult},
    event_log::{ErrorInput, EventCategory, EventFilter, EventKind, EventRecord},
    governance::{proposal_stats, Proposal, ProposalStats, ProposalSummary},
    session::{cookie_from_header, SessionRecord},
    session_guard::{
        evaluate, GuardDecision, RedirectDescriptor, SESSION_EXPIRED_MESSAGE, SIGN_IN_MESSAGE,
    },
};

type SharedState = Arc<AppState>;

/// Pages that need a valid session
const PROTECTED_PAGES: &[&str] = &[
    "/dashboard",
    "/policies",
    "/policies/{id}",
    "/claims",
    "/claims/new",
    "/claims/{id}",
    "/governance",
    "/governance/{id}",
];

const PUBLIC_PAGES: &[&str] = &["/", "/about", "/signin", "/signup"];

/// Instant the edge check evaluated the request at. The in-handler re-check
/// reuses it so both checks see the same clock.
#[derive(Debug, Clone, Copy)]
struct GuardClock(DateTime<Utc>);

pub fn session_from_headers(headers: &HeaderMap, cookie_name: &str) -> Option<SessionRecord> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|h| cookie_from_header(h, cookie_name))
        .and_then(SessionRecord::from_cookie_value)
}

fn redirect_response(descriptor: &RedirectDescriptor) -> Response {
    Redirect::temporary(&descriptor.location()).into_response()
}

/// Edge check: runs before any page handler produces content.
pub async fn edge_guard(
    State(state): State<SharedState>,
    mut request: Request,
    next: Next,
) -> Response {
    let now = Utc::now();
    let session = session_from_headers(request.headers(), &state.config.session.cookie_name);
    let path = request.uri().path().to_string();

    match evaluate(session.as_ref(), now, &path, &state.policy) {
        GuardDecision::Authorized => {
            request.extensions_mut().insert(GuardClock(now));
            next.run(request).await
        }
        GuardDecision::Redirect(descriptor) => {
            tracing::debug!(path = %path, location = %descriptor.location(), "edge guard redirect");
            redirect_response(&descriptor)
        }
    }
}

/// In-handler re-check of the edge decision. Rejects with the same redirect
/// the edge check would have produced.
pub struct GuardedSession(pub Option<SessionRecord>);

impl FromRequestParts<SharedState> for GuardedSession {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let now = parts
            .extensions
            .get::<GuardClock>()
            .map(|c| c.0)
            .unwrap_or_else(Utc::now);
        let session = session_from_headers(&parts.headers, &state.config.session.cookie_name);

        match evaluate(session.as_ref(), now, parts.uri.path(), &state.policy) {
            GuardDecision::Authorized => Ok(GuardedSession(session)),
            GuardDecision::Redirect(descriptor) => {
                tracing::warn!(path = parts.uri.path(), "page re-check redirected past the edge guard");
                Err(redirect_response(&descriptor))
            }
        }
    }
}

/// Caller of the event API with a valid session. API routes answer 401
/// rather than redirecting.
pub struct SignedInSession(pub SessionRecord);

impl FromRequestParts<SharedState> for SignedInSession {
    type Rejection = InsureError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let session = session_from_headers(&parts.headers, &state.config.session.cookie_name)
            .filter(SessionRecord::has_identity);

        match session {
            Some(session) if !session.is_expired(Utc::now(), state.policy.ttl) => {
                Ok(SignedInSession(session))
            }
            Some(_) => Err(InsureError::unauthorized(SESSION_EXPIRED_MESSAGE)),
            None => {
                tracing::debug!(path = parts.uri.path(), "event API call without a session");
                Err(InsureError::unauthorized(SIGN_IN_MESSAGE))
            }
        }
    }
}

/// Placeholder page body; rendering happens in the front end.
async fn page(
    State(state): State<SharedState>,
    GuardedSession(session): GuardedSession,
    uri: Uri,
) -> Json<Value> {
    let path = uri.path();
    let address = session.as_ref().map(|s| s.address.as_str());
    state.logger.at(path).track_page_view(path, address);

    Json(json!({
        "page": path,
        "authenticated": session.is_some(),
        "address": address,
    }))
}

async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCheckRequest {
    /// Raw session object; one that does not parse counts as no session.
    pub session: Option<Value>,
    pub path: String,
    pub now: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct SessionCheckResponse {
    pub decision: GuardDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

async fn check_session(
    State(state): State<SharedState>,
    Json(req): Json<SessionCheckRequest>,
) -> Json<SessionCheckResponse> {
    let now = req.now.unwrap_or_else(Utc::now);
    let session = req.session.and_then(|raw| {
        serde_json::from_value::<SessionRecord>(raw)
            .map_err(|e| tracing::warn!(error = %e, "ignoring malformed session record"))
            .ok()
    });
    let decision = evaluate(session.as_ref(), now, &req.path, &state.policy);
    let location = match &decision {
        GuardDecision::Redirect(r) => Some(r.location()),
        GuardDecision::Authorized => None,
    };
    Json(SessionCheckResponse { decision, location })
}

async fn list_events(
    State(state): State<SharedState>,
    _caller: SignedInSession,
    Query(filter): Query<EventFilter>,
) -> Json<Vec<EventRecord>> {
    Json(state.logger.query(&filter))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordEventRequest {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub category: EventCategory,
    pub name: String,
    pub data: Option<Value>,
    pub user_id: Option<String>,
    pub path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageViewRequest {
    pub path: String,
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEventRequest {
    pub message: String,
    pub stack: Option<String>,
    pub context: Option<Map<String, Value>>,
    pub user_id: Option<String>,
    pub path: String,
}

fn require_path(path: &str) -> InsureResult<()> {
    if path.starts_with('/') {
        Ok(())
    } else {
        Err(InsureError::validation("path", "must start with '/'"))
    }
}

fn recorded(event: Option<EventRecord>) -> Response {
    match event {
        Some(event) => (StatusCode::CREATED, Json(event)).into_response(),
        None => (StatusCode::ACCEPTED, Json(json!({ "recorded": false }))).into_response(),
    }
}

async fn record_event(
    State(state): State<SharedState>,
    SignedInSession(caller): SignedInSession,
    Json(req): Json<RecordEventRequest>,
) -> Result<Response, InsureError> {
    require_path(&req.path)?;
    if req.name.trim().is_empty() {
        return Err(InsureError::validation("name", "cannot be empty"));
    }
    let event = state.logger.at(req.path).record(
        req.kind,
        req.category,
        &req.name,
        req.data,
        Some(req.user_id.as_deref().unwrap_or(&caller.address)),
    );
    Ok(recorded(event))
}

async fn record_page_view(
    State(state): State<SharedState>,
    SignedInSession(caller): SignedInSession,
    Json(req): Json<PageViewRequest>,
) -> Result<Response, InsureError> {
    require_path(&req.path)?;
    let user = req.user_id.as_deref().unwrap_or(&caller.address);
    let tracker = state.logger.at(req.path.as_str());
    Ok(recorded(tracker.track_page_view(&req.path, Some(user))))
}

async fn record_error(
    State(state): State<SharedState>,
    SignedInSession(caller): SignedInSession,
    Json(req): Json<ErrorEventRequest>,
) -> Result<Response, InsureError> {
    require_path(&req.path)?;
    let input = match req.stack {
        Some(stack) => ErrorInput::Structured {
            message: req.message,
            stack: Some(stack),
        },
        None => ErrorInput::Message(req.message),
    };
    let event = state
        .logger
        .at(req.path)
        .track_error(
            input,
            req.context,
            Some(req.user_id.as_deref().unwrap_or(&caller.address)),
        );
    Ok(recorded(event))
}

async fn clear_events(
    State(state): State<SharedState>,
    SignedInSession(caller): SignedInSession,
) -> StatusCode {
    tracing::info!(address = %caller.address, "clearing event log");
    state.logger.clear();
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
pub struct StatsRequest {
    pub proposals: Vec<Proposal>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub stats: ProposalStats,
    pub proposals: Vec<ProposalSummary>,
}

async fn governance_stats(Json(req): Json<StatsRequest>) -> Json<StatsResponse> {
    let now = Utc::now();
    Json(StatsResponse {
        stats: proposal_stats(&req.proposals),
        proposals: req.proposals.iter().map(|p| p.summary(now)).collect(),
    })
}

/// CORS for the configured front-end origins. Credentials are allowed so the
/// session cookie reaches the event API; an unparsable origin is skipped.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(origin = %origin, error = %e, "skipping invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60))
}

/// Page routes behind the edge guard plus the JSON API.
pub fn build_router(state: SharedState) -> Router {
    let pages = PUBLIC_PAGES
        .iter()
        .chain(PROTECTED_PAGES)
        .fold(Router::<SharedState>::new(), |router, path| router.route(path, get(page)))
        .route_layer(middleware::from_fn_with_state(state.clone(), edge_guard));

    let api = Router::<SharedState>::new()
        .route("/api/session/check", post(check_session))
        .route(
            "/api/events",
            get(list_events).post(record_event).delete(clear_events),
        )
        .route("/api/events/page-view", post(record_page_view))
        .route("/api/events/error", post(record_error))
        .route("/api/governance/stats", post(governance_stats))
        .route("/healthz", get(healthz))
        .layer(cors_layer(&state.config.cors_origins));

    pages.merge(api).with_state(state)
}

pub async fn serve(state: SharedState) -> InsureResult<()> {
    let address = format!("{}:{}", state.config.host, state.config.port);
    let app = build_router(state);

    let listener = TcpListener::bind(&address)
        .await
        .map_err(|e| InsureError::io(format!("bind {address}"), e))?;
    tracing::info!("listening on http://{address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| InsureError::io("serve", e))?;

    tracing::info!("server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        tracing::info!("received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                tracing::info!("received terminate signal, shutting down");
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
