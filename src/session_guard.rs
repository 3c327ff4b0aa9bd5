//! Route protection for page requests
//!
//! [`evaluate`] is the only place the session policy lives. The request
//! middleware calls it before a page is produced and the
//! [`GuardedSession`](crate::web::GuardedSession) extractor calls it again
//! inside the handler, so both checks reach the same verdict for the same
//! inputs.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use url::form_urlencoded;

use crate::config::{SessionConfig, MAX_TTL_HOURS};
use crate::session::SessionRecord;

pub const SIGN_IN_MESSAGE: &str = "Please sign in to access this page";
pub const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired. Please sign in again.";

/// Path prefixes served as build assets.
const ASSET_PREFIXES: &[&str] = &["/_next/", "/static/", "/assets/"];
const ASSET_FILES: &[&str] = &["/favicon.ico", "/robots.txt", "/sitemap.xml"];
/// File extensions served from anywhere as public assets.
const ASSET_EXTENSIONS: &[&str] = &[
    "js", "css", "map", "png", "jpg", "jpeg", "gif", "svg", "ico", "webp", "avif", "woff", "woff2",
    "ttf", "otf",
];

/// Why a request was sent to the sign-in page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedirectReason {
    SignInRequired,
    SessionExpired,
}

impl RedirectReason {
    pub fn message(&self) -> &'static str {
        match self {
            RedirectReason::SignInRequired => SIGN_IN_MESSAGE,
            RedirectReason::SessionExpired => SESSION_EXPIRED_MESSAGE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedirectDescriptor {
    pub target: String,
    pub callback_url: Option<String>,
    pub reason: Option<RedirectReason>,
}

impl RedirectDescriptor {
    fn sign_in(target: &str, callback: &str, reason: RedirectReason) -> Self {
        Self {
            target: target.to_string(),
            callback_url: Some(callback.to_string()),
            reason: Some(reason),
        }
    }

    fn plain(target: &str) -> Self {
        Self {
            target: target.to_string(),
            callback_url: None,
            reason: None,
        }
    }

    pub fn message(&self) -> Option<&'static str> {
        self.reason.map(|r| r.message())
    }

    /// Target with `callbackUrl` and `message` as a form-encoded query.
    pub fn location(&self) -> String {
        if self.callback_url.is_none() && self.reason.is_none() {
            return self.target.clone();
        }

        let mut query = form_urlencoded::Serializer::new(String::new());
        if let Some(callback) = &self.callback_url {
            query.append_pair("callbackUrl", callback);
        }
        if let Some(message) = self.message() {
            query.append_pair("message", message);
        }
        format!("{}?{}", self.target, query.finish())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GuardDecision {
    Authorized,
    Redirect(RedirectDescriptor),
}

/// Paths and expiry window the guard enforces.
#[derive(Debug, Clone)]
pub struct GuardPolicy {
    pub ttl: Duration,
    pub signin_path: String,
    pub home_path: String,
    pub public_paths: Vec<String>,
    pub auth_paths: Vec<String>,
}

impl Default for GuardPolicy {
    fn default() -> Self {
        GuardPolicy::from(&SessionConfig::default())
    }
}

impl From<&SessionConfig> for GuardPolicy {
    /// Out-of-range TTLs are clamped to [`MAX_TTL_HOURS`]; `validate` rejects
    /// them before a server starts.
    fn from(cfg: &SessionConfig) -> Self {
        let hours = cfg.ttl_hours.min(MAX_TTL_HOURS);
        GuardPolicy {
            ttl: Duration::try_hours(hours).unwrap_or_else(|| Duration::hours(MAX_TTL_HOURS)),
            signin_path: cfg.signin_path.clone(),
            home_path: cfg.home_path.clone(),
            public_paths: cfg.public_paths.clone(),
            auth_paths: cfg.auth_paths.clone(),
        }
    }
}

impl GuardPolicy {
    pub fn is_public(&self, path: &str) -> bool {
        let path = normalize(path);
        self.public_paths.iter().any(|p| normalize(p) == path)
    }

    pub fn is_auth_page(&self, path: &str) -> bool {
        let path = normalize(path);
        self.auth_paths.iter().any(|p| normalize(p) == path)
    }
}

/// Strip the query and any trailing slash so `/about/` and `/about?x=1`
/// match `/about`.
fn normalize(path: &str) -> &str {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    }
}

/// Build assets are never guarded. Outside the asset prefixes only a closed
/// set of extensions counts, so `/claims/claim.42` is still a page.
pub fn is_static_asset(path: &str) -> bool {
    let path = normalize(path);
    if ASSET_PREFIXES.iter().any(|p| path.starts_with(p)) || ASSET_FILES.contains(&path) {
        return true;
    }
    path.rsplit('/')
        .next()
        .and_then(|segment| segment.rsplit_once('.'))
        .is_some_and(|(stem, ext)| {
            !stem.is_empty() && ASSET_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
        })
}

/// Decide whether `path` may be served for `session` at `now`.
///
/// Asset paths pass first. A valid session on a sign-in or sign-up page is
/// sent home. Other public paths pass regardless of session. Everything
/// else requires a session with an address that is younger than the TTL.
pub fn evaluate(
    session: Option<&SessionRecord>,
    now: DateTime<Utc>,
    path: &str,
    policy: &GuardPolicy,
) -> GuardDecision {
    if is_static_asset(path) {
        return GuardDecision::Authorized;
    }

    let session = session.filter(|s| s.has_identity());
    let valid = session.is_some_and(|s| !s.is_expired(now, policy.ttl));

    if valid && policy.is_auth_page(path) {
        return GuardDecision::Redirect(RedirectDescriptor::plain(&policy.home_path));
    }
    if policy.is_public(path) {
        return GuardDecision::Authorized;
    }

    match session {
        None => GuardDecision::Redirect(RedirectDescriptor::sign_in(
            &policy.signin_path,
            path,
            RedirectReason::SignInRequired,
        )),
        Some(_) if !valid => GuardDecision::Redirect(RedirectDescriptor::sign_in(
            &policy.signin_path,
            path,
            RedirectReason::SessionExpired,
        )),
        Some(_) => GuardDecision::Authorized,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_at(at: DateTime<Utc>) -> SessionRecord {
        SessionRecord::new("0xabc", "msg", "0xabc", at)
    }

    fn redirect(decision: GuardDecision) -> RedirectDescriptor {
        match decision {
            GuardDecision::Redirect(r) => r,
            GuardDecision::Authorized => panic!("expected redirect"),
        }
    }

    #[test]
    fn missing_session_requires_sign_in() {
        let policy = GuardPolicy::default();
        let r = redirect(evaluate(None, Utc::now(), "/dashboard", &policy));
        assert_eq!(r.target, "/signin");
        assert_eq!(r.callback_url.as_deref(), Some("/dashboard"));
        assert_eq!(r.message(), Some(SIGN_IN_MESSAGE));
    }

    #[test]
    fn session_without_address_is_no_session() {
        let policy = GuardPolicy::default();
        let mut s = session_at(Utc::now());
        s.address.clear();
        let r = redirect(evaluate(Some(&s), Utc::now(), "/claims", &policy));
        assert_eq!(r.reason, Some(RedirectReason::SignInRequired));
    }

    #[test]
    fn expiry_at_and_after_window() {
        let policy = GuardPolicy::default();
        let now = Utc::now();
        for hours in [24, 25, 24 * 30] {
            let s = session_at(now - Duration::hours(hours));
            let r = redirect(evaluate(Some(&s), now, "/policies", &policy));
            assert_eq!(r.message(), Some(SESSION_EXPIRED_MESSAGE));
            assert_eq!(r.callback_url.as_deref(), Some("/policies"));
        }
    }

    #[test]
    fn fresh_session_is_authorized() {
        let policy = GuardPolicy::default();
        let now = Utc::now();
        for age in [Duration::zero(), Duration::hours(1), Duration::hours(24) - Duration::milliseconds(1)] {
            let s = session_at(now - age);
            assert_eq!(evaluate(Some(&s), now, "/governance", &policy), GuardDecision::Authorized);
        }
    }

    #[test]
    fn public_paths_pass_without_session() {
        let policy = GuardPolicy::default();
        let now = Utc::now();
        let expired = session_at(now - Duration::days(3));
        for path in ["/", "/about", "/signin", "/signup", "/about/"] {
            assert_eq!(evaluate(None, now, path, &policy), GuardDecision::Authorized, "{path}");
            assert_eq!(evaluate(Some(&expired), now, path, &policy), GuardDecision::Authorized, "{path}");
        }
    }

    #[test]
    fn valid_session_on_auth_pages_goes_home() {
        let policy = GuardPolicy::default();
        let now = Utc::now();
        let s = session_at(now);
        for path in ["/signin", "/signup"] {
            let r = redirect(evaluate(Some(&s), now, path, &policy));
            assert_eq!(r.target, "/");
            assert_eq!(r.location(), "/");
        }
        assert_eq!(evaluate(Some(&s), now, "/about", &policy), GuardDecision::Authorized);
        assert_eq!(evaluate(Some(&s), now, "/", &policy), GuardDecision::Authorized);
    }

    #[test]
    fn assets_always_pass() {
        let policy = GuardPolicy::default();
        for path in ["/_next/static/chunk.js", "/favicon.ico", "/images/logo.png", "/assets/x"] {
            assert!(is_static_asset(path), "{path}");
            assert_eq!(evaluate(None, Utc::now(), path, &policy), GuardDecision::Authorized);
        }
        assert!(!is_static_asset("/claims/new"));
        assert!(!is_static_asset("/.hidden"));
    }

    #[test]
    fn dotted_page_paths_stay_guarded() {
        let policy = GuardPolicy::default();
        for path in ["/claims/claim.42", "/policies/v1.2", "/governance/report.pdf", "/dashboard.html"] {
            assert!(!is_static_asset(path), "{path}");
            let r = redirect(evaluate(None, Utc::now(), path, &policy));
            assert_eq!(r.callback_url.as_deref(), Some(path));
        }
        assert!(is_static_asset("/images/Logo.PNG"));
    }

    #[test]
    fn oversized_ttl_does_not_panic() {
        let cfg = SessionConfig {
            ttl_hours: i64::MAX,
            ..SessionConfig::default()
        };
        let policy = GuardPolicy::from(&cfg);
        assert_eq!(policy.ttl, Duration::hours(MAX_TTL_HOURS));

        let s = session_at(Utc::now() - Duration::days(30));
        assert_eq!(evaluate(Some(&s), Utc::now(), "/claims", &policy), GuardDecision::Authorized);
    }

    #[test]
    fn location_encodes_query() {
        let r = redirect(evaluate(None, Utc::now(), "/claims/new", &GuardPolicy::default()));
        assert_eq!(
            r.location(),
            "/signin?callbackUrl=%2Fclaims%2Fnew&message=Please+sign+in+to+access+this+page"
        );
    }

    #[test]
    fn same_inputs_same_verdict() {
        let policy = GuardPolicy::default();
        let now = Utc::now();
        let s = session_at(now - Duration::hours(30));
        let first = evaluate(Some(&s), now, "/claims", &policy);
        let second = evaluate(Some(&s), now, "/claims", &policy);
        assert_eq!(first, second);
    }
}
