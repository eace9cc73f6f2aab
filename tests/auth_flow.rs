use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    extract::ConnectInfo,
    http::{header, Method, Request, StatusCode},
    Extension, Router,
};
use hdnotes::{
    api::{
        self,
        email::CodeSender,
        handlers::auth::{AuthConfig, AuthState, MemoryRateLimiter, NoopRateLimiter, RateLimits},
        ServerConfig,
    },
    store::{memory::MemoryStore, Purpose},
};
use serde_json::{json, Value};
use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};
use tower::ServiceExt;

#[derive(Default)]
struct Outbox {
    sent: Mutex<Vec<(String, String)>>,
}

impl Outbox {
    fn last_code_for(&self, email: &str) -> Option<String> {
        self.sent.lock().ok().and_then(|sent| {
            sent.iter()
                .rev()
                .find(|(to, _)| to == email)
                .map(|(_, code)| code.clone())
        })
    }

    fn count(&self) -> usize {
        self.sent.lock().map(|sent| sent.len()).unwrap_or_default()
    }
}

#[async_trait]
impl CodeSender for Outbox {
    async fn send_code(&self, to_email: &str, code: &str, _purpose: Purpose) -> Result<()> {
        self.sent
            .lock()
            .map_err(|_| anyhow!("outbox poisoned"))?
            .push((to_email.to_string(), code.to_string()));
        Ok(())
    }
}

struct TestApp {
    router: Router,
    outbox: Arc<Outbox>,
}

fn test_app() -> Result<TestApp> {
    test_app_with_limits(None)
}

fn test_app_with_limits(limits: Option<RateLimits>) -> Result<TestApp> {
    let store = Arc::new(MemoryStore::new());
    let outbox = Arc::new(Outbox::default());
    let state = match limits {
        Some(limits) => AuthState::new(
            AuthConfig::new("http://localhost:5173".to_string()),
            store.clone(),
            outbox.clone(),
            Arc::new(MemoryRateLimiter::new(Duration::from_secs(60), limits)),
        ),
        None => AuthState::new(
            AuthConfig::new("http://localhost:5173".to_string()),
            store.clone(),
            outbox.clone(),
            Arc::new(NoopRateLimiter),
        ),
    };
    let server_config = ServerConfig::new().with_sweep_interval_seconds(0);
    let router = api::app(Arc::new(state), store, &server_config)?;
    Ok(TestApp { router, outbox })
}

struct Reply {
    status: StatusCode,
    set_cookie: Option<String>,
    body: Value,
}

async fn call(
    app: &TestApp,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Result<Reply> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", "203.0.113.7");
    if let Some(token) = token {
        builder = builder.header(header::COOKIE, format!("hdnotes_session={token}"));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&body)?))?,
        None => builder.body(Body::empty())?,
    };

    let response = app.router.clone().oneshot(request).await?;
    let status = response.status();
    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    Ok(Reply {
        status,
        set_cookie,
        body,
    })
}

async fn sign_up(app: &TestApp, email: &str) -> Result<String> {
    let reply = call(
        app,
        Method::POST,
        "/api/auth/signup/send-otp",
        None,
        Some(json!({"email": email, "fullName": "Ada Lovelace", "dateOfBirth": "1990-12-10"})),
    )
    .await?;
    assert_eq!(reply.status, StatusCode::OK);

    let code = app
        .outbox
        .last_code_for(email)
        .ok_or_else(|| anyhow!("no code sent to {email}"))?;
    let reply = call(
        app,
        Method::POST,
        "/api/auth/signup/verify-otp",
        None,
        Some(json!({"email": email, "otp": code})),
    )
    .await?;
    assert_eq!(reply.status, StatusCode::OK);
    reply.body["token"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| anyhow!("no token in {}", reply.body))
}

#[tokio::test]
async fn signup_then_profile() -> Result<()> {
    let app = test_app()?;
    let reply = call(
        &app,
        Method::POST,
        "/api/auth/signup/send-otp",
        None,
        Some(json!({"email": " Ada@Example.com ", "fullName": "Ada Lovelace", "dateOfBirth": "1990-12-10"})),
    )
    .await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["message"], "Verification code sent to your email");

    let code = app
        .outbox
        .last_code_for("ada@example.com")
        .ok_or_else(|| anyhow!("code not delivered"))?;
    assert_eq!(code.len(), 6);

    let reply = call(
        &app,
        Method::POST,
        "/api/auth/signup/verify-otp",
        None,
        Some(json!({"email": "ada@example.com", "otp": code})),
    )
    .await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["user"]["email"], "ada@example.com");
    assert_eq!(reply.body["user"]["fullName"], "Ada Lovelace");
    assert_eq!(reply.body["user"]["dateOfBirth"], "1990-12-10");
    let cookie = reply.set_cookie.unwrap_or_default();
    assert!(cookie.starts_with("hdnotes_session="));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("SameSite=None"));

    let token = reply.body["token"].as_str().unwrap_or_default().to_string();
    let profile = call(&app, Method::GET, "/api/auth/profile", Some(&token), None).await?;
    assert_eq!(profile.status, StatusCode::OK);
    assert_eq!(profile.body["user"]["email"], "ada@example.com");
    Ok(())
}

#[tokio::test]
async fn code_is_single_use() -> Result<()> {
    let app = test_app()?;
    sign_up(&app, "grace@example.com").await?;

    call(
        &app,
        Method::POST,
        "/api/auth/signin/send-otp",
        None,
        Some(json!({"email": "grace@example.com"})),
    )
    .await?;
    let code = app
        .outbox
        .last_code_for("grace@example.com")
        .ok_or_else(|| anyhow!("signin code not delivered"))?;

    let first = call(
        &app,
        Method::POST,
        "/api/auth/signin/verify-otp",
        None,
        Some(json!({"email": "grace@example.com", "otp": code})),
    )
    .await?;
    assert_eq!(first.status, StatusCode::OK);

    let replay = call(
        &app,
        Method::POST,
        "/api/auth/signin/verify-otp",
        None,
        Some(json!({"email": "grace@example.com", "otp": code})),
    )
    .await?;
    assert_eq!(replay.status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn signin_does_not_reveal_accounts() -> Result<()> {
    let app = test_app()?;
    sign_up(&app, "known@example.com").await?;
    let sent_before = app.outbox.count();

    let known = call(
        &app,
        Method::POST,
        "/api/auth/signin/send-otp",
        None,
        Some(json!({"email": "known@example.com"})),
    )
    .await?;
    let unknown = call(
        &app,
        Method::POST,
        "/api/auth/signin/send-otp",
        None,
        Some(json!({"email": "nobody@example.com"})),
    )
    .await?;
    assert_eq!(known.status, StatusCode::OK);
    assert_eq!(known.status, unknown.status);
    assert_eq!(known.body, unknown.body);
    assert_eq!(app.outbox.count(), sent_before + 1);

    let wrong = call(
        &app,
        Method::POST,
        "/api/auth/signin/verify-otp",
        None,
        Some(json!({"email": "nobody@example.com", "otp": "123456"})),
    )
    .await?;
    assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong.body["error"], "Invalid code");
    Ok(())
}

#[tokio::test]
async fn duplicate_signup_conflicts() -> Result<()> {
    let app = test_app()?;
    sign_up(&app, "dup@example.com").await?;
    let reply = call(
        &app,
        Method::POST,
        "/api/auth/signup/send-otp",
        None,
        Some(json!({"email": "dup@example.com", "fullName": "Again", "dateOfBirth": "1991-01-01"})),
    )
    .await?;
    assert_eq!(reply.status, StatusCode::CONFLICT);
    Ok(())
}

#[tokio::test]
async fn logout_revokes_session() -> Result<()> {
    let app = test_app()?;
    let token = sign_up(&app, "bye@example.com").await?;

    let reply = call(&app, Method::POST, "/api/auth/logout", Some(&token), None).await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply
        .set_cookie
        .unwrap_or_default()
        .contains("Max-Age=0"));

    let profile = call(&app, Method::GET, "/api/auth/profile", Some(&token), None).await?;
    assert_eq!(profile.status, StatusCode::UNAUTHORIZED);

    // logging out twice is still fine
    let again = call(&app, Method::POST, "/api/auth/logout", Some(&token), None).await?;
    assert_eq!(again.status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn notes_require_session() -> Result<()> {
    let app = test_app()?;
    let reply = call(&app, Method::GET, "/api/notes", None, None).await?;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert!(reply.body["error"].is_string());

    let forged = call(&app, Method::GET, "/api/notes", Some("forged"), None).await?;
    assert_eq!(forged.status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn notes_are_owner_scoped() -> Result<()> {
    let app = test_app()?;
    let alice = sign_up(&app, "alice@example.com").await?;
    let bob = sign_up(&app, "bob@example.com").await?;

    let created = call(
        &app,
        Method::POST,
        "/api/notes",
        Some(&alice),
        Some(json!({"title": " Groceries ", "content": "milk, eggs"})),
    )
    .await?;
    assert_eq!(created.status, StatusCode::CREATED);
    assert_eq!(created.body["note"]["title"], "Groceries");
    let id = created.body["note"]["id"]
        .as_str()
        .ok_or_else(|| anyhow!("note id missing"))?
        .to_string();

    let listed = call(&app, Method::GET, "/api/notes", Some(&alice), None).await?;
    assert_eq!(listed.body["notes"].as_array().map(Vec::len), Some(1));
    let listed = call(&app, Method::GET, "/api/notes", Some(&bob), None).await?;
    assert_eq!(listed.body["notes"].as_array().map(Vec::len), Some(0));

    let path = format!("/api/notes/{id}");
    let stolen = call(
        &app,
        Method::PUT,
        &path,
        Some(&bob),
        Some(json!({"title": "mine", "content": "now"})),
    )
    .await?;
    assert_eq!(stolen.status, StatusCode::NOT_FOUND);
    let stolen = call(&app, Method::DELETE, &path, Some(&bob), None).await?;
    assert_eq!(stolen.status, StatusCode::NOT_FOUND);

    let updated = call(
        &app,
        Method::PUT,
        &path,
        Some(&alice),
        Some(json!({"title": "Groceries", "content": "milk, eggs, bread"})),
    )
    .await?;
    assert_eq!(updated.status, StatusCode::OK);
    assert_eq!(updated.body["note"]["content"], "milk, eggs, bread");

    let deleted = call(&app, Method::DELETE, &path, Some(&alice), None).await?;
    assert_eq!(deleted.status, StatusCode::OK);
    let gone = call(&app, Method::DELETE, &path, Some(&alice), None).await?;
    assert_eq!(gone.status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn invalid_note_rejected() -> Result<()> {
    let app = test_app()?;
    let token = sign_up(&app, "val@example.com").await?;
    let reply = call(
        &app,
        Method::POST,
        "/api/notes",
        Some(&token),
        Some(json!({"title": "   ", "content": "body"})),
    )
    .await?;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);

    let reply = call(
        &app,
        Method::PUT,
        "/api/notes/not-a-uuid",
        Some(&token),
        Some(json!({"title": "t", "content": "c"})),
    )
    .await?;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn unknown_route_is_json_404() -> Result<()> {
    let app = test_app()?;
    let reply = call(&app, Method::GET, "/api/nope", None, None).await?;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.body["error"], "Route not found");
    Ok(())
}

#[tokio::test]
async fn health_reports_store() -> Result<()> {
    let app = test_app()?;
    let reply = call(&app, Method::GET, "/api/health", None, None).await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["name"], env!("CARGO_PKG_NAME"));
    Ok(())
}

#[tokio::test]
async fn per_ip_throttle_returns_429() -> Result<()> {
    let limits = RateLimits {
        requests_per_ip: 2,
        ..RateLimits::default()
    };
    let app = test_app_with_limits(Some(limits))?;
    for _ in 0..2 {
        let reply = call(&app, Method::GET, "/api/health", None, None).await?;
        assert_eq!(reply.status, StatusCode::OK);
    }
    let reply = call(&app, Method::GET, "/api/health", None, None).await?;
    assert_eq!(reply.status, StatusCode::TOO_MANY_REQUESTS);
    assert!(reply.body["error"].is_string());
    Ok(())
}

#[tokio::test]
async fn send_code_limit_per_email() -> Result<()> {
    let limits = RateLimits {
        send_code_per_email: 1,
        ..RateLimits::default()
    };
    let app = test_app_with_limits(Some(limits))?;
    let body = json!({"email": "busy@example.com", "fullName": "Busy", "dateOfBirth": "1980-05-05"});
    let first = call(
        &app,
        Method::POST,
        "/api/auth/signup/send-otp",
        None,
        Some(body.clone()),
    )
    .await?;
    assert_eq!(first.status, StatusCode::OK);
    let second = call(&app, Method::POST, "/api/auth/signup/send-otp", None, Some(body)).await?;
    assert_eq!(second.status, StatusCode::TOO_MANY_REQUESTS);
    Ok(())
}

#[tokio::test]
async fn send_code_limit_per_peer_address() -> Result<()> {
    let limits = RateLimits {
        send_code_per_ip: 1,
        send_code_per_email: 10,
        ..RateLimits::default()
    };
    let app = test_app_with_limits(Some(limits))?;
    let router = app
        .router
        .clone()
        .layer(Extension(ConnectInfo(SocketAddr::from(([198, 51, 100, 9], 4000)))));

    let mut statuses = Vec::new();
    for email in ["one@example.com", "two@example.com", "three@example.com"] {
        let body = json!({"email": email, "fullName": "Peer", "dateOfBirth": "1980-05-05"});
        // No forwarding headers: the limit keys on the connection address.
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/auth/signup/send-otp")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&body)?))?;
        let response = router.clone().oneshot(request).await?;
        statuses.push(response.status());
    }
    assert_eq!(
        statuses,
        vec![
            StatusCode::OK,
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::TOO_MANY_REQUESTS
        ]
    );
    assert_eq!(app.outbox.count(), 1);
    Ok(())
}

#[tokio::test]
async fn signin_lockout_looks_the_same_for_unknown_emails() -> Result<()> {
    let app = test_app()?;
    sign_up(&app, "known@example.com").await?;
    for email in ["known@example.com", "ghost@example.com"] {
        let reply = call(
            &app,
            Method::POST,
            "/api/auth/signin/send-otp",
            None,
            Some(json!({"email": email})),
        )
        .await?;
        assert_eq!(reply.status, StatusCode::OK);
    }
    let code = app
        .outbox
        .last_code_for("known@example.com")
        .ok_or_else(|| anyhow!("no signin code sent"))?;
    let wrong = if code == "000000" { "111111" } else { "000000" };

    for attempt in 1..=6 {
        let mut replies = Vec::new();
        for email in ["known@example.com", "ghost@example.com"] {
            let reply = call(
                &app,
                Method::POST,
                "/api/auth/signin/verify-otp",
                None,
                Some(json!({"email": email, "otp": wrong})),
            )
            .await?;
            replies.push((reply.status, reply.body));
        }
        assert_eq!(replies[0], replies[1], "attempt {attempt}");
        assert_eq!(replies[0].0, StatusCode::UNAUTHORIZED);
    }
    Ok(())
}
