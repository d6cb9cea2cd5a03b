//! Demo application served by `switchyard serve`.
//!
//! A small site with a password login, an authenticated dashboard, two JSON
//! endpoints, a live WebSocket and a couple of embedded static files.

use std::sync::Arc;

use {
    axum::{
        http::{Method, StatusCode, header},
        response::{Html, IntoResponse, Redirect, Response},
    },
    serde_json::json,
    switchyard_auth::{Identity, constant_time_eq},
    switchyard_gateway::{
        CallResult, ErrorShape, Handler, HandlerSet, Handlers, ProcRegistry, RequestContext,
        WsCall, error_codes,
    },
    tracing::{info, warn},
};

const APP_CSS: &str = "body{font-family:system-ui,sans-serif;margin:2rem auto;max-width:40rem}\
                       nav a{margin-right:1rem}";

const APP_JS: &str = r#"(() => {
  const el = document.getElementById("live");
  if (!el) return;
  const ws = new WebSocket(`${location.protocol === "https:" ? "wss" : "ws"}://${location.host}/ws/live`);
  ws.onmessage = (ev) => {
    const frame = JSON.parse(ev.data);
    if (frame.type === "version") location.reload();
    if (frame.type === "deauth") location.assign("/login");
    el.textContent = ev.data;
  };
  ws.onopen = () => ws.send(JSON.stringify({ id: "1", proc: "whoami" }));
})();
"#;

fn layout(title: &str, body: &str) -> Html<String> {
    Html(format!(
        "<!doctype html><html><head><title>{title}</title>\
         <link rel=\"stylesheet\" href=\"/static/app.css\"></head>\
         <body><nav><a href=\"/\">Home</a><a href=\"/dashboard\">Dashboard</a>\
         <a href=\"/logout\">Log out</a></nav>{body}\
         <script src=\"/static/app.js\"></script></body></html>"
    ))
}

/// Only same-site absolute paths are followed after login.
fn safe_next(next: Option<&String>) -> &str {
    match next {
        Some(n) if n.starts_with('/') && !n.starts_with("//") => n,
        _ => "/dashboard",
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

async fn home(ctx: RequestContext) -> Response {
    layout(
        "switchyard",
        &format!(
            "<h1>switchyard</h1><p>App version {}.</p><p><a href=\"/login\">Log in</a></p>",
            escape(&ctx.version)
        ),
    )
    .into_response()
}

async fn not_found(ctx: RequestContext) -> Response {
    (
        StatusCode::NOT_FOUND,
        layout(
            "Not found",
            &format!("<h1>Not found</h1><p>Nothing lives at {}.</p>", escape(ctx.uri.path())),
        ),
    )
        .into_response()
}

fn login_form(next: &str, error: Option<&str>) -> Response {
    let error = error
        .map(|e| format!("<p class=\"error\">{}</p>", escape(e)))
        .unwrap_or_default();
    layout(
        "Log in",
        &format!(
            "<h1>Log in</h1>{error}<form method=\"post\" action=\"/login\">\
             <input type=\"hidden\" name=\"next\" value=\"{}\">\
             <label>User <input name=\"username\" autocomplete=\"username\"></label>\
             <label>Password <input name=\"password\" type=\"password\"></label>\
             <button>Log in</button></form>",
            escape(next)
        ),
    )
    .into_response()
}

async fn login(password: Option<Arc<str>>, ctx: RequestContext) -> Response {
    if ctx.method != Method::POST {
        return login_form(safe_next(ctx.query.get("next")), None);
    }

    let form = ctx.form();
    let next = safe_next(form.get("next")).to_string();
    let Some(expected) = password else {
        warn!("login attempted but SWITCHYARD_PASSWORD is not set");
        return login_form(&next, Some("Login is disabled on this server."));
    };
    let username = form.get("username").map(|u| u.trim()).unwrap_or_default();
    let supplied = form.get("password").map(String::as_str).unwrap_or_default();
    if username.is_empty() || !constant_time_eq(supplied, &expected) {
        return (StatusCode::UNAUTHORIZED, login_form(&next, Some("Wrong user or password.")))
            .into_response();
    }

    let (session, cookie) = ctx.auth.login(Identity::new(username));
    info!(identity = %session.identity, "logged in");
    ([(header::SET_COOKIE, cookie.to_string())], Redirect::to(&next)).into_response()
}

async fn logout(ctx: RequestContext) -> Response {
    if let Some(identity) = &ctx.identity {
        ctx.auth.de_authenticate(identity);
    }
    (
        [(header::SET_COOKIE, ctx.auth.logout_cookie().to_string())],
        Redirect::to("/"),
    )
        .into_response()
}

async fn dashboard(ctx: RequestContext) -> Response {
    let who = ctx.identity.as_ref().map(Identity::as_str).unwrap_or_default();
    layout(
        "Dashboard",
        &format!(
            "<h1>Hello {}</h1><p>Version {}</p><pre id=\"live\"></pre>",
            escape(who),
            escape(&ctx.version)
        ),
    )
    .into_response()
}

async fn ping(ctx: RequestContext) -> CallResult {
    Ok(json!({ "pong": true, "version": &*ctx.version }))
}

async fn me(ctx: RequestContext) -> CallResult {
    let identity = ctx.identity.ok_or_else(|| {
        ErrorShape::new(error_codes::UNAUTHORIZED, "no identity on an authenticated route")
    })?;
    Ok(json!({ "identity": identity }))
}

async fn whoami(call: WsCall) -> CallResult {
    Ok(json!({ "identity": call.identity, "connId": call.conn_id }))
}

async fn server_time(_call: WsCall) -> CallResult {
    Ok(json!(chrono::Utc::now().to_rfc3339()))
}

async fn static_file(ctx: RequestContext) -> Response {
    let (content_type, body) = match ctx.path_param("path") {
        Some("app.css") => ("text/css; charset=utf-8", APP_CSS),
        Some("app.js") => ("text/javascript; charset=utf-8", APP_JS),
        _ => return StatusCode::NOT_FOUND.into_response(),
    };
    (
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

/// Every route of the demo app. `password` gates `/login`; without one the
/// login form always refuses.
pub fn handlers(password: Option<String>) -> Handlers {
    let module = module_path!();
    let password: Option<Arc<str>> = password.filter(|p| !p.is_empty()).map(Arc::from);

    Handlers {
        html: HandlerSet {
            public: vec![
                ("/|/index".into(), Handler::page("home", module, home)),
                (
                    "/login".into(),
                    Handler::page("login", module, move |ctx| login(password.clone(), ctx)),
                ),
            ],
            authd: vec![
                ("/dashboard".into(), Handler::page("dashboard", module, dashboard)),
                ("/logout".into(), Handler::page("logout", module, logout)),
            ],
        },
        xhr: HandlerSet {
            public: vec![("/api/ping".into(), Handler::xhr("ping", module, ping))],
            authd: vec![("/api/me".into(), Handler::xhr("me", module, me))],
        },
        ws: HandlerSet {
            public: Vec::new(),
            authd: vec![(
                "/ws/live".into(),
                Handler::ws(
                    "live",
                    module,
                    ProcRegistry::new()
                        .register("echo", |call: WsCall| async move { Ok(call.params) })
                        .register("whoami", whoami)
                        .register("time", server_time),
                ),
            )],
        },
        file: vec![("/static/{path*}".into(), Handler::page("static", module, static_file))],
        not_found: Some(Handler::page("not_found", module, not_found)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use {
        axum::{body::Body, http::Request},
        switchyard_auth::CookieSettings,
        switchyard_common::PanicReport,
        switchyard_gateway::{Gateway, GatewayContext, build_route_table, initialize},
        tower::ServiceExt,
    };

    use super::*;

    fn gateway() -> Gateway {
        initialize(GatewayContext {
            auth: CookieSettings {
                name: "sess".into(),
                store_id: "demo-secret".into(),
                path: "/".into(),
                domain: String::new(),
                max_age: "3600".into(),
            },
            on_panic: Some(Arc::new(|_r: &PanicReport| {})),
            handlers: handlers(Some("hunter2".into())),
            ..GatewayContext::default()
        })
        .unwrap()
    }

    fn post_login(body: &'static str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/login")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap()
    }

    #[test]
    fn next_must_be_a_local_path() {
        assert_eq!(safe_next(Some(&"/settings".to_string())), "/settings");
        assert_eq!(safe_next(Some(&"//evil.example".to_string())), "/dashboard");
        assert_eq!(safe_next(Some(&"https://evil.example".to_string())), "/dashboard");
        assert_eq!(safe_next(None), "/dashboard");
    }

    #[test]
    fn demo_routes_register_cleanly() {
        let table = build_route_table(&handlers(None)).unwrap();
        assert!(table.summarize().iter().any(|e| e.pattern == "/|/index"));
    }

    #[tokio::test]
    async fn login_sets_cookie_that_opens_the_dashboard() {
        let gw = gateway();
        let resp = gw
            .router()
            .oneshot(post_login("username=alice&password=hunter2&next=%2Fdashboard"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(resp.headers()[header::LOCATION], "/dashboard");
        let set_cookie = resp.headers()[header::SET_COOKIE].to_str().unwrap();
        let pair = set_cookie.split(';').next().unwrap().to_string();

        let resp = gw
            .router()
            .oneshot(
                Request::builder()
                    .uri("/api/me")
                    .header(header::COOKIE, pair)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["payload"]["identity"], "alice");
    }

    #[tokio::test]
    async fn wrong_password_is_refused() {
        let gw = gateway();
        let resp = gw
            .router()
            .oneshot(post_login("username=alice&password=nope"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(resp.headers().get(header::SET_COOKIE).is_none());
        assert_eq!(gw.auth().session_count(), 0);
    }

    #[tokio::test]
    async fn static_files_and_not_found() {
        let gw = gateway();
        let resp = gw
            .router()
            .oneshot(Request::builder().uri("/static/app.css").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/css; charset=utf-8");

        let resp = gw
            .router()
            .oneshot(Request::builder().uri("/missing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
