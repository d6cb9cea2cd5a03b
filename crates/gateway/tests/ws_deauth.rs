//! WebSocket behaviour against a real listener.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    futures::{SinkExt, StreamExt},
    serde_json::{Value, json},
    switchyard_auth::{CookieSettings, Identity},
    switchyard_common::PanicReport,
    switchyard_gateway::{
        CallResult, DEAUTH_CLOSE_CODE, Gateway, GatewayContext, Handler, HandlerSet, Handlers,
        ProcRegistry, WsCall, initialize,
    },
    tokio::{net::TcpListener, time::timeout},
    tokio_tungstenite::{
        MaybeTlsStream, WebSocketStream, connect_async,
        tungstenite::{Message, client::IntoClientRequest},
    },
};

type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const TIMEOUT: Duration = Duration::from_secs(5);

async fn exploding_proc(_call: WsCall) -> CallResult {
    panic!("proc exploded")
}

async fn boot(reports: Arc<AtomicUsize>) -> (Arc<Gateway>, String) {
    let procs = ProcRegistry::new()
        .register("echo", |call| async move { Ok(call.params) })
        .register("whoami", |call| async move {
            Ok(json!(call.identity.map(|i| i.to_string())))
        })
        .register("explode", exploding_proc)
        .register("early", |call: WsCall| {
            // Fails before the future exists when params is not a string.
            let len = call.params.as_str().map(str::len).unwrap();
            async move { Ok(json!(len)) }
        });
    let ctx = GatewayContext {
        auth: CookieSettings {
            name: "sess".into(),
            store_id: "ws-test-store".into(),
            path: "/".into(),
            domain: String::new(),
            max_age: "3600".into(),
        },
        on_panic: Some(Arc::new(move |_r: &PanicReport| {
            reports.fetch_add(1, Ordering::SeqCst);
        })),
        handlers: Handlers {
            ws: HandlerSet {
                public: Vec::new(),
                authd: vec![("/ws/live".into(), Handler::ws("live", "tests::ws", procs))],
            },
            ..Handlers::default()
        },
        ..GatewayContext::default()
    };
    let gateway = Arc::new(initialize(ctx).unwrap());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = gateway.router();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (gateway, format!("ws://{addr}/ws/live"))
}

async fn connect(gateway: &Gateway, url: &str, who: &str) -> Client {
    let (_, cookie) = gateway.auth().login(Identity::from(who));
    let mut req = url.into_client_request().unwrap();
    req.headers_mut().insert(
        http::header::COOKIE,
        http::HeaderValue::from_str(&format!("{}={}", cookie.name(), cookie.value())).unwrap(),
    );
    let (ws, _) = timeout(TIMEOUT, connect_async(req)).await.unwrap().unwrap();
    ws
}

async fn next_json(ws: &mut Client) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("frame in time")
            .expect("stream open")
            .unwrap();
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn call(ws: &mut Client, frame: Value) -> Value {
    ws.send(Message::text(frame.to_string())).await.unwrap();
    next_json(ws).await
}

#[tokio::test]
async fn hello_then_procedure_calls() {
    let reports = Arc::new(AtomicUsize::new(0));
    let (gateway, url) = boot(Arc::clone(&reports)).await;
    let mut ws = connect(&gateway, &url, "alice").await;

    let hello = next_json(&mut ws).await;
    assert_eq!(hello["type"], "hello");
    assert!(!hello["connId"].as_str().unwrap().is_empty());
    assert_eq!(hello["version"], gateway.version().current_version());

    let res = call(&mut ws, json!({ "id": "1", "proc": "echo", "params": { "a": 1 } })).await;
    assert_eq!(res, json!({ "type": "res", "id": "1", "ok": true, "payload": { "a": 1 } }));

    let res = call(&mut ws, json!({ "id": "2", "proc": "whoami" })).await;
    assert_eq!(res["payload"], "alice");

    let res = call(&mut ws, json!({ "id": "3", "proc": "nope" })).await;
    assert_eq!(res["ok"], false);
    assert_eq!(res["error"]["code"], "UNKNOWN_PROC");

    ws.send(Message::text("{not json")).await.unwrap();
    let res = next_json(&mut ws).await;
    assert_eq!(res["error"]["code"], "INVALID_FRAME");

    let res = call(&mut ws, json!({ "id": "4", "proc": "explode" })).await;
    assert_eq!(res["id"], "4");
    assert_eq!(res["error"]["code"], "INTERNAL");
    assert_eq!(reports.load(Ordering::SeqCst), 1);

    // Still usable after a failed procedure.
    let res = call(&mut ws, json!({ "id": "5", "proc": "echo", "params": 7 })).await;
    assert_eq!(res["payload"], 7);

    let res = call(&mut ws, json!({ "id": "6", "proc": "early", "params": "abc" })).await;
    assert_eq!(res["payload"], 3);

    let res = call(&mut ws, json!({ "id": "7", "proc": "early" })).await;
    assert_eq!(res["id"], "7");
    assert_eq!(res["error"]["code"], "INTERNAL");
    assert_eq!(reports.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn version_changes_are_pushed() {
    let (gateway, url) = boot(Arc::new(AtomicUsize::new(0))).await;
    let mut ws = connect(&gateway, &url, "alice").await;
    assert_eq!(next_json(&mut ws).await["type"], "hello");

    gateway.version().bump();
    let pushed = next_json(&mut ws).await;
    assert_eq!(pushed["type"], "version");
    assert_eq!(pushed["version"], gateway.version().current_version());
}

#[tokio::test]
async fn de_authenticate_closes_only_that_identitys_connections() {
    let (gateway, url) = boot(Arc::new(AtomicUsize::new(0))).await;
    let mut alice = connect(&gateway, &url, "alice").await;
    let mut bob = connect(&gateway, &url, "bob").await;
    assert_eq!(next_json(&mut alice).await["type"], "hello");
    assert_eq!(next_json(&mut bob).await["type"], "hello");
    assert_eq!(gateway.connections().count_for(&Identity::from("alice")), 1);

    gateway.auth().de_authenticate(&Identity::from("alice"));

    assert_eq!(next_json(&mut alice).await, json!({ "type": "deauth" }));
    let closing = timeout(TIMEOUT, alice.next())
        .await
        .expect("close in time")
        .expect("close frame")
        .unwrap();
    match closing {
        Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), DEAUTH_CLOSE_CODE),
        other => panic!("expected close frame, got {other:?}"),
    }

    // Bob is untouched.
    let res = call(&mut bob, json!({ "id": "1", "proc": "whoami" })).await;
    assert_eq!(res["payload"], "bob");

    // The closed connection leaves the registry.
    timeout(TIMEOUT, async {
        while gateway.connections().count_for(&Identity::from("alice")) > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
}
