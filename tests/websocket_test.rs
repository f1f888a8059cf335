// Router-level tests for the WebSocket transport: upgrade preconditions
// are enforced before any client is registered.

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use surge::config::SurgeConfig;
use surge::server::{GameRules, ServerHost};
use surge::transport::WebSocketProvider;
use tower::ServiceExt;

struct NoRules;

impl GameRules for NoRules {
    type Command = String;
    type Event = String;
}

#[tokio::test]
async fn upgrade_requires_a_client_name() {
    let host = ServerHost::new(NoRules, SurgeConfig::default());
    let provider = WebSocketProvider::new("127.0.0.1:0");
    let app = provider.router(host.handle());

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/ws")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn plain_get_without_upgrade_headers_is_rejected() {
    let host = ServerHost::new(NoRules, SurgeConfig::default());
    let provider = WebSocketProvider::new("127.0.0.1:0");
    let app = provider.router(host.handle());

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/ws?name=ada")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    // Not a WebSocket handshake: rejected without registering anyone.
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let registered = host
        .handle()
        .with_server(|server| server.client_names().count())
        .await;
    assert_eq!(registered, 0);
}

#[tokio::test]
async fn no_sockets_are_tracked_before_any_connection() {
    let provider = WebSocketProvider::new("127.0.0.1:0");
    assert_eq!(provider.connection_count(), 0);
}
