mod helpers;

use axum::http::StatusCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn vault_answering(status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/sys/health"))
        .respond_with(ResponseTemplate::new(status).set_body_string("{}"))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn health_ok() {
    let vault = vault_answering(200).await;
    let app = helpers::test_app_with_vault(&vault.uri());
    let (status, body) = helpers::get_text(&app.router, "", "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Health check succeeded\n");
}

#[tokio::test]
async fn health_ok_when_standby() {
    let vault = vault_answering(429).await;
    let app = helpers::test_app_with_vault(&vault.uri());
    let (status, body) = helpers::get_text(&app.router, "", "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Health check succeeded\n");
}

#[tokio::test]
async fn health_fails_on_server_error() {
    let vault = vault_answering(500).await;
    let app = helpers::test_app_with_vault(&vault.uri());
    let (status, body) = helpers::get_text(&app.router, "", "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body, "Health check failed\n");
}

#[tokio::test]
async fn health_fails_when_unreachable() {
    let app = helpers::test_app_with_vault("http://127.0.0.1:1");
    let (status, body) = helpers::get_text(&app.router, "", "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body, "Health check failed\n");
}

/// A healthy status followed by a truncated body still counts as healthy.
#[tokio::test]
async fn health_ok_with_bad_content_length() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 1024];
        let _ = socket.read(&mut buf).await;
        let _ = socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n{}")
            .await;
        let _ = socket.shutdown().await;
    });

    let app = helpers::test_app_with_vault(&format!("http://{addr}"));
    let (status, body) = helpers::get_text(&app.router, "", "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Health check succeeded\n");
}

#[tokio::test]
async fn health_needs_no_credentials() {
    let vault = vault_answering(200).await;
    let app = helpers::test_app_with_vault(&vault.uri());
    let (status, _) = helpers::get_text(&app.router, "vault:admin:wrong", "/health").await;
    assert_eq!(status, StatusCode::OK);
}
