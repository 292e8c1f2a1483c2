//! Exercises the HTTP provider against a one-shot local server.

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use exemplar_embed::{EmbedProvider, OpenAiProvider, ProviderError};

/// Serves a single canned response and returns the raw request it received.
async fn serve_once(
    status: &'static str,
    body: &'static str,
) -> (String, tokio::task::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        let mut raw = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.expect("read");
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&raw).to_string();
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|l| {
                        let lower = l.to_ascii_lowercase();
                        lower
                            .strip_prefix("content-length:")
                            .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                    })
                    .unwrap_or(0);
                if raw.len() >= header_end + 4 + content_length {
                    break;
                }
            }
        }
        let response = format!(
            "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\
             connection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.expect("write");
        socket.shutdown().await.ok();
        String::from_utf8_lossy(&raw).to_string()
    });
    (format!("http://{}/v1", addr), handle)
}

fn provider(base_url: &str) -> OpenAiProvider {
    OpenAiProvider::new(
        base_url,
        "text-embedding-ada-002",
        "sk-test".to_string(),
        Duration::from_secs(5),
    )
    .expect("provider")
}

#[tokio::test]
async fn parses_embeddings_in_index_order() {
    let body = r#"{"object":"list","data":[
        {"object":"embedding","index":1,"embedding":[0.0,1.0]},
        {"object":"embedding","index":0,"embedding":[1.0,0.0]}
    ],"model":"text-embedding-ada-002"}"#;
    let (url, server) = serve_once("200 OK", body).await;
    let out = provider(&url)
        .embed(&["first".to_string(), "second".to_string()])
        .await
        .expect("embed");
    assert_eq!(out, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);

    let request = server.await.expect("server");
    assert!(request.starts_with("POST /v1/embeddings"));
    assert!(request.to_ascii_lowercase().contains("authorization: bearer sk-test"));
    assert!(request.contains("\"input\":[\"first\",\"second\"]"));
}

#[tokio::test]
async fn rate_limit_is_transient() {
    let (url, _server) = serve_once("429 Too Many Requests", r#"{"error":"slow down"}"#).await;
    let err = provider(&url).embed(&["a".to_string()]).await.expect_err("429");
    assert!(err.is_transient(), "{err}");
}

#[tokio::test]
async fn unauthorized_is_permanent() {
    let (url, _server) = serve_once("401 Unauthorized", r#"{"error":"bad key"}"#).await;
    let err = provider(&url).embed(&["a".to_string()]).await.expect_err("401");
    assert!(matches!(err, ProviderError::Permanent(_)));
}

#[tokio::test]
async fn unreachable_endpoint_is_transient() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let err = provider(&format!("http://{}", addr))
        .embed(&["a".to_string()])
        .await
        .expect_err("refused");
    assert!(err.is_transient(), "{err}");
}

#[tokio::test]
async fn duplicate_indices_are_rejected() {
    let body = r#"{"object":"list","data":[
        {"object":"embedding","index":0,"embedding":[1.0,0.0]},
        {"object":"embedding","index":0,"embedding":[0.0,1.0]}
    ],"model":"text-embedding-ada-002"}"#;
    let (url, _server) = serve_once("200 OK", body).await;
    let err = provider(&url)
        .embed(&["first".to_string(), "second".to_string()])
        .await
        .expect_err("index 1 is missing");
    assert!(matches!(err, ProviderError::Permanent(_)), "{err}");
}

#[tokio::test]
async fn short_response_is_rejected() {
    let body = r#"{"object":"list","data":[
        {"object":"embedding","index":0,"embedding":[1.0,0.0]}
    ],"model":"text-embedding-ada-002"}"#;
    let (url, _server) = serve_once("200 OK", body).await;
    let err = provider(&url)
        .embed(&["first".to_string(), "second".to_string()])
        .await
        .expect_err("one vector for two inputs");
    assert!(matches!(err, ProviderError::Permanent(_)), "{err}");
}
