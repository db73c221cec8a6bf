//! Asserts that for all `get_token` calls against the same key within a TTL
//! window, at most one upstream call is observed — 50 concurrent callers
//! should still only trigger a single token fetch. Stands up a minimal
//! hand-rolled HTTP/1.1 token endpoint on loopback — no mock server crate
//! needed for a single fixed JSON response — and drives `TokenCache::get_token`
//! concurrently against it.

use mockit_core::config::RelayConfig;
use mockit_core::oauth2_cache::TokenCache;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Spawn a token endpoint that always returns `{"access_token":"T","expires_in":60}`
/// and counts how many requests it served. Reads the full request (headers +
/// `Content-Length` body) before responding so the client's write never blocks.
async fn spawn_token_endpoint() -> (u16, Arc<AtomicUsize>) {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_clone = hits.clone();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else { return };
            let hits = hits_clone.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                let header_end = loop {
                    let n = socket.read(&mut chunk).await.unwrap_or(0);
                    if n == 0 {
                        return;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                    if let Some(pos) = find_subslice(&buf, b"\r\n\r\n") {
                        break pos + 4;
                    }
                };
                let headers = String::from_utf8_lossy(&buf[..header_end]);
                let content_length: usize = headers
                    .lines()
                    .find_map(|l| l.to_ascii_lowercase().starts_with("content-length").then(|| l.to_string()))
                    .and_then(|l| l.split(':').nth(1).map(|v| v.trim().to_string()))
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);
                while buf.len() < header_end + content_length {
                    let n = socket.read(&mut chunk).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }

                hits.fetch_add(1, Ordering::SeqCst);
                let body = br#"{"access_token":"T","token_type":"bearer","expires_in":60}"#;
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.write_all(body).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (port, hits)
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[tokio::test]
async fn fifty_concurrent_misses_issue_exactly_one_token_fetch() {
    let (port, hits) = spawn_token_endpoint().await;
    let cfg = RelayConfig {
        remote_url: "http://upstream".to_string(),
        token_url: Some(format!("http://127.0.0.1:{port}/token")),
        client_id: Some("client-a".to_string()),
        client_secret: Some("secret".to_string()),
        scope: None,
        grant_type: None,
        headers: None,
        ignore_ssl_errors: false,
    };

    let cache = Arc::new(TokenCache::new());
    let mut handles = Vec::new();
    for _ in 0..50 {
        let cache = cache.clone();
        let cfg = cfg.clone();
        handles.push(tokio::spawn(async move { cache.get_token(&cfg).await }));
    }

    let results: Vec<_> = futures::future::join_all(handles).await;
    for result in results {
        assert_eq!(result.unwrap().unwrap(), "T");
    }
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
