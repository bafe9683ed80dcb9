//! Local HTTP stand-in for the Hyperliquid REST API (tests only).
//!
//! `POST /info` answers with `info_body`, `POST /exchange` with
//! `exchange_body`; one request per connection.
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const BTC_META: &str = r#"{"universe":[{"name":"BTC","szDecimals":5},{"name":"kPEPE","szDecimals":0}]}"#;

pub const RESTING: &str =
    r#"{"status":"ok","response":{"type":"order","data":{"statuses":[{"resting":{"oid":7}}]}}}"#;

pub const FILLED: &str = r#"{"status":"ok","response":{"type":"order","data":{"statuses":[{"filled":{"totalSz":"1.11111","avgPx":"90.0","oid":8}}]}}}"#;

/// Serve until the test runtime shuts down; returns the base URL.
pub async fn serve(info_body: &'static str, exchange_body: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        while let Ok((sock, _)) = listener.accept().await {
            tokio::spawn(respond(sock, info_body, exchange_body));
        }
    });
    url
}

async fn respond(mut sock: TcpStream, info_body: &'static str, exchange_body: &'static str) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head = loop {
        let n = match sock.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        buf.extend_from_slice(&chunk[..n]);
        let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else { continue };
        let head = String::from_utf8_lossy(&buf[..end]).to_string();
        if buf.len() >= end + 4 + content_length(&head) {
            break head;
        }
    };
    let body = if head.starts_with("POST /info") { info_body } else { exchange_body };
    let resp = format!(
        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = sock.write_all(resp.as_bytes()).await;
    let _ = sock.shutdown().await;
}

fn content_length(head: &str) -> usize {
    head.lines()
        .filter_map(|l| l.split_once(':'))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse().ok())
        .unwrap_or(0)
}
