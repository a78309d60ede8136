//! Loopback HTTP fixtures for gateway integration tests.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Request captured by the loopback server.
#[allow(dead_code)]
pub struct Captured {
    /// Request line and headers.
    pub head: String,
    /// Raw request body.
    pub body: Vec<u8>,
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

fn content_length(head: &str) -> usize {
    head.lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0)
}

fn is_chunked(head: &str) -> bool {
    head.lines()
        .filter_map(|line| line.split_once(':'))
        .any(|(name, value)| {
            name.eq_ignore_ascii_case("transfer-encoding") && value.trim().eq_ignore_ascii_case("chunked")
        })
}

/// Serves exactly one canned response and returns the API base URL.
#[allow(dead_code)]
pub async fn serve_once(status_line: &'static str, body: &'static str) -> (String, JoinHandle<Captured>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("listener should bind");
    let addr = listener.local_addr().expect("listener address");

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("connection should arrive");
        let mut buffer = Vec::new();
        let mut chunk = [0_u8; 4096];

        let header_end = loop {
            let read = socket.read(&mut chunk).await.expect("read should work");
            if read == 0 {
                break buffer.len();
            }
            buffer.extend_from_slice(&chunk[..read]);
            if let Some(position) = find(&buffer, b"\r\n\r\n") {
                break position + 4;
            }
        };

        let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
        let chunked = is_chunked(&head);
        let expected = header_end + content_length(&head);
        loop {
            let complete = if chunked {
                buffer.ends_with(b"0\r\n\r\n")
            } else {
                buffer.len() >= expected
            };
            if complete {
                break;
            }
            let read = socket.read(&mut chunk).await.expect("read should work");
            if read == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..read]);
        }

        let response = format!(
            "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).await.expect("write should work");
        let _ = socket.shutdown().await;

        Captured {
            head,
            body: buffer[header_end..].to_vec(),
        }
    });

    (format!("http://{addr}/api/v1"), handle)
}

/// Accepts one connection and never answers.
#[allow(dead_code)]
pub async fn serve_silent() -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("listener should bind");
    let addr = listener.local_addr().expect("listener address");

    let handle = tokio::spawn(async move {
        let (_socket, _) = listener.accept().await.expect("connection should arrive");
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    (format!("http://{addr}/api/v1"), handle)
}
