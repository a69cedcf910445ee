//! A tiny hand-rolled HTTP/1.1 stub server for integration tests, standing
//! in for a real catalog server. No mocking crate: just enough request-line
//! parsing to route on `METHOD path` and reply with a canned status/body.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

#[derive(Clone)]
pub struct StubResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub content_type: &'static str,
}

impl StubResponse {
    pub fn json(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into().into_bytes(),
            content_type: "application/json",
        }
    }

    pub fn bytes(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
            content_type: "application/octet-stream",
        }
    }
}

pub struct HttpStub {
    pub base_url: String,
}

/// Spawn a stub server whose routing table is keyed `"METHOD /path"`
/// (query string included, verbatim). Unmatched requests get a 404. The
/// server runs until the test process exits — there is no explicit
/// shutdown, matching the lifetime of a `#[tokio::test]`.
pub async fn spawn_stub(routes: HashMap<&'static str, StubResponse>) -> HttpStub {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stub listener");
    let addr = listener.local_addr().expect("stub local addr");
    let routes = Arc::new(routes);

    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                break;
            };
            let routes = routes.clone();
            tokio::spawn(handle_conn(socket, routes));
        }
    });

    HttpStub {
        base_url: format!("http://{addr}"),
    }
}

async fn handle_conn(mut socket: TcpStream, routes: Arc<HashMap<&'static str, StubResponse>>) {
    let (reader, mut writer) = socket.split();
    let mut reader = BufReader::new(reader);

    let mut request_line = String::new();
    if reader.read_line(&mut request_line).await.unwrap_or(0) == 0 {
        return;
    }
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("GET").to_string();
    let path = parts.next().unwrap_or("/").to_string();

    let mut content_length: usize = 0;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
            break;
        }
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            break;
        }
        if let Some(value) = trimmed.to_ascii_lowercase().strip_prefix("content-length:") {
            content_length = value.trim().parse().unwrap_or(0);
        }
    }
    if content_length > 0 {
        let mut body = vec![0u8; content_length];
        let _ = reader.read_exact(&mut body).await;
    }

    let key = format!("{method} {path}");
    let (status, body, content_type) = match routes.get(key.as_str()) {
        Some(r) => (r.status, r.body.clone(), r.content_type),
        None => (404, b"{}".to_vec(), "application/json"),
    };

    let status_text = match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        409 => "Conflict",
        422 => "Unprocessable Entity",
        _ => "OK",
    };
    let mut head = format!(
        "HTTP/1.1 {status} {status_text}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    )
    .into_bytes();
    head.extend_from_slice(&body);
    let _ = writer.write_all(&head).await;
    let _ = writer.flush().await;
}
