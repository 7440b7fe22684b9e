//! Minimal HTTP/1.1 front for the RPC surface.
//!
//! One request per connection, bounded reads, no keep-alive. Anything
//! heavier belongs in an ingress proxy; the core only needs enough framing
//! to speak its versioned JSON contract.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use solroute_commons::metrics::gather_metrics;
use solroute_core::error::{RouterError, RouterResult};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ErrorBody, ExecuteSwapBody, QuoteQuery, RouterApi, SimulateSwapBody};

const MAX_REQUEST_BYTES: usize = 64 * 1024;
const CORRELATION_HEADER: &str = "x-correlation-id";

pub async fn serve(addr: SocketAddr, api: Arc<RouterApi>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    if let Ok(local) = listener.local_addr() {
        info!("rpc listener on {}", local);
    }

    loop {
        let (socket, peer) = listener.accept().await?;
        let api = api.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(socket, api).await {
                debug!("connection from {} dropped: {}", peer, err);
            }
        });
    }
}

async fn handle_connection(mut socket: TcpStream, api: Arc<RouterApi>) -> std::io::Result<()> {
    let request = match read_request(&mut socket).await? {
        Some(request) => request,
        None => {
            write_response(&mut socket, 413, "application/json", PAYLOAD_TOO_LARGE, None).await?;
            return Ok(());
        }
    };

    let request_id = request
        .headers
        .get(CORRELATION_HEADER)
        .cloned()
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let (status, content_type, body) = dispatch(&api, &request, &request_id).await;
    write_response(&mut socket, status, content_type, &body, Some(&request_id)).await
}

const PAYLOAD_TOO_LARGE: &str = r#"{"errorCode":"INVALID_INPUT","message":"request too large"}"#;

struct Request {
    method: String,
    path: String,
    query: HashMap<String, String>,
    headers: HashMap<String, String>,
    body: String,
}

async fn read_request(socket: &mut TcpStream) -> std::io::Result<Option<Request>> {
    let mut buf = Vec::with_capacity(2048);
    let mut chunk = [0u8; 2048];

    // Read until the header terminator, then drain the announced body.
    let header_end = loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break match find_header_end(&buf) {
                Some(end) => end,
                None => return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "truncated request")),
            };
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > MAX_REQUEST_BYTES {
            return Ok(None);
        }
        if let Some(end) = find_header_end(&buf) {
            break end;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.lines();
    let request_line = lines.next().unwrap_or_default().to_string();
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let content_length: usize = headers
        .get("content-length")
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(0);
    if content_length > MAX_REQUEST_BYTES {
        return Ok(None);
    }

    let mut body_bytes = buf[header_end + 4..].to_vec();
    while body_bytes.len() < content_length {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        body_bytes.extend_from_slice(&chunk[..n]);
        if body_bytes.len() > MAX_REQUEST_BYTES {
            return Ok(None);
        }
    }
    body_bytes.truncate(content_length);

    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_ascii_uppercase();
    let target = parts.next().unwrap_or("/");
    let (path, raw_query) = target.split_once('?').unwrap_or((target, ""));

    Ok(Some(Request {
        method,
        path: path.to_string(),
        query: parse_query(raw_query),
        headers,
        body: String::from_utf8_lossy(&body_bytes).to_string(),
    }))
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|window| window == b"\r\n\r\n")
}

fn parse_query(raw: &str) -> HashMap<String, String> {
    raw.split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            Some((percent_decode(key)?, percent_decode(value)?))
        })
        .collect()
}

fn percent_decode(raw: &str) -> Option<String> {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = bytes.get(i + 1..i + 3)?;
                let value = u8::from_str_radix(std::str::from_utf8(hex).ok()?, 16).ok()?;
                out.push(value);
                i += 3;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }
    String::from_utf8(out).ok()
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &str) -> RouterResult<T> {
    serde_json::from_str(body).map_err(|e| {
        RouterError::invalid_input("request body is not valid JSON for this route").with_context(e.to_string())
    })
}

async fn dispatch(api: &RouterApi, request: &Request, request_id: &str) -> (u16, &'static str, String) {
    let segments: Vec<&str> = request.path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect();

    let outcome: RouterResult<String> = match (request.method.as_str(), segments.as_slice()) {
        ("GET", ["metrics"]) => return (200, "text/plain; version=0.0.4", gather_metrics()),
        ("GET", ["v1", "health"]) => encode(&api.health().await),

        ("GET", ["v1", "quote"]) => match QuoteQuery::from_pairs(&request.query) {
            Ok(query) => api.get_quote(query, request_id).await.and_then(|body| encode(&body)),
            Err(err) => Err(err),
        },
        ("GET", ["v1", "quote", id]) => api.get_quote_record(id, request_id).await.and_then(|body| encode(&body)),

        ("POST", ["v1", "swap", "execute"]) => match parse_body::<ExecuteSwapBody>(&request.body) {
            Ok(body) => api.execute_swap(body, request_id).await.and_then(|body| encode(&body)),
            Err(err) => Err(err),
        },
        ("POST", ["v1", "swap", "simulate"]) => match parse_body::<SimulateSwapBody>(&request.body) {
            Ok(body) => api.simulate_swap(body, request_id).await.and_then(|body| encode(&body)),
            Err(err) => Err(err),
        },
        ("GET", ["v1", "swap", id]) => api.get_swap(id, request_id).await.and_then(|body| encode(&body)),
        ("POST", ["v1", "swap", id, "cancel"]) => {
            api.cancel_swap(id, request_id).await.and_then(|body| encode(&body))
        }

        (method, _) if method != "GET" && method != "POST" => {
            let err = RouterError::invalid_input(format!("method {method} is not supported"));
            let body = serde_json::to_string(&ErrorBody::from_error(&err, request_id)).unwrap_or_default();
            return (405, "application/json", body);
        }
        _ => {
            let err = RouterError::invalid_input(format!("no such route {}", request.path));
            let body = serde_json::to_string(&ErrorBody::from_error(&err, request_id)).unwrap_or_default();
            return (404, "application/json", body);
        }
    };

    match outcome {
        Ok(body) => (200, "application/json", body),
        Err(err) => {
            let status = err.code().http_status();
            if status >= 500 {
                warn!("request {} failed: {}", request_id, err);
            }
            let body = serde_json::to_string(&ErrorBody::from_error(&err, request_id)).unwrap_or_default();
            (status, "application/json", body)
        }
    }
}

fn encode<T: serde::Serialize>(value: &T) -> RouterResult<String> {
    serde_json::to_string(value)
        .map_err(|e| RouterError::external_service("response encoding failed").with_context(e.to_string()))
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        410 => "Gone",
        413 => "Payload Too Large",
        422 => "Unprocessable Entity",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

async fn write_response(
    socket: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &str,
    request_id: Option<&str>,
) -> std::io::Result<()> {
    let correlation = request_id
        .map(|id| format!("X-Correlation-Id: {id}\r\n"))
        .unwrap_or_default();
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\n{}Connection: close\r\n\r\n{}",
        status,
        status_text(status),
        content_type,
        body.len(),
        correlation,
        body
    );
    socket.write_all(response.as_bytes()).await?;
    socket.flush().await
}
