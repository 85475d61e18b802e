//! Smart-HTTP service that shells out to `git http-backend` as CGI.

use std::path::PathBuf;
use std::process::Stdio;

use axum::body::{to_bytes, Body};
use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::Response;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{error, warn};

const MAX_REQUEST_BODY: usize = 64 * 1024 * 1024;

/// Shared state for the CGI handler: where bare repos live, and the
/// expected bearer token for this task's git server.
#[derive(Clone)]
pub struct CgiState {
    pub project_root: PathBuf,
    pub bearer_token: String,
}

/// Catch-all handler for every path under the git server's router. Checks
/// auth, then dispatches the whole request to `git http-backend` via CGI.
pub async fn handle(
    State(state): State<CgiState>,
    request: Request<Body>,
) -> Response<Body> {
    if !authorized(request.headers(), request.uri().query(), &state.bearer_token) {
        return Response::builder()
            .status(StatusCode::UNAUTHORIZED)
            .header("WWW-Authenticate", r#"Basic realm="Git""#)
            .body(Body::empty())
            .unwrap_or_default();
    }

    let (parts, body) = request.into_parts();
    let body_bytes = match to_bytes(body, MAX_REQUEST_BODY).await {
        Ok(b) => b,
        Err(e) => {
            error!(error = %e, "failed to read git request body");
            return Response::builder()
                .status(StatusCode::BAD_REQUEST)
                .body(Body::empty())
                .unwrap_or_default();
        }
    };

    let path_info = parts.uri.path().to_string();
    let query_string = parts.uri.query().unwrap_or("").to_string();
    let content_type = parts
        .headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let mut cmd = Command::new("git");
    cmd.arg("http-backend")
        .current_dir(&state.project_root)
        .env("GIT_PROJECT_ROOT", &state.project_root)
        .env("GIT_HTTP_EXPORT_ALL", "1")
        .env("PATH_INFO", &path_info)
        .env("REQUEST_METHOD", parts.method.as_str())
        .env("QUERY_STRING", &query_string)
        .env("CONTENT_TYPE", &content_type)
        .env("CONTENT_LENGTH", body_bytes.len().to_string())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to spawn git http-backend");
            return Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::empty())
                .unwrap_or_default();
        }
    };

    if let Some(mut stdin) = child.stdin.take() {
        if let Err(e) = stdin.write_all(&body_bytes).await {
            warn!(error = %e, "failed to write request body to git http-backend stdin");
        }
    }

    let output = match child.wait_with_output().await {
        Ok(o) => o,
        Err(e) => {
            error!(error = %e, "git http-backend did not complete");
            return Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::empty())
                .unwrap_or_default();
        }
    };

    parse_cgi_response(&output.stdout)
}

/// Accepts either `Authorization: Basic <base64(bearer:x-oauth-basic)>`,
/// `Authorization: Bearer <token>`, or a `?token=` query-string fallback.
fn authorized(headers: &HeaderMap, query: Option<&str>, expected: &str) -> bool {
    if let Some(auth) = headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        if let Some(basic) = auth.strip_prefix("Basic ") {
            if let Ok(decoded) = base64_decode(basic) {
                if let Ok(decoded) = String::from_utf8(decoded) {
                    if let Some((user, pass)) = decoded.split_once(':') {
                        if user == expected && pass == "x-oauth-basic" {
                            return true;
                        }
                    }
                }
            }
        }
        if let Some(bearer) = auth.strip_prefix("Bearer ") {
            if bearer == expected {
                return true;
            }
        }
    }

    if let Some(query) = query {
        for pair in query.split('&') {
            if let Some(token) = pair.strip_prefix("token=") {
                if token == expected {
                    return true;
                }
            }
        }
    }

    false
}

fn base64_decode(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    STANDARD.decode(input)
}

/// `git http-backend` emits CGI-style output: a block of `Header: value`
/// lines, a blank line, then the body.
fn parse_cgi_response(raw: &[u8]) -> Response<Body> {
    let separator = b"\r\n\r\n";
    let split_at = raw
        .windows(separator.len())
        .position(|w| w == separator)
        .map(|p| (p, separator.len()))
        .or_else(|| {
            let sep = b"\n\n";
            raw.windows(sep.len()).position(|w| w == sep).map(|p| (p, sep.len()))
        });

    let Some((pos, sep_len)) = split_at else {
        return Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Body::empty())
            .unwrap_or_default();
    };

    let header_block = String::from_utf8_lossy(&raw[..pos]);
    let body = raw[pos + sep_len..].to_vec();

    let mut builder = Response::builder();
    let mut status = StatusCode::OK;

    for line in header_block.lines() {
        let Some((name, value)) = line.split_once(':') else { continue };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("status") {
            if let Some(code_str) = value.split_whitespace().next() {
                if let Ok(code) = code_str.parse::<u16>() {
                    status = StatusCode::from_u16(code).unwrap_or(StatusCode::OK);
                }
            }
        } else {
            builder = builder.header(name, value);
        }
    }

    builder
        .status(status)
        .body(Body::from(body))
        .unwrap_or_else(|_| {
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::empty())
                .unwrap_or_default()
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn authorized_accepts_matching_basic_credentials() {
        let mut headers = HeaderMap::new();
        let encoded = {
            use base64::engine::general_purpose::STANDARD;
            use base64::Engine;
            STANDARD.encode("secrettoken:x-oauth-basic")
        };
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {encoded}")).unwrap(),
        );
        assert!(authorized(&headers, None, "secrettoken"));
    }

    #[test]
    fn authorized_accepts_query_token_fallback() {
        let headers = HeaderMap::new();
        assert!(authorized(&headers, Some("token=abc123"), "abc123"));
    }

    #[test]
    fn authorized_rejects_mismatched_token() {
        let headers = HeaderMap::new();
        assert!(!authorized(&headers, Some("token=wrong"), "abc123"));
    }

    #[test]
    fn parse_cgi_response_extracts_status_header() {
        let raw = b"Status: 404 Not Found\r\nContent-Type: text/plain\r\n\r\nnot found";
        let resp = parse_cgi_response(raw);
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn parse_cgi_response_defaults_to_200() {
        let raw = b"Content-Type: application/x-git-upload-pack-result\r\n\r\nbinarydata";
        let resp = parse_cgi_response(raw);
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
