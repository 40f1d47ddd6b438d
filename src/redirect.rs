//! Plain-HTTP listener redirecting every request to the HTTPS origin.
//!
//! Listens for HTTP/1.x on the redirect port and answers each request with
//! `301 Moved Permanently` pointing at `https://<host><request-uri>`,
//! carrying the primary listener's port when it is not 443.

use std::io;

use axum::extract::{Host, State};
use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tokio::net::TcpListener;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct HttpsPort(u16);

/// Serve redirects on `listener`, pointing at the HTTPS listener's port.
pub async fn serve(listener: TcpListener, https_port: u16) -> io::Result<()> {
    let app = Router::new()
        .fallback(redirect)
        .with_state(HttpsPort(https_port));
    axum::serve(listener, app).await
}

async fn redirect(
    Host(host): Host,
    State(HttpsPort(port)): State<HttpsPort>,
    uri: Uri,
) -> Response {
    let host = strip_port(&host);
    let location = if port == 443 {
        format!("https://{host}{uri}")
    } else {
        format!("https://{host}:{port}{uri}")
    };
    debug!(%location, "redirecting");
    (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response()
}

/// Drop a trailing `:port` from a Host header value, leaving IPv6 literal
/// brackets intact.
fn strip_port(host: &str) -> &str {
    if let Some(end) = host.rfind(']') {
        return &host[..=end];
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_ports_from_host_values() {
        assert_eq!(strip_port("h.example"), "h.example");
        assert_eq!(strip_port("h.example:80"), "h.example");
        assert_eq!(strip_port("[::1]:80"), "[::1]");
        assert_eq!(strip_port("[::1]"), "[::1]");
    }

    #[tokio::test]
    async fn redirects_to_https_origin() {
        let response = redirect(
            Host("h.example".to_string()),
            State(HttpsPort(443)),
            "/x?y".parse().unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(
            response.headers()[header::LOCATION],
            "https://h.example/x?y"
        );
    }

    #[tokio::test]
    async fn non_default_port_appears_in_location() {
        let response = redirect(
            Host("h.example:80".to_string()),
            State(HttpsPort(8443)),
            "/".parse().unwrap(),
        )
        .await;
        assert_eq!(
            response.headers()[header::LOCATION],
            "https://h.example:8443/"
        );
    }
}
