//! HTTP transport: `GET /<keyword>` serves a view, `GET /cmd?<query>`
//! dispatches a command.
//!
//! The same routes can also be served over TLS from PEM certificate and key
//! files. rustls only negotiates TLS 1.2 and 1.3 with forward-secret AEAD
//! suites.

use crate::client::Bridge;
use crate::dispatch::DispatchStatus;
use crate::views::View;
use axum::{
    extract::{Path, RawQuery, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use serde_json::json;
use std::net::SocketAddr;
use tokio::net::TcpListener;

/// Build the routes over a bridge handle
pub fn router(bridge: Bridge) -> Router {
    Router::new()
        .route("/", get(full_view))
        .route("/cmd", get(command))
        .route("/{keyword}", get(keyword_view))
        .with_state(bridge)
}

/// Bind and serve until the listener fails
pub async fn serve(bridge: Bridge, addr: SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Serving HTTP on {}", listener.local_addr()?);
    axum::serve(listener, router(bridge)).await
}

/// Load a PEM certificate chain and private key
pub async fn load_tls(cert: &std::path::Path, key: &std::path::Path) -> std::io::Result<RustlsConfig> {
    RustlsConfig::from_pem_file(cert, key).await
}

/// Serve the routes over TLS until the listener fails
pub async fn serve_tls(bridge: Bridge, addr: SocketAddr, tls: RustlsConfig) -> std::io::Result<()> {
    tracing::info!("Serving HTTPS on {}", addr);
    axum_server::bind_rustls(addr, tls)
        .serve(router(bridge).into_make_service())
        .await
}

async fn full_view(State(bridge): State<Bridge>) -> Response {
    render(&bridge, View::Full)
}

async fn keyword_view(State(bridge): State<Bridge>, Path(keyword): Path<String>) -> Response {
    render(&bridge, View::from_keyword(&keyword))
}

async fn command(State(bridge): State<Bridge>, RawQuery(query): RawQuery) -> Response {
    let query = query.unwrap_or_default();
    tracing::debug!("HTTP command: {}", query);

    let status = bridge.dispatch_query(&query).await;
    let code = match status {
        DispatchStatus::Ok => StatusCode::OK,
        DispatchStatus::BadRequest => StatusCode::UNAUTHORIZED,
        DispatchStatus::LinkDown => StatusCode::SERVICE_UNAVAILABLE,
    };

    json_response(code, json!({ "status": status.code() }).to_string())
}

fn render(bridge: &Bridge, view: View) -> Response {
    match bridge.render(view) {
        Ok(value) => json_response(StatusCode::OK, value.to_string()),
        Err(e) => {
            tracing::error!("Failed to render {:?}: {}", view, e);
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": e.to_string() }).to_string(),
            )
        }
    }
}

fn json_response(code: StatusCode, body: String) -> Response {
    (
        code,
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (header::CONTENT_TYPE, "application/json"),
        ],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn write_pem_pair(name: &str) -> (PathBuf, PathBuf) {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();

        let dir = std::env::temp_dir();
        let cert_path = dir.join(format!("riod-{}-{}.crt", name, std::process::id()));
        let key_path = dir.join(format!("riod-{}-{}.key", name, std::process::id()));
        std::fs::write(&cert_path, cert.pem()).unwrap();
        std::fs::write(&key_path, key_pair.serialize_pem()).unwrap();
        (cert_path, key_path)
    }

    #[tokio::test]
    async fn loads_pem_certificate() {
        let (cert, key) = write_pem_pair("load");
        assert!(load_tls(&cert, &key).await.is_ok());

        std::fs::remove_file(cert).ok();
        std::fs::remove_file(key).ok();
    }

    #[tokio::test]
    async fn missing_certificate_fails_to_load() {
        let dir = std::env::temp_dir();
        let result = load_tls(&dir.join("riod-absent.crt"), &dir.join("riod-absent.key")).await;
        assert!(result.is_err());
    }
}
