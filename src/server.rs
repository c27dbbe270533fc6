//! Local HTTP server for the packaged UI bundle.
//!
//! Production windows load the UI over localhost instead of file://. The
//! port is probed upward from the configured base port, and the bundle is
//! served with single-page-app fallback routing: any path that does not
//! resolve to a file under the document root gets the index document.

use std::io;
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use crate::error::{Error, Result};

/// Address and document root of a running asset server. Created once at
/// startup and immutable for the process lifetime.
#[derive(Debug, Clone)]
pub struct ServerBinding {
    pub host: String,
    pub port: u16,
    pub document_root: PathBuf,
}

impl ServerBinding {
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[derive(Clone)]
struct ServeState {
    document_root: PathBuf,
    index: PathBuf,
}

pub struct AssetServer {
    binding: ServerBinding,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl AssetServer {
    /// Bind the first free port at or above `base_port` and serve
    /// `document_root` from it. Gives up with `BindExhausted` after
    /// `max_probes` attempts.
    pub async fn start(
        document_root: PathBuf,
        base_port: u16,
        max_probes: u16,
    ) -> Result<AssetServer> {
        let listener = probe_ports(base_port, max_probes).await?;
        let port = listener.local_addr()?.port();

        let state = ServeState {
            index: document_root.join("index.html"),
            document_root: document_root.clone(),
        };
        let app = Router::new().fallback(serve_asset).with_state(state);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async {
                // Resolves on close() and when the server handle is dropped.
                let _ = shutdown_rx.await;
            });
            if let Err(e) = serve.await {
                log::error!("asset server error: {e}");
            }
        });

        let binding = ServerBinding { host: "localhost".to_string(), port, document_root };
        log::info!("asset server listening on {}", binding.url());

        Ok(AssetServer { binding, shutdown: Mutex::new(Some(shutdown_tx)) })
    }

    pub fn binding(&self) -> &ServerBinding {
        &self.binding
    }

    /// Stop accepting connections. Safe to call more than once; later calls
    /// are no-ops.
    pub fn close(&self) {
        if let Ok(mut guard) = self.shutdown.lock()
            && let Some(tx) = guard.take()
        {
            let _ = tx.send(());
            log::info!("asset server on port {} closed", self.binding.port);
        }
    }
}

impl Drop for AssetServer {
    fn drop(&mut self) {
        self.close();
    }
}

/// Iterative probe: try `base_port`, walk upward on address-in-use, stop at
/// the attempt ceiling. Any other bind error aborts immediately.
async fn probe_ports(base_port: u16, max_probes: u16) -> Result<TcpListener> {
    let attempts = max_probes.max(1);
    for offset in 0..attempts {
        let port = base_port.saturating_add(offset);
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                if offset > 0 {
                    log::info!("port {base_port} busy, bound {port} instead");
                }
                return Ok(listener);
            }
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                log::debug!("{}", Error::BindConflict(port));
            }
            Err(e) => return Err(Error::FileSystem(e)),
        }
    }
    Err(Error::BindExhausted {
        first: base_port,
        last: base_port.saturating_add(attempts - 1),
    })
}

async fn serve_asset(State(state): State<ServeState>, uri: Uri) -> Response {
    // Unresolvable and missing paths fall back to the index document so
    // client-side routes deep-link correctly.
    let path = match resolve_path(&state.document_root, uri.path()) {
        Some(candidate) => match tokio::fs::metadata(&candidate).await {
            Ok(meta) if meta.is_file() => candidate,
            _ => state.index.clone(),
        },
        None => state.index.clone(),
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            ([(header::CONTENT_TYPE, content_type_for(&path))], bytes).into_response()
        }
        Err(e) => {
            log::warn!("asset read failed for {}: {e}", path.display());
            (StatusCode::INTERNAL_SERVER_ERROR, "Server Error").into_response()
        }
    }
}

/// Map the request path into the document root. Returns None for the root
/// path and for anything that would escape the root.
fn resolve_path(root: &Path, request_path: &str) -> Option<PathBuf> {
    let trimmed = request_path.trim_start_matches('/');
    if trimmed.is_empty() {
        return None;
    }

    let mut path = root.to_path_buf();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => path.push(part),
            _ => return None,
        }
    }
    Some(path)
}

/// Static extension table. Unknown extensions serve as HTML, which also
/// covers the fallback index document.
fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("js") | Some("mjs") => "application/javascript",
        Some("css") => "text/css",
        Some("json") | Some("map") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("ico") => "image/x-icon",
        Some("woff2") => "font/woff2",
        _ => "text/html",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_root_is_index() {
        assert!(resolve_path(Path::new("/bundle"), "/").is_none());
    }

    #[test]
    fn resolve_simple_path() {
        let resolved = resolve_path(Path::new("/bundle"), "/static/app.js");
        assert_eq!(resolved, Some(PathBuf::from("/bundle/static/app.js")));
    }

    #[test]
    fn resolve_rejects_traversal() {
        assert!(resolve_path(Path::new("/bundle"), "/../etc/passwd").is_none());
        assert!(resolve_path(Path::new("/bundle"), "/static/../../etc/passwd").is_none());
    }

    #[test]
    fn content_types_match_bundle_extensions() {
        assert_eq!(content_type_for(Path::new("app.js")), "application/javascript");
        assert_eq!(content_type_for(Path::new("style.css")), "text/css");
        assert_eq!(content_type_for(Path::new("manifest.json")), "application/json");
        assert_eq!(content_type_for(Path::new("index.html")), "text/html");
        assert_eq!(content_type_for(Path::new("no-extension")), "text/html");
    }
}
