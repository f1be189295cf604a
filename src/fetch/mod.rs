pub mod probe;
pub mod result;

use std::fmt::Write;
use std::net::SocketAddr;

/// Sentinel left in place by provisioning templates; treated the same as
/// "no custom domain configured".
pub const PLACEHOLDER_DOMAIN: &str = "www.example.com";

/// A transport-level failure of one fetch task. Never crosses task
/// boundaries: the orchestrator counts it and moves on.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("tcp connect to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("tls handshake with {host} failed: {source}")]
    Tls {
        host: String,
        #[source]
        source: native_tls::Error,
    },
    #[error("http exchange failed: {0}")]
    Http(#[from] hyper::Error),
    #[error("invalid request: {0}")]
    Request(#[from] hyper::http::Error),
}

pub(crate) fn report(mut err: &(dyn std::error::Error + 'static)) -> String {
    let mut s = format!("{}", err);
    while let Some(src) = err.source() {
        let _ = write!(s, "\n\nCaused by: {}", src);
        err = src;
    }
    s
}
