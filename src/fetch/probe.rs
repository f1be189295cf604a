use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

use http_body_util::{BodyExt, Empty};
use hyper::Request;
use hyper::body::Bytes;
use hyper::header::{CONNECTION, HOST, USER_AGENT};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio_native_tls::TlsConnector as TokioTlsConnector;
use tracing::{Instrument, Span, debug, info, info_span};
use x509_parser::parse_x509_certificate;

use super::result::{FetchMetrics, FetchResult};
use super::{FetchError, PLACEHOLDER_DOMAIN};

pub const HTTPS_PORT: u16 = 443;

/// The hostname presented to the edge, as both TLS SNI and HTTP Host.
/// The custom domain wins when it is set, non-empty and not the
/// provisioning placeholder; otherwise the distribution's own name.
pub fn virtual_host(
    custom_domain: Option<&str>,
    distribution_id: &str,
    cdn_suffix: &str,
) -> String {
    match custom_domain {
        Some(domain) if !domain.is_empty() && domain != PLACEHOLDER_DOMAIN => domain.to_string(),
        _ => format!("{distribution_id}.{cdn_suffix}"),
    }
}

pub fn target_url(virtual_host: &str, path: &str) -> String {
    format!("https://{virtual_host}{path}")
}

/// Issue one cold HTTPS request to a specific POP address and record the
/// phase timings. The TCP connection goes to the literal `ip`, never to a
/// DNS name, while `virtual_host` rides along as SNI and Host header.
/// That combination makes the edge route and terminate the request as if
/// it had been reached through ordinary DNS, against exactly this POP.
///
/// The connection is created here and dropped here. No pooling: a reused
/// connection would skip the handshakes this measurement exists to time.
pub async fn fetch_via_pop(
    connector: &TokioTlsConnector,
    virtual_host: &str,
    pop: &str,
    ip: IpAddr,
    path: &str,
    parent: &Span,
) -> Result<FetchResult, FetchError> {
    let span = info_span!(
        parent: parent,
        "fetch_pop",
        pop = %pop,
        ip = %ip,
        error = tracing::field::Empty
    );
    let result = do_fetch(connector, virtual_host, pop, ip, path, &span)
        .instrument(span.clone())
        .await;
    if let Err(err) = &result {
        span.record("error", tracing::field::display(err));
    }
    result
}

async fn do_fetch(
    connector: &TokioTlsConnector,
    virtual_host: &str,
    pop: &str,
    ip: IpAddr,
    path: &str,
    span: &Span,
) -> Result<FetchResult, FetchError> {
    let url = target_url(virtual_host, path);
    info!(url = %url, pop = %pop, ip = %ip, "dispatching prewarm fetch");

    let addr = SocketAddr::new(ip, HTTPS_PORT);
    let mut metrics = FetchMetrics::default();
    let start = Instant::now();

    let stream = TcpStream::connect(addr)
        .await
        .map_err(|source| FetchError::Connect { addr, source })?;
    metrics.tcp_connect_ms = Some(elapsed_ms(start));

    let tls = connector
        .connect(virtual_host, stream)
        .await
        .map_err(|source| FetchError::Tls {
            host: virtual_host.to_string(),
            source,
        })?;
    metrics.tls_handshake_ms = Some(elapsed_ms(start));

    let cert_expiry_unix = peer_cert_expiry(&tls);

    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(tls)).await?;
    tokio::spawn(async move {
        if let Err(err) = conn.await {
            debug!(error = %err, "fetch connection closed with error");
        }
    });

    let request = Request::get(path)
        .header(HOST, virtual_host)
        .header(USER_AGENT, concat!("popwarm/", env!("CARGO_PKG_VERSION")))
        .header(CONNECTION, "close")
        .body(Empty::<Bytes>::new())?;

    // Open until the first response byte lands.
    let mut ttfb_span = Some(info_span!(
        parent: span,
        "fetch_pop_ttfb",
        error = tracing::field::Empty
    ));

    let mut response = match sender.send_request(request).await {
        Ok(response) => response,
        Err(err) => {
            if let Some(ttfb) = ttfb_span.take() {
                ttfb.record("error", tracing::field::display(&err));
            }
            return Err(err.into());
        }
    };

    let http_status = response.status().as_u16();
    let headers = response.headers().clone();

    let mut body = Vec::new();
    loop {
        let frame = match response.frame().await {
            Some(Ok(frame)) => frame,
            Some(Err(err)) => {
                if let Some(ttfb) = ttfb_span.take() {
                    ttfb.record("error", tracing::field::display(&err));
                }
                return Err(err.into());
            }
            None => break,
        };
        if let Some(chunk) = frame.data_ref() {
            if ttfb_span.take().is_some() {
                metrics.ttfb_ms = Some(elapsed_ms(start));
            }
            body.extend_from_slice(chunk);
        }
    }
    metrics.end_ms = Some(elapsed_ms(start));
    debug_assert!(metrics.is_monotonic());

    Ok(FetchResult {
        pop: pop.to_string(),
        url,
        http_status,
        headers,
        body,
        metrics,
        cert_expiry_unix,
    })
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Not-after of the peer certificate, unix seconds. Best-effort: a
/// certificate that fails to parse just leaves the field unset.
fn peer_cert_expiry(tls: &tokio_native_tls::TlsStream<TcpStream>) -> Option<i64> {
    let cert = tls.get_ref().peer_certificate().ok().flatten()?;
    let der = cert.to_der().ok()?;
    let (_, parsed) = parse_x509_certificate(&der).ok()?;
    Some(parsed.validity().not_after.timestamp())
}
