use hyper::header::HeaderMap;

/// Elapsed milliseconds from the task's single start timestamp to the end
/// of each connection phase. A field stays `None` until its phase occurs;
/// a phase that never occurs (say, a connect error before TLS) leaves every
/// downstream field `None`.
#[derive(Debug, Clone, Default)]
pub struct FetchMetrics {
    /// Always `None` here: the connection is opened against a literal,
    /// pre-resolved POP address, so no lookup happens on the socket path.
    pub dns_lookup_ms: Option<f64>,
    pub tcp_connect_ms: Option<f64>,
    pub tls_handshake_ms: Option<f64>,
    /// Time to first received response byte.
    pub ttfb_ms: Option<f64>,
    /// End of response body.
    pub end_ms: Option<f64>,
}

impl FetchMetrics {
    /// Phase timestamps share one baseline, so whenever two phases both
    /// occurred the later one can never read lower.
    pub fn is_monotonic(&self) -> bool {
        let phases = [
            self.dns_lookup_ms,
            self.tcp_connect_ms,
            self.tls_handshake_ms,
            self.ttfb_ms,
            self.end_ms,
        ];
        phases
            .iter()
            .filter_map(|phase| *phase)
            .try_fold(0.0_f64, |prev, next| (next >= prev).then_some(next))
            .is_some()
    }
}

/// Everything one settled fetch produced. Immutable once built.
#[derive(Debug)]
pub struct FetchResult {
    pub pop: String,
    pub url: String,
    pub http_status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub metrics: FetchMetrics,
    /// Not-after of the certificate the edge presented, unix seconds.
    pub cert_expiry_unix: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_metrics_are_all_unset() {
        let metrics = FetchMetrics::default();
        assert!(metrics.dns_lookup_ms.is_none());
        assert!(metrics.tcp_connect_ms.is_none());
        assert!(metrics.tls_handshake_ms.is_none());
        assert!(metrics.ttfb_ms.is_none());
        assert!(metrics.end_ms.is_none());
        assert!(metrics.is_monotonic());
    }

    #[test]
    fn test_monotonic_full_sequence() {
        let metrics = FetchMetrics {
            dns_lookup_ms: None,
            tcp_connect_ms: Some(12.0),
            tls_handshake_ms: Some(48.5),
            ttfb_ms: Some(90.1),
            end_ms: Some(95.0),
        };
        assert!(metrics.is_monotonic());
    }

    #[test]
    fn test_monotonic_with_truncated_phases() {
        // Connection died during the handshake: downstream fields unset.
        let metrics = FetchMetrics {
            tcp_connect_ms: Some(12.0),
            ..Default::default()
        };
        assert!(metrics.is_monotonic());
    }

    #[test]
    fn test_non_monotonic_sequence_is_rejected() {
        let metrics = FetchMetrics {
            tcp_connect_ms: Some(50.0),
            tls_handshake_ms: Some(20.0),
            ..Default::default()
        };
        assert!(!metrics.is_monotonic());
    }
}
