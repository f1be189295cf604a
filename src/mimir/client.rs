use chrono::Utc;
use reqwest::{
    Client,
    header::{CONTENT_ENCODING, CONTENT_TYPE, HeaderMap, HeaderValue},
};
use snap::raw::Encoder;

use super::prompb::{Label, Sample, TimeSeries, WriteRequest};

#[derive(Debug, thiserror::Error)]
pub enum MimirError {
    #[error("failed to encode write request: {0}")]
    Encode(#[from] prost::EncodeError),
    #[error("failed to compress write request: {0}")]
    Compress(#[from] snap::Error),
    #[error("tenant id is not a valid header value: {0}")]
    TenantId(#[from] reqwest::header::InvalidHeaderValue),
    #[error("remote write request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("remote write rejected: {status} - {body}")]
    Rejected {
        status: reqwest::StatusCode,
        body: String,
    },
}

/// Push prewarm metrics to a Prometheus remote-write endpoint (Mimir).
///
/// # Arguments
///
/// * `mimir_endpoint` - The base URL of the Mimir instance (e.g., "http://localhost:9009").
/// * `tenant_id` - An optional tenant ID string for multi-tenant setups.
/// * `metrics` - The `TimeSeries` to send.
pub async fn send_to_mimir(
    mimir_endpoint: &str,
    tenant_id: Option<&str>,
    metrics: Vec<TimeSeries>,
) -> Result<(), MimirError> {
    if metrics.is_empty() {
        tracing::warn!("no metrics to send");
        return Ok(());
    }

    let write_request = WriteRequest {
        timeseries: metrics,
    };

    let mut buf = Vec::new();
    prost::Message::encode(&write_request, &mut buf)?;
    let compressed_data = Encoder::new().compress_vec(&buf)?;

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_ENCODING, HeaderValue::from_static("snappy"));
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/x-protobuf"),
    );
    headers.insert(
        "X-Prometheus-Remote-Write-Version",
        HeaderValue::from_static("0.1.0"),
    );
    if let Some(id) = tenant_id {
        headers.insert("X-Scope-OrgID", HeaderValue::from_str(id)?);
    }

    let client = Client::new();
    let response = client
        .post(format!("{mimir_endpoint}/api/v1/push"))
        .headers(headers)
        .body(compressed_data)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(MimirError::Rejected { status, body });
    }
    Ok(())
}

/// Creates a `TimeSeries` with the given metric name, labels, value, and
/// optional timestamp (current time when absent).
pub fn create_time_series(
    metric_name: &str,
    labels: &[(&str, &str)],
    value: f64,
    timestamp_ms: Option<i64>,
) -> TimeSeries {
    let mut all_labels = vec![Label {
        name: "__name__".to_string(),
        value: metric_name.to_string(),
    }];

    for (name, val) in labels {
        all_labels.push(Label {
            name: name.to_string(),
            value: val.to_string(),
        });
    }

    let sample = Sample {
        value,
        timestamp: timestamp_ms.unwrap_or_else(|| Utc::now().timestamp_millis()),
    };

    TimeSeries {
        labels: all_labels,
        samples: vec![sample],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_time_series_prepends_metric_name_label() {
        let ts = create_time_series(
            "prewarm_http_status_code",
            &[("pop", "FRA"), ("instance", "https://example.invalid/")],
            200.0,
            Some(1_700_000_000_000),
        );

        assert_eq!(ts.labels[0].name, "__name__");
        assert_eq!(ts.labels[0].value, "prewarm_http_status_code");
        assert_eq!(ts.labels.len(), 3);
        assert_eq!(ts.samples.len(), 1);
        assert_eq!(ts.samples[0].value, 200.0);
        assert_eq!(ts.samples[0].timestamp, 1_700_000_000_000);
    }

    #[test]
    fn test_create_time_series_defaults_timestamp_to_now() {
        let before = Utc::now().timestamp_millis();
        let ts = create_time_series("prewarm_requests_total", &[], 4.0, None);
        let after = Utc::now().timestamp_millis();

        assert!(ts.samples[0].timestamp >= before);
        assert!(ts.samples[0].timestamp <= after);
    }

    #[test]
    fn test_write_request_encodes_and_compresses() {
        let ts = create_time_series("prewarm_requests_total", &[("outcome", "fulfilled")], 1.0, Some(0));
        let request = WriteRequest { timeseries: vec![ts] };

        let mut buf = Vec::new();
        prost::Message::encode(&request, &mut buf).expect("encode");
        assert!(!buf.is_empty());

        let compressed = Encoder::new().compress_vec(&buf).expect("compress");
        assert!(!compressed.is_empty());
    }
}
