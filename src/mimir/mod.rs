use crate::fetch::result::{FetchMetrics, FetchResult};
use crate::warm::RunSummary;
use prompb::TimeSeries;

pub mod client;
pub mod prompb;

const INSTANCE_LABEL: &str = "instance";
const JOB_LABEL: &str = "job";
const MODULE_LABEL: &str = "module";
const POP_LABEL: &str = "pop";
const PHASE_LABEL: &str = "phase";
const OUTCOME_LABEL: &str = "outcome";

const PREWARM_JOB: &str = "popwarm";
const FETCH_MODULE: &str = "pop_fetch";

const PREWARM_HTTP_STATUS_METRIC: &str = "prewarm_http_status_code";
const PREWARM_PHASE_DURATION_METRIC: &str = "prewarm_duration_seconds";
const PREWARM_TOTAL_DURATION_METRIC: &str = "prewarm_total_duration_seconds";
const PREWARM_CERT_EXPIRY_METRIC: &str = "prewarm_ssl_earliest_cert_expiry";
const PREWARM_REQUESTS_METRIC: &str = "prewarm_requests_total";

fn create_time_series(
    metric_name: &str,
    pop: &str,
    instance: &str,
    value: f64,
    additional_labels: Option<Vec<(&str, &str)>>,
) -> TimeSeries {
    let mut labels: Vec<(&str, &str)> = vec![
        (INSTANCE_LABEL, instance),
        (JOB_LABEL, PREWARM_JOB),
        (MODULE_LABEL, FETCH_MODULE),
        (POP_LABEL, pop),
    ];
    if let Some(extra) = additional_labels {
        labels.extend(extra);
    }

    client::create_time_series(metric_name, &labels, value, None)
}

/// Per-phase wire durations in seconds, each measured against the correct
/// baseline: the phase timestamps are cumulative from task start, so every
/// phase's duration is its stamp minus the previous completed phase's.
/// Phases that never occurred are absent.
pub(crate) fn phase_durations(metrics: &FetchMetrics) -> Vec<(&'static str, f64)> {
    let stamps = [
        ("connect", metrics.tcp_connect_ms),
        ("tls", metrics.tls_handshake_ms),
        ("ttfb", metrics.ttfb_ms),
        ("transfer", metrics.end_ms),
    ];

    let mut phases = Vec::new();
    let mut baseline = 0.0;
    for (phase, stamp) in stamps {
        if let Some(ms) = stamp {
            phases.push((phase, (ms - baseline) / 1000.0));
            baseline = ms;
        }
    }
    phases
}

/// Metrics for one fulfilled fetch:
///    - `prewarm_http_status_code`: status the edge answered with.
///    - `prewarm_duration_seconds{phase}`: connect/tls/ttfb/transfer durations.
///    - `prewarm_total_duration_seconds`: task start to end of body.
///    - `prewarm_ssl_earliest_cert_expiry`: not-after of the presented
///      certificate, unix seconds, when it was captured.
pub fn fetch_metrics(result: &FetchResult) -> Vec<TimeSeries> {
    let mut metrics = Vec::new();

    metrics.push(create_time_series(
        PREWARM_HTTP_STATUS_METRIC,
        &result.pop,
        &result.url,
        result.http_status as f64,
        None,
    ));

    for (phase, seconds) in phase_durations(&result.metrics) {
        metrics.push(create_time_series(
            PREWARM_PHASE_DURATION_METRIC,
            &result.pop,
            &result.url,
            seconds,
            Some(vec![(PHASE_LABEL, phase)]),
        ));
    }

    if let Some(end_ms) = result.metrics.end_ms {
        metrics.push(create_time_series(
            PREWARM_TOTAL_DURATION_METRIC,
            &result.pop,
            &result.url,
            end_ms / 1000.0,
            None,
        ));
    }

    if let Some(expiry) = result.cert_expiry_unix {
        metrics.push(create_time_series(
            PREWARM_CERT_EXPIRY_METRIC,
            &result.pop,
            &result.url,
            expiry as f64,
            None,
        ));
    }

    metrics
}

/// All series for one settled run: every fulfilled fetch's series plus the
/// run-level `prewarm_requests_total{outcome}` tally.
pub fn run_metrics(results: &[FetchResult], summary: &RunSummary) -> Vec<TimeSeries> {
    let mut metrics: Vec<TimeSeries> = results.iter().flat_map(fetch_metrics).collect();

    let outcomes = [
        ("fulfilled", summary.fulfilled),
        ("rejected", summary.rejected),
        ("skipped", summary.skipped),
    ];
    for (outcome, count) in outcomes {
        metrics.push(client::create_time_series(
            PREWARM_REQUESTS_METRIC,
            &[
                (JOB_LABEL, PREWARM_JOB),
                (OUTCOME_LABEL, outcome),
            ],
            count as f64,
            None,
        ));
    }

    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::result::FetchMetrics;
    use hyper::header::HeaderMap;

    fn sample_result() -> FetchResult {
        FetchResult {
            pop: "FRA".to_string(),
            url: "https://d111111abcdef8.cloudfront.net/".to_string(),
            http_status: 200,
            headers: HeaderMap::new(),
            body: b"ok".to_vec(),
            metrics: FetchMetrics {
                dns_lookup_ms: None,
                tcp_connect_ms: Some(10.0),
                tls_handshake_ms: Some(30.0),
                ttfb_ms: Some(90.0),
                end_ms: Some(100.0),
            },
            cert_expiry_unix: Some(1_767_225_600),
        }
    }

    #[test]
    fn test_phase_durations_use_previous_phase_as_baseline() {
        let phases = phase_durations(&sample_result().metrics);
        assert_eq!(
            phases,
            vec![
                ("connect", 0.010),
                ("tls", 0.020),
                ("ttfb", 0.060),
                ("transfer", 0.010),
            ]
        );
    }

    #[test]
    fn test_phase_durations_skip_phases_that_never_occurred() {
        let metrics = FetchMetrics {
            tcp_connect_ms: Some(10.0),
            ..Default::default()
        };
        assert_eq!(phase_durations(&metrics), vec![("connect", 0.010)]);
    }

    #[test]
    fn test_fetch_metrics_series_shape() {
        let series = fetch_metrics(&sample_result());
        // status + 4 phases + total + cert expiry
        assert_eq!(series.len(), 7);
        for ts in &series {
            assert!(ts.labels.iter().any(|l| l.name == POP_LABEL && l.value == "FRA"));
            assert_eq!(ts.samples.len(), 1);
        }
    }

    #[test]
    fn test_run_metrics_include_outcome_tally() {
        let results = vec![sample_result()];
        let summary = RunSummary {
            fulfilled: 1,
            rejected: 2,
            skipped: 3,
        };

        let series = run_metrics(&results, &summary);
        let tally: Vec<(String, f64)> = series
            .iter()
            .filter(|ts| {
                ts.labels
                    .iter()
                    .any(|l| l.name == "__name__" && l.value == PREWARM_REQUESTS_METRIC)
            })
            .map(|ts| {
                let outcome = ts
                    .labels
                    .iter()
                    .find(|l| l.name == OUTCOME_LABEL)
                    .expect("outcome label missing")
                    .value
                    .clone();
                (outcome, ts.samples[0].value)
            })
            .collect();

        assert!(tally.contains(&("fulfilled".to_string(), 1.0)));
        assert!(tally.contains(&("rejected".to_string(), 2.0)));
        assert!(tally.contains(&("skipped".to_string(), 3.0)));
    }
}
