use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio_native_tls::TlsConnector as TokioTlsConnector;
use tracing::{Span, error, info, info_span, warn};
use trust_dns_resolver::TokioAsyncResolver;
use unicode_truncate::UnicodeTruncateStr;

use crate::config::app_config::AppConfig;
use crate::config::model::ConfigError;
use crate::fetch::probe::{fetch_via_pop, virtual_host};
use crate::fetch::report;
use crate::fetch::result::{FetchMetrics, FetchResult};
use crate::mimir;
use crate::resolve::{self, ResolutionMap};

/// Discriminator carried by the external scheduler's invocation payload.
/// Only prewarming is defined today; the field exists so future triggers
/// can share the delivery path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerAction {
    #[default]
    Prewarm,
}

impl fmt::Display for TriggerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerAction::Prewarm => write!(f, "prewarm"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Trigger {
    #[serde(default)]
    pub action: TriggerAction,
}

/// Settlement tally of one run. `skipped` counts fetches that never became
/// tasks because their POP failed to resolve; they are not rejections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub fulfilled: usize,
    pub rejected: usize,
    pub skipped: usize,
}

/// One unit of fan-out work: a POP token plus the address its resolution
/// produced. Tasks share nothing mutable; the resolution map is frozen
/// before the first task is built.
#[derive(Debug, Clone)]
pub struct FetchTask {
    pub pop: String,
    pub ip: IpAddr,
}

#[derive(Debug, thiserror::Error)]
pub enum WarmError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("POP resolution batch failed: {0}")]
    Resolution(#[from] tokio::task::JoinError),
}

/// Execute one prewarm run: resolve, fan out, settle, summarize.
///
/// Individual fetch failures never escalate; the only errors that surface
/// from here are an invalid configuration or the resolution batch dying
/// outside its per-POP error capture.
pub async fn run(
    app: &AppConfig,
    resolver: &TokioAsyncResolver,
    connector: &TokioTlsConnector,
    trigger: &Trigger,
) -> Result<RunSummary, WarmError> {
    let cfg = &app.config;
    cfg.validate()?;

    let run_span = info_span!("prewarm_run", action = %trigger.action);
    info!(
        parent: &run_span,
        distribution_id = %cfg.distribution_id,
        custom_domain = cfg.custom_domain.as_deref().unwrap_or(""),
        path = %cfg.path,
        pops = %cfg.pops,
        requests_per_pop = cfg.requests_per_pop,
        "starting prewarm run"
    );

    let pops = cfg.pop_list();
    let resolution = resolve::resolve_pops(
        resolver,
        &cfg.distribution_id,
        &cfg.cdn_suffix,
        &pops,
        &run_span,
    )
    .await?;

    let (tasks, skipped) = build_tasks(&pops, cfg.requests_per_pop, &resolution);
    let vhost = virtual_host(
        cfg.custom_domain.as_deref(),
        &cfg.distribution_id,
        &cfg.cdn_suffix,
    );

    let (results, rejected) = dispatch_and_settle(
        connector,
        tasks,
        &vhost,
        &cfg.path,
        cfg.max_in_flight,
        &run_span,
    )
    .await;

    let summary = RunSummary {
        fulfilled: results.len(),
        rejected,
        skipped,
    };
    info!(
        parent: &run_span,
        fulfilled = summary.fulfilled,
        rejected = summary.rejected,
        skipped = summary.skipped,
        "prewarm run settled"
    );
    log_pop_breakdown(&results, app.pop_label_width);

    if let Some(mimir_cfg) = &cfg.mimir {
        let series = mimir::run_metrics(&results, &summary);
        if let Err(err) =
            mimir::client::send_to_mimir(&mimir_cfg.endpoint, mimir_cfg.tenant_id.as_deref(), series)
                .await
        {
            warn!(parent: &run_span, error = %err, "failed to push prewarm metrics");
        }
    }

    Ok(summary)
}

/// Replicate the POP list `requests_per_pop` times, in list order, into
/// concrete tasks. A POP whose resolution failed contributes no tasks:
/// each would-be fetch is logged and counted as skipped instead.
pub(crate) fn build_tasks(
    pops: &[String],
    requests_per_pop: u32,
    resolution: &ResolutionMap,
) -> (Vec<FetchTask>, usize) {
    let mut tasks = Vec::new();
    let mut skipped = 0;
    for _ in 0..requests_per_pop {
        for pop in pops {
            match resolution.get(pop.as_str()) {
                Some(Ok(ip)) => tasks.push(FetchTask {
                    pop: pop.clone(),
                    ip: *ip,
                }),
                Some(Err(err)) => {
                    warn!(pop = %pop, error = %err, "skipping fetch for unresolved POP");
                    skipped += 1;
                }
                None => {
                    warn!(pop = %pop, "skipping fetch for POP missing from resolution map");
                    skipped += 1;
                }
            }
        }
    }
    (tasks, skipped)
}

/// Spawn every task, then await every outcome. One task's failure never
/// suppresses another: the join loop collects each settlement, success or
/// not, before the tally is produced.
pub(crate) async fn dispatch_and_settle(
    connector: &TokioTlsConnector,
    tasks: Vec<FetchTask>,
    vhost: &str,
    path: &str,
    max_in_flight: Option<usize>,
    parent: &Span,
) -> (Vec<FetchResult>, usize) {
    let limiter = max_in_flight.map(|permits| Arc::new(Semaphore::new(permits)));

    let mut handles = Vec::with_capacity(tasks.len());
    for task in tasks {
        let connector = connector.clone();
        let vhost = vhost.to_string();
        let path = path.to_string();
        let limiter = limiter.clone();
        let parent = parent.clone();
        handles.push(tokio::spawn(async move {
            let _permit = match &limiter {
                Some(semaphore) => semaphore.clone().acquire_owned().await.ok(),
                None => None,
            };
            fetch_via_pop(&connector, &vhost, &task.pop, task.ip, &path, &parent).await
        }));
    }

    let mut results = Vec::new();
    let mut rejected = 0;
    for handle in handles {
        match handle.await {
            Ok(Ok(result)) => results.push(result),
            Ok(Err(err)) => {
                rejected += 1;
                warn!(parent: parent, error = %report(&err), "prewarm fetch rejected");
            }
            Err(err) => {
                rejected += 1;
                error!(parent: parent, error = %err, "prewarm fetch task died");
            }
        }
    }
    (results, rejected)
}

fn to_fixed_width(input: &str, width: usize) -> String {
    let (truncated, _) = input.unicode_truncate(width);
    format!("{:<width$}", truncated, width = width)
}

fn log_pop_breakdown(results: &[FetchResult], width: usize) {
    let mut by_pop: BTreeMap<&str, Vec<&FetchResult>> = BTreeMap::new();
    for result in results {
        by_pop.entry(&result.pop).or_default().push(result);
    }

    for (pop, results) in by_pop {
        let fmt_ms = |value: Option<f64>| {
            value
                .map(|ms| format!("{ms:.2}ms"))
                .unwrap_or_else(|| "N/A".to_string())
        };
        info!(
            "[{}] fulfilled: {}, avg tcp: {}, avg tls: {}, avg ttfb: {}, avg total: {}",
            to_fixed_width(pop, width),
            results.len(),
            fmt_ms(mean(&results, |m| m.tcp_connect_ms)),
            fmt_ms(mean(&results, |m| m.tls_handshake_ms)),
            fmt_ms(mean(&results, |m| m.ttfb_ms)),
            fmt_ms(mean(&results, |m| m.end_ms)),
        );
    }
}

fn mean<F>(results: &[&FetchResult], phase: F) -> Option<f64>
where
    F: Fn(&FetchMetrics) -> Option<f64>,
{
    let values: Vec<f64> = results
        .iter()
        .filter_map(|result| phase(&result.metrics))
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
