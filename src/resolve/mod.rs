use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

use tokio::task::JoinError;
use tracing::{Instrument, Span, info, info_span, warn};
use trust_dns_resolver::TokioAsyncResolver;

#[derive(Debug, Clone, thiserror::Error)]
pub enum PopResolveError {
    #[error("lookup for {host} failed: {reason}")]
    Lookup { host: String, reason: String },
    #[error("lookup for {host} returned no addresses")]
    NoAddresses { host: String },
}

/// Per-run association from POP token to its resolved address or the
/// captured lookup failure. Built once per run, read-only afterwards;
/// never carried across runs since POP addresses rotate.
pub type ResolutionMap = HashMap<String, Result<IpAddr, PopResolveError>>;

/// The POP-addressable hostname for one edge location,
/// e.g. `d111111abcdef8.FRA.cloudfront.net`.
pub fn pop_hostname(distribution_id: &str, pop: &str, cdn_suffix: &str) -> String {
    format!("{distribution_id}.{pop}.{cdn_suffix}")
}

/// First-occurrence-ordered distinct POP tokens. Each distinct token is
/// resolved exactly once per run regardless of how often it appears in
/// the configured list.
pub(crate) fn distinct_pops(pops: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    pops.iter()
        .filter(|pop| seen.insert(pop.as_str()))
        .cloned()
        .collect()
}

/// Resolve every distinct POP concurrently and collect the outcomes.
/// A lookup failure is captured per POP and is non-fatal: the other POPs
/// proceed independently. The error path out of this function is only the
/// unexpected one, a resolution task dying outside the per-POP capture.
pub async fn resolve_pops(
    resolver: &TokioAsyncResolver,
    distribution_id: &str,
    cdn_suffix: &str,
    pops: &[String],
    parent: &Span,
) -> Result<ResolutionMap, JoinError> {
    let span = info_span!(parent: parent, "resolve_pops");

    let mut handles = Vec::new();
    for pop in distinct_pops(pops) {
        let resolver = resolver.clone();
        let host = pop_hostname(distribution_id, &pop, cdn_suffix);
        handles.push(tokio::spawn(
            async move {
                let outcome = resolve_one(&resolver, &host).await;
                (pop, outcome)
            }
            .instrument(span.clone()),
        ));
    }

    let mut map = ResolutionMap::new();
    for handle in handles {
        let (pop, outcome) = handle.await?;
        match &outcome {
            Ok(ip) => info!(parent: &span, pop = %pop, ip = %ip, "resolved POP"),
            Err(err) => warn!(parent: &span, pop = %pop, error = %err, "POP resolution failed"),
        }
        map.insert(pop, outcome);
    }
    Ok(map)
}

async fn resolve_one(
    resolver: &TokioAsyncResolver,
    host: &str,
) -> Result<IpAddr, PopResolveError> {
    let lookup = resolver
        .lookup_ip(host)
        .await
        .map_err(|e| PopResolveError::Lookup {
            host: host.to_string(),
            reason: e.to_string(),
        })?;
    lookup
        .iter()
        .next()
        .ok_or_else(|| PopResolveError::NoAddresses {
            host: host.to_string(),
        })
}
