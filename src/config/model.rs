use serde::Deserialize;
use url::Url;

fn default_cdn_suffix() -> String {
    "cloudfront.net".to_string()
}

fn default_interval_seconds() -> u64 {
    60
}

/// The prewarm workload configuration.
/// One run resolves every POP in `pops` once, then issues
/// `requests_per_pop` fresh connections to each resolved POP address.
#[derive(Debug, Clone, Deserialize)]
pub struct PrewarmConfig {
    /// The distribution identifier the CDN assigned to the service,
    /// e.g. `d111111abcdef8`. POP-specific hostnames are derived from it.
    pub distribution_id: String,

    /// Custom domain presented as the TLS SNI value and HTTP Host header.
    /// Empty, absent, or the `www.example.com` placeholder means "use
    /// `{distribution_id}.{cdn_suffix}` instead".
    #[serde(default)]
    pub custom_domain: Option<String>,

    /// Request path, must start with `/`.
    pub path: String,

    /// Comma-separated POP tokens, e.g. `FRA,LHR,NRT57-C1`.
    /// Order and duplicates are preserved as given.
    pub pops: String,

    /// How many fetches to issue per POP per run.
    pub requests_per_pop: u32,

    /// Suffix of the CDN's POP-addressable domain space.
    #[serde(default = "default_cdn_suffix")]
    pub cdn_suffix: String,

    /// Seconds between prewarm runs.
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,

    /// Optional cap on concurrently in-flight fetches. Absent means
    /// unbounded fan-out: total load is normally tuned via the POP list
    /// and `requests_per_pop` alone.
    #[serde(default)]
    pub max_in_flight: Option<usize>,

    /// Optional Prometheus remote-write sink for prewarm metrics.
    #[serde(default)]
    pub mimir: Option<MimirConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MimirConfig {
    pub endpoint: String,

    /// Translates to the 'X-Scope-OrgID' header on remote-write requests.
    #[serde(default)]
    pub tenant_id: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse configuration file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("distribution_id must not be empty")]
    MissingDistributionId,
    #[error("pops must contain at least one POP token")]
    MissingPops,
    #[error("path {0:?} is invalid: {1}")]
    InvalidPath(String, String),
    #[error("requests_per_pop must be a positive integer")]
    InvalidRequestsPerPop,
    #[error("DNS host {0:?} is not a valid IP address")]
    InvalidDnsHost(String),
}

impl PrewarmConfig {
    /// Validates the fields an invocation depends on. A failure here is
    /// fatal to the run: no POPs are resolved and no fetches dispatched.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.distribution_id.trim().is_empty() {
            return Err(ConfigError::MissingDistributionId);
        }
        if self.pop_list().is_empty() {
            return Err(ConfigError::MissingPops);
        }
        if !self.path.starts_with('/') {
            return Err(ConfigError::InvalidPath(
                self.path.clone(),
                "must start with '/'".to_string(),
            ));
        }
        let probe_url = format!(
            "https://{}.{}{}",
            self.distribution_id, self.cdn_suffix, self.path
        );
        Url::parse(&probe_url)
            .map_err(|e| ConfigError::InvalidPath(self.path.clone(), e.to_string()))?;
        if self.requests_per_pop == 0 {
            return Err(ConfigError::InvalidRequestsPerPop);
        }
        Ok(())
    }

    /// The POP tokens in configured order, duplicates preserved.
    /// Surrounding whitespace is trimmed and empty segments dropped.
    pub fn pop_list(&self) -> Vec<String> {
        self.pops
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
pub mod test {
    use super::*;

    fn base_config() -> PrewarmConfig {
        PrewarmConfig {
            distribution_id: "d111111abcdef8".to_string(),
            custom_domain: None,
            path: "/".to_string(),
            pops: "FRA,LHR".to_string(),
            requests_per_pop: 2,
            cdn_suffix: default_cdn_suffix(),
            interval_seconds: default_interval_seconds(),
            max_in_flight: None,
            mimir: None,
        }
    }

    #[test]
    fn test_deserialization_with_defaults() {
        let yaml = r#"
            distribution_id: d111111abcdef8
            path: /
            pops: FRA,LHR
            requests_per_pop: 60
        "#;

        let config: PrewarmConfig = serde_yaml::from_str(yaml).expect("Invalid YAML");
        assert_eq!(config.distribution_id, "d111111abcdef8");
        assert_eq!(config.custom_domain, None);
        assert_eq!(config.cdn_suffix, "cloudfront.net");
        assert_eq!(config.interval_seconds, 60);
        assert_eq!(config.requests_per_pop, 60);
        assert_eq!(config.max_in_flight, None);
        assert!(config.mimir.is_none());
        config.validate().expect("base config should validate");
    }

    #[test]
    fn test_deserialization_full() {
        let yaml = r#"
            distribution_id: d111111abcdef8
            custom_domain: cdn.example.org
            path: /healthz
            pops: "FRA, LHR ,NRT57-C1"
            requests_per_pop: 10
            cdn_suffix: cloudfront.net
            interval_seconds: 300
            max_in_flight: 32
            mimir:
              endpoint: http://localhost:9009
              tenant_id: demo
        "#;

        let config: PrewarmConfig = serde_yaml::from_str(yaml).expect("Invalid YAML");
        assert_eq!(config.custom_domain.as_deref(), Some("cdn.example.org"));
        assert_eq!(config.max_in_flight, Some(32));
        assert_eq!(
            config.pop_list(),
            vec!["FRA".to_string(), "LHR".to_string(), "NRT57-C1".to_string()]
        );
        let mimir = config.mimir.expect("mimir config missing");
        assert_eq!(mimir.endpoint, "http://localhost:9009");
        assert_eq!(mimir.tenant_id.as_deref(), Some("demo"));
    }

    #[test]
    fn test_pop_list_preserves_order_and_duplicates() {
        let mut config = base_config();
        config.pops = "FRA,LHR,FRA,,  ,LHR".to_string();
        assert_eq!(config.pop_list(), vec!["FRA", "LHR", "FRA", "LHR"]);
    }

    #[test]
    fn test_validation_rejects_empty_pop_list() {
        let mut config = base_config();
        config.pops = " , ,".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::MissingPops)));
    }

    #[test]
    fn test_validation_rejects_relative_path() {
        let mut config = base_config();
        config.path = "index.html".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPath(_, _))
        ));
    }

    #[test]
    fn test_validation_rejects_zero_requests_per_pop() {
        let mut config = base_config();
        config.requests_per_pop = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRequestsPerPop)
        ));
    }

    #[test]
    fn test_validation_rejects_blank_distribution_id() {
        let mut config = base_config();
        config.distribution_id = "  ".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingDistributionId)
        ));
    }
}
