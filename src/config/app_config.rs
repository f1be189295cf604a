use std::env;
use std::net::IpAddr;
use std::time::Duration;

use tokio_native_tls::TlsConnector as TokioTlsConnector;
use trust_dns_resolver::{
    TokioAsyncResolver,
    config::{NameServerConfig, NameServerConfigGroup, Protocol, ResolverConfig, ResolverOpts},
};

use super::model::{ConfigError, MimirConfig, PrewarmConfig};

pub struct AppConfig {
    pub config: PrewarmConfig,
    pub dns_hosts: Vec<String>,
    pub pop_label_width: usize,
}

/// Load the application configuration from a YAML file and environment variables.
/// The file is named by the `CONFIG_FILE` environment variable (default
/// `config.yml`); `DNS_HOSTS` and `MIMIR_ENDPOINT` override their file-level
/// counterparts. The prewarm fields are validated once here, before any run
/// is scheduled.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let config_file_location =
        env::var("CONFIG_FILE").unwrap_or_else(|_| "config.yml".to_string());
    let config_str = std::fs::read_to_string(&config_file_location)?;

    let mut config: PrewarmConfig = serde_yaml::from_str(&config_str)?;

    if let Ok(endpoint) = env::var("MIMIR_ENDPOINT") {
        let tenant_id = config.mimir.as_ref().and_then(|m| m.tenant_id.clone());
        config.mimir = Some(MimirConfig {
            endpoint,
            tenant_id,
        });
    }

    config.validate()?;

    let dns_hosts: Vec<String> = env::var("DNS_HOSTS")
        .unwrap_or_else(|_| "1.1.1.1,8.8.8.8".to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .collect();

    tracing::info!(dns_hosts = ?dns_hosts, config_file = %config_file_location, "loaded configuration");

    let pop_label_width = config
        .pop_list()
        .iter()
        .map(|pop| pop.len())
        .max()
        .unwrap_or(10);

    Ok(AppConfig {
        config,
        dns_hosts,
        pop_label_width,
    })
}

/// Setup a TLS connector for the prewarm fetches.
/// Certificate validation is left on: the connector is handed the virtual
/// host (not the literal POP IP) as the connection domain, so the CDN
/// certificate validates exactly as it would for an ordinary client.
pub fn setup_tls_connector() -> Result<TokioTlsConnector, native_tls::Error> {
    let connector = native_tls::TlsConnector::builder().build()?;
    Ok(TokioTlsConnector::from(connector))
}

/// Setup a DNS resolver using the provided DNS hosts.
/// The resolver queries the configured hosts over TCP with short timeouts.
/// The internal cache is disabled: POP addresses rotate, and each run must
/// observe a fresh lookup rather than a previous run's answer.
pub fn setup_resolver(dns_hosts: &[String]) -> Result<TokioAsyncResolver, ConfigError> {
    let mut opts = ResolverOpts::default();
    opts.attempts = 2;
    opts.timeout = Duration::from_millis(500);
    opts.cache_size = 0;

    let mut name_servers = NameServerConfigGroup::new();

    for host in dns_hosts {
        let ip: IpAddr = host
            .parse()
            .map_err(|_| ConfigError::InvalidDnsHost(host.clone()))?;
        name_servers.push(NameServerConfig {
            socket_addr: (ip, 53).into(),
            protocol: Protocol::Tcp,
            tls_dns_name: None,
            trust_negative_responses: false,
            bind_addr: None,
        });
    }

    let resolver_config = ResolverConfig::from_parts(None, vec![], name_servers);
    Ok(TokioAsyncResolver::tokio(resolver_config, opts))
}
