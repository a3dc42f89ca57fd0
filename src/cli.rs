use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use clap::{ArgGroup, Parser};
use rdkafka::ClientConfig;
use regex::Regex;
use tokio::time::Duration;

use crate::constants::{
    DEFAULT_BOOTSTRAP_BROKERS, DEFAULT_CLUSTER_NAME, DEFAULT_FETCH_TIMEOUT_SECS, DEFAULT_FILTER,
    DEFAULT_LISTEN_ADDRESS, DEFAULT_REFRESH_INTERVAL_SECS, DEFAULT_STALE_AFTER_CYCLES,
    DEFAULT_TELEMETRY_PATH,
};

/// Command Line Interface, defined via the declarative,
/// `derive` based functionality of the `clap` crate.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(group(
    ArgGroup::new("logging_flags")
        .required(false)
        .multiple(false)
        .args(["verbose", "quiet"]),
))]
pub struct Cli {
    // ------------------------------------------------------------------------ Kafka configuration
    /// Initial Kafka Brokers to connect to (format: 'HOST:PORT,...').
    ///
    /// Consumer Groups and their committed offsets are read from the Group Coordinator
    /// of these Brokers; partition offsets from the partition leaders.
    ///
    /// Equivalent to '--kafka-conf=bootstrap.servers:host:port,...'.
    #[arg(
        short,
        long = "brokers",
        value_name = "BOOTSTRAP_BROKERS",
        default_value = DEFAULT_BOOTSTRAP_BROKERS,
        verbatim_doc_comment
    )]
    pub bootstrap_brokers: String,

    /// Client identifier used by the internal Kafka Clients.
    ///
    /// Equivalent to '--kafka-conf=client.id:my-client-id'.
    #[arg(long = "client-id", value_name = "CLIENT_ID", default_value = env!("CARGO_PKG_NAME"))]
    pub client_id: String,

    /// Additional configuration used by the internal Kafka Clients (format: 'CONF_KEY:CONF_VAL').
    ///
    /// To set multiple configurations keys, use this argument multiple times.
    /// See: https://github.com/edenhill/librdkafka/blob/master/CONFIGURATION.md.
    #[arg(
        long = "kafka-conf",
        value_name = "CONF_KEY:CONF_VAL",
        value_parser = kv_clap_value_parser,
        verbatim_doc_comment
    )]
    pub kafka_config: Vec<KVPair>,

    /// Name of the monitored Kafka Cluster.
    ///
    /// Attached as the constant label 'cluster' to every exported metric.
    #[arg(long = "cluster-name", value_name = "NAME", default_value = DEFAULT_CLUSTER_NAME)]
    pub cluster_name: String,

    // ------------------------------------------------------------------------ Collection
    /// Seconds between the start of two consecutive collection cycles.
    ///
    /// A cycle that runs longer than this delays the next one: cycles never overlap.
    #[arg(
        long = "refresh-interval",
        value_name = "SECONDS",
        default_value = DEFAULT_REFRESH_INTERVAL_SECS,
        value_parser = clap::value_parser!(u64).range(1..),
        verbatim_doc_comment
    )]
    pub refresh_interval_secs: u64,

    /// Seconds to wait for any single request to the Kafka Cluster.
    #[arg(
        long = "fetch-timeout",
        value_name = "SECONDS",
        default_value = DEFAULT_FETCH_TIMEOUT_SECS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub fetch_timeout_secs: u64,

    /// Seconds a collection cycle is allowed to run.
    ///
    /// Partitions not yet collected when this deadline passes are skipped until the next cycle.
    /// Defaults to the value of '--refresh-interval'.
    #[arg(
        long = "cycle-timeout",
        value_name = "SECONDS",
        value_parser = clap::value_parser!(u64).range(1..),
        verbatim_doc_comment
    )]
    pub cycle_timeout_secs: Option<u64>,

    /// Remove metrics of Consumer Group partitions not seen for this many cycles.
    ///
    /// Set to '0' to keep reporting the last known value of a disappeared Group forever.
    #[arg(
        long = "stale-after-cycles",
        value_name = "CYCLES",
        default_value = DEFAULT_STALE_AFTER_CYCLES,
        verbatim_doc_comment
    )]
    pub stale_after_cycles: u64,

    /// Only collect Consumer Groups whose name matches this regular expression.
    #[arg(
        long = "group-filter",
        value_name = "REGEX",
        default_value = DEFAULT_FILTER,
        value_parser = regex_clap_value_parser
    )]
    pub group_filter: Regex,

    /// Only collect Topics whose name matches this regular expression.
    #[arg(
        long = "topic-filter",
        value_name = "REGEX",
        default_value = DEFAULT_FILTER,
        value_parser = regex_clap_value_parser
    )]
    pub topic_filter: Regex,

    // ------------------------------------------------------------------------ HTTP
    /// Address to listen on for HTTP requests (format: '[HOST]:PORT').
    ///
    /// When HOST is omitted (e.g. ':8080'), listens on all IPv4 interfaces.
    /// Supports both IPv4 and IPv6 addresses.
    #[arg(
        long = "listen-address",
        value_name = "ADDRESS",
        default_value = DEFAULT_LISTEN_ADDRESS,
        value_parser = listen_address_clap_value_parser,
        verbatim_doc_comment
    )]
    pub listen_address: SocketAddr,

    /// HTTP path under which metrics are exposed.
    #[arg(
        long = "telemetry-path",
        value_name = "PATH",
        default_value = DEFAULT_TELEMETRY_PATH,
        value_parser = telemetry_path_clap_value_parser
    )]
    pub telemetry_path: String,

    // ------------------------------------------------------------------------ Logging
    /// Verbose logging.
    ///
    /// * none    = 'WARN'
    /// * '-v'    = 'INFO'
    /// * '-vv'   = 'DEBUG'
    /// * '-vvv'  = 'TRACE'
    ///
    /// Alternatively, set environment variable 'KAFKA_LAG_EXPORTER_LOG=(ERROR|WARN|INFO|DEBUG|TRACE|OFF)'.
    #[arg(short, long, action = clap::ArgAction::Count, verbatim_doc_comment)]
    pub verbose: u8,

    /// Quiet logging.
    ///
    /// * none    = 'WARN'
    /// * '-q'    = 'ERROR'
    /// * '-qq'   = 'OFF'
    ///
    /// Alternatively, set environment variable 'KAFKA_LAG_EXPORTER_LOG=(ERROR|WARN|INFO|DEBUG|TRACE|OFF)'.
    #[arg(short, long, action = clap::ArgAction::Count, verbatim_doc_comment)]
    pub quiet: u8,
}

impl Cli {
    pub fn parse_and_validate() -> Self {
        Self::parse()
    }

    pub fn verbosity_level(&self) -> i8 {
        self.verbose as i8 - self.quiet as i8
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_secs(self.cycle_timeout_secs.unwrap_or(self.refresh_interval_secs))
    }

    pub fn build_client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", self.bootstrap_brokers.clone())
            .set("client.id", self.client_id.clone());
        for cfg in &self.kafka_config {
            config.set(cfg.0.clone(), cfg.1.clone());
        }

        trace!("Created:\n{:#?}", config);
        config
    }
}

/// A simple (key,value) pair of `String`s,
/// useful to be parsed from arguments via [`kv_clap_value_parser`].
pub type KVPair = (String, String);

/// To be used as [`clap::value_parser`] function to create [`KVPair`] values.
fn kv_clap_value_parser(kv: &str) -> Result<KVPair, String> {
    let (k, v) = match kv.split_once(':') {
        None => {
            return Err("Should have 'K:V' format".to_string());
        },
        Some((k, v)) => (k, v),
    };

    Ok((k.to_string(), v.to_string()))
}

fn regex_clap_value_parser(re: &str) -> Result<Regex, String> {
    Regex::new(re).map_err(|e| format!("Invalid regular expression '{re}': {e}"))
}

/// Parses `HOST:PORT`, `[IPV6]:PORT` and `:PORT` (all IPv4 interfaces).
fn listen_address_clap_value_parser(addr: &str) -> Result<SocketAddr, String> {
    if let Some(port) = addr.strip_prefix(':') {
        let port = port.parse::<u16>().map_err(|e| format!("Invalid port in '{addr}': {e}"))?;
        return Ok(SocketAddr::from((IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)));
    }

    addr.parse::<SocketAddr>().map_err(|e| format!("Unable to parse '{addr}': {e}"))
}

fn telemetry_path_clap_value_parser(path: &str) -> Result<String, String> {
    if !path.starts_with('/') {
        return Err(format!("Path '{path}' should start with '/'"));
    }

    Ok(path.to_string())
}

#[cfg(test)]
mod test {
    use std::net::SocketAddr;

    use clap::Parser;

    use super::*;

    #[test]
    fn should_parse_listen_address() {
        assert_eq!(
            listen_address_clap_value_parser(":8080"),
            Ok("0.0.0.0:8080".parse::<SocketAddr>().unwrap())
        );
        assert_eq!(
            listen_address_clap_value_parser("127.0.0.1:9308"),
            Ok("127.0.0.1:9308".parse::<SocketAddr>().unwrap())
        );
        assert_eq!(
            listen_address_clap_value_parser("[::1]:9308"),
            Ok("[::1]:9308".parse::<SocketAddr>().unwrap())
        );
        assert!(listen_address_clap_value_parser(":http").is_err());
        assert!(listen_address_clap_value_parser("localhost").is_err());
    }

    #[test]
    fn should_parse_kv_pairs() {
        assert_eq!(
            kv_clap_value_parser("security.protocol:SASL_SSL"),
            Ok(("security.protocol".to_string(), "SASL_SSL".to_string()))
        );
        assert_eq!(
            kv_clap_value_parser("sasl.password:a:b"),
            Ok(("sasl.password".to_string(), "a:b".to_string()))
        );
        assert!(kv_clap_value_parser("no-separator").is_err());
    }

    #[test]
    fn should_require_absolute_telemetry_path() {
        assert_eq!(telemetry_path_clap_value_parser("/metrics"), Ok("/metrics".to_string()));
        assert!(telemetry_path_clap_value_parser("metrics").is_err());
    }

    #[test]
    fn should_apply_defaults() {
        let cli = Cli::try_parse_from(["kafka-lag-exporter"]).unwrap();

        assert_eq!(cli.listen_address, "0.0.0.0:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(cli.telemetry_path, "/metrics");
        assert_eq!(cli.bootstrap_brokers, "localhost:9092");
        assert_eq!(cli.cluster_name, "kafka-cluster");
        assert_eq!(cli.refresh_interval(), Duration::from_secs(15));
        assert_eq!(cli.fetch_timeout(), Duration::from_secs(10));
        assert_eq!(cli.cycle_timeout(), Duration::from_secs(15));
        assert_eq!(cli.stale_after_cycles, 5);
        assert!(cli.group_filter.is_match("any-group"));
        assert_eq!(cli.verbosity_level(), 0);
    }

    #[test]
    fn should_reject_zero_refresh_interval() {
        assert!(Cli::try_parse_from(["kafka-lag-exporter", "--refresh-interval", "0"]).is_err());
    }

    #[test]
    fn should_combine_verbosity_flags() {
        let cli = Cli::try_parse_from(["kafka-lag-exporter", "-vv"]).unwrap();
        assert_eq!(cli.verbosity_level(), 2);

        let cli = Cli::try_parse_from(["kafka-lag-exporter", "-q"]).unwrap();
        assert_eq!(cli.verbosity_level(), -1);

        assert!(Cli::try_parse_from(["kafka-lag-exporter", "-v", "-q"]).is_err());
    }
}
