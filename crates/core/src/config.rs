use serde::{Deserialize, Serialize};

/// Root application configuration. Loaded from environment variables
/// with the prefix `CAMPAIGN_RELAY__` and an optional TOML config file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub nats: NatsConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// ─── Scheduler Config ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// IANA zone every delay and recurrence is resolved in.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Upper bound on concurrently running delivery callbacks.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Upper bound on overlapping invocations of one recurring job.
    #[serde(default = "default_max_instances")]
    pub max_instances: usize,
}

fn default_timezone() -> String {
    "Asia/Seoul".to_string()
}

fn default_max_workers() -> usize {
    10
}

fn default_max_instances() -> usize {
    3
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            max_workers: default_max_workers(),
            max_instances: default_max_instances(),
        }
    }
}

// ─── Routing Config ─────────────────────────────────────────────────────────

/// How inbound user events reach the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    /// Query the campaign store for every event.
    Direct,
    /// Join events against the incrementally maintained campaign index.
    Stream,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoutingConfig {
    #[serde(default = "default_routing_mode")]
    pub mode: RoutingMode,
    /// Number of event-name partitions in the streaming pipeline.
    #[serde(default = "default_partitions")]
    pub partitions: usize,
}

fn default_routing_mode() -> RoutingMode {
    RoutingMode::Direct
}

fn default_partitions() -> usize {
    4
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            mode: default_routing_mode(),
            partitions: default_partitions(),
        }
    }
}

// ─── NATS Config ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct NatsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_nats_url")]
    pub url: String,
    #[serde(default = "default_nats_max_reconnects")]
    pub max_reconnects: usize,
    #[serde(default = "default_change_subject")]
    pub change_subject: String,
    #[serde(default = "default_event_subject")]
    pub event_subject: String,
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_nats_max_reconnects() -> usize {
    60
}

fn default_change_subject() -> String {
    "campaigns.cdc".to_string()
}

fn default_event_subject() -> String {
    "user-events".to_string()
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_nats_url(),
            max_reconnects: default_nats_max_reconnects(),
            change_subject: default_change_subject(),
            event_subject: default_event_subject(),
        }
    }
}

// ─── Channels Config ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelsConfig {
    /// Base URL of the internal notification service.
    #[serde(default = "default_noti_base_url")]
    pub noti_base_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_noti_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_request_timeout_ms() -> u64 {
    3000
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            noti_base_url: default_noti_base_url(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

// Default functions
fn default_node_id() -> String {
    "node-01".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_metrics_port() -> u16 {
    9091
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            scheduler: SchedulerConfig::default(),
            routing: RoutingConfig::default(),
            nats: NatsConfig::default(),
            channels: ChannelsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and optional config file.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/campaign-relay").required(false))
            .add_source(
                config::Environment::with_prefix("CAMPAIGN_RELAY")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(","),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
