use twelf::config;
use twelf::reexports::serde::{Deserialize, Serialize};

#[config]
#[derive(Debug, Default)]
pub struct StorageConfig {
    cluster: ClusterConfig,
    #[serde(default)]
    bulk: BulkConfig,
    #[serde(default)]
    index: IndexConfig,
    #[serde(default)]
    retention: RetentionConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ClusterConfig {
    nodes: String,
    #[serde(default = "default_protocol")]
    protocol: String,
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    user: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BulkConfig {
    #[serde(default = "default_bulk_actions")]
    bulk_actions: usize,
    #[serde(default = "default_flush_interval_seconds")]
    flush_interval_seconds: u64,
    #[serde(default = "default_concurrent_requests")]
    concurrent_requests: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_number_of_shards")]
    number_of_shards: u32,
    #[serde(default = "default_number_of_replicas")]
    number_of_replicas: u32,
    #[serde(default = "default_refresh_interval_seconds")]
    refresh_interval_seconds: u64,
}

/// Maximum data age per granularity. Units follow the bucket granularity:
/// records and minute metrics age out in minutes, hour metrics in hours,
/// day metrics in days, month metrics in months.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RetentionConfig {
    #[serde(default = "default_record_data_ttl")]
    record_data_ttl: u32,
    #[serde(default = "default_minute_metrics_data_ttl")]
    minute_metrics_data_ttl: u32,
    #[serde(default = "default_hour_metrics_data_ttl")]
    hour_metrics_data_ttl: u32,
    #[serde(default = "default_day_metrics_data_ttl")]
    day_metrics_data_ttl: u32,
    #[serde(default = "default_month_metrics_data_ttl")]
    month_metrics_data_ttl: u32,
}

impl StorageConfig {
    pub fn get_cluster(&self) -> &ClusterConfig {
        &self.cluster
    }
    pub fn get_bulk(&self) -> &BulkConfig {
        &self.bulk
    }
    pub fn get_index(&self) -> &IndexConfig {
        &self.index
    }
    pub fn get_retention(&self) -> &RetentionConfig {
        &self.retention
    }
}

impl ClusterConfig {
    pub fn new(nodes: &str, protocol: &str, namespace: &str, user: &str, password: &str) -> Self {
        Self {
            nodes: nodes.to_string(),
            protocol: protocol.to_string(),
            namespace: namespace.to_string(),
            user: user.to_string(),
            password: password.to_string(),
        }
    }
    pub fn get_nodes(&self) -> &String {
        &self.nodes
    }
    pub fn get_protocol(&self) -> &String {
        &self.protocol
    }
    pub fn get_namespace(&self) -> &String {
        &self.namespace
    }
    /// Username and password, when both are non-blank.
    pub fn get_credentials(&self) -> Option<(String, String)> {
        if self.user.trim().is_empty() || self.password.trim().is_empty() {
            None
        } else {
            Some((self.user.clone(), self.password.clone()))
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            nodes: String::default(),
            protocol: default_protocol(),
            namespace: String::default(),
            user: String::default(),
            password: String::default(),
        }
    }
}

impl BulkConfig {
    pub fn new(bulk_actions: usize, flush_interval_seconds: u64, concurrent_requests: usize) -> Self {
        Self {
            bulk_actions,
            flush_interval_seconds,
            concurrent_requests,
        }
    }
    pub fn get_bulk_actions(&self) -> usize {
        self.bulk_actions
    }
    pub fn get_flush_interval_seconds(&self) -> u64 {
        self.flush_interval_seconds
    }
    pub fn get_concurrent_requests(&self) -> usize {
        self.concurrent_requests
    }
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            bulk_actions: default_bulk_actions(),
            flush_interval_seconds: default_flush_interval_seconds(),
            concurrent_requests: default_concurrent_requests(),
        }
    }
}

impl IndexConfig {
    pub fn new(number_of_shards: u32, number_of_replicas: u32, refresh_interval_seconds: u64) -> Self {
        Self {
            number_of_shards,
            number_of_replicas,
            refresh_interval_seconds,
        }
    }
    pub fn get_number_of_shards(&self) -> u32 {
        self.number_of_shards
    }
    pub fn get_number_of_replicas(&self) -> u32 {
        self.number_of_replicas
    }
    pub fn get_refresh_interval_seconds(&self) -> u64 {
        self.refresh_interval_seconds
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            number_of_shards: default_number_of_shards(),
            number_of_replicas: default_number_of_replicas(),
            refresh_interval_seconds: default_refresh_interval_seconds(),
        }
    }
}

impl RetentionConfig {
    pub fn new(
        record_data_ttl: u32,
        minute_metrics_data_ttl: u32,
        hour_metrics_data_ttl: u32,
        day_metrics_data_ttl: u32,
        month_metrics_data_ttl: u32,
    ) -> Self {
        Self {
            record_data_ttl,
            minute_metrics_data_ttl,
            hour_metrics_data_ttl,
            day_metrics_data_ttl,
            month_metrics_data_ttl,
        }
    }
    pub fn get_record_data_ttl(&self) -> u32 {
        self.record_data_ttl
    }
    pub fn get_minute_metrics_data_ttl(&self) -> u32 {
        self.minute_metrics_data_ttl
    }
    pub fn get_hour_metrics_data_ttl(&self) -> u32 {
        self.hour_metrics_data_ttl
    }
    pub fn get_day_metrics_data_ttl(&self) -> u32 {
        self.day_metrics_data_ttl
    }
    pub fn get_month_metrics_data_ttl(&self) -> u32 {
        self.month_metrics_data_ttl
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            record_data_ttl: default_record_data_ttl(),
            minute_metrics_data_ttl: default_minute_metrics_data_ttl(),
            hour_metrics_data_ttl: default_hour_metrics_data_ttl(),
            day_metrics_data_ttl: default_day_metrics_data_ttl(),
            month_metrics_data_ttl: default_month_metrics_data_ttl(),
        }
    }
}

fn default_protocol() -> String {
    "http".to_string()
}
fn default_bulk_actions() -> usize {
    2000
}
fn default_flush_interval_seconds() -> u64 {
    10
}
fn default_concurrent_requests() -> usize {
    2
}
fn default_number_of_shards() -> u32 {
    2
}
fn default_number_of_replicas() -> u32 {
    0
}
fn default_refresh_interval_seconds() -> u64 {
    10
}
fn default_record_data_ttl() -> u32 {
    90
}
fn default_minute_metrics_data_ttl() -> u32 {
    90
}
fn default_hour_metrics_data_ttl() -> u32 {
    36
}
fn default_day_metrics_data_ttl() -> u32 {
    45
}
fn default_month_metrics_data_ttl() -> u32 {
    18
}
