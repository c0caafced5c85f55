use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub instance: InstanceConfig,
    #[serde(default)]
    pub dhcp: DhcpConfig,
    #[serde(default)]
    pub ha: Option<HaConfig>,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub messaging: MessagingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub id: String,
    /// Server identifier (DHCP option 54) advertised to clients. Falls back
    /// to the first subnet's gateway if unset.
    #[serde(default)]
    pub server_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DhcpConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub subnets: Vec<SubnetConfig>,
    #[serde(default)]
    pub conflict_detection: ConflictDetectionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubnetConfig {
    /// e.g. "192.168.1.0/24"
    pub cidr: String,
    pub interface: String,
    #[serde(default)]
    pub routers: Vec<String>,
    #[serde(default)]
    pub dns_servers: Vec<String>,
    #[serde(default)]
    pub ntp_servers: Vec<String>,
    #[serde(default)]
    pub domain_name: Option<String>,
    #[serde(default = "default_lease_time")]
    pub lease_time_secs: u32,
    #[serde(default)]
    pub t1_secs: Option<u32>,
    #[serde(default)]
    pub t2_secs: Option<u32>,
    #[serde(default)]
    pub classless_routes: Vec<StaticRouteConfig>,
    #[serde(default)]
    pub pools: Vec<PoolConfig>,
    #[serde(default)]
    pub reservations: Vec<ReservationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticRouteConfig {
    /// e.g. "10.1.0.0/16"
    pub destination: String,
    pub gateway: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub id: String,
    pub range_start: String,
    pub range_end: String,
    #[serde(default)]
    pub vendor_class: Option<String>,
    #[serde(default)]
    pub user_class: Option<String>,
    #[serde(default)]
    pub circuit_id: Option<String>,
    #[serde(default)]
    pub remote_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationConfig {
    pub mac: String,
    #[serde(default)]
    pub client_id: Option<String>,
    pub ip: String,
    #[serde(default)]
    pub hostname: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictDetectionConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_probes")]
    pub max_probes: usize,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
}

impl Default for ConflictDetectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_probes: default_max_probes(),
            probe_timeout_ms: default_probe_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HaConfig {
    pub role: crate::types::HaRole,
    pub bind: String,
    pub peer_addr: String,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_failover_timeout")]
    pub failover_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_global_capacity")]
    pub global_capacity: u64,
    #[serde(default = "default_client_capacity")]
    pub per_client_capacity: u64,
    #[serde(default = "default_refill_interval")]
    pub refill_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            global_capacity: default_global_capacity(),
            per_client_capacity: default_client_capacity(),
            refill_interval_secs: default_refill_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingConfig {
    #[serde(default = "default_messaging_backend")]
    pub backend: String,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            backend: default_messaging_backend(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_lease_time() -> u32 {
    3600
}
fn default_max_probes() -> usize {
    4
}
fn default_probe_timeout() -> u64 {
    500
}
fn default_heartbeat_interval() -> u64 {
    2
}
fn default_failover_timeout() -> u64 {
    10
}
fn default_global_capacity() -> u64 {
    1000
}
fn default_client_capacity() -> u64 {
    10
}
fn default_refill_interval() -> u64 {
    1
}
fn default_messaging_backend() -> String {
    "noop".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::error::Error::Config(format!("failed to read config: {e}")))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::error::Error::Config(format!("failed to parse config: {e}")))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let toml_str = r#"
[instance]
id = "dhcpd-01"

[logging]
level = "debug"
format = "text"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.instance.id, "dhcpd-01");
        assert!(config.ha.is_none());
    }

    #[test]
    fn test_parse_subnet_with_pools_and_reservations() {
        let toml_str = r#"
[instance]
id = "dhcpd-01"

[dhcp]
enabled = true

[[dhcp.subnets]]
cidr = "192.168.1.0/24"
interface = "eth0"
routers = ["192.168.1.1"]
dns_servers = ["192.168.1.1"]
lease_time_secs = 3600

[[dhcp.subnets.pools]]
id = "default"
range_start = "192.168.1.100"
range_end = "192.168.1.200"

[[dhcp.subnets.reservations]]
mac = "aa:bb:cc:dd:ee:ff"
ip = "192.168.1.50"
hostname = "printer"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        let subnet = &config.dhcp.subnets[0];
        assert_eq!(subnet.pools[0].range_start, "192.168.1.100");
        assert_eq!(subnet.reservations[0].hostname.as_deref(), Some("printer"));
    }

    #[test]
    fn test_parse_ha_config() {
        let toml_str = r#"
[instance]
id = "dhcpd-01"

[ha]
role = "primary"
bind = "0.0.0.0:647"
peer_addr = "10.0.0.2:647"
heartbeat_interval_secs = 2
failover_timeout_secs = 10
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        let ha = config.ha.unwrap();
        assert_eq!(ha.role, crate::types::HaRole::Primary);
        assert_eq!(ha.failover_timeout_secs, 10);
    }

    #[test]
    fn test_rate_limit_defaults() {
        let toml_str = r#"
[instance]
id = "dhcpd-01"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(!config.rate_limit.enabled);
        assert_eq!(config.rate_limit.global_capacity, 1000);
    }
}
