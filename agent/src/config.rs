use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::publisher::PublisherConfig;

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub collection_interval: Duration,
    pub tenant_id: String,
    pub agent_id: String,
    pub mqtt_broker: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
    pub mqtt_keep_alive: Duration,
    pub disk_mount_point: PathBuf,
}

impl AgentConfig {
    pub fn from_env() -> Self {
        // Try to find .env file
        if dotenv::dotenv().is_err() {
            // If running from root, try looking in agent/
            if Path::new("agent/.env").exists() {
                dotenv::from_filename("agent/.env").ok();
            }
        }

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from any key lookup. Missing, empty, unparseable or
    /// non-positive values fall back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        Self {
            collection_interval: Duration::from_secs(
                lookup("COLLECTION_INTERVAL")
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .filter(|secs| *secs > 0)
                    .unwrap_or(5),
            ),

            tenant_id: text("TENANT_ID", "tenant-default"),

            agent_id: text("AGENT_ID", "agent-default"),

            mqtt_broker: text("MQTT_BROKER", "localhost"),

            mqtt_port: lookup("MQTT_PORT")
                .and_then(|v| v.trim().parse::<u16>().ok())
                .filter(|port| *port > 0)
                .unwrap_or(1883),

            // Placeholder credentials; production deployments override these
            mqtt_user: text("MQTT_USER", "bridge_user"),

            mqtt_pass: text("MQTT_PASS", "bridge_pass"),

            mqtt_keep_alive: Duration::from_secs(
                lookup("MQTT_KEEP_ALIVE_SEC")
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .filter(|secs| *secs >= 5)
                    .unwrap_or(30),
            ),

            disk_mount_point: PathBuf::from(text("DISK_MOUNT_POINT", "/")),
        }
    }

    /// MQTT client identifier: `agent-<agent_id>`
    pub fn client_id(&self) -> String {
        format!("agent-{}", self.agent_id)
    }

    pub fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig {
            broker: self.mqtt_broker.clone(),
            port: self.mqtt_port,
            username: self.mqtt_user.clone(),
            password: self.mqtt_pass.clone(),
            client_id: self.client_id(),
            keep_alive: self.mqtt_keep_alive,
            ..PublisherConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> AgentConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AgentConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = config_from(&[]);
        assert_eq!(config.collection_interval, Duration::from_secs(5));
        assert_eq!(config.tenant_id, "tenant-default");
        assert_eq!(config.agent_id, "agent-default");
        assert_eq!(config.mqtt_broker, "localhost");
        assert_eq!(config.mqtt_port, 1883);
        assert_eq!(config.mqtt_user, "bridge_user");
        assert_eq!(config.mqtt_pass, "bridge_pass");
        assert_eq!(config.mqtt_keep_alive, Duration::from_secs(30));
        assert_eq!(config.disk_mount_point, PathBuf::from("/"));
    }

    #[test]
    fn reads_overrides() {
        let config = config_from(&[
            ("COLLECTION_INTERVAL", "15"),
            ("TENANT_ID", "acme"),
            ("AGENT_ID", "host-7"),
            ("MQTT_BROKER", "mosquitto"),
            ("MQTT_PORT", "8883"),
            ("MQTT_USER", "svc"),
            ("MQTT_PASS", "secret"),
            ("DISK_MOUNT_POINT", "/data"),
        ]);
        assert_eq!(config.collection_interval, Duration::from_secs(15));
        assert_eq!(config.tenant_id, "acme");
        assert_eq!(config.agent_id, "host-7");
        assert_eq!(config.mqtt_broker, "mosquitto");
        assert_eq!(config.mqtt_port, 8883);
        assert_eq!(config.mqtt_user, "svc");
        assert_eq!(config.mqtt_pass, "secret");
        assert_eq!(config.disk_mount_point, PathBuf::from("/data"));
    }

    #[test]
    fn invalid_numbers_fall_back() {
        let config = config_from(&[
            ("COLLECTION_INTERVAL", "0"),
            ("MQTT_PORT", "not-a-port"),
            ("MQTT_KEEP_ALIVE_SEC", "1"),
        ]);
        assert_eq!(config.collection_interval, Duration::from_secs(5));
        assert_eq!(config.mqtt_port, 1883);
        assert_eq!(config.mqtt_keep_alive, Duration::from_secs(30));

        let config = config_from(&[("COLLECTION_INTERVAL", "-3"), ("MQTT_PORT", "70000")]);
        assert_eq!(config.collection_interval, Duration::from_secs(5));
        assert_eq!(config.mqtt_port, 1883);
    }

    #[test]
    fn publisher_config_uses_agent_identity() {
        let config = config_from(&[("AGENT_ID", "host-7"), ("MQTT_BROKER", "mosquitto")]);
        let publisher = config.publisher_config();
        assert_eq!(publisher.client_id, "agent-host-7");
        assert_eq!(publisher.broker, "mosquitto");
        assert_eq!(publisher.port, 1883);
        assert_eq!(publisher.broker_addr(), "mosquitto:1883");
    }
}
