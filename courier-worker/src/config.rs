use envconfig::Envconfig;

use courier_common::config::{EnvMsDuration, NonEmptyString, StatusCodeList};

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3301")]
    pub port: u16,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    /// Outcomes are kept in memory when no database is configured.
    pub database_url: Option<String>,

    #[envconfig(default = "delivery_outcomes")]
    pub outcome_table: String,

    #[envconfig(default = "10")]
    pub max_pg_connections: u32,

    #[envconfig(default = "http://localhost:8100/send")]
    pub sender_endpoint: String,

    #[envconfig(default = "5000")]
    pub request_timeout: EnvMsDuration,

    /// HTTP statuses from the notification gateway to treat as terminal even
    /// though the default classification would retry them.
    #[envconfig(default = "")]
    pub non_retryable_statuses: StatusCodeList,

    #[envconfig(nested = true)]
    pub retry_policy: RetryPolicyConfig,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Name of the dead-letter topic: the primary topic plus a suffix.
    pub fn dead_letter_topic(&self) -> String {
        format!(
            "{}{}",
            self.kafka.kafka_topic,
            self.kafka.kafka_dead_letter_suffix.as_str()
        )
    }
}

#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    #[envconfig(default = "kafka:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "notifications")]
    pub kafka_topic: String,

    #[envconfig(default = "courier-worker")]
    pub kafka_consumer_group: String,

    /// Non-empty, or the dead-letter topic would collapse into the primary.
    #[envconfig(default = "-dlt")]
    pub kafka_dead_letter_suffix: NonEmptyString,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,
}

#[derive(Envconfig, Clone)]
pub struct RetryPolicyConfig {
    #[envconfig(default = "2.0")]
    pub multiplier: f64,

    #[envconfig(default = "300000")]
    pub initial_interval: EnvMsDuration,

    #[envconfig(default = "1800000")]
    pub maximum_interval: EnvMsDuration,

    #[envconfig(default = "5")]
    pub max_retries: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dead_letter_topic_name() {
        let mut config = Config::init_from_hashmap(&Default::default()).unwrap();
        assert_eq!(config.dead_letter_topic(), "notifications-dlt");

        config.kafka.kafka_topic = "invoices".to_owned();
        config.kafka.kafka_dead_letter_suffix = ".dead".parse().unwrap();
        assert_eq!(config.dead_letter_topic(), "invoices.dead");
    }

    #[test]
    fn test_empty_dead_letter_suffix_is_rejected() {
        let env = std::collections::HashMap::from([(
            "KAFKA_DEAD_LETTER_SUFFIX".to_owned(),
            "".to_owned(),
        )]);
        assert!(Config::init_from_hashmap(&env).is_err());
    }
}
