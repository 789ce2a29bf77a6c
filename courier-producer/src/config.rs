use envconfig::Envconfig;

use courier_common::config::EnvMsDuration;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3302")]
    pub port: u16,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    /// How many times a single publish is attempted against the broker before
    /// the error is returned to the caller.
    #[envconfig(default = "3")]
    pub max_publish_attempts: u32,

    #[envconfig(default = "1000")]
    pub publish_retry_interval: EnvMsDuration,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    #[envconfig(default = "kafka:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "notifications")]
    pub kafka_topic: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,
}
