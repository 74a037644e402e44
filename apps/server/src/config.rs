use std::{net::SocketAddr, time::Duration};

pub struct Config {
    pub listen_addr: SocketAddr,
    pub cors_allow: Vec<String>,
    pub request_timeout: Duration,
    pub queue_capacity: usize,
    pub monitor_interval: Duration,
    pub scheduler_interval: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let listen_addr: SocketAddr = std::env::var("PULSE_LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8000".to_string())
            .parse()
            .expect("Invalid PULSE_LISTEN_ADDR");
        let cors_allow = std::env::var("PULSE_CORS_ALLOW_ORIGINS")
            .unwrap_or_else(|_| "*".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        let timeout_ms: u64 = std::env::var("PULSE_REQUEST_TIMEOUT_MS")
            .unwrap_or_else(|_| "30000".into())
            .parse()
            .unwrap_or(30000);
        let queue_capacity: usize = std::env::var("PULSE_QUEUE_CAPACITY")
            .unwrap_or_else(|_| "1024".into())
            .parse()
            .unwrap_or(1024);
        let monitor_secs: u64 = std::env::var("PULSE_MONITOR_INTERVAL_SECS")
            .unwrap_or_else(|_| "60".into())
            .parse()
            .unwrap_or(60);
        let scheduler_secs: u64 = std::env::var("PULSE_SCHEDULER_INTERVAL_SECS")
            .unwrap_or_else(|_| "10".into())
            .parse()
            .unwrap_or(10);
        Self {
            listen_addr,
            cors_allow,
            request_timeout: Duration::from_millis(timeout_ms),
            queue_capacity,
            monitor_interval: Duration::from_secs(monitor_secs),
            scheduler_interval: Duration::from_secs(scheduler_secs),
        }
    }
}
