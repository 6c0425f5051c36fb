use reqwest::Client;
use std::time::Duration;

fn env_secs(name: &str, default: u64) -> Duration {
    let secs = std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default);
    Duration::from_secs(secs)
}

pub fn build_client() -> Client {
    Client::builder()
        .timeout(env_secs("HTTP_TIMEOUT_SECS", 30))
        .connect_timeout(env_secs("HTTP_CONNECT_TIMEOUT_SECS", 5))
        .build()
        .unwrap_or_else(|_| Client::new())
}
