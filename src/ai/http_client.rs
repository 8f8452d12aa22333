//! Shared HTTP client construction
//!
//! Both the inference client and the uploader build their `reqwest::Client`
//! here so they share pooling and keepalive settings.

use reqwest::Client;
use std::time::Duration;

/// Build an HTTP client with the given request timeout
///
/// - 90s idle timeout to balance resource usage and performance
/// - TCP keepalive so long inference calls survive idle NAT tables
pub fn build_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .tcp_nodelay(true)
        .build()
}
