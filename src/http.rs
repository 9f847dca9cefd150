use std::time::Duration;

use reqwest::Client;

/// Connect timeout shared by every outbound HTTP client.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Build a `reqwest::Client` whose requests give up after `timeout`.
pub fn client(timeout: Duration) -> Client {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT.min(timeout))
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| Client::new())
}
