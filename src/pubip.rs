//! Public IP discovery: asks a JSON "what is my ip" service unless the
//! operator pinned an address in config.

use crate::config::Config;
use crate::error::{Error, Result};
use reqwest::Client;
use serde::Deserialize;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Deserialize)]
struct IpReply {
    ip: String,
}

/// Returns the address the generated site blocks will bind to. A configured
/// `public_ip` wins; otherwise the IP API is queried once at startup.
pub async fn discover(cfg: &Config) -> Result<String> {
    if let Some(ip) = &cfg.public_ip {
        debug!(%ip, "using configured public ip");
        return Ok(ip.clone());
    }

    let client = Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| Error::Precondition(format!("cannot build http client: {e}")))?;
    let reply: IpReply = client
        .get(&cfg.ip_api_url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| {
            Error::Precondition(format!("public ip lookup via {} failed: {e}", cfg.ip_api_url))
        })?
        .json()
        .await
        .map_err(|e| {
            Error::Precondition(format!("public ip reply was not the expected json: {e}"))
        })?;

    // The address goes verbatim into the generated Caddyfile, so insist on
    // something that actually parses as one.
    let ip: IpAddr = reply.ip.trim().parse().map_err(|_| {
        Error::Precondition(format!("ip service returned {:?}, not an ip address", reply.ip))
    })?;
    info!(%ip, "discovered public ip");
    Ok(ip.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn configured_ip_skips_the_network() {
        let cfg = Config::test_builder()
            .public_ip("198.51.100.7")
            .ip_api_url("http://127.0.0.1:9/unreachable")
            .build();
        assert_eq!(discover(&cfg).await.unwrap(), "198.51.100.7");
    }
}
