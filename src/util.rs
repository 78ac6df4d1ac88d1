use crate::config::Config;
use crate::error::{Error, Result};

/// How the operator can run Caddy on this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyRuntime {
    Caddy,
    Docker,
}

/// Checks PATH for a way to run the proxy. Launching it stays the operator's
/// job; we only verify it is possible before generating routes for it.
pub fn ensure_proxy_runtime() -> Result<ProxyRuntime> {
    if which::which("caddy").is_ok() {
        return Ok(ProxyRuntime::Caddy);
    }
    if which::which("docker").is_ok() {
        return Ok(ProxyRuntime::Docker);
    }
    Err(Error::Precondition(
        "neither caddy nor docker is on PATH; install one to front the capture listener".into(),
    ))
}

pub fn print_caddy_suggestion(runtime: ProxyRuntime, cfg: &Config) {
    let path = cfg
        .caddyfile_path
        .canonicalize()
        .unwrap_or_else(|_| cfg.caddyfile_path.clone());
    println!("Caddy suggestion (run to start proxying):");
    match runtime {
        ProxyRuntime::Caddy => {
            println!("caddy run --config {} --adapter caddyfile", path.display());
        }
        ProxyRuntime::Docker => {
            println!(
                "docker run --rm --network host -v {}:/etc/caddy/Caddyfile caddy:latest",
                path.display()
            );
        }
    }
}
