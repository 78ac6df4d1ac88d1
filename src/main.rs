//! funnelpot: a multi-port HTTP honeypot front door.
//!
//! This binary orchestrates the pipeline: resolve config, work out which of
//! the requested ports are actually free, generate Caddy routes that funnel
//! them all into one loopback endpoint, then run the capture listener there.

use anyhow::Result;
use clap::Parser;
use funnelpot::config::{Cli, Config};
use funnelpot::listener::CaptureListener;
use funnelpot::metrics::{self, Metrics};
use funnelpot::netscan::{PortScanner, ProcNetScanner};
use funnelpot::{ports, pubip, routes, util};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = Config::from_cli(&cli)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    // Work out what we can actually bind behind the proxy.
    let requested = ports::parse_spec(&cli.ports)?;
    let busy = ProcNetScanner.listening_ports()?;
    let free = ports::select_free_ports(&requested, &busy, cfg.reserved_range())?;

    if cli.list_ports {
        println!(
            "Free ports: {}",
            free.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(", ")
        );
        return Ok(());
    }
    if free.is_empty() {
        warn!("no requested port is free; the proxy will have nothing to forward");
    }

    // Fail early if the operator cannot run Caddy at all.
    let runtime = util::ensure_proxy_runtime()?;
    let public_ip = pubip::discover(&cfg).await?;

    let caddyfile = routes::render_caddyfile(&free, &public_ip, &cfg.listen_addr());
    routes::write_caddyfile(&cfg.caddyfile_path, &caddyfile)?;

    let yellow = "\x1b[33m";
    let green = "\x1b[32m";
    let reset = "\x1b[0m";
    let bold = "\x1b[1m";
    println!("\n{bold}{green}funnelpot ready!{reset}");
    println!("  {yellow}Public IP:{reset}     {public_ip}");
    println!(
        "  {yellow}Proxied ports:{reset} {}",
        free.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(", ")
    );
    println!("  {yellow}Caddyfile:{reset}     {}", cfg.caddyfile_path.display());
    println!("  {yellow}Captures:{reset}      {}", cfg.capture_dir.display());
    println!();
    util::print_caddy_suggestion(runtime, &cfg);

    let metrics = cfg.metrics_addr.as_ref().map(|_| Arc::new(Metrics::default()));
    if let (Some(addr), Some(m)) = (cfg.metrics_addr.clone(), metrics.clone()) {
        metrics::spawn_metrics_server(addr, m).await;
    }

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let listener = CaptureListener::new(cfg, shutdown_rx, metrics)?;
    let mut handle = tokio::spawn(async move { listener.run().await });

    println!("\n{green}Capture listener running. Press Ctrl+C to stop.{reset}");
    tokio::select! {
        res = &mut handle => {
            res??;
            anyhow::bail!("capture listener exited unexpectedly");
        }
        _ = tokio::signal::ctrl_c() => {
            println!("\n{green}Shutting down.{reset}");
            let _ = shutdown_tx.send(());
            let _ = handle.await;
        }
    }
    Ok(())
}
