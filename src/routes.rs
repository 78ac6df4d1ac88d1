//! Route generation: render the Caddyfile that funnels every exposed port
//! to the capture listener.
//!
//! Rendering is pure; identical inputs always produce byte-identical text,
//! and writing overwrites in place so regeneration is idempotent.

use crate::error::{Error, Result};
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

/// Free ports split by protocol class.
///
/// The TLS class is a naming convention, not protocol inspection: any port
/// whose decimal form contains "443" is served with a locally issued
/// certificate, everything else speaks plain HTTP.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RouteGroups {
    pub tls: BTreeSet<u16>,
    pub plain: BTreeSet<u16>,
}

pub fn is_tls_port(port: u16) -> bool {
    port.to_string().contains("443")
}

pub fn partition_ports(free: &BTreeSet<u16>) -> RouteGroups {
    let mut groups = RouteGroups::default();
    for &port in free {
        if is_tls_port(port) {
            groups.tls.insert(port);
        } else {
            groups.plain.insert(port);
        }
    }
    groups
}

/// Render the full Caddyfile: the global protocol directive, then one block
/// per non-empty group, every binding forwarding to `internal_target`.
///
/// With no free ports at all the output is just the global block — a
/// degenerate but valid configuration.
pub fn render_caddyfile(free: &BTreeSet<u16>, public_ip: &str, internal_target: &str) -> String {
    let groups = partition_ports(free);

    let mut out = String::new();
    out.push_str("{\n\tservers {\n\t\tprotocols h1 h2 h2c\n\t}\n}\n");

    if !groups.tls.is_empty() {
        let hosts = join_bindings(&groups.tls, public_ip);
        let _ = write!(
            out,
            "\n{hosts} {{\n\ttls internal\n\treverse_proxy {internal_target}\n}}\n"
        );
    }
    if !groups.plain.is_empty() {
        let hosts = join_bindings(&groups.plain, public_ip);
        let _ = write!(
            out,
            "\n{hosts} {{\n\treverse_proxy {internal_target}\n}}\n"
        );
    }
    out
}

fn join_bindings(ports: &BTreeSet<u16>, public_ip: &str) -> String {
    ports
        .iter()
        .map(|p| format!("{public_ip}:{p}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Write the routing artifact, replacing any previous version.
pub fn write_caddyfile(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).map_err(|e| Error::io(path, e))
}
