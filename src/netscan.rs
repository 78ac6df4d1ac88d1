//! Busy-port discovery: which local ports already have a listener.
//!
//! Reads `/proc/net/tcp` and `/proc/net/tcp6` — both, because modern stacks
//! often bind `::` only, and a port busy on v6 is just as unbindable for
//! Caddy. Behind a trait so selection can be exercised with synthetic sets.

use crate::error::{Error, Result};
use std::collections::BTreeSet;
use std::fs;
use tracing::trace;

/// TCP state code for LISTEN in the proc net tables.
const TCP_LISTEN: u8 = 0x0A;

/// Source of the host's currently listening TCP ports.
pub trait PortScanner {
    fn listening_ports(&self) -> Result<BTreeSet<u16>>;
}

/// Production scanner backed by the kernel's `/proc/net` tables.
pub struct ProcNetScanner;

impl PortScanner for ProcNetScanner {
    fn listening_ports(&self) -> Result<BTreeSet<u16>> {
        let mut ports = BTreeSet::new();

        let v4 = fs::read_to_string("/proc/net/tcp").map_err(|e| {
            Error::Precondition(format!(
                "cannot read /proc/net/tcp to check busy ports: {e}"
            ))
        })?;
        ports.extend(parse_listening_ports(&v4)?);

        // tcp6 is legitimately absent when IPv6 is disabled
        match fs::read_to_string("/proc/net/tcp6") {
            Ok(v6) => ports.extend(parse_listening_ports(&v6)?),
            Err(e) => trace!(error = %e, "no tcp6 table"),
        }

        Ok(ports)
    }
}

/// Parse one `/proc/net/tcp{,6}` table into the set of LISTEN-state local
/// ports.
///
/// Format (each line after the header):
/// ```text
///    sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
///    0: 00000000:1F90 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 12345 ...
/// ```
///
/// Only the port half of `local_address` and the `st` column matter here;
/// the port is big-endian hex in both the v4 and v6 tables.
fn parse_listening_ports(content: &str) -> Result<BTreeSet<u16>> {
    let mut ports = BTreeSet::new();

    for line in content.lines().skip(1) {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 10 {
            continue;
        }

        let state = u8::from_str_radix(parts[3], 16).map_err(|_| {
            Error::Precondition(format!("cannot parse socket state '{}'", parts[3]))
        })?;
        if state != TCP_LISTEN {
            continue;
        }

        ports.insert(local_port(parts[1])?);
    }

    Ok(ports)
}

fn local_port(local_address: &str) -> Result<u16> {
    let (_, port_hex) = local_address.rsplit_once(':').ok_or_else(|| {
        Error::Precondition(format!("malformed local address '{local_address}'"))
    })?;
    u16::from_str_radix(port_hex, 16).map_err(|_| {
        Error::Precondition(format!("malformed local port in '{local_address}'"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_listen_ports_and_skips_established() {
        let content = r#"  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 00000000:0050 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 12345 1 0000000000000000 100 0 0 10 0
   1: 0100007F:1F90 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 12346 1 0000000000000000 100 0 0 10 0
   2: 0100007F:1F90 0100007F:1234 01 00000000:00000000 00:00000000 00000000  1000        0 12347 1 0000000000000000 100 0 0 10 0"#;

        let ports = parse_listening_ports(content).unwrap();
        // Port 80 (0x50) and 8080 (0x1F90) listening; the established
        // connection (state 01) is ignored
        assert_eq!(ports, [80u16, 8080].into_iter().collect());
    }

    #[test]
    fn parses_v6_table_lines() {
        let content = r#"  sl  local_address                         remote_address                        st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 00000000000000000000000000000000:1F90 00000000000000000000000000000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 12348 1 0000000000000000 100 0 0 10 0"#;

        let ports = parse_listening_ports(content).unwrap();
        assert_eq!(ports, [8080u16].into_iter().collect());
    }

    #[test]
    fn header_only_table_is_empty() {
        let content = "  sl  local_address rem_address   st ...";
        assert!(parse_listening_ports(content).unwrap().is_empty());
    }

    #[test]
    fn malformed_state_is_an_error() {
        let content = "header\n   0: 00000000:0050 00000000:0000 ZZ 00000000:00000000 00:00000000 00000000     0        0 12345";
        assert!(parse_listening_ports(content).is_err());
    }

    #[test]
    fn local_port_parses_hex() {
        assert_eq!(local_port("0100007F:1F90").unwrap(), 8080);
        assert_eq!(
            local_port("00000000000000000000000000000000:0050").unwrap(),
            80
        );
        assert!(local_port("no-colon").is_err());
    }
}
