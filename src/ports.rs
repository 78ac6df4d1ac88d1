//! Port selection: parse the operator's port specifier and decide which
//! requested ports are safe to expose.

use crate::error::{Error, Result};
use std::collections::BTreeSet;
use std::fs;
use std::ops::RangeInclusive;
use std::path::Path;
use tracing::{debug, warn};

/// Parse the `--ports` argument: a path to a file of newline-separated port
/// numbers, or an inclusive range like `8000-8100`.
pub fn parse_spec(spec: &str) -> Result<BTreeSet<u16>> {
    let path = Path::new(spec);
    if path.is_file() {
        read_ports_from_file(path)
    } else if spec.contains('-') {
        parse_port_range(spec)
    } else {
        Err(Error::Validation(format!(
            "invalid port specifier '{spec}': use either a file or a range (e.g., 8000-8100)"
        )))
    }
}

fn read_ports_from_file(path: &Path) -> Result<BTreeSet<u16>> {
    let contents = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let mut ports = BTreeSet::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        ports.insert(parse_port(line)?);
    }
    Ok(ports)
}

fn parse_port_range(spec: &str) -> Result<BTreeSet<u16>> {
    let (start, end) = spec.split_once('-').ok_or_else(|| {
        Error::Validation(format!("invalid port range '{spec}'"))
    })?;
    let start = parse_port(start.trim())?;
    let end = parse_port(end.trim())?;
    if start > end {
        return Err(Error::Validation(format!(
            "invalid port range '{spec}': start is greater than end"
        )));
    }
    Ok((start..=end).collect())
}

// Parsed as a wide integer first so out-of-domain values are reported by
// value instead of as a bare integer overflow.
fn parse_port(raw: &str) -> Result<u16> {
    let value: i64 = raw
        .parse()
        .map_err(|_| Error::Validation(format!("'{raw}' is not a port number")))?;
    if !(1..=65535).contains(&value) {
        return Err(Error::Validation(format!(
            "port {value} out of range: must be between 1 and 65535"
        )));
    }
    Ok(value as u16)
}

/// Filter the requested set down to the ports that are safe to expose:
/// not bound on the host and not inside the reserved internal range.
///
/// Port 80 being bound is fatal regardless of the requested set: the Caddy
/// front needs it and cannot start without it.
pub fn select_free_ports(
    requested: &BTreeSet<u16>,
    busy: &BTreeSet<u16>,
    reserved: RangeInclusive<u16>,
) -> Result<BTreeSet<u16>> {
    if busy.contains(&80) {
        return Err(Error::Precondition(
            "port 80 is already bound; unbind it first, Caddy uses it by default".into(),
        ));
    }

    for port in requested.intersection(busy) {
        warn!(port, "skipping port: already in use on this host");
    }

    let free = requested
        .iter()
        .copied()
        .filter(|p| {
            if reserved.contains(p) {
                debug!(port = *p, "excluding reserved internal port");
                return false;
            }
            !busy.contains(p)
        })
        .collect();
    Ok(free)
}
