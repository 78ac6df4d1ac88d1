//! Capture listener: the single loopback endpoint every proxied port funnels
//! into. Reads requests tolerantly, writes one JSON record per request, and
//! answers everything with the same innocuous `ok` page.

use crate::capture::{self, CaptureRecord, RecordStore};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::metrics::{record_connection, record_dropped, record_persisted, record_request, Metrics};
use chrono::Utc;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Longest request line we accept, terminator included. Anything over this
/// gets a 414 and the connection is closed.
pub const MAX_REQUEST_LINE: usize = 65536;

/// Per-header-line bound. Lines beyond this end the connection without a reply.
const MAX_HEADER_LINE: usize = 65536;

/// Header line bound per request. Repeated names still count per line.
const MAX_HEADERS: usize = 100;

const RESPONSE_OK: &[u8] =
    b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: 2\r\n\r\nok";
const RESPONSE_OK_CLOSE: &[u8] =
    b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok";
const RESPONSE_414: &[u8] =
    b"HTTP/1.1 414 Request-URI Too Long\r\nContent-Type: text/html\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
const RESPONSE_500: &[u8] =
    b"HTTP/1.1 500 Internal Server Error\r\nContent-Type: text/html\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

/// One parsed inbound request.
#[derive(Debug)]
struct Request {
    method: String,
    path: String,
    version: String,
    headers: BTreeMap<String, String>,
    body: Option<Vec<u8>>,
    keep_alive: bool,
    http09: bool,
}

/// What a single read attempt on the connection produced.
enum Step {
    /// Peer closed the connection before sending anything.
    Eof,
    /// Request line exceeded [`MAX_REQUEST_LINE`].
    TooLong,
    /// Peer went quiet past the configured read timeout.
    Timeout,
    /// A complete request, body included if one was declared.
    Request(Request),
}

pub struct CaptureListener {
    cfg: Config,
    store: Arc<RecordStore>,
    shutdown: broadcast::Receiver<()>,
    metrics: Option<Arc<Metrics>>,
}

impl CaptureListener {
    /// Creates the listener and its record store (the capture directory is
    /// created here if missing).
    pub fn new(
        cfg: Config,
        shutdown: broadcast::Receiver<()>,
        metrics: Option<Arc<Metrics>>,
    ) -> Result<Self> {
        let store = Arc::new(RecordStore::new(cfg.capture_dir.clone())?);
        Ok(Self { cfg, store, shutdown, metrics })
    }

    /// Accept loop. Runs until the shutdown channel fires; each connection is
    /// served on its own task.
    pub async fn run(&self) -> Result<()> {
        let addr = self.cfg.listen_addr();
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            Error::Precondition(format!("cannot bind capture listener on {addr}: {e}"))
        })?;
        info!(%addr, "capture listener ready");

        let mut shutdown_rx = self.shutdown.resubscribe();
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("capture listener shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        record_connection(&self.metrics);
                        debug!(%peer, "connection accepted");
                        let store = self.store.clone();
                        let metrics = self.metrics.clone();
                        let read_timeout = self.cfg.read_timeout();
                        tokio::spawn(async move {
                            handle_conn(stream, peer, store, metrics, read_timeout).await;
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                    }
                }
            }
        }
    }
}

/// Serves one connection until it closes. Malformed input ends the connection
/// without any reply, so a prober cannot tell the capture endpoint apart from
/// a dead socket.
async fn handle_conn(
    stream: TcpStream,
    peer: SocketAddr,
    store: Arc<RecordStore>,
    metrics: Option<Arc<Metrics>>,
    read_timeout: Duration,
) {
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    loop {
        let req = match read_request(&mut reader, read_timeout).await {
            Ok(Step::Eof) => return,
            Ok(Step::Timeout) => {
                warn!(%peer, "request read timed out");
                return;
            }
            Ok(Step::TooLong) => {
                record_dropped(&metrics);
                warn!(%peer, "request line too long");
                let _ = writer.write_all(RESPONSE_414).await;
                return;
            }
            Err(err) => {
                record_dropped(&metrics);
                debug!(%peer, error = %err, "dropping malformed request");
                return;
            }
            Ok(Step::Request(req)) => req,
        };

        record_request(&metrics);
        let Request { method, path, version, headers, body, keep_alive, http09 } = req;
        info!(%peer, %method, %path, %version, "request captured");

        let mut record = CaptureRecord {
            src_ip: peer.ip().to_string(),
            src_port: peer.port(),
            timestamp: Utc::now().to_rfc3339(),
            method,
            path,
            version,
            headers,
            body: None,
            body_base64: None,
        };
        if let Some(bytes) = body {
            match capture::decode_body(&bytes) {
                Ok(text) => record.body = Some(text),
                Err(err) => {
                    debug!(%peer, error = %err, "storing body as base64");
                    record.body_base64 = Some(capture::encode_raw_body(&bytes));
                }
            }
        }

        // The record must be on disk before the peer hears anything back.
        match store.persist(&record) {
            Ok(path) => {
                record_persisted(&metrics);
                debug!(%peer, path = %path.display(), "capture record written");
            }
            Err(err) => {
                error!(%peer, error = %err, "failed to persist capture record");
                let _ = writer.write_all(RESPONSE_500).await;
                return;
            }
        }

        if http09 {
            // HTTP/0.9 predates status lines and headers.
            let _ = writer.write_all(b"ok").await;
            return;
        }
        if keep_alive {
            let _ = writer.write_all(RESPONSE_OK).await;
        } else {
            let _ = writer.write_all(RESPONSE_OK_CLOSE).await;
            return;
        }
    }
}

/// Reads and parses one request off the wire. `Err` means the input was
/// malformed (bad request line, bad headers, truncated body, or a transport
/// error mid-read); the caller drops the connection without replying.
async fn read_request<R>(reader: &mut R, read_timeout: Duration) -> Result<Step>
where
    R: AsyncBufRead + Unpin,
{
    let raw_line =
        match tokio::time::timeout(read_timeout, read_line_bounded(reader, MAX_REQUEST_LINE)).await
        {
            Err(_) => return Ok(Step::Timeout),
            Ok(Err(e)) => return Err(Error::Protocol(format!("read failed: {e}"))),
            Ok(Ok(LineRead::Eof)) => return Ok(Step::Eof),
            Ok(Ok(LineRead::TooLong)) => return Ok(Step::TooLong),
            Ok(Ok(LineRead::Line(line))) => line,
        };

    let line = String::from_utf8_lossy(&raw_line);
    let line = line.trim_end_matches(['\r', '\n']);
    let (method, path, version, http09) = parse_request_line(line)
        .ok_or_else(|| Error::Protocol(format!("bad request line: {line:?}")))?;

    let mut headers = BTreeMap::new();
    if !http09 {
        let mut header_lines = 0usize;
        loop {
            let raw =
                match tokio::time::timeout(read_timeout, read_line_bounded(reader, MAX_HEADER_LINE))
                    .await
                {
                    Err(_) => return Ok(Step::Timeout),
                    Ok(Err(e)) => return Err(Error::Protocol(format!("read failed: {e}"))),
                    Ok(Ok(LineRead::Eof)) => {
                        return Err(Error::Protocol("connection closed inside headers".into()))
                    }
                    Ok(Ok(LineRead::TooLong)) => {
                        return Err(Error::Protocol("header line too long".into()))
                    }
                    Ok(Ok(LineRead::Line(line))) => line,
                };
            let text = String::from_utf8_lossy(&raw);
            let text = text.trim_end_matches(['\r', '\n']);
            if text.is_empty() {
                break;
            }
            // The cap counts lines, not map entries: duplicate names collapse
            // into one entry and must not extend the budget.
            header_lines += 1;
            if header_lines > MAX_HEADERS {
                return Err(Error::Protocol("too many header lines".into()));
            }
            let (name, value) = text
                .split_once(':')
                .ok_or_else(|| Error::Protocol(format!("header without colon: {text:?}")))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(Error::Protocol("empty header name".into()));
            }
            // Later duplicates overwrite earlier ones.
            headers.insert(name.to_string(), value.trim().to_string());
        }
    }

    let mut body = None;
    if let Some(raw_len) = header_value(&headers, "content-length") {
        let len: usize = raw_len
            .trim()
            .parse()
            .map_err(|_| Error::Protocol(format!("bad content-length: {raw_len:?}")))?;
        body = match tokio::time::timeout(read_timeout, read_body(reader, len)).await {
            Err(_) => return Ok(Step::Timeout),
            Ok(Err(e)) => return Err(Error::Protocol(format!("read failed: {e}"))),
            Ok(Ok(None)) => return Err(Error::Protocol("connection closed inside body".into())),
            Ok(Ok(Some(bytes))) => Some(bytes),
        };
    }

    let keep_alive = !http09 && wants_keep_alive(&version, &headers);
    Ok(Step::Request(Request { method, path, version, headers, body, keep_alive, http09 }))
}

enum LineRead {
    Line(Vec<u8>),
    TooLong,
    Eof,
}

/// Reads up to and including one `\n`, refusing to buffer more than `max`
/// bytes. A partial line at EOF is returned as a line, matching what lenient
/// servers do with a final unterminated request.
async fn read_line_bounded<R>(reader: &mut R, max: usize) -> std::io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    loop {
        let (done, used) = {
            let buf = reader.fill_buf().await?;
            if buf.is_empty() {
                return Ok(if line.is_empty() { LineRead::Eof } else { LineRead::Line(line) });
            }
            match buf.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    line.extend_from_slice(&buf[..=pos]);
                    (true, pos + 1)
                }
                None => {
                    line.extend_from_slice(buf);
                    (false, buf.len())
                }
            }
        };
        reader.consume(used);
        if line.len() > max {
            return Ok(LineRead::TooLong);
        }
        if done {
            return Ok(LineRead::Line(line));
        }
    }
}

/// Reads exactly `len` body bytes, growing the buffer as data arrives rather
/// than trusting the declared length for the allocation. `None` means the
/// peer closed the connection early.
async fn read_body<R>(reader: &mut R, len: usize) -> std::io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut body = Vec::with_capacity(len.min(64 * 1024));
    let mut chunk = [0u8; 8192];
    while body.len() < len {
        let want = (len - body.len()).min(chunk.len());
        let n = reader.read(&mut chunk[..want]).await?;
        if n == 0 {
            return Ok(None);
        }
        body.extend_from_slice(&chunk[..n]);
    }
    Ok(Some(body))
}

/// Splits a request line into method, path and version. A bare two-word
/// `GET /path` is taken as HTTP/0.9; anything else must be the three-word
/// form with a parseable `HTTP/<major>.<minor>` version.
fn parse_request_line(line: &str) -> Option<(String, String, String, bool)> {
    let words: Vec<&str> = line.split_whitespace().collect();
    match words.as_slice() {
        [method, path, version] => {
            let (major, _) = parse_version(version)?;
            if major > 1 {
                return None;
            }
            Some((method.to_string(), path.to_string(), version.to_string(), false))
        }
        ["GET", path] => Some(("GET".into(), path.to_string(), "HTTP/0.9".into(), true)),
        _ => None,
    }
}

fn parse_version(version: &str) -> Option<(u8, u8)> {
    let rest = version.strip_prefix("HTTP/")?;
    let (major, minor) = rest.split_once('.')?;
    Some((major.parse().ok()?, minor.parse().ok()?))
}

/// HTTP/1.1 keeps the connection open unless told `close`; HTTP/1.0 closes
/// unless told `keep-alive`.
fn wants_keep_alive(version: &str, headers: &BTreeMap<String, String>) -> bool {
    let default =
        matches!(parse_version(version), Some((major, minor)) if major == 1 && minor >= 1);
    match header_value(headers, "connection").map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if v == "close" => false,
        Some(v) if v == "keep-alive" => true,
        _ => default,
    }
}

/// Case-insensitive header lookup against the wire-spelled keys.
fn header_value<'a>(headers: &'a BTreeMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}
