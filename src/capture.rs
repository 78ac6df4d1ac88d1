//! Capture records: one durable JSON document per received request.

use crate::error::{Error, Result};
use base64::{engine::general_purpose, Engine as _};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use uuid::Uuid;

/// Everything retained about one received request.
///
/// Header names keep their wire spelling; a duplicated header line
/// overwrites the earlier value. Exactly one of `body` / `body_base64` is
/// present when the request carried a body: text stays text, anything that
/// does not decode is kept raw as base64.
#[derive(Debug, Serialize, Clone)]
pub struct CaptureRecord {
    pub src_ip: String,
    pub src_port: u16,
    pub timestamp: String,
    pub method: String,
    pub path: String,
    pub version: String,
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_base64: Option<String>,
}

/// Decode body bytes as UTF-8 text.
pub fn decode_body(bytes: &[u8]) -> Result<String> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|_| Error::Encoding)
}

/// Fallback form for bodies that failed [`decode_body`].
pub fn encode_raw_body(bytes: &[u8]) -> String {
    general_purpose::STANDARD.encode(bytes)
}

/// Writes records into the capture directory, one file per request.
///
/// Storage keys are fresh UUIDv4s, so concurrent writers never contend for
/// a filename.
pub struct RecordStore {
    dir: PathBuf,
}

impl RecordStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
        Ok(Self { dir })
    }

    /// Persist one record under a fresh storage key. Returns the path
    /// written so callers can log it.
    pub fn persist(&self, record: &CaptureRecord) -> Result<PathBuf> {
        let key = Uuid::new_v4().simple().to_string();
        let path = self.dir.join(format!("{key}.json"));
        let json = serde_json::to_string_pretty(record).map_err(|e| {
            Error::io(&path, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        fs::write(&path, json).map_err(|e| Error::io(&path, e))?;
        Ok(path)
    }
}
