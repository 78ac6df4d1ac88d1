use funnelpot::capture::{CaptureRecord, RecordStore};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use uuid::Uuid;

fn sample_record(path: &str) -> CaptureRecord {
    let mut headers = BTreeMap::new();
    headers.insert("Host".to_string(), "victim.example".to_string());
    headers.insert("User-Agent".to_string(), "zgrab/0.x".to_string());
    CaptureRecord {
        src_ip: "203.0.113.9".to_string(),
        src_port: 40312,
        timestamp: "2026-08-22T12:00:00+00:00".to_string(),
        method: "GET".to_string(),
        path: path.to_string(),
        version: "HTTP/1.1".to_string(),
        headers,
        body: None,
        body_base64: None,
    }
}

#[tokio::test]
async fn records_land_as_pretty_json_under_random_names() {
    let dir = std::env::temp_dir().join(format!("funnelpot_store_{}", Uuid::new_v4()));
    let store = RecordStore::new(dir.clone()).expect("store");

    let written = store.persist(&sample_record("/admin")).expect("persist");
    assert_eq!(written.parent(), Some(dir.as_path()));

    let name = written.file_name().unwrap().to_str().unwrap();
    let stem = name.strip_suffix(".json").expect("json suffix");
    assert_eq!(stem.len(), 32, "expected a 128-bit hex id, got {name}");
    assert!(stem.chars().all(|c| c.is_ascii_hexdigit()));

    let text = fs::read_to_string(&written).expect("read record");
    assert!(text.contains("\n  \""), "record should be indented: {text}");

    let value: Value = serde_json::from_str(&text).expect("valid json");
    assert_eq!(value["src_ip"], "203.0.113.9");
    assert_eq!(value["method"], "GET");
    assert_eq!(value["path"], "/admin");
    assert_eq!(value["headers"]["Host"], "victim.example");
    assert!(value.get("body").is_none(), "empty body must be omitted");
    assert!(value.get("body_base64").is_none());

    let _ = fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn repeated_persists_never_collide() {
    let dir = std::env::temp_dir().join(format!("funnelpot_store_{}", Uuid::new_v4()));
    let store = RecordStore::new(dir.clone()).expect("store");

    let mut names = BTreeSet::new();
    for i in 0..20 {
        let written = store.persist(&sample_record(&format!("/probe/{i}"))).expect("persist");
        names.insert(written.file_name().unwrap().to_os_string());
    }
    assert_eq!(names.len(), 20, "every record must get its own file");

    let _ = fs::remove_dir_all(&dir);
}
