use funnelpot::config::Config;
use funnelpot::error::Error;
use funnelpot::pubip;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread;

// One-shot stand-in for the "what is my ip" service.
fn spawn_ip_server(port: u16, body: &'static str) {
    let listener = TcpListener::bind(("127.0.0.1", port)).expect("bind mock ip api");
    thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf);
            let resp = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = stream.write_all(resp.as_bytes());
        }
    });
}

#[tokio::test]
async fn discovery_uses_the_configured_api() {
    spawn_ip_server(18081, r#"{"ip":"203.0.113.77"}"#);
    let cfg = Config::test_builder().ip_api_url("http://127.0.0.1:18081/").build();
    assert_eq!(pubip::discover(&cfg).await.expect("discover"), "203.0.113.77");
}

#[tokio::test]
async fn reply_without_ip_field_is_a_precondition_error() {
    spawn_ip_server(18082, r#"{"address":"1.2.3.4"}"#);
    let cfg = Config::test_builder().ip_api_url("http://127.0.0.1:18082/").build();
    let err = pubip::discover(&cfg).await.unwrap_err();
    assert!(matches!(err, Error::Precondition(_)), "expected precondition error, got {err}");
}

#[tokio::test]
async fn reply_that_is_not_an_address_is_rejected() {
    spawn_ip_server(18083, r#"{"ip":"banana"}"#);
    let cfg = Config::test_builder().ip_api_url("http://127.0.0.1:18083/").build();
    let err = pubip::discover(&cfg).await.unwrap_err();
    assert!(matches!(err, Error::Precondition(_)), "expected precondition error, got {err}");
}
