//! End-to-end calls against the live mock server.
//!
//! # Design
//! Each test starts its own echo server on a random port, drives the real
//! `reqwest` transport through `Client`, then inspects what the server
//! recorded. This covers URL and query assembly, body encoding, hooks and
//! status handling over actual HTTP.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use mock_server::{Echo, Shared};
use restclient::{
    one_of, BodyEncoding, Client, ClientConfig, Each, Endpoint, Error, ErrorKind, HttpMethod,
    Json, RequestDescriptor,
};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use validator::{Validate, ValidationError};

#[derive(Debug, Serialize, Validate)]
struct KeyRequest {
    #[validate(length(min = 1, code = "required"))]
    uid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    subuser: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    #[validate(custom(function = "valid_key_type"))]
    key_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    generate_key: Option<bool>,
}

fn valid_key_type(value: &str) -> Result<(), ValidationError> {
    one_of(value, &["s3", "swift"])
}

fn key_request(uid: &str, key_type: &str) -> KeyRequest {
    KeyRequest {
        uid: uid.to_string(),
        subuser: None,
        key_type: key_type.to_string(),
        generate_key: None,
    }
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TestResponse {
    foo: String,
    bar: String,
    baz: i64,
}

fn expected_response() -> TestResponse {
    TestResponse {
        foo: "foo".to_string(),
        bar: "bar".to_string(),
        baz: 59,
    }
}

#[derive(Debug, Serialize, Validate)]
struct DnsRecord {
    #[validate(length(min = 1, code = "required"), custom(function = "valid_record_type"))]
    record_type: String,
    #[validate(length(min = 1, max = 255))]
    name: String,
    #[validate(length(min = 1, max = 255))]
    data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1))]
    ttl: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1, max = 65535))]
    port: Option<u32>,
}

fn valid_record_type(value: &str) -> Result<(), ValidationError> {
    one_of(value, &["A", "AAAA", "CNAME", "MX", "NS", "SOA", "SRV", "TXT"])
}

fn dns_record(record_type: &str) -> DnsRecord {
    DnsRecord {
        record_type: record_type.to_string(),
        name: "catpics.org".to_string(),
        data: "1".to_string(),
        ttl: Some(100),
        port: None,
    }
}

/// Start an echo server on a random port and return its state and base URL.
async fn start_server() -> (Shared, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let echo = Echo::shared();
    tokio::spawn(mock_server::run(listener, echo.clone()));
    (echo, format!("http://{addr}"))
}

/// Accept connections and read requests without ever answering. One message
/// is sent on the returned channel each time a client closes its connection.
async fn start_silent_server() -> (String, mpsc::UnboundedReceiver<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (closed_tx, closed_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let closed = closed_tx.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                while let Ok(n) = socket.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                }
                let _ = closed.send(());
            });
        }
    });
    (format!("http://{addr}"), closed_rx)
}

fn assert_timed_out(err: &Error) {
    assert_eq!(err.kind(), ErrorKind::Other);
    match err {
        Error::Transport(source) => {
            let reqwest_err = source.downcast_ref::<reqwest::Error>().unwrap();
            assert!(reqwest_err.is_timeout(), "not a timeout: {reqwest_err}");
        }
        other => panic!("expected Transport, got {other:?}"),
    }
}

const CLOSE_WAIT: Duration = Duration::from_secs(5);

fn client(config: ClientConfig) -> Client {
    Client::new(config).unwrap()
}

#[tokio::test]
async fn get_with_query_decodes_response() {
    let (echo, base) = start_server().await;
    echo.respond_json(200, &expected_response()).await;

    let query = key_request("testuid", "s3");
    let mut out = TestResponse::default();
    let resp = client(ClientConfig::default())
        .get(&base, "/laterpath", Some(&query), Some(&mut Json(&mut out)))
        .await
        .unwrap();

    assert_eq!(resp.status, 200);
    assert_eq!(out, expected_response());

    let seen = echo.last().await.unwrap();
    assert_eq!(seen.method, "GET");
    assert_eq!(seen.path, "/laterpath");
    assert_eq!(seen.query.as_deref(), Some("key_type=s3&uid=testuid"));
    assert!(seen.body.is_empty());
}

#[tokio::test]
async fn delete_without_query_sends_no_query_string() {
    let (echo, base) = start_server().await;
    echo.respond_json(200, &expected_response()).await;

    let mut out = TestResponse::default();
    client(ClientConfig::default())
        .delete(&base, "/laterpath", None, Some(&mut Json(&mut out)))
        .await
        .unwrap();

    assert_eq!(out, expected_response());
    let seen = echo.last().await.unwrap();
    assert_eq!(seen.method, "DELETE");
    assert_eq!(seen.query, None);
    assert!(seen.body.is_empty());
}

#[tokio::test]
async fn post_and_put_send_json_bodies() {
    let (echo, base) = start_server().await;
    echo.respond_json(200, &expected_response()).await;
    let client = client(ClientConfig::default());
    let body = key_request("testuid", "s3");

    for method in [HttpMethod::Post, HttpMethod::Put] {
        let mut out = TestResponse::default();
        let request = RequestDescriptor::new(method, &base, "whatever").body(&body);
        client
            .execute(&request, Some(&mut Json(&mut out)))
            .await
            .unwrap();

        assert_eq!(out, expected_response());
        let seen = echo.last().await.unwrap();
        assert_eq!(seen.method, method.as_str());
        assert_eq!(seen.header("content-type"), Some("application/json"));
        assert_eq!(
            seen.body_json(),
            serde_json::json!({"uid": "testuid", "key_type": "s3"})
        );
    }
}

#[tokio::test]
async fn invalid_body_fails_before_sending() {
    let (echo, base) = start_server().await;
    let body = key_request("", "nots3");

    let err = client(ClientConfig::default())
        .post(&base, "/whatever", None, Some(&body), None)
        .await
        .unwrap_err();

    assert!(err.is_validation());
    let report = err.validation().unwrap();
    assert_eq!(report.violations().len(), 2);
    assert_eq!(
        report.message(),
        r#"Validation error: Field 'KeyRequest.key_type' invalid value: 'nots3', valid values are: "s3","swift" ; Required field uid is missing or empty"#
    );
    assert_eq!(echo.hits(), 0);
}

#[tokio::test]
async fn sequence_body_validates_each_record() {
    let (echo, base) = start_server().await;
    let client = client(ClientConfig::default());

    let mut records = vec![dns_record("A"), dns_record("A")];
    client
        .post(&base, "/whatever", None, Some(&Each(&records)), None)
        .await
        .unwrap();
    assert_eq!(echo.hits(), 1);
    let sent = echo.last().await.unwrap().body_json();
    assert_eq!(sent.as_array().map(Vec::len), Some(2));
    assert_eq!(sent[1]["ttl"], 100);

    records[1].record_type = "ASDF".to_string();
    let err = client
        .post(&base, "/whatever", None, Some(&Each(&records)), None)
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        r#"Validation error: Field 'DnsRecord.record_type' invalid value: 'ASDF', valid values are: "A","AAAA","CNAME","MX","NS","SOA","SRV","TXT""#
    );
    assert_eq!(err.validation().unwrap().violations().len(), 1);
    assert_eq!(echo.hits(), 1);

    let bare = client
        .post(&base, "/whatever", None, Some(&records), None)
        .await
        .unwrap_err();
    assert_eq!(bare.to_string(), err.to_string());
    assert_eq!(echo.hits(), 1);
}

#[tokio::test]
async fn error_status_becomes_response_error() {
    let (echo, base) = start_server().await;
    echo.respond(404, "NoSuchUser").await;

    let mut out = TestResponse::default();
    let err = client(ClientConfig::default())
        .get(&base, "/admin/user", None, Some(&mut Json(&mut out)))
        .await
        .unwrap_err();

    assert!(err.is_response());
    let failed = err.response().unwrap();
    assert_eq!(failed.status, 404);
    assert_eq!(failed.status_line, "404 Not Found");
    assert_eq!(failed.body, b"NoSuchUser");
    assert_eq!(out, TestResponse::default());
}

#[tokio::test]
async fn error_hook_can_treat_not_found_as_success() {
    let (echo, base) = start_server().await;
    echo.respond_json(404, &expected_response()).await;

    let config = ClientConfig::default().on_error_response(|resp| match resp.status {
        404 => Ok(()),
        other => Err(format!("status {other}").into()),
    });
    let mut out = TestResponse::default();
    let resp = client(config)
        .get(&base, "/maybe", None, Some(&mut Json(&mut out)))
        .await
        .unwrap();

    assert_eq!(resp.status, 404);
    assert_eq!(out, expected_response());
}

#[tokio::test]
async fn before_send_headers_reach_the_server() {
    let (echo, base) = start_server().await;

    let config = ClientConfig::default().before_send(|req| {
        req.set_header("authorization", "AWS access:signature");
        Ok(())
    });
    client(config).get(&base, "", None, None).await.unwrap();

    let seen = echo.last().await.unwrap();
    assert_eq!(seen.path, "/");
    assert_eq!(seen.header("authorization"), Some("AWS access:signature"));
}

#[tokio::test]
async fn form_mode_encodes_body_as_pairs() {
    let (echo, base) = start_server().await;
    let config = ClientConfig {
        body_encoding: BodyEncoding::Form,
        ..ClientConfig::default()
    };
    let mut body = key_request("test uid", "swift");
    body.generate_key = Some(false);

    client(config)
        .put(&base, "/admin/user", None, Some(&body), None)
        .await
        .unwrap();

    let seen = echo.last().await.unwrap();
    assert_eq!(
        seen.header("content-type"),
        Some("application/x-www-form-urlencoded")
    );
    assert_eq!(
        String::from_utf8(seen.body).unwrap(),
        "generate_key=false&key_type=swift&uid=test+uid"
    );
}

#[tokio::test]
async fn bom_prefixed_json_is_decoded_when_stripping() {
    let (echo, base) = start_server().await;
    let mut body = b"\xEF\xBB\xBF".to_vec();
    body.extend(serde_json::to_vec(&expected_response()).unwrap());
    echo.respond(200, body).await;

    let config = ClientConfig {
        strip_bom: true,
        ..ClientConfig::default()
    };
    let mut out = TestResponse::default();
    client(config)
        .get(&base, "/bom", None, Some(&mut Json(&mut out)))
        .await
        .unwrap();
    assert_eq!(out, expected_response());
}

#[tokio::test]
async fn endpoint_joins_paths_to_base() {
    let (echo, base) = start_server().await;
    echo.respond_json(200, &HashMap::from([("Foo", "x")])).await;

    let endpoint = Endpoint::new(client(ClientConfig::default()), &format!("{base}/admin/"));
    let mut out: HashMap<String, String> = HashMap::new();
    endpoint
        .get("/user", None, Some(&mut Json(&mut out)))
        .await
        .unwrap();

    assert_eq!(out["Foo"], "x");
    assert_eq!(echo.last().await.unwrap().path, "/admin/user");
}

#[tokio::test]
async fn connection_failure_is_a_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client(ClientConfig::default())
        .get(&format!("http://{addr}"), "x", None, None)
        .await
        .unwrap_err();

    match err {
        Error::Transport(source) => assert!(source.downcast_ref::<reqwest::Error>().is_some()),
        other => panic!("expected Transport, got {other:?}"),
    }
}

#[tokio::test]
async fn per_call_timeout_aborts_unanswered_request() {
    let (base, mut closed) = start_silent_server().await;
    let client = client(ClientConfig::default());

    let request = RequestDescriptor::new(HttpMethod::Get, &base, "slow")
        .timeout(Duration::from_millis(200));
    let started = Instant::now();
    let err = client.execute(&request, None).await.unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_timed_out(&err);
    assert_eq!(
        tokio::time::timeout(CLOSE_WAIT, closed.recv()).await.unwrap(),
        Some(())
    );
}

#[tokio::test]
async fn client_timeout_aborts_unanswered_request() {
    let (base, _closed) = start_silent_server().await;
    let config = ClientConfig {
        client_timeout: "200ms".parse().unwrap(),
        ..ClientConfig::default()
    };

    let started = Instant::now();
    let err = client(config)
        .get(&base, "slow", None, None)
        .await
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_timed_out(&err);
}

#[tokio::test]
async fn dropping_the_call_closes_the_connection() {
    let (base, mut closed) = start_silent_server().await;
    let client = client(ClientConfig::default());

    let request = RequestDescriptor::new(HttpMethod::Get, &base, "slow");
    let outcome =
        tokio::time::timeout(Duration::from_millis(200), client.execute(&request, None)).await;
    assert!(outcome.is_err(), "silent server should never answer");

    assert_eq!(
        tokio::time::timeout(CLOSE_WAIT, closed.recv()).await.unwrap(),
        Some(())
    );
}
