use std::{io::Write, num::NonZeroUsize, sync::Arc};

use pretty_assertions::assert_eq;
use reqwest::StatusCode;
use serde_json::{Value, json};
use statka_server::{HttpApi, serve};
use statka_write::{FlushEngine, TableRegistry, test_utils::RecordingInserter};
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_util::sync::CancellationToken;

struct TestServer {
    base_url: String,
    registry: Arc<TableRegistry>,
    shutdown: CancellationToken,
    handle: JoinHandle<statka_server::Result<()>>,
    client: reqwest::Client,
}

impl TestServer {
    async fn start(max_request_bytes: usize) -> Self {
        let registry = Arc::new(TableRegistry::new());
        let http = Arc::new(
            HttpApi::new(Arc::clone(&registry), max_request_bytes).with_hostname("test-host"),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(serve(http, listener, shutdown.clone()));

        Self {
            base_url: format!("http://{addr}"),
            registry,
            shutdown,
            handle,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn stop(self) {
        self.shutdown.cancel();
        self.handle.await.unwrap().unwrap();
    }
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

#[test_log::test(tokio::test)]
async fn get_buffers_query_row() {
    let server = TestServer::start(1024).await;

    let resp = server
        .client
        .get(server.url("/events?user=alice&action=click"))
        .header("user-agent", "statka-test")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(
        body,
        json!({"ok": 1, "table": "events", "row_len": 7, "total": 1})
    );

    let rows = server.registry.snapshot_rows("events").unwrap();
    assert_eq!(rows.len(), 1);
    let row = serde_json::to_value(&rows[0]).unwrap();
    assert_eq!(row["user"], "alice");
    assert_eq!(row["action"], "click");
    assert_eq!(row["server_hostname"], "test-host");
    assert_eq!(row["client_ip"], "127.0.0.1");
    assert_eq!(row["user_agent"], "statka-test");
    assert_eq!(row["request_id"].as_str().unwrap().len(), 8);
    assert!(
        row["event_time"]
            .as_str()
            .unwrap()
            .parse::<i64>()
            .unwrap()
            > 0
    );

    server.stop().await;
}

#[test_log::test(tokio::test)]
async fn json_post_keeps_types_and_counts_total() {
    let server = TestServer::start(1024).await;

    for n in 1..=2 {
        let resp = server
            .client
            .post(server.url("/clicks"))
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .json(&json!({"user": "bob", "n": n, "meta": {"ab": true}}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["total"], n);
        assert_eq!(body["row_len"], 8);
    }

    let rows = server.registry.snapshot_rows("clicks").unwrap();
    let row = serde_json::to_value(&rows[1]).unwrap();
    assert_eq!(row["n"], 2);
    assert_eq!(row["meta"], json!({"ab": true}));
    assert_eq!(row["client_ip"], "203.0.113.9");

    server.stop().await;
}

#[test_log::test(tokio::test)]
async fn enrichment_overwrites_caller_fields() {
    let server = TestServer::start(1024).await;

    let resp = server
        .client
        .get(server.url("/events?server_hostname=spoofed&client_ip=1.2.3.4"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let row = serde_json::to_value(&server.registry.snapshot_rows("events").unwrap()[0]).unwrap();
    assert_eq!(row["server_hostname"], "test-host");
    assert_eq!(row["client_ip"], "127.0.0.1");

    server.stop().await;
}

#[test_log::test(tokio::test)]
async fn gzip_form_post() {
    let server = TestServer::start(1024).await;

    let resp = server
        .client
        .post(server.url("/signups?plan=free"))
        .header("content-type", "application/x-www-form-urlencoded")
        .header("content-encoding", "gzip")
        .body(gzip(b"user=carol&plan=pro"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let row = serde_json::to_value(&server.registry.snapshot_rows("signups").unwrap()[0]).unwrap();
    assert_eq!(row["user"], "carol");
    assert_eq!(row["plan"], "pro");

    server.stop().await;
}

#[test_log::test(tokio::test)]
async fn rejected_requests() {
    let server = TestServer::start(64).await;

    let resp = server
        .client
        .get(server.url("/9lives?user=a"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(resp.text().await.unwrap(), "invalid table name");

    let resp = server
        .client
        .post(server.url("/events"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = server
        .client
        .post(server.url("/events"))
        .header("content-type", "application/x-www-form-urlencoded")
        .body(format!("user={}", "a".repeat(100)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);

    assert_eq!(server.registry.total_buffered_rows(), 0);
    server.stop().await;
}

#[test_log::test(tokio::test)]
async fn empty_rows_and_other_methods_are_no_content() {
    let server = TestServer::start(1024).await;

    let resp = server.client.get(server.url("/events")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = server
        .client
        .put(server.url("/events?user=a"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    assert!(server.registry.table_names().is_empty());
    server.stop().await;
}

#[test_log::test(tokio::test)]
async fn health_is_reserved() {
    let server = TestServer::start(1024).await;

    let resp = server.client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "OK");
    assert!(server.registry.table_names().is_empty());

    server.stop().await;
}

#[test_log::test(tokio::test)]
async fn ingested_rows_reach_the_inserter() {
    let server = TestServer::start(1024).await;
    let inserter = Arc::new(RecordingInserter::new());
    let engine = FlushEngine::new(
        Arc::clone(&server.registry),
        Arc::clone(&inserter) as _,
        NonZeroUsize::new(3).unwrap(),
    );

    for user in ["a", "b"] {
        let resp = server
            .client
            .get(server.url("/events"))
            .query(&[("user", user)])
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let summary = engine.flush_all().await;
    assert_eq!(summary.flushed_rows(), 2);

    let lines = inserter.lines_for("events");
    assert_eq!(lines.len(), 2);
    let users: Vec<Value> = lines
        .iter()
        .map(|line| serde_json::from_str::<Value>(line).unwrap()["user"].clone())
        .collect();
    assert_eq!(users, vec![json!("a"), json!("b")]);
    assert_eq!(server.registry.buffered_rows("events"), Some(0));

    server.stop().await;
}
