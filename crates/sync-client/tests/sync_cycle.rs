//! End-to-end sync cycles: a real SQLite-backed local store and the REST
//! client, driven through the collection sync engine against a scripted
//! HTTP server.

use std::collections::VecDeque;
use std::sync::Arc;

use serde_json::json;
use tempfile::tempdir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex as TokioMutex;

use ledgerbook_core::sync::{ChangeOp, Collection, CollectionSyncManager};
use ledgerbook_storage_sqlite::LocalStore;
use ledgerbook_sync_client::CollectionApiClient;

#[derive(Debug, Clone)]
struct CapturedRequest {
    method: String,
    path: String,
}

#[derive(Debug, Clone)]
struct MockResponse {
    status: u16,
    body: String,
}

fn ok(body: &str) -> MockResponse {
    MockResponse {
        status: 200,
        body: body.to_string(),
    }
}

fn header_end_offset(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|window| window == b"\r\n\r\n")
}

async fn read_http_request(stream: &mut tokio::net::TcpStream) -> Option<CapturedRequest> {
    let mut buffer = Vec::new();
    loop {
        let mut chunk = [0_u8; 2048];
        let read = stream.read(&mut chunk).await.ok()?;
        if read == 0 {
            return None;
        }
        buffer.extend_from_slice(&chunk[..read]);
        if header_end_offset(&buffer).is_some() {
            break;
        }
    }

    let header_end = header_end_offset(&buffer)?;
    let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let mut lines = head.lines();
    let request_line = lines.next()?.to_string();
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let content_length = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let mut body_read = buffer.len().saturating_sub(header_end + 4);
    while body_read < content_length {
        let mut chunk = [0_u8; 2048];
        let read = stream.read(&mut chunk).await.ok()?;
        if read == 0 {
            break;
        }
        body_read += read;
    }

    Some(CapturedRequest { method, path })
}

async fn write_http_response(
    stream: &mut tokio::net::TcpStream,
    status: u16,
    body: &str,
) -> std::io::Result<()> {
    let reason = match status {
        200 => "OK",
        201 => "Created",
        404 => "Not Found",
        _ => "Error",
    };
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await
}

async fn start_mock_server(
    responses: Vec<MockResponse>,
) -> (
    String,
    Arc<TokioMutex<Vec<CapturedRequest>>>,
    tokio::task::JoinHandle<()>,
) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("listener addr");
    let captured = Arc::new(TokioMutex::new(Vec::<CapturedRequest>::new()));
    let scripted = Arc::new(TokioMutex::new(VecDeque::from(responses)));
    let captured_clone = Arc::clone(&captured);
    let scripted_clone = Arc::clone(&scripted);

    let handle = tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(value) => value,
                Err(_) => break,
            };
            let Some(request) = read_http_request(&mut stream).await else {
                continue;
            };
            captured_clone.lock().await.push(request);

            let response = scripted_clone.lock().await.pop_front().unwrap_or(MockResponse {
                status: 500,
                body: r#"{"error":"error","code":"INTERNAL","message":"unexpected request"}"#
                    .to_string(),
            });
            let _ = write_http_response(&mut stream, response.status, &response.body).await;
        }
    });

    (format!("http://{}", addr), captured, handle)
}

fn open_store() -> LocalStore {
    let app_data = tempdir()
        .expect("tempdir")
        .keep()
        .to_string_lossy()
        .to_string();
    LocalStore::open(&app_data).expect("open store")
}

fn transactions_manager(
    store: &Arc<LocalStore>,
    base_url: &str,
) -> CollectionSyncManager<LocalStore, CollectionApiClient> {
    let client = Arc::new(CollectionApiClient::new(base_url, "session-token"));
    CollectionSyncManager::new(Collection::Transactions, Arc::clone(store), client)
}

#[tokio::test]
async fn full_cycle_pulls_server_records_and_drains_the_outbox() {
    let (base_url, captured, server) = start_mock_server(vec![
        // Pull, then the queued create.
        ok(r#"{"data":[{"id":"srv-1","updatedAt":"2026-03-01T00:00:00+00:00","description":"from server"}]}"#),
        MockResponse {
            status: 201,
            body: String::new(),
        },
    ])
    .await;

    let store = Arc::new(open_store());
    let manager = transactions_manager(&store, &base_url);

    let created = manager
        .create_local(json!({ "description": "offline coffee", "amount": -450 }))
        .await
        .expect("optimistic create");
    assert_eq!(
        store
            .list_pending_changes(Collection::Transactions)
            .expect("outbox")
            .len(),
        1
    );

    let summary = manager.sync().await;
    assert!(summary.success, "errors: {:?}", summary.errors);
    assert_eq!(summary.inserted, 1);

    // Both the pulled record and the optimistic local one are present.
    let rows = store.get_all(Collection::Transactions).expect("get_all");
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().any(|row| row.id == "srv-1"));
    assert!(rows.iter().any(|row| row.id == created.id));

    // The outbox is drained and the watermark advanced.
    assert!(store
        .list_pending_changes(Collection::Transactions)
        .expect("outbox")
        .is_empty());
    assert!(store
        .get_watermark(Collection::Transactions)
        .expect("watermark")
        .is_some());

    let requests = captured.lock().await.clone();
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].path, "/transactions");
    assert_eq!(requests[1].method, "POST");
    assert_eq!(requests[1].path, "/transactions");

    server.abort();
}

#[tokio::test]
async fn offline_sync_leaves_local_state_and_outbox_intact() {
    // Bind then drop a listener so the port refuses connections.
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let dead_url = format!("http://{}", listener.local_addr().expect("addr"));
    drop(listener);

    let store = Arc::new(open_store());
    let manager = transactions_manager(&store, &dead_url);

    let created = manager
        .create_local(json!({ "description": "created offline", "amount": 1200 }))
        .await
        .expect("optimistic create");

    let summary = manager.sync().await;
    assert!(!summary.success);
    assert_eq!(summary.errors.len(), 2, "pull and push both fail offline");

    // Nothing is lost: the row stays, the change stays queued, the
    // watermark is untouched so the window is re-pulled later.
    assert!(store
        .get_by_id(Collection::Transactions, &created.id)
        .expect("lookup")
        .is_some());
    let outbox = store
        .list_pending_changes(Collection::Transactions)
        .expect("outbox");
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox[0].op, ChangeOp::Create);
    assert_eq!(
        store.get_watermark(Collection::Transactions).expect("watermark"),
        None
    );
}

#[tokio::test]
async fn second_pull_is_bounded_and_idempotent() {
    let (base_url, captured, server) = start_mock_server(vec![
        ok(r#"[{"id":"srv-1","updatedAt":"2026-03-01T00:00:00+00:00"}]"#),
        ok("[]"),
    ])
    .await;

    let store = Arc::new(open_store());
    let manager = transactions_manager(&store, &base_url);

    let first = manager.sync().await;
    assert!(first.success, "errors: {:?}", first.errors);
    assert_eq!(first.inserted, 1);

    let second = manager.sync().await;
    assert!(second.success, "errors: {:?}", second.errors);
    assert_eq!((second.inserted, second.updated), (0, 0));

    let requests = captured.lock().await.clone();
    assert_eq!(requests[0].path, "/transactions");
    assert!(
        requests[1].path.starts_with("/transactions?since="),
        "second pull must be watermark-bounded, got {}",
        requests[1].path
    );

    server.abort();
}

#[tokio::test]
async fn replaying_a_delete_against_a_missing_record_succeeds() {
    let (base_url, captured, server) = start_mock_server(vec![
        ok("[]"),
        MockResponse {
            status: 404,
            body: r#"{"error":"error","code":"NOT_FOUND","message":"no such record"}"#.to_string(),
        },
    ])
    .await;

    let store = Arc::new(open_store());
    store
        .put(
            Collection::Transactions,
            ledgerbook_core::sync::StoredRecord::from_payload(json!({
                "id": "t-1",
                "updatedAt": "2026-03-01T00:00:00+00:00"
            }))
            .expect("record"),
        )
        .await
        .expect("seed");

    let manager = transactions_manager(&store, &base_url);
    manager.delete_local("t-1").await.expect("optimistic delete");

    let summary = manager.sync().await;
    assert!(summary.success, "errors: {:?}", summary.errors);
    assert_eq!(summary.deleted, 1);
    assert!(store
        .list_pending_changes(Collection::Transactions)
        .expect("outbox")
        .is_empty());

    let requests = captured.lock().await.clone();
    assert_eq!(requests[1].method, "DELETE");
    assert_eq!(requests[1].path, "/transactions/t-1");

    server.abort();
}
