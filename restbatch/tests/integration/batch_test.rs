use restbatch::batch::{BatchExecutor, BatchRequest, Method, SubRequest};
use restbatch::concurrency::admission::AdmissionController;
use restbatch::concurrency::cancel::create_cancel_channel;
use restbatch::error::ErrorKind;
use restbatch::hooks::{BulkMutationHook, KeyedLookupHook, MemoryStore};
use restbatch_config::shared::ServiceConfig;
use restbatch_telemetry::tracing::init_test_tracing;
use serde_json::{Value, json};

use crate::support::UserHandler;

fn users_store() -> MemoryStore<String, Value> {
    MemoryStore::with_rows([
        ("1".to_string(), json!({"name": "alice"})),
        ("2".to_string(), json!({"name": "bob"})),
    ])
}

fn executor(
    store: &MemoryStore<String, Value>,
    config: &ServiceConfig,
) -> BatchExecutor<UserHandler> {
    BatchExecutor::from_config(UserHandler, config)
        .with_hook(KeyedLookupHook::new(store.clone()))
        .with_hook(BulkMutationHook::new(store.clone()))
}

fn statuses(response: &restbatch::batch::BatchResponse) -> Vec<u16> {
    response.responses.iter().map(|item| item.status).collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn read_only_batch_reports_each_item_independently() {
    init_test_tracing();

    let store = users_store();
    let executor = executor(&store, &ServiceConfig::default());

    let request = BatchRequest::new(vec![
        SubRequest::new(Method::Get, "/users/1"),
        SubRequest::new(Method::Get, "/users/9"),
        SubRequest::new(Method::Get, "/users/2"),
    ]);

    let response = executor.execute(request, None).await.unwrap();

    assert_eq!(statuses(&response), vec![200, 404, 200]);
    assert_eq!(response.responses[0].body, json!({"name": "alice"}));
    assert_eq!(response.responses[1].body["kind"], json!("NotFound"));
    assert_eq!(store.load_calls().await, 1);
    assert_eq!(executor.admission().in_flight(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_write_cancels_the_rest_of_a_mutating_batch() {
    init_test_tracing();

    let store = users_store();
    let executor = executor(&store, &ServiceConfig::default());

    let request = BatchRequest::new(vec![
        SubRequest::new(Method::Post, "/users/5").with_body(json!({"name": "eve"})),
        SubRequest::new(Method::Post, "/users/1").with_body(json!({"name": "mallory"})),
        SubRequest::new(Method::Get, "/users/2"),
    ]);

    let response = executor.execute(request, None).await.unwrap();

    assert_eq!(statuses(&response), vec![202, 409, 202]);
    assert_eq!(response.responses[1].body["kind"], json!("Conflict"));
    assert_eq!(store.write_calls().await, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn successful_mutating_batch_returns_written_bodies() {
    init_test_tracing();

    let store = users_store();
    let executor = executor(&store, &ServiceConfig::default());

    let request = BatchRequest::new(vec![
        SubRequest::new(Method::Post, "/users/3").with_body(json!({"name": "carol"})),
        SubRequest::new(Method::Get, "/users/1"),
    ]);

    let response = executor.execute(request, None).await.unwrap();

    assert_eq!(statuses(&response), vec![200, 200]);
    assert_eq!(response.responses[0].body, json!({"name": "carol"}));
    assert_eq!(store.get(&"3".to_string()).await, Some(json!({"name": "carol"})));
}

#[tokio::test(flavor = "multi_thread")]
async fn unsupported_method_fails_only_its_item_in_read_only_batch() {
    init_test_tracing();

    let store = users_store();
    let executor = executor(&store, &ServiceConfig::default());

    let request = BatchRequest::new(vec![
        SubRequest::new(Method::Options, "/users/1"),
        SubRequest::new(Method::Get, "/users/1"),
    ]);

    let response = executor.execute(request, None).await.unwrap();

    assert_eq!(statuses(&response), vec![405, 200]);
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelled_batch_reports_client_cancellation() {
    init_test_tracing();

    let store = users_store();
    let executor = executor(&store, &ServiceConfig::default());
    let (cancel_tx, cancel_rx) = create_cancel_channel();
    cancel_tx.cancel();

    let request = BatchRequest::new(vec![
        SubRequest::new(Method::Get, "/users/1"),
        SubRequest::new(Method::Get, "/users/2"),
    ]);

    let response = executor.execute(request, Some(cancel_rx)).await.unwrap();

    assert_eq!(statuses(&response), vec![499, 499]);
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_batches_are_rejected_before_running() {
    init_test_tracing();

    let store = users_store();
    let mut config = ServiceConfig::default();
    config.batch.max_requests = 2;
    let executor = executor(&store, &config);

    let err = executor
        .execute(BatchRequest::new(Vec::new()), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationError);

    let request = BatchRequest::new(vec![SubRequest::new(Method::Get, "/users/1"); 3]);
    let err = executor.execute(request, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationError);
    assert_eq!(err.detail(), Some("3 requests, at most 2 allowed"));

    assert_eq!(store.load_calls().await, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn admission_refusal_fails_with_overloaded() {
    init_test_tracing();

    let store = users_store();
    let admission = AdmissionController::with_max_pipelines(1);
    let executor = BatchExecutor::new(UserHandler, admission.clone(), &ServiceConfig::default())
        .with_hook(KeyedLookupHook::new(store.clone()));

    let request = BatchRequest::new(vec![SubRequest::new(Method::Get, "/users/1")]);

    // Another pipeline holds the only slot.
    let slots = admission.reserve(1);
    let err = executor.execute(request.clone(), None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Overloaded);
    assert_eq!(err.status(), 503);
    drop(slots);

    // Extra drops refuse batches even with free capacity.
    admission.add_extra_drops(1);
    let err = executor.execute(request.clone(), None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Overloaded);

    let response = executor.execute(request, None).await.unwrap();
    assert_eq!(statuses(&response), vec![200]);
    assert_eq!(admission.in_flight(), 0);
}
