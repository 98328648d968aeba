use std::time::Duration;

use carelink_broker::MessageBroker;
use carelink_server::ServerBuilder;
use carelink_server::config::AppConfig;
use carelink_storage::PatientStore;
use serde_json::json;

#[tokio::test(start_paused = true)]
async fn server_ingests_registrations_and_shuts_down() {
    let server = ServerBuilder::new()
        .with_config(AppConfig::default())
        .build()
        .await
        .expect("server starts");

    let routed = server
        .broker()
        .publish(
            "patient-care-exchange",
            "patient.registration",
            json!({"patientId": "p1", "email": "a@b.com"}),
        )
        .await
        .expect("publish");
    assert_eq!(routed, 1);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let record = server
        .runtime()
        .store
        .find_by_id("p1")
        .await
        .expect("store read")
        .expect("patient ingested");
    assert_eq!(record.email, "a@b.com");

    server.run_until(async {}).await;
}

#[tokio::test]
async fn second_start_on_same_config_is_independent() {
    let a = ServerBuilder::new().build().await.expect("first server");
    let b = ServerBuilder::new().build().await.expect("second server");
    assert!(a.broker().has_queue("patient.sync.response.queue"));
    assert!(b.broker().has_queue("patient.sync.response.queue"));
    a.run_until(async {}).await;
    b.run_until(async {}).await;
}
