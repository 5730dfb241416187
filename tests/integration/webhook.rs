use crate::common::{TestClient, signature_for, test_client, test_client_with, wait_for};
use rocket::http::{ContentType, Header, Status};

const S1_BODY: &str = r#"{
    "lifecycle": "EVENT",
    "eventData": {"events": [{
        "eventId": "abc",
        "deviceId": "d1",
        "capability": "switch",
        "attribute": "switch",
        "value": "on",
        "eventTime": "2025-01-01T00:00:00Z"
    }]}
}"#;

fn post_signed<'c>(client: &'c TestClient, body: &str) -> rocket::local::blocking::LocalResponse<'c> {
    client
        .post("/webhook/smartthings")
        .header(ContentType::JSON)
        .header(Header::new("X-Hub-Signature-256", signature_for(body)))
        .body(body.to_string())
        .dispatch()
}

fn stored_events(client: &TestClient, query: &str) -> serde_json::Value {
    let res = client.get(format!("/api/v1/events{query}")).dispatch();
    assert_eq!(res.status(), Status::Ok);
    res.into_json().unwrap()
}

// --- Signed event delivery ---

#[test]
fn signed_event_is_acked_stored_and_archived() {
    let client = test_client();

    let res = post_signed(&client, S1_BODY);
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["ok"], true);
    assert_eq!(body["received"], 1);

    let events = stored_events(&client, "");
    assert_eq!(events["count"], 1);
    let event = &events["events"][0];
    assert_eq!(event["id"], "abc");
    assert_eq!(event["type"], "device_event");
    assert_eq!(event["source"], "webhook");
    assert_eq!(event["deviceId"], "d1");
    assert_eq!(event["eventType"], "switch.switch");
    assert_eq!(event["value"], "on");

    // the queue handler writes the archive line off the response path
    let log_path = format!(
        "{}/events-{}.log",
        client.log_dir,
        chrono::Local::now().date_naive()
    );
    assert!(wait_for(
        || std::fs::read_to_string(&log_path)
            .map(|content| content.contains("\"abc\""))
            .unwrap_or(false),
        2000,
    ));
    let line: serde_json::Value = serde_json::from_str(
        std::fs::read_to_string(&log_path)
            .unwrap()
            .lines()
            .next()
            .unwrap(),
    )
    .unwrap();
    assert_eq!(line["eventId"], "abc");
    assert_eq!(line["capability"], "switch");
    assert_eq!(line["attribute"], "switch");
}

#[test]
fn bad_signature_changes_nothing() {
    let client = test_client();

    let res = client
        .post("/webhook/smartthings")
        .header(ContentType::JSON)
        .header(Header::new("X-Hub-Signature-256", "sha256=deadbeef"))
        .body(S1_BODY)
        .dispatch();
    assert_eq!(res.status(), Status::Unauthorized);

    assert_eq!(stored_events(&client, "")["count"], 0);
    let log_path = format!(
        "{}/events-{}.log",
        client.log_dir,
        chrono::Local::now().date_naive()
    );
    assert!(!std::path::Path::new(&log_path).exists());
}

#[test]
fn missing_signature_is_unauthorized() {
    let client = test_client();
    let res = client
        .post("/webhook/smartthings")
        .header(ContentType::JSON)
        .body(S1_BODY)
        .dispatch();
    assert_eq!(res.status(), Status::Unauthorized);
    assert_eq!(stored_events(&client, "")["count"], 0);
}

#[test]
fn alternate_signature_header_is_accepted() {
    let client = test_client();
    let res = client
        .post("/webhook/smartthings")
        .header(ContentType::JSON)
        .header(Header::new("X-Signature", signature_for(S1_BODY)))
        .body(S1_BODY)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
}

// --- Lifecycles ---

#[test]
fn ping_echoes_the_challenge_synchronously() {
    let client = test_client();
    let body = r#"{"lifecycle":"PING","pingData":{"challenge":"ring-ring"}}"#;
    let res = post_signed(&client, body);
    assert_eq!(res.status(), Status::Ok);
    let json: serde_json::Value = res.into_json().unwrap();
    assert_eq!(json["pingData"]["challenge"], "ring-ring");
    assert_eq!(stored_events(&client, "")["count"], 0);
}

#[test]
fn confirmation_acks_immediately() {
    let client = test_client();
    // The URL fetch is fire-and-forget; a dead endpoint must not block the ack.
    let body = r#"{"lifecycle":"CONFIRMATION","confirmationData":{"confirmationUrl":"http://127.0.0.1:1/confirm"}}"#;
    let res = post_signed(&client, body);
    assert_eq!(res.status(), Status::Ok);
}

#[test]
fn unknown_lifecycle_is_acked_but_ignored() {
    let client = test_client();
    let res = post_signed(&client, r#"{"lifecycle":"UNINSTALL","data":{}}"#);
    assert_eq!(res.status(), Status::Ok);
    assert_eq!(stored_events(&client, "")["count"], 0);
}

#[test]
fn malformed_json_is_rejected() {
    let client = test_client();
    let body = "{not json at all";
    let res = post_signed(&client, body);
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn missing_lifecycle_is_rejected() {
    let client = test_client();
    let res = post_signed(&client, r#"{"eventData":{}}"#);
    assert_eq!(res.status(), Status::BadRequest);
}

// --- Edge cases ---

#[test]
fn event_without_id_gets_a_minted_one() {
    let client = test_client();
    let body = r#"{
        "lifecycle": "EVENT",
        "eventData": {"events": [{
            "deviceId": "d9",
            "capability": "switch",
            "attribute": "switch",
            "value": "off"
        }]}
    }"#;
    let res = post_signed(&client, body);
    assert_eq!(res.status(), Status::Ok);

    let events = stored_events(&client, "");
    assert_eq!(events["count"], 1);
    let id = events["events"][0]["id"].as_str().unwrap();
    assert!(uuid::Uuid::parse_str(id).is_ok());
}

#[test]
fn duplicate_delivery_keeps_one_row() {
    let client = test_client();
    assert_eq!(post_signed(&client, S1_BODY).status(), Status::Ok);
    assert_eq!(post_signed(&client, S1_BODY).status(), Status::Ok);
    assert_eq!(stored_events(&client, "")["count"], 1);
}

#[test]
fn saturated_queue_still_acks_and_raises_a_critical_system_event() {
    // Depth 0 makes every enqueue fail deterministically.
    let client = test_client_with(|config| config.queue_max_depth = 0);

    let res = post_signed(&client, S1_BODY);
    assert_eq!(res.status(), Status::Ok);

    // the original event was persisted on the ingest path
    let device_events = stored_events(&client, "?types=device_event");
    assert_eq!(device_events["count"], 1);
    assert_eq!(device_events["events"][0]["id"], "abc");

    // and the saturation alert is in the store
    let alerts = stored_events(&client, "?types=system_event");
    assert_eq!(alerts["count"], 1);
    let alert = &alerts["events"][0];
    assert_eq!(alert["eventType"], "queue.saturated");
    assert_eq!(alert["value"]["severity"], "critical");
    assert_eq!(alert["value"]["droppedEventId"], "abc");
}
