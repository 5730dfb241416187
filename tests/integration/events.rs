use crate::common::{TestClient, signature_for, test_client};
use rocket::http::{ContentType, Header, Status};

/// Deliver one signed device event with controlled identity and time.
fn seed_event(client: &TestClient, id: &str, device: &str, time: &str) {
    let body = format!(
        r#"{{"lifecycle":"EVENT","eventData":{{"events":[{{
            "eventId":"{id}","deviceId":"{device}",
            "capability":"switch","attribute":"switch","value":"on",
            "eventTime":"{time}"
        }}]}}}}"#
    );
    let res = client
        .post("/webhook/smartthings")
        .header(ContentType::JSON)
        .header(Header::new("X-Hub-Signature-256", signature_for(&body)))
        .body(body)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
}

fn query(client: &TestClient, q: &str) -> serde_json::Value {
    let res = client.get(format!("/api/v1/events{q}")).dispatch();
    assert_eq!(res.status(), Status::Ok);
    res.into_json().unwrap()
}

#[test]
fn events_come_back_newest_first() {
    let client = test_client();
    seed_event(&client, "e1", "d1", "2025-01-01T00:00:00Z");
    seed_event(&client, "e2", "d1", "2025-01-02T00:00:00Z");
    seed_event(&client, "e3", "d1", "2025-01-03T00:00:00Z");

    let body = query(&client, "");
    assert_eq!(body["count"], 3);
    assert_eq!(body["events"][0]["id"], "e3");
    assert_eq!(body["events"][2]["id"], "e1");
}

#[test]
fn device_filter_limits_results() {
    let client = test_client();
    seed_event(&client, "e1", "d1", "2025-01-01T00:00:00Z");
    seed_event(&client, "e2", "d2", "2025-01-02T00:00:00Z");

    let body = query(&client, "?device_id=d2");
    assert_eq!(body["count"], 1);
    assert_eq!(body["events"][0]["id"], "e2");
}

#[test]
fn time_window_filters_are_half_open() {
    let client = test_client();
    seed_event(&client, "e1", "d1", "2025-01-01T00:00:00Z");
    seed_event(&client, "e2", "d1", "2025-01-02T00:00:00Z");
    seed_event(&client, "e3", "d1", "2025-01-03T00:00:00Z");

    let since = chrono::DateTime::parse_from_rfc3339("2025-01-02T00:00:00Z")
        .unwrap()
        .timestamp_millis();
    let until = chrono::DateTime::parse_from_rfc3339("2025-01-03T00:00:00Z")
        .unwrap()
        .timestamp_millis();

    let body = query(&client, &format!("?since={since}&until={until}"));
    assert_eq!(body["count"], 1);
    assert_eq!(body["events"][0]["id"], "e2");
}

#[test]
fn limit_and_offset_paginate() {
    let client = test_client();
    for i in 1..=5 {
        seed_event(&client, &format!("e{i}"), "d1", &format!("2025-01-0{i}T00:00:00Z"));
    }

    let body = query(&client, "?limit=2&offset=1");
    assert_eq!(body["count"], 2);
    assert_eq!(body["events"][0]["id"], "e4");
    assert_eq!(body["events"][1]["id"], "e3");
}

#[test]
fn type_filter_rejects_unknown_names() {
    let client = test_client();
    let res = client.get("/api/v1/events?types=bogus").dispatch();
    assert_eq!(res.status(), Status::BadRequest);
    let body: serde_json::Value = res.into_json().unwrap();
    assert!(body["error"].as_str().unwrap().contains("bogus"));

    let res = client.get("/api/v1/events?sources=telepathy").dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn source_filter_accepts_comma_lists() {
    let client = test_client();
    seed_event(&client, "e1", "d1", "2025-01-01T00:00:00Z");

    let body = query(&client, "?sources=webhook,polling");
    assert_eq!(body["count"], 1);
    let body = query(&client, "?sources=polling");
    assert_eq!(body["count"], 0);
}

#[test]
fn stats_counts_rolling_windows() {
    let client = test_client();
    // one old, one fresh
    seed_event(&client, "old", "d1", "2020-01-01T00:00:00Z");
    let now = chrono::Utc::now().to_rfc3339();
    seed_event(&client, "fresh", "d1", &now);

    let res = client.get("/api/v1/events/stats").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["total"], 2);
    assert_eq!(body["last24h"], 1);
    assert_eq!(body["lastHour"], 1);
}
