use crate::common::test_client;
use rocket::http::Status;

// Without an upstream token the pass-throughs degrade loudly instead of
// hanging; the cache path is covered by unit tests in cache.rs.

#[test]
fn device_list_without_upstream_is_a_stable_error_envelope() {
    let client = test_client();
    let res = client.get("/api/v1/devices").dispatch();
    assert_eq!(res.status(), Status::ServiceUnavailable);
    let body: serde_json::Value = res.into_json().unwrap();
    assert!(body["error"].as_str().unwrap().contains("not configured"));
}

#[test]
fn room_list_without_upstream_is_a_stable_error_envelope() {
    let client = test_client();
    let res = client.get("/api/v1/rooms").dispatch();
    assert_eq!(res.status(), Status::ServiceUnavailable);
    let body: serde_json::Value = res.into_json().unwrap();
    assert!(body["error"].as_str().unwrap().contains("not configured"));
}
