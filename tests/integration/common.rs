use home_hub::config::HubConfig;
use rocket::local::blocking::Client;

pub const SECRET: &str = "integration-test-secret";

/// Wrapper around Client that deletes the temp store and archive on drop.
/// Uses Option<Client> so the SQLite connection is released before the files
/// go (WAL mode holds the file).
pub struct TestClient {
    client: Option<Client>,
    db_path: String,
    pub log_dir: String,
}

impl Drop for TestClient {
    fn drop(&mut self) {
        drop(self.client.take());
        let _ = std::fs::remove_file(&self.db_path);
        let _ = std::fs::remove_file(format!("{}-wal", self.db_path));
        let _ = std::fs::remove_file(format!("{}-shm", self.db_path));
        let _ = std::fs::remove_dir_all(&self.log_dir);
    }
}

impl std::ops::Deref for TestClient {
    type Target = Client;
    fn deref(&self) -> &Client {
        self.client.as_ref().unwrap()
    }
}

pub fn test_client() -> TestClient {
    test_client_with(|_| {})
}

/// Test client with a tweaked config (queue ceilings, retention horizons, …).
pub fn test_client_with(tweak: impl FnOnce(&mut HubConfig)) -> TestClient {
    // Unique temp paths per test (avoids parallel test contention)
    let tag = uuid::Uuid::new_v4()
        .to_string()
        .split('-')
        .next()
        .unwrap()
        .to_string();
    let db_path = format!("/tmp/hub_test_{tag}.db");
    let log_dir = format!("/tmp/hub_test_logs_{tag}");

    let mut config = HubConfig {
        webhook_shared_secret: SECRET.to_string(),
        store_path: db_path.clone(),
        log_dir: log_dir.clone(),
        log_compress: false,
        auto_start_polling: false,
        ..HubConfig::default()
    };
    tweak(&mut config);

    let rocket = home_hub::rocket_with_config(config);
    let client = Client::tracked(rocket).expect("valid rocket instance");
    TestClient {
        client: Some(client),
        db_path,
        log_dir,
    }
}

/// Signature header value for a webhook body.
pub fn signature_for(body: &str) -> String {
    home_hub::webhook::sign(SECRET, body.as_bytes())
}

/// Poll until the condition holds or the deadline passes. Background
/// pipeline work (queue handlers, archive writes) is asynchronous relative
/// to the HTTP response.
pub fn wait_for(mut condition: impl FnMut() -> bool, timeout_ms: u64) -> bool {
    let deadline = std::time::Instant::now() + std::time::Duration::from_millis(timeout_ms);
    loop {
        if condition() {
            return true;
        }
        if std::time::Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(std::time::Duration::from_millis(20));
    }
}
