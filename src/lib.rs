pub mod broadcast;
pub mod cache;
pub mod config;
pub mod event_log;
pub mod models;
pub mod poller;
pub mod queue;
pub mod retention;
pub mod retry;
pub mod routes;
pub mod store;
pub mod upstream;
pub mod webhook;

use broadcast::SseBroadcaster;
use cache::{DEVICES_KEY, SessionCache};
use config::HubConfig;
use event_log::EventLogger;
use models::{Event, EventType};
use poller::{PollerConfig, PollingReconciler};
use queue::{DeadLetter, Handler, MessageQueue, QueueConfig, QueueError};
use rocket::fairing::AdHoc;
use rocket_cors::CorsOptions;
use std::sync::Arc;
use std::time::Duration;
use store::{EventStore, StoreError};
use upstream::{DeviceSource, PlatformClient};

pub fn rocket() -> rocket::Rocket<rocket::Build> {
    rocket_with_config(HubConfig::from_env())
}

pub fn rocket_with_config(config: HubConfig) -> rocket::Rocket<rocket::Build> {
    // Startup order matters: store before archive before queue, and the
    // queue's handlers bound before any listener can enqueue.
    let store = Arc::new(EventStore::open(&config.store_path).expect("Failed to open event store"));
    let logger = Arc::new(
        EventLogger::open(&config.log_dir, config.log_max_bytes, config.log_compress)
            .expect("Failed to open event archive"),
    );
    let queue = Arc::new(MessageQueue::new(QueueConfig {
        concurrency: config.queue_concurrency,
        max_depth: config.queue_max_depth,
        max_attempts: config.queue_max_attempts,
        ..QueueConfig::default()
    }));
    let broadcaster = Arc::new(SseBroadcaster::new());
    let cache = Arc::new(SessionCache::new());
    let source: Arc<dyn DeviceSource> = Arc::new(PlatformClient::new(
        &config.upstream_base_url,
        &config.upstream_token,
    ));
    let poller = Arc::new(PollingReconciler::new(
        Arc::clone(&source),
        PollerConfig {
            interval: Duration::from_millis(config.poll_interval_ms),
            capabilities: config.poll_capabilities.clone(),
            ..PollerConfig::default()
        },
    ));

    // Every event kind runs the same persist → archive → fan-out pipeline.
    for kind in EventType::ALL {
        queue
            .register_handler(
                kind,
                pipeline_handler(
                    Arc::clone(&store),
                    Arc::clone(&logger),
                    Arc::clone(&broadcaster),
                    Arc::clone(&cache),
                ),
            )
            .expect("handler registration before start");
    }

    {
        let store = Arc::clone(&store);
        let broadcaster = Arc::clone(&broadcaster);
        queue.set_dead_letter_hook(Arc::new(move |letter: &DeadLetter| {
            let alert = Event::system(
                "queue.dead_letter",
                serde_json::json!({
                    "severity": "critical",
                    "originalEventId": letter.event.id,
                    "attempts": letter.attempts,
                    "error": letter.error,
                }),
            );
            record_system_event(&store, &broadcaster, alert);
        }));
    }

    {
        let queue = Arc::clone(&queue);
        let store = Arc::clone(&store);
        let broadcaster = Arc::clone(&broadcaster);
        poller.set_listener(Arc::new(move |event: Event| {
            match queue.enqueue(event) {
                Ok(()) => true,
                Err(QueueError::Full) => {
                    let alert = Event::system(
                        "queue.saturated",
                        serde_json::json!({"severity": "critical", "channel": "polling"}),
                    );
                    record_system_event(&store, &broadcaster, alert);
                    false
                }
                Err(e) => {
                    eprintln!("⚠️ Poller enqueue failed: {e}");
                    false
                }
            }
        }));
    }

    if config.webhook_shared_secret.is_empty() {
        println!("⚠️ WEBHOOK_SHARED_SECRET not set — inbound webhooks will be rejected");
    }

    let cors = CorsOptions::default()
        .to_cors()
        .expect("Failed to create CORS");

    // Event batches from busy installs can exceed Rocket's default limits.
    let figment = rocket::Config::figment()
        .merge(("limits.string", 2 * 1024 * 1024))
        .merge(("limits.json", 2 * 1024 * 1024));

    rocket::custom(figment)
        .manage(config.clone())
        .manage(Arc::clone(&store))
        .manage(Arc::clone(&logger))
        .manage(Arc::clone(&queue))
        .manage(Arc::clone(&broadcaster))
        .manage(Arc::clone(&cache))
        .manage(Arc::clone(&poller))
        .manage(Arc::clone(&source))
        .attach(cors)
        .register("/", rocket::catchers![routes::not_found])
        .mount(
            "/",
            rocket::routes![
                routes::receive_webhook,
                routes::event_stream,
                routes::list_events,
                routes::event_stats,
                routes::list_devices,
                routes::list_rooms,
                routes::health,
                routes::stats,
                routes::poller_status,
                routes::poller_start,
                routes::poller_stop,
                routes::dead_letters,
                routes::run_retention_now,
            ],
        )
        .attach(AdHoc::on_liftoff("Queue Workers", {
            let queue = Arc::clone(&queue);
            move |_rocket| {
                Box::pin(async move {
                    queue.start();
                    println!("📬 Message queue workers started");
                })
            }
        }))
        .attach(AdHoc::on_liftoff("Retention Sweep", {
            let store = Arc::clone(&store);
            let logger = Arc::clone(&logger);
            let store_days = config.store_retention_days;
            let log_days = config.log_retention_days;
            move |_rocket| {
                Box::pin(async move {
                    retention::spawn_retention_task(store, logger, store_days, log_days);
                    println!("🧹 Retention sweep scheduled");
                })
            }
        }))
        .attach(AdHoc::on_liftoff("Polling Reconciler", {
            let poller = Arc::clone(&poller);
            let auto_start = config.auto_start_polling;
            let token_configured = !config.upstream_token.is_empty();
            move |_rocket| {
                Box::pin(async move {
                    if !auto_start {
                        println!("🔄 Polling reconciler not auto-started (AUTO_START_POLLING=false)");
                    } else if !token_configured {
                        println!("🔄 Polling reconciler idle: UPSTREAM_TOKEN not configured");
                    } else {
                        poller.start();
                    }
                })
            }
        }))
        .attach(AdHoc::on_shutdown("Graceful Drain", {
            let poller = Arc::clone(&poller);
            let queue = Arc::clone(&queue);
            let broadcaster = Arc::clone(&broadcaster);
            let logger = Arc::clone(&logger);
            let store = Arc::clone(&store);
            move |_rocket| {
                Box::pin(async move {
                    println!("🛑 Draining pipeline before exit");
                    poller.stop();
                    queue.drain(Duration::from_secs(10)).await;
                    broadcaster.close_all();
                    logger.close();
                    store.close();
                })
            }
        }))
}

/// The queue handler every event kind shares: persist (duplicate = success),
/// archive, merge live state into the device cache, fan out.
fn pipeline_handler(
    store: Arc<EventStore>,
    logger: Arc<EventLogger>,
    broadcaster: Arc<SseBroadcaster>,
    cache: Arc<SessionCache>,
) -> Handler {
    Arc::new(move |event: Event| {
        let store = Arc::clone(&store);
        let logger = Arc::clone(&logger);
        let broadcaster = Arc::clone(&broadcaster);
        let cache = Arc::clone(&cache);
        Box::pin(async move {
            match store.save(&event) {
                Ok(()) => {}
                Err(StoreError::DuplicateId) => {
                    debug_log(&format!("duplicate event id {}, already persisted", event.id));
                }
                // The inline retry also failed: reject so the queue's
                // backoff gets another shot.
                Err(e) => return Err(format!("event store save failed: {e}")),
            }
            logger.log(&event);
            if event.kind == EventType::DeviceEvent
                && let Some(device_id) = event.device_id.as_deref()
            {
                cache.merge_device_state(DEVICES_KEY, device_id, &event.event_type, &event.value);
            }
            broadcaster.broadcast(&event);
            Ok(())
        })
    })
}

/// Persist and fan out an internally generated system event. Store failures
/// are logged only; the alert still reaches live clients.
pub(crate) fn record_system_event(store: &EventStore, broadcaster: &SseBroadcaster, event: Event) {
    if let Err(e) = store.save(&event)
        && !matches!(e, StoreError::DuplicateId)
    {
        eprintln!("⚠️ Failed to persist system event: {e}");
    }
    broadcaster.broadcast(&event);
}

/// Noise-free by default; duplicate-id logs only show up with HUB_DEBUG=1.
pub(crate) fn debug_log(msg: &str) {
    if std::env::var("HUB_DEBUG").map(|v| v == "1").unwrap_or(false) {
        eprintln!("🔍 {msg}");
    }
}
