use crate::broadcast::{SessionGuard, SseBroadcaster};
use crate::config::HubConfig;
use rocket::response::stream::{Event, EventStream};
use rocket::response::{self, Responder, Response};
use rocket::{Request, State, get};
use std::sync::Arc;
use tokio::time::{Duration, interval};

/// Wraps the stream response with the headers that keep proxies from
/// buffering or recycling it.
pub struct SseHeaders<T>(pub T);

impl<'r, 'o: 'r, T: Responder<'r, 'o>> Responder<'r, 'o> for SseHeaders<T> {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        Response::build_from(self.0.respond_to(req)?)
            .raw_header("Cache-Control", "no-cache, no-transform")
            .raw_header("X-Accel-Buffering", "no")
            .ok()
    }
}

/// Long-lived event stream for dashboard clients. Emits `connected` with a
/// reconnect hint immediately, `new-event` frames as they are broadcast, and
/// a `heartbeat` on the configured interval. The session is removed when the
/// stream is dropped, which covers client disconnects.
#[get("/events/stream")]
pub fn event_stream(
    broadcaster: &State<Arc<SseBroadcaster>>,
    config: &State<HubConfig>,
) -> SseHeaders<EventStream![]> {
    let broadcaster = Arc::clone(broadcaster.inner());
    let (id, mut rx) = broadcaster.register();
    let guard = SessionGuard {
        broadcaster: Arc::clone(&broadcaster),
        id,
    };
    let heartbeat_every = Duration::from_millis(config.sse_heartbeat_ms);

    SseHeaders(EventStream! {
        // Dropped when the client goes away; removes the session.
        let _guard = guard;

        // reconnect hint first, then the hello frame
        yield Event::retry(Duration::from_secs(5));
        yield Event::json(&serde_json::json!({
            "ts": chrono::Utc::now().to_rfc3339(),
            "server": env!("CARGO_PKG_NAME"),
        }))
        .event("connected");

        let mut heartbeat = interval(heartbeat_every);
        heartbeat.tick().await; // immediate first tick is not a heartbeat

        loop {
            tokio::select! {
                frame = rx.recv() => {
                    match frame {
                        Some(data) => yield Event::data(data).event("new-event"),
                        // broadcaster closed the session (shutdown)
                        None => break,
                    }
                }
                _ = heartbeat.tick() => {
                    yield Event::json(&serde_json::json!({
                        "sessions": broadcaster.session_count(),
                        "ts": chrono::Utc::now().to_rfc3339(),
                    })).event("heartbeat");
                }
            }
        }
    })
}
