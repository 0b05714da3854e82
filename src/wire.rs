//! JSON-lines protocol: one request object per line, one reply per request, plus pushed
//! `event` lines for watched rooms.
//!
//! ```text
//! → {"op":"create_booking","actor":{"id":"01H…","role":"customer"},"room_id":"01H…",
//!    "check_in":"2024-06-01","check_out":"2024-06-03","total_price":200}
//! ← {"ok":true,"data":{"id":"01H…","status":"pending",…}}
//! ← {"ok":false,"error":{"kind":"room_unavailable","message":"…"}}
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::limits::*;
use crate::model::*;
use crate::observability::{op_label, REQUESTS_TOTAL, REQUEST_DURATION_SECONDS};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    CreateBooking {
        actor: Actor,
        room_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
        total_price: Amount,
    },
    TransitionStatus {
        actor: Actor,
        booking_id: Ulid,
        status: BookingStatus,
    },
    SetStatus {
        actor: Actor,
        booking_id: Ulid,
        status: String,
    },
    CancelBooking {
        actor: Actor,
        booking_id: Ulid,
    },
    GetBooking {
        actor: Actor,
        booking_id: Ulid,
    },
    RoomBookings {
        room_id: Ulid,
    },
    /// The actor's own bookings.
    CustomerBookings {
        actor: Actor,
    },
    /// Bookings on every room the actor owns.
    OwnerBookings {
        actor: Actor,
    },
    BlockedNights {
        room_id: Ulid,
        from: NaiveDate,
        until: NaiveDate,
    },
    CheckAvailability {
        room_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
    },
    Quote {
        room_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
    },
    Watch {
        room_id: Ulid,
    },
    Unwatch {
        room_id: Ulid,
    },
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: &'static str,
    message: String,
}

#[derive(Debug, Serialize)]
struct Reply {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody>,
}

impl Reply {
    fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    fn error(kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(ErrorBody {
                kind,
                message: message.into(),
            }),
        }
    }
}

impl From<EngineError> for Reply {
    fn from(e: EngineError) -> Self {
        Reply::error(e.kind(), e.to_string())
    }
}

#[derive(Debug, Serialize)]
struct Pushed<'a> {
    event: &'a Event,
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error(transparent)]
    Codec(#[from] LinesCodecError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Per-connection state: live watch forwarders, all feeding one event channel.
struct Session {
    engine: Arc<Engine>,
    watches: HashMap<Ulid, JoinHandle<()>>,
    events_tx: mpsc::Sender<Event>,
}

impl Session {
    fn watch(&mut self, room_id: Ulid) -> Result<Value, EngineError> {
        if self.watches.contains_key(&room_id) {
            return Ok(Value::Bool(false));
        }
        if self.watches.len() >= MAX_WATCHES_PER_CONNECTION {
            return Err(EngineError::LimitExceeded("too many watched rooms"));
        }
        let rx = self.engine.subscribe(room_id);
        let handle = tokio::spawn(forward_events(room_id, rx, self.events_tx.clone()));
        self.watches.insert(room_id, handle);
        Ok(Value::Bool(true))
    }

    fn unwatch(&mut self, room_id: Ulid) -> Value {
        match self.watches.remove(&room_id) {
            Some(handle) => {
                handle.abort();
                Value::Bool(true)
            }
            None => Value::Bool(false),
        }
    }

    async fn dispatch(&mut self, req: Request) -> Result<Value, EngineError> {
        let engine = &self.engine;
        match req {
            Request::CreateBooking {
                actor,
                room_id,
                check_in,
                check_out,
                total_price,
            } => to_data(
                engine
                    .create_booking(&actor, room_id, check_in, check_out, total_price)
                    .await?,
            ),
            Request::TransitionStatus {
                actor,
                booking_id,
                status,
            } => to_data(engine.transition_status(booking_id, &actor, status).await?),
            Request::SetStatus {
                actor,
                booking_id,
                status,
            } => to_data(engine.set_status(booking_id, &actor, &status).await?),
            Request::CancelBooking { actor, booking_id } => {
                to_data(engine.cancel_booking(booking_id, &actor).await?)
            }
            Request::GetBooking { actor, booking_id } => {
                to_data(engine.get_booking(booking_id, &actor).await?)
            }
            Request::RoomBookings { room_id } => {
                to_data(engine.list_bookings_for_room(room_id).await)
            }
            Request::CustomerBookings { actor } => {
                if actor.role != Role::Customer {
                    return Err(EngineError::Unauthorized("customer listing needs a customer"));
                }
                to_data(engine.list_bookings_for_customer(actor.id).await)
            }
            Request::OwnerBookings { actor } => {
                if actor.role != Role::HouseOwner {
                    return Err(EngineError::Unauthorized("owner listing needs a house owner"));
                }
                to_data(engine.list_bookings_for_owner_rooms(actor.id).await?)
            }
            Request::BlockedNights {
                room_id,
                from,
                until,
            } => to_data(engine.blocked_nights(room_id, from, until).await?),
            Request::CheckAvailability {
                room_id,
                check_in,
                check_out,
            } => to_data(engine.is_available(room_id, check_in, check_out).await?),
            Request::Quote {
                room_id,
                check_in,
                check_out,
            } => to_data(engine.quote(room_id, check_in, check_out).await?),
            Request::Watch { room_id } => self.watch(room_id),
            Request::Unwatch { room_id } => Ok(self.unwatch(room_id)),
        }
    }

    async fn handle_line(&mut self, line: &str) -> Reply {
        let req: Request = match serde_json::from_str(line) {
            Ok(req) => req,
            Err(e) => return Reply::error("bad_request", e.to_string()),
        };
        let op = op_label(&req);
        let start = Instant::now();
        let result = self.dispatch(req).await;
        let status = match &result {
            Ok(_) => "ok",
            Err(e) if e.is_infrastructure() => {
                warn!(op, "request failed: {e}");
                "error"
            }
            Err(_) => "rejected",
        };
        metrics::counter!(REQUESTS_TOTAL, "op" => op, "status" => status).increment(1);
        metrics::histogram!(REQUEST_DURATION_SECONDS, "op" => op)
            .record(start.elapsed().as_secs_f64());
        match result {
            Ok(data) => Reply::ok(data),
            Err(e) => e.into(),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for handle in self.watches.values() {
            handle.abort();
        }
    }
}

fn to_data(value: impl Serialize) -> Result<Value, EngineError> {
    serde_json::to_value(value).map_err(|e| EngineError::Internal(e.to_string()))
}

async fn forward_events(room_id: Ulid, mut rx: broadcast::Receiver<Event>, tx: mpsc::Sender<Event>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(room = %room_id, "watcher lagged, {n} events skipped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Serve one client until it disconnects.
pub async fn process_connection(socket: TcpStream, engine: Arc<Engine>) -> Result<(), WireError> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_BYTES));
    let (events_tx, mut events_rx) = mpsc::channel(256);
    let mut session = Session {
        engine,
        watches: HashMap::new(),
        events_tx,
    };

    loop {
        tokio::select! {
            line = framed.next() => {
                let line = match line {
                    Some(Ok(line)) => line,
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        // The codec is done after an error; reply and hang up.
                        let reply = Reply::error("bad_request", "request line too long");
                        framed.send(serde_json::to_string(&reply)?).await?;
                        break;
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => break,
                };
                if line.trim().is_empty() {
                    continue;
                }
                let reply = session.handle_line(&line).await;
                framed.send(serde_json::to_string(&reply)?).await?;
            }
            Some(event) = events_rx.recv() => {
                framed.send(serde_json::to_string(&Pushed { event: &event })?).await?;
            }
        }
    }
    debug!("client closed connection");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_requests() {
        let room = Ulid::new();
        let actor = Ulid::new();
        let line = format!(
            r#"{{"op":"create_booking","actor":{{"id":"{actor}","role":"customer"}},"room_id":"{room}","check_in":"2024-06-01","check_out":"2024-06-03","total_price":200}}"#
        );
        let req: Request = serde_json::from_str(&line).unwrap();
        match req {
            Request::CreateBooking {
                actor: a,
                room_id,
                check_in,
                total_price,
                ..
            } => {
                assert_eq!(a, Actor::customer(actor));
                assert_eq!(room_id, room);
                assert_eq!(check_in, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
                assert_eq!(total_price, 200);
            }
            other => panic!("unexpected {other:?}"),
        }

        let line = format!(
            r#"{{"op":"transition_status","actor":{{"id":"{actor}","role":"house_owner"}},"booking_id":"{room}","status":"confirmed"}}"#
        );
        let req: Request = serde_json::from_str(&line).unwrap();
        assert_eq!(op_label(&req), "transition_status");
    }

    #[test]
    fn rejects_unknown_ops_and_statuses() {
        assert!(serde_json::from_str::<Request>(r#"{"op":"drop_table"}"#).is_err());
        let line = format!(
            r#"{{"op":"transition_status","actor":{{"id":"{0}","role":"house_owner"}},"booking_id":"{0}","status":"archived"}}"#,
            Ulid::new()
        );
        assert!(serde_json::from_str::<Request>(&line).is_err());
    }

    #[test]
    fn reply_shapes() {
        let ok = serde_json::to_string(&Reply::ok(Value::Bool(true))).unwrap();
        assert_eq!(ok, r#"{"ok":true,"data":true}"#);

        let err: Reply = EngineError::InvalidDateRange.into();
        let v: Value = serde_json::to_value(&err).unwrap();
        assert_eq!(v["ok"], Value::Bool(false));
        assert_eq!(v["error"]["kind"], "invalid_date_range");
        assert!(v.get("data").is_none());
    }
}
