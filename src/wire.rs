//! Newline-delimited JSON protocol.
//!
//! Each request line is an object tagged by `op`; each reply is
//! `{"ok":true,"data":...}` or `{"ok":false,"error":{"kind":...,"message":...}}`.
//! After `listen`, lifecycle events are pushed as `{"event":{...}}` lines
//! interleaved with replies.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};

use crate::billing;
use crate::engine::{Engine, EngineError};
use crate::limits::MAX_LINE_LEN;
use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Reserve { slot: SlotId, start: Ms, end: Ms },
    ConfirmArrival { slot: SlotId },
    Extend { slot: SlotId, end: Ms },
    ChoosePayment { slot: SlotId },
    ChooseExtend { slot: SlotId, end: Ms },
    Release { slot: SlotId },
    Slot { slot: SlotId },
    Slots,
    Status,
    /// Subscribe to one slot, or to all slots when `slot` is omitted.
    Listen {
        #[serde(default)]
        slot: Option<SlotId>,
    },
    Unlisten,
}

impl Request {
    pub fn label(&self) -> &'static str {
        match self {
            Request::Reserve { .. } => "reserve",
            Request::ConfirmArrival { .. } => "confirm_arrival",
            Request::Extend { .. } => "extend",
            Request::ChoosePayment { .. } => "choose_payment",
            Request::ChooseExtend { .. } => "choose_extend",
            Request::Release { .. } => "release",
            Request::Slot { .. } => "slot",
            Request::Slots => "slots",
            Request::Status => "status",
            Request::Listen { .. } => "listen",
            Request::Unlisten => "unlisten",
        }
    }
}

pub fn ok_reply(data: Value) -> Value {
    json!({ "ok": true, "data": data })
}

pub fn error_reply(kind: &str, message: impl std::fmt::Display) -> Value {
    json!({ "ok": false, "error": { "kind": kind, "message": message.to_string() } })
}

fn engine_err(e: EngineError) -> Value {
    error_reply(e.kind(), e)
}

fn to_json<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Per-connection protocol state.
pub struct Session {
    engine: Arc<Engine>,
    rate_per_minute: u64,
    listener: Option<broadcast::Receiver<Event>>,
}

impl Session {
    pub fn new(engine: Arc<Engine>, rate_per_minute: u64) -> Self {
        Self {
            engine,
            rate_per_minute,
            listener: None,
        }
    }

    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    /// Parse and execute one request line, returning the reply.
    pub async fn handle_line(&mut self, line: &str) -> Value {
        let request: Request = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                metrics::counter!(crate::observability::REQUESTS_TOTAL, "op" => "invalid", "status" => "error")
                    .increment(1);
                return error_reply("bad_request", e);
            }
        };
        let op = request.label();
        let reply = self.execute(request).await;
        let status = if reply["ok"] == Value::Bool(true) { "ok" } else { "error" };
        metrics::counter!(crate::observability::REQUESTS_TOTAL, "op" => op, "status" => status).increment(1);
        reply
    }

    async fn execute(&mut self, request: Request) -> Value {
        let engine = &self.engine;
        let result = match request {
            Request::Reserve { slot, start, end } => {
                engine.reserve(slot, start, end).await.map(|b| to_json(&b))
            }
            Request::ConfirmArrival { slot } => engine.confirm_arrival(slot).await.map(|b| to_json(&b)),
            Request::Extend { slot, end } => engine.extend(slot, end).await.map(|b| to_json(&b)),
            Request::ChooseExtend { slot, end } => {
                engine.choose_extend_instead(slot, end).await.map(|b| to_json(&b))
            }
            Request::ChoosePayment { slot } => engine.choose_payment(slot).await.map(|b| {
                json!({
                    "booking": b,
                    "quote": billing::quote(b.start, b.end, self.rate_per_minute),
                })
            }),
            Request::Release { slot } => engine.release(slot).await.map(|()| Value::Null),
            Request::Slot { slot } => engine.snapshot(slot).await.map(|s| to_json(&s)),
            Request::Slots => Ok(to_json(&engine.snapshots().await)),
            Request::Status => {
                let summary = engine.summary().await;
                Ok(json!({
                    "free": summary.free,
                    "reserved": summary.reserved,
                    "occupied": summary.occupied,
                    "total": summary.total(),
                    "text": summary.to_string(),
                }))
            }
            Request::Listen { slot } => self.listen(slot),
            Request::Unlisten => {
                self.listener = None;
                Ok(Value::Null)
            }
        };
        match result {
            Ok(data) => ok_reply(data),
            Err(e) => engine_err(e),
        }
    }

    fn listen(&mut self, slot: Option<SlotId>) -> Result<Value, EngineError> {
        let rx = match slot {
            Some(id) => {
                if self.engine.get_slot(id).is_none() {
                    return Err(EngineError::UnknownSlot(id));
                }
                self.engine.notify.subscribe(id)
            }
            None => self.engine.notify.subscribe_all(),
        };
        self.listener = Some(rx);
        Ok(json!({ "slot": slot }))
    }

    /// Render an event line. `PaymentDue` carries a quote for display.
    pub fn event_line(&self, event: &Event) -> Value {
        let mut line = json!({ "event": event });
        if let Event::PaymentDue { start, end, .. } = event {
            line["quote"] = to_json(&billing::quote(*start, *end, self.rate_per_minute));
        }
        line
    }

    /// Next event for a listening session; pends forever otherwise.
    async fn next_event(&mut self) -> Option<Event> {
        let Some(rx) = self.listener.as_mut() else {
            return std::future::pending().await;
        };
        match rx.recv().await {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("listener lagged, {n} events dropped");
                None
            }
            Err(broadcast::error::RecvError::Closed) => {
                self.listener = None;
                None
            }
        }
    }
}

pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    rate_per_minute: u64,
) -> Result<(), LinesCodecError> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    let mut session = Session::new(engine, rate_per_minute);

    loop {
        tokio::select! {
            line = framed.next() => {
                let Some(line) = line else { break };
                let line = match line {
                    Ok(line) => line,
                    Err(LinesCodecError::MaxLineLengthExceeded) => {
                        framed.send(error_reply("bad_request", "line too long").to_string()).await?;
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                if line.trim().is_empty() {
                    continue;
                }
                let reply = session.handle_line(&line).await;
                framed.send(reply.to_string()).await?;
            }
            event = session.next_event() => {
                if let Some(event) = event {
                    framed.send(session.event_line(&event).to_string()).await?;
                }
            }
        }
    }
    Ok(())
}
