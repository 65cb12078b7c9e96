use std::io;
use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_util::codec::{Framed, LinesCodec};
use ulid::Ulid;

use crate::auth::{AuthSource, Credentials};
use crate::engine::{Engine, EngineError};
use crate::limits::MAX_WIRE_LINE_LEN;
use crate::model::*;
use crate::notify::Notice;

/// One JSON command per line. The first line of every session must be `hello`.
#[derive(Debug, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Request {
    Hello {
        actor_id: Ulid,
        role: Role,
        password: String,
    },
    /// A teacher opens their own calendar. Hours default to Mon–Fri 09:00–17:00.
    RegisterTeacher {
        name: Option<String>,
        hours: Option<WeeklyHours>,
    },
    Teachers,
    Slots {
        teacher_id: Ulid,
        date: chrono::NaiveDate,
        duration_min: u32,
    },
    #[serde(rename = "request")]
    RequestLesson {
        id: Option<Ulid>,
        teacher_id: Ulid,
        start: Ms,
        end: Ms,
        lesson_type: LessonType,
        instrument: String,
        message: Option<String>,
    },
    Approve {
        lesson_id: Ulid,
    },
    Reject {
        lesson_id: Ulid,
        note: Option<String>,
    },
    Propose {
        lesson_id: Ulid,
        start: Ms,
        end: Ms,
        note: Option<String>,
    },
    AcceptReschedule {
        lesson_id: Ulid,
    },
    DeclineReschedule {
        lesson_id: Ulid,
        note: Option<String>,
    },
    Complete {
        lesson_id: Ulid,
    },
    NoShow {
        lesson_id: Ulid,
    },
    Cancel {
        lesson_id: Ulid,
    },
    Lesson {
        lesson_id: Ulid,
    },
    Lessons {
        from: Option<Ms>,
        to: Option<Ms>,
    },
    Pending,
    Listen,
    Unlisten,
}

fn error_code(e: &EngineError) -> &'static str {
    match e {
        EngineError::NotFound(_) => "not_found",
        EngineError::AlreadyExists(_) => "already_exists",
        EngineError::InvalidState { .. } => "invalid_state",
        EngineError::UnauthorizedTransition { .. } => "unauthorized",
        EngineError::InvalidSchedule(_) => "invalid_schedule",
        EngineError::SlotConflict(_) => "slot_conflict",
        EngineError::LimitExceeded(_) => "limit_exceeded",
        EngineError::WalError(_) => "internal",
    }
}

fn error_line(code: &str, message: &str) -> String {
    json!({"ok": false, "error": {"code": code, "message": message}}).to_string()
}

fn engine_error_line(e: &EngineError) -> String {
    error_line(error_code(e), &e.to_string())
}

/// Spans arrive as two integers; reject inverted input before it becomes a Span.
fn checked_span(start: Ms, end: Ms) -> Result<Span, EngineError> {
    if start >= end {
        return Err(EngineError::InvalidSchedule("start must come before end"));
    }
    Ok(Span::new(start, end))
}

pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    auth: Arc<dyn AuthSource>,
) -> io::Result<()> {
    let codec = LinesCodec::new_with_max_length(MAX_WIRE_LINE_LEN);
    let mut framed = Framed::new(socket, codec);

    let Some(actor) = handshake(&mut framed, auth.as_ref()).await? else {
        return Ok(());
    };
    send_line(
        &mut framed,
        json!({"ok": true, "actor_id": actor.id.to_string(), "role": actor.role}).to_string(),
    )
    .await?;

    // Populated by `listen`; None renders the notice branch forever-pending.
    let mut notices: Option<broadcast::Receiver<Notice>> = None;

    loop {
        tokio::select! {
            maybe_line = framed.next() => {
                let line = match maybe_line {
                    Some(Ok(line)) => line,
                    Some(Err(e)) => return Err(io::Error::other(e)),
                    None => return Ok(()), // client hung up
                };
                if line.trim().is_empty() {
                    continue;
                }
                let reply = handle_line(&engine, &actor, &line, &mut notices).await;
                send_line(&mut framed, reply).await?;
            }
            notice = recv_notice(&mut notices) => {
                match notice {
                    Ok(n) => {
                        send_line(&mut framed, json!({"notice": n}).to_string()).await?;
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!("listener for {} lagged, {missed} notices dropped", actor.id);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        notices = None;
                    }
                }
            }
        }
    }
}

async fn handshake(
    framed: &mut Framed<TcpStream, LinesCodec>,
    auth: &dyn AuthSource,
) -> io::Result<Option<Actor>> {
    let line = match framed.next().await {
        Some(Ok(line)) => line,
        Some(Err(e)) => return Err(io::Error::other(e)),
        None => return Ok(None),
    };
    match serde_json::from_str::<Request>(&line) {
        Ok(Request::Hello { actor_id, role, password }) => {
            let creds = Credentials { actor_id, role, password };
            match auth.authenticate(&creds).await {
                Ok(actor) => Ok(Some(actor)),
                Err(e) => {
                    metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
                    send_line(framed, error_line("auth_failed", &e.to_string())).await?;
                    Ok(None)
                }
            }
        }
        _ => {
            send_line(framed, error_line("bad_request", "expected a hello line")).await?;
            Ok(None)
        }
    }
}

async fn recv_notice(
    rx: &mut Option<broadcast::Receiver<Notice>>,
) -> Result<Notice, broadcast::error::RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn send_line(framed: &mut Framed<TcpStream, LinesCodec>, line: String) -> io::Result<()> {
    framed.send(line).await.map_err(io::Error::other)
}

async fn handle_line(
    engine: &Engine,
    actor: &Actor,
    line: &str,
    notices: &mut Option<broadcast::Receiver<Notice>>,
) -> String {
    let req = match serde_json::from_str::<Request>(line) {
        Ok(r) => r,
        Err(e) => return error_line("bad_request", &format!("unparseable command: {e}")),
    };
    let label = crate::observability::command_label(&req);
    let started = Instant::now();

    let (reply, ok) = match req {
        Request::Hello { .. } => (error_line("bad_request", "already authenticated"), false),
        Request::Listen => {
            *notices = Some(engine.notify.subscribe(actor.id));
            (json!({"ok": true}).to_string(), true)
        }
        Request::Unlisten => {
            *notices = None;
            (json!({"ok": true}).to_string(), true)
        }
        other => match dispatch(engine, actor, other).await {
            Ok(v) => (v.to_string(), true),
            Err(e) => (engine_error_line(&e), false),
        },
    };

    let status = if ok { "ok" } else { "error" };
    metrics::counter!(crate::observability::COMMANDS_TOTAL, "command" => label, "status" => status)
        .increment(1);
    metrics::histogram!(crate::observability::COMMAND_DURATION_SECONDS, "command" => label)
        .record(started.elapsed().as_secs_f64());

    reply
}

async fn dispatch(engine: &Engine, actor: &Actor, req: Request) -> Result<Value, EngineError> {
    match req {
        Request::RegisterTeacher { name, hours } => {
            if actor.role != Role::Teacher {
                return Err(EngineError::UnauthorizedTransition { id: actor.id, role: actor.role });
            }
            engine
                .register_teacher(actor.id, name, hours.unwrap_or_default())
                .await?;
            Ok(json!({"ok": true, "teacher_id": actor.id.to_string()}))
        }
        Request::Teachers => {
            Ok(json!({"ok": true, "teachers": engine.list_teachers().await}))
        }
        Request::Slots { teacher_id, date, duration_min } => {
            let slots = engine.compute_slots(teacher_id, date, duration_min).await?;
            Ok(json!({"ok": true, "slots": slots}))
        }
        Request::RequestLesson {
            id,
            teacher_id,
            start,
            end,
            lesson_type,
            instrument,
            message,
        } => {
            let id = id.unwrap_or_else(Ulid::new);
            let span = checked_span(start, end)?;
            engine
                .request_lesson(actor, id, teacher_id, span, lesson_type, instrument, message)
                .await?;
            Ok(json!({"ok": true, "lesson_id": id.to_string()}))
        }
        Request::Approve { lesson_id } => {
            engine.approve(actor, lesson_id).await?;
            Ok(json!({"ok": true}))
        }
        Request::Reject { lesson_id, note } => {
            engine.reject(actor, lesson_id, note).await?;
            Ok(json!({"ok": true}))
        }
        Request::Propose { lesson_id, start, end, note } => {
            let proposed = checked_span(start, end)?;
            engine.propose_alternative(actor, lesson_id, proposed, note).await?;
            Ok(json!({"ok": true}))
        }
        Request::AcceptReschedule { lesson_id } => {
            engine.accept_reschedule(actor, lesson_id).await?;
            Ok(json!({"ok": true}))
        }
        Request::DeclineReschedule { lesson_id, note } => {
            engine.decline_reschedule(actor, lesson_id, note).await?;
            Ok(json!({"ok": true}))
        }
        Request::Complete { lesson_id } => {
            engine.mark_completed(actor, lesson_id).await?;
            Ok(json!({"ok": true}))
        }
        Request::NoShow { lesson_id } => {
            engine.mark_no_show(actor, lesson_id).await?;
            Ok(json!({"ok": true}))
        }
        Request::Cancel { lesson_id } => {
            engine.cancel(actor, lesson_id).await?;
            Ok(json!({"ok": true}))
        }
        Request::Lesson { lesson_id } => {
            let lesson = engine.get_lesson(lesson_id).await?;
            Ok(json!({"ok": true, "lesson": lesson}))
        }
        Request::Lessons { from, to } => {
            let lessons = match actor.role {
                Role::Teacher => {
                    let range = match (from, to) {
                        (Some(f), Some(t)) => Some(checked_span(f, t)?),
                        _ => None,
                    };
                    engine.list_for_teacher(actor.id, range).await?
                }
                Role::Student => engine.list_for_student(actor.id).await,
            };
            Ok(json!({"ok": true, "lessons": lessons}))
        }
        Request::Pending => {
            let lessons = engine.pending_for_actor(actor).await;
            Ok(json!({"ok": true, "lessons": lessons}))
        }
        // handled before dispatch
        Request::Hello { .. } | Request::Listen | Request::Unlisten => {
            Ok(json!({"ok": true}))
        }
    }
}
