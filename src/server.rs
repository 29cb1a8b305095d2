//! The message-passing surface for the external orchestrator: tool dispatch
//! over HTTP, a goal queue, and an SSE event stream that doubles as the
//! "page changed" push channel.

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;

use crate::bridge::{Bridge, Envelope};
use crate::types::PageState;

/// Events streamed to subscribers via SSE.
#[derive(Clone, Debug)]
pub enum BridgeEvent {
    Planning,
    Step { number: usize, tool: String, detail: String },
    StepError { tool: String, message: String },
    PageChanged { page: PageState },
    TaskComplete { summary: String },
    TaskError { message: String },
    Ready,
}

impl BridgeEvent {
    fn to_sse_event(&self) -> Event {
        match self {
            BridgeEvent::Planning => Event::default().event("planning").data("{}"),
            BridgeEvent::Step { number, tool, detail } => Event::default().event("step").data(
                json!({"number": number, "tool": tool, "detail": detail}).to_string(),
            ),
            BridgeEvent::StepError { tool, message } => Event::default()
                .event("step_error")
                .data(json!({"tool": tool, "message": message}).to_string()),
            BridgeEvent::PageChanged { page } => Event::default()
                .event("page_changed")
                .data(serde_json::to_string(page).unwrap_or_else(|_| "{}".into())),
            BridgeEvent::TaskComplete { summary } => Event::default()
                .event("task_complete")
                .data(json!({"summary": summary}).to_string()),
            BridgeEvent::TaskError { message } => Event::default()
                .event("task_error")
                .data(json!({"message": message}).to_string()),
            BridgeEvent::Ready => Event::default().event("ready").data("{}"),
        }
    }
}

#[derive(Clone)]
struct ChannelState {
    bridge: Arc<Bridge>,
    goal_tx: mpsc::Sender<String>,
    event_tx: broadcast::Sender<BridgeEvent>,
}

#[derive(Deserialize)]
struct GoalPayload {
    goal: String,
}

/// Bind the channel server and return the goal queue plus the event
/// broadcaster. Scans a few ports upward when the preferred one is taken.
pub async fn start(
    port: u16,
    bridge: Arc<Bridge>,
) -> Result<(mpsc::Receiver<String>, broadcast::Sender<BridgeEvent>)> {
    let (goal_tx, goal_rx) = mpsc::channel::<String>(1);
    let (event_tx, _) = broadcast::channel::<BridgeEvent>(64);

    let state = ChannelState {
        bridge,
        goal_tx,
        event_tx: event_tx.clone(),
    };

    let app = Router::new()
        .route("/dispatch", post(dispatch_handler))
        .route("/goal", post(goal_handler))
        .route("/events", get(sse_handler))
        .with_state(state);

    let mut listener = None;
    for p in port..port.saturating_add(10) {
        match tokio::net::TcpListener::bind(format!("127.0.0.1:{p}")).await {
            Ok(l) => {
                listener = Some(l);
                break;
            }
            Err(_) => continue,
        }
    }
    let listener = listener
        .with_context(|| format!("no free port in {}..{}", port, port.saturating_add(10)))?;
    info!(addr = %listener.local_addr()?, "channel server listening");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "channel server stopped");
        }
    });

    Ok((goal_rx, event_tx))
}

async fn dispatch_handler(
    State(state): State<ChannelState>,
    Json(request): Json<Value>,
) -> Json<Envelope> {
    Json(state.bridge.dispatch(request).await)
}

async fn goal_handler(
    State(state): State<ChannelState>,
    Json(payload): Json<GoalPayload>,
) -> &'static str {
    info!(goal = %payload.goal, "goal queued");
    let _ = state.goal_tx.send(payload.goal).await;
    "ok"
}

async fn sse_handler(
    State(state): State<ChannelState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();
    let stream =
        BroadcastStream::new(rx).filter_map(|result: Result<BridgeEvent, _>| match result {
            Ok(event) => Some(Ok::<_, Infallible>(event.to_sse_event())),
            Err(_) => None,
        });
    Sse::new(stream)
}
