use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{Sink, SinkExt, StreamExt};

use antixray_shared::protocol::{ClientMsg, ServerMsg, VisibilityMsg, WelcomeMsg, PROTOCOL_VERSION};
use antixray_shared::types::{ObservationRay, ParticipantId, WorldId, WORLD_LIMIT};
use antixray_shared::vec3::Vec3;

use crate::error::EngineError;
use crate::host::{BridgeHost, ParticipantSnapshot};
use crate::lifecycle::Engine;
use crate::state::HostEvent;

/// Shared app state passed to each WebSocket handler
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub host: Arc<BridgeHost>,
}

/// HTTP handler for WebSocket upgrade
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, app_state))
}

async fn handle_socket(socket: WebSocket, app_state: AppState) {
    let (mut sink, mut stream) = socket.split();

    let config = app_state.engine.config();
    let welcome = ServerMsg::Welcome(WelcomeMsg {
        protocol_version: PROTOCOL_VERSION,
        server_version: env!("CARGO_PKG_VERSION").to_string(),
        ms_per_ray_trace_tick: config.tick_duration().as_millis() as u64,
        ray_trace_threads: config.worker_count(),
    });
    if send(&mut sink, &welcome).await.is_err() {
        return;
    }
    tracing::info!("Host bridge connected");

    let bridge = app_state.host.open_bridge();
    // Participants connected through this socket, disconnected when it closes unless
    // another socket has connected them since.
    let mut owned: HashSet<ParticipantId> = HashSet::new();

    while let Some(msg) = stream.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            _ => continue, // Ignore ping/pong/binary
        };

        let reply = match serde_json::from_str::<ClientMsg>(&text) {
            Ok(client_msg) => {
                let connecting = match &client_msg {
                    ClientMsg::Connect { id, .. } => Some(*id),
                    _ => None,
                };
                let reply = handle_client_msg(&app_state, client_msg).await;
                if let (Some(id), ServerMsg::Ack { .. }) = (connecting, &reply) {
                    app_state.host.claim(id, bridge);
                    owned.insert(id);
                }
                reply
            }
            Err(e) => ServerMsg::Error {
                message: format!("bad message: {}", e),
            },
        };

        if send(&mut sink, &reply).await.is_err() {
            break;
        }
    }

    for id in owned {
        if app_state.host.owned_by(id, bridge) {
            disconnect(&app_state, id);
        }
    }
    tracing::info!("Host bridge disconnected");
}

async fn send<S>(sink: &mut S, msg: &ServerMsg) -> Result<(), ()>
where
    S: Sink<Message> + Unpin,
{
    let json = serde_json::to_string(msg).map_err(|_| ())?;
    sink.send(Message::Text(json.into())).await.map_err(|_| ())
}

/// Translate one bridge message into host bookkeeping and engine calls.
pub async fn handle_client_msg(app_state: &AppState, msg: ClientMsg) -> ServerMsg {
    let op = msg.op();
    let result = match msg {
        ClientMsg::Connect {
            id,
            world,
            position,
            direction,
            exempt,
        } => view_of(app_state, world, position, direction).and_then(|view| {
            let snapshot = ParticipantSnapshot { id, view, exempt };
            app_state.host.record_participant(snapshot);
            engine_call(app_state.engine.handle_event(HostEvent::Connected(snapshot)))
        }),
        ClientMsg::Move {
            id,
            position,
            direction,
        } => known(app_state, id)
            .and_then(|p| view_of(app_state, p.view.world, position, direction))
            .and_then(|view| {
                app_state.host.record_view(id, view);
                engine_call(app_state.engine.handle_event(HostEvent::Moved { id, view }))
            }),
        ClientMsg::Teleport {
            id,
            world,
            position,
            direction,
        } => known(app_state, id)
            .and_then(|_| view_of(app_state, world, position, direction))
            .and_then(|view| {
                app_state.host.record_view(id, view);
                engine_call(
                    app_state
                        .engine
                        .handle_event(HostEvent::Teleported { id, view }),
                )
            }),
        ClientMsg::Disconnect { id } => known(app_state, id).map(|_| disconnect(app_state, id)),
        ClientMsg::SetExempt { id, exempt } => match app_state.host.record_exempt(id, exempt) {
            Some(snapshot) => engine_call(
                app_state
                    .engine
                    .handle_event(HostEvent::ExemptionChanged(snapshot)),
            ),
            None => Err(format!("unknown participant {}", id)),
        },
        ClientMsg::Query { id } => return query(app_state, id),
        ClientMsg::Reload => {
            let engine = Arc::clone(&app_state.engine);
            // Teardown blocks for up to the shutdown grace period.
            match tokio::task::spawn_blocking(move || engine.reload(None)).await {
                Ok(result) => engine_call(result),
                Err(e) => Err(format!("reload task failed: {}", e)),
            }
        }
        ClientMsg::SetTimings { enabled } => {
            app_state.engine.set_timings_enabled(enabled);
            Ok(())
        }
        ClientMsg::ReloadChunks { ids } => {
            engine_call(app_state.engine.reload_chunks(&ids).map(|_| ()))
        }
    };

    match result {
        Ok(()) => ServerMsg::Ack { op: op.to_string() },
        Err(message) => ServerMsg::Error { message },
    }
}

fn query(app_state: &AppState, id: ParticipantId) -> ServerMsg {
    match app_state.engine.state(id) {
        Some(state) => ServerMsg::Visibility(match state.result() {
            Some(result) => result.to_msg(id),
            None => VisibilityMsg {
                id,
                tick: 0,
                rays: Vec::new(),
            },
        }),
        None => ServerMsg::Error {
            message: format!("no visibility state for {}", id),
        },
    }
}

fn disconnect(app_state: &AppState, id: ParticipantId) {
    app_state.host.forget_participant(id);
    if let Err(e) = app_state.engine.handle_event(HostEvent::Disconnected(id)) {
        tracing::warn!("Disconnect of {} failed: {}", id, e);
    }
}

fn known(app_state: &AppState, id: ParticipantId) -> Result<ParticipantSnapshot, String> {
    app_state
        .host
        .participant(id)
        .ok_or_else(|| format!("unknown participant {}", id))
}

fn view_of(
    app_state: &AppState,
    world: WorldId,
    position: [f64; 3],
    direction: [f64; 3],
) -> Result<ObservationRay, String> {
    if app_state.host.world(world).is_none() {
        return Err(format!("unknown world {}", world));
    }
    let view = ObservationRay::new(world, Vec3::from_array(position), Vec3::from_array(direction));
    if !view.is_in_world() {
        return Err(format!(
            "position must be finite and within {} of the origin, direction finite",
            WORLD_LIMIT
        ));
    }
    Ok(view)
}

fn engine_call(result: Result<(), EngineError>) -> Result<(), String> {
    result.map_err(|e| e.to_string())
}
