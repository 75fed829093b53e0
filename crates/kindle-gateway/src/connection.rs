use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use kindle_engine::Engine;
use kindle_engine::chat::MAX_PAGE;
use kindle_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::{BroadcastMessage, Dispatcher};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

type WsSender = SplitSink<WebSocket, Message>;
type WsReceiver = SplitStream<WebSocket>;

/// What this connection is allowed to see.
#[derive(Debug, Default)]
struct Subscriptions {
    chats: HashSet<Uuid>,
    /// Other participants of the subscribed chats; presence is limited to them.
    contacts: HashSet<Uuid>,
}

type SharedSubscriptions = Arc<RwLock<Subscriptions>>;

/// Work the read side hands to the write side, which owns the socket.
enum Control {
    Resume { chat_id: Uuid, after_sequence: i64 },
}

/// Handle a single WebSocket connection: Identify, then the event loop.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    engine: Arc<Engine>,
    jwt_secret: String,
) {
    let (mut sender, mut receiver) = socket.split();

    let user_id = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(id) => id,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    info!(user_id = %user_id, "Connected to gateway");

    if !send_event(&mut sender, &GatewayEvent::Ready { user_id }).await {
        return;
    }

    run_connection_loop(sender, receiver, dispatcher, engine, user_id).await;
}

async fn run_connection_loop(
    mut sender: WsSender,
    mut receiver: WsReceiver,
    dispatcher: Dispatcher,
    engine: Arc<Engine>,
    user_id: Uuid,
) {
    let (conn_id, mut user_rx) = dispatcher.register_user_channel(user_id);
    let mut broadcast_rx = dispatcher.subscribe();
    dispatcher.user_online(user_id);

    let subscriptions: SharedSubscriptions = Arc::new(RwLock::new(Subscriptions::default()));
    let send_subscriptions = subscriptions.clone();
    let (control_tx, mut control_rx) = mpsc::unbounded_channel::<Control>();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    let send_engine = engine.clone();
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;
        // Highest sequence forwarded per chat
        let mut high_water: HashMap<Uuid, i64> = HashMap::new();

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let msg = match result {
                        Ok(msg) => msg,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(user_id = %user_id, "Broadcast receiver lagged by {} messages", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    if !visible(&send_subscriptions, user_id, &msg) {
                        continue;
                    }
                    if let (Some(chat_id), Some(seq)) = (msg.chat_id, msg.sequence) {
                        let seen = high_water.entry(chat_id).or_insert(0);
                        if seq <= *seen {
                            continue;
                        }
                        *seen = seq;
                    }

                    if sender.send(Message::Text(msg.json.to_string().into())).await.is_err() {
                        break;
                    }
                }
                result = user_rx.recv() => {
                    let Some(event) = result else { break };
                    if !send_event(&mut sender, &event).await {
                        break;
                    }
                }
                Some(control) = control_rx.recv() => {
                    match control {
                        Control::Resume { chat_id, after_sequence } => {
                            let replayed = replay(
                                &mut sender,
                                &send_engine,
                                &send_subscriptions,
                                user_id,
                                chat_id,
                                after_sequence,
                            )
                            .await;
                            match replayed {
                                Ok(Some(last)) => {
                                    let seen = high_water.entry(chat_id).or_insert(0);
                                    *seen = (*seen).max(last);
                                }
                                Ok(None) => {}
                                Err(()) => break,
                            }
                        }
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!(user_id = %user_id, "Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let recv_dispatcher = dispatcher.clone();
    let recv_engine = engine.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(
                            &recv_dispatcher,
                            &recv_engine,
                            user_id,
                            cmd,
                            &subscriptions,
                            &control_tx,
                        )
                        .await;
                    }
                    Err(e) => {
                        let raw: String = text.chars().take(200).collect();
                        warn!(user_id = %user_id, "Bad command: {} -- raw: {}", e, raw);
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    if dispatcher.user_offline(user_id, conn_id) {
        engine.conversion.reset(user_id);
    }
    info!(user_id = %user_id, "Disconnected from gateway");
}

/// Whether a fanned-out event belongs on this connection.
fn visible(subscriptions: &SharedSubscriptions, user_id: Uuid, msg: &BroadcastMessage) -> bool {
    let subs = match subscriptions.read() {
        Ok(subs) => subs,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Some(chat_id) = msg.chat_id {
        return subs.chats.contains(&chat_id);
    }
    match msg.subject {
        Some(subject) => subject != user_id && subs.contacts.contains(&subject),
        None => true,
    }
}

async fn send_event(sender: &mut WsSender, event: &GatewayEvent) -> bool {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to serialize gateway event: {}", e);
            return true;
        }
    };
    sender.send(Message::Text(text.into())).await.is_ok()
}

async fn wait_for_identify(receiver: &mut WsReceiver, jwt_secret: &str) -> Option<Uuid> {
    use jsonwebtoken::{DecodingKey, Validation, decode};
    use kindle_types::api::Claims;

    let identify = async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) =
                    serde_json::from_str::<GatewayCommand>(&text)
                {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;

                    return Some(token_data.claims.sub);
                }
            }
        }
        None
    };

    tokio::time::timeout(IDENTIFY_TIMEOUT, identify).await.ok().flatten()
}

async fn handle_command(
    dispatcher: &Dispatcher,
    engine: &Arc<Engine>,
    user_id: Uuid,
    cmd: GatewayCommand,
    subscriptions: &SharedSubscriptions,
    control: &mpsc::UnboundedSender<Control>,
) {
    match cmd {
        GatewayCommand::Identify { .. } => {} // Already handled

        GatewayCommand::Subscribe { chat_ids } => {
            let requested = chat_ids.len();
            let engine = engine.clone();
            let allowed = tokio::task::spawn_blocking(move || {
                let mut subs = Subscriptions::default();
                for chat_id in chat_ids {
                    match engine.chat.chat_for(chat_id, user_id) {
                        Ok(chat) => {
                            subs.contacts.extend(chat.other_participant(user_id));
                            subs.chats.insert(chat_id);
                        }
                        Err(e) => debug!(chat_id = %chat_id, "Subscription refused: {}", e),
                    }
                }
                subs
            })
            .await;

            let allowed = match allowed {
                Ok(subs) => subs,
                Err(e) => {
                    error!("spawn_blocking join error: {}", e);
                    return;
                }
            };

            info!(
                user_id = %user_id,
                "Subscribed to {} of {} requested chats",
                allowed.chats.len(),
                requested
            );

            let online: Vec<Uuid> = allowed
                .contacts
                .iter()
                .copied()
                .filter(|contact| dispatcher.is_online(*contact))
                .collect();
            {
                let mut subs = match subscriptions.write() {
                    Ok(subs) => subs,
                    Err(poisoned) => poisoned.into_inner(),
                };
                *subs = allowed;
            }
            for contact in online {
                dispatcher.send_to_user(
                    user_id,
                    GatewayEvent::PresenceUpdate {
                        user_id: contact,
                        online: true,
                    },
                );
            }
        }

        GatewayCommand::Resume {
            chat_id,
            after_sequence,
        } => {
            let _ = control.send(Control::Resume {
                chat_id,
                after_sequence,
            });
        }
    }
}

/// Replay the committed log after `after_sequence`, then mark the chat live.
/// Returns the last replayed sequence, `Ok(None)` when the chat is not the
/// caller's, and `Err` when the socket is gone.
async fn replay(
    sender: &mut WsSender,
    engine: &Arc<Engine>,
    subscriptions: &SharedSubscriptions,
    user_id: Uuid,
    chat_id: Uuid,
    after_sequence: i64,
) -> Result<Option<i64>, ()> {
    let engine = engine.clone();
    let fetched = tokio::task::spawn_blocking(move || {
        let chat = engine.chat.chat_for(chat_id, user_id)?;
        let mut messages = Vec::new();
        let mut cursor = after_sequence.max(0);
        loop {
            let page = engine.chat.messages_after(chat_id, user_id, cursor, MAX_PAGE)?;
            let full = page.len() as u32 == MAX_PAGE;
            if let Some(last) = page.last() {
                cursor = last.server_sequence;
            }
            messages.extend(page);
            if !full {
                break;
            }
        }
        Ok::<_, kindle_engine::EngineError>((chat, messages, cursor))
    })
    .await;

    let (chat, messages, last_sequence) = match fetched {
        Ok(Ok(fetched)) => fetched,
        Ok(Err(e)) => {
            debug!(chat_id = %chat_id, user_id = %user_id, "Resume refused: {}", e);
            return Ok(None);
        }
        Err(e) => {
            error!("spawn_blocking join error: {}", e);
            return Ok(None);
        }
    };

    {
        let mut subs = match subscriptions.write() {
            Ok(subs) => subs,
            Err(poisoned) => poisoned.into_inner(),
        };
        subs.chats.insert(chat_id);
        subs.contacts.extend(chat.other_participant(user_id));
    }

    debug!(chat_id = %chat_id, user_id = %user_id, count = messages.len(), "Replaying chat log");
    for message in messages {
        if !send_event(sender, &GatewayEvent::MessageCreate { message }).await {
            return Err(());
        }
    }
    let done = GatewayEvent::ResumeComplete {
        chat_id,
        last_sequence,
    };
    if !send_event(sender, &done).await {
        return Err(());
    }
    Ok(Some(last_sequence))
}
