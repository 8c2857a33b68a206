// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket endpoint: one socket per client, subscriptions to process and
//! session log feeds.
//!
//! Each subscription runs a forward task from the producer's broadcast
//! channel to the socket's bounded outbound queue. A slow reader makes the
//! broadcast lag, which drops the oldest lines and yields one `dropped: N`
//! notice. Keepalive pings go out every 30 seconds; a socket silent for
//! five minutes is closed, and shutdown closes every socket with 1001.

use crate::hub::{
    ack_message, close_message, dropped_notice, error_message, list_message, log_message,
    parse_client_message, ClientMessage, SubscriptionSet, TargetKind,
};
use crate::listener::ListenCtx;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use hutch_core::LogEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Keepalive ping cadence.
const PING_INTERVAL: Duration = Duration::from_secs(30);
/// Sockets without any traffic for this long are closed.
const IDLE_LIMIT: Duration = Duration::from_secs(5 * 60);
/// Outbound queue depth per socket.
const OUTBOUND_QUEUE: usize = 256;
/// Close code sent on daemon shutdown.
const CLOSE_GOING_AWAY: u16 = 1001;

pub async fn upgrade(State(ctx): State<Arc<ListenCtx>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| client_loop(socket, ctx))
}

async fn client_loop(socket: WebSocket, ctx: Arc<ListenCtx>) {
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE);

    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut subs = SubscriptionSet::new();
    let mut ping = tokio::time::interval_at(
        tokio::time::Instant::now() + PING_INTERVAL,
        PING_INTERVAL,
    );
    let mut last_traffic = tokio::time::Instant::now();

    loop {
        tokio::select! {
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        last_traffic = tokio::time::Instant::now();
                        handle_client_message(text.as_str(), &ctx, &mut subs, &out_tx).await;
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        last_traffic = tokio::time::Instant::now();
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // binary frames are ignored
                    Some(Err(e)) => {
                        debug!(error = %e, "websocket read error");
                        break;
                    }
                }
            }
            _ = ping.tick() => {
                if out_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep_until(last_traffic + IDLE_LIMIT) => {
                debug!("closing idle websocket");
                let _ = out_tx.send(Message::Close(None)).await;
                break;
            }
            _ = ctx.shutdown.cancelled() => {
                let frame = CloseFrame { code: CLOSE_GOING_AWAY, reason: "shutting down".into() };
                let _ = out_tx.send(Message::Close(Some(frame))).await;
                break;
            }
        }
    }

    subs.cancel_all();
    drop(out_tx);
    let _ = writer.await;
}

async fn handle_client_message(
    text: &str,
    ctx: &Arc<ListenCtx>,
    subs: &mut SubscriptionSet,
    out: &mpsc::Sender<Message>,
) {
    let reply = match parse_client_message(text) {
        Err(reason) => error_message(&reason),
        Ok(ClientMessage::List) => list_message(&ctx.processes.list(), &ctx.sessions.list()),
        Ok(ClientMessage::Subscribe { kind, target_id }) => {
            match subscribe_feed(ctx, kind, &target_id) {
                // Unknown target: report it, keep the socket open.
                None => error_message(&format!("unknown {} {}", kind.as_str(), target_id)),
                Some(feed) => {
                    let token = CancellationToken::new();
                    subs.insert(kind, &target_id, token.clone());
                    tokio::spawn(forward_logs(feed, kind, target_id.clone(), out.clone(), token));
                    ack_message("subscribed", kind, &target_id)
                }
            }
        }
        Ok(ClientMessage::Unsubscribe { kind, target_id }) => {
            if subs.remove(kind, &target_id) {
                ack_message("unsubscribed", kind, &target_id)
            } else {
                error_message(&format!("not subscribed to {} {}", kind.as_str(), target_id))
            }
        }
    };
    let _ = out.send(Message::Text(reply.into())).await;
}

fn subscribe_feed(
    ctx: &ListenCtx,
    kind: TargetKind,
    target_id: &str,
) -> Option<broadcast::Receiver<LogEvent>> {
    match kind {
        TargetKind::Process => ctx.processes.get(target_id).ok().map(|r| r.subscribe()),
        TargetKind::Session => ctx.sessions.get(target_id).ok().map(|r| r.subscribe()),
    }
}

/// Forward one subscription's feed to the socket until the producer closes
/// or the subscription is cancelled. Lines arrive in production order;
/// lagging drops the oldest and reports the count once per burst.
async fn forward_logs(
    mut feed: broadcast::Receiver<LogEvent>,
    kind: TargetKind,
    target_id: String,
    out: mpsc::Sender<Message>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            event = feed.recv() => match event {
                Ok(LogEvent::Line(line)) => {
                    let message = log_message(kind, &target_id, &line);
                    if out.send(Message::Text(message.into())).await.is_err() {
                        break;
                    }
                }
                Ok(LogEvent::Closed) | Err(broadcast::error::RecvError::Closed) => {
                    let _ = out.send(Message::Text(close_message(kind, &target_id).into())).await;
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    let notice = dropped_notice(kind, &target_id, count);
                    if out.send(Message::Text(notice.into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}
