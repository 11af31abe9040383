use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc::unbounded_channel;
use weft_core::{Exclude, MemoryTransport, PeerId, Socket, SocketConfig, WeftError};

fn both_channels() -> SocketConfig {
    SocketConfig {
        unreliable: true,
        ..Default::default()
    }
}

struct Fixture {
    server: Socket,
    clients: Vec<Socket>,
    hub: Arc<MemoryTransport>,
    rx: tokio::sync::mpsc::UnboundedReceiver<String>,
}

/// Server plus named clients, each forwarding `room-news` deliveries into
/// one shared queue tagged with the receiving client's name.
async fn fixture(names: &[&'static str]) -> Fixture {
    let hub = MemoryTransport::server();
    let server = Socket::server(hub.clone(), both_channels()).await.unwrap();

    let (tx, rx) = unbounded_channel();
    let mut clients = Vec::new();
    for name in names {
        let client = Socket::client(hub.connect(*name), both_channels())
            .await
            .unwrap();
        let tx = tx.clone();
        let name = name.to_string();
        client
            .on("room-news", move |_sender, _args| {
                let tx = tx.clone();
                let name = name.clone();
                async move {
                    tx.send(name).ok();
                    Ok(Value::Null)
                }
            })
            .unwrap();
        clients.push(client);
    }

    Fixture {
        server,
        clients,
        hub,
        rx,
    }
}

#[tokio::test]
async fn double_join_delivers_exactly_once() {
    let mut fx = fixture(&["alice"]).await;

    fx.server.join_room(PeerId::from("alice"), "lobby").unwrap();
    fx.server.join_room(PeerId::from("alice"), "lobby").unwrap();

    let delivered = fx
        .server
        .broadcast_to_room("lobby", "room-news", vec![json!("hi")])
        .await
        .unwrap();
    assert_eq!(delivered, 1);

    assert_eq!(fx.rx.recv().await.unwrap(), "alice");
    assert!(fx.rx.try_recv().is_err());
}

#[tokio::test]
async fn room_broadcast_reaches_only_members() {
    let mut fx = fixture(&["alice", "bob", "carol"]).await;

    fx.server.join_room(PeerId::from("alice"), "lobby").unwrap();
    fx.server.join_room(PeerId::from("carol"), "lobby").unwrap();

    let delivered = fx
        .server
        .broadcast_to_room("lobby", "room-news", vec![])
        .await
        .unwrap();
    assert_eq!(delivered, 2);

    let mut seen = vec![fx.rx.recv().await.unwrap(), fx.rx.recv().await.unwrap()];
    seen.sort();
    assert_eq!(seen, vec!["alice", "carol"]);
    assert!(fx.rx.try_recv().is_err());
}

#[tokio::test]
async fn emptied_room_reports_no_room() {
    let fx = fixture(&["alice"]).await;

    fx.server.join_room(PeerId::from("alice"), "lobby").unwrap();
    fx.server
        .leave_room(&PeerId::from("alice"), "lobby")
        .unwrap();

    let err = fx
        .server
        .broadcast_to_room("lobby", "room-news", vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, WeftError::NoRoom(_)));
}

#[tokio::test]
async fn broadcast_to_an_unknown_room_reports_no_room_and_sends_nothing() {
    let mut fx = fixture(&["alice"]).await;

    let err = fx
        .server
        .broadcast_to_room("nowhere", "room-news", vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, WeftError::NoRoom(_)));
    assert!(fx.rx.try_recv().is_err());
}

#[tokio::test]
async fn unreliable_room_broadcast_reaches_members() {
    let mut fx = fixture(&["alice", "bob"]).await;

    fx.server.join_room(PeerId::from("bob"), "lobby").unwrap();

    let delivered = fx
        .server
        .broadcast_to_room_unreliable("lobby", "room-news", vec![])
        .await
        .unwrap();
    assert_eq!(delivered, 1);
    assert_eq!(fx.rx.recv().await.unwrap(), "bob");
}

#[tokio::test]
async fn broadcast_except_skips_one_peer() {
    let mut fx = fixture(&["alice", "bob", "carol"]).await;

    let delivered = fx
        .server
        .broadcast_except(Exclude::One(PeerId::from("bob")), "room-news", vec![])
        .await
        .unwrap();
    assert_eq!(delivered, 2);

    let mut seen = vec![fx.rx.recv().await.unwrap(), fx.rx.recv().await.unwrap()];
    seen.sort();
    assert_eq!(seen, vec!["alice", "carol"]);
    assert!(fx.rx.try_recv().is_err());
}

#[tokio::test]
async fn broadcast_except_skips_many_peers() {
    let mut fx = fixture(&["alice", "bob", "carol"]).await;

    let skip = Exclude::Many(vec![PeerId::from("alice"), PeerId::from("carol")]);
    let delivered = fx
        .server
        .broadcast_except(skip, "room-news", vec![])
        .await
        .unwrap();
    assert_eq!(delivered, 1);
    assert_eq!(fx.rx.recv().await.unwrap(), "bob");
}

#[tokio::test]
async fn disconnected_peer_no_longer_receives_except_broadcasts() {
    let mut fx = fixture(&["alice", "bob"]).await;

    fx.hub.disconnect(&PeerId::from("alice"));
    let delivered = fx
        .server
        .broadcast_except(Exclude::Many(vec![]), "room-news", vec![])
        .await
        .unwrap();
    assert_eq!(delivered, 1);
    assert_eq!(fx.rx.recv().await.unwrap(), "bob");
    drop(fx.clients);
}
