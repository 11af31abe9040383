use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc::unbounded_channel;
use weft_core::{
    Channel, Frame, MemoryTransport, Socket, SocketConfig, Transport, WeftError,
};

async fn server_client() -> (Socket, Socket, Arc<MemoryTransport>) {
    let hub = MemoryTransport::server();
    let server = Socket::server(hub.clone(), SocketConfig::default())
        .await
        .unwrap();
    let client = Socket::client(hub.connect("client-1"), SocketConfig::default())
        .await
        .unwrap();
    (server, client, hub)
}

#[tokio::test]
async fn call_round_trip_returns_the_handler_value() {
    let (server, client, _hub) = server_client().await;

    server
        .on("sum", |_sender, args| async move {
            let total: i64 = args.iter().filter_map(|v| v.as_i64()).sum();
            Ok(json!(total))
        })
        .unwrap();

    let result = client
        .call("sum", None, vec![json!(1), json!(2), json!(3)])
        .await
        .unwrap();
    assert_eq!(result, json!(6));
}

#[tokio::test]
async fn concurrent_calls_resolve_independently() {
    let (server, client, _hub) = server_client().await;

    server
        .on("echo", |_sender, args| async move {
            Ok(args.into_iter().next().unwrap_or(Value::Null))
        })
        .unwrap();

    let slow = client.call("echo", None, vec![json!("slow")]);
    let fast = client.call("echo", None, vec![json!("fast")]);
    let (slow, fast) = tokio::join!(slow, fast);
    assert_eq!(slow.unwrap(), json!("slow"));
    assert_eq!(fast.unwrap(), json!("fast"));
}

#[tokio::test(start_paused = true)]
async fn call_without_a_remote_handler_times_out_at_the_bound() {
    let (_server, client, _hub) = server_client().await;

    let bound = Duration::from_secs(1);
    let started = tokio::time::Instant::now();
    let err = client
        .call("nobody-home", Some(bound), vec![])
        .await
        .unwrap_err();

    assert!(matches!(err, WeftError::CallTimeout { .. }));
    assert!(started.elapsed() >= bound);
}

#[tokio::test(start_paused = true)]
async fn failing_call_handler_leads_to_a_caller_timeout() {
    let (server, client, _hub) = server_client().await;

    server
        .on("boom", |_sender, _args| async move {
            Err(WeftError::Callback {
                event: "boom".into(),
                message: "handler exploded".into(),
            })
        })
        .unwrap();

    let err = client
        .call("boom", Some(Duration::from_millis(200)), vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, WeftError::CallTimeout { .. }));
}

#[tokio::test]
async fn only_the_first_listener_answers_a_call() {
    let (server, client, _hub) = server_client().await;

    server
        .on("pick", |_sender, _args| async move { Ok(json!("first")) })
        .unwrap();
    server
        .on("pick", |_sender, _args| async move { Ok(json!("second")) })
        .unwrap();

    let result = client.call("pick", None, vec![]).await.unwrap();
    assert_eq!(result, json!("first"));
}

#[tokio::test]
async fn duplicate_responses_resolve_a_call_exactly_once() {
    let hub = MemoryTransport::server();
    // Drive the server side by hand so the wire can misbehave.
    let server_ch = hub.open_reliable().await.unwrap();
    let mut server_rx = server_ch.take_incoming().unwrap();
    let client = Socket::client(hub.connect("client-1"), SocketConfig::default())
        .await
        .unwrap();

    let responder = tokio::spawn(async move {
        let inbound = server_rx.recv().await.unwrap();
        let peer = inbound.sender.unwrap();
        if let Frame::CallRequest { call_id, .. } = inbound.frame {
            for value in ["first", "second"] {
                server_ch
                    .send_to_one(
                        &peer,
                        Frame::CallResponse {
                            call_id,
                            result: json!(value),
                        },
                    )
                    .await
                    .unwrap();
            }
        }
    });

    let result = client
        .call("echo-me", Some(Duration::from_secs(1)), vec![])
        .await
        .unwrap();
    assert_eq!(result, json!("first"));
    responder.await.unwrap();
}

#[tokio::test]
async fn stray_response_is_ignored_and_the_socket_stays_usable() {
    let hub = MemoryTransport::server();
    let server_ch = hub.open_reliable().await.unwrap();
    let mut server_rx = server_ch.take_incoming().unwrap();
    let client = Socket::client(hub.connect("client-1"), SocketConfig::default())
        .await
        .unwrap();

    // A response nobody asked for.
    server_ch
        .send_to_one(
            &"client-1".into(),
            Frame::CallResponse {
                call_id: uuid::Uuid::new_v4(),
                result: json!("stray"),
            },
        )
        .await
        .unwrap();

    let responder = tokio::spawn(async move {
        let inbound = server_rx.recv().await.unwrap();
        let peer = inbound.sender.unwrap();
        if let Frame::CallRequest { call_id, .. } = inbound.frame {
            server_ch
                .send_to_one(
                    &peer,
                    Frame::CallResponse {
                        call_id,
                        result: json!("real"),
                    },
                )
                .await
                .unwrap();
        }
    });

    let result = client
        .call("anything", Some(Duration::from_secs(1)), vec![])
        .await
        .unwrap();
    assert_eq!(result, json!("real"));
    responder.await.unwrap();
}

#[tokio::test]
async fn failing_listener_does_not_stop_the_others_or_later_frames() {
    let (server, client, _hub) = server_client().await;

    server
        .on("evt", |_sender, _args| async move {
            Err(WeftError::Callback {
                event: "evt".into(),
                message: "first listener fails".into(),
            })
        })
        .unwrap();

    let counter = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = unbounded_channel();
    {
        let counter = Arc::clone(&counter);
        server
            .on("evt", move |_sender, _args| {
                let counter = Arc::clone(&counter);
                let tx = tx.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tx.send(()).ok();
                    Ok(Value::Null)
                }
            })
            .unwrap();
    }

    client.emit("evt", vec![]).await.unwrap();
    rx.recv().await.unwrap();
    client.emit("evt", vec![]).await.unwrap();
    rx.recv().await.unwrap();

    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn ping_measures_a_round_trip() {
    let (_server, client, _hub) = server_client().await;
    let latency = client.ping().await.unwrap();
    assert!(latency <= Duration::from_secs(5));
}
