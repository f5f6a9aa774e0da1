//! Subscribe, unsubscribe, publish and extension tests
//!
//! Every request the client sends is answered (or deliberately left
//! unanswered) by the test acting as the server.


use bayeux_client::bayeux::{Extension, LivenessCheck, TimestampExtension};
use bayeux_client::error::BayeuxError;
use bayeux_client::protocol::Message;
use bayeux_client::testing::{error_reply, reply_to, ClientEvent};
use bayeux_client::ConnectionState;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use test_helpers::{connected_client, new_client, subscribe_and_ack, test_options};

/// Vetoes outgoing and incoming messages on one channel
struct ChannelBlocker {
    channel: String,
}

impl Extension for ChannelBlocker {
    fn will_send(&self, message: &mut Message) -> bool {
        message.channel != self.channel
    }

    fn will_receive(&self, message: &mut Message) -> bool {
        message.channel != self.channel
    }
}

fn event_on(channel: &str, data: serde_json::Value) -> Message {
    Message {
        data: Some(data),
        ..Message::new(channel)
    }
}

fn published(id: &str) -> impl Fn(&ClientEvent) -> bool + '_ {
    move |e: &ClientEvent| matches!(e, ClientEvent::Published { id: got, .. } if got == id)
}

#[tokio::test]
async fn test_subscribe_before_connect_is_sent_after_handshake() {
    // Arrange
    let (client, transport, delegate) = new_client(test_options());
    client.subscribe("/chat/room");

    // Act
    client.connect();
    transport.accept_handshake("client-1").await.unwrap();

    // Assert
    let request = transport.next_sent_on("/meta/subscribe").await.unwrap();
    assert_eq!(request.subscription(), "/chat/room");
    assert_eq!(request.client_id(), "client-1");

    transport.deliver_message(&reply_to(&request, true)).await;
    delegate
        .wait_for(|e| *e == ClientEvent::Subscribed("/chat/room".to_string()))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_duplicate_subscribe_sends_one_request() {
    let (client, transport, delegate) = connected_client(test_options()).await;

    client.subscribe("/chat/room");
    client.subscribe("/chat/room");
    let request = transport.next_sent_on("/meta/subscribe").await.unwrap();
    transport.deliver_message(&reply_to(&request, true)).await;
    delegate
        .wait_for(|e| *e == ClientEvent::Subscribed("/chat/room".to_string()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(transport.sent_on("/meta/subscribe").len(), 1);
    assert_eq!(
        delegate.count(|e| *e == ClientEvent::Subscribed("/chat/room".to_string())),
        1
    );
}

#[tokio::test]
async fn test_subscribe_to_active_channel_confirms_without_request() {
    let (client, transport, delegate) = connected_client(test_options()).await;
    subscribe_and_ack(&client, &transport, &delegate, "/chat/room").await;

    client.subscribe("/chat/room");

    delegate
        .wait_for(|e| *e == ClientEvent::Subscribed("/chat/room".to_string()))
        .await
        .unwrap();
    assert_eq!(transport.sent_on("/meta/subscribe").len(), 1);
}

#[tokio::test]
async fn test_server_rejected_subscribe_reports_failure() {
    // Arrange
    let (client, transport, delegate) = connected_client(test_options()).await;
    client.subscribe("/private/room");
    let request = transport.next_sent_on("/meta/subscribe").await.unwrap();

    // Act
    transport
        .deliver_message(&error_reply(&request, "403::Forbidden"))
        .await;

    // Assert
    let event = delegate
        .wait_for(|e| matches!(e, ClientEvent::SubscribeFailed { .. }))
        .await
        .unwrap();
    assert_eq!(
        event,
        ClientEvent::SubscribeFailed {
            channel: "/private/room".to_string(),
            error: BayeuxError::subscription("/private/room", "403::Forbidden"),
        }
    );

    // A rejected channel can be requested again
    client.subscribe("/private/room");
    let retry = transport.next_sent_on("/meta/subscribe").await.unwrap();
    assert_ne!(retry.id(), request.id());
}

#[tokio::test]
async fn test_invalid_subscription_channels_fail_locally() {
    let (client, transport, delegate) = connected_client(test_options()).await;

    client.subscribe("no-leading-slash");
    client.subscribe("/meta/connect");

    for _ in 0..2 {
        let event = delegate
            .wait_for(|e| matches!(e, ClientEvent::SubscribeFailed { .. }))
            .await
            .unwrap();
        assert!(matches!(
            event,
            ClientEvent::SubscribeFailed {
                error: BayeuxError::InvalidChannel(_),
                ..
            }
        ));
    }
    assert!(transport.sent_on("/meta/subscribe").is_empty());
}

#[tokio::test]
async fn test_wildcard_handler_receives_matching_events() {
    // Arrange
    let (client, transport, delegate) = connected_client(test_options()).await;
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    client.subscribe_with_handler("/chat/*", move |channel, message| {
        sink.lock()
            .unwrap()
            .push((channel.to_string(), message.data.clone()));
    });
    let request = transport.next_sent_on("/meta/subscribe").await.unwrap();
    transport.deliver_message(&reply_to(&request, true)).await;
    delegate
        .wait_for(|e| matches!(e, ClientEvent::Subscribed(_)))
        .await
        .unwrap();

    // Act
    transport
        .deliver_message(&event_on("/chat/lobby", json!({"text": "hi"})))
        .await;
    transport
        .deliver_message(&event_on("/chat/lobby/deep", json!({"text": "nested"})))
        .await;

    // Assert: the delegate sees both, the single-segment wildcard only one
    for expected in ["/chat/lobby", "/chat/lobby/deep"] {
        let event = delegate
            .wait_for(|e| matches!(e, ClientEvent::MessageReceived { .. }))
            .await
            .unwrap();
        assert!(matches!(event, ClientEvent::MessageReceived { channel, .. } if channel == expected));
    }
    let received = received.lock().unwrap().clone();
    assert_eq!(
        received,
        vec![("/chat/lobby".to_string(), Some(json!({"text": "hi"})))]
    );
}

#[tokio::test]
async fn test_unsubscribe_stops_handler_delivery() {
    // Arrange
    let (client, transport, delegate) = connected_client(test_options()).await;
    let calls = Arc::new(Mutex::new(0));
    let counter = calls.clone();
    client.subscribe_with_handler("/chat/room", move |_, _| {
        *counter.lock().unwrap() += 1;
    });
    let request = transport.next_sent_on("/meta/subscribe").await.unwrap();
    transport.deliver_message(&reply_to(&request, true)).await;
    delegate
        .wait_for(|e| matches!(e, ClientEvent::Subscribed(_)))
        .await
        .unwrap();

    // Act
    client.unsubscribe("/chat/room");
    let unsubscribe = transport.next_sent_on("/meta/unsubscribe").await.unwrap();
    assert_eq!(unsubscribe.subscription(), "/chat/room");
    transport.deliver_message(&reply_to(&unsubscribe, true)).await;
    delegate
        .wait_for(|e| *e == ClientEvent::Unsubscribed("/chat/room".to_string()))
        .await
        .unwrap();
    transport
        .deliver_message(&event_on("/chat/room", json!("late")))
        .await;

    // Assert
    delegate
        .wait_for(|e| matches!(e, ClientEvent::MessageReceived { .. }))
        .await
        .unwrap();
    assert_eq!(*calls.lock().unwrap(), 0);
}

#[tokio::test]
async fn test_unsubscribe_unknown_channel_fails() {
    let (client, _transport, delegate) = connected_client(test_options()).await;

    client.unsubscribe("/never/subscribed");

    let event = delegate
        .wait_for(|e| matches!(e, ClientEvent::UnsubscribeFailed { .. }))
        .await
        .unwrap();
    assert!(matches!(
        event,
        ClientEvent::UnsubscribeFailed { channel, .. } if channel == "/never/subscribed"
    ));
}

#[tokio::test]
async fn test_publish_is_acknowledged() {
    // Arrange
    let (client, transport, delegate) = connected_client(test_options()).await;

    // Act
    let id = client.publish("/chat/room", &json!({"text": "hello"}));
    let sent = transport.next_sent_on("/chat/room").await.unwrap();
    transport.deliver_message(&reply_to(&sent, true)).await;

    // Assert
    assert_eq!(sent.id(), id);
    assert_eq!(sent.client_id(), "client-1");
    assert_eq!(sent.data, Some(json!({"text": "hello"})));
    let event = delegate.wait_for(published(&id)).await.unwrap();
    assert_eq!(
        event,
        ClientEvent::Published {
            id: id.clone(),
            channel: "/chat/room".to_string(),
            error: None,
        }
    );
    assert_eq!(client.metrics().traffic.publishes_acknowledged, 1);
}

#[tokio::test]
async fn test_publish_rejected_by_server() {
    let (client, transport, delegate) = connected_client(test_options()).await;

    let id = client.publish("/chat/room", &"hello");
    let sent = transport.next_sent_on("/chat/room").await.unwrap();
    transport
        .deliver_message(&error_reply(&sent, "402::Unknown client"))
        .await;

    let event = delegate.wait_for(published(&id)).await.unwrap();
    assert!(matches!(
        event,
        ClientEvent::Published {
            error: Some(BayeuxError::PublishRejected { .. }),
            ..
        }
    ));
}

#[tokio::test]
async fn test_publish_while_disconnected_fails_immediately() {
    let (client, transport, delegate) = new_client(test_options());

    let id = client.publish("/chat/room", &"hello");

    let event = delegate.wait_for(published(&id)).await.unwrap();
    assert_eq!(
        event,
        ClientEvent::Published {
            id,
            channel: "/chat/room".to_string(),
            error: Some(BayeuxError::NotConnected {
                state: ConnectionState::Disconnected
            }),
        }
    );
    assert_eq!(transport.open_count(), 0);
}

#[tokio::test]
async fn test_publish_to_wildcard_fails_locally() {
    let (client, _transport, delegate) = connected_client(test_options()).await;

    let id = client.publish("/chat/*", &"hello");

    let event = delegate.wait_for(published(&id)).await.unwrap();
    assert!(matches!(
        event,
        ClientEvent::Published {
            error: Some(BayeuxError::InvalidChannel(_)),
            ..
        }
    ));
}

#[tokio::test]
async fn test_unanswered_publish_completes_only_on_disconnect() {
    // Arrange
    let (client, transport, delegate) = connected_client(test_options()).await;
    let id = client.publish("/chat/room", &"hello");
    transport.next_sent_on("/chat/room").await.unwrap();

    // Act
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(delegate.count(published(&id)), 0);
    client.disconnect();

    // Assert
    let event = delegate.wait_for(published(&id)).await.unwrap();
    assert!(matches!(
        event,
        ClientEvent::Published {
            error: Some(BayeuxError::ConnectionLost),
            ..
        }
    ));
    delegate.wait_for(|e| *e == ClientEvent::Disconnected).await.unwrap();

    // Nothing fires once the disconnect is reported
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(delegate.events().last(), Some(&ClientEvent::Disconnected));
    assert_eq!(delegate.count(published(&id)), 1);
}

#[tokio::test]
async fn test_every_pending_publish_completes_once_on_teardown() {
    // Arrange
    let (client, transport, delegate) = connected_client(test_options()).await;
    let ids: Vec<String> = (0..5)
        .map(|n| client.publish("/chat/room", &json!({ "n": n })))
        .collect();
    for _ in 0..5 {
        transport.next_sent_on("/chat/room").await.unwrap();
    }

    // Act
    transport.close_from_server(None, "reset").await;
    delegate.wait_for(|e| *e == ClientEvent::Disconnected).await.unwrap();

    // Assert: one ConnectionLost completion per publish, in send order
    let completed: Vec<String> = delegate
        .events()
        .into_iter()
        .filter_map(|e| match e {
            ClientEvent::Published {
                id,
                error: Some(BayeuxError::ConnectionLost),
                ..
            } => Some(id),
            _ => None,
        })
        .collect();
    assert_eq!(completed, ids);
}

#[tokio::test]
async fn test_reply_with_unknown_id_is_ignored() {
    // Arrange
    let (client, transport, delegate) = connected_client(test_options()).await;
    let id = client.publish("/chat/room", &"hello");
    let sent = transport.next_sent_on("/chat/room").await.unwrap();

    // Act
    let mut stray = reply_to(&sent, true);
    stray.id = Some("9999".to_string());
    transport.deliver_message(&stray).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Assert
    assert_eq!(delegate.count(|e| matches!(e, ClientEvent::Published { .. })), 0);
    transport.deliver_message(&reply_to(&sent, true)).await;
    let event = delegate.wait_for(published(&id)).await.unwrap();
    assert!(matches!(event, ClientEvent::Published { error: None, .. }));
}

#[tokio::test]
async fn test_reply_without_id_resolves_oldest_on_channel() {
    let (client, transport, delegate) = connected_client(test_options()).await;
    let first = client.publish("/chat/room", &"one");
    let second = client.publish("/chat/room", &"two");
    transport.next_sent_on("/chat/room").await.unwrap();
    transport.next_sent_on("/chat/room").await.unwrap();

    let anonymous = Message {
        successful: Some(true),
        ..Message::new("/chat/room")
    };
    transport.deliver_message(&anonymous).await;

    delegate.wait_for(published(&first)).await.unwrap();
    assert_eq!(delegate.count(published(&second)), 0);
}

#[tokio::test]
async fn test_outgoing_veto_fails_publish_without_sending() {
    // Arrange
    let (client, transport, delegate) = connected_client(test_options()).await;
    client.add_extension(Arc::new(ChannelBlocker {
        channel: "/chat/secret".to_string(),
    }));

    // Act
    let id = client.publish("/chat/secret", &"classified");

    // Assert
    let event = delegate.wait_for(published(&id)).await.unwrap();
    assert!(matches!(
        event,
        ClientEvent::Published {
            error: Some(BayeuxError::Vetoed),
            ..
        }
    ));
    assert!(transport.sent_on("/chat/secret").is_empty());
    assert_eq!(client.metrics().traffic.outgoing_vetoes, 1);
}

#[tokio::test]
async fn test_outgoing_veto_leaves_neighbouring_publishes_in_order() {
    // Arrange
    let (client, transport, delegate) = connected_client(test_options()).await;
    client.add_extension(Arc::new(ChannelBlocker {
        channel: "/chat/secret".to_string(),
    }));

    // Act
    let before = client.publish("/chat/room", &"before");
    let vetoed = client.publish("/chat/secret", &"classified");
    let after = client.publish("/chat/room", &"after");

    // Assert
    let first = transport.next_sent_on("/chat/room").await.unwrap();
    let second = transport.next_sent_on("/chat/room").await.unwrap();
    assert_eq!(first.id(), before);
    assert_eq!(second.id(), after);
    assert!(transport.sent_on("/chat/secret").is_empty());

    let event = delegate.wait_for(published(&vetoed)).await.unwrap();
    assert!(matches!(
        event,
        ClientEvent::Published {
            error: Some(BayeuxError::Vetoed),
            ..
        }
    ));
    for sent in [&first, &second] {
        transport.deliver_message(&reply_to(sent, true)).await;
    }
    for id in [&before, &after] {
        let event = delegate.wait_for(published(id)).await.unwrap();
        assert!(matches!(event, ClientEvent::Published { error: None, .. }));
    }
}

#[tokio::test]
async fn test_late_subscribe_rejection_after_unsubscribe_is_silent() {
    // Arrange: unsubscribe overtakes an unanswered subscribe
    let (client, transport, delegate) = connected_client(test_options()).await;
    client.subscribe("/chat/room");
    let subscribe = transport.next_sent_on("/meta/subscribe").await.unwrap();
    client.unsubscribe("/chat/room");
    let unsubscribe = transport.next_sent_on("/meta/unsubscribe").await.unwrap();

    // Act
    transport
        .deliver_message(&error_reply(&subscribe, "403::Forbidden"))
        .await;
    transport.deliver_message(&reply_to(&unsubscribe, true)).await;

    // Assert
    delegate
        .wait_for(|e| *e == ClientEvent::Unsubscribed("/chat/room".to_string()))
        .await
        .unwrap();
    assert_eq!(
        delegate.count(|e| matches!(e, ClientEvent::SubscribeFailed { .. })),
        0
    );
}

#[tokio::test]
async fn test_incoming_veto_drops_message() {
    let (client, transport, delegate) = connected_client(test_options()).await;
    client.add_extension(Arc::new(ChannelBlocker {
        channel: "/chat/spam".to_string(),
    }));

    transport
        .deliver_message(&event_on("/chat/spam", json!("buy now")))
        .await;
    transport
        .deliver_message(&event_on("/chat/room", json!("hello")))
        .await;

    let event = delegate
        .wait_for(|e| matches!(e, ClientEvent::MessageReceived { .. }))
        .await
        .unwrap();
    assert!(matches!(event, ClientEvent::MessageReceived { channel, .. } if channel == "/chat/room"));
    assert_eq!(client.metrics().traffic.incoming_vetoes, 1);
}

#[tokio::test]
async fn test_removed_extension_no_longer_runs() {
    let (client, transport, delegate) = connected_client(test_options()).await;
    let blocker: Arc<dyn Extension> = Arc::new(ChannelBlocker {
        channel: "/chat/room".to_string(),
    });
    client.add_extension(blocker.clone());

    assert!(client.remove_extension(&blocker));
    let id = client.publish("/chat/room", &"hello");

    let sent = transport.next_sent_on("/chat/room").await.unwrap();
    assert_eq!(sent.id(), id);
    assert_eq!(delegate.count(published(&id)), 0);
}

#[tokio::test]
async fn test_extension_with_dead_owner_is_skipped() {
    let (client, transport, _delegate) = connected_client(test_options()).await;
    let alive = Arc::new(AtomicBool::new(false));
    let flag = alive.clone();
    let liveness: LivenessCheck = Arc::new(move || flag.load(Ordering::SeqCst));
    client.add_extension_with_liveness(
        Arc::new(ChannelBlocker {
            channel: "/chat/room".to_string(),
        }),
        liveness,
    );

    let id = client.publish("/chat/room", &"hello");

    let sent = transport.next_sent_on("/chat/room").await.unwrap();
    assert_eq!(sent.id(), id);
}

#[tokio::test]
async fn test_timestamp_extension_stamps_outgoing_messages() {
    let (client, transport, _delegate) = connected_client(test_options()).await;
    client.add_extension(Arc::new(TimestampExtension));

    client.publish("/chat/room", &"hello");

    let sent = transport.next_sent_on("/chat/room").await.unwrap();
    let timestamp = sent.timestamp.expect("timestamp should be set");
    assert!(timestamp.ends_with(" GMT"));
}
