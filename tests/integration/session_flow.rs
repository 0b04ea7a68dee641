//! Two wallets chatting over the in-memory network through the session
//! and chat layers.

use futures::StreamExt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

use wagerchat::engine::chat::{GroupCreation, GroupFallback};
use wagerchat::messaging::{InMemoryConnector, InMemoryNetwork};
use wagerchat::session::{SessionManager, WalletIdentity};
use wagerchat::types::{Address, ChatError};

use crate::mock_messaging::BrokenConnector;

const ALICE: Address = Address::from_bytes([0x01; 20]);
const BOB: Address = Address::from_bytes([0x02; 20]);
const CAROL: Address = Address::from_bytes([0x03; 20]);
const STRANGER: Address = Address::from_bytes([0x09; 20]);

fn network(groups_enabled: bool) -> InMemoryNetwork {
    let network = InMemoryNetwork::new(groups_enabled);
    for wallet in [ALICE, BOB, CAROL] {
        network.register(wallet);
    }
    network
}

async fn session(network: &InMemoryNetwork, wallet: Address, fallback: GroupFallback) -> SessionManager {
    let mut manager = SessionManager::new(Arc::new(InMemoryConnector::new(network.clone())))
        .with_group_fallback(fallback);
    assert_ok!(manager.connect(WalletIdentity::new(wallet)).await);
    manager
}

#[tokio::test]
async fn test_direct_conversation_between_two_sessions() {
    let net = network(true);
    let alice = session(&net, ALICE, GroupFallback::Reject).await.chat().unwrap();
    let bob = session(&net, BOB, GroupFallback::Reject).await.chat().unwrap();

    let conversation = assert_ok!(alice.start_direct(&format!("  {BOB}  ")).await);
    let mut bob_feed = assert_ok!(bob.subscribe(&conversation.id).await);

    assert_ok!(alice.send(&conversation.id, "  gm, up or down?  ").await);

    let line = tokio::time::timeout(Duration::from_secs(1), bob_feed.next())
        .await
        .expect("message delivered")
        .expect("stream open");
    assert_eq!(line.message.content, "gm, up or down?");
    assert!(!line.is_own);
    assert_eq!(line.sender_label, ALICE.short());

    let history = assert_ok!(alice.history(&conversation.id).await);
    assert_eq!(history.len(), 1);
    assert!(history[0].is_own);
    assert_eq!(history[0].sender_label, "You");

    // Bob sees the same conversation, labelled with Alice's address.
    let listed = assert_ok!(bob.conversations().await);
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, conversation.id);
    assert_eq!(listed[0].label, ALICE.short());
}

#[tokio::test]
async fn test_unregistered_peer_is_not_reachable() {
    let net = network(true);
    let alice = session(&net, ALICE, GroupFallback::Reject).await.chat().unwrap();

    let err = assert_err!(alice.start_direct(&STRANGER.to_string()).await);
    assert_eq!(err, ChatError::NotReachable(vec![STRANGER]));
    assert_eq!(assert_err!(alice.start_direct("not-a-wallet").await), ChatError::InvalidAddress("not-a-wallet".into()));
}

#[tokio::test]
async fn test_group_creation_respects_client_capability() {
    let members = format!("{BOB}, {CAROL}, {BOB}, junk");

    let with_groups = network(true);
    let alice = session(&with_groups, ALICE, GroupFallback::Reject).await.chat().unwrap();
    let created = assert_ok!(alice.start_group(&members).await);
    assert!(matches!(&created, GroupCreation::Group(c) if c.peers().len() == 2));

    let without_groups = network(false);
    let strict = session(&without_groups, ALICE, GroupFallback::Reject).await.chat().unwrap();
    assert_eq!(assert_err!(strict.start_group(&members).await), ChatError::GroupsUnsupported);

    let lenient = session(&without_groups, ALICE, GroupFallback::FirstDirect).await.chat().unwrap();
    match assert_ok!(lenient.start_group(&members).await) {
        GroupCreation::DirectFallback { conversation, skipped } => {
            assert_eq!(conversation.peers(), vec![BOB]);
            assert_eq!(skipped, vec![CAROL]);
        }
        other => panic!("expected direct fallback, got {other:?}"),
    }
}

#[tokio::test]
async fn test_wallet_switch_closes_previous_client() {
    let net = network(true);
    let mut manager = SessionManager::new(Arc::new(InMemoryConnector::new(net.clone())));

    assert_ok!(manager.connect(WalletIdentity::new(ALICE)).await);
    assert_ok!(manager.connect(WalletIdentity::new(BOB)).await);
    assert_eq!(net.live_clients(), 1);
    assert_eq!(manager.current().unwrap().address(), BOB);

    assert!(manager.disconnect().await);
    assert_eq!(net.live_clients(), 0);
    assert!(matches!(manager.chat(), Err(ChatError::NotConnected)));
}

#[tokio::test]
async fn test_subscription_ends_when_wallet_disconnects() {
    let net = network(true);
    let mut alice_session = session(&net, ALICE, GroupFallback::Reject).await;
    let alice = alice_session.chat().unwrap();
    let bob = session(&net, BOB, GroupFallback::Reject).await.chat().unwrap();

    let conversation = assert_ok!(alice.start_direct(&BOB.to_string()).await);
    let mut alice_feed = assert_ok!(alice.subscribe(&conversation.id).await);

    assert!(alice_session.disconnect().await);
    assert_ok!(bob.send(&conversation.id, "after disconnect").await);

    let next = tokio::time::timeout(Duration::from_secs(1), alice_feed.next())
        .await
        .expect("stream ends instead of hanging");
    assert!(next.is_none());
    assert_eq!(assert_err!(alice.send(&conversation.id, "still here?").await), ChatError::Closed);
}

#[tokio::test]
async fn test_transport_failure_during_connect_leaves_no_session() {
    let connector = Arc::new(BrokenConnector::default());
    let mut manager = SessionManager::new(connector.clone());

    let result = manager.connect(WalletIdentity::new(ALICE)).await.map(|s| s.id);
    assert!(matches!(result, Err(ChatError::Transport(_))));
    assert!(!manager.is_connected());
    assert_eq!(connector.opened.load(Ordering::SeqCst), 1);
    assert_eq!(connector.closed(), 1);
}
