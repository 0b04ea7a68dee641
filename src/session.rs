//! Wallet session lifecycle.
//!
//! A session pairs a connected wallet identity with its messaging client.
//! `SessionManager` owns at most one; connecting a different wallet tears
//! the old one down first so no client handle outlives its session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::MessagingConfig;
use crate::engine::chat::{ChatService, GroupFallback};
use crate::messaging::{MessagingClient, MessagingConnector};
use crate::types::{Address, ChatError};

/// The account a wallet connector hands us after the user approves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletIdentity {
    pub address: Address,
}

impl WalletIdentity {
    pub fn new(address: Address) -> Self {
        Self { address }
    }
}

pub struct Session {
    pub id: Uuid,
    pub identity: WalletIdentity,
    pub client: Arc<dyn MessagingClient>,
    pub connected_at: DateTime<Utc>,
}

impl Session {
    pub fn address(&self) -> Address {
        self.identity.address
    }
}

pub struct SessionManager {
    connector: Arc<dyn MessagingConnector>,
    fallback: GroupFallback,
    current: Option<Session>,
}

impl SessionManager {
    pub fn new(connector: Arc<dyn MessagingConnector>) -> Self {
        Self {
            connector,
            fallback: GroupFallback::default(),
            current: None,
        }
    }

    /// Manager applying the `[messaging]` group policy to every chat.
    pub fn from_config(connector: Arc<dyn MessagingConnector>, config: &MessagingConfig) -> Self {
        Self::new(connector).with_group_fallback(config.group_fallback)
    }

    pub fn with_group_fallback(mut self, fallback: GroupFallback) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn group_fallback(&self) -> GroupFallback {
        self.fallback
    }

    /// Open a session for `identity`, replacing any existing one.
    ///
    /// Fails with `NotReachable` if the wallet is not enabled on the
    /// messaging network; in that case no session remains.
    pub async fn connect(&mut self, identity: WalletIdentity) -> Result<&Session, ChatError> {
        self.disconnect().await;

        let client = self.connector.connect(&identity).await?;
        let reachability = match client.can_message(&[identity.address]).await {
            Ok(r) => r,
            Err(e) => {
                client.close().await;
                return Err(e);
            }
        };
        if !reachability.get(&identity.address).copied().unwrap_or(false) {
            warn!(address = %identity.address, "Wallet is not enabled for messaging");
            client.close().await;
            return Err(ChatError::NotReachable(vec![identity.address]));
        }

        let session = Session {
            id: Uuid::new_v4(),
            identity,
            client,
            connected_at: Utc::now(),
        };
        info!(session = %session.id, address = %identity.address, "Wallet session connected");
        Ok(self.current.insert(session))
    }

    /// Close the active session's client. Returns whether one was open.
    pub async fn disconnect(&mut self) -> bool {
        match self.current.take() {
            Some(session) => {
                session.client.close().await;
                info!(session = %session.id, address = %session.address(), "Wallet session disconnected");
                true
            }
            None => false,
        }
    }

    pub fn current(&self) -> Result<&Session, ChatError> {
        self.current.as_ref().ok_or(ChatError::NotConnected)
    }

    pub fn is_connected(&self) -> bool {
        self.current.is_some()
    }

    /// Chat glue bound to the active session.
    pub fn chat(&self) -> Result<ChatService, ChatError> {
        let session = self.current()?;
        Ok(ChatService::new(session.client.clone(), self.fallback))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::{InMemoryConnector, InMemoryNetwork};

    const ALICE: Address = Address::from_bytes([1; 20]);
    const BOB: Address = Address::from_bytes([2; 20]);
    const NEWCOMER: Address = Address::from_bytes([7; 20]);

    fn manager() -> (SessionManager, InMemoryNetwork) {
        let network = InMemoryNetwork::new(true);
        network.register(ALICE);
        network.register(BOB);
        let connector = InMemoryConnector::new(network.clone());
        (SessionManager::new(Arc::new(connector)), network)
    }

    #[tokio::test]
    async fn test_no_session_before_connect() {
        let (sessions, _) = manager();
        assert!(!sessions.is_connected());
        assert!(matches!(sessions.current(), Err(ChatError::NotConnected)));
        assert!(matches!(sessions.chat(), Err(ChatError::NotConnected)));
    }

    #[tokio::test]
    async fn test_connect_creates_session() {
        let (mut sessions, network) = manager();
        let session = sessions.connect(WalletIdentity::new(ALICE)).await.unwrap();
        assert_eq!(session.address(), ALICE);
        assert_eq!(session.client.identity(), ALICE);
        assert_eq!(network.live_clients(), 1);
    }

    #[tokio::test]
    async fn test_unregistered_wallet_is_rejected() {
        let (mut sessions, network) = manager();
        let err = sessions.connect(WalletIdentity::new(NEWCOMER)).await.err();
        assert_eq!(err, Some(ChatError::NotReachable(vec![NEWCOMER])));
        assert!(!sessions.is_connected());
        assert_eq!(network.live_clients(), 0);
    }

    #[tokio::test]
    async fn test_reconnect_replaces_session_without_leaking() {
        let (mut sessions, network) = manager();
        let first = sessions.connect(WalletIdentity::new(ALICE)).await.unwrap().id;
        let second = sessions.connect(WalletIdentity::new(BOB)).await.unwrap().id;

        assert_ne!(first, second);
        assert_eq!(sessions.current().unwrap().address(), BOB);
        assert_eq!(network.live_clients(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_closes_client() {
        let (mut sessions, network) = manager();
        let client = sessions.connect(WalletIdentity::new(ALICE)).await.unwrap().client.clone();

        assert!(sessions.disconnect().await);
        assert!(!sessions.disconnect().await);
        assert_eq!(network.live_clients(), 0);
        assert_eq!(client.list_conversations().await, Err(ChatError::Closed));
    }

    #[tokio::test]
    async fn test_disconnect_ends_subscriptions() {
        use futures::StreamExt;

        let (mut sessions, network) = manager();
        sessions.connect(WalletIdentity::new(ALICE)).await.unwrap();
        let chat = sessions.chat().unwrap();
        let room = chat.start_direct(&BOB.to_string()).await.unwrap();
        let mut lines = chat.subscribe(&room.id).await.unwrap();

        assert!(sessions.disconnect().await);
        let bob = network.client_for(BOB);
        bob.send(&room.id, "after disconnect").await.unwrap();

        let next = tokio::time::timeout(std::time::Duration::from_secs(1), lines.next()).await;
        assert_eq!(next.unwrap(), None);
    }

    #[tokio::test]
    async fn test_from_config_applies_group_fallback() {
        use crate::engine::chat::GroupCreation;

        let config = MessagingConfig {
            environment: "local".into(),
            groups_enabled: false,
            group_fallback: GroupFallback::FirstDirect,
        };
        let network = InMemoryNetwork::from_config(&config).unwrap();
        network.register(ALICE);
        network.register(BOB);
        let mut sessions =
            SessionManager::from_config(Arc::new(InMemoryConnector::new(network.clone())), &config);
        assert_eq!(sessions.group_fallback(), GroupFallback::FirstDirect);

        sessions.connect(WalletIdentity::new(ALICE)).await.unwrap();
        let created = sessions.chat().unwrap().start_group(&BOB.to_string()).await.unwrap();
        assert!(matches!(created, GroupCreation::DirectFallback { ref skipped, .. } if skipped.is_empty()));
    }
}
