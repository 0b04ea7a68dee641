//! Messaging doubles for failure paths the in-memory network cannot
//! produce.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use wagerchat::messaging::{Conversation, Message, MessageStream, MessagingClient, MessagingConnector};
use wagerchat::session::WalletIdentity;
use wagerchat::types::{Address, ChatError};

/// Client whose transport is down: every network call fails.
pub struct BrokenClient {
    identity: Address,
    closes: Arc<AtomicUsize>,
}

fn down() -> ChatError {
    ChatError::Transport("connection reset".into())
}

#[async_trait]
impl MessagingClient for BrokenClient {
    fn identity(&self) -> Address {
        self.identity
    }

    fn supports_groups(&self) -> bool {
        false
    }

    async fn can_message(&self, _addresses: &[Address]) -> Result<HashMap<Address, bool>, ChatError> {
        Err(down())
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>, ChatError> {
        Err(down())
    }

    async fn load_messages(&self, _conversation_id: &str) -> Result<Vec<Message>, ChatError> {
        Err(down())
    }

    async fn stream_messages(&self, _conversation_id: &str) -> Result<MessageStream, ChatError> {
        Err(down())
    }

    async fn send(&self, _conversation_id: &str, _content: &str) -> Result<Message, ChatError> {
        Err(down())
    }

    async fn create_direct(&self, _peer: Address) -> Result<Conversation, ChatError> {
        Err(down())
    }

    async fn create_group(&self, _members: &[Address]) -> Result<Conversation, ChatError> {
        Err(down())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Connector handing out `BrokenClient`s and counting how many were closed.
#[derive(Default)]
pub struct BrokenConnector {
    pub opened: AtomicUsize,
    pub closes: Arc<AtomicUsize>,
}

impl BrokenConnector {
    pub fn closed(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessagingConnector for BrokenConnector {
    async fn connect(&self, identity: &WalletIdentity) -> Result<Arc<dyn MessagingClient>, ChatError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(BrokenClient {
            identity: identity.address,
            closes: self.closes.clone(),
        }))
    }
}
