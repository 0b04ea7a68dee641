//! Messaging capability interface.
//!
//! The chat glue and the session manager only talk to `MessagingClient`;
//! the network behind it (and its SDK generation) is an adapter detail.
//! Capabilities that differ between generations, such as group support,
//! are queried explicitly instead of detected by calling and failing.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::session::WalletIdentity;
use crate::types::{Address, ChatError};

pub use memory::{InMemoryClient, InMemoryConnector, InMemoryNetwork};

// ---------------------------------------------------------------------------
// Data model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Direct { peer: Address },
    Group { members: Vec<Address> },
}

/// A conversation as seen by one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub kind: ConversationKind,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn is_group(&self) -> bool {
        matches!(self.kind, ConversationKind::Group { .. })
    }

    /// Everyone in the conversation other than the viewer.
    pub fn peers(&self) -> Vec<Address> {
        match &self.kind {
            ConversationKind::Direct { peer } => vec![*peer],
            ConversationKind::Group { members } => members.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender: Address,
    pub content: String,
    pub sent_at: DateTime<Utc>,
}

impl Message {
    pub fn is_from(&self, address: &Address) -> bool {
        self.sender == *address
    }

    /// Local wall-clock label, e.g. "14:05".
    pub fn time_label(&self) -> String {
        self.sent_at.format("%H:%M").to_string()
    }
}

/// Live messages for one conversation, in arrival order.
pub type MessageStream = BoxStream<'static, Message>;

// ---------------------------------------------------------------------------
// Client interface
// ---------------------------------------------------------------------------

/// A connected messaging client acting as one wallet identity.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// The wallet this client speaks for.
    fn identity(&self) -> Address;

    /// Whether `create_group` is available on this client.
    fn supports_groups(&self) -> bool;

    /// Reachability of each address on the network.
    async fn can_message(&self, addresses: &[Address]) -> Result<HashMap<Address, bool>, ChatError>;

    async fn list_conversations(&self) -> Result<Vec<Conversation>, ChatError>;

    /// Full history, oldest first.
    async fn load_messages(&self, conversation_id: &str) -> Result<Vec<Message>, ChatError>;

    /// Messages sent after the call returns, including our own.
    async fn stream_messages(&self, conversation_id: &str) -> Result<MessageStream, ChatError>;

    async fn send(&self, conversation_id: &str, content: &str) -> Result<Message, ChatError>;

    /// Open (or reuse) the direct conversation with `peer`.
    async fn create_direct(&self, peer: Address) -> Result<Conversation, ChatError>;

    async fn create_group(&self, members: &[Address]) -> Result<Conversation, ChatError>;

    /// Release the client. Every later call fails with `ChatError::Closed`.
    async fn close(&self);
}

/// Builds messaging clients for wallet identities.
#[async_trait]
pub trait MessagingConnector: Send + Sync {
    async fn connect(&self, identity: &WalletIdentity) -> Result<Arc<dyn MessagingClient>, ChatError>;
}

/// Addresses from `addresses` that `reachability` marks unreachable or omits.
pub fn unreachable(addresses: &[Address], reachability: &HashMap<Address, bool>) -> Vec<Address> {
    addresses
        .iter()
        .filter(|a| !reachability.get(a).copied().unwrap_or(false))
        .copied()
        .collect()
}
