//! In-process messaging network.
//!
//! A shared hub of registered wallets and conversations. Each conversation
//! fans out new messages through a `tokio::sync::broadcast` channel, so a
//! slow subscriber skips ahead instead of holding senders back. The group
//! flag models client generations that cannot create groups.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    unreachable, Conversation, ConversationKind, Message, MessageStream, MessagingClient,
    MessagingConnector,
};
use crate::config::MessagingConfig;
use crate::session::WalletIdentity;
use crate::types::{Address, ChatError};

/// Buffered messages per conversation before slow subscribers start lagging.
const STREAM_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct InMemoryNetwork {
    hub: Arc<Mutex<Hub>>,
}

struct Hub {
    groups_enabled: bool,
    registered: HashSet<Address>,
    rooms: Vec<Room>,
    live_clients: usize,
}

struct Room {
    id: String,
    members: Vec<Address>,
    group: bool,
    created_at: DateTime<Utc>,
    messages: Vec<Message>,
    feed: broadcast::Sender<Message>,
}

impl Room {
    fn new(members: Vec<Address>, group: bool) -> Self {
        let (feed, _) = broadcast::channel(STREAM_CAPACITY);
        Self {
            id: Uuid::new_v4().to_string(),
            members,
            group,
            created_at: Utc::now(),
            messages: Vec::new(),
            feed,
        }
    }

    fn has_member(&self, address: &Address) -> bool {
        self.members.contains(address)
    }

    fn view_for(&self, viewer: Address) -> Conversation {
        let others: Vec<Address> = self.members.iter().filter(|m| **m != viewer).copied().collect();
        let kind = if self.group {
            ConversationKind::Group { members: others }
        } else {
            ConversationKind::Direct {
                peer: others.first().copied().unwrap_or(viewer),
            }
        };
        Conversation {
            id: self.id.clone(),
            kind,
            created_at: self.created_at,
        }
    }
}

impl Hub {
    fn room_for(&mut self, id: &str, member: &Address) -> Result<&mut Room, ChatError> {
        self.rooms
            .iter_mut()
            .find(|r| r.id == id && r.has_member(member))
            .ok_or_else(|| ChatError::ConversationNotFound(id.to_string()))
    }
}

impl InMemoryNetwork {
    pub fn new(groups_enabled: bool) -> Self {
        Self {
            hub: Arc::new(Mutex::new(Hub {
                groups_enabled,
                registered: HashSet::new(),
                rooms: Vec::new(),
                live_clients: 0,
            })),
        }
    }

    fn hub(&self) -> MutexGuard<'_, Hub> {
        self.hub.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `address` reachable on the network.
    pub fn register(&self, address: Address) {
        self.hub().registered.insert(address);
    }

    pub fn is_registered(&self, address: &Address) -> bool {
        self.hub().registered.contains(address)
    }

    /// Local network for the `[messaging]` section. Only the `local`
    /// environment has an in-process adapter.
    pub fn from_config(config: &MessagingConfig) -> anyhow::Result<Self> {
        if config.environment != "local" {
            anyhow::bail!(
                "No in-process messaging adapter for environment {:?}",
                config.environment
            );
        }
        Ok(Self::new(config.groups_enabled))
    }

    pub fn groups_enabled(&self) -> bool {
        self.hub().groups_enabled
    }

    /// A new client acting as `identity`.
    pub fn client_for(&self, identity: Address) -> InMemoryClient {
        self.hub().live_clients += 1;
        debug!(identity = %identity, "Messaging client opened");
        InMemoryClient {
            identity,
            network: self.clone(),
            closed: AtomicBool::new(false),
            shutdown: watch::channel(false).0,
        }
    }

    /// Clients opened and not yet closed.
    pub fn live_clients(&self) -> usize {
        self.hub().live_clients
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct InMemoryClient {
    identity: Address,
    network: InMemoryNetwork,
    closed: AtomicBool,
    /// Flipped on `close`; ends every stream this client handed out.
    shutdown: watch::Sender<bool>,
}

impl InMemoryClient {
    fn ensure_open(&self) -> Result<(), ChatError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(ChatError::Closed)
        } else {
            Ok(())
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessagingClient for InMemoryClient {
    fn identity(&self) -> Address {
        self.identity
    }

    fn supports_groups(&self) -> bool {
        self.network.groups_enabled()
    }

    async fn can_message(&self, addresses: &[Address]) -> Result<HashMap<Address, bool>, ChatError> {
        self.ensure_open()?;
        let hub = self.network.hub();
        Ok(addresses
            .iter()
            .map(|a| (*a, hub.registered.contains(a)))
            .collect())
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>, ChatError> {
        self.ensure_open()?;
        let hub = self.network.hub();
        Ok(hub
            .rooms
            .iter()
            .filter(|r| r.has_member(&self.identity))
            .map(|r| r.view_for(self.identity))
            .collect())
    }

    async fn load_messages(&self, conversation_id: &str) -> Result<Vec<Message>, ChatError> {
        self.ensure_open()?;
        let mut hub = self.network.hub();
        let messages = hub.room_for(conversation_id, &self.identity)?.messages.clone();
        Ok(messages)
    }

    async fn stream_messages(&self, conversation_id: &str) -> Result<MessageStream, ChatError> {
        self.ensure_open()?;
        let receiver = {
            let mut hub = self.network.hub();
            let rx = hub.room_for(conversation_id, &self.identity)?.feed.subscribe();
            rx
        };

        let stream = futures::stream::unfold(receiver, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(message) => return Some((message, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Message stream lagged, skipping ahead");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        let mut shutdown = self.shutdown.subscribe();
        let closed = async move {
            while !*shutdown.borrow_and_update() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        };
        Ok(stream.take_until(closed).boxed())
    }

    async fn send(&self, conversation_id: &str, content: &str) -> Result<Message, ChatError> {
        self.ensure_open()?;
        let mut hub = self.network.hub();
        let room = hub.room_for(conversation_id, &self.identity)?;

        let message = Message {
            id: Uuid::new_v4().to_string(),
            conversation_id: room.id.clone(),
            sender: self.identity,
            content: content.to_string(),
            sent_at: Utc::now(),
        };
        room.messages.push(message.clone());
        // No live subscribers is not an error.
        let _ = room.feed.send(message.clone());

        debug!(conversation = %room.id, sender = %self.identity, "Message sent");
        Ok(message)
    }

    async fn create_direct(&self, peer: Address) -> Result<Conversation, ChatError> {
        self.ensure_open()?;
        let mut hub = self.network.hub();
        if !hub.registered.contains(&peer) {
            return Err(ChatError::NotReachable(vec![peer]));
        }

        let me = self.identity;
        if let Some(existing) = hub
            .rooms
            .iter()
            .find(|r| !r.group && r.has_member(&me) && r.has_member(&peer))
        {
            return Ok(existing.view_for(me));
        }

        let room = Room::new(vec![me, peer], false);
        let view = room.view_for(me);
        hub.rooms.push(room);
        debug!(conversation = %view.id, peer = %peer, "Direct conversation created");
        Ok(view)
    }

    async fn create_group(&self, members: &[Address]) -> Result<Conversation, ChatError> {
        self.ensure_open()?;
        let mut hub = self.network.hub();
        if !hub.groups_enabled {
            return Err(ChatError::GroupsUnsupported);
        }

        let reachability: HashMap<Address, bool> = members
            .iter()
            .map(|a| (*a, hub.registered.contains(a)))
            .collect();
        let missing = unreachable(members, &reachability);
        if !missing.is_empty() {
            return Err(ChatError::NotReachable(missing));
        }

        let mut all = vec![self.identity];
        for member in members {
            if !all.contains(member) {
                all.push(*member);
            }
        }

        let room = Room::new(all, true);
        let view = room.view_for(self.identity);
        hub.rooms.push(room);
        debug!(conversation = %view.id, members = members.len(), "Group conversation created");
        Ok(view)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let mut hub = self.network.hub();
            hub.live_clients = hub.live_clients.saturating_sub(1);
            drop(hub);
            self.shutdown.send_replace(true);
            debug!(identity = %self.identity, "Messaging client closed");
        }
    }
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct InMemoryConnector {
    network: InMemoryNetwork,
}

impl InMemoryConnector {
    pub fn new(network: InMemoryNetwork) -> Self {
        Self { network }
    }

    pub fn network(&self) -> &InMemoryNetwork {
        &self.network
    }
}

#[async_trait]
impl MessagingConnector for InMemoryConnector {
    async fn connect(&self, identity: &WalletIdentity) -> Result<Arc<dyn MessagingClient>, ChatError> {
        Ok(Arc::new(self.network.client_for(identity.address)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
