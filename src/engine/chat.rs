//! Chat glue over a `MessagingClient`.
//!
//! Validates user-entered addresses and message text, checks reachability
//! before opening conversations, and decides explicitly what happens when a
//! group is requested from a client that cannot create one.

use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::messaging::{unreachable, Conversation, ConversationKind, Message, MessagingClient};
use crate::types::{Address, ChatError};

// ---------------------------------------------------------------------------
// Input parsing
// ---------------------------------------------------------------------------

/// Parse a single wallet address typed by the user.
pub fn parse_address(input: &str) -> Result<Address, ChatError> {
    let trimmed = input.trim();
    trimmed
        .parse()
        .map_err(|_| ChatError::InvalidAddress(trimmed.to_string()))
}

/// Parse a comma-separated member list.
///
/// Invalid entries are dropped, duplicates collapse to the first
/// occurrence, and `own` is removed. An empty result is an error.
pub fn parse_address_list(input: &str, own: Address) -> Result<Vec<Address>, ChatError> {
    let mut members: Vec<Address> = Vec::new();
    for entry in input.split(',') {
        match parse_address(entry) {
            Ok(addr) if addr != own && !members.contains(&addr) => members.push(addr),
            Ok(_) => {}
            Err(_) if entry.trim().is_empty() => {}
            Err(_) => warn!(entry = entry.trim(), "Dropping invalid group member address"),
        }
    }

    if members.is_empty() {
        return Err(ChatError::NoValidAddresses);
    }
    Ok(members)
}

// ---------------------------------------------------------------------------
// Group policy
// ---------------------------------------------------------------------------

/// What to do when a group is requested but the client has no group support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupFallback {
    /// Fail with `GroupsUnsupported`.
    #[default]
    Reject,
    /// Open a direct conversation with the first reachable member and
    /// report everyone left out.
    FirstDirect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupCreation {
    Group(Conversation),
    DirectFallback {
        conversation: Conversation,
        /// Requested members not in `conversation`.
        skipped: Vec<Address>,
    },
}

impl GroupCreation {
    pub fn conversation(&self) -> &Conversation {
        match self {
            GroupCreation::Group(c) => c,
            GroupCreation::DirectFallback { conversation, .. } => conversation,
        }
    }
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationSummary {
    pub id: String,
    pub label: String,
    pub is_group: bool,
}

/// A message prepared for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatLine {
    pub message: Message,
    pub is_own: bool,
    pub sender_label: String,
    pub time: String,
}

fn label_for(conversation: &Conversation) -> String {
    match &conversation.kind {
        ConversationKind::Direct { peer } => peer.short(),
        ConversationKind::Group { members } => {
            format!("Group ({} members)", members.len() + 1)
        }
    }
}

fn line_for(message: Message, own: Address) -> ChatLine {
    // Addresses are normalised at parse time, so equality is case-insensitive.
    let is_own = message.is_from(&own);
    let sender_label = if is_own { "You".to_string() } else { message.sender.short() };
    let time = message.time_label();
    ChatLine {
        message,
        is_own,
        sender_label,
        time,
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct ChatService {
    client: Arc<dyn MessagingClient>,
    fallback: GroupFallback,
}

impl ChatService {
    pub fn new(client: Arc<dyn MessagingClient>, fallback: GroupFallback) -> Self {
        Self { client, fallback }
    }

    pub fn own_address(&self) -> Address {
        self.client.identity()
    }

    pub async fn conversations(&self) -> Result<Vec<ConversationSummary>, ChatError> {
        Ok(self
            .client
            .list_conversations()
            .await?
            .iter()
            .map(|c| ConversationSummary {
                id: c.id.clone(),
                label: label_for(c),
                is_group: c.is_group(),
            })
            .collect())
    }

    /// Open a direct conversation with the address in `input`.
    pub async fn start_direct(&self, input: &str) -> Result<Conversation, ChatError> {
        let peer = parse_address(input)?;
        if peer == self.own_address() {
            return Err(ChatError::InvalidAddress(input.trim().to_string()));
        }

        let reachability = self.client.can_message(&[peer]).await?;
        let missing = unreachable(&[peer], &reachability);
        if !missing.is_empty() {
            return Err(ChatError::NotReachable(missing));
        }

        let conversation = self.client.create_direct(peer).await?;
        info!(conversation = %conversation.id, peer = %peer, "Direct chat started");
        Ok(conversation)
    }

    /// Open a group with the comma-separated members in `input`.
    pub async fn start_group(&self, input: &str) -> Result<GroupCreation, ChatError> {
        let members = parse_address_list(input, self.own_address())?;
        let reachability = self.client.can_message(&members).await?;

        if self.client.supports_groups() {
            let missing = unreachable(&members, &reachability);
            if !missing.is_empty() {
                return Err(ChatError::NotReachable(missing));
            }
            let group = self.client.create_group(&members).await?;
            info!(conversation = %group.id, members = members.len(), "Group chat started");
            return Ok(GroupCreation::Group(group));
        }

        match self.fallback {
            GroupFallback::Reject => Err(ChatError::GroupsUnsupported),
            GroupFallback::FirstDirect => {
                let first = members
                    .iter()
                    .copied()
                    .find(|m| reachability.get(m).copied().unwrap_or(false))
                    .ok_or_else(|| ChatError::NotReachable(members.clone()))?;

                let conversation = self.client.create_direct(first).await?;
                let skipped: Vec<Address> = members.into_iter().filter(|m| *m != first).collect();
                warn!(
                    conversation = %conversation.id,
                    peer = %first,
                    skipped = skipped.len(),
                    "Groups unavailable, opened direct chat instead"
                );
                Ok(GroupCreation::DirectFallback {
                    conversation,
                    skipped,
                })
            }
        }
    }

    /// Send trimmed `text`. Blank messages are refused.
    pub async fn send(&self, conversation_id: &str, text: &str) -> Result<Message, ChatError> {
        let content = text.trim();
        if content.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        self.client.send(conversation_id, content).await
    }

    pub async fn history(&self, conversation_id: &str) -> Result<Vec<ChatLine>, ChatError> {
        let own = self.own_address();
        Ok(self
            .client
            .load_messages(conversation_id)
            .await?
            .into_iter()
            .map(|m| line_for(m, own))
            .collect())
    }

    pub async fn subscribe(&self, conversation_id: &str) -> Result<BoxStream<'static, ChatLine>, ChatError> {
        let own = self.own_address();
        let stream = self.client.stream_messages(conversation_id).await?;
        Ok(stream.map(move |m| line_for(m, own)).boxed())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
