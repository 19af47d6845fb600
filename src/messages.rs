use anyhow::{Context, Result};
use tracing::debug;

use crate::data::Services;
use crate::error::ValidationError;
use crate::models::{Conversation, Message, MessageDraft, UserProfile};
use crate::notice::{self, NoticeSink};

/// Conversation list, most recent first as the backend returns it.
#[derive(Debug, Clone, Default)]
pub struct Inbox {
    conversations: Vec<Conversation>,
}

impl Inbox {
    pub fn load(services: &Services) -> Result<Self> {
        let conversations = services
            .messages
            .load_conversations()
            .context("messages: load conversations")?;
        Ok(Self { conversations })
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn find(&self, peer_id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.peer_id() == peer_id)
    }

    pub fn unread_total(&self) -> u32 {
        self.conversations.iter().map(|c| c.unread_count).sum()
    }
}

/// Messages exchanged with one peer, oldest first.
#[derive(Debug, Clone)]
pub struct ChatThread {
    pub peer: UserProfile,
    messages: Vec<Message>,
}

impl ChatThread {
    pub fn open(services: &Services, peer_id: &str) -> Result<Self> {
        let peer = services
            .social
            .load_user(peer_id)
            .with_context(|| format!("messages: load peer {peer_id}"))?;
        let messages = services
            .messages
            .load_messages(&peer.id)
            .with_context(|| format!("messages: load thread with {peer_id}"))?;
        Ok(Self { peer, messages })
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn send(
        &mut self,
        services: &Services,
        notices: &dyn NoticeSink,
        text: &str,
        image_url: Option<String>,
    ) -> Result<Message> {
        let text = text.trim();
        if text.is_empty() && image_url.is_none() {
            return Err(notice::reject(notices, ValidationError::EmptyMessage));
        }
        let draft = MessageDraft {
            receiver_id: self.peer.id.clone(),
            text: text.to_string(),
            image_url,
        };
        let message = services.messages.send_message(&draft)?;
        debug!(peer = %self.peer.username, id = %message.id, "messages: sent");
        self.messages.push(message.clone());
        Ok(message)
    }
}
