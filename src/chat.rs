use crate::entity::{OrderContext, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored direct message between two marketplace participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub body: String,
    pub author_id: UserId,
    pub counterparty_id: UserId,
    pub order_context: OrderContext,
    pub recipient_id: UserId,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a message. The store assigns id, timestamp and read flag.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub author_id: UserId,
    pub counterparty_id: UserId,
    pub order_context: OrderContext,
    pub recipient_id: UserId,
    pub body: String,
}

impl NewMessage {
    /// A direct message where the recipient is the counterparty.
    pub fn direct(
        author_id: UserId,
        counterparty_id: UserId,
        order_context: OrderContext,
        body: impl Into<String>,
    ) -> Self {
        Self {
            author_id,
            recipient_id: counterparty_id.clone(),
            counterparty_id,
            order_context,
            body: body.into(),
        }
    }
}

/// Which side of the conversation authored a message, from the viewer's
/// perspective: `Vendor` is the viewer, `Supplier` the other party.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderSide {
    Vendor,
    Supplier,
}

/// Client-facing shape of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageView {
    pub id: String,
    pub text: String,
    pub sender: SenderSide,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
}

impl Message {
    pub fn view_for(&self, viewer: &UserId) -> MessageView {
        let sender = if &self.author_id == viewer {
            SenderSide::Vendor
        } else {
            SenderSide::Supplier
        };
        MessageView {
            id: self.id.clone(),
            text: self.body.clone(),
            sender,
            timestamp: self.created_at,
            read: self.read,
        }
    }

    /// The participant on the other side from `viewer`.
    pub fn other_party(&self, viewer: &UserId) -> &UserId {
        if &self.author_id == viewer {
            &self.recipient_id
        } else {
            &self.author_id
        }
    }
}

/// One row of a user's conversation list.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub counterparty_id: UserId,
    pub order_id: OrderContext,
    pub last_message: MessageView,
    pub unread_count: i64,
}

/// A conversation as returned to the viewer who opened it.
#[derive(Debug, Clone, Default)]
pub struct ConversationPage {
    /// Oldest first, with `read` as it was before this view.
    pub messages: Vec<Message>,
    /// Incoming messages this view flipped to read.
    pub newly_read: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Message {
        Message {
            id: "m1".into(),
            body: "hello".into(),
            author_id: UserId::new("1"),
            counterparty_id: UserId::new("2"),
            order_context: OrderContext::General,
            recipient_id: UserId::new("2"),
            read: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_sender_side_is_relative_to_viewer() {
        let msg = sample();
        assert_eq!(msg.view_for(&UserId::new("1")).sender, SenderSide::Vendor);
        assert_eq!(msg.view_for(&UserId::new("2")).sender, SenderSide::Supplier);
    }

    #[test]
    fn test_view_json_shape() {
        let json = serde_json::to_value(sample().view_for(&UserId::new("1"))).unwrap();
        assert_eq!(json["text"], "hello");
        assert_eq!(json["sender"], "vendor");
        assert_eq!(json["read"], false);
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_other_party() {
        let msg = sample();
        assert_eq!(msg.other_party(&UserId::new("1")), &UserId::new("2"));
        assert_eq!(msg.other_party(&UserId::new("2")), &UserId::new("1"));
    }
}
