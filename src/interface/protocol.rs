//! Real-time wire format.
//!
//! Every frame is a JSON envelope `{"event": "<name>", "data": <payload>}`.

use crate::{
    chat::Message,
    entity::{OrderContext, OrderId, UserId},
    order::StatusUpdate,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Client → Server
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinOrderRoom(OrderId),
    LeaveOrderRoom(OrderId),
    JoinSupplierChat(UserId),
    LeaveSupplierChat(UserId),
    SendMessage(SendMessage),
    MarkMessagesRead(MarkRead),
}

/// Fields are optional so that a frame missing them still decodes and can be
/// answered with `message-error` when the sender supplied a `requestId`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub counterparty_id: Option<UserId>,
    #[serde(default)]
    pub order_id: OrderContext,
    pub message: Option<MessageBody>,
    pub recipient_id: Option<UserId>,
    pub request_id: Option<String>,
}

/// Clients send either a bare string or `{ "text": ... }`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum MessageBody {
    Text(String),
    Object { text: String },
}

impl MessageBody {
    pub fn text(&self) -> &str {
        match self {
            MessageBody::Text(text) | MessageBody::Object { text } => text,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkRead {
    pub counterparty_id: UserId,
}

// ============================================================================
// Server → Client
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    NewMessage(MessageEvent),
    StatusUpdate(StatusUpdate),
    MessagesRead(ReadReceipt),
    #[serde(rename_all = "camelCase")]
    MessageAck {
        request_id: String,
        message_id: String,
    },
    #[serde(rename_all = "camelCase")]
    MessageError {
        request_id: String,
        message: String,
    },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::NewMessage(_) => "new-message",
            ServerEvent::StatusUpdate(_) => "status-update",
            ServerEvent::MessagesRead(_) => "messages-read",
            ServerEvent::MessageAck { .. } => "message-ack",
            ServerEvent::MessageError { .. } => "message-error",
        }
    }
}

/// A new message as pushed to room members. Unlike the REST view it carries
/// raw participant ids, since each member decides for itself which side it is on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEvent {
    pub id: String,
    pub text: String,
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub counterparty_id: UserId,
    pub order_id: OrderContext,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
}

impl From<&Message> for MessageEvent {
    fn from(msg: &Message) -> Self {
        Self {
            id: msg.id.clone(),
            text: msg.body.clone(),
            sender_id: msg.author_id.clone(),
            recipient_id: msg.recipient_id.clone(),
            counterparty_id: msg.counterparty_id.clone(),
            order_id: msg.order_context.clone(),
            timestamp: msg.created_at,
            read: msg.read,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub counterparty_id: UserId,
    pub user_id: UserId,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_join_events() {
        let ev: ClientEvent =
            serde_json::from_str(r#"{"event":"join-supplier-chat","data":42}"#).unwrap();
        assert!(matches!(ev, ClientEvent::JoinSupplierChat(id) if id == UserId::new("42")));

        let ev: ClientEvent =
            serde_json::from_str(r#"{"event":"join-order-room","data":"o-9"}"#).unwrap();
        assert!(matches!(ev, ClientEvent::JoinOrderRoom(id) if id == OrderId::new("o-9")));
    }

    #[test]
    fn test_parse_send_message_forms() {
        let ev: ClientEvent = serde_json::from_str(
            r#"{"event":"send-message","data":{"counterpartyId":42,"message":{"text":"hi"},"recipientId":42}}"#,
        )
        .unwrap();
        let ClientEvent::SendMessage(send) = ev else {
            panic!("expected send-message");
        };
        assert_eq!(send.counterparty_id, Some(UserId::new("42")));
        assert_eq!(send.message.as_ref().map(MessageBody::text), Some("hi"));
        assert_eq!(send.order_id, OrderContext::General);

        let ev: ClientEvent = serde_json::from_str(
            r#"{"event":"send-message","data":{"counterpartyId":"7","orderId":"o1","message":"yo","requestId":"r1"}}"#,
        )
        .unwrap();
        let ClientEvent::SendMessage(send) = ev else {
            panic!("expected send-message");
        };
        assert_eq!(send.order_id, OrderContext::Specific(OrderId::new("o1")));
        assert_eq!(send.message.as_ref().map(MessageBody::text), Some("yo"));
        assert_eq!(send.request_id.as_deref(), Some("r1"));
        assert!(send.recipient_id.is_none());
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        assert!(serde_json::from_str::<ClientEvent>(r#"{"event":"explode","data":{}}"#).is_err());
    }

    #[test]
    fn test_server_event_envelope() {
        let ev = ServerEvent::MessageAck {
            request_id: "r1".into(),
            message_id: "m1".into(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "message-ack");
        assert_eq!(json["data"]["requestId"], "r1");
        assert_eq!(json["data"]["messageId"], "m1");
        assert_eq!(ev.name(), "message-ack");
    }
}
