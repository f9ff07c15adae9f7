//! JSON wire protocol spoken over the WebSocket gateway.
//!
//! Events are adjacently tagged: `{"event": "sendMessage", "data": {...}}`.
//! Payload fields are camelCase. Room ids and message ids travel as bare
//! strings inside `data`, matching the transport contract.

use serde::{Deserialize, Serialize};

use crate::message::MessageView;
use crate::types::{GroupId, MessageId, RoomId, UserId};

/// Events a client sends to the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    SendMessage(SendMessagePayload),
    JoinRoom(RoomId),
    LeaveRoom(RoomId),
    Typing(TypingPayload),
    MessageDelivered(MessageId),
    MessageRead(MessageId),
}

/// Events the server pushes to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Full set of currently online user ids, broadcast to everyone on any
    /// presence change.
    OnlineUsers(Vec<UserId>),
    /// An expanded message addressed to this connection's rooms.
    ReceiveMessage(MessageView),
    /// Delivery/seen transition for a message this user sent.
    MessageStatus(MessageStatusPayload),
    /// A message gained a seen receipt; carries the re-expanded record.
    MessageSeen(MessageView),
    Typing(TypingNotice),
    /// A message was deleted by its sender.
    MessageDeleted(MessageDeletedPayload),
    /// Acknowledgement for a `sendMessage` issued on this connection.
    SendAck(SendAck),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub sender: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<GroupId>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
    /// Client-generated correlation token, echoed back in the ack so the
    /// sender can resolve its optimistic entry without heuristics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub to_user_id: UserId,
    pub from_user_id: UserId,
    pub typing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    pub typing: bool,
    pub from_user_id: UserId,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    Delivered,
    Seen,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageStatusPayload {
    pub message_id: MessageId,
    pub status: DeliveryState,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeletedPayload {
    pub message_id: MessageId,
}

/// Result of a `sendMessage`: either the expanded record (with a delivered
/// flag for directs) or an error string. The ack is the sole channel for
/// send-path errors back to the initiating client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SendAck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<MessageView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SendAck {
    pub fn ok(local_id: Option<String>, data: MessageView, delivered: Option<bool>) -> Self {
        Self {
            local_id,
            success: true,
            data: Some(data),
            delivered,
            error: None,
        }
    }

    pub fn err(local_id: Option<String>, error: impl Into<String>) -> Self {
        Self {
            local_id,
            success: false,
            data: None,
            delivered: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_tags() {
        let user = UserId::new();
        let event = ClientEvent::SendMessage(SendMessagePayload {
            sender: user,
            receiver: Some(UserId::new()),
            group: None,
            text: Some("hello".into()),
            reply_to: None,
            local_id: Some("local-1".into()),
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "sendMessage");
        assert_eq!(json["data"]["sender"], user.to_string());
        assert_eq!(json["data"]["localId"], "local-1");

        let back: ClientEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_join_room_payload_is_a_bare_string() {
        let room = RoomId::user(&UserId::new());
        let json = serde_json::to_value(ClientEvent::JoinRoom(room.clone())).unwrap();

        assert_eq!(json["event"], "joinRoom");
        assert_eq!(json["data"], room.as_str());
    }

    #[test]
    fn test_message_delivered_payload_is_a_bare_id() {
        let id = MessageId::new();
        let json = serde_json::to_value(ClientEvent::MessageDelivered(id)).unwrap();

        assert_eq!(json["event"], "messageDelivered");
        assert_eq!(json["data"], id.to_string());
    }

    #[test]
    fn test_status_event_roundtrip() {
        let event = ServerEvent::MessageStatus(MessageStatusPayload {
            message_id: MessageId::new(),
            status: DeliveryState::Seen,
        });

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"status\":\"seen\""));

        let back: ServerEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_failed_ack_carries_only_the_error() {
        let ack = SendAck::err(None, "Invalid payload");
        let json = serde_json::to_value(&ack).unwrap();

        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "Invalid payload");
        assert!(json.get("data").is_none());
        assert!(json.get("delivered").is_none());
    }
}
