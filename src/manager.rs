use crate::{
    chat::{ConversationSummary, Message, NewMessage},
    entity::{OrderContext, OrderId, UserId},
    error::{ChatError, Result},
    hub::{Connection, Hub},
    identity::IdentityProvider,
    interface::protocol::{ClientEvent, MessageEvent, ReadReceipt, SendMessage, ServerEvent},
    order::{Order, OrderStatus, StatusUpdate},
    rooms::RoomKey,
    store::Store,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Coordinates the message store and the fan-out hub.
///
/// Both the REST facade and the real-time sessions go through here, so a
/// write from either path is persisted once and broadcast to the same rooms.
pub struct Manager {
    store: Store,
    hub: Arc<Hub>,
    identity: Arc<dyn IdentityProvider>,
    require_auth: bool,
}

impl Manager {
    pub fn new(
        store: Store,
        hub: Arc<Hub>,
        identity: Arc<dyn IdentityProvider>,
        require_auth: bool,
    ) -> Self {
        Self {
            store,
            hub,
            identity,
            require_auth,
        }
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    pub async fn authenticate(&self, token: Option<&str>) -> Result<UserId> {
        let token = token.ok_or_else(|| ChatError::Auth("No token provided".into()))?;
        self.identity.verify_token(token).await
    }

    /// Resolve the connect-time credential of a real-time session.
    ///
    /// A missing or rejected credential does not refuse the connection; the
    /// session simply stays unbound.
    pub async fn bind_session(&self, token: Option<&str>) -> Option<UserId> {
        match self.authenticate(token).await {
            Ok(user) => Some(user),
            Err(e) => {
                debug!("Real-time session left unbound: {}", e);
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    /// Persist a message and fan it out to its rooms.
    pub async fn send_message(&self, new: NewMessage) -> Result<Message> {
        let msg = self.store.create_message(new).await?;
        let event = ServerEvent::NewMessage(MessageEvent::from(&msg));
        for room in RoomKey::for_message(&msg.counterparty_id, &msg.order_context) {
            self.hub.broadcast(&room, &event);
        }
        info!(
            "Message {} from {} to {} ({})",
            msg.id, msg.author_id, msg.recipient_id, msg.order_context
        );
        Ok(msg)
    }

    /// Open a conversation. Viewing it reads everything `counterparty` sent
    /// in this context, so the counterparty's room gets a receipt when any
    /// message changed state.
    pub async fn list_messages(
        &self,
        user: &UserId,
        counterparty: &UserId,
        context: &OrderContext,
    ) -> Result<Vec<Message>> {
        let page = self.store.list_messages(user, counterparty, context).await?;
        if page.newly_read > 0 {
            self.broadcast_receipt(user, counterparty);
            debug!(
                "{} viewed and read {} messages from {} ({})",
                user, page.newly_read, counterparty, context
            );
        }
        Ok(page.messages)
    }

    /// Mark everything `counterparty` sent to `user` as read and tell the
    /// counterparty's room.
    pub async fn mark_read(&self, user: &UserId, counterparty: &UserId) -> Result<u64> {
        let count = self.store.mark_all_read(user, counterparty).await?;
        self.broadcast_receipt(user, counterparty);
        debug!("{} read {} messages from {}", user, count, counterparty);
        Ok(count)
    }

    fn broadcast_receipt(&self, user: &UserId, counterparty: &UserId) {
        let event = ServerEvent::MessagesRead(ReadReceipt {
            counterparty_id: counterparty.clone(),
            user_id: user.clone(),
            timestamp: Utc::now(),
        });
        self.hub
            .broadcast(&RoomKey::for_counterparty(counterparty), &event);
    }

    pub async fn conversations(&self, user: &UserId) -> Result<Vec<ConversationSummary>> {
        self.store.conversation_summaries(user).await
    }

    pub async fn unread_count(&self, user: &UserId) -> Result<i64> {
        self.store.unread_count(user).await
    }

    // ------------------------------------------------------------------
    // Orders
    // ------------------------------------------------------------------

    pub async fn create_order(&self, vendor: &UserId, supplier: &UserId) -> Result<Order> {
        if vendor == supplier {
            return Err(ChatError::validation(
                "Vendor and supplier must be different users",
            ));
        }
        let order = self.store.create_order(vendor, supplier).await?;
        info!("Order {} created by {} with {}", order.id, vendor, supplier);
        Ok(order)
    }

    /// Fetch an order the caller is a party to.
    pub async fn order_for(&self, user: &UserId, id: &OrderId) -> Result<Order> {
        let order = self
            .store
            .get_order(id)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("Order {} not found", id)))?;
        if !order.involves(user) {
            return Err(ChatError::Forbidden(format!(
                "Not a participant of order {}",
                id
            )));
        }
        Ok(order)
    }

    /// Change an order's status and push `status-update` to its room.
    pub async fn update_order_status(
        &self,
        user: &UserId,
        id: &OrderId,
        status: OrderStatus,
        message: Option<String>,
    ) -> Result<Order> {
        self.order_for(user, id).await?;
        let order = self
            .store
            .update_order_status(id, status)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("Order {} not found", id)))?;

        let update = StatusUpdate {
            order_id: order.id.clone(),
            status,
            message: message.unwrap_or_else(|| format!("Order is now {}", status)),
            timestamp: order.updated_at,
        };
        self.hub
            .broadcast(&RoomKey::for_order(&order.id), &ServerEvent::StatusUpdate(update));
        info!("Order {} moved to {} by {}", order.id, status, user);
        Ok(order)
    }

    // ------------------------------------------------------------------
    // Real-time events
    // ------------------------------------------------------------------

    /// Handle one decoded event from a real-time connection.
    ///
    /// Nothing is returned to the caller: failures are logged and, unless the
    /// sender asked for an acknowledgment, never reported back.
    pub async fn handle_client_event(&self, conn: &Arc<Connection>, event: ClientEvent) {
        if self.require_auth && !conn.is_bound() {
            warn!("Dropping event from unbound connection {}", conn.id);
            if let ClientEvent::SendMessage(SendMessage {
                request_id: Some(request_id),
                ..
            }) = &event
            {
                self.reply_error(conn, request_id, "Authentication required");
            }
            return;
        }

        match event {
            ClientEvent::JoinOrderRoom(order_id) => {
                self.hub.join(&conn.id, &RoomKey::for_order(&order_id));
            }
            ClientEvent::LeaveOrderRoom(order_id) => {
                self.hub.leave(&conn.id, &RoomKey::for_order(&order_id));
            }
            ClientEvent::JoinSupplierChat(counterparty) => {
                self.hub
                    .join(&conn.id, &RoomKey::for_counterparty(&counterparty));
            }
            ClientEvent::LeaveSupplierChat(counterparty) => {
                self.hub
                    .leave(&conn.id, &RoomKey::for_counterparty(&counterparty));
            }
            ClientEvent::SendMessage(send) => self.handle_incoming_message(conn, send).await,
            ClientEvent::MarkMessagesRead(mark) => {
                let Some(user) = &conn.user else {
                    warn!("Dropping mark-messages-read from unbound connection {}", conn.id);
                    return;
                };
                if let Err(e) = self.mark_read(user, &mark.counterparty_id).await {
                    warn!("Failed to mark messages read for {}: {}", user, e);
                }
            }
        }
    }

    /// Validate, persist and fan out a `send-message` event.
    pub async fn handle_incoming_message(&self, conn: &Arc<Connection>, send: SendMessage) {
        let request_id = send.request_id.clone();
        match self.accept_incoming(conn, send).await {
            Ok(msg) => {
                if let Some(request_id) = request_id {
                    let ack = ServerEvent::MessageAck {
                        request_id,
                        message_id: msg.id,
                    };
                    if let Err(e) = conn.send(ack) {
                        debug!("Failed to ack {}: {}", conn.id, e);
                    }
                }
            }
            Err(e) => {
                warn!("Dropping send-message from {}: {}", conn.id, e);
                if let Some(request_id) = request_id {
                    self.reply_error(conn, &request_id, &e.to_string());
                }
            }
        }
    }

    async fn accept_incoming(&self, conn: &Connection, send: SendMessage) -> Result<Message> {
        let author = conn
            .user
            .clone()
            .ok_or_else(|| ChatError::Auth("Connection has no bound identity".into()))?;
        let counterparty = send
            .counterparty_id
            .ok_or_else(|| ChatError::validation("Counterparty ID is required"))?;
        let body = send
            .message
            .as_ref()
            .map(|m| m.text().to_string())
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| ChatError::validation("Message text is required"))?;

        let new = NewMessage {
            author_id: author,
            recipient_id: send.recipient_id.unwrap_or_else(|| counterparty.clone()),
            counterparty_id: counterparty,
            order_context: send.order_id,
            body,
        };
        self.send_message(new).await
    }

    fn reply_error(&self, conn: &Connection, request_id: &str, message: &str) {
        let event = ServerEvent::MessageError {
            request_id: request_id.to_string(),
            message: message.to_string(),
        };
        if let Err(e) = conn.send(event) {
            debug!("Failed to send error to {}: {}", conn.id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{identity::BareIdentity, interface::protocol::MessageBody};
    use tokio::sync::mpsc::Receiver;

    async fn manager(require_auth: bool) -> Manager {
        let store = Store::in_memory().await.unwrap();
        store.init().await.unwrap();
        Manager::new(
            store,
            Arc::new(Hub::new()),
            Arc::new(BareIdentity),
            require_auth,
        )
    }

    fn connect(mgr: &Manager, user: Option<&str>) -> (Arc<Connection>, Receiver<ServerEvent>) {
        let (conn, rx) = Connection::channel(user.map(UserId::new), 16);
        mgr.hub().register(conn.clone());
        (conn, rx)
    }

    fn send_hi(counterparty: &str) -> SendMessage {
        SendMessage {
            counterparty_id: Some(UserId::new(counterparty)),
            message: Some(MessageBody::Object { text: "hi".into() }),
            recipient_id: Some(UserId::new(counterparty)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_send_message_reaches_only_joined_room() {
        let mgr = manager(false).await;
        let (x, mut rx_x) = connect(&mgr, Some("7"));
        let (y, mut rx_y) = connect(&mgr, Some("42"));
        let (z, mut rx_z) = connect(&mgr, Some("99"));

        for (conn, room) in [(&x, "42"), (&y, "42"), (&z, "99")] {
            mgr.handle_client_event(conn, ClientEvent::JoinSupplierChat(UserId::new(room)))
                .await;
        }

        mgr.handle_client_event(&x, ClientEvent::SendMessage(send_hi("42")))
            .await;

        match rx_y.try_recv().unwrap() {
            ServerEvent::NewMessage(ev) => {
                assert_eq!(ev.text, "hi");
                assert_eq!(ev.sender_id, UserId::new("7"));
                assert!(!ev.read);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(rx_x.try_recv(), Ok(ServerEvent::NewMessage(_))));
        assert!(rx_z.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_order_message_also_reaches_order_room() {
        let mgr = manager(false).await;
        let order = mgr
            .create_order(&UserId::new("1"), &UserId::new("2"))
            .await
            .unwrap();
        let (vendor, _rx_v) = connect(&mgr, Some("1"));
        let (watcher, mut rx_w) = connect(&mgr, Some("2"));
        mgr.handle_client_event(&watcher, ClientEvent::JoinOrderRoom(order.id.clone()))
            .await;

        let mut send = send_hi("2");
        send.order_id = OrderContext::Specific(order.id.clone());
        mgr.handle_client_event(&vendor, ClientEvent::SendMessage(send))
            .await;

        match rx_w.try_recv().unwrap() {
            ServerEvent::NewMessage(ev) => {
                assert_eq!(ev.order_id, OrderContext::Specific(order.id))
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_send_is_silently_dropped() {
        let mgr = manager(false).await;
        let (conn, mut rx) = connect(&mgr, Some("1"));
        mgr.handle_client_event(&conn, ClientEvent::JoinSupplierChat(UserId::new("2")))
            .await;

        let mut send = send_hi("2");
        send.message = Some(MessageBody::Text("   ".into()));
        mgr.handle_client_event(&conn, ClientEvent::SendMessage(send))
            .await;

        assert!(rx.try_recv().is_err());
        assert_eq!(mgr.unread_count(&UserId::new("2")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unbound_sender_is_dropped_but_may_join() {
        let mgr = manager(false).await;
        let (anon, mut rx) = connect(&mgr, None);
        mgr.handle_client_event(&anon, ClientEvent::JoinSupplierChat(UserId::new("2")))
            .await;
        assert_eq!(mgr.hub().room_count(), 1);

        mgr.handle_client_event(&anon, ClientEvent::SendMessage(send_hi("2")))
            .await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_request_id_gets_ack_or_error() {
        let mgr = manager(false).await;
        let (conn, mut rx) = connect(&mgr, Some("1"));

        let mut ok = send_hi("2");
        ok.request_id = Some("r1".into());
        mgr.handle_client_event(&conn, ClientEvent::SendMessage(ok))
            .await;
        assert!(matches!(
            rx.try_recv(),
            Ok(ServerEvent::MessageAck { request_id, .. }) if request_id == "r1"
        ));

        let bad = SendMessage {
            request_id: Some("r2".into()),
            ..Default::default()
        };
        mgr.handle_client_event(&conn, ClientEvent::SendMessage(bad))
            .await;
        assert!(matches!(
            rx.try_recv(),
            Ok(ServerEvent::MessageError { request_id, .. }) if request_id == "r2"
        ));
    }

    #[tokio::test]
    async fn test_require_auth_blocks_unbound_joins() {
        let mgr = manager(true).await;
        let (anon, _rx) = connect(&mgr, None);
        mgr.handle_client_event(&anon, ClientEvent::JoinSupplierChat(UserId::new("2")))
            .await;
        assert_eq!(mgr.hub().room_count(), 0);
    }

    #[tokio::test]
    async fn test_mark_read_broadcasts_receipt() {
        let mgr = manager(false).await;
        mgr.send_message(NewMessage::direct(
            UserId::new("1"),
            UserId::new("2"),
            OrderContext::General,
            "hello",
        ))
        .await
        .unwrap();

        let (sender_tab, mut rx) = connect(&mgr, Some("1"));
        mgr.hub()
            .join(&sender_tab.id, &RoomKey::for_counterparty(&UserId::new("1")));

        let (reader, _rx_reader) = connect(&mgr, Some("2"));
        mgr.handle_client_event(
            &reader,
            ClientEvent::MarkMessagesRead(crate::interface::protocol::MarkRead {
                counterparty_id: UserId::new("1"),
            }),
        )
        .await;

        match rx.try_recv().unwrap() {
            ServerEvent::MessagesRead(receipt) => {
                assert_eq!(receipt.user_id, UserId::new("2"));
                assert_eq!(receipt.counterparty_id, UserId::new("1"));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(mgr.unread_count(&UserId::new("2")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_viewing_conversation_broadcasts_receipt_once() {
        let mgr = manager(false).await;
        mgr.send_message(NewMessage::direct(
            UserId::new("1"),
            UserId::new("2"),
            OrderContext::General,
            "hello",
        ))
        .await
        .unwrap();

        let (sender_tab, mut rx) = connect(&mgr, Some("1"));
        mgr.hub()
            .join(&sender_tab.id, &RoomKey::for_counterparty(&UserId::new("1")));

        let listed = mgr
            .list_messages(&UserId::new("2"), &UserId::new("1"), &OrderContext::General)
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert!(!listed[0].read);

        match rx.try_recv().unwrap() {
            ServerEvent::MessagesRead(receipt) => {
                assert_eq!(receipt.user_id, UserId::new("2"));
                assert_eq!(receipt.counterparty_id, UserId::new("1"));
            }
            other => panic!("unexpected event {:?}", other),
        }

        // Nothing left to flip: no second receipt.
        mgr.list_messages(&UserId::new("2"), &UserId::new("1"), &OrderContext::General)
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());

        // The author viewing their own outgoing messages flips nothing.
        mgr.list_messages(&UserId::new("1"), &UserId::new("2"), &OrderContext::General)
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_status_update_requires_participant() {
        let mgr = manager(false).await;
        let order = mgr
            .create_order(&UserId::new("1"), &UserId::new("2"))
            .await
            .unwrap();
        let (watcher, mut rx) = connect(&mgr, Some("1"));
        mgr.hub().join(&watcher.id, &RoomKey::for_order(&order.id));

        let err = mgr
            .update_order_status(&UserId::new("3"), &order.id, OrderStatus::Confirmed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Forbidden(_)));
        assert!(rx.try_recv().is_err());

        mgr.update_order_status(&UserId::new("2"), &order.id, OrderStatus::Confirmed, None)
            .await
            .unwrap();
        match rx.try_recv().unwrap() {
            ServerEvent::StatusUpdate(update) => {
                assert_eq!(update.status, OrderStatus::Confirmed);
                assert_eq!(update.message, "Order is now confirmed");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
