use crate::{
    chat::{ConversationPage, ConversationSummary, Message, NewMessage},
    entity::{OrderContext, OrderId, UserId},
    error::{ChatError, Result},
    order::{Order, OrderStatus},
};
use anyhow::Context;
use chrono::Utc;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    ConnectOptions, Row, SqlitePool,
};
use std::{collections::HashSet, path::Path, str::FromStr};
use uuid::Uuid;

const MESSAGE_COLUMNS: &str =
    "id, body, author_id, counterparty_id, order_id, recipient_id, read, created_at";

/// Gateway between message/order operations and the relational store.
///
/// Every write is a single statement or a single-predicate bulk update. The
/// one multi-statement operation, read-on-view, starts with its write.
#[derive(Clone, Debug)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Connect to the database at `db_url` (`sqlite://...`).
    /// The database file and its parent directory are created if missing.
    pub async fn connect(db_url: &str) -> anyhow::Result<Self> {
        if let Some(path) = db_url.strip_prefix("sqlite://") {
            let path = path.split('?').next().unwrap_or(path);
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent)
                        .context("Failed to create database directory")?;
                }
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .log_statements(tracing::log::LevelFilter::Trace);

        let pool = SqlitePool::connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        Ok(Self { pool })
    }

    /// A private in-memory database. All queries share one connection so the
    /// data survives for the lifetime of the pool.
    pub async fn in_memory() -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?
            .log_statements(tracing::log::LevelFilter::Trace);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("Failed to open in-memory SQLite database")?;
        Ok(Self { pool })
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                body TEXT NOT NULL,
                author_id TEXT NOT NULL,
                counterparty_id TEXT NOT NULL,
                order_id TEXT,
                recipient_id TEXT NOT NULL,
                read INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_pair
                ON messages(author_id, recipient_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_messages_unread
                ON messages(recipient_id, read);

            CREATE TABLE IF NOT EXISTS orders (
                id TEXT PRIMARY KEY,
                vendor_id TEXT NOT NULL,
                supplier_id TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to initialize database schema")?;

        Ok(())
    }

    /// Persist a new unread message and return the stored row.
    pub async fn create_message(&self, new: NewMessage) -> Result<Message> {
        let body = new.body.trim();
        if body.is_empty() {
            return Err(ChatError::validation("Message text is required"));
        }
        if new.counterparty_id.as_str().is_empty() || new.recipient_id.as_str().is_empty() {
            return Err(ChatError::validation(
                "Counterparty ID and recipient ID are required",
            ));
        }

        if let OrderContext::Specific(order_id) = &new.order_context {
            let order = self
                .get_order(order_id)
                .await?
                .ok_or_else(|| ChatError::NotFound(format!("Order {} not found", order_id)))?;
            if !order.is_between(&new.author_id, &new.counterparty_id) {
                return Err(ChatError::Forbidden(format!(
                    "Order {} is not shared by both participants",
                    order_id
                )));
            }
        }

        let msg = Message {
            id: Uuid::new_v4().to_string(),
            body: body.to_string(),
            author_id: new.author_id,
            counterparty_id: new.counterparty_id,
            order_context: new.order_context,
            recipient_id: new.recipient_id,
            read: false,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO messages (id, body, author_id, counterparty_id, order_id, recipient_id, read, created_at)
            VALUES (?, ?, ?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(&msg.id)
        .bind(&msg.body)
        .bind(msg.author_id.as_str())
        .bind(msg.counterparty_id.as_str())
        .bind(msg.order_context.order_id().map(OrderId::as_str))
        .bind(msg.recipient_id.as_str())
        .bind(msg.created_at)
        .execute(&self.pool)
        .await?;

        Ok(msg)
    }

    /// Messages exchanged between `user` and `counterparty` in `context`,
    /// oldest first.
    ///
    /// Messages addressed to `user` that were unread are flipped to read in the
    /// same transaction. The returned rows reflect their state before the flip.
    pub async fn list_messages(
        &self,
        user: &UserId,
        counterparty: &UserId,
        context: &OrderContext,
    ) -> Result<ConversationPage> {
        let order_id = context.order_id().map(OrderId::as_str);
        let mut tx = self.pool.begin().await?;

        // Write first so the transaction takes the write lock up front instead
        // of upgrading a read lock, which SQLite refuses under contention.
        let flipped: HashSet<String> = sqlx::query_scalar::<_, String>(
            r#"
            UPDATE messages SET read = 1
            WHERE recipient_id = ?1 AND author_id = ?2 AND order_id IS ?3 AND read = 0
            RETURNING id
            "#,
        )
        .bind(user.as_str())
        .bind(counterparty.as_str())
        .bind(order_id)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .collect();

        let rows = sqlx::query(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
            FROM messages
            WHERE ((author_id = ?1 AND recipient_id = ?2) OR (author_id = ?2 AND recipient_id = ?1))
              AND order_id IS ?3
            ORDER BY created_at ASC, seq ASC
            "#
        ))
        .bind(user.as_str())
        .bind(counterparty.as_str())
        .bind(order_id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let messages = rows
            .iter()
            .map(|row| -> Result<Message> {
                let mut msg = message_from_row(row)?;
                if flipped.contains(&msg.id) {
                    msg.read = false;
                }
                Ok(msg)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ConversationPage {
            messages,
            newly_read: flipped.len(),
        })
    }

    /// Mark every unread message from `counterparty` to `user` as read.
    /// Returns the number of messages flipped; a repeat call returns 0.
    pub async fn mark_all_read(&self, user: &UserId, counterparty: &UserId) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE messages SET read = 1
            WHERE recipient_id = ? AND author_id = ? AND read = 0
            "#,
        )
        .bind(user.as_str())
        .bind(counterparty.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn unread_count(&self, user: &UserId) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE recipient_id = ? AND read = 0")
                .bind(user.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// One entry per (counterparty, order context) the user has exchanged
    /// messages in, most recently active first.
    pub async fn conversation_summaries(&self, user: &UserId) -> Result<Vec<ConversationSummary>> {
        let rows = sqlx::query(&format!(
            r#"
            WITH mine AS (
                SELECT {MESSAGE_COLUMNS}, seq,
                       CASE WHEN author_id = ?1 THEN recipient_id ELSE author_id END AS other_id
                FROM messages
                WHERE author_id = ?1 OR recipient_id = ?1
            ),
            ranked AS (
                SELECT *,
                       ROW_NUMBER() OVER (
                           PARTITION BY other_id, order_id
                           ORDER BY created_at DESC, seq DESC
                       ) AS rn,
                       SUM(CASE WHEN recipient_id = ?1 AND read = 0 THEN 1 ELSE 0 END) OVER (
                           PARTITION BY other_id, order_id
                       ) AS unread_count
                FROM mine
            )
            SELECT {MESSAGE_COLUMNS}, unread_count
            FROM ranked
            WHERE rn = 1
            ORDER BY created_at DESC, seq DESC
            "#
        ))
        .bind(user.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<ConversationSummary> {
                let msg = message_from_row(row)?;
                Ok(ConversationSummary {
                    counterparty_id: msg.other_party(user).clone(),
                    order_id: msg.order_context.clone(),
                    last_message: msg.view_for(user),
                    unread_count: row.try_get("unread_count")?,
                })
            })
            .collect()
    }

    pub async fn create_order(&self, vendor: &UserId, supplier: &UserId) -> Result<Order> {
        let now = Utc::now();
        let order = Order {
            id: OrderId::new(Uuid::new_v4().to_string()),
            vendor_id: vendor.clone(),
            supplier_id: supplier.clone(),
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO orders (id, vendor_id, supplier_id, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(order.id.as_str())
        .bind(order.vendor_id.as_str())
        .bind(order.supplier_id.as_str())
        .bind(order.status.as_str())
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(order)
    }

    pub async fn get_order(&self, id: &OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(
            "SELECT id, vendor_id, supplier_id, status, created_at, updated_at FROM orders WHERE id = ?",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(order_from_row).transpose()
    }

    /// Set the order's status. Returns `None` if the order does not exist.
    pub async fn update_order_status(
        &self,
        id: &OrderId,
        status: OrderStatus,
    ) -> Result<Option<Order>> {
        let result = sqlx::query("UPDATE orders SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now())
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_order(id).await
    }
}

fn message_from_row(row: &SqliteRow) -> Result<Message> {
    let order_id: Option<String> = row.try_get("order_id")?;
    Ok(Message {
        id: row.try_get("id")?,
        body: row.try_get("body")?,
        author_id: UserId::new(row.try_get::<String, _>("author_id")?),
        counterparty_id: UserId::new(row.try_get::<String, _>("counterparty_id")?),
        order_context: OrderContext::from(order_id.map(OrderId::new)),
        recipient_id: UserId::new(row.try_get::<String, _>("recipient_id")?),
        read: row.try_get("read")?,
        created_at: row.try_get("created_at")?,
    })
}

fn order_from_row(row: &SqliteRow) -> Result<Order> {
    let status: String = row.try_get("status")?;
    Ok(Order {
        id: OrderId::new(row.try_get::<String, _>("id")?),
        vendor_id: UserId::new(row.try_get::<String, _>("vendor_id")?),
        supplier_id: UserId::new(row.try_get::<String, _>("supplier_id")?),
        status: status.parse().map_err(ChatError::Internal)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
