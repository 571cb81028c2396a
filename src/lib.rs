//! Direct messaging between street-food vendors and their suppliers.
//!
//! Messages are written through [`store::Store`] and pushed immediately to
//! every real-time connection joined to the conversation's rooms. Clients
//! without a live connection use the REST routes over the same store.
//!
//! ```text
//! REST /messages ──┐                ┌── room supplier-<id> ──> sockets
//!                  ├─> Manager ─> Hub
//! WS send-message ─┘     │          └── room order-<id> ─────> sockets
//!                        └─> Store (SQLite)
//! ```

pub mod chat;
pub mod config;
pub mod entity;
pub mod error;
pub mod hub;
pub mod identity;
pub mod interface;
pub mod manager;
pub mod order;
pub mod rooms;
pub mod store;

pub use config::{Config, IdentityMode};
pub use error::{ChatError, Result};
pub use hub::{Connection, Hub};
pub use interface::{router, AppState};
pub use manager::Manager;
pub use store::Store;

use identity::{BareIdentity, IdentityProvider, SupabaseIdentity};
use std::sync::Arc;

/// Wire up store, hub and identity provider into a ready-to-serve router.
pub async fn build_app(config: &Config) -> anyhow::Result<axum::Router> {
    let store = if config.database_url == "sqlite::memory:" {
        Store::in_memory().await?
    } else {
        Store::connect(&config.database_url).await?
    };
    store.init().await?;

    let identity: Arc<dyn IdentityProvider> = match &config.identity {
        IdentityMode::Bare => {
            tracing::warn!(
                "IDENTITY_MODE=bare: credentials are accepted as user ids without verification"
            );
            Arc::new(BareIdentity)
        }
        IdentityMode::Supabase { url, anon_key } => {
            Arc::new(SupabaseIdentity::new(url.clone(), anon_key.clone())?)
        }
    };

    let manager = Arc::new(Manager::new(
        store,
        Arc::new(Hub::new()),
        identity,
        config.realtime_require_auth,
    ));
    let state = Arc::new(AppState {
        manager,
        client_buffer: config.client_buffer,
    });

    Ok(router(state, config.cors_permissive))
}
