//! The operator API: command channel and notification channel
//!
//! Two TCP servers work in tandem.  The command channel (default port 8001)
//! speaks the line-oriented operator protocol; the notification channel
//! (default port 8002) pushes event deltas to clients that have tied
//! themselves to it with NTIE.

pub mod auth;
pub mod legacy;
pub mod notify;

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::error::{ZinoError, ZinoResult};
use crate::runtime::Runtime;
use notify::NotificationRegistry;

pub struct ZinoServer {
    runtime: Arc<Runtime>,
    pub notifications: Arc<NotificationRegistry>,
}

impl ZinoServer {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self {
            runtime,
            notifications: Arc::new(NotificationRegistry::new()),
        }
    }

    /// Hooks the notification fan-out into the event store.  Every commit
    /// from now on produces deltas on all tied channels.
    pub fn register_event_observer(&self) {
        let registry = self.notifications.clone();
        let mut state = self.runtime.state.write();
        state.events.add_observer(Box::new(move |new_event, old_event, changed| {
            let notifications =
                NotificationRegistry::build_notifications(new_event, old_event, changed);
            registry.send_notifications(&notifications);
        }));
    }

    /// Binds both listeners and serves forever.  Failure to bind either
    /// port is fatal.
    pub async fn serve(self) -> ZinoResult<()> {
        let listen = &self.runtime.config().listen;
        let api_address = format!("{}:{}", listen.address, listen.api_port);
        let notify_address = format!("{}:{}", listen.address, listen.notify_port);

        let api_listener = TcpListener::bind(&api_address)
            .await
            .map_err(|error| ZinoError::Fatal(format!("cannot bind {}: {}", api_address, error)))?;
        let notify_listener = TcpListener::bind(&notify_address).await.map_err(|error| {
            ZinoError::Fatal(format!("cannot bind {}: {}", notify_address, error))
        })?;
        info!("serving API on {}", api_address);
        info!("serving notifications on {}", notify_address);

        self.register_event_observer();
        tokio::spawn(notify::serve(notify_listener, self.notifications.clone()));

        loop {
            let (stream, peer) = match api_listener.accept().await {
                Ok(accepted) => accepted,
                Err(error) => {
                    warn!("API accept failed: {}", error);
                    continue;
                }
            };
            debug!("new server connection from {}", peer);
            let session =
                legacy::Session::new(stream, self.runtime.clone(), self.notifications.clone());
            tokio::spawn(async move {
                if let Err(error) = session.run().await {
                    debug!("connection from {} ended: {}", peer, error);
                }
            });
        }
    }
}
