// src/server/context.rs

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinSet;

use crate::app::AppCore;

/// Holds the wired-up core plus everything needed to run and gracefully
/// stop its background tasks.
pub struct ServerContext {
    pub core: Arc<AppCore>,
    pub shutdown_tx: broadcast::Sender<()>,
    pub background_tasks: JoinSet<()>,
}

impl ServerContext {
    pub fn new(core: Arc<AppCore>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            core,
            shutdown_tx,
            background_tasks: JoinSet::new(),
        }
    }

    /// Broadcasts shutdown to every background task and waits for them
    /// all to exit.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(());
        while self.background_tasks.join_next().await.is_some() {}
    }
}
