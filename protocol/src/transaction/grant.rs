//! Grant dispatch.
//!
//! Once a completion is durably stored, the controller renders the
//! product's commands and publishes them as a [`GrantOrder`] on a bounded
//! queue. A worker drains the queue and runs each command through an
//! [`ActionExecutor`]. Nothing flows back: executor failures are logged and
//! never reach the buyer or undo the completion.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::types::PlayerId;
use crate::catalog::{Product, PLACEHOLDER_PLAYER_NAME, PLACEHOLDER_PLAYER_UUID};

/// How long a publisher waits for queue space before giving up.
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum GrantError {
    #[error("grant queue is closed")]
    QueueClosed,

    #[error("grant queue is full")]
    QueueFull,

    #[error("executor connection failed: {0}")]
    Connection(String),

    #[error("executor rejected credentials")]
    AuthenticationFailed,

    #[error("executor protocol error: {0}")]
    Protocol(String),

    #[error("executor I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// Commands to run for one completed purchase, already rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GrantOrder {
    pub completion_id: Uuid,
    pub player_id: PlayerId,
    pub product_id: u32,
    pub commands: Vec<String>,
}

/// Resolves a player's display name for `{PLAYER_NAME}`.
pub trait PlayerDirectory: Send + Sync {
    fn display_name(&self, player: &PlayerId) -> Option<String>;
}

/// Directory that knows nobody. Names fall back to the UUID.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDirectory;

impl PlayerDirectory for NoDirectory {
    fn display_name(&self, _player: &PlayerId) -> Option<String> {
        None
    }
}

/// Substitutes the player placeholders in one command template.
pub fn render_action(template: &str, player: &PlayerId, name: &str) -> String {
    template
        .replace(PLACEHOLDER_PLAYER_UUID, &player.to_string())
        .replace(PLACEHOLDER_PLAYER_NAME, name)
}

/// Renders all of `product`'s commands, in catalog order.
pub fn render_commands(product: &Product, player: &PlayerId, name: Option<&str>) -> Vec<String> {
    let fallback = player.to_string();
    let name = name.unwrap_or(&fallback);
    product
        .commands
        .iter()
        .map(|template| render_action(template, player, name))
        .collect()
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// Sending half of the grant queue, held by the controller.
#[derive(Debug, Clone)]
pub struct GrantPublisher {
    tx: mpsc::Sender<GrantOrder>,
}

/// Receiving half of the grant queue, drained by the worker.
pub type GrantReceiver = mpsc::Receiver<GrantOrder>;

/// Creates a grant queue holding at most `capacity` orders.
pub fn grant_channel(capacity: usize) -> (GrantPublisher, GrantReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (GrantPublisher { tx }, rx)
}

impl GrantPublisher {
    /// Enqueues an order, waiting briefly if the queue is full.
    pub async fn publish(&self, order: GrantOrder) -> Result<(), GrantError> {
        self.tx
            .send_timeout(order, PUBLISH_TIMEOUT)
            .await
            .map_err(|e| match e {
                mpsc::error::SendTimeoutError::Timeout(_) => GrantError::QueueFull,
                mpsc::error::SendTimeoutError::Closed(_) => GrantError::QueueClosed,
            })
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// A privileged, console-equivalent command runner.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Opens a session for one order's commands.
    async fn open(&self) -> Result<Box<dyn ActionSession>, GrantError>;
}

/// A session running commands one at a time.
#[async_trait]
pub trait ActionSession: Send {
    /// Runs one command and returns the executor's response text.
    async fn run(&mut self, command: &str) -> Result<String, GrantError>;
}

/// Runs every order through `executor` until the queue closes.
pub async fn run_grant_worker(mut rx: GrantReceiver, executor: Arc<dyn ActionExecutor>) {
    while let Some(order) = rx.recv().await {
        execute_order(executor.as_ref(), &order).await;
    }
    tracing::info!("grant queue closed, worker exiting");
}

/// Spawns [`run_grant_worker`] on the current runtime.
pub fn spawn_grant_worker(rx: GrantReceiver, executor: Arc<dyn ActionExecutor>) -> JoinHandle<()> {
    tokio::spawn(run_grant_worker(rx, executor))
}

async fn execute_order(executor: &dyn ActionExecutor, order: &GrantOrder) {
    tracing::info!(
        completion_id = %order.completion_id,
        player = %order.player_id,
        product = order.product_id,
        commands = order.commands.len(),
        "executing grant"
    );

    let mut session = match executor.open().await {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(
                completion_id = %order.completion_id,
                player = %order.player_id,
                error = %e,
                dropped = ?order.commands,
                "grant executor unavailable"
            );
            return;
        }
    };

    for command in &order.commands {
        match session.run(command).await {
            Ok(response) => tracing::debug!(
                completion_id = %order.completion_id,
                command = %command,
                response = %response,
                "grant command executed"
            ),
            Err(e) => tracing::error!(
                completion_id = %order.completion_id,
                player = %order.player_id,
                command = %command,
                error = %e,
                "grant command failed"
            ),
        }
    }
}
