//! Asynchronous command dispatcher.
//!
//! The dispatcher is a tokio task fed through an unbounded channel. Each
//! request carries a oneshot reply slot. Resolution happens in the loop, in
//! arrival order; execution is handed to the blocking pool so a slow handler
//! never holds up the requests behind it.

use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};

use crate::commands::{CommandResult, join_outcome};
use crate::registry::PluginRegistry;
use crate::{PluginError, Result};

type Reply = std::result::Result<Result<CommandResult>, JoinError>;

/// A queued command request.
struct DispatchRequest {
    caller: Option<String>,
    tag: String,
    tokens: Vec<String>,
    reply: oneshot::Sender<Reply>,
}

/// Cloneable handle for submitting commands to a running dispatcher.
#[derive(Clone, Debug)]
pub struct DispatcherHandle {
    tx: mpsc::UnboundedSender<DispatchRequest>,
}

impl DispatcherHandle {
    /// Submit a command and wait for its result.
    ///
    /// Resolution failures surface as [`PluginError::CommandNotFound`]; a
    /// handler panic is re-raised in the awaiting task.
    pub async fn execute(
        &self,
        caller: Option<String>,
        tag: impl Into<String>,
        tokens: Vec<String>,
    ) -> Result<CommandResult> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(DispatchRequest {
                caller,
                tag: tag.into(),
                tokens,
                reply,
            })
            .map_err(|_| PluginError::DispatcherClosed)?;

        let joined = rx.await.map_err(|_| PluginError::DispatcherClosed)?;
        join_outcome(joined)
    }

    /// Whether the dispatcher loop has exited.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Dispatcher loop state.
pub struct CommandDispatcher {
    registry: Weak<PluginRegistry>,
    rx: mpsc::UnboundedReceiver<DispatchRequest>,
}

impl CommandDispatcher {
    /// Start a dispatcher for `registry` on the current runtime.
    ///
    /// The handle is also attached to the registry (first dispatcher wins) so
    /// plugins reach it through their context.
    pub fn spawn(registry: &Arc<PluginRegistry>) -> (DispatcherHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = DispatcherHandle { tx };

        if !registry.attach_dispatcher(handle.clone()) {
            tracing::debug!("Registry already has a dispatcher; new one stays private");
        }

        let dispatcher = Self {
            registry: Arc::downgrade(registry),
            rx,
        };
        let task = tokio::spawn(dispatcher.run());

        (handle, task)
    }

    async fn run(mut self) {
        tracing::debug!("Command dispatcher started");

        while let Some(request) = self.rx.recv().await {
            let Some(registry) = self.registry.upgrade() else {
                let _ = request.reply.send(Ok(Err(PluginError::RegistryUnavailable)));
                break;
            };

            let caller = request.caller.as_deref().unwrap_or("host");
            let command = match registry.resolve(&request.tag) {
                Ok(command) => command,
                Err(e) => {
                    tracing::debug!("{} requested unknown command '{}'", caller, request.tag);
                    let _ = request.reply.send(Ok(Err(e)));
                    continue;
                }
            };

            tracing::debug!("{} dispatching command '{}'", caller, command.tag);

            let tokens = request.tokens;
            let work = tokio::task::spawn_blocking(move || command.execute(&tokens));
            let reply = request.reply;
            tokio::spawn(async move {
                let _ = reply.send(work.await);
            });
        }

        tracing::debug!("Command dispatcher stopped");
    }
}
