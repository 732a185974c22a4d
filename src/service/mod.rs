//! Distributor service.
//!
//! # Data Flow
//! ```text
//! DistributorHandle ──Command──▶ ┌───────────────────┐
//!                                │ DistributorActor  │──newconn──▶ worker transport
//! ListenerBinding ──Event──────▶ │ (dispatcher owner)│◀──Reply─── AckPromise / handle.reply
//!                                └───────────────────┘
//! ```
//!
//! # Design Decisions
//! - A single task owns all distributor state; every mutation is a message
//! - The listener is bound lazily by the first `add` and released when the
//!   last worker is removed
//! - Stops on the shutdown broadcast or when every handle is dropped

pub mod actor;
pub mod handle;
pub mod transport;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::config::DistributorConfig;
use crate::net::ListenerBinding;

pub use handle::{BindNotice, DistributorError, DistributorHandle, DistributorStats};
pub use transport::{AckPromise, ChannelWorker, Handoff};

use actor::DistributorActor;

/// Entry point for starting a distributor.
pub struct Distributor;

impl Distributor {
    /// Start the distributor task for `config`.
    ///
    /// Nothing is bound until the first worker is added.
    pub fn spawn(config: &DistributorConfig, shutdown: broadcast::Receiver<()>) -> (DistributorHandle, JoinHandle<()>) {
        let listener = config
            .listener
            .bind_target()
            .map(|target| ListenerBinding::new(target, config.listener.max_pending));
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let actor = DistributorActor::new(
            config.distributor_key(),
            config.listener.max_pending,
            listener,
            commands_rx,
        );
        let task = tokio::spawn(actor.run(shutdown));

        (DistributorHandle::new(commands_tx), task)
    }
}
