//! The distributor actor.
//!
//! Owns the dispatcher, the listener binding and the callers waiting on the
//! bind. Commands and listener events are handled one at a time, which is
//! what keeps relocation atomic with respect to accepts and replies.

use tokio::sync::{broadcast, mpsc, oneshot};

use crate::distributor::Dispatcher;
use crate::net::{BindError, Connection, ListenerBinding, ListenerEvent, SockName};
use crate::observability::metrics;
use crate::service::handle::{BindNotice, BoxedTransport, Command, DistributorError, DistributorStats};

type BindWaiter = oneshot::Sender<Result<SockName, BindError>>;

pub(crate) struct DistributorActor {
    dispatcher: Dispatcher<Connection, BoxedTransport>,
    /// `None` when no address, port or fd was configured.
    listener: Option<ListenerBinding>,
    bind_waiters: Vec<BindWaiter>,
    commands: mpsc::UnboundedReceiver<Command>,
    events_tx: mpsc::UnboundedSender<ListenerEvent>,
    events_rx: mpsc::UnboundedReceiver<ListenerEvent>,
}

impl DistributorActor {
    pub(crate) fn new(
        key: String,
        max_pending: usize,
        listener: Option<ListenerBinding>,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            dispatcher: Dispatcher::new(key).with_max_pending(max_pending),
            listener,
            bind_waiters: Vec::new(),
            commands,
            events_tx,
            events_rx,
        }
    }

    pub(crate) async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(key = self.dispatcher.key(), "Distributor started");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        tracing::debug!("All distributor handles dropped");
                        break;
                    }
                },
                Some(event) = self.events_rx.recv() => self.handle_event(event),
                _ = shutdown.recv() => {
                    tracing::info!("Distributor received shutdown signal");
                    break;
                }
            }
        }

        self.teardown();
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Add {
                worker,
                weight,
                transport,
                reply,
            } => {
                let result = self.add(worker, weight, transport);
                let _ = reply.send(result);
            }
            Command::Remove { worker, reply } => {
                let result = self.remove(worker);
                let _ = reply.send(result);
            }
            Command::Reply { worker, token, ack } => {
                self.dispatcher.on_reply(worker, token, ack);
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }
    }

    fn add(
        &mut self,
        worker: crate::distributor::WorkerId,
        weight: u32,
        transport: BoxedTransport,
    ) -> Result<BindNotice, DistributorError> {
        let Some(listener) = self.listener.as_mut() else {
            return Err(DistributorError::NoBindTarget);
        };
        self.dispatcher.add_worker(worker, weight, transport)?;

        let (waiter, notice) = oneshot::channel();
        match listener.sockname() {
            Some(sockname) => {
                let _ = waiter.send(Ok(sockname.clone()));
                self.dispatcher.offer_all();
            }
            None => {
                self.bind_waiters.push(waiter);
                listener.bind(self.events_tx.clone());
            }
        }
        Ok(BindNotice::new(notice))
    }

    fn remove(&mut self, worker: crate::distributor::WorkerId) -> Result<bool, DistributorError> {
        let idle = self.dispatcher.remove_worker(worker)?;
        if idle {
            if let Some(listener) = self.listener.as_mut() {
                listener.close();
            }
            self.resolve_waiters(Err(BindError::Cancelled));
        } else if self.is_bound() {
            self.dispatcher.offer_all();
        }
        Ok(idle)
    }

    fn handle_event(&mut self, event: ListenerEvent) {
        match event {
            ListenerEvent::Bound { generation, result } => {
                let Some(listener) = self.listener.as_mut() else {
                    return;
                };
                let Some(result) = listener.complete(generation, result) else {
                    tracing::debug!(generation, "Stale bind result ignored");
                    return;
                };
                let bound = result.is_ok();
                self.resolve_waiters(result);
                if bound {
                    self.dispatcher.offer_all();
                }
            }
            ListenerEvent::Accepted { generation, conn } => {
                if self.listener.as_ref().is_some_and(|l| l.accepts(generation)) {
                    metrics::record_accepted();
                    self.dispatcher.enqueue(conn);
                } else {
                    tracing::debug!(connection_id = %conn.id(), "Connection from closed listener dropped");
                    metrics::record_closed("late", 1);
                }
            }
        }
    }

    fn resolve_waiters(&mut self, result: Result<SockName, BindError>) {
        for waiter in self.bind_waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }
    }

    fn is_bound(&self) -> bool {
        self.listener.as_ref().is_some_and(ListenerBinding::is_bound)
    }

    fn stats(&self) -> DistributorStats {
        DistributorStats {
            key: self.dispatcher.key().to_string(),
            sockname: self.listener.as_ref().and_then(|l| l.sockname().cloned()),
            queued: self.dispatcher.queued(),
            workers: self.dispatcher.snapshot(),
        }
    }

    fn teardown(&mut self) {
        if let Some(listener) = self.listener.as_mut() {
            listener.close();
        }
        self.dispatcher.shutdown();
        self.resolve_waiters(Err(BindError::Cancelled));
        tracing::info!("Distributor stopped");
    }
}
