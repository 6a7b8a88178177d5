//! Public surface of the exchange subsystem.
//!
//! [`Exchange`] owns the state machine behind a single serializing lock plus
//! two workers: a timer driver injecting a tick every 75ms, and the event
//! publisher delivering committed cluster-changed events to listeners.
//! External subsystems feed it through [`Exchange::handle_clustering_event`]
//! and [`Exchange::handle_fabric_message`]; everything else is accessors over
//! the committed snapshot.

pub mod config;
pub mod event;

mod commit;
mod machine;
mod peers;
mod publisher;

use std::sync::{Arc, Mutex};
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cluster::namespace::NamespaceRegistry;
use crate::cluster::traits::{FabricTransport, PartitionBalance};
use crate::codec::message::ExchangeMessage;
use crate::types::{ClusterKey, NodeId};

pub use config::ExchangeConfig;
pub use event::{ClusterChangedEvent, ClusteringEvent};
pub use machine::ExchangeState;
pub use publisher::ClusterChangedListener;

use event::ExchangeEvent;
use machine::ExchangeCore;
use publisher::EventPublisher;

/// Lifecycle of the subsystem's workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SysState {
    Created,
    Running,
    Stopped,
}

struct ExchangeInner {
    core: Mutex<ExchangeCore>,
    sys_state: Mutex<SysState>,
    publisher: Arc<EventPublisher>,
    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// Handle to the exchange subsystem.
///
/// Cheap to clone; all clones share one state machine.
#[derive(Clone)]
pub struct Exchange {
    inner: Arc<ExchangeInner>,
}

impl Exchange {
    /// Initialize the subsystem.
    ///
    /// Starts orphaned with client transactions blocked; nothing moves until
    /// [`start`](Exchange::start) spawns the workers and the clustering layer
    /// delivers a membership.
    pub fn new(
        config: ExchangeConfig,
        namespaces: Arc<NamespaceRegistry>,
        transport: Arc<dyn FabricTransport>,
        balance: Arc<dyn PartitionBalance>,
    ) -> Self {
        let publisher = Arc::new(EventPublisher::new());
        let core = ExchangeCore::new(
            config,
            namespaces,
            transport,
            balance,
            Arc::clone(&publisher),
            Instant::now(),
        );
        let (shutdown_tx, _) = watch::channel(false);

        debug!("exchange module initialized");

        Exchange {
            inner: Arc::new(ExchangeInner {
                core: Mutex::new(core),
                sys_state: Mutex::new(SysState::Created),
                publisher,
                shutdown_tx,
                workers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Spawn the timer and publisher workers.
    ///
    /// A stopped exchange stays stopped; construct a new one to run again.
    pub fn start(&self) {
        let mut sys_state = self.lock_sys_state();
        match *sys_state {
            SysState::Running => return,
            SysState::Stopped => {
                warn!("exchange already stopped - not restarting");
                return;
            }
            SysState::Created => {}
        }
        *sys_state = SysState::Running;

        let mut workers = self.inner.workers.lock().expect("worker list lock poisoned");

        let timer_inner = Arc::clone(&self.inner);
        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();
        workers.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(config::TIMER_TICK_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = tick.tick() => timer_inner.dispatch(ExchangeEvent::Timer),
                    _ = shutdown_rx.changed() => break,
                }
            }
            debug!("exchange timer stopped");
        }));

        let publisher = Arc::clone(&self.inner.publisher);
        workers.push(tokio::spawn(async move { publisher.run().await }));

        debug!("exchange module started");
    }

    /// Stop the workers. Idempotent; safe to call without a prior `start`.
    pub async fn stop(&self) {
        {
            let mut sys_state = self.lock_sys_state();
            if *sys_state != SysState::Running {
                *sys_state = SysState::Stopped;
                return;
            }
            *sys_state = SysState::Stopped;
        }

        let _ = self.inner.shutdown_tx.send(true);
        self.inner.publisher.stop();

        let workers: Vec<JoinHandle<()>> = self
            .inner
            .workers
            .lock()
            .expect("worker list lock poisoned")
            .drain(..)
            .collect();
        for worker in workers {
            if let Err(error) = worker.await {
                warn!(%error, "exchange worker ended abnormally");
            }
        }

        debug!("exchange module stopped");
    }

    /// Feed a membership event from the clustering layer.
    pub fn handle_clustering_event(&self, event: ClusteringEvent) {
        if !self.is_running() {
            debug!("exchange stopped - ignoring cluster change event");
            return;
        }
        self.inner.dispatch(ExchangeEvent::ClusterChange(event));
    }

    /// Feed a raw message delivered by the fabric transport.
    pub fn handle_fabric_message(&self, from: NodeId, raw: Bytes) {
        if !self.is_running() {
            debug!(node = %from, "exchange stopped - ignoring message");
            return;
        }

        let msg = match ExchangeMessage::parse(raw) {
            Ok(msg) => msg,
            Err(error) => {
                warn!(node = %from, %error, "dropping unparseable exchange message");
                return;
            }
        };

        self.inner.dispatch(ExchangeEvent::Message { from, msg });
    }

    /// Register a committed-membership listener (at most 7).
    ///
    /// Listeners run on the publisher worker, outside the exchange lock, and
    /// may re-enter accessors on this handle.
    pub fn register_listener(&self, listener: ClusterChangedListener) {
        self.inner.publisher.register_listener(listener);
    }

    /// Current position in the state diagram.
    pub fn state(&self) -> ExchangeState {
        self.inner.lock_core().state()
    }

    /// Cluster key of the last committed round.
    pub fn committed_cluster_key(&self) -> ClusterKey {
        self.inner.lock_core().committed().cluster_key
    }

    /// Size of the last committed succession list.
    pub fn committed_cluster_size(&self) -> usize {
        self.inner.lock_core().committed().succession.len()
    }

    /// The last committed succession list.
    pub fn committed_succession(&self) -> Vec<NodeId> {
        self.inner.lock_core().committed().succession.to_vec()
    }

    /// Principal of the last committed succession list.
    pub fn committed_principal(&self) -> Option<NodeId> {
        self.inner.lock_core().committed().principal
    }

    /// The committed succession list as comma-separated hex, terminated by
    /// `\nok`, for the info interface.
    pub fn info_succession(&self) -> String {
        let core = self.inner.lock_core();
        let nodes = &core.committed().succession;

        let mut out = String::new();
        for (i, node) in nodes.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(&format!("{:x}", node.value()));
        }
        out.push_str("\nok");
        out
    }

    /// Log the current state; `verbose` adds per-peer pending lists.
    pub fn dump(&self, verbose: bool) {
        self.inner.lock_core().dump(verbose, Instant::now());
        info!(
            committed_cluster_key = %self.committed_cluster_key(),
            "EXG committed"
        );
    }

    fn is_running(&self) -> bool {
        *self.lock_sys_state() == SysState::Running
    }

    fn lock_sys_state(&self) -> std::sync::MutexGuard<'_, SysState> {
        self.inner.sys_state.lock().expect("sys state lock poisoned")
    }
}

impl ExchangeInner {
    fn lock_core(&self) -> std::sync::MutexGuard<'_, ExchangeCore> {
        self.core.lock().expect("exchange lock poisoned")
    }

    fn dispatch(&self, event: ExchangeEvent) {
        self.lock_core().handle_event(event, Instant::now());
    }
}
