//! Host-side registration.
//!
//! Drives one scope's workers through their lifecycle the way a browser
//! does: a new worker installs, waits until it may take over, activates and
//! then receives fetch and message events.
//!
//! ```text
//! Registration (scope)
//!     ├── installing
//!     ├── waiting
//!     └── active ── on_fetch / on_message
//! ```
//!
//! The worker never retries its own install. The registration re-runs a
//! failed install according to its [`RetryConfig`], but only for network
//! failures.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use pwa_common::{retry_if, RetryConfig};
use pwa_net::{Request, Response};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::Result;
use crate::manager::ActivationReport;
use crate::worker::{LifecycleHandler, WorkerHost};

/// Unique identifier for a worker within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(u64);

impl WorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerState {
    /// Registered, install not started.
    #[default]
    Parsed,
    /// Install event running.
    Installing,
    /// Installed, waiting to activate.
    Installed,
    /// Activate event running.
    Activating,
    /// Active and receiving fetches.
    Activated,
    /// Replaced, or install failed.
    Redundant,
}

/// Events emitted by a registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceWorkerEvent {
    /// A new worker started installing.
    UpdateFound { worker_id: WorkerId },
    /// A worker changed state.
    StateChange {
        worker_id: WorkerId,
        new_state: WorkerState,
    },
    /// Open clients are now controlled by the active worker.
    ControllerChange { clients: usize },
}

/// Which worker a message is posted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTarget {
    Waiting,
    Active,
}

/// The host capabilities handed to workers of one registration.
#[derive(Debug)]
pub struct RegistrationHost {
    skip_waiting: AtomicBool,
    open_clients: AtomicUsize,
    controlled_clients: AtomicUsize,
    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl RegistrationHost {
    fn emit(&self, event: ServiceWorkerEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Whether a worker asked to skip waiting.
    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    /// Number of clients controlled by the active worker.
    pub fn controlled_clients(&self) -> usize {
        self.controlled_clients.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkerHost for RegistrationHost {
    fn skip_waiting(&self) {
        debug!("Skip waiting requested");
        self.skip_waiting.store(true, Ordering::SeqCst);
    }

    async fn claim_clients(&self) -> Result<()> {
        let clients = self.open_clients.load(Ordering::SeqCst);
        self.controlled_clients.store(clients, Ordering::SeqCst);
        self.emit(ServiceWorkerEvent::ControllerChange { clients });
        Ok(())
    }
}

struct WorkerSlot {
    id: WorkerId,
    state: WorkerState,
    handler: Arc<dyn LifecycleHandler>,
}

#[derive(Default)]
struct Slots {
    installing: Option<WorkerSlot>,
    waiting: Option<WorkerSlot>,
    active: Option<WorkerSlot>,
}

/// Point-in-time view of a registration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationSnapshot {
    pub installing: Option<(WorkerId, WorkerState)>,
    pub waiting: Option<(WorkerId, WorkerState)>,
    pub active: Option<(WorkerId, WorkerState)>,
}

/// A service worker registration for one scope.
pub struct Registration {
    scope: Url,
    retry: RetryConfig,
    host: Arc<RegistrationHost>,
    slots: RwLock<Slots>,
}

impl Registration {
    /// Create a registration and the receiver for its events.
    pub fn new(
        scope: Url,
        retry: RetryConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let host = Arc::new(RegistrationHost {
            skip_waiting: AtomicBool::new(false),
            open_clients: AtomicUsize::new(0),
            controlled_clients: AtomicUsize::new(0),
            event_tx,
        });

        (
            Self {
                scope,
                retry,
                host,
                slots: RwLock::new(Slots::default()),
            },
            event_rx,
        )
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    /// Host handle to give to workers created for this registration.
    pub fn host(&self) -> Arc<RegistrationHost> {
        Arc::clone(&self.host)
    }

    /// Record a client page opening in scope.
    pub fn open_client(&self) {
        self.host.open_clients.fetch_add(1, Ordering::SeqCst);
    }

    /// Install a new worker.
    ///
    /// The worker then activates straight away when nothing is active yet or
    /// when it asked to skip waiting; otherwise it stays waiting. Returns the
    /// worker's state afterwards.
    pub async fn install(&self, handler: Arc<dyn LifecycleHandler>) -> Result<WorkerState> {
        let id = WorkerId::new();
        self.host.skip_waiting.store(false, Ordering::SeqCst);
        self.host.emit(ServiceWorkerEvent::UpdateFound { worker_id: id });

        {
            let mut slots = self.slots.write().await;
            if let Some(previous) = slots.installing.take() {
                self.retire(previous);
            }
            slots.installing = Some(WorkerSlot {
                id,
                state: WorkerState::Parsed,
                handler: Arc::clone(&handler),
            });
            self.set_state(slots.installing.as_mut(), WorkerState::Installing);
        }

        info!(scope = %self.scope, worker = id.raw(), "Installing worker");
        let outcome = retry_if(&self.retry, || handler.on_install(), |e| e.is_network()).await;

        let should_activate = {
            let mut slots = self.slots.write().await;
            // A newer install may have replaced this one while it ran.
            let mut slot = match slots.installing.take() {
                Some(slot) if slot.id == id => slot,
                other => {
                    slots.installing = other;
                    return Ok(WorkerState::Redundant);
                }
            };

            if let Err(e) = outcome {
                warn!(worker = id.raw(), error = %e, "Install failed");
                self.retire(slot);
                return Err(e);
            }

            self.set_state(Some(&mut slot), WorkerState::Installed);
            if let Some(previous) = slots.waiting.replace(slot) {
                self.retire(previous);
            }
            slots.active.is_none() || self.host.skip_waiting_requested()
        };

        if should_activate {
            self.activate().await?;
            Ok(WorkerState::Activated)
        } else {
            Ok(WorkerState::Installed)
        }
    }

    /// Activate the waiting worker, if any.
    ///
    /// The slots stay locked for the whole activate event, so two
    /// activations never overlap.
    pub async fn activate(&self) -> Result<Option<ActivationReport>> {
        let mut slots = self.slots.write().await;
        let Some(mut slot) = slots.waiting.take() else {
            return Ok(None);
        };

        self.set_state(Some(&mut slot), WorkerState::Activating);
        if let Some(previous) = slots.active.take() {
            self.retire(previous);
        }

        let report = slot.handler.on_activate().await;
        self.set_state(Some(&mut slot), WorkerState::Activated);
        slots.active = Some(slot);
        self.host.skip_waiting.store(false, Ordering::SeqCst);

        report.map(Some)
    }

    /// Deliver a fetch to the active worker. `Ok(None)` means the host
    /// should perform the request itself.
    pub async fn dispatch_fetch(&self, request: &Request) -> Result<Option<Response>> {
        let handler = match self.slots.read().await.active.as_ref() {
            Some(slot) => Arc::clone(&slot.handler),
            None => return Ok(None),
        };
        handler.on_fetch(request).await
    }

    /// Post a message to a worker.
    ///
    /// A waiting worker that asks to skip waiting is activated before this
    /// returns.
    pub async fn post_message(&self, target: MessageTarget, data: &str) -> Result<()> {
        let handler = {
            let slots = self.slots.read().await;
            let slot = match target {
                MessageTarget::Waiting => slots.waiting.as_ref(),
                MessageTarget::Active => slots.active.as_ref(),
            };
            match slot {
                Some(slot) => Arc::clone(&slot.handler),
                None => {
                    debug!(?target, "No worker to receive message");
                    return Ok(());
                }
            }
        };

        handler.on_message(data).await?;

        if target == MessageTarget::Waiting && self.host.skip_waiting_requested() {
            self.activate().await?;
        }
        Ok(())
    }

    /// Current workers and their states.
    pub async fn snapshot(&self) -> RegistrationSnapshot {
        let slots = self.slots.read().await;
        let view = |slot: &Option<WorkerSlot>| slot.as_ref().map(|s| (s.id, s.state));
        RegistrationSnapshot {
            installing: view(&slots.installing),
            waiting: view(&slots.waiting),
            active: view(&slots.active),
        }
    }

    /// Drop every worker. Cached data is left alone.
    pub async fn unregister(&self) {
        let mut slots = self.slots.write().await;
        for slot in [
            slots.installing.take(),
            slots.waiting.take(),
            slots.active.take(),
        ]
        .into_iter()
        .flatten()
        {
            self.retire(slot);
        }
        self.host.controlled_clients.store(0, Ordering::SeqCst);
    }

    fn set_state(&self, slot: Option<&mut WorkerSlot>, state: WorkerState) {
        if let Some(slot) = slot {
            slot.state = state;
            self.host.emit(ServiceWorkerEvent::StateChange {
                worker_id: slot.id,
                new_state: state,
            });
        }
    }

    fn retire(&self, mut slot: WorkerSlot) {
        self.set_state(Some(&mut slot), WorkerState::Redundant);
    }
}
