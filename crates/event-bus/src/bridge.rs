//! Synchronous facade over the event manager.
//!
//! The manager lives on a dedicated thread running its own single-threaded
//! runtime. Synchronous callers (driver threads, console controllers) marshal
//! every operation onto that runtime and wait for the result with a bounded
//! timeout, so a stuck call never blocks the caller indefinitely.

use std::future::Future;
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::errors::BusError;
use crate::manager::EventManager;
use crate::model::{Command, CommandKind, Event};
use crate::subscriber::EventSubscriber;

pub const DEFAULT_BRIDGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Time kept back from a flush so its own drain timeout fires before the
/// bridge gives up on the call.
const FLUSH_MARGIN: Duration = Duration::from_millis(250);

pub struct SyncEventManager {
    handle: Handle,
    manager: Arc<EventManager>,
    timeout: Duration,
    stop_signal: Mutex<Option<oneshot::Sender<()>>>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl SyncEventManager {
    /// Spawn the bus thread and construct a manager owned by it.
    pub fn new(timeout: Duration) -> Result<Self, BusError> {
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<Handle, String>>();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let thread = thread::Builder::new()
            .name("optics-event-bus".to_string())
            .spawn(move || {
                let runtime = match Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err.to_string()));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(runtime.handle().clone()));
                runtime.block_on(async {
                    let _ = stop_rx.await;
                });
                debug!("event bus thread exiting");
            })?;

        let handle = ready_rx
            .recv_timeout(timeout)
            .map_err(|err| BusError::BridgeUnavailable(err.to_string()))?
            .map_err(BusError::BridgeUnavailable)?;

        Ok(Self {
            handle,
            manager: Arc::new(EventManager::new()),
            timeout,
            stop_signal: Mutex::new(Some(stop_tx)),
            thread: Mutex::new(Some(thread)),
        })
    }

    /// The underlying manager, for asynchronous callers that only need the
    /// non-blocking queue operations.
    pub fn manager(&self) -> Arc<EventManager> {
        Arc::clone(&self.manager)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn start(&self) -> Result<(), BusError> {
        let manager = self.manager();
        self.run("start", async move { manager.start().await })
    }

    pub fn stop(&self) -> Result<(), BusError> {
        let manager = self.manager();
        self.run("stop", async move { manager.stop().await })
    }

    pub fn is_running(&self) -> Result<bool, BusError> {
        let manager = self.manager();
        self.run("is_running", async move { manager.is_running().await })
    }

    pub fn publish_event(&self, event: Event) -> Result<(), BusError> {
        let manager = self.manager();
        self.run("publish_event", async move { manager.publish_event(event) })?
    }

    pub fn publish_command(
        &self,
        command: CommandKind,
        entity_id: impl Into<String>,
        params: Vec<String>,
        parent_id: Option<String>,
    ) -> Result<(), BusError> {
        let manager = self.manager();
        let entity_id = entity_id.into();
        self.run("publish_command", async move {
            manager.publish_command(command, entity_id, params, parent_id)
        })?
    }

    pub fn get_command(&self) -> Result<Option<Command>, BusError> {
        let manager = self.manager();
        self.run("get_command", async move { manager.get_command() })
    }

    pub fn subscribe(
        &self,
        subscriber_id: impl Into<String>,
        subscriber: Arc<dyn EventSubscriber>,
    ) -> Result<(), BusError> {
        let manager = self.manager();
        let subscriber_id = subscriber_id.into();
        self.run("subscribe", async move {
            manager.subscribe(subscriber_id, subscriber)
        })
    }

    pub fn unsubscribe(&self, subscriber_id: &str) -> Result<bool, BusError> {
        let manager = self.manager();
        let subscriber_id = subscriber_id.to_string();
        self.run("unsubscribe", async move { manager.unsubscribe(&subscriber_id) })
    }

    /// Block until every published event has been dispatched. `Ok(false)`
    /// when events are still queued once the drain budget is spent.
    pub fn flush(&self) -> Result<bool, BusError> {
        let manager = self.manager();
        let wait = flush_budget(self.timeout);
        self.run("flush", async move { manager.wait_idle(wait).await })
    }

    pub fn dump_state(&self) -> Result<(), BusError> {
        let manager = self.manager();
        self.run("dump_state", async move { manager.dump_state() })
    }

    /// Close subscribers, stop dispatch, then stop and join the bus thread.
    pub fn shutdown(&self) -> Result<(), BusError> {
        let manager = self.manager();
        let result = self.run("shutdown", async move { manager.shutdown().await });
        self.stop_thread();
        result
    }

    fn run<F, T>(&self, operation: &'static str, future: F) -> Result<T, BusError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if self.thread.lock().is_none() {
            return Err(BusError::BridgeUnavailable("bus thread already stopped".into()));
        }
        let (tx, rx) = std_mpsc::sync_channel(1);
        self.handle.spawn(async move {
            let _ = tx.send(future.await);
        });
        rx.recv_timeout(self.timeout).map_err(|err| match err {
            std_mpsc::RecvTimeoutError::Timeout => BusError::BridgeTimeout {
                operation,
                timeout: self.timeout,
            },
            std_mpsc::RecvTimeoutError::Disconnected => {
                BusError::BridgeUnavailable(format!("'{operation}' dropped by the bus thread"))
            }
        })
    }

    fn stop_thread(&self) {
        if let Some(signal) = self.stop_signal.lock().take() {
            let _ = signal.send(());
        }
        if let Some(thread) = self.thread.lock().take() {
            if thread.join().is_err() {
                warn!("event bus thread panicked");
            }
        }
    }
}

fn flush_budget(timeout: Duration) -> Duration {
    timeout.saturating_sub(FLUSH_MARGIN.min(timeout / 2))
}

impl Drop for SyncEventManager {
    fn drop(&mut self) {
        self.stop_thread();
    }
}
