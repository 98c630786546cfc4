//! Event manager: publish/subscribe for events, FIFO queue for commands

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::RwLock;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::errors::BusError;
use crate::model::{Command, CommandKind, Event};
use crate::subscriber::EventSubscriber;

type SubscriberList = Vec<(String, Arc<dyn EventSubscriber>)>;

/// Central manager for execution events and control commands.
///
/// Events are fanned out by a single dispatch task, in publish order, to
/// every subscriber in registration order. Commands are only ever popped,
/// never pushed to observers.
pub struct EventManager {
    event_tx: mpsc::UnboundedSender<Event>,
    event_rx: Arc<Mutex<mpsc::UnboundedReceiver<Event>>>,
    command_tx: mpsc::UnboundedSender<Command>,
    command_rx: parking_lot::Mutex<mpsc::UnboundedReceiver<Command>>,
    subscribers: Arc<RwLock<SubscriberList>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl EventManager {
    pub fn new() -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        Self {
            event_tx,
            event_rx: Arc::new(Mutex::new(event_rx)),
            command_tx,
            command_rx: parking_lot::Mutex::new(command_rx),
            subscribers: Arc::new(RwLock::new(Vec::new())),
            worker: Mutex::new(None),
            pending: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
        }
    }

    /// Spawn the dispatch loop on the current runtime. A no-op while a loop
    /// is already running.
    pub async fn start(&self) {
        let mut guard = self.worker.lock().await;
        if guard.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("event manager already running");
            return;
        }
        let receiver = Arc::clone(&self.event_rx);
        let subscribers = Arc::clone(&self.subscribers);
        let pending = Arc::clone(&self.pending);
        let idle = Arc::clone(&self.idle);
        let handle = tokio::spawn(async move {
            dispatch_loop(receiver, subscribers, pending, idle).await;
        });
        *guard = Some(handle);
        debug!("event manager started");
    }

    /// Cancel the dispatch loop and wait for it to wind down. Events still
    /// queued stay queued for a later `start`.
    pub async fn stop(&self) {
        let handle = self.worker.lock().await.take();
        let Some(handle) = handle else {
            return;
        };
        handle.abort();
        match handle.await {
            Ok(()) => {}
            Err(err) if err.is_cancelled() => {}
            Err(err) => error!("event dispatch loop panicked: {err}"),
        }
        // The event being delivered when the loop was cancelled is lost.
        let queued = self.event_rx.lock().await.len();
        self.pending.store(queued, Ordering::SeqCst);
        if queued == 0 {
            self.idle.notify_waiters();
        }
        debug!("event manager stopped");
    }

    /// Close every subscriber exposing a close hook, then stop.
    pub async fn shutdown(&self) {
        debug!("shutting down event manager");
        let subscribers = self.snapshot();
        for (id, subscriber) in subscribers {
            if let Err(err) = subscriber.close() {
                error!(subscriber = %id, "error while closing subscriber: {err}");
            }
        }
        self.dump_state();
        self.stop().await;
    }

    pub async fn is_running(&self) -> bool {
        self.worker
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Enqueue an event for dispatch. Never blocks.
    pub fn publish_event(&self, event: Event) -> Result<(), BusError> {
        debug!(
            entity = %event.entity_type,
            id = %event.entity_id,
            status = %event.status,
            "publishing event"
        );
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.event_tx.send(event).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            BusError::Closed("event")
        })
    }

    pub fn publish_command(
        &self,
        command: CommandKind,
        entity_id: impl Into<String>,
        params: Vec<String>,
        parent_id: Option<String>,
    ) -> Result<(), BusError> {
        let command = Command::new(command, entity_id)
            .with_params(params)
            .with_parent(parent_id);
        debug!(?command, "publishing command");
        self.command_tx
            .send(command)
            .map_err(|_| BusError::Closed("command"))
    }

    /// Pop the next queued command without waiting.
    pub fn get_command(&self) -> Option<Command> {
        self.command_rx.lock().try_recv().ok()
    }

    /// Register a subscriber; an existing registration with the same id is
    /// replaced in place and keeps its dispatch position.
    pub fn subscribe(&self, subscriber_id: impl Into<String>, subscriber: Arc<dyn EventSubscriber>) {
        let subscriber_id = subscriber_id.into();
        let mut subscribers = self.subscribers.write();
        match subscribers.iter_mut().find(|(id, _)| *id == subscriber_id) {
            Some(slot) => slot.1 = subscriber,
            None => subscribers.push((subscriber_id.clone(), subscriber)),
        }
        debug!(subscriber = %subscriber_id, "subscribed");
    }

    pub fn unsubscribe(&self, subscriber_id: &str) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(id, _)| id != subscriber_id);
        debug!(subscriber = %subscriber_id, "unsubscribed");
        subscribers.len() != before
    }

    pub fn subscriber_ids(&self) -> Vec<String> {
        self.subscribers
            .read()
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Events published but not yet delivered to every subscriber.
    pub fn pending_events(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Wait until every published event has been dispatched.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.idle.notified();
                if self.pending.load(Ordering::SeqCst) == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    pub fn dump_state(&self) {
        debug!(
            subscribers = ?self.subscriber_ids(),
            pending_events = self.pending_events(),
            "event manager state"
        );
    }

    fn snapshot(&self) -> SubscriberList {
        self.subscribers.read().clone()
    }
}

impl Default for EventManager {
    fn default() -> Self {
        Self::new()
    }
}

async fn dispatch_loop(
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<Event>>>,
    subscribers: Arc<RwLock<SubscriberList>>,
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
) {
    debug!("starting event processing loop");
    loop {
        let event = {
            let mut rx = receiver.lock().await;
            match rx.recv().await {
                Some(event) => event,
                None => break,
            }
        };

        let targets = subscribers.read().clone();
        for (id, subscriber) in targets {
            let delivery = AssertUnwindSafe(subscriber.on_event(&event)).catch_unwind();
            match delivery.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!(subscriber = %id, "error in subscriber: {err}"),
                Err(_) => error!(subscriber = %id, "subscriber panicked while handling event"),
            }
        }

        if pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            idle.notify_waiters();
        }
    }
    warn!("event queue closed, dispatch loop exiting");
}
