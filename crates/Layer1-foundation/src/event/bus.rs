//! Event Bus - publish/subscribe broadcast
//!
//! Listeners are isolated from each other: a listener that returns an error
//! or panics is logged and the remaining listeners still receive the event.

use super::types::{ConductorEvent, EventCategory, EventSeverity};
use crate::Result;
use async_trait::async_trait;
use futures::FutureExt;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, trace, warn};

// ============================================================================
// EventListener Trait
// ============================================================================

/// Listener ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Event listener
#[async_trait]
pub trait EventListener: Send + Sync {
    /// Listener name (for logs)
    fn name(&self) -> &str;

    /// Categories of interest (None = everything)
    fn categories(&self) -> Option<Vec<EventCategory>> {
        None
    }

    /// Handle one event
    async fn on_event(&self, event: &ConductorEvent) -> Result<()>;
}

// ============================================================================
// EventFilter
// ============================================================================

/// Event filter
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Category filter
    pub categories: Option<Vec<EventCategory>>,

    /// Event type prefixes
    pub event_types: Option<Vec<String>>,

    /// Task ID filter
    pub task_id: Option<String>,

    /// Minimum severity
    pub min_severity: Option<EventSeverity>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_categories(mut self, categories: Vec<EventCategory>) -> Self {
        self.categories = Some(categories);
        self
    }

    pub fn with_event_types(mut self, types: Vec<String>) -> Self {
        self.event_types = Some(types);
        self
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_min_severity(mut self, severity: EventSeverity) -> Self {
        self.min_severity = Some(severity);
        self
    }

    /// Whether the event passes the filter
    pub fn matches(&self, event: &ConductorEvent) -> bool {
        if let Some(ref cats) = self.categories {
            if !cats.contains(&event.category) {
                return false;
            }
        }

        if let Some(ref types) = self.event_types {
            if !types.iter().any(|t| event.event_type.starts_with(t)) {
                return false;
            }
        }

        if let Some(ref task_id) = self.task_id {
            if event.task_id.as_ref() != Some(task_id) {
                return false;
            }
        }

        if let Some(min_sev) = self.min_severity {
            if event.severity < min_sev {
                return false;
            }
        }

        true
    }
}

// ============================================================================
// EventBus
// ============================================================================

/// Event bus configuration
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Broadcast channel capacity
    pub channel_capacity: usize,

    /// Number of events kept in history
    pub history_size: usize,

    /// Trace every published event
    pub debug_mode: bool,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            history_size: 100,
            debug_mode: false,
        }
    }
}

#[derive(Clone)]
struct RegisteredListener {
    listener: Arc<dyn EventListener>,
    filter: Option<EventFilter>,
}

impl RegisteredListener {
    fn wants(&self, event: &ConductorEvent) -> bool {
        match &self.filter {
            Some(filter) => filter.matches(event),
            None => match self.listener.categories() {
                Some(cats) => cats.contains(&event.category),
                None => true,
            },
        }
    }
}

/// Event bus
///
/// ```ignore
/// let bus = EventBus::new();
/// let id = bus.subscribe(my_listener).await;
/// bus.publish(ConductorEvent::new("scheduler.progress", EventCategory::Scheduler)).await;
/// bus.unsubscribe(id).await;
/// ```
pub struct EventBus {
    config: EventBusConfig,

    /// Broadcast sender for stream-style consumers
    sender: broadcast::Sender<ConductorEvent>,

    /// Registered listeners, delivered in registration order
    listeners: RwLock<HashMap<ListenerId, RegisteredListener>>,

    listener_counter: AtomicU64,

    history: RwLock<VecDeque<ConductorEvent>>,

    event_count: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    pub fn with_config(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));

        Self {
            config,
            sender,
            listeners: RwLock::new(HashMap::new()),
            listener_counter: AtomicU64::new(0),
            history: RwLock::new(VecDeque::new()),
            event_count: AtomicU64::new(0),
        }
    }

    /// Register a listener
    pub async fn subscribe(&self, listener: Arc<dyn EventListener>) -> ListenerId {
        self.subscribe_with_filter(listener, None).await
    }

    /// Register a listener with a filter
    pub async fn subscribe_with_filter(
        &self,
        listener: Arc<dyn EventListener>,
        filter: Option<EventFilter>,
    ) -> ListenerId {
        let id = ListenerId(self.listener_counter.fetch_add(1, Ordering::SeqCst));

        debug!(
            listener_name = listener.name(),
            listener_id = %id,
            "Registering event listener"
        );

        let mut listeners = self.listeners.write().await;
        listeners.insert(id, RegisteredListener { listener, filter });

        id
    }

    /// Remove a listener
    pub async fn unsubscribe(&self, id: ListenerId) -> bool {
        let removed = self.listeners.write().await.remove(&id).is_some();
        if removed {
            debug!(listener_id = %id, "Unregistered event listener");
        }
        removed
    }

    /// Publish an event
    pub async fn publish(&self, event: ConductorEvent) {
        let seq = self.event_count.fetch_add(1, Ordering::SeqCst);

        if self.config.debug_mode {
            trace!(
                event_id = %event.id,
                event_type = %event.event_type,
                category = ?event.category,
                "Publishing event #{}", seq + 1
            );
        }

        {
            let mut history = self.history.write().await;
            history.push_back(event.clone());
            while history.len() > self.config.history_size {
                history.pop_front();
            }
        }

        // No receivers is not an error
        let _ = self.sender.send(event.clone());

        // Snapshot so listeners may (un)subscribe while handling
        let targets: Vec<(ListenerId, RegisteredListener)> = {
            let listeners = self.listeners.read().await;
            let mut targets: Vec<_> = listeners
                .iter()
                .filter(|(_, registered)| registered.wants(&event))
                .map(|(id, registered)| (*id, registered.clone()))
                .collect();
            targets.sort_by_key(|(id, _)| *id);
            targets
        };

        for (id, registered) in targets {
            let name = registered.listener.name().to_string();
            let delivery = AssertUnwindSafe(registered.listener.on_event(&event)).catch_unwind();

            match delivery.await {
                Ok(Ok(())) => {
                    trace!(listener_id = %id, listener_name = %name, "Delivered event");
                }
                Ok(Err(e)) => {
                    warn!(
                        listener_id = %id,
                        listener_name = %name,
                        event_type = %event.event_type,
                        "Event listener failed: {}", e
                    );
                }
                Err(_) => {
                    warn!(
                        listener_id = %id,
                        listener_name = %name,
                        event_type = %event.event_type,
                        "Event listener panicked"
                    );
                }
            }
        }
    }

    /// Stream-style receiver
    pub fn receiver(&self) -> broadcast::Receiver<ConductorEvent> {
        self.sender.subscribe()
    }

    /// Most recent events, newest first
    pub async fn history(&self, limit: Option<usize>) -> Vec<ConductorEvent> {
        let history = self.history.read().await;
        let limit = limit.unwrap_or(history.len());
        history.iter().rev().take(limit).cloned().collect()
    }

    /// History entries matching a filter, oldest first
    pub async fn search_history(&self, filter: &EventFilter) -> Vec<ConductorEvent> {
        let history = self.history.read().await;
        history.iter().filter(|e| filter.matches(e)).cloned().collect()
    }

    pub async fn listener_count(&self) -> usize {
        self.listeners.read().await.len()
    }

    /// Total events published
    pub fn event_count(&self) -> u64 {
        self.event_count.load(Ordering::SeqCst)
    }

    pub async fn clear_history(&self) {
        self.history.write().await.clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Global EventBus
// ============================================================================

use std::sync::OnceLock;

static GLOBAL_EVENT_BUS: OnceLock<Arc<EventBus>> = OnceLock::new();

/// Initialize the process-wide bus (first call wins)
pub fn init_global_event_bus(config: EventBusConfig) -> Arc<EventBus> {
    GLOBAL_EVENT_BUS
        .get_or_init(|| Arc::new(EventBus::with_config(config)))
        .clone()
}

pub fn global_event_bus() -> Arc<EventBus> {
    GLOBAL_EVENT_BUS
        .get_or_init(|| Arc::new(EventBus::new()))
        .clone()
}

pub async fn publish(event: ConductorEvent) {
    global_event_bus().publish(event).await;
}

// ============================================================================
// Tests
// ============================================================================
