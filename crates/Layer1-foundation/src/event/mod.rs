//! Event System - publish/subscribe
//!
//! Scheduler and worker-pool lifecycle events all travel through the
//! [`EventBus`]. Consumers either register an [`EventListener`] or take a
//! broadcast [`receiver`](EventBus::receiver).
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        EventBus                              │
//! │   publish(event) ──► history ──► broadcast ──► listeners     │
//! │                                                │             │
//! │         ┌──────────────┬──────────────┬────────┘             │
//! │         ▼              ▼              ▼                      │
//! │   ┌──────────┐   ┌──────────┐   ┌──────────┐                 │
//! │   │ Listener │   │ Listener │   │ Listener │  (isolated)     │
//! │   └──────────┘   └──────────┘   └──────────┘                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ```ignore
//! use conductor_foundation::event::{EventBus, ConductorEvent, EventCategory};
//!
//! let bus = EventBus::new();
//! bus.subscribe(Arc::new(MyListener)).await;
//! bus.publish(ConductorEvent::new("worker.done", EventCategory::Worker)).await;
//! ```

pub mod bus;
pub mod types;

pub use bus::{
    global_event_bus, init_global_event_bus, publish, EventBus, EventBusConfig, EventFilter,
    EventListener, ListenerId,
};

pub use types::{
    error, system, ConductorEvent, EventCategory, EventId, EventSeverity,
};
