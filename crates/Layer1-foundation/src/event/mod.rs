//! Event System - typed publish/subscribe
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     EventBus<E: BusEvent>                   │
//! │  publish(event) ──┬── history (bounded)                     │
//! │                   ├── broadcast::Sender<E> ──► receivers    │
//! │                   └── listeners (in-line)                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The bus is generic: each layer defines its own event enum whose variants
//! carry typed payloads and implements [`BusEvent`] for it.

pub mod bus;
pub mod types;

pub use bus::{EventBus, EventBusConfig, EventListener, ListenerId};
pub use types::{BusEvent, EventRecord, EventSeverity};
