//! # Mailgate Events
//!
//! This crate provides the session event bus for the Mailgate client,
//! letting pages and services observe authentication changes without
//! reaching into the session manager.
//!
//! ## Overview
//!
//! The mailgate-events crate handles:
//! - **Event Types**: Strongly-typed session and navigation events
//! - **Event Bus**: Publish/subscribe messaging with topic wildcards
//! - **Detach Handles**: Cancellable subscriptions for callback-style sources
//!
//! ## Usage
//!
//! ```rust,no_run
//! use mailgate_events::{EventBus, MemoryEventBus, Phase, SessionEvent};
//!
//! async fn example() {
//!     let bus = MemoryEventBus::new();
//!
//!     // All session events, whatever their kind
//!     let mut sub = bus.subscribe("session.#").await.unwrap();
//!
//!     let event = SessionEvent::PhaseChanged {
//!         from: Phase::Initializing,
//!         to: Phase::Unauthenticated,
//!         user_email: None,
//!     };
//!     bus.publish(event.to_event()).await.unwrap();
//!
//!     let received = sub.recv().await.unwrap();
//!     println!("{}", received.topic());
//! }
//! ```
//!
//! ## Topic Patterns
//!
//! Topics are structured as `{source}.{event_type}`:
//! - `session.phase.changed` - Specific event
//! - `session.exchange.*` - All token exchange outcomes
//! - `navigation.#` - All navigation events
//! - `#` - All events
//!
//! Wildcards:
//! - `*` matches exactly one segment
//! - `#` matches zero or more segments

pub mod bus;
pub mod detach;
pub mod types;

// Re-export main types
pub use bus::{EventBus, EventBusError, EventBusResult, EventBusStats, MemoryEventBus, Subscription};
pub use detach::DetachHandle;
pub use types::{Event, EventSource, NavigationEvent, Phase, SessionEvent, SignOutReason};
