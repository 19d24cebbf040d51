//! Core infrastructure for relink.
//!
//! This crate provides the pieces shared by the connector crates:
//! - [`Event`], the trait every published notification implements
//! - [`EventListener`] and [`FnListener`] for observing events
//! - [`Notifier`], an ordered publish/subscribe registry with
//!   [`SubscriptionId`] handles

pub mod events;
pub mod notifier;

pub use events::{BoxedEventListener, Event, EventListener, FnListener};
pub use notifier::{Notifier, SubscriptionId};
