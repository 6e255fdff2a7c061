//! `hsbp-middleware` – Publication & Collaborator Plumbing
//!
//! Routes change notifications between the engine and the rest of the
//! platform without caring about their meaning.
//!
//! # Modules
//!
//! - [`bus`] – Headless, typed, topic-based publish/subscribe event bus built
//!   on Tokio broadcast channels.
//! - [`directory`] – [`ObjectDirectory`]: publish, update and retract typed
//!   property objects; [`InMemoryDirectory`] mirrors every mutation onto the
//!   bus.
//! - [`adapter`] – [`ConfigSource`] and [`InventorySource`] collaborator
//!   traits.
//! - [`platform`] – [`StaticPlatform`]: both sources backed by a TOML
//!   platform description.

pub mod adapter;
pub mod bus;
pub mod directory;
pub mod platform;

pub use adapter::{ConfigSource, InventorySource};
pub use bus::{EventBus, Topic, TopicReceiver};
pub use directory::{InMemoryDirectory, ObjectDirectory};
pub use platform::{PlatformFile, StaticPlatform};
