//! Opaque repository interfaces for the config store (§4.J) and the durable tracker
//! store (§4.G), plus simple file-backed default implementations.
//!
//! Both interfaces are traits so the storage medium stays opaque to the rest of the
//! crate (§6: "Storage medium is opaque (file or local database)"), matching the
//! teacher gateway's separation between its storage backends and the code that uses
//! them.

pub mod config_store;
pub mod tracker_store;

pub use config_store::{ConfigRepository, JsonFileConfigStore};
pub use tracker_store::{DurableTrackerStore, NdjsonTrackerStore, TrackerQuery};
