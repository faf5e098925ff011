//! Debug adapter session supervision.
//!
//! Provides:
//! - `SessionRegistry` - Start, address, and stop adapter sessions
//! - `AdapterCatalog` - Adapter type to launch command mapping
//! - `RegistryConfig` - Tunables with serde defaults

pub mod adapters;
pub mod config;
pub mod registry;
pub mod session;

pub use adapters::AdapterCatalog;
pub use config::RegistryConfig;
pub use registry::{RegistryError, SessionRegistry, StartOptions};
pub use session::{Session, SessionInfo, generate_session_id};
