//! Folio Reader plugin runtime
//!
//! Loads untrusted, remotely distributed content-source plugins into a
//! JavaScript sandbox, keeps them installed and versioned on disk, and
//! exposes a stable fetch and search API over them.

pub mod core;
pub mod plugin;

pub use crate::core::{Config, FolioError, Logger};
pub use plugin::{PluginStore, RepositoryResolver, SearchOrchestrator, SourceFacade};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
