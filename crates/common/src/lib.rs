//! crudcheck Common Library
//!
//! Synchronization and convergence primitives for end-to-end tests that drive
//! a live, stateful CRUD application:
//!
//! - [`lock`]: cross-process fixture lock guarding the shared store
//! - [`orchestrator`]: per-test reset of the store to a fixture snapshot
//! - [`poller`]: bounded convergence polling over observable rows
//! - [`store`]: the transactional store surface and its SQLite backend

pub mod config;
pub mod error;
pub mod lock;
pub mod orchestrator;
pub mod poller;
pub mod snapshot;
pub mod store;
pub mod view;

// Re-export commonly used types
pub use config::HarnessConfig;
pub use error::{Error, Result};
pub use lock::{FileLock, FixtureLock, HolderId, LocalLock, LockGuard, MutualExclusion};
pub use orchestrator::{FixtureOrchestrator, LockPolicy, ResetReport};
pub use poller::{Converged, ConvergencePoller, RowExpectation, RowMatch};
pub use snapshot::{FixtureSnapshot, Record};
pub use store::{FixtureStore, SqliteStore, StoreReport};
pub use view::{Row, RowSource, StoreView};

/// crudcheck version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
