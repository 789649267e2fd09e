//! The scheduling and execution core: decides when each collection job runs,
//! invokes it exactly once per firing, records run history, retries failures,
//! detects overdue sources, and emits the audit event stream.
//!
//! Persistence is behind the [`StatusStore`] port; the Postgres adapter lives
//! in `cmdb-db`, and [`MemoryStatusStore`] serves tests and embedders that
//! run without a database.

pub mod clock;
pub mod collector;
pub mod dispatcher;
pub mod freshness;
pub mod guard;
pub mod registry;
pub mod runner;
pub mod store;

pub use clock::{Clock, SimClock, SystemClock};
pub use collector::{Collector, CollectorOutput};
pub use dispatcher::{run_overdue_sweep, DispatchError, Dispatcher, DispatcherSettings};
pub use freshness::{freshness_report, overdue_threshold_hours, FreshnessEntry};
pub use guard::{JobPermit, RunGuard};
pub use registry::{JobDescriptor, Registry, RegistryError};
pub use runner::{Observer, RunResult, Runner};
pub use store::{
    MemoryStatusStore, NewEvent, RunCompletion, RunRecord, RunStatus, StatusStore, StoreError,
};
