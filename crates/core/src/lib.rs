pub mod config;
pub mod connection_manager;
pub mod dashboard;
pub mod governor;
pub mod instance;
pub mod logging;
pub mod metric;
pub mod registry;
pub mod scheduler;
pub mod shutdown;
pub mod snapshot;
pub mod view;

pub use connection_manager::{BackendError, BackendErrorKind, ConnectionBackend, ConnectionError};
pub use dashboard::{ConnectionDraft, Dashboard, Intent, Outcome, RenderFrame};
pub use instance::{DbmsKind, Dsn, Instance, InstanceStatus, ValidationError};
pub use metric::{MetricBackend, MetricKind, MetricRow};

#[must_use]
pub fn domain_name() -> &'static str {
    "nextop-core"
}
