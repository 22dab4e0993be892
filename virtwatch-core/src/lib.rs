//! virtwatch core library
//!
//! Hypervisor client abstraction, snapshot aggregation and event subscription
//! management shared by the `virtwatchd` HTTP daemon and the
//! `virtwatch-events` listener.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod observability;
pub mod ports;
pub mod shutdown;
pub mod snapshot;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used items
pub use client::{ClientConfig, ClientFactory, HypervisorClient};
pub use config::Config;
pub use error::{Result, VirtwatchError};
pub use events::{EventSubscriptionManager, ManagerState, StopSignal};
pub use observability::{health::HealthChecker, init as init_observability};
pub use snapshot::SnapshotAggregator;
pub use types::{DomainEvent, DomainHandle, EventKind, SubscriptionHandle, VmState, VmStatus};
