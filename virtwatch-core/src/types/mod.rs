//! Core domain types for virtwatch.

pub mod event;
pub mod vm;

// Re-exports
pub use event::{
    BlockJobEvent, DomainEvent, EventCallback, EventKind, LifecycleEvent, SubscriptionHandle,
};
pub use vm::{
    AddressKind, DiskVolume, DomainField, DomainHandle, DomainInfo, InterfaceAddress,
    NetworkInterface, VmState, VmStatus,
};
