//! Hypervisor event types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of domain event a subscription is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Lifecycle,
    BlockJob,
}

impl EventKind {
    pub const ALL: [EventKind; 2] = [EventKind::Lifecycle, EventKind::BlockJob];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lifecycle => "lifecycle",
            Self::BlockJob => "block-job",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token for one successful event registration.
///
/// Pairs the backend's registration ID with the domain and kind it was
/// registered for. Only clients create these.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: i64,
    domain: String,
    kind: EventKind,
}

impl SubscriptionHandle {
    pub fn new(id: i64, domain: impl Into<String>, kind: EventKind) -> Self {
        Self { id, domain: domain.into(), kind }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}({})", self.kind, self.id, self.domain)
    }
}

/// Domain lifecycle transition, decoded from the hypervisor's event code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Defined,
    Undefined,
    Started,
    Suspended,
    Resumed,
    Stopped,
    Shutdown,
    PmSuspended,
    Crashed,
    Unhandled(i32),
}

impl LifecycleEvent {
    /// Decode a libvirt `virDomainEventType` code.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Defined,
            1 => Self::Undefined,
            2 => Self::Started,
            3 => Self::Suspended,
            4 => Self::Resumed,
            5 => Self::Stopped,
            6 => Self::Shutdown,
            7 => Self::PmSuspended,
            8 => Self::Crashed,
            other => Self::Unhandled(other),
        }
    }

    /// Short action name, used as a metrics label.
    pub fn action(&self) -> &'static str {
        match self {
            Self::Defined => "defined",
            Self::Undefined => "undefined",
            Self::Started => "started",
            Self::Suspended => "suspended",
            Self::Resumed => "resumed",
            Self::Stopped => "stopped",
            Self::Shutdown => "shutdown",
            Self::PmSuspended => "pm-suspended",
            Self::Crashed => "crashed",
            Self::Unhandled(_) => "unhandled",
        }
    }
}

/// Raw block-job notification payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockJobEvent {
    /// Disk target or path the job runs against
    pub disk: String,
    /// Raw `virDomainBlockJobType` code
    pub job_type: i32,
    /// Raw `virConnectDomainEventBlockJobStatus` code
    pub status: i32,
}

impl BlockJobEvent {
    pub fn job_type_name(&self) -> &'static str {
        match self.job_type {
            1 => "pull",
            2 => "copy",
            3 => "commit",
            4 => "active-commit",
            5 => "backup",
            _ => "unknown",
        }
    }

    pub fn status_name(&self) -> &'static str {
        match self.status {
            0 => "completed",
            1 => "failed",
            2 => "canceled",
            3 => "ready",
            _ => "unknown",
        }
    }
}

impl fmt::Display for BlockJobEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "disk={} type={}({}) status={}({})",
            self.disk,
            self.job_type_name(),
            self.job_type,
            self.status_name(),
            self.status
        )
    }
}

/// An event delivered to a registered callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    Lifecycle { domain: String, event: LifecycleEvent, detail: i32 },
    BlockJob { domain: String, job: BlockJobEvent },
}

impl DomainEvent {
    pub fn domain(&self) -> &str {
        match self {
            Self::Lifecycle { domain, .. } | Self::BlockJob { domain, .. } => domain,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Lifecycle { .. } => EventKind::Lifecycle,
            Self::BlockJob { .. } => EventKind::BlockJob,
        }
    }
}

/// Human-readable description, keyed by domain name.
impl fmt::Display for DomainEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lifecycle { domain, event, .. } => match event {
                LifecycleEvent::Defined => write!(f, "Domain '{}' defined", domain),
                LifecycleEvent::Undefined => write!(f, "Domain '{}' undefined", domain),
                LifecycleEvent::Started => write!(f, "Domain '{}' started", domain),
                LifecycleEvent::Suspended => write!(f, "Domain '{}' suspended", domain),
                LifecycleEvent::Resumed => write!(f, "Domain '{}' resumed", domain),
                LifecycleEvent::Stopped => write!(f, "Domain '{}' stopped", domain),
                LifecycleEvent::Shutdown => write!(f, "Domain '{}' is being shut down", domain),
                LifecycleEvent::PmSuspended => {
                    write!(f, "Domain '{}' suspended by power management", domain)
                }
                LifecycleEvent::Crashed => write!(f, "Domain '{}' crashed", domain),
                LifecycleEvent::Unhandled(code) => {
                    write!(f, "Domain '{}': unhandled event {}", domain, code)
                }
            },
            Self::BlockJob { domain, job } => {
                write!(f, "Domain '{}' block job event: {}", domain, job)
            }
        }
    }
}

/// Callback invoked synchronously from the event dispatch loop.
pub type EventCallback = Box<dyn Fn(DomainEvent) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    fn lifecycle(code: i32) -> DomainEvent {
        DomainEvent::Lifecycle {
            domain: "db".to_string(),
            event: LifecycleEvent::from_code(code),
            detail: 0,
        }
    }

    #[test]
    fn test_lifecycle_codes() {
        assert_eq!(LifecycleEvent::from_code(0), LifecycleEvent::Defined);
        assert_eq!(LifecycleEvent::from_code(2), LifecycleEvent::Started);
        assert_eq!(LifecycleEvent::from_code(7), LifecycleEvent::PmSuspended);
        assert_eq!(LifecycleEvent::from_code(8), LifecycleEvent::Crashed);
        assert_eq!(LifecycleEvent::from_code(42), LifecycleEvent::Unhandled(42));
    }

    #[test]
    fn test_lifecycle_descriptions() {
        assert_eq!(lifecycle(2).to_string(), "Domain 'db' started");
        assert_eq!(lifecycle(6).to_string(), "Domain 'db' is being shut down");
        assert_eq!(lifecycle(1).to_string(), "Domain 'db' undefined");
        assert_eq!(lifecycle(99).to_string(), "Domain 'db': unhandled event 99");
    }

    #[test]
    fn test_block_job_description_carries_raw_payload() {
        let event = DomainEvent::BlockJob {
            domain: "db".to_string(),
            job: BlockJobEvent { disk: "vda".to_string(), job_type: 2, status: 3 },
        };
        assert_eq!(event.kind(), EventKind::BlockJob);
        assert_eq!(
            event.to_string(),
            "Domain 'db' block job event: disk=vda type=copy(2) status=ready(3)"
        );
    }

    #[test]
    fn test_subscription_handle_accessors() {
        let handle = SubscriptionHandle::new(7, "web", EventKind::Lifecycle);
        assert_eq!(handle.id(), 7);
        assert_eq!(handle.domain(), "web");
        assert_eq!(handle.kind(), EventKind::Lifecycle);
        assert_eq!(handle.to_string(), "lifecycle#7(web)");
    }
}
