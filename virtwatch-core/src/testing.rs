//! In-memory hypervisor client for tests.
//!
//! `FakeClient` serves a fixed list of domains and lets tests inject failures
//! per domain and field, script what each `dispatch_events` call does, and
//! inspect subscriptions, deregistrations and close calls afterwards.

use crate::client::HypervisorClient;
use crate::error::{Result, VirtwatchError};
use crate::types::{
    AddressKind, DiskVolume, DomainEvent, DomainField, DomainHandle, DomainInfo, EventCallback,
    EventKind, InterfaceAddress, NetworkInterface, SubscriptionHandle,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

/// A scripted domain.
#[derive(Debug, Clone)]
pub struct FakeDomain {
    name: String,
    vcpus: u32,
    memory_bytes: u64,
    /// Volumes with their capacity; `None` makes the capacity query fail
    volumes: Vec<(DiskVolume, Option<u64>)>,
    ipv4: Option<String>,
    failures: HashSet<DomainField>,
}

impl FakeDomain {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            vcpus: 1,
            memory_bytes: 1 << 30,
            volumes: Vec::new(),
            ipv4: None,
            failures: HashSet::new(),
        }
    }

    /// Deterministic UUID for a domain name.
    pub fn uuid_for(name: &str) -> String {
        let hash = name
            .bytes()
            .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(b)));
        format!("{:08x}-0000-4000-8000-{:012x}", hash, name.len())
    }

    pub fn vcpus(mut self, vcpus: u32) -> Self {
        self.vcpus = vcpus;
        self
    }

    pub fn memory(mut self, bytes: u64) -> Self {
        self.memory_bytes = bytes;
        self
    }

    pub fn volume(mut self, target: &str, capacity: u64) -> Self {
        let source = format!("/var/lib/libvirt/images/{}-{}.qcow2", self.name, target);
        self.volumes.push((DiskVolume::new(target, source), Some(capacity)));
        self
    }

    pub fn failing_volume(mut self, target: &str) -> Self {
        let source = format!("/var/lib/libvirt/images/{}-{}.qcow2", self.name, target);
        self.volumes.push((DiskVolume::new(target, source), None));
        self
    }

    pub fn ipv4(mut self, addr: &str) -> Self {
        self.ipv4 = Some(addr.to_string());
        self
    }

    /// Make the query for `field` fail.
    pub fn fail(mut self, field: DomainField) -> Self {
        self.failures.insert(field);
        self
    }
}

/// What one `dispatch_events` call does.
#[derive(Debug, Clone)]
pub enum Dispatch {
    /// Deliver these events to matching subscriptions
    Deliver(Vec<DomainEvent>),
    /// Return a dispatch error
    Fail(String),
    /// Return without delivering anything
    Idle,
}

#[derive(Default)]
struct EventState {
    next_id: i64,
    active: HashMap<i64, (SubscriptionHandle, EventCallback)>,
    registered: Vec<SubscriptionHandle>,
    deregistered: Vec<SubscriptionHandle>,
    unsubscribe_calls: usize,
    script: VecDeque<Dispatch>,
    dispatch_calls: usize,
    close_calls: usize,
}

/// Scriptable in-memory `HypervisorClient`.
#[derive(Default)]
pub struct FakeClient {
    domains: Vec<FakeDomain>,
    fail_listing: bool,
    failing_subscriptions: HashSet<(String, EventKind)>,
    events: Mutex<EventState>,
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_domain(mut self, domain: FakeDomain) -> Self {
        self.domains.push(domain);
        self
    }

    /// Make `list_active_domains` fail with a connection error.
    pub fn fail_listing(mut self) -> Self {
        self.fail_listing = true;
        self
    }

    /// Make subscribing to `kind` events on `domain` fail.
    pub fn fail_subscription(mut self, domain: &str, kind: EventKind) -> Self {
        self.failing_subscriptions.insert((domain.to_string(), kind));
        self
    }

    /// Queue the behaviour of upcoming `dispatch_events` calls.
    pub fn script(self, steps: impl IntoIterator<Item = Dispatch>) -> Self {
        self.events.lock().script.extend(steps);
        self
    }

    /// Handles handed out by successful `subscribe` calls, in order.
    pub fn registered(&self) -> Vec<SubscriptionHandle> {
        self.events.lock().registered.clone()
    }

    /// Handles actually removed by `unsubscribe`, in order.
    pub fn deregistered(&self) -> Vec<SubscriptionHandle> {
        self.events.lock().deregistered.clone()
    }

    pub fn active_subscriptions(&self) -> usize {
        self.events.lock().active.len()
    }

    pub fn unsubscribe_calls(&self) -> usize {
        self.events.lock().unsubscribe_calls
    }

    pub fn dispatch_calls(&self) -> usize {
        self.events.lock().dispatch_calls
    }

    pub fn close_calls(&self) -> usize {
        self.events.lock().close_calls
    }

    fn domain(&self, handle: &DomainHandle, field: DomainField) -> Result<&FakeDomain> {
        let domain = self
            .domains
            .iter()
            .find(|d| d.name == handle.name())
            .ok_or_else(|| VirtwatchError::query(handle.name(), field, "domain not found"))?;
        if domain.failures.contains(&field) {
            return Err(VirtwatchError::query(handle.name(), field, "injected failure"));
        }
        Ok(domain)
    }

    fn deliver(state: &EventState, events: &[DomainEvent]) {
        for event in events {
            for (handle, callback) in state.active.values() {
                if handle.domain() == event.domain() && handle.kind() == event.kind() {
                    callback(event.clone());
                }
            }
        }
    }
}

impl HypervisorClient for FakeClient {
    fn list_active_domains(&self) -> Result<Vec<DomainHandle>> {
        if self.fail_listing {
            return Err(VirtwatchError::Connection {
                uri: "fake:///".to_string(),
                reason: "injected listing failure".to_string(),
            });
        }
        Ok(self.domains.iter().map(|d| DomainHandle::new(d.name.clone())).collect())
    }

    fn domain_info(&self, domain: &DomainHandle) -> Result<DomainInfo> {
        let d = self.domain(domain, DomainField::Info)?;
        Ok(DomainInfo { vcpus: d.vcpus, memory_bytes: d.memory_bytes })
    }

    fn domain_disks(&self, domain: &DomainHandle) -> Result<Vec<DiskVolume>> {
        let d = self.domain(domain, DomainField::Disks)?;
        Ok(d.volumes.iter().map(|(volume, _)| volume.clone()).collect())
    }

    fn volume_capacity(&self, domain: &DomainHandle, volume: &DiskVolume) -> Result<u64> {
        let d = self.domain(domain, DomainField::VolumeCapacity)?;
        d.volumes
            .iter()
            .find(|(v, _)| v == volume)
            .and_then(|(_, capacity)| *capacity)
            .ok_or_else(|| {
                VirtwatchError::query(
                    domain.name(),
                    DomainField::VolumeCapacity,
                    format!("{}: storage volume not found", volume.source),
                )
            })
    }

    fn domain_uuid(&self, domain: &DomainHandle) -> Result<String> {
        let d = self.domain(domain, DomainField::Uuid)?;
        Ok(FakeDomain::uuid_for(&d.name))
    }

    fn domain_interfaces(&self, domain: &DomainHandle) -> Result<Vec<NetworkInterface>> {
        let d = self.domain(domain, DomainField::Ipv4)?;
        Ok(d.ipv4
            .iter()
            .map(|addr| NetworkInterface {
                name: "vnet0".to_string(),
                hwaddr: "52:54:00:12:34:56".to_string(),
                addrs: vec![InterfaceAddress {
                    kind: AddressKind::Ipv4,
                    addr: addr.clone(),
                    prefix: 24,
                }],
            })
            .collect())
    }

    fn subscribe(
        &self,
        domain: &DomainHandle,
        kind: EventKind,
        callback: EventCallback,
    ) -> Result<SubscriptionHandle> {
        if self.failing_subscriptions.contains(&(domain.name().to_string(), kind)) {
            return Err(VirtwatchError::Registration {
                domain: domain.name().to_string(),
                kind,
                reason: "injected registration failure".to_string(),
            });
        }

        let mut state = self.events.lock();
        let id = state.next_id;
        state.next_id += 1;
        let handle = SubscriptionHandle::new(id, domain.name(), kind);
        state.active.insert(id, (handle.clone(), callback));
        state.registered.push(handle.clone());
        Ok(handle)
    }

    fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let mut state = self.events.lock();
        state.unsubscribe_calls += 1;
        if let Some((removed, _)) = state.active.remove(&handle.id()) {
            state.deregistered.push(removed);
        }
    }

    fn dispatch_events(&self) -> Result<()> {
        let mut state = self.events.lock();
        state.dispatch_calls += 1;
        match state.script.pop_front().unwrap_or(Dispatch::Idle) {
            Dispatch::Deliver(events) => {
                Self::deliver(&state, &events);
                Ok(())
            }
            Dispatch::Fail(reason) => Err(VirtwatchError::Dispatch { reason }),
            Dispatch::Idle => {
                drop(state);
                std::thread::sleep(Duration::from_millis(1));
                Ok(())
            }
        }
    }

    fn close(&self) {
        self.events.lock().close_calls += 1;
    }

    fn name(&self) -> &str {
        "fake"
    }
}
