//! libvirt backend.
//!
//! Queries go through the safe `virt` bindings. Event registration uses the
//! raw `virt::sys` entry points because the safe layer does not wrap domain
//! event callbacks.
//!
//! The connection sits behind a mutex: concurrent snapshot passes serialize
//! on it, and `close()` can take it out once.

use crate::client::{domain_xml, ClientConfig, HypervisorClient};
use crate::error::{Result, VirtwatchError};
use crate::types::{
    AddressKind, BlockJobEvent, DiskVolume, DomainEvent, DomainField, DomainHandle, DomainInfo,
    EventCallback, EventKind, InterfaceAddress, LifecycleEvent, NetworkInterface,
    SubscriptionHandle,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_void};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::OnceLock;
use tracing::{debug, error, info, instrument, warn};
use virt::connect::Connect;
use virt::domain::Domain;
use virt::storage_pool::StoragePool;
use virt::storage_vol::StorageVol;
use virt::sys;

/// `VIR_DOMAIN_EVENT_ID_LIFECYCLE`
const EVENT_ID_LIFECYCLE: c_int = 0;

/// `VIR_DOMAIN_EVENT_ID_BLOCK_JOB`
const EVENT_ID_BLOCK_JOB: c_int = 4;

/// KiB → bytes (libvirt reports domain memory in KiB).
const KIB: u64 = 1024;

/// Return code of the one `virEventRegisterDefaultImpl` call per process.
static EVENT_IMPL: OnceLock<c_int> = OnceLock::new();

type LifecycleFn =
    unsafe extern "C" fn(sys::virConnectPtr, sys::virDomainPtr, c_int, c_int, *mut c_void);
type BlockJobFn = unsafe extern "C" fn(
    sys::virConnectPtr,
    sys::virDomainPtr,
    *const c_char,
    c_int,
    c_int,
    *mut c_void,
);
type GenericFn = unsafe extern "C" fn(sys::virConnectPtr, sys::virDomainPtr, *mut c_void);

struct Inner {
    conn: Option<Connect>,
    /// Callback IDs currently registered on `conn`
    callbacks: HashSet<c_int>,
    /// Dispatch tick timer, when events are enabled
    timer: Option<TickTimer>,
}

/// libvirt hypervisor client.
pub struct LibvirtClient {
    uri: String,
    inner: Mutex<Inner>,
}

impl LibvirtClient {
    /// Connect to `config.uri`.
    ///
    /// With `config.events` set, the default event loop implementation is
    /// registered first (libvirt requires this before the connection is
    /// opened) and a periodic no-op timer bounds how long one dispatch
    /// iteration can block.
    #[instrument(skip(config), fields(uri = %config.uri))]
    pub fn open(config: &ClientConfig) -> Result<Self> {
        let mut timer = None;
        if config.events {
            register_event_impl()?;
            timer = Some(add_tick_timer(config.event_tick_ms)?);
        }

        info!("Connecting to libvirt");
        // On failure `timer` is dropped here, which removes it from the loop.
        let conn =
            Connect::open(Some(config.uri.as_str())).map_err(|e| VirtwatchError::Connection {
                uri: config.uri.clone(),
                reason: e.to_string(),
            })?;
        info!("Connected to libvirt");

        Ok(Self {
            uri: config.uri.clone(),
            inner: Mutex::new(Inner { conn: Some(conn), callbacks: HashSet::new(), timer }),
        })
    }

    fn connection_error(&self, reason: impl ToString) -> VirtwatchError {
        VirtwatchError::Connection { uri: self.uri.clone(), reason: reason.to_string() }
    }

    /// Look up `domain` and run `f` on it while holding the connection lock.
    fn with_domain<T>(
        &self,
        domain: &DomainHandle,
        field: DomainField,
        f: impl FnOnce(&Connect, &Domain) -> std::result::Result<T, virt::error::Error>,
    ) -> Result<T> {
        let inner = self.inner.lock();
        let conn = inner
            .conn
            .as_ref()
            .ok_or_else(|| VirtwatchError::query(domain.name(), field, "connection closed"))?;
        let dom = Domain::lookup_by_name(conn, domain.name())
            .map_err(|e| VirtwatchError::query(domain.name(), field, e))?;
        f(conn, &dom).map_err(|e| VirtwatchError::query(domain.name(), field, e))
    }
}

impl HypervisorClient for LibvirtClient {
    fn list_active_domains(&self) -> Result<Vec<DomainHandle>> {
        let inner = self.inner.lock();
        let conn = inner.conn.as_ref().ok_or_else(|| self.connection_error("connection closed"))?;

        let domains = conn
            .list_all_domains(sys::VIR_CONNECT_LIST_DOMAINS_ACTIVE)
            .map_err(|e| self.connection_error(e))?;

        let mut handles = Vec::with_capacity(domains.len());
        for dom in domains {
            match dom.get_name() {
                Ok(name) => handles.push(DomainHandle::new(name)),
                Err(e) => warn!(error = %e, "Skipping active domain without a readable name"),
            }
        }

        debug!(count = handles.len(), "Listed active domains");
        Ok(handles)
    }

    fn domain_info(&self, domain: &DomainHandle) -> Result<DomainInfo> {
        self.with_domain(domain, DomainField::Info, |_, dom| {
            let info = dom.get_info()?;
            Ok(DomainInfo { vcpus: info.nr_virt_cpu, memory_bytes: info.memory * KIB })
        })
    }

    fn domain_disks(&self, domain: &DomainHandle) -> Result<Vec<DiskVolume>> {
        self.with_domain(domain, DomainField::Disks, |_, dom| {
            let xml = dom.get_xml_desc(0)?;
            Ok(domain_xml::parse_disks(&xml))
        })
    }

    fn volume_capacity(&self, domain: &DomainHandle, volume: &DiskVolume) -> Result<u64> {
        let inner = self.inner.lock();
        let conn = inner.conn.as_ref().ok_or_else(|| {
            VirtwatchError::query(domain.name(), DomainField::VolumeCapacity, "connection closed")
        })?;
        let capacity_error = |e: virt::error::Error| {
            VirtwatchError::query(
                domain.name(),
                DomainField::VolumeCapacity,
                format!("{}: {}", volume.source, e),
            )
        };

        let vol = match &volume.pool {
            Some(pool) => {
                let pool = StoragePool::lookup_by_name(conn, pool).map_err(capacity_error)?;
                StorageVol::lookup_by_name(&pool, &volume.source).map_err(capacity_error)?
            }
            None => StorageVol::lookup_by_path(conn, &volume.source).map_err(capacity_error)?,
        };
        let info = vol.get_info().map_err(capacity_error)?;
        Ok(info.capacity)
    }

    fn domain_uuid(&self, domain: &DomainHandle) -> Result<String> {
        self.with_domain(domain, DomainField::Uuid, |_, dom| dom.get_uuid_string())
    }

    fn domain_interfaces(&self, domain: &DomainHandle) -> Result<Vec<NetworkInterface>> {
        let inner = self.inner.lock();
        let conn = inner.conn.as_ref().ok_or_else(|| self.connection_error("connection closed"))?;
        let dom = Domain::lookup_by_name(conn, domain.name())
            .map_err(|e| VirtwatchError::query(domain.name(), DomainField::Ipv4, e))?;
        let interfaces = dom
            .interface_addresses(sys::VIR_DOMAIN_INTERFACE_ADDRESSES_SRC_LEASE, 0)
            .map_err(|e| self.connection_error(e))?;

        Ok(interfaces
            .into_iter()
            .map(|iface| NetworkInterface {
                name: iface.name,
                hwaddr: iface.hwaddr,
                addrs: iface
                    .addrs
                    .into_iter()
                    .map(|addr| InterfaceAddress {
                        kind: if addr.typed == sys::VIR_IP_ADDR_TYPE_IPV4 as i64 {
                            AddressKind::Ipv4
                        } else {
                            AddressKind::Ipv6
                        },
                        addr: addr.addr,
                        prefix: addr.prefix,
                    })
                    .collect(),
            })
            .collect())
    }

    #[instrument(skip(self, callback), fields(domain = %domain, kind = %kind))]
    fn subscribe(
        &self,
        domain: &DomainHandle,
        kind: EventKind,
        callback: EventCallback,
    ) -> Result<SubscriptionHandle> {
        let registration_error = |reason: String| VirtwatchError::Registration {
            domain: domain.name().to_string(),
            kind,
            reason,
        };

        let mut inner = self.inner.lock();
        let conn = inner
            .conn
            .as_ref()
            .ok_or_else(|| registration_error("connection closed".to_string()))?;
        let dom = Domain::lookup_by_name(conn, domain.name())
            .map_err(|e| registration_error(e.to_string()))?;

        let (event_id, trampoline): (c_int, GenericFn) = match kind {
            // SAFETY: libvirt invokes the callback with the signature matching
            // the event ID; the generic type only exists for registration.
            EventKind::Lifecycle => (EVENT_ID_LIFECYCLE, unsafe {
                std::mem::transmute::<LifecycleFn, GenericFn>(lifecycle_trampoline)
            }),
            EventKind::BlockJob => (EVENT_ID_BLOCK_JOB, unsafe {
                std::mem::transmute::<BlockJobFn, GenericFn>(block_job_trampoline)
            }),
        };

        let opaque = Box::into_raw(Box::new(callback)) as *mut c_void;
        // SAFETY: conn and dom are live for the duration of the call; on
        // success libvirt owns `opaque` and releases it through `free_callback`.
        let id = unsafe {
            sys::virConnectDomainEventRegisterAny(
                conn.as_ptr(),
                dom.as_ptr(),
                event_id,
                Some(trampoline),
                opaque,
                Some(free_callback),
            )
        };

        if id < 0 {
            // SAFETY: registration failed, so libvirt did not take ownership.
            unsafe { drop(Box::from_raw(opaque as *mut EventCallback)) };
            return Err(registration_error(virt::error::Error::last_error().to_string()));
        }

        inner.callbacks.insert(id);
        debug!(callback_id = id, "Registered domain event callback");
        Ok(SubscriptionHandle::new(i64::from(id), domain.name(), kind))
    }

    fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let mut inner = self.inner.lock();
        let Ok(id) = c_int::try_from(handle.id()) else {
            return;
        };
        if !inner.callbacks.remove(&id) {
            return;
        }
        let Some(conn) = inner.conn.as_ref() else {
            return;
        };
        // SAFETY: `id` was returned by a successful registration on this connection.
        let rc = unsafe { sys::virConnectDomainEventDeregisterAny(conn.as_ptr(), id) };
        if rc < 0 {
            warn!(subscription = %handle, "libvirt refused to deregister event callback");
        }
    }

    fn dispatch_events(&self) -> Result<()> {
        // SAFETY: the default event implementation was registered in `open`.
        let rc = unsafe { sys::virEventRunDefaultImpl() };
        if rc < 0 {
            return Err(VirtwatchError::Dispatch {
                reason: virt::error::Error::last_error().to_string(),
            });
        }
        Ok(())
    }

    fn close(&self) {
        let mut inner = self.inner.lock();
        drop(inner.timer.take());
        if let Some(mut conn) = inner.conn.take() {
            for id in inner.callbacks.drain() {
                // SAFETY: registered on this connection and not yet deregistered.
                unsafe { sys::virConnectDomainEventDeregisterAny(conn.as_ptr(), id) };
            }
            if let Err(e) = conn.close() {
                error!(error = %e, "Failed to close libvirt connection");
            } else {
                info!(uri = %self.uri, "Closed libvirt connection");
            }
        }
    }

    fn name(&self) -> &str {
        "libvirt"
    }
}

impl Drop for LibvirtClient {
    fn drop(&mut self) {
        self.close();
    }
}

fn register_event_impl() -> Result<()> {
    let mut first_error = None;
    let rc = *EVENT_IMPL.get_or_init(|| {
        // SAFETY: must run before any connection is opened; the OnceLock
        // keeps it to a single registration per process.
        let rc = unsafe { sys::virEventRegisterDefaultImpl() };
        if rc < 0 {
            first_error = Some(virt::error::Error::last_error().to_string());
        }
        rc
    });
    if rc < 0 {
        return Err(VirtwatchError::Connection {
            uri: String::new(),
            reason: format!(
                "failed to register default event implementation: {}",
                first_error.unwrap_or_else(|| format!("earlier registration returned {}", rc))
            ),
        });
    }
    Ok(())
}

/// Periodic no-op timeout; removed from the event loop on drop.
struct TickTimer(c_int);

impl TickTimer {
    fn id(&self) -> c_int {
        self.0
    }
}

impl Drop for TickTimer {
    fn drop(&mut self) {
        // SAFETY: the id came from virEventAddTimeout and is removed only here.
        unsafe { sys::virEventRemoveTimeout(self.0) };
    }
}

fn add_tick_timer(tick_ms: u64) -> Result<TickTimer> {
    let tick = c_int::try_from(tick_ms.max(1)).unwrap_or(c_int::MAX);
    // SAFETY: no opaque data is attached to the timer.
    let timer =
        unsafe { sys::virEventAddTimeout(tick, Some(tick_noop), std::ptr::null_mut(), None) };
    if timer < 0 {
        return Err(VirtwatchError::Dispatch {
            reason: "failed to add event loop tick timer".to_string(),
        });
    }
    debug!(timer, tick_ms, "Added event loop tick timer");
    Ok(TickTimer(timer))
}

unsafe extern "C" fn tick_noop(_timer: c_int, _opaque: *mut c_void) {}

unsafe extern "C" fn free_callback(opaque: *mut c_void) {
    if !opaque.is_null() {
        drop(Box::from_raw(opaque as *mut EventCallback));
    }
}

unsafe fn domain_name(dom: sys::virDomainPtr) -> String {
    let name = sys::virDomainGetName(dom);
    if name.is_null() {
        return String::from("<unknown>");
    }
    CStr::from_ptr(name).to_string_lossy().into_owned()
}

unsafe fn deliver(opaque: *mut c_void, event: DomainEvent) {
    if opaque.is_null() {
        return;
    }
    let callback = &*(opaque as *const EventCallback);
    if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
        error!("Domain event callback panicked");
    }
}

unsafe extern "C" fn lifecycle_trampoline(
    _conn: sys::virConnectPtr,
    dom: sys::virDomainPtr,
    event: c_int,
    detail: c_int,
    opaque: *mut c_void,
) {
    let domain = domain_name(dom);
    deliver(
        opaque,
        DomainEvent::Lifecycle { domain, event: LifecycleEvent::from_code(event), detail },
    );
}

unsafe extern "C" fn block_job_trampoline(
    _conn: sys::virConnectPtr,
    dom: sys::virDomainPtr,
    disk: *const c_char,
    job_type: c_int,
    status: c_int,
    opaque: *mut c_void,
) {
    let domain = domain_name(dom);
    let disk = if disk.is_null() {
        String::new()
    } else {
        CStr::from_ptr(disk).to_string_lossy().into_owned()
    };
    let job = BlockJobEvent { disk, job_type, status };
    deliver(opaque, DomainEvent::BlockJob { domain, job });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_config(uri: &str) -> ClientConfig {
        ClientConfig { uri: uri.to_string(), events: true, event_tick_ms: 50 }
    }

    #[test]
    fn test_event_impl_registration_is_stable() {
        register_event_impl().unwrap();
        register_event_impl().unwrap();
        assert!(EVENT_IMPL.get().is_some_and(|rc| *rc >= 0));
    }

    #[test]
    fn test_dropped_tick_timer_is_removed() {
        register_event_impl().unwrap();
        let timer = add_tick_timer(50).unwrap();
        let id = timer.id();
        drop(timer);
        // A second removal fails once the timer is gone.
        assert!(unsafe { sys::virEventRemoveTimeout(id) } < 0);
    }

    #[test]
    fn test_failed_open_is_a_connection_error() {
        let err = LibvirtClient::open(&event_config("test:///nonexistent/virtwatch.xml"))
            .err()
            .unwrap();
        assert!(matches!(err, VirtwatchError::Connection { .. }));
    }

    #[test]
    fn test_close_releases_timer_and_connection() {
        let client = LibvirtClient::open(&event_config("test:///default")).unwrap();
        let id = client.inner.lock().timer.as_ref().map(TickTimer::id).unwrap();

        client.close();
        client.close();
        let inner = client.inner.lock();
        assert!(inner.timer.is_none());
        assert!(inner.conn.is_none());
        drop(inner);
        assert!(unsafe { sys::virEventRemoveTimeout(id) } < 0);
    }

    #[test]
    fn test_test_driver_domains() {
        let config = ClientConfig { uri: "test:///default".to_string(), ..Default::default() };
        let client = LibvirtClient::open(&config).unwrap();
        let domains = client.list_active_domains().unwrap();
        assert!(!domains.is_empty());
        let info = client.domain_info(&domains[0]).unwrap();
        assert!(info.vcpus > 0);
        assert_eq!(info.memory_bytes % KIB, 0);
        assert!(!client.domain_uuid(&domains[0]).unwrap().is_empty());
    }
}
