//! Event subscription manager.
//!
//! Registers lifecycle and block-job callbacks for every active domain, runs
//! the hypervisor's blocking dispatch loop, and tears everything down in one
//! explicit drain phase.
//!
//! ```text
//! Uninitialized -> Connected -> EventLoopRunning -> Draining -> Closed
//! ```
//!
//! The manager owns the table of successful subscriptions. Draining
//! deregisters each of them exactly once (newest first) and then closes the
//! client, whether the loop ended through the stop signal, a dispatch error,
//! or the manager being dropped.

use crate::client::HypervisorClient;
use crate::error::{Result, VirtwatchError};
use crate::observability::metrics;
use crate::types::{DomainEvent, EventCallback, EventKind, SubscriptionHandle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Lifecycle of an `EventSubscriptionManager`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Uninitialized,
    Connected,
    EventLoopRunning,
    Draining,
    Closed,
}

/// Cooperative stop flag for the dispatch loop.
///
/// Checked before every dispatch iteration; clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Extra consumer of reported events (besides logging and metrics).
pub type EventObserver = Arc<dyn Fn(&DomainEvent) + Send + Sync>;

/// Outcome of the startup registration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistrationReport {
    pub domains: usize,
    pub registered: usize,
    pub failed: usize,
}

/// Owns the event subscriptions of one hypervisor connection.
pub struct EventSubscriptionManager {
    client: Option<Arc<dyn HypervisorClient>>,
    state: ManagerState,
    subscriptions: Vec<SubscriptionHandle>,
    observer: Option<EventObserver>,
}

impl EventSubscriptionManager {
    pub fn new() -> Self {
        Self {
            client: None,
            state: ManagerState::Uninitialized,
            subscriptions: Vec::new(),
            observer: None,
        }
    }

    /// Manager for an already connected client.
    pub fn with_client(client: Arc<dyn HypervisorClient>) -> Self {
        let mut manager = Self::new();
        manager.client = Some(client);
        manager.state = ManagerState::Connected;
        manager
    }

    pub fn with_observer(mut self, observer: EventObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn state(&self) -> ManagerState {
        self.state
    }

    /// Currently recorded subscriptions, in registration order.
    pub fn subscriptions(&self) -> &[SubscriptionHandle] {
        &self.subscriptions
    }

    /// `Uninitialized -> Connected`: establish the client.
    pub fn connect<F>(&mut self, connect: F) -> Result<()>
    where
        F: FnOnce() -> Result<Arc<dyn HypervisorClient>>,
    {
        self.expect_state(ManagerState::Uninitialized, "connect")?;
        let client = connect()?;
        info!(backend = client.name(), "Hypervisor client connected");
        self.client = Some(client);
        self.state = ManagerState::Connected;
        Ok(())
    }

    /// `Connected -> EventLoopRunning`: subscribe every active domain.
    ///
    /// A failed subscription is logged and skipped. Only a failure to list
    /// domains is returned.
    #[instrument(skip(self))]
    pub fn register_all(&mut self) -> Result<RegistrationReport> {
        self.expect_state(ManagerState::Connected, "register_all")?;
        let client = self.client()?;

        let domains = client.list_active_domains()?;
        let mut report = RegistrationReport { domains: domains.len(), ..Default::default() };

        for domain in &domains {
            for kind in EventKind::ALL {
                match client.subscribe(domain, kind, self.callback()) {
                    Ok(handle) => {
                        debug!(subscription = %handle, "Subscribed");
                        self.subscriptions.push(handle);
                        report.registered += 1;
                    }
                    Err(e) => {
                        warn!(domain = %domain, kind = %kind, error = %e, "Subscription failed");
                        metrics::record_subscription_failure(kind);
                        report.failed += 1;
                    }
                }
            }
        }

        info!(
            domains = report.domains,
            registered = report.registered,
            failed = report.failed,
            "Event subscriptions registered"
        );
        self.state = ManagerState::EventLoopRunning;
        Ok(report)
    }

    /// Run the dispatch loop until `stop` is raised or dispatch fails, then drain.
    ///
    /// Returns the dispatch error, if any, after the drain has completed.
    pub fn run(&mut self, stop: &StopSignal) -> Result<()> {
        self.expect_state(ManagerState::EventLoopRunning, "run")?;
        let client = self.client()?;

        info!("Event loop running");
        let outcome = loop {
            if stop.is_stopped() {
                info!("Stop requested, leaving event loop");
                break Ok(());
            }
            if let Err(e) = client.dispatch_events() {
                error!(error = %e, "Event dispatch failed");
                break Err(e);
            }
        };

        self.drain();
        outcome
    }

    /// `Draining -> Closed`: deregister every recorded subscription, then close.
    ///
    /// Safe to call more than once; later calls do nothing.
    pub fn drain(&mut self) {
        if self.state == ManagerState::Closed {
            return;
        }
        self.state = ManagerState::Draining;

        let subscriptions = std::mem::take(&mut self.subscriptions);
        if let Some(client) = self.client.take() {
            info!(count = subscriptions.len(), "Deregistering event subscriptions");
            for handle in subscriptions.iter().rev() {
                client.unsubscribe(handle);
            }
            client.close();
        }

        self.state = ManagerState::Closed;
        info!("Event subscription manager closed");
    }

    fn client(&self) -> Result<Arc<dyn HypervisorClient>> {
        self.client
            .clone()
            .ok_or_else(|| VirtwatchError::Internal("event manager has no client".to_string()))
    }

    fn expect_state(&self, expected: ManagerState, operation: &str) -> Result<()> {
        if self.state != expected {
            return Err(VirtwatchError::Internal(format!(
                "{} requires state {:?}, manager is {:?}",
                operation, expected, self.state
            )));
        }
        Ok(())
    }

    fn callback(&self) -> EventCallback {
        let observer = self.observer.clone();
        Box::new(move |event| {
            report(&event);
            if let Some(observer) = &observer {
                observer(&event);
            }
        })
    }
}

impl Default for EventSubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventSubscriptionManager {
    fn drop(&mut self) {
        self.drain();
    }
}

/// Log and count one event. Runs inside the dispatch loop, so it must not block.
fn report(event: &DomainEvent) {
    metrics::record_event(event);
    match event {
        DomainEvent::Lifecycle { domain, detail, .. } => {
            info!(domain = %domain, detail, "{}", event);
        }
        DomainEvent::BlockJob { domain, job } => {
            info!(domain = %domain, disk = %job.disk, "{}", event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Dispatch, FakeClient, FakeDomain};
    use crate::types::{BlockJobEvent, LifecycleEvent};
    use parking_lot::Mutex;

    fn fake(domains: &[&str]) -> FakeClient {
        domains
            .iter()
            .fold(FakeClient::new(), |client, name| client.with_domain(FakeDomain::new(name)))
    }

    #[test]
    fn test_state_transitions() {
        let fake = Arc::new(fake(&["a"]));
        let client: Arc<dyn HypervisorClient> = fake.clone();

        let mut manager = EventSubscriptionManager::new();
        assert_eq!(manager.state(), ManagerState::Uninitialized);
        manager.connect(|| Ok(client)).unwrap();
        assert_eq!(manager.state(), ManagerState::Connected);
        manager.register_all().unwrap();
        assert_eq!(manager.state(), ManagerState::EventLoopRunning);

        let stop = StopSignal::new();
        stop.stop();
        manager.run(&stop).unwrap();
        assert_eq!(manager.state(), ManagerState::Closed);
        assert_eq!(fake.close_calls(), 1);
    }

    #[test]
    fn test_connect_failure_keeps_uninitialized() {
        let mut manager = EventSubscriptionManager::new();
        let err = manager
            .connect(|| {
                Err(VirtwatchError::Connection {
                    uri: "qemu:///system".to_string(),
                    reason: "no socket".to_string(),
                })
            })
            .unwrap_err();
        assert!(matches!(err, VirtwatchError::Connection { .. }));
        assert_eq!(manager.state(), ManagerState::Uninitialized);
    }

    #[test]
    fn test_registers_both_kinds_per_domain() {
        let fake = Arc::new(fake(&["a", "b", "c"]));
        let mut manager = EventSubscriptionManager::with_client(fake.clone());

        let report = manager.register_all().unwrap();
        assert_eq!(report, RegistrationReport { domains: 3, registered: 6, failed: 0 });
        assert_eq!(manager.subscriptions().len(), 6);
        assert_eq!(manager.subscriptions(), fake.registered().as_slice());
    }

    #[test]
    fn test_partial_registration_continues() {
        let fake = Arc::new(
            fake(&["a", "b"])
                .fail_subscription("a", EventKind::BlockJob)
                .fail_subscription("b", EventKind::Lifecycle),
        );
        let mut manager = EventSubscriptionManager::with_client(fake.clone());

        let report = manager.register_all().unwrap();
        assert_eq!(report.registered, 2);
        assert_eq!(report.failed, 2);
        let kinds: Vec<(String, EventKind)> = manager
            .subscriptions()
            .iter()
            .map(|h| (h.domain().to_string(), h.kind()))
            .collect();
        assert_eq!(
            kinds,
            vec![("a".to_string(), EventKind::Lifecycle), ("b".to_string(), EventKind::BlockJob)]
        );

        manager.drain();
        assert_eq!(fake.deregistered().len(), 2);
        assert_eq!(fake.unsubscribe_calls(), 2);
    }

    #[test]
    fn test_listing_failure_is_fatal_and_drop_closes() {
        let fake = Arc::new(fake(&["a"]).fail_listing());
        let mut manager = EventSubscriptionManager::with_client(fake.clone());

        let err = manager.register_all().unwrap_err();
        assert!(matches!(err, VirtwatchError::Connection { .. }));
        assert_eq!(manager.state(), ManagerState::Connected);

        drop(manager);
        assert_eq!(fake.close_calls(), 1);
        assert_eq!(fake.unsubscribe_calls(), 0);
    }

    #[test]
    fn test_dispatch_error_on_third_call_drains() {
        let fake = Arc::new(fake(&["a", "b"]).script([
            Dispatch::Idle,
            Dispatch::Idle,
            Dispatch::Fail("event loop broken".to_string()),
        ]));
        let mut manager = EventSubscriptionManager::with_client(fake.clone());
        manager.register_all().unwrap();
        let registered = fake.registered();

        let err = manager.run(&StopSignal::new()).unwrap_err();
        assert!(matches!(err, VirtwatchError::Dispatch { .. }));
        assert_eq!(fake.dispatch_calls(), 3);
        assert_eq!(manager.state(), ManagerState::Closed);

        // Every recorded handle deregistered exactly once, newest first.
        let mut expected = registered.clone();
        expected.reverse();
        assert_eq!(fake.deregistered(), expected);
        assert_eq!(fake.unsubscribe_calls(), registered.len());
        assert_eq!(fake.active_subscriptions(), 0);
        assert_eq!(fake.close_calls(), 1);

        // A second drain (and the drop after it) must not repeat the teardown.
        manager.drain();
        drop(manager);
        assert_eq!(fake.unsubscribe_calls(), registered.len());
        assert_eq!(fake.close_calls(), 1);
    }

    #[test]
    fn test_callbacks_report_events() {
        let fake = Arc::new(fake(&["web"]).script([
            Dispatch::Deliver(vec![
                DomainEvent::Lifecycle {
                    domain: "web".to_string(),
                    event: LifecycleEvent::Suspended,
                    detail: 0,
                },
                DomainEvent::BlockJob {
                    domain: "web".to_string(),
                    job: BlockJobEvent { disk: "vda".to_string(), job_type: 1, status: 0 },
                },
            ]),
            Dispatch::Fail("done".to_string()),
        ]));

        let seen: Arc<Mutex<Vec<String>>> = Arc::default();
        let sink = seen.clone();
        let observer: EventObserver =
            Arc::new(move |event: &DomainEvent| sink.lock().push(event.to_string()));
        let mut manager =
            EventSubscriptionManager::with_client(fake.clone()).with_observer(observer);
        manager.register_all().unwrap();
        let _ = manager.run(&StopSignal::new());

        assert_eq!(
            *seen.lock(),
            vec![
                "Domain 'web' suspended".to_string(),
                "Domain 'web' block job event: disk=vda type=pull(1) status=completed(0)"
                    .to_string(),
            ]
        );
    }

    #[test]
    fn test_stop_signal_from_another_thread() {
        let fake = Arc::new(fake(&["a"]));
        let mut manager = EventSubscriptionManager::with_client(fake.clone());
        manager.register_all().unwrap();

        let stop = StopSignal::new();
        let remote = stop.clone();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            remote.stop();
        });

        manager.run(&stop).unwrap();
        stopper.join().unwrap();
        assert!(fake.dispatch_calls() >= 1);
        assert_eq!(fake.deregistered().len(), 2);
        assert_eq!(fake.close_calls(), 1);
    }

    #[test]
    fn test_run_requires_registration() {
        let fake = Arc::new(fake(&["a"]));
        let mut manager = EventSubscriptionManager::with_client(fake);
        let err = manager.run(&StopSignal::new()).unwrap_err();
        assert!(matches!(err, VirtwatchError::Internal(_)));
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let fake = fake(&["a"]);
        let domain = crate::types::DomainHandle::new("a");
        let handle = fake.subscribe(&domain, EventKind::Lifecycle, Box::new(|_| {})).unwrap();
        fake.unsubscribe(&handle);
        fake.unsubscribe(&handle);
        fake.unsubscribe(&SubscriptionHandle::new(999, "a", EventKind::BlockJob));
        assert_eq!(fake.deregistered(), vec![handle]);
        assert_eq!(fake.unsubscribe_calls(), 3);
    }
}
