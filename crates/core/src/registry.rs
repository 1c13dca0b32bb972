//! In-process provider registry.
//!
//! Records are published as immutable `Arc`s under a write lock; every
//! publish or withdrawal bumps a watch generation so that blocked waiters
//! re-run their lookup.

use crate::filter::Filter;
use crate::record::{MatchRules, ProviderRecord};
use crossload_api::{ModuleId, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Handle returned by [`ProviderRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegistrationHandle(u64);

impl fmt::Display for RegistrationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reg-{}", self.0)
    }
}

/// Registry statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub total_records: usize,
    pub modules: usize,
    pub by_context: BTreeMap<String, usize>,
}

#[derive(Default)]
struct Index {
    // Handles grow monotonically, so key order is registration order.
    records: BTreeMap<RegistrationHandle, Arc<ProviderRecord>>,
    by_key: HashMap<(ModuleId, String), RegistrationHandle>,
}

impl Index {
    fn remove(&mut self, handle: RegistrationHandle) -> Option<Arc<ProviderRecord>> {
        let record = self.records.remove(&handle)?;
        self.by_key
            .remove(&(record.module_id(), record.context().to_string()));
        record.withdraw();
        Some(record)
    }

    fn insert(&mut self, handle: RegistrationHandle, record: ProviderRecord) {
        let key = (record.module_id(), record.context().to_string());
        if let Some(previous) = self.by_key.get(&key).copied() {
            self.remove(previous);
        }
        self.by_key.insert(key, handle);
        self.records.insert(handle, Arc::new(record));
    }

    fn handles_of(&self, module: ModuleId) -> Vec<RegistrationHandle> {
        self.by_key
            .iter()
            .filter(|((id, _), _)| *id == module)
            .map(|(_, handle)| *handle)
            .collect()
    }
}

/// Decrements the waiter count on every exit path of a wait.
struct WaiterGuard<'a>(&'a AtomicUsize);

impl<'a> WaiterGuard<'a> {
    fn enter(count: &'a AtomicUsize) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self(count)
    }
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Thread-safe store of published provider records.
pub struct ProviderRegistry {
    index: RwLock<Index>,
    rules: MatchRules,
    next_handle: AtomicU64,
    generation: watch::Sender<u64>,
    waiters: AtomicUsize,
    closed: CancellationToken,
}

impl ProviderRegistry {
    pub fn new(rules: MatchRules) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            index: RwLock::new(Index::default()),
            rules,
            next_handle: AtomicU64::new(1),
            generation,
            waiters: AtomicUsize::new(0),
            closed: CancellationToken::new(),
        }
    }

    pub fn rules(&self) -> MatchRules {
        self.rules
    }

    fn read(&self) -> RwLockReadGuard<'_, Index> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Index> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn allocate(&self) -> RegistrationHandle {
        RegistrationHandle(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    fn notify(&self) {
        self.generation.send_modify(|generation| *generation += 1);
    }

    /// Publish `record`, replacing any record of the same module and context.
    pub fn register(&self, record: ProviderRecord) -> RegistrationHandle {
        let handle = self.allocate();
        tracing::debug!(
            "Registering {} capabilities for module {} context '{}' as {}",
            record.classes().len() + record.resources().len(),
            record.module_id(),
            record.context(),
            handle
        );
        self.write().insert(handle, record);
        self.notify();
        handle
    }

    /// Withdraw one record. Returns false for an unknown or already withdrawn handle.
    pub fn unregister(&self, handle: RegistrationHandle) -> bool {
        let removed = self.write().remove(handle).is_some();
        if removed {
            self.notify();
        }
        removed
    }

    /// Withdraw every record of `module` and publish `records` in its place,
    /// atomically with respect to lookups.
    pub fn replace_module(
        &self,
        module: ModuleId,
        records: Vec<ProviderRecord>,
    ) -> Vec<RegistrationHandle> {
        let handles: Vec<_> = records.iter().map(|_| self.allocate()).collect();
        {
            let mut index = self.write();
            for stale in index.handles_of(module) {
                index.remove(stale);
            }
            for (handle, record) in handles.iter().copied().zip(records) {
                if record.module_id() != module {
                    tracing::warn!(
                        "Record for module {} passed to replace_module({}), publishing under its own module",
                        record.module_id(),
                        module
                    );
                }
                index.insert(handle, record);
            }
        }
        self.notify();
        handles
    }

    /// Withdraw every record of `module`, returning how many were removed.
    pub fn unregister_module(&self, module: ModuleId) -> usize {
        let removed = {
            let mut index = self.write();
            index
                .handles_of(module)
                .into_iter()
                .filter(|handle| index.remove(*handle).is_some())
                .count()
        };
        if removed > 0 {
            self.notify();
        }
        removed
    }

    /// Every record satisfying `filter`, in registration order.
    pub fn lookup(&self, filter: &Filter) -> Vec<Arc<ProviderRecord>> {
        self.read()
            .records
            .values()
            .filter(|record| record.satisfies(filter, self.rules))
            .cloned()
            .collect()
    }

    fn first_match(&self, filter: &Filter) -> Option<Arc<ProviderRecord>> {
        self.read()
            .records
            .values()
            .find(|record| record.satisfies(filter, self.rules))
            .cloned()
    }

    /// First record satisfying `filter`, waiting up to `timeout` for one to
    /// be published.
    ///
    /// Fails with the filter's not-found error on timeout, cancellation or
    /// registry shutdown.
    pub async fn await_first(
        &self,
        filter: &Filter,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Arc<ProviderRecord>> {
        let _guard = WaiterGuard::enter(&self.waiters);
        // Subscribe before the first lookup so a publish in between is not missed.
        let mut changes = self.generation.subscribe();
        changes.borrow_and_update();
        if let Some(record) = self.first_match(filter) {
            return Ok(record);
        }

        // A timeout past the clock's range waits until publish, cancel or close.
        let deadline = tokio::time::Instant::now().checked_add(timeout);
        let expired = async {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(expired);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(filter.not_found(Some("cancelled".to_string())));
                }
                _ = self.closed.cancelled() => {
                    return Err(filter.not_found(Some("registry closed".to_string())));
                }
                _ = &mut expired => {
                    tracing::debug!("No provider for {} within {:?}", filter, timeout);
                    return Err(filter.not_found(Some(format!("timed out after {timeout:?}"))));
                }
                changed = changes.changed() => {
                    if changed.is_err() {
                        return Err(filter.not_found(Some("registry closed".to_string())));
                    }
                    if let Some(record) = self.first_match(filter) {
                        return Ok(record);
                    }
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all published records in registration order.
    pub fn records(&self) -> Vec<Arc<ProviderRecord>> {
        self.read().records.values().cloned().collect()
    }

    pub fn records_of(&self, module: ModuleId) -> Vec<Arc<ProviderRecord>> {
        self.read()
            .records
            .values()
            .filter(|record| record.module_id() == module)
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> RegistryStats {
        let index = self.read();
        let mut stats = RegistryStats {
            total_records: index.records.len(),
            ..RegistryStats::default()
        };
        let mut modules = BTreeSet::new();
        for record in index.records.values() {
            modules.insert(record.module_id());
            *stats
                .by_context
                .entry(record.context().to_string())
                .or_default() += 1;
        }
        stats.modules = modules.len();
        stats
    }

    /// Number of callers currently inside [`ProviderRegistry::await_first`].
    pub fn active_waiters(&self) -> usize {
        self.waiters.load(Ordering::SeqCst)
    }

    /// Withdraw everything and release all waiters.
    pub fn close(&self) {
        self.closed.cancel();
        let mut index = self.write();
        let handles: Vec<_> = index.records.keys().copied().collect();
        for handle in handles {
            index.remove(handle);
        }
        drop(index);
        self.notify();
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new(MatchRules::default())
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("records", &self.len())
            .field("rules", &self.rules)
            .field("waiters", &self.active_waiters())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterBuilder;
    use crate::record::ContextCapabilities;
    use crate::testing::FakeModule;
    use crossload_api::DelegationError;
    use std::time::Instant;

    fn record(id: u64, version: &str, context: &str, classes: &[&str]) -> ProviderRecord {
        let module = FakeModule::builder(id, &format!("provider.{id}"), version).build();
        let mut caps = ContextCapabilities::default();
        caps.classes = classes.iter().map(|c| c.to_string()).collect();
        ProviderRecord::new(module, context, caps)
    }

    fn class_filter(name: &str) -> Filter {
        FilterBuilder::build_class(name, None, None).unwrap()
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = ProviderRegistry::default();
        registry.register(record(1, "1.0.0", "", &["a.X", "a.Y"]));

        assert_eq!(registry.lookup(&class_filter("a.X")).len(), 1);
        assert!(registry.lookup(&class_filter("a.Z")).is_empty());
    }

    #[test]
    fn test_same_module_and_context_replaces() {
        let registry = ProviderRegistry::default();
        let first = registry.register(record(1, "1.0.0", "", &["a.X"]));
        registry.register(record(1, "1.0.0", "", &["a.Y"]));

        assert_eq!(registry.len(), 1);
        assert!(registry.lookup(&class_filter("a.X")).is_empty());
        assert!(!registry.unregister(first));
    }

    #[test]
    fn test_lookup_preserves_registration_order() {
        let registry = ProviderRegistry::default();
        registry.register(record(2, "2.0.0", "", &["a.X"]));
        registry.register(record(1, "1.0.0", "", &["a.X"]));

        let found = registry.lookup(&class_filter("a.X"));
        let versions: Vec<_> = found.iter().map(|r| r.version().to_string()).collect();
        assert_eq!(versions, vec!["2.0.0", "1.0.0"]);
    }

    #[test]
    fn test_version_isolation() {
        let registry = ProviderRegistry::default();
        registry.register(record(1, "1.0.0", "", &["a.X"]));
        registry.register(record(2, "2.0.0", "", &["a.X"]));

        let v1 = FilterBuilder::build_class("a.X", None, Some("1.0.0")).unwrap();
        let found = registry.lookup(&v1);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].module_id(), ModuleId(1));
    }

    #[test]
    fn test_unregister_withdraws_record() {
        let registry = ProviderRegistry::default();
        let handle = registry.register(record(1, "1.0.0", "", &["a.X"]));
        let held = registry.lookup(&class_filter("a.X")).remove(0);

        assert!(registry.unregister(handle));
        assert!(held.is_withdrawn());
        assert!(registry.lookup(&class_filter("a.X")).is_empty());
        assert!(!registry.unregister(handle));
    }

    #[test]
    fn test_replace_module_drops_stale_contexts() {
        let registry = ProviderRegistry::default();
        registry.register(record(1, "1.0.0", "", &["a.X"]));
        registry.register(record(1, "1.0.0", "foo", &["a.F"]));
        registry.register(record(2, "1.0.0", "", &["b.X"]));

        let handles = registry.replace_module(ModuleId(1), vec![record(1, "1.0.0", "", &["a.Y"])]);

        assert_eq!(handles.len(), 1);
        assert_eq!(registry.records_of(ModuleId(1)).len(), 1);
        assert_eq!(registry.len(), 2);
        assert!(registry.lookup(&class_filter("a.X")).is_empty());
        assert_eq!(registry.lookup(&class_filter("a.Y")).len(), 1);
    }

    #[test]
    fn test_unregister_module_and_stats() {
        let registry = ProviderRegistry::default();
        registry.register(record(1, "1.0.0", "", &["a.X"]));
        registry.register(record(1, "1.0.0", "foo", &["a.X"]));
        registry.register(record(2, "1.0.0", "foo", &["b.X"]));

        let stats = registry.stats();
        assert_eq!(stats.total_records, 3);
        assert_eq!(stats.modules, 2);
        assert_eq!(stats.by_context.get("foo"), Some(&2));

        assert_eq!(registry.unregister_module(ModuleId(1)), 2);
        assert_eq!(registry.unregister_module(ModuleId(1)), 0);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_await_first_returns_existing_match() {
        let registry = ProviderRegistry::default();
        registry.register(record(1, "1.0.0", "", &["a.X"]));

        let found = registry
            .await_first(&class_filter("a.X"), Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(found.module_id(), ModuleId(1));
        assert_eq!(registry.active_waiters(), 0);
    }

    #[tokio::test]
    async fn test_await_first_times_out() {
        let registry = ProviderRegistry::default();
        let started = Instant::now();
        let err = registry
            .await_first(&class_filter("a.X"), Duration::from_millis(50), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(matches!(err, DelegationError::ClassNotFound { ref name, .. } if name == "a.X"));
        assert_eq!(registry.active_waiters(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_await_first_wakes_on_publish() {
        let registry = Arc::new(ProviderRegistry::default());
        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry
                    .await_first(
                        &class_filter("a.X"),
                        Duration::from_secs(5),
                        &CancellationToken::new(),
                    )
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        registry.register(record(1, "1.0.0", "", &["a.Unrelated"]));
        registry.register(record(2, "1.0.0", "", &["a.X"]));

        let found = waiter.await.unwrap().unwrap();
        assert_eq!(found.module_id(), ModuleId(2));
        assert_eq!(registry.active_waiters(), 0);
    }

    #[tokio::test]
    async fn test_await_first_cancellation_releases_waiter() {
        let registry = Arc::new(ProviderRegistry::default());
        let cancel = CancellationToken::new();
        let waiter = {
            let registry = registry.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                registry
                    .await_first(&class_filter("a.X"), Duration::from_secs(30), &cancel)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(registry.active_waiters(), 1);
        cancel.cancel();

        let err = waiter.await.unwrap().unwrap_err();
        assert_eq!(
            err,
            DelegationError::class_not_found_with("a.X", "cancelled")
        );
        assert_eq!(registry.active_waiters(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_await_first_unbounded_timeout() {
        let registry = Arc::new(ProviderRegistry::default());
        let cancel = CancellationToken::new();
        let waiter = {
            let registry = registry.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                registry
                    .await_first(&class_filter("a.X"), Duration::MAX, &cancel)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.register(record(1, "1.0.0", "", &["a.X"]));
        let found = waiter.await.unwrap().unwrap();
        assert_eq!(found.module_id(), ModuleId(1));

        cancel.cancel();
        let err = registry
            .await_first(&class_filter("a.Missing"), Duration::MAX, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(registry.active_waiters(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_and_readers() {
        const MODULES: u64 = 6;
        const ROUNDS: usize = 200;
        const PER_RECORD: usize = 8;

        fn generation(id: u64, round: usize, context: &str) -> ProviderRecord {
            let mut classes = vec!["shared.X".to_string()];
            classes.extend((0..PER_RECORD).map(|k| format!("gen{round}.m{id}.C{k}")));
            let classes: Vec<&str> = classes.iter().map(String::as_str).collect();
            record(id, "1.0.0", context, &classes)
        }

        // Every class of a record comes from one generation.
        fn assert_whole(record: &ProviderRecord) {
            assert_eq!(record.classes().len(), PER_RECORD + 1);
            let prefixes: BTreeSet<&str> = record
                .classes()
                .iter()
                .filter(|name| name.as_str() != "shared.X")
                .filter_map(|name| name.split('.').next())
                .collect();
            assert_eq!(prefixes.len(), 1);
        }

        let registry = Arc::new(ProviderRegistry::default());
        let mut tasks = tokio::task::JoinSet::new();

        for id in 1..=MODULES {
            let registry = registry.clone();
            tasks.spawn(async move {
                for round in 0..ROUNDS {
                    match round % 3 {
                        0 | 1 => {
                            registry.replace_module(
                                ModuleId(id),
                                vec![generation(id, round, ""), generation(id, round, "foo")],
                            );
                        }
                        _ => {
                            registry.unregister_module(ModuleId(id));
                        }
                    }
                    tokio::task::yield_now().await;
                }
                registry.replace_module(
                    ModuleId(id),
                    vec![generation(id, ROUNDS, ""), generation(id, ROUNDS, "foo")],
                );
            });
        }

        for _ in 0..4 {
            let registry = registry.clone();
            tasks.spawn(async move {
                let shared = class_filter("shared.X");
                for _ in 0..ROUNDS {
                    let found = registry.lookup(&shared);
                    assert!(found.len() <= MODULES as usize);
                    found.iter().for_each(|record| assert_whole(record));
                    registry.records().iter().for_each(|record| assert_whole(record));
                    tokio::task::yield_now().await;
                }
            });
        }

        while let Some(result) = tasks.join_next().await {
            result.unwrap();
        }

        assert_eq!(registry.len(), (MODULES * 2) as usize);
        assert_eq!(registry.stats().modules, MODULES as usize);
        assert_eq!(registry.lookup(&class_filter("shared.X")).len(), MODULES as usize);
        let last = format!("gen{ROUNDS}");
        for record in registry.records() {
            assert_whole(&record);
            assert!(record.classes().iter().any(|name| name.starts_with(&last)));
        }
    }

    #[tokio::test]
    async fn test_close_releases_waiters() {
        let registry = Arc::new(ProviderRegistry::default());
        registry.register(record(1, "1.0.0", "", &["a.Y"]));
        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry
                    .await_first(
                        &class_filter("a.X"),
                        Duration::from_secs(30),
                        &CancellationToken::new(),
                    )
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.close();

        assert!(waiter.await.unwrap().is_err());
        assert!(registry.is_empty());
    }
}
