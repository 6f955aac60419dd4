//! Namespaces: a name bound to its current profile, runtime scope and mode.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::profile::Profile;
use crate::routing::rule::{Mode, RequestInfo, Rule, Session};
use crate::runtime::RuntimeContext;

/// Runtime key holding the namespace mode.
pub const MODE_KEY: &str = "mode";

/// A live namespace.
///
/// Readers call [`Namespace::profile`] and keep the returned `Arc` for the
/// whole request; a concurrent reload never changes it underneath them.
pub struct Namespace {
    name: String,
    cancel: CancellationToken,
    profile: ArcSwap<Profile>,
    runtime: RuntimeContext,
    mode: AtomicU8,
    // Serializes mode writes so the persisted mode matches the live one.
    mode_write: Mutex<()>,
}

impl Namespace {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current profile.
    pub fn profile(&self) -> Arc<Profile> {
        self.profile.load_full()
    }

    pub fn mode(&self) -> Mode {
        Mode::from_repr(self.mode.load(Ordering::Acquire))
    }

    /// Switch the traffic mode and persist it under the namespace scope.
    ///
    /// The new mode takes effect even if persisting fails; the error is
    /// returned so the caller can retry the write.
    pub async fn set_mode(&self, mode: Mode) -> Result<()> {
        let _guard = self.mode_write.lock().await;
        let previous = self.mode.swap(mode as u8, Ordering::AcqRel);
        if previous != mode as u8 {
            tracing::info!(namespace = %self.name, mode = %mode, "Mode changed");
        }
        self.runtime.set(MODE_KEY, mode.as_str()).await
    }

    /// Snapshot of the state rule evaluation may consult.
    pub fn session(&self) -> Session {
        Session::new(self.name.as_str(), self.mode())
    }

    /// Route `info` through the current profile.
    pub fn resolve(&self, info: &RequestInfo) -> Rule {
        let session = self.session();
        self.profile().rule_handle(info.network).handle(&session, info)
    }

    pub fn runtime(&self) -> &RuntimeContext {
        &self.runtime
    }

    /// Token scoping background work started for this namespace.
    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("name", &self.name)
            .field("profile", &self.profile.load().name)
            .field("mode", &self.mode())
            .field("runtime", &self.runtime)
            .finish()
    }
}

/// Namespaces by name.
#[derive(Debug, Clone, Default)]
pub struct NamespaceRegistry {
    inner: Arc<DashMap<String, Arc<Namespace>>>,
}

impl NamespaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to `profile`.
    ///
    /// An existing namespace keeps its identity, token and runtime scope;
    /// only its profile and mode are replaced, the profile in one atomic
    /// store.
    pub fn add_namespace(
        &self,
        name: &str,
        cancel: CancellationToken,
        profile: Arc<Profile>,
        runtime: RuntimeContext,
        mode: Mode,
    ) -> Arc<Namespace> {
        match self.inner.entry(name.to_string()) {
            Entry::Occupied(entry) => {
                let existing = entry.get().clone();
                existing.profile.store(profile);
                existing.mode.store(mode as u8, Ordering::Release);
                tracing::info!(namespace = %name, mode = %mode, "Namespace profile swapped");
                existing
            }
            Entry::Vacant(entry) => {
                let namespace = Arc::new(Namespace {
                    name: name.to_string(),
                    cancel,
                    profile: ArcSwap::new(profile),
                    runtime,
                    mode: AtomicU8::new(mode as u8),
                    mode_write: Mutex::new(()),
                });
                entry.insert(namespace.clone());
                tracing::info!(namespace = %name, mode = %mode, "Namespace bound");
                namespace
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Namespace>> {
        self.inner.get(name).map(|n| n.value().clone())
    }

    /// Whether any namespace currently serves the profile named `profile`.
    pub fn profile_in_use(&self, profile: &str) -> bool {
        self.inner.iter().any(|e| e.value().profile.load().name == profile)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::tests::profile;
    use crate::routing::rule::Network;
    use serde_json::json;

    fn bind(registry: &NamespaceRegistry, proxy: &str, runtime: &RuntimeContext) -> Arc<Namespace> {
        registry.add_namespace(
            "default",
            CancellationToken::new(),
            Arc::new(profile("office", proxy)),
            runtime.clone(),
            Mode::Rule,
        )
    }

    #[tokio::test]
    async fn test_swap_keeps_identity() {
        let registry = NamespaceRegistry::new();
        let runtime = RuntimeContext::detached("default");
        let first = bind(&registry, "DIRECT", &runtime);
        let held = first.profile();

        let second = bind(&registry, "REJECT", &runtime);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.names(), vec!["default".to_string()]);

        // The old snapshot is unaffected by the swap.
        let info = RequestInfo::tcp("a.com", 443);
        assert_eq!(held.rule_handle(Network::Tcp).handle(&Session::default(), &info).proxy, "DIRECT");
        assert_eq!(second.resolve(&info).proxy, "REJECT");
    }

    #[tokio::test]
    async fn test_set_mode_persists() {
        let registry = NamespaceRegistry::new();
        let runtime = RuntimeContext::detached("default");
        let ns = bind(&registry, "DIRECT", &runtime);

        ns.set_mode(Mode::Global).await.unwrap();
        assert_eq!(ns.mode(), Mode::Global);
        assert_eq!(ns.session(), Session::new("default", Mode::Global));
        assert_eq!(runtime.get(MODE_KEY).await, Some(json!("global")));
        assert_eq!(ns.resolve(&RequestInfo::tcp("a.com", 443)).proxy, "DIRECT");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_binds_share_one_namespace() {
        let registry = NamespaceRegistry::new();
        let runtime = RuntimeContext::detached("default");

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let registry = registry.clone();
                let runtime = runtime.clone();
                let proxy = if i % 2 == 0 { "DIRECT" } else { "REJECT" };
                tokio::spawn(async move { bind(&registry, proxy, &runtime) })
            })
            .collect();

        let mut bound = Vec::new();
        for task in tasks {
            bound.push(task.await.unwrap());
        }
        let live = registry.get("default").unwrap();
        assert!(bound.iter().all(|ns| Arc::ptr_eq(ns, &live)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_set_mode_persists_live_mode() {
        let registry = NamespaceRegistry::new();
        let runtime = RuntimeContext::detached("default");
        let ns = bind(&registry, "DIRECT", &runtime);

        for _ in 0..10 {
            let tasks: Vec<_> = [Mode::Global, Mode::Direct, Mode::Rule, Mode::Global]
                .into_iter()
                .map(|mode| {
                    let ns = ns.clone();
                    tokio::spawn(async move { ns.set_mode(mode).await.unwrap() })
                })
                .collect();
            for task in tasks {
                task.await.unwrap();
            }
            assert_eq!(runtime.get(MODE_KEY).await, Some(json!(ns.mode().as_str())));
        }
    }

    #[test]
    fn test_profile_in_use() {
        let registry = NamespaceRegistry::new();
        let runtime = RuntimeContext::detached("default");
        bind(&registry, "DIRECT", &runtime);
        assert!(registry.profile_in_use("office"));
        assert!(!registry.profile_in_use("home"));
    }
}
