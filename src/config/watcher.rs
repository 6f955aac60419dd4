//! Configuration watcher for hot reload.
//!
//! Every load registers change callbacks that push the changed source's
//! name into a channel. The run loop reloads and re-applies on each message.
//! Registrations belong to a generation token: a successful reload cancels
//! the previous generation, a failed one cancels its own, so callbacks never
//! pile up across reloads.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::apply::ConfigApplier;
use crate::config::loader::ConfigLoader;
use crate::error::Result;
use crate::observability::metrics;
use crate::profile::Namespace;
use crate::runtime::RuntimeContext;
use crate::storage::{NotifyFn, Params};

/// Where the primary configuration lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSource {
    pub storage: String,
    pub encoding: String,
    pub params: Params,
}

impl ConfigSource {
    pub fn new(storage: impl Into<String>, encoding: impl Into<String>, params: Params) -> Self {
        Self {
            storage: storage.into(),
            encoding: encoding.into(),
            params,
        }
    }
}

/// Keeps a namespace in sync with its configuration source.
pub struct ConfigWatcher {
    loader: ConfigLoader,
    applier: ConfigApplier,
    runtime: RuntimeContext,
    namespace: String,
    source: ConfigSource,
    update_tx: mpsc::UnboundedSender<String>,
    update_rx: mpsc::UnboundedReceiver<String>,
}

impl ConfigWatcher {
    pub fn new(
        loader: ConfigLoader,
        applier: ConfigApplier,
        runtime: RuntimeContext,
        namespace: impl Into<String>,
        source: ConfigSource,
    ) -> Self {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        Self {
            loader,
            applier,
            runtime,
            namespace: namespace.into(),
            source,
            update_tx,
            update_rx,
        }
    }

    /// Callback handed to storage backends.
    pub fn notifier(&self) -> NotifyFn {
        let tx = self.update_tx.clone();
        Arc::new(move |source: &str| {
            let _ = tx.send(source.to_string());
        })
    }

    /// Load and apply once, registering change callbacks under `generation`.
    pub async fn load_and_apply(
        &self,
        cancel: &CancellationToken,
        generation: &CancellationToken,
    ) -> Result<Arc<Namespace>> {
        let config = self
            .loader
            .load(
                generation,
                &self.source.storage,
                &self.source.encoding,
                &self.source.params,
                self.notifier(),
            )
            .await?;
        self.applier
            .apply(cancel, &config, &self.runtime, &self.namespace)
            .await
    }

    /// Perform the initial load, then reload on every change until `cancel`
    /// fires.
    ///
    /// Only the initial load is fatal; a failed reload keeps the current
    /// profile. A reload still in flight when `cancel` fires is dropped.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        let mut current = cancel.child_token();
        if let Err(e) = self.load_and_apply(&cancel, &current).await {
            current.cancel();
            return Err(e);
        }
        tracing::info!(
            namespace = %self.namespace,
            storage = %self.source.storage,
            "Config watcher started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                msg = self.update_rx.recv() => {
                    let Some(source) = msg else { break };
                    // One edit often notifies several times.
                    while self.update_rx.try_recv().is_ok() {}
                    tracing::info!(source = %source, "Config change detected, reloading...");

                    let next = cancel.child_token();
                    let outcome = tokio::select! {
                        _ = cancel.cancelled() => {
                            next.cancel();
                            tracing::info!(source = %source, "Reload abandoned on shutdown");
                            break;
                        }
                        outcome = self.load_and_apply(&cancel, &next) => outcome,
                    };
                    match outcome {
                        Ok(namespace) => {
                            current.cancel();
                            current = next;
                            metrics::record_config_reload("ok");
                            tracing::info!(
                                namespace = %namespace.name(),
                                profile = %namespace.profile().name,
                                "Configuration reloaded"
                            );
                        }
                        Err(e) => {
                            next.cancel();
                            metrics::record_config_reload("error");
                            tracing::error!("Failed to reload config: {}. Keeping current configuration.", e);
                        }
                    }
                }
            }
        }

        current.cancel();
        tracing::info!(namespace = %self.namespace, "Config watcher stopped");
        Ok(())
    }
}
