//! Instance Lifecycle Manager: create/list/get/delete, port and id
//! uniqueness, rollback on partial bring-up failure, and best-effort
//! parallel shutdown.

use crate::config::{Expectation, InstanceSpec, InstanceState, ServerInfo};
use crate::oauth2_cache::TokenCache;
use crate::tls_material::TlsMaterialStore;
use crate::{tls_material, Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Graceful shutdown deadline before a listener is forced closed.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolved filesystem paths for an instance's TLS material, handed to the
/// listener factory so it can build a `rustls::ServerConfig`.
pub struct ResolvedTls {
    /// Materialized path to the leaf certificate PEM.
    pub certificate_path: std::path::PathBuf,
    /// Materialized path to the private key PEM.
    pub private_key_path: std::path::PathBuf,
    /// Materialized path to the CA certificate PEM, when mTLS is configured.
    pub ca_certificate_path: Option<std::path::PathBuf>,
    /// Whether the listener must require and verify a client certificate.
    pub require_client_auth: bool,
}

/// A live listener, however the protocol layer chose to bind it. The
/// registry only needs to be able to shut it down.
#[async_trait]
pub trait ListenerHandle: Send + Sync {
    /// Gracefully stop accepting and drain in-flight requests, forcing
    /// closed after `timeout` elapses.
    async fn shutdown(&self, timeout: Duration);
}

/// Binds and installs a listener for an instance. Implemented in
/// `mockit-http`, since binding an axum server is protocol-specific; the
/// registry itself stays free of any HTTP-framework dependency.
#[async_trait]
pub trait ListenerFactory: Send + Sync {
    async fn bind(&self, spec: &InstanceSpec, tls: Option<ResolvedTls>) -> Result<Arc<dyn ListenerHandle>>;

    /// Install a new expectations snapshot for a live instance's dispatcher.
    /// The Configuration Loader uses this to apply a startup document's
    /// declared expectations; the control-plane REST adapter talks to its
    /// `DispatcherMap` directly instead, since it already holds it. Default
    /// no-op so listener factories with no dispatcher of their own (e.g.
    /// test doubles) don't need to implement it.
    async fn set_expectations(&self, _server_id: &str, _expectations: Vec<Expectation>) {}
}

struct Instance {
    spec: InstanceSpec,
    state: InstanceState,
    created_at: String,
    listener: Arc<dyn ListenerHandle>,
    expectation_count: usize,
}

/// Owns the set of live instances. A single `RwLock` serializes `create`/
/// `delete` against each other while letting `list`/`get` proceed
/// concurrently, per the documented locking discipline.
pub struct Registry {
    instances: RwLock<HashMap<String, Instance>>,
    listener_factory: Arc<dyn ListenerFactory>,
    tls_store: Arc<TlsMaterialStore>,
    token_cache: Arc<TokenCache>,
}

impl Registry {
    /// An empty registry with no live instances.
    pub fn new(listener_factory: Arc<dyn ListenerFactory>, tls_store: Arc<TlsMaterialStore>, token_cache: Arc<TokenCache>) -> Self {
        Self { instances: RwLock::new(HashMap::new()), listener_factory, tls_store, token_cache }
    }

    /// Create and bring up an instance. Rolls back TLS material and the
    /// listener on any failure after partial bring-up.
    pub async fn create(&self, spec: InstanceSpec) -> Result<ServerInfo> {
        spec.validate()?;

        {
            let instances = self.instances.read().await;
            if instances.contains_key(&spec.server_id) {
                return Err(Error::already_exists(spec.server_id.clone()));
            }
            if instances.values().any(|i| i.spec.port == spec.port) {
                return Err(Error::validation(format!("port {} already in use", spec.port)));
            }
        }

        let resolved_tls = match &spec.tls_config {
            Some(tls) => {
                tls_material::validate_certificate(&tls.certificate)?;
                tls_material::validate_private_key(&tls.private_key)?;
                let ca = if let Some(mtls) = &tls.mtls_config {
                    tls_material::validate_ca_certificate(&mtls.ca_certificate)?;
                    Some(mtls.ca_certificate.as_str())
                } else {
                    None
                };
                let (cert_path, key_path, ca_path) =
                    self.tls_store.materialize(&spec.server_id, &tls.certificate, &tls.private_key, ca)?;
                Some(ResolvedTls {
                    certificate_path: cert_path,
                    private_key_path: key_path,
                    ca_certificate_path: ca_path,
                    require_client_auth: tls.mtls_config.as_ref().map(|m| m.require_client_auth).unwrap_or(false),
                })
            }
            None => None,
        };

        let listener = match self.listener_factory.bind(&spec, resolved_tls).await {
            Ok(listener) => listener,
            Err(e) => {
                self.tls_store.cleanup(&spec.server_id);
                return Err(Error::creation_failed(e.to_string()));
            }
        };

        let mut instances = self.instances.write().await;
        if instances.contains_key(&spec.server_id) {
            listener.shutdown(SHUTDOWN_TIMEOUT).await;
            self.tls_store.cleanup(&spec.server_id);
            return Err(Error::already_exists(spec.server_id.clone()));
        }

        let info = ServerInfo {
            server_id: spec.server_id.clone(),
            port: spec.port,
            description: spec.description.clone(),
            state: InstanceState::Running,
            created_at: now_iso8601(),
            tls_enabled: spec.tls_config.is_some(),
            relay_enabled: spec.relay_config.is_some(),
            expectation_count: 0,
        };
        instances.insert(
            spec.server_id.clone(),
            Instance {
                created_at: info.created_at.clone(),
                spec,
                state: InstanceState::Running,
                listener,
                expectation_count: 0,
            },
        );
        Ok(info)
    }

    /// Stop the listener (graceful, bounded), drop cached tokens, delete TLS
    /// material, and remove the instance from the registry.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let mut instances = self.instances.write().await;
        let instance = instances.remove(id).ok_or_else(|| Error::not_found(id.to_string()))?;
        instance.listener.shutdown(SHUTDOWN_TIMEOUT).await;
        if let Some(relay) = &instance.spec.relay_config {
            if let (Some(token_url), Some(client_id)) = (&relay.token_url, &relay.client_id) {
                self.token_cache.invalidate(token_url, client_id);
            }
        }
        self.tls_store.cleanup(id);
        Ok(())
    }

    /// Snapshot every live instance's public state.
    pub async fn list(&self) -> Vec<ServerInfo> {
        self.instances.read().await.values().map(to_server_info).collect()
    }

    /// Look up one instance's public state by id.
    pub async fn get(&self, id: &str) -> Result<ServerInfo> {
        self.instances.read().await.get(id).map(to_server_info).ok_or_else(|| Error::not_found(id.to_string()))
    }

    /// Whether an instance with this id is currently live.
    pub async fn exists(&self, id: &str) -> bool {
        self.instances.read().await.contains_key(id)
    }

    /// Update the expectation count shown in [`ServerInfo`] snapshots. The
    /// expectations themselves live with the Dispatcher, not the registry;
    /// this only tracks what's reported back over the control plane.
    pub async fn set_expectation_count(&self, id: &str, count: usize) -> Result<()> {
        let mut instances = self.instances.write().await;
        let instance = instances.get_mut(id).ok_or_else(|| Error::not_found(id.to_string()))?;
        instance.expectation_count = count;
        Ok(())
    }

    /// Install a new expectations snapshot on `id`'s live dispatcher via the
    /// listener factory, and update the count reported by [`Self::get`]/
    /// [`Self::list`] to match. Used by the Configuration Loader, which has
    /// no direct access to a protocol layer's `DispatcherMap`.
    pub async fn set_expectations(&self, id: &str, expectations: Vec<Expectation>) -> Result<()> {
        {
            let mut instances = self.instances.write().await;
            let instance = instances.get_mut(id).ok_or_else(|| Error::not_found(id.to_string()))?;
            instance.expectation_count = expectations.len();
        }
        self.listener_factory.set_expectations(id, expectations).await;
        Ok(())
    }

    /// Tear down every instance in parallel, best-effort. Errors are logged,
    /// never propagated — shutdown must always complete.
    pub async fn shutdown_all(&self) {
        let ids: Vec<String> = self.instances.read().await.keys().cloned().collect();
        let shutdowns = ids.iter().map(|id| async move {
            if let Err(e) = self.delete(id).await {
                tracing::warn!("failed to shut down instance {id} cleanly: {e}");
            }
        });
        futures::future::join_all(shutdowns).await;
        self.tls_store.cleanup_all();
    }
}

fn to_server_info(instance: &Instance) -> ServerInfo {
    ServerInfo {
        server_id: instance.spec.server_id.clone(),
        port: instance.spec.port,
        description: instance.spec.description.clone(),
        state: instance.state,
        created_at: instance.created_at.clone(),
        tls_enabled: instance.spec.tls_config.is_some(),
        relay_enabled: instance.spec.relay_config.is_some(),
        expectation_count: instance.expectation_count,
    }
}

fn now_iso8601() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoopHandle;
    #[async_trait]
    impl ListenerHandle for NoopHandle {
        async fn shutdown(&self, _timeout: Duration) {}
    }

    struct NoopFactory {
        fail: bool,
        binds: AtomicUsize,
    }
    #[async_trait]
    impl ListenerFactory for NoopFactory {
        async fn bind(&self, _spec: &InstanceSpec, _tls: Option<ResolvedTls>) -> Result<Arc<dyn ListenerHandle>> {
            self.binds.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(Error::generic("bind failed"))
            } else {
                Ok(Arc::new(NoopHandle))
            }
        }
    }

    fn spec(id: &str, port: u16) -> InstanceSpec {
        InstanceSpec {
            server_id: id.to_string(),
            port,
            description: None,
            tls_config: None,
            basic_auth: None,
            global_headers: vec![],
            relay_config: None,
        }
    }

    fn registry(fail: bool) -> Registry {
        Registry::new(
            Arc::new(NoopFactory { fail, binds: AtomicUsize::new(0) }),
            Arc::new(TlsMaterialStore::new()),
            Arc::new(TokenCache::new()),
        )
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let registry = registry(false);
        registry.create(spec("s1", 9100)).await.unwrap();
        let info = registry.get("s1").await.unwrap();
        assert_eq!(info.port, 9100);
        assert_eq!(info.state, InstanceState::Running);
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let registry = registry(false);
        registry.create(spec("s1", 9100)).await.unwrap();
        let err = registry.create(spec("s1", 9200)).await.unwrap_err();
        assert_eq!(err.error_code(), "SERVER_ALREADY_EXISTS");
    }

    #[tokio::test]
    async fn duplicate_port_is_rejected() {
        let registry = registry(false);
        registry.create(spec("s1", 9100)).await.unwrap();
        assert!(registry.create(spec("s2", 9100)).await.is_err());
    }

    #[tokio::test]
    async fn delete_removes_instance() {
        let registry = registry(false);
        registry.create(spec("s1", 9100)).await.unwrap();
        registry.delete("s1").await.unwrap();
        assert!(registry.get("s1").await.is_err());
    }

    #[tokio::test]
    async fn delete_missing_instance_is_not_found() {
        let registry = registry(false);
        let err = registry.delete("missing").await.unwrap_err();
        assert_eq!(err.error_code(), "SERVER_NOT_FOUND");
    }

    #[tokio::test]
    async fn bind_failure_is_not_registered() {
        let registry = registry(true);
        assert!(registry.create(spec("s1", 9100)).await.is_err());
        assert!(registry.get("s1").await.is_err());
    }

    #[tokio::test]
    async fn shutdown_all_clears_registry() {
        let registry = registry(false);
        registry.create(spec("s1", 9100)).await.unwrap();
        registry.create(spec("s2", 9200)).await.unwrap();
        registry.shutdown_all().await;
        assert!(registry.list().await.is_empty());
    }
}
