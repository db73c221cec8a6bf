//! Shared scaffolding for the end-to-end tests: a real `Registry` wired to
//! the real `AxumListenerFactory`, binding actual loopback ports.

use mockit_core::oauth2_cache::TokenCache;
use mockit_core::registry::Registry;
use mockit_core::tls_material::TlsMaterialStore;
use mockit_http::AxumListenerFactory;
use std::net::TcpListener;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

static NEXT_PORT: AtomicU16 = AtomicU16::new(19200);

/// A port nobody else in this test binary has claimed yet. Binding a real
/// listener to find a free one would race with the instance bring-up that
/// follows, so this just walks a private range upward.
pub fn next_port() -> u16 {
    loop {
        let candidate = NEXT_PORT.fetch_add(1, Ordering::SeqCst);
        if TcpListener::bind(("127.0.0.1", candidate)).is_ok() {
            return candidate;
        }
    }
}

pub struct Harness {
    pub registry: Arc<Registry>,
    pub factory: Arc<AxumListenerFactory>,
}

impl Harness {
    pub fn new() -> Self {
        let token_cache = Arc::new(TokenCache::new());
        let factory = Arc::new(AxumListenerFactory::new(token_cache.clone()));
        let registry = Arc::new(Registry::new(factory.clone(), Arc::new(TlsMaterialStore::new()), token_cache));
        Self { registry, factory }
    }
}
