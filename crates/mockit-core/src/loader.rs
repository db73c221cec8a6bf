//! Configuration Loader: parses a JsonMC configuration document and brings
//! up every declared instance through the Instance Lifecycle Manager.

use crate::config::ConfigDocument;
use crate::registry::Registry;
use crate::{jsonmc, Error, Result};

/// One instance's failure to come up, collected so a single bad entry
/// doesn't prevent the rest of the document from loading.
#[derive(Debug)]
pub struct InstanceLoadFailure {
    /// Id of the server declaration that failed to come up.
    pub server_id: String,
    /// Why it failed.
    pub error: Error,
}

impl std::fmt::Display for InstanceLoadFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.server_id, self.error)
    }
}

/// Read `path`, parse it as JsonMC, and create + configure every declared
/// server. Each server's failure is isolated: the rest of the document still
/// loads, and every failure is returned together as a single aggregate error.
pub async fn load(registry: &Registry, path: &std::path::Path) -> Result<()> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::generic(format!("failed to read configuration file {path:?}: {e}")))?;
    let document: ConfigDocument = jsonmc::parse_into(&raw)?;
    apply(registry, document).await
}

/// Create and configure every declared server from an already-parsed
/// document, aggregating per-instance failures instead of stopping early.
pub async fn apply(registry: &Registry, document: ConfigDocument) -> Result<()> {
    let mut failures = Vec::new();

    for declaration in document.servers {
        let server_id = declaration.server.server_id.clone();
        match registry.create(declaration.server).await {
            Ok(_) => {
                if let Err(e) = registry.set_expectations(&server_id, declaration.expectations).await {
                    failures.push(InstanceLoadFailure { server_id, error: e });
                }
            }
            Err(e) => {
                tracing::error!("failed to bring up instance {server_id}: {e}");
                failures.push(InstanceLoadFailure { server_id, error: e });
            }
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        let message = failures.iter().map(|f| f.to_string()).collect::<Vec<_>>().join("; ");
        Err(Error::generic(format!("{} instance(s) failed to start: {message}", failures.len())))
    }
}
