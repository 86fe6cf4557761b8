use std::sync::Arc;

use crate::config::Config;
use crate::credentials::CredentialProviderFactory;
use crate::git::ManifestSource;
use crate::workflow::{WorkflowCatalog, WorkflowEngine};

/// Collaborators shared by every handler. Production wiring happens in
/// `main.rs`; tests swap in fakes.
#[derive(Clone)]
pub struct AppState {
    pub credentials: Arc<dyn CredentialProviderFactory>,
    pub workflows: Arc<dyn WorkflowEngine>,
    pub manifests: Arc<dyn ManifestSource>,
    pub catalog: Arc<WorkflowCatalog>,
    /// Client for the health probe.
    pub http: reqwest::Client,
    pub config: Arc<Config>,
}
