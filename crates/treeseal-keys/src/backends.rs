//! Backend clients shared by every master key of a kind

use std::fmt;
use std::sync::Arc;

use treeseal_core::config::TreesealConfig;
use treeseal_core::BackendError;

use crate::identity::{find_age_identity, IdentityProvider};
use crate::kms::KmsClient;
use crate::pgp::{GpgCli, PgpClient};

/// Clients used to reach key backends. A kind with no client configured
/// fails its wraps and unwraps as `Unavailable`.
#[derive(Clone, Default)]
pub struct Backends {
    kms: Option<Arc<dyn KmsClient>>,
    pgp: Option<Arc<dyn PgpClient>>,
    age: Option<Arc<IdentityProvider>>,
}

impl Backends {
    pub fn new() -> Self {
        Self::default()
    }

    /// PGP through the configured gpg binary, plus the age identity if the
    /// discovery chain finds one. KMS has no default client.
    pub async fn from_config(config: &TreesealConfig) -> Self {
        let mut backends = Self::new().with_pgp(Arc::new(GpgCli::from_config(&config.backends)));
        match find_age_identity(&config.age).await {
            Ok(identity) => {
                tracing::debug!(source = %identity.source, "loaded age identity");
                backends = backends.with_age_identity(identity);
            }
            Err(e) => tracing::debug!(error = %e, "no age identity available"),
        }
        backends
    }

    pub fn with_kms(mut self, client: Arc<dyn KmsClient>) -> Self {
        self.kms = Some(client);
        self
    }

    pub fn with_pgp(mut self, client: Arc<dyn PgpClient>) -> Self {
        self.pgp = Some(client);
        self
    }

    pub fn with_age_identity(mut self, identity: IdentityProvider) -> Self {
        self.age = Some(Arc::new(identity));
        self
    }

    pub(crate) fn kms(&self) -> Result<&dyn KmsClient, BackendError> {
        self.kms
            .as_deref()
            .ok_or_else(|| BackendError::Unavailable("no KMS client configured".into()))
    }

    pub(crate) fn pgp(&self) -> Result<&dyn PgpClient, BackendError> {
        self.pgp
            .as_deref()
            .ok_or_else(|| BackendError::Unavailable("no PGP client configured".into()))
    }

    pub(crate) fn age(&self) -> Result<Arc<IdentityProvider>, BackendError> {
        self.age
            .clone()
            .ok_or_else(|| BackendError::Unavailable("no age identity loaded".into()))
    }
}

impl fmt::Debug for Backends {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backends")
            .field("kms", &self.kms.is_some())
            .field("pgp", &self.pgp.is_some())
            .field("age", &self.age.as_ref().map(|i| i.source.as_str()))
            .finish()
    }
}
