//! One owned context per process: crypto has no state, everything else
//! lives here and is reached only through the state mutex.

use keyhaven_core::settings::VaultSettings;

use crate::gateway::VerificationGateway;
use crate::identity::IdentityProvider;
use crate::mediator::CredentialMediator;
use crate::persistence::BlobStore;
use crate::session::SessionManager;

pub struct ServiceState {
    pub settings: VaultSettings,
    pub session: SessionManager,
    pub mediator: CredentialMediator,
    pub gateway: VerificationGateway,
    pub identity: Box<dyn IdentityProvider>,
}

impl ServiceState {
    pub fn new(
        store: Box<dyn BlobStore>,
        identity: Box<dyn IdentityProvider>,
        settings: VaultSettings,
    ) -> Self {
        Self {
            session: SessionManager::new(settings.session_idle_secs),
            mediator: CredentialMediator::new(store, &settings),
            gateway: VerificationGateway::new(&settings),
            identity,
            settings,
        }
    }

    /// Push new settings into every component that caches a duration.
    pub fn apply_settings(&mut self, settings: VaultSettings) {
        self.session.set_idle_secs(settings.session_idle_secs);
        self.mediator.set_cache_ttl_secs(settings.cache_ttl_secs);
        self.gateway.apply_settings(&settings);
        self.settings = settings;
    }
}
