use std::sync::Arc;

use crate::{
    auth::IdentityProvider,
    config::AppConfig,
    files::FileStore,
    relay::CompletionRelay,
    storage::ObjectStorage,
    store::{ConversationStore, History},
};

/// Shared handles to every external collaborator, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub history: History,
    pub files: FileStore,
    pub identity: Arc<dyn IdentityProvider>,
    pub relay: Arc<dyn CompletionRelay>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn ConversationStore>,
        storage: Arc<dyn ObjectStorage>,
        identity: Arc<dyn IdentityProvider>,
        relay: Arc<dyn CompletionRelay>,
    ) -> Self {
        let files = FileStore::from_config(&config, storage);
        Self {
            config: Arc::new(config),
            history: History::new(store),
            files,
            identity,
            relay,
        }
    }
}
