use std::sync::Arc;

use crate::core::{config::Settings, redis::RedisHandle};
use crate::repositories::store::IntegrityStore;
use crate::services::notifier::Notifier;

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    store: Arc<dyn IntegrityStore>,
    redis: RedisHandle,
    notifier: Notifier,
}

impl AppState {
    pub(crate) fn new(settings: Settings, store: Arc<dyn IntegrityStore>, redis: RedisHandle) -> Self {
        let notifier = Notifier::new(settings.integrity().broadcast_capacity, redis.clone());
        Self { inner: Arc::new(InnerState { settings, store, redis, notifier }) }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn store(&self) -> &dyn IntegrityStore {
        self.inner.store.as_ref()
    }

    pub(crate) fn redis(&self) -> &RedisHandle {
        &self.inner.redis
    }

    pub(crate) fn notifier(&self) -> &Notifier {
        &self.inner.notifier
    }
}
