use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use jsonwebtoken::{DecodingKey, Validation};
use models::config::SSE_MAX_SUBSCRIBERS_PER_PROVIDER;
use models::StateStore;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn StateStore>,
    pub decoding_key: Arc<DecodingKey>,
    pub validation: Validation,
    pub subscribers: Arc<SubscriberLimiter>,
}

/// Caps concurrent SSE connections per provider at
/// [`SSE_MAX_SUBSCRIBERS_PER_PROVIDER`] via one `Semaphore` per provider, so
/// one runaway dashboard tab can't starve the others' poll loops of
/// connection slots.
pub struct SubscriberLimiter {
    semaphores: Mutex<HashMap<String, Arc<Semaphore>>>,
}

pub type SubscriberGuard = OwnedSemaphorePermit;

impl SubscriberLimiter {
    pub fn new() -> Self {
        Self { semaphores: Mutex::new(HashMap::new()) }
    }

    pub fn try_acquire(&self, provider_id: &str) -> Option<SubscriberGuard> {
        let semaphore = {
            let mut semaphores = self.semaphores.lock().unwrap();
            semaphores.entry(provider_id.to_string()).or_insert_with(|| Arc::new(Semaphore::new(SSE_MAX_SUBSCRIBERS_PER_PROVIDER))).clone()
        };
        semaphore.try_acquire_owned().ok()
    }
}
