use super::store::ResultStore;
use super::EngineError;
use uuid::Uuid;

/// Held for the whole of a process or rank call. Released on drop.
pub struct ScopeLock<'s, S: ResultStore> {
    store: &'s S,
    key: String,
    holder: String,
}

impl<'s, S: ResultStore> ScopeLock<'s, S> {
    pub fn acquire(store: &'s S, key: String, ttl_secs: i64) -> Result<Self, EngineError> {
        let holder = format!("{}:{}", std::process::id(), Uuid::new_v4());
        match store.try_lock_scope(&key, &holder, ttl_secs)? {
            None => {
                tracing::debug!(scope = %key, holder = %holder, "scope lock acquired");
                Ok(Self { store, key, holder })
            }
            Some((current, acquired_at)) => {
                tracing::warn!(scope = %key, holder = %current, "scope is busy");
                Err(EngineError::ScopeBusy {
                    scope_key: key,
                    holder: current,
                    acquired_at,
                })
            }
        }
    }
}

impl<S: ResultStore> Drop for ScopeLock<'_, S> {
    fn drop(&mut self) {
        if let Err(e) = self.store.unlock_scope(&self.key, &self.holder) {
            // The row ages out after the TTL.
            tracing::warn!(scope = %self.key, error = %e, "failed to release scope lock");
        }
    }
}
