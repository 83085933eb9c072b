use std::{
    hash::{DefaultHasher, Hash, Hasher},
    sync::Arc,
};

use uuid::Uuid;

use crate::{
    models::DeviceInfo,
    storage::{KeyValueStore, VISITOR_ID_KEY},
};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Issues the durable visitor id and ephemeral session ids.
#[derive(Clone)]
pub struct IdentityStore {
    store: Arc<dyn KeyValueStore>,
}

impl IdentityStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Returns the stored visitor id, replacing it when missing or not a
    /// canonical UUID-v4. Falls back to an unpersisted id when storage is
    /// unavailable.
    pub fn get_or_create_visitor_id(&self) -> String {
        let stored = match self.store.get(VISITOR_ID_KEY) {
            Ok(value) => value,
            Err(err) => {
                log_warn!("visitor id storage unavailable, using ephemeral id: {err}");
                return Uuid::new_v4().to_string();
            }
        };

        if let Some(existing) = stored.as_deref() {
            if is_valid_uuid_v4(existing) {
                return existing.to_string();
            }
        }

        let fresh = Uuid::new_v4().to_string();
        match stored {
            Some(invalid) => log_info!("replacing invalid visitor id {invalid:?} with {fresh}"),
            None => log_info!("created visitor id {fresh}"),
        }

        if let Err(err) = self.store.set(VISITOR_ID_KEY, &fresh) {
            log_warn!("failed to persist visitor id {fresh}: {err}");
        }
        fresh
    }

    pub fn new_session_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Hex digest of the device descriptor and timezone. Stable only within one
/// build: `DefaultHasher` may change between Rust releases.
pub fn fingerprint(device: &DeviceInfo, timezone: Option<&str>) -> String {
    let mut hasher = DefaultHasher::new();
    device.user_agent.hash(&mut hasher);
    device.platform.hash(&mut hasher);
    device.language.hash(&mut hasher);
    device.screen_width.hash(&mut hasher);
    device.screen_height.hash(&mut hasher);
    timezone.unwrap_or_default().hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Strict canonical form: `xxxxxxxx-xxxx-4xxx-[89ab]xxx-xxxxxxxxxxxx`,
/// hex digits in either case.
pub fn is_valid_uuid_v4(value: &str) -> bool {
    value.len() == 36
        && Uuid::try_parse(value).is_ok_and(|uuid| {
            uuid.get_version_num() == 4 && uuid.get_variant() == uuid::Variant::RFC4122
        })
}
