//! State shared between the control loop and the socket server
//!
//! Both slots hold an `Arc` that is swapped whole. Readers clone the `Arc`
//! under a brief read lock and never see a partially written value.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

use llc_core::{Settings, SettingsStore};
use llc_protocol::SystemStatus;

pub struct SharedState {
    status: RwLock<Arc<SystemStatus>>,
    settings: RwLock<Arc<Settings>>,
    store: Arc<dyn SettingsStore>,
}

impl SharedState {
    /// Load the initial settings from `store`
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        let settings = store.load();
        Self {
            status: RwLock::new(Arc::new(SystemStatus::default())),
            settings: RwLock::new(Arc::new(settings)),
            store,
        }
    }

    /// Replace the published snapshot
    pub fn publish(&self, status: SystemStatus) {
        *self.status.write() = Arc::new(status);
    }

    /// Latest published snapshot, or the empty default before the first tick
    pub fn status(&self) -> Arc<SystemStatus> {
        Arc::clone(&self.status.read())
    }

    pub fn settings(&self) -> Arc<Settings> {
        Arc::clone(&self.settings.read())
    }

    /// Reload from the settings store and swap the result in.
    ///
    /// The control loop picks the new value up at its next tick.
    pub fn reload_settings(&self) -> Arc<Settings> {
        let fresh = Arc::new(self.store.load());
        *self.settings.write() = Arc::clone(&fresh);
        info!(
            mode = ?fresh.mode,
            gpu_routed = fresh.gpu_temp_macs.len(),
            "Settings reloaded"
        );
        fresh
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use llc_core::FanMode;
    use parking_lot::Mutex;

    /// In-memory store that hands out whatever it was last given
    pub(crate) struct MemoryStore(pub Mutex<Settings>);

    impl SettingsStore for MemoryStore {
        fn load(&self) -> Settings {
            self.0.lock().clone()
        }

        fn save(&self, settings: &Settings) -> llc_core::Result<()> {
            *self.0.lock() = settings.clone();
            Ok(())
        }
    }

    #[test]
    fn test_initial_status_is_default() {
        let state = SharedState::new(Arc::new(MemoryStore(Mutex::new(Settings::default()))));
        assert_eq!(*state.status(), SystemStatus::default());
    }

    #[test]
    fn test_publish_replaces_snapshot() {
        let state = SharedState::new(Arc::new(MemoryStore(Mutex::new(Settings::default()))));
        let before = state.status();
        state.publish(SystemStatus::now(Some(50.0), None, Vec::new()));

        assert_eq!(state.status().cpu_temp, Some(50.0));
        // Earlier readers keep their snapshot intact
        assert_eq!(before.cpu_temp, None);
    }

    #[test]
    fn test_reload_swaps_settings_wholesale() {
        let store = Arc::new(MemoryStore(Mutex::new(Settings::default())));
        let state = SharedState::new(store.clone());
        let held = state.settings();

        store
            .save(&Settings { mode: FanMode::Curve, ..Settings::default() })
            .expect("save");
        let fresh = state.reload_settings();

        assert_eq!(fresh.mode, FanMode::Curve);
        assert_eq!(state.settings().mode, FanMode::Curve);
        assert_eq!(held.mode, FanMode::Linear);
    }
}
