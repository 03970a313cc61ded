//! Application state shared across handlers.

use crate::hook::{Multipart, MultipartHook};
use formstash_core::AppConfig;
use formstash_storage::TempFileStore;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Temp directory for in-flight uploads.
    pub store: TempFileStore,
    /// Compiled decoder per configured route.
    pub routes: Arc<BTreeMap<String, MultipartHook>>,
}

impl AppState {
    /// Build the plugin from the global options and compile every route.
    pub fn new(config: AppConfig) -> Self {
        let store = TempFileStore::new(config.multipart.temp_dir());
        let multipart = Multipart::new(config.multipart.options(), store.clone());

        let routes = config
            .routes
            .iter()
            .map(|(name, route)| {
                let hook = multipart.hook(&route.expected_files, &route.options());
                tracing::debug!(route = %name, policy = ?hook.policy(), "route compiled");
                (name.clone(), hook)
            })
            .collect();

        Self {
            config: Arc::new(config),
            store,
            routes: Arc::new(routes),
        }
    }

    /// The decoder for a route, if configured.
    pub fn hook(&self, route: &str) -> Option<&MultipartHook> {
        self.routes.get(route)
    }
}
