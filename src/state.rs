//! Application state management
//! Owns the link manager for the lifetime of the host process.

use std::sync::Arc;

use log::info;

use crate::config::AppConfig;
use crate::core::LinkManager;
use crate::core::bluetooth::{Authorizer, EventSink, RadioAdapter};

/// Host-side state: the configuration and the one link manager.
pub struct AppState {
    pub config: AppConfig,
    pub link_manager: Arc<LinkManager>,
}

impl AppState {
    /// Brings the link layer up and registers `sink` for its events.
    pub fn start(
        config: AppConfig,
        radio: Arc<dyn RadioAdapter>,
        authorizer: Arc<dyn Authorizer>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        info!("Initializing LinkManager...");
        let link_manager = LinkManager::new(radio, authorizer, &config.link);
        link_manager.set_event_sink(sink);
        Self {
            config,
            link_manager: Arc::new(link_manager),
        }
    }

    /// Cancels discovery and closes any open link.
    pub async fn stop(&self) {
        self.link_manager.shutdown().await;
        info!("Link layer stopped");
    }

    pub fn get_link_manager_arc(&self) -> Arc<LinkManager> {
        self.link_manager.clone()
    }
}
