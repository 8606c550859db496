use std::sync::Arc;

use bevy::log::info;

use crate::client::Generator;
use crate::config::ChatConfig;
use crate::controller::ConversationController;
use crate::renderer::Renderer;
use crate::storage::KeyValueStore;

/// probe the host, then build the controller (settings loaded, history
/// replayed). an unreachable host only adds the connectivity banner.
pub async fn bootstrap<S: KeyValueStore, R: Renderer>(
    config: ChatConfig,
    client: Arc<dyn Generator>,
    store: S,
    renderer: R,
) -> ConversationController<S, R> {
    let live = client.check_liveness().await;
    info!(target: "bevy_ollama_chat", "bootstrap: host={} live={}", config.base_url, live);

    let mut controller = ConversationController::new(config, client, store, renderer);
    if !live {
        controller.report_offline();
    }
    controller
}

/// operations meant for a developer console. holds an explicit handle to the
/// controller, if one exists yet.
pub struct Console<'a, S, R> {
    client: Arc<dyn Generator>,
    controller: Option<&'a mut ConversationController<S, R>>,
}

impl<'a, S: KeyValueStore, R: Renderer> Console<'a, S, R> {
    pub fn new(client: Arc<dyn Generator>, controller: Option<&'a mut ConversationController<S, R>>) -> Self {
        Self { client, controller }
    }

    /// clears history when a controller is attached; returns whether it did.
    pub fn clear_chat_history(&mut self) -> bool {
        match self.controller.as_deref_mut() {
            Some(controller) => {
                controller.clear_history();
                true
            }
            None => false,
        }
    }

    /// re-run the liveness probe and let the attached controller know.
    pub async fn check_connection(&mut self) -> bool {
        let live = self.client.check_liveness().await;
        info!(target: "bevy_ollama_chat", "check_connection: live={}", live);
        if let Some(controller) = self.controller.as_deref_mut() {
            controller.report_connection(live);
        }
        live
    }
}
