//! the conversation state machine: `Idle -> Sending -> (Idle | Error)`.
//!
//! an exchange is split in two so a host event loop can run the network call
//! elsewhere and hand the result back: [`ConversationController::begin_exchange`]
//! guards, renders and snapshots the request; [`ConversationController::complete_exchange`]
//! applies the reply. [`ConversationController::send`] does both in one await.

use std::sync::Arc;
use std::time::Duration;

use bevy::log::{debug, error, info, warn};

use crate::client::Generator;
use crate::config::ChatConfig;
use crate::context::build_context_with_window;
use crate::error::{ChatError, ChatResult};
use crate::renderer::Renderer;
use crate::settings::{Settings, SettingsChange};
use crate::storage::{KeyValueStore, Persistence};
use crate::turn::Turn;

pub const CLEARED_GREETING: &str = "Chat history cleared. How can I help you today?";
pub const OFFLINE_MESSAGE: &str =
    "Cannot connect to Ollama. Make sure the server is running and reachable.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Sending,
    /// not sending, error banner visible.
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// empty input, a request already in flight, or a stale completion.
    Skipped,
    Answered,
    Failed(ChatError),
}

/// countdown owned by the controller; driven by [`ConversationController::tick`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DismissTimer {
    remaining: Duration,
}

impl DismissTimer {
    pub fn new(after: Duration) -> Self {
        Self { remaining: after }
    }

    /// returns `true` once the countdown has run out.
    pub fn tick(&mut self, delta: Duration) -> bool {
        self.remaining = self.remaining.saturating_sub(delta);
        self.remaining.is_zero()
    }

    pub fn remaining(&self) -> Duration {
        self.remaining
    }
}

#[derive(Debug, Clone)]
struct Banner {
    message: String,
    /// `None` for the connectivity banner, which a live check clears.
    timer: Option<DismissTimer>,
}

/// a request ready to go out. owns everything it needs, so it can be moved
/// into a task.
pub struct Exchange {
    id: u64,
    client: Arc<dyn Generator>,
    prompt: String,
    settings: Settings,
}

impl Exchange {
    /// hand this back to [`ConversationController::complete_exchange`].
    pub fn id(&self) -> u64 {
        self.id
    }

    /// the flattened prompt, context included.
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub async fn run(self) -> ChatResult<String> {
        self.client.generate(&self.prompt, &self.settings).await
    }
}

pub struct ConversationController<S, R> {
    config: ChatConfig,
    client: Arc<dyn Generator>,
    storage: Persistence<S>,
    renderer: R,
    settings: Settings,
    history: Vec<Turn>,
    phase: Phase,
    /// id of the newest exchange; bumped on begin and on clear.
    exchange_id: u64,
    banner: Option<Banner>,
}

impl<S: KeyValueStore, R: Renderer> ConversationController<S, R> {
    /// loads settings and history from `store` and replays the history into
    /// `renderer`.
    pub fn new(config: ChatConfig, client: Arc<dyn Generator>, store: S, renderer: R) -> Self {
        let storage = Persistence::new(store, config.history_limit);
        let settings = storage.load_settings();
        let history = storage.load_history();
        info!(
            target: "bevy_ollama_chat",
            "controller: model='{}' restored_turns={}",
            settings.model, history.len()
        );

        let mut controller = Self {
            config,
            client,
            storage,
            renderer,
            settings,
            history,
            phase: Phase::Idle,
            exchange_id: 0,
            banner: None,
        };
        for turn in &controller.history {
            controller.renderer.render_turn(turn);
        }
        controller
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn persistence(&self) -> &Persistence<S> {
        &self.storage
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn is_loading(&self) -> bool {
        self.phase == Phase::Sending
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn error_message(&self) -> Option<&str> {
        self.banner.as_ref().map(|b| b.message.as_str())
    }

    /// start an exchange for `input`. `None` when the input is blank or a
    /// request is already in flight.
    pub fn begin_exchange(&mut self, input: &str) -> Option<Exchange> {
        let text = input.trim();
        if text.is_empty() {
            return None;
        }
        if self.is_loading() {
            debug!(target: "bevy_ollama_chat", "send ignored: request already in flight");
            return None;
        }

        // context comes from the history as it was before this prompt
        let prompt = build_context_with_window(&self.history, text, self.config.context_turns);
        let user = Turn::user(text);

        self.phase = Phase::Sending;
        self.exchange_id += 1;
        self.renderer.clear_input();
        self.renderer.render_turn(&user);
        self.renderer.set_busy(true);
        self.history.push(user);

        info!(
            target: "bevy_ollama_chat",
            "exchange start: model='{}' prompt_len={} history={}",
            self.settings.model, prompt.len(), self.history.len()
        );
        Some(Exchange {
            id: self.exchange_id,
            client: self.client.clone(),
            prompt,
            settings: self.settings.clone(),
        })
    }

    /// apply the result of exchange `id`. anything but the exchange in
    /// flight is dropped.
    pub fn complete_exchange(&mut self, id: u64, result: ChatResult<String>) -> Outcome {
        if !self.is_loading() || id != self.exchange_id {
            warn!(target: "bevy_ollama_chat", "stale completion for exchange {}; dropped", id);
            return Outcome::Skipped;
        }
        self.phase = Phase::Idle;
        self.renderer.set_busy(false);

        match result {
            Ok(text) => {
                info!(target: "bevy_ollama_chat", "exchange done: reply_len={}", text.len());
                // the host answered, so any earlier banner is stale
                if self.banner.take().is_some() {
                    self.renderer.dismiss_error();
                }
                let reply = Turn::assistant(text);
                self.renderer.render_turn(&reply);
                self.history.push(reply);
                if let Err(e) = self.storage.save_history(&self.history) {
                    error!(target: "bevy_ollama_chat", "failed to persist history: {}", e);
                }
                Outcome::Answered
            }
            Err(err) => {
                error!(target: "bevy_ollama_chat", "exchange failed: {}", err);
                let timer = DismissTimer::new(self.config.error_display);
                self.show_banner(format!("Error: {err}"), Some(timer));
                Outcome::Failed(err)
            }
        }
    }

    /// one full exchange. the user turn stays in history even when it fails.
    pub async fn send(&mut self, input: &str) -> Outcome {
        let Some(exchange) = self.begin_exchange(input) else {
            return Outcome::Skipped;
        };
        let id = exchange.id();
        let result = exchange.run().await;
        self.complete_exchange(id, result)
    }

    /// wipe the conversation and greet again. not reversible. an exchange in
    /// flight is abandoned; its reply will be dropped.
    pub fn clear_history(&mut self) {
        info!(target: "bevy_ollama_chat", "clearing {} turns", self.history.len());
        if self.is_loading() {
            self.exchange_id += 1;
            self.phase = Phase::Idle;
            self.renderer.set_busy(false);
            self.settle();
        }
        self.history.clear();
        self.renderer.clear_transcript();
        if let Err(e) = self.storage.clear_history() {
            error!(target: "bevy_ollama_chat", "failed to delete stored history: {}", e);
        }
        let greeting = Turn::system(CLEARED_GREETING);
        self.renderer.render_turn(&greeting);
        self.history.push(greeting);
    }

    /// apply and persist a settings-control change.
    pub fn update_settings(&mut self, change: SettingsChange) {
        debug!(target: "bevy_ollama_chat", "settings change: {:?}", change);
        self.settings.apply(change);
        if let Err(e) = self.storage.save_settings(&self.settings) {
            error!(target: "bevy_ollama_chat", "failed to persist settings: {}", e);
        }
    }

    /// show the fixed connectivity error. it has no timer; it stays until a
    /// live check, a successful exchange or another error replaces it.
    pub fn report_offline(&mut self) {
        warn!(target: "bevy_ollama_chat", "ollama host not reachable at {}", self.config.base_url);
        self.show_banner(OFFLINE_MESSAGE.to_string(), None);
    }

    /// apply a liveness check result.
    pub fn report_connection(&mut self, live: bool) {
        if !live {
            self.report_offline();
            return;
        }
        if self.banner.as_ref().is_some_and(|b| b.timer.is_none()) {
            info!(target: "bevy_ollama_chat", "ollama host reachable again");
            self.banner = None;
            self.renderer.dismiss_error();
            self.settle();
        }
    }

    /// advance the error auto-dismiss countdown.
    pub fn tick(&mut self, delta: Duration) {
        let expired = match self.banner.as_mut().and_then(|b| b.timer.as_mut()) {
            Some(timer) => timer.tick(delta),
            None => false,
        };
        if expired {
            self.banner = None;
            self.renderer.dismiss_error();
            self.settle();
        }
    }

    fn show_banner(&mut self, message: String, timer: Option<DismissTimer>) {
        self.renderer.show_error(&message);
        self.banner = Some(Banner { message, timer });
        self.settle();
    }

    /// outside of `Sending` the phase follows the banner.
    fn settle(&mut self) {
        if self.phase == Phase::Sending {
            return;
        }
        self.phase = if self.banner.is_some() { Phase::Error } else { Phase::Idle };
    }
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;
    use crate::client::testing::ScriptedGenerator;
    use crate::renderer::testing::{Call, RecordingRenderer};
    use crate::storage::{HISTORY_KEY, MemoryStore};
    use pretty_assertions::assert_eq;

    type Controller = ConversationController<MemoryStore, RecordingRenderer>;

    fn controller_with(generator: ScriptedGenerator, store: MemoryStore) -> (Controller, Arc<ScriptedGenerator>) {
        let generator = Arc::new(generator);
        let c = ConversationController::new(
            ChatConfig::default(),
            generator.clone(),
            store,
            RecordingRenderer::default(),
        );
        (c, generator)
    }

    fn http_500() -> ChatError {
        ChatError::Http { status: 500, status_text: "Internal Server Error".into() }
    }

    #[test]
    fn successful_exchange_appends_user_then_assistant() {
        let (mut c, _) = controller_with(
            ScriptedGenerator::live().reply(Ok("hi".into())),
            MemoryStore::new(),
        );

        assert_eq!(pollster::block_on(c.send("hello")), Outcome::Answered);

        assert_eq!(c.history(), &[Turn::user("hello"), Turn::assistant("hi")]);
        assert!(!c.is_loading());
        assert_eq!(c.phase(), Phase::Idle);
        assert_eq!(c.persistence().load_history(), c.history().to_vec());
        assert_eq!(
            c.renderer().calls,
            vec![
                Call::ClearInput,
                Call::Turn(Turn::user("hello")),
                Call::Busy(true),
                Call::Busy(false),
                Call::Turn(Turn::assistant("hi")),
            ]
        );
    }

    #[test]
    fn http_failure_keeps_the_dangling_user_turn() {
        let (mut c, _) = controller_with(
            ScriptedGenerator::live().reply(Err(http_500())),
            MemoryStore::new(),
        );

        assert_eq!(pollster::block_on(c.send("hello")), Outcome::Failed(http_500()));

        assert_eq!(c.history(), &[Turn::user("hello")]);
        assert!(!c.is_loading());
        assert_eq!(c.phase(), Phase::Error);
        assert_eq!(c.renderer().errors(), vec!["Error: HTTP 500: Internal Server Error"]);
        // nothing persisted for a failed exchange
        assert_eq!(c.persistence().store().get_item(HISTORY_KEY), Ok(None));
    }

    #[test]
    fn dangling_turn_is_persisted_with_the_next_success() {
        let (mut c, _) = controller_with(
            ScriptedGenerator::live()
                .reply(Err(ChatError::Network("refused".into())))
                .reply(Ok("second".into())),
            MemoryStore::new(),
        );
        pollster::block_on(c.send("one"));
        pollster::block_on(c.send("two"));
        assert_eq!(
            c.persistence().load_history(),
            vec![Turn::user("one"), Turn::user("two"), Turn::assistant("second")]
        );
    }

    #[test]
    fn blank_input_is_ignored() {
        let (mut c, generator) = controller_with(ScriptedGenerator::live(), MemoryStore::new());
        assert_eq!(pollster::block_on(c.send("   \n")), Outcome::Skipped);
        assert!(c.history().is_empty());
        assert!(c.renderer().calls.is_empty());
        assert!(generator.prompts().is_empty());
    }

    #[test]
    fn second_send_is_blocked_while_one_is_in_flight() {
        let (mut c, _) = controller_with(ScriptedGenerator::live(), MemoryStore::new());
        let first = c.begin_exchange("one");
        assert!(first.is_some());
        assert!(c.begin_exchange("two").is_none());
        assert_eq!(c.phase(), Phase::Sending);
        assert_eq!(c.history(), &[Turn::user("one")]);
    }

    #[test]
    fn stale_completion_is_dropped() {
        let (mut c, _) = controller_with(ScriptedGenerator::live(), MemoryStore::new());
        assert_eq!(c.complete_exchange(1, Ok("late".into())), Outcome::Skipped);
        assert!(c.history().is_empty());
    }

    #[test]
    fn clearing_mid_exchange_drops_the_late_reply() {
        let (mut c, _) = controller_with(ScriptedGenerator::live(), MemoryStore::new());
        let exchange = c.begin_exchange("hello").unwrap();

        c.clear_history();
        assert_eq!(c.phase(), Phase::Idle);
        assert_eq!(c.complete_exchange(exchange.id(), Ok("late reply".into())), Outcome::Skipped);

        assert_eq!(c.history(), &[Turn::system(CLEARED_GREETING)]);
        assert_eq!(c.persistence().store().get_item(HISTORY_KEY), Ok(None));
        assert_eq!(c.renderer().calls.iter().filter(|&call| *call == Call::Busy(false)).count(), 1);
        // input works again right away
        assert!(c.begin_exchange("again").is_some());
    }

    #[test]
    fn exchange_snapshots_prompt_and_settings() {
        let (mut c, _) = controller_with(ScriptedGenerator::live(), MemoryStore::new());
        c.update_settings(SettingsChange::MaxTokens(32));
        let exchange = c.begin_exchange("  hi  ").unwrap();
        c.update_settings(SettingsChange::MaxTokens(64));

        assert_eq!(exchange.prompt(), "hi");
        assert_eq!(exchange.settings().max_tokens, 32);
    }

    #[test]
    fn prompt_carries_context_from_earlier_turns_only() {
        let (mut c, generator) = controller_with(
            ScriptedGenerator::live().reply(Ok("a1".into())).reply(Ok("a2".into())),
            MemoryStore::new(),
        );
        pollster::block_on(c.send("q1"));
        pollster::block_on(c.send("q2"));
        assert_eq!(
            generator.prompts(),
            vec!["q1".to_string(), "User: q1\nAssistant: a1\nUser: q2\nAssistant:".to_string()]
        );
    }

    #[test]
    fn error_banner_dismisses_after_five_seconds() {
        let (mut c, _) = controller_with(
            ScriptedGenerator::live().reply(Err(http_500())),
            MemoryStore::new(),
        );
        pollster::block_on(c.send("x"));

        let mut timer = DismissTimer::new(ChatConfig::default().error_display);
        assert!(!timer.tick(Duration::from_millis(4_900)));
        assert_eq!(timer.remaining(), Duration::from_millis(100));

        c.tick(Duration::from_millis(4_900));
        assert_eq!(c.phase(), Phase::Error);
        assert!(!c.renderer().calls.contains(&Call::DismissError));

        c.tick(Duration::from_millis(100));
        assert_eq!(c.phase(), Phase::Idle);
        assert_eq!(c.error_message(), None);
        assert_eq!(c.renderer().calls.last(), Some(&Call::DismissError));
    }

    #[test]
    fn offline_banner_does_not_expire() {
        let (mut c, _) = controller_with(ScriptedGenerator::offline(), MemoryStore::new());
        c.report_offline();
        c.tick(Duration::from_secs(60));
        assert_eq!(c.error_message(), Some(OFFLINE_MESSAGE));
        assert_eq!(c.phase(), Phase::Error);
    }

    #[test]
    fn success_after_offline_start_returns_to_idle() {
        let (mut c, _) = controller_with(
            ScriptedGenerator::live().reply(Ok("hi".into())),
            MemoryStore::new(),
        );
        c.report_offline();

        assert_eq!(pollster::block_on(c.send("hello")), Outcome::Answered);
        c.tick(Duration::from_secs(60));

        assert_eq!(c.phase(), Phase::Idle);
        assert_eq!(c.error_message(), None);
        assert!(c.renderer().calls.contains(&Call::DismissError));
    }

    #[test]
    fn success_right_after_a_failure_returns_to_idle() {
        let (mut c, _) = controller_with(
            ScriptedGenerator::live().reply(Err(http_500())).reply(Ok("ok".into())),
            MemoryStore::new(),
        );
        pollster::block_on(c.send("one"));
        c.tick(Duration::from_secs(1));
        assert_eq!(c.phase(), Phase::Error);

        pollster::block_on(c.send("two"));
        assert_eq!(c.phase(), Phase::Idle);
        assert_eq!(c.error_message(), None);
    }

    #[test]
    fn live_check_clears_the_connectivity_banner_only() {
        let (mut c, _) = controller_with(
            ScriptedGenerator::live().reply(Err(http_500())),
            MemoryStore::new(),
        );
        c.report_connection(false);
        assert_eq!(c.phase(), Phase::Error);
        c.report_connection(true);
        assert_eq!(c.phase(), Phase::Idle);
        assert_eq!(c.renderer().calls.last(), Some(&Call::DismissError));

        // an exchange error keeps its own countdown
        pollster::block_on(c.send("x"));
        c.report_connection(true);
        assert_eq!(c.error_message(), Some("Error: HTTP 500: Internal Server Error"));
    }

    #[test]
    fn clear_leaves_only_the_greeting() {
        let (mut c, _) = controller_with(
            ScriptedGenerator::live().reply(Ok("hi".into())),
            MemoryStore::new(),
        );
        pollster::block_on(c.send("hello"));

        c.clear_history();

        assert_eq!(c.history(), &[Turn::system(CLEARED_GREETING)]);
        assert_eq!(c.persistence().store().get_item(HISTORY_KEY), Ok(None));
        let calls = &c.renderer().calls;
        assert_eq!(
            &calls[calls.len() - 2..],
            &[Call::ClearTranscript, Call::Turn(Turn::system(CLEARED_GREETING))]
        );
    }

    #[test]
    fn settings_changes_persist_immediately() {
        let (mut c, _) = controller_with(ScriptedGenerator::live(), MemoryStore::new());
        c.update_settings(SettingsChange::Model("llama3.2:3b".into()));
        c.update_settings(SettingsChange::Temperature(1.4));

        let stored = c.persistence().load_settings();
        assert_eq!(stored.model, "llama3.2:3b");
        assert_eq!(stored.temperature, 1.4);
        assert_eq!(stored.max_tokens, 500);
    }

    #[test]
    fn construction_replays_stored_history_in_order() {
        let mut seed = Persistence::new(MemoryStore::new(), 50);
        let stored = vec![Turn::system("hey"), Turn::user("q"), Turn::assistant("a")];
        seed.save_history(&stored).unwrap();

        let (c, _) = controller_with(ScriptedGenerator::live(), seed.store().clone());
        assert_eq!(c.history(), stored.as_slice());
        assert_eq!(c.renderer().turns(), stored.iter().collect::<Vec<_>>());
    }
}
