//! bevy_ollama_chat: a chat client for a local ollama server, as a bevy plugin.
//!
//! - one-shot `/api/generate` requests with a short role-labelled context
//!   window flattened into the prompt.
//! - settings and the recent history persist across restarts (files on
//!   native, `localStorage` in the browser).
//! - never blocks the main thread: on native the blocking http client runs on
//!   tokio's blocking pool; on wasm we use bevy's async pool, which yields to
//!   the browser event loop.
//! - the controller is ui-agnostic; the plugin drives it from ecs events and
//!   reports back through one ordered [`ChatViewEvt`] stream.
//!
//! ollama api: https://github.com/ollama/ollama/blob/main/docs/api.md
//!   - generation: `POST /api/generate` with `stream: false`
//!   - liveness:   `GET /api/tags`

use std::sync::Arc;

use bevy::prelude::*;
use flume::{Receiver, Sender, TryRecvError};

pub mod bootstrap;
pub mod client;
pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod format;
pub mod renderer;
pub mod settings;
pub mod storage;
pub mod turn;

pub use bootstrap::{Console, bootstrap};
pub use client::{Generator, OllamaClient};
pub use config::ChatConfig;
pub use context::{build_context, build_context_with_window};
pub use controller::{ConversationController, Exchange, Outcome, Phase};
pub use error::{ChatError, ChatResult};
pub use renderer::Renderer;
pub use settings::{Settings, SettingsChange};
pub use storage::{DefaultStore, KeyValueStore, MemoryStore, Persistence};
pub use turn::{Role, Turn};

/// the generator the plugin talks to. insert your own before adding the
/// plugin to swap out the ollama http client.
#[derive(Resource, Clone)]
pub struct ChatClient(pub Arc<dyn Generator>);

/// on native we keep a tiny tokio runtime; its blocking pool carries the
/// http calls so neither the main thread nor bevy's pools block.
#[cfg(not(target_arch = "wasm32"))]
#[derive(Resource, Clone)]
pub struct TokioRt(pub Arc<tokio::runtime::Runtime>);

#[cfg(not(target_arch = "wasm32"))]
impl Default for TokioRt {
    fn default() -> Self {
        info!(target: "bevy_ollama_chat", "OllamaChat: initializing Tokio multi-thread runtime (native)");
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .expect("tokio runtime");
        Self(Arc::new(rt))
    }
}

/// system ordering so uis can run after we emit events
#[derive(SystemSet, Debug, Hash, PartialEq, Eq, Clone)]
pub enum ChatSet {
    /// bevy_ollama_chat emits [`ChatViewEvt`] here (in `Update`)
    Drain,
}

/// the controller the plugin drives.
pub type ChatControllerInner = ConversationController<DefaultStore, ChannelRenderer>;

/// present once startup bootstrap has finished.
#[derive(Resource)]
pub struct ChatController(pub ChatControllerInner);

/// send the text in the input box.
#[derive(Event, Debug, Clone)]
pub struct SubmitPrompt(pub String);

#[derive(Event, Debug, Clone, Default)]
pub struct ClearChatHistory;

/// re-run the liveness probe; answered with [`ChatViewEvt::Connection`].
#[derive(Event, Debug, Clone, Default)]
pub struct CheckConnection;

/// a settings control changed.
#[derive(Event, Debug, Clone)]
pub struct ChangeSetting(pub SettingsChange);

/// everything the ui has to show, in the order it happened.
#[derive(Event, Debug, Clone, PartialEq)]
pub enum ChatViewEvt {
    /// `markup` is the escaped html rendering of the turn's text.
    Turn { turn: Turn, markup: String },
    TranscriptCleared,
    Error { message: String },
    ErrorDismissed,
    Busy(bool),
    InputCleared,
    Connection { live: bool },
}

/// renderer that queues view events for the main thread.
#[derive(Clone)]
pub struct ChannelRenderer {
    tx: Sender<ChatViewEvt>,
}

impl ChannelRenderer {
    pub fn new(tx: Sender<ChatViewEvt>) -> Self {
        Self { tx }
    }

    /// send to inbox (ignore disconnected)
    fn push(&self, evt: ChatViewEvt) {
        let _ = self.tx.send(evt);
    }
}

impl Renderer for ChannelRenderer {
    fn render_turn(&mut self, turn: &Turn) {
        let markup = format::format(turn.content());
        self.push(ChatViewEvt::Turn { turn: turn.clone(), markup });
    }
    fn clear_transcript(&mut self) {
        self.push(ChatViewEvt::TranscriptCleared);
    }
    fn show_error(&mut self, message: &str) {
        self.push(ChatViewEvt::Error { message: message.to_string() });
    }
    fn dismiss_error(&mut self) {
        self.push(ChatViewEvt::ErrorDismissed);
    }
    fn set_busy(&mut self, busy: bool) {
        self.push(ChatViewEvt::Busy(busy));
    }
    fn clear_input(&mut self) {
        self.push(ChatViewEvt::InputCleared);
    }
}

/// view events from the controller (main thread and bootstrap task).
#[derive(Resource, Clone)]
struct ViewInbox {
    tx: Sender<ChatViewEvt>,
    rx: Receiver<ChatViewEvt>,
}

impl Default for ViewInbox {
    fn default() -> Self {
        let (tx, rx) = flume::unbounded();
        Self { tx, rx }
    }
}

/// results coming back from background jobs.
enum JobMsg {
    Ready(Box<ChatControllerInner>),
    Exchange { id: u64, result: ChatResult<String> },
    Probe { live: bool },
}

#[derive(Resource, Clone)]
struct JobInbox {
    tx: Sender<JobMsg>,
    rx: Receiver<JobMsg>,
}

impl Default for JobInbox {
    fn default() -> Self {
        let (tx, rx) = flume::unbounded();
        Self { tx, rx }
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn spawn_job(rt: &TokioRt, job: impl Future<Output = ()> + Send + 'static) {
    // the http client blocks; give it a blocking worker
    let _ = rt.0.spawn_blocking(move || futures_lite::future::block_on(job));
}

#[cfg(target_arch = "wasm32")]
fn spawn_job(job: impl Future<Output = ()> + 'static) {
    bevy::tasks::AsyncComputeTaskPool::get().spawn(job).detach();
}

/// bevy plugin: wires systems, events, resources.
/// uses the [`ChatClient`] resource when one is present, else an
/// [`OllamaClient`] for `config.base_url`.
/// on native, also inserts a tiny tokio runtime resource by default.
#[derive(Default)]
pub struct OllamaChatPlugin {
    pub config: ChatConfig,
}

impl Plugin for OllamaChatPlugin {
    fn build(&self, app: &mut App) {
        info!(target: "bevy_ollama_chat", "OllamaChatPlugin: build() host={}", self.config.base_url);
        if app.world().get_resource::<ChatClient>().is_none() {
            app.insert_resource(ChatClient(Arc::new(OllamaClient::new(&self.config))));
        }
        app.insert_resource(self.config.clone())
            .init_resource::<ViewInbox>()
            .init_resource::<JobInbox>()
            .add_event::<SubmitPrompt>()
            .add_event::<ClearChatHistory>()
            .add_event::<CheckConnection>()
            .add_event::<ChangeSetting>()
            .add_event::<ChatViewEvt>()
            .configure_sets(Update, ChatSet::Drain)
            .add_systems(Startup, spawn_bootstrap)
            .add_systems(
                Update,
                (apply_job_results, handle_chat_requests, tick_controller, drain_view_inbox)
                    .chain()
                    .in_set(ChatSet::Drain),
            );

        #[cfg(not(target_arch = "wasm32"))]
        if app.world().get_resource::<TokioRt>().is_none() {
            app.insert_resource(TokioRt::default());
        }
    }
}

/// liveness probe, then controller construction, off the main thread.
fn spawn_bootstrap(
    config: Res<ChatConfig>,
    client: Res<ChatClient>,
    views: Res<ViewInbox>,
    jobs: Res<JobInbox>,
    #[cfg(not(target_arch = "wasm32"))] rt: Res<TokioRt>,
) {
    let config = ChatConfig::clone(&config);
    let client = client.0.clone();
    let renderer = ChannelRenderer::new(views.tx.clone());
    let tx = jobs.tx.clone();
    let store = storage::default_store(&config);

    let job = async move {
        let controller = bootstrap(config, client, store, renderer).await;
        let _ = tx.send(JobMsg::Ready(Box::new(controller)));
    };

    #[cfg(not(target_arch = "wasm32"))]
    spawn_job(&rt, job);
    #[cfg(target_arch = "wasm32")]
    spawn_job(job);
}

/// applies finished jobs on the main thread (the only place the controller
/// is mutated).
fn apply_job_results(
    mut commands: Commands,
    jobs: Res<JobInbox>,
    views: Res<ViewInbox>,
    mut controller: Option<ResMut<ChatController>>,
) {
    loop {
        match jobs.rx.try_recv() {
            Ok(JobMsg::Ready(c)) => {
                info!(target: "bevy_ollama_chat", "controller ready: {} turns restored", c.history().len());
                commands.insert_resource(ChatController(*c));
            }
            Ok(JobMsg::Exchange { id, result }) => match controller.as_mut() {
                Some(c) => {
                    c.0.complete_exchange(id, result);
                }
                None => warn!(target: "bevy_ollama_chat", "exchange finished without a controller; dropped"),
            },
            Ok(JobMsg::Probe { live }) => {
                if let Some(c) = controller.as_mut() {
                    c.0.report_connection(live);
                }
                let _ = views.tx.send(ChatViewEvt::Connection { live });
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
        }
    }
}

/// turns ui requests into controller calls; spawns network work.
#[allow(clippy::too_many_arguments)]
fn handle_chat_requests(
    mut submits: EventReader<SubmitPrompt>,
    mut clears: EventReader<ClearChatHistory>,
    mut checks: EventReader<CheckConnection>,
    mut changes: EventReader<ChangeSetting>,
    client: Res<ChatClient>,
    jobs: Res<JobInbox>,
    mut controller: Option<ResMut<ChatController>>,
    #[cfg(not(target_arch = "wasm32"))] rt: Res<TokioRt>,
) {
    for _ in checks.read() {
        let client = client.0.clone();
        let tx = jobs.tx.clone();
        let job = async move {
            let live = client.check_liveness().await;
            let _ = tx.send(JobMsg::Probe { live });
        };
        #[cfg(not(target_arch = "wasm32"))]
        spawn_job(&rt, job);
        #[cfg(target_arch = "wasm32")]
        spawn_job(job);
    }

    for _ in clears.read() {
        let mut console = Console::new(client.0.clone(), controller.as_deref_mut().map(|c| &mut c.0));
        if !console.clear_chat_history() {
            warn!(target: "bevy_ollama_chat", "clear requested before the controller was ready");
        }
    }

    let Some(mut controller) = controller else {
        if !submits.is_empty() || !changes.is_empty() {
            warn!(target: "bevy_ollama_chat", "controller not ready; dropping input");
        }
        submits.clear();
        changes.clear();
        return;
    };

    for ChangeSetting(change) in changes.read() {
        controller.0.update_settings(change.clone());
    }

    for SubmitPrompt(text) in submits.read() {
        let Some(exchange) = controller.0.begin_exchange(text) else {
            continue;
        };
        let tx = jobs.tx.clone();
        let id = exchange.id();
        let job = async move {
            let result = exchange.run().await;
            let _ = tx.send(JobMsg::Exchange { id, result });
        };
        #[cfg(not(target_arch = "wasm32"))]
        spawn_job(&rt, job);
        #[cfg(target_arch = "wasm32")]
        spawn_job(job);
    }
}

fn tick_controller(time: Res<Time>, controller: Option<ResMut<ChatController>>) {
    if let Some(mut c) = controller {
        c.0.tick(time.delta());
    }
}

/// drains the inbox and emits user-facing events.
fn drain_view_inbox(inbox: Res<ViewInbox>, mut ev_view: EventWriter<ChatViewEvt>) {
    // drain up to a cap per frame to avoid long frames on bursty replays
    const MAX_PER_FRAME: usize = 512;
    for _ in 0..MAX_PER_FRAME {
        match inbox.rx.try_recv() {
            Ok(evt) => {
                ev_view.write(evt);
            }
            Err(TryRecvError::Empty) => break,
            Err(TryRecvError::Disconnected) => break,
        }
    }
}
