//! minimal bevy + bevy_ollama_chat example against a local ollama server.
//! - transcript, error banner, settings line and prompt box.
//! - history and settings persist between runs (files on native,
//!   localStorage in the browser).
//!
//! keys:
//!   enter      send prompt / apply model name
//!   tab        switch focus between prompt and model
//!   f1 / f2    temperature -/+ 0.1 (clamped to 0..=1)
//!   f3 / f4    max tokens -/+ 50
//!   f5         re-check connection
//!   ctrl+l     clear chat history

use bevy::input::keyboard::{KeyCode, KeyboardInput};
use bevy::prelude::*;
use bevy_ollama_chat::{
    ChangeSetting, ChatConfig, ChatController, ChatViewEvt, CheckConnection, ClearChatHistory,
    OllamaChatPlugin, Role, SettingsChange, SubmitPrompt, format,
};

// ---------------------- ui tags ----------------------

#[derive(Component)]
struct TranscriptText;
#[derive(Component)]
struct ErrorText;
#[derive(Component)]
struct SettingsText;
#[derive(Component)]
struct PromptText;

// ---------------------- app state ----------------------

#[derive(Resource, Default)]
struct Transcript(Vec<String>);

#[derive(Resource, Default)]
struct Banner(Option<String>);

#[derive(Resource, Default)]
struct PromptBuf(String);

#[derive(Resource, Default)]
struct ModelBuf(String);

#[derive(Resource, Default)]
struct Busy(bool);

#[derive(Resource, Default, Clone, Copy, PartialEq, Eq, Debug)]
enum Focus {
    #[default]
    Prompt,
    Model,
}

// ---------------------- main ----------------------

fn main() {
    #[cfg(target_arch = "wasm32")]
    console_error_panic_hook::set_once();

    let config = ChatConfig::from_env();

    App::new()
        .insert_resource(ClearColor(Color::srgb_u8(18, 18, 20)))
        .init_resource::<Transcript>()
        .init_resource::<Banner>()
        .init_resource::<PromptBuf>()
        .init_resource::<ModelBuf>()
        .init_resource::<Busy>()
        .init_resource::<Focus>()
        .add_plugins(DefaultPlugins)
        .add_plugins(OllamaChatPlugin { config })
        .add_systems(Startup, setup)
        .add_systems(Update, handle_text_input)
        // view events are emitted in ChatSet::Drain
        .add_systems(
            Update,
            (on_view_events, refresh_texts)
                .chain()
                .after(bevy_ollama_chat::ChatSet::Drain),
        )
        .run();
}

// ---------------------- setup ui ----------------------

fn setup(mut commands: Commands) {
    commands.spawn(Camera2d);

    let style_18 = TextFont { font_size: 18.0, ..default() };
    let style_14 = TextFont { font_size: 14.0, ..default() };

    commands
        .spawn((
            Node {
                width: Val::Percent(100.0),
                height: Val::Percent(100.0),
                flex_direction: FlexDirection::Column,
                row_gap: Val::Px(8.0),
                padding: UiRect::all(Val::Px(12.0)),
                ..default()
            },
            BackgroundColor(Color::NONE),
        ))
        .with_children(|p| {
            p.spawn((
                Text::new(""),
                style_14.clone(),
                TextColor(Color::srgb_u8(160, 160, 170)),
                SettingsText,
            ));
            p.spawn((
                Text::new(""),
                style_14.clone(),
                TextColor(Color::srgb_u8(240, 90, 90)),
                ErrorText,
            ));
            p.spawn((
                Node {
                    width: Val::Percent(100.0),
                    flex_grow: 1.0,
                    flex_direction: FlexDirection::Column,
                    overflow: Overflow::clip(),
                    padding: UiRect::axes(Val::Px(8.0), Val::Px(12.0)),
                    ..default()
                },
                BackgroundColor(Color::srgb(0.10, 0.10, 0.12)),
            ))
            .with_children(|c| {
                c.spawn((Text::new(""), style_18.clone(), TextColor(Color::WHITE), TranscriptText));
            });
            p.spawn((Text::new("> "), style_18.clone(), TextColor(Color::WHITE), PromptText));
        });
}

// ---------------------- input ----------------------

fn handle_text_input(
    mut ev_kbd: EventReader<KeyboardInput>,
    keys: Res<ButtonInput<KeyCode>>,
    mut focus: ResMut<Focus>,
    mut prompt: ResMut<PromptBuf>,
    mut model: ResMut<ModelBuf>,
    busy: Res<Busy>,
    controller: Option<Res<ChatController>>,
    mut ev_submit: EventWriter<SubmitPrompt>,
    mut ev_change: EventWriter<ChangeSetting>,
    mut ev_clear: EventWriter<ClearChatHistory>,
    mut ev_check: EventWriter<CheckConnection>,
) {
    let ctrl = keys.pressed(KeyCode::ControlLeft) || keys.pressed(KeyCode::ControlRight);

    if keys.just_pressed(KeyCode::Tab) {
        *focus = match *focus {
            Focus::Prompt => Focus::Model,
            Focus::Model => Focus::Prompt,
        };
        if *focus == Focus::Model {
            if let Some(c) = controller.as_ref() {
                model.0 = c.0.settings().model.clone();
            }
        }
        info!(target: "chat", "focus -> {:?}", *focus);
    }

    if ctrl && keys.just_pressed(KeyCode::KeyL) {
        ev_clear.write(ClearChatHistory);
    }
    if keys.just_pressed(KeyCode::F5) {
        ev_check.write(CheckConnection);
    }

    if let Some(c) = controller.as_ref() {
        let s = c.0.settings();
        if keys.just_pressed(KeyCode::F1) || keys.just_pressed(KeyCode::F2) {
            let step = if keys.just_pressed(KeyCode::F1) { -0.1 } else { 0.1 };
            let t = ((s.temperature + step) * 10.0).round() / 10.0;
            ev_change.write(ChangeSetting(SettingsChange::Temperature(t.clamp(0.0, 1.0))));
        }
        if keys.just_pressed(KeyCode::F3) || keys.just_pressed(KeyCode::F4) {
            let n = if keys.just_pressed(KeyCode::F3) {
                s.max_tokens.saturating_sub(50).max(1)
            } else {
                s.max_tokens.saturating_add(50)
            };
            ev_change.write(ChangeSetting(SettingsChange::MaxTokens(n)));
        }
    }

    // typing is ignored while a request is in flight
    let editable = !(busy.0 && *focus == Focus::Prompt);
    for ev in ev_kbd.read() {
        if !ev.state.is_pressed() || ctrl || !editable {
            continue;
        }
        if let Some(txt) = &ev.text {
            let s = txt.replace(['\r', '\n', '\t'], "");
            match *focus {
                Focus::Prompt => prompt.0.push_str(&s),
                Focus::Model => model.0.push_str(&s),
            }
        }
    }

    if keys.just_pressed(KeyCode::Backspace) && editable {
        match *focus {
            Focus::Prompt => {
                prompt.0.pop();
            }
            Focus::Model => {
                model.0.pop();
            }
        }
    }

    if keys.just_pressed(KeyCode::Enter) {
        match *focus {
            Focus::Prompt => {
                if !busy.0 {
                    // the controller clears the box through ChatViewEvt::InputCleared
                    ev_submit.write(SubmitPrompt(prompt.0.clone()));
                }
            }
            Focus::Model => {
                let name = model.0.trim().to_string();
                if !name.is_empty() {
                    info!(target: "chat", "model -> '{}'", name);
                    ev_change.write(ChangeSetting(SettingsChange::Model(name)));
                }
                *focus = Focus::Prompt;
            }
        }
    }
}

// ---------------------- chat events ----------------------

fn turn_line(role: Role, content: &str) -> String {
    let body = format::to_plain(&format::parse(content));
    match role {
        Role::User => format!("you: {body}"),
        Role::Assistant => format!("assistant: {body}"),
        Role::System => format!("-- {body} --"),
    }
}

fn on_view_events(
    mut ev: EventReader<ChatViewEvt>,
    mut transcript: ResMut<Transcript>,
    mut banner: ResMut<Banner>,
    mut prompt: ResMut<PromptBuf>,
    mut busy: ResMut<Busy>,
) {
    for evt in ev.read() {
        match evt {
            ChatViewEvt::Turn { turn, .. } => {
                transcript.0.push(turn_line(turn.role(), turn.content()));
            }
            ChatViewEvt::TranscriptCleared => transcript.0.clear(),
            ChatViewEvt::Error { message } => {
                error!(target: "chat", "{}", message);
                banner.0 = Some(message.clone());
            }
            ChatViewEvt::ErrorDismissed => banner.0 = None,
            ChatViewEvt::Busy(b) => busy.0 = *b,
            ChatViewEvt::InputCleared => prompt.0.clear(),
            // the controller raises or clears the banner itself
            ChatViewEvt::Connection { live } => {
                info!(target: "chat", "connection check: live={}", live);
            }
        }
    }
}

// ---------------------- text refresh ----------------------

fn refresh_texts(
    transcript: Res<Transcript>,
    banner: Res<Banner>,
    prompt: Res<PromptBuf>,
    model: Res<ModelBuf>,
    busy: Res<Busy>,
    focus: Res<Focus>,
    controller: Option<Res<ChatController>>,
    mut sets: ParamSet<(
        Query<&mut Text, With<TranscriptText>>,
        Query<&mut Text, With<ErrorText>>,
        Query<&mut Text, With<SettingsText>>,
        Query<&mut Text, With<PromptText>>,
    )>,
) {
    if transcript.is_changed() {
        if let Ok(mut t) = sets.p0().single_mut() {
            t.0 = transcript.0.join("\n\n");
        }
    }
    if banner.is_changed() {
        if let Ok(mut t) = sets.p1().single_mut() {
            t.0 = banner.0.clone().unwrap_or_default();
        }
    }
    let controller_changed = controller.as_ref().is_some_and(|c| c.is_changed());
    if controller_changed || model.is_changed() || focus.is_changed() {
        if let Ok(mut t) = sets.p2().single_mut() {
            t.0 = match controller.as_ref() {
                Some(c) => {
                    let s = c.0.settings();
                    let model_label = if *focus == Focus::Model {
                        format!("{} |", model.0)
                    } else {
                        s.model.clone()
                    };
                    format!(
                        "model: {}   temperature: {:.1}   max tokens: {}",
                        model_label, s.temperature, s.max_tokens
                    )
                }
                None => "connecting...".to_string(),
            };
        }
    }
    if prompt.is_changed() || busy.is_changed() || focus.is_changed() {
        if let Ok(mut t) = sets.p3().single_mut() {
            let caret = if *focus == Focus::Prompt { " |" } else { "" };
            let status = if busy.0 { "  (thinking...)" } else { "" };
            t.0 = format!("> {}{}{}", prompt.0, caret, status);
        }
    }
}
