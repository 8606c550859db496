use crate::config::DEFAULT_CONTEXT_TURNS;
use crate::turn::{Role, Turn};

/// [`build_context_with_window`] with the default six-turn window.
pub fn build_context(history: &[Turn], prompt: &str) -> String {
    build_context_with_window(history, prompt, DEFAULT_CONTEXT_TURNS)
}

/// flatten the trailing `window` turns of `history` plus `prompt` into one
/// prompt string.
///
/// system turns inside the window are dropped. when nothing is left to show,
/// the prompt goes out unwrapped.
pub fn build_context_with_window(history: &[Turn], prompt: &str, window: usize) -> String {
    let start = history.len().saturating_sub(window);
    let lines: Vec<String> = history[start..]
        .iter()
        .filter(|t| t.role() != Role::System)
        .map(|t| format!("{}: {}", t.role().label(), t.content()))
        .collect();

    if lines.is_empty() {
        return prompt.to_string();
    }

    format!(
        "{}\n{}: {}\n{}:",
        lines.join("\n"),
        Role::User.label(),
        prompt,
        Role::Assistant.label()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn exchange(n: usize) -> Vec<Turn> {
        (0..n)
            .flat_map(|i| [Turn::user(format!("q{i}")), Turn::assistant(format!("a{i}"))])
            .collect()
    }

    #[test]
    fn empty_history_returns_prompt_untouched() {
        assert_eq!(build_context(&[], "what is rust?"), "what is rust?");
    }

    #[test]
    fn keeps_only_the_last_six_turns_in_order() {
        let history = exchange(5);
        let out = build_context(&history, "next");
        assert_eq!(
            out,
            "User: q2\nAssistant: a2\nUser: q3\nAssistant: a3\nUser: q4\nAssistant: a4\nUser: next\nAssistant:"
        );
    }

    #[test]
    fn shorter_history_is_used_whole() {
        let out = build_context(&exchange(1), "again");
        assert_eq!(out, "User: q0\nAssistant: a0\nUser: again\nAssistant:");
    }

    #[test]
    fn system_turns_are_left_out() {
        let mut history = vec![Turn::system("welcome")];
        history.extend(exchange(1));
        let out = build_context(&history, "p");
        assert!(!out.contains("welcome"));
        assert!(out.starts_with("User: q0\n"));
    }

    #[test]
    fn only_system_turns_means_no_wrapping() {
        let history = vec![Turn::system("Chat history cleared.")];
        assert_eq!(build_context(&history, "hello"), "hello");
    }

    #[test]
    fn output_is_deterministic() {
        let history = exchange(4);
        assert_eq!(build_context(&history, "x"), build_context(&history, "x"));
    }

    #[test]
    fn window_size_is_configurable() {
        let out = build_context_with_window(&exchange(3), "p", 2);
        assert_eq!(out, "User: q2\nAssistant: a2\nUser: p\nAssistant:");
    }
}
