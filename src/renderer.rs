use crate::turn::Turn;

/// what the controller needs from a ui. implementations decide how a turn
/// looks; the controller only decides when things happen.
pub trait Renderer {
    /// append one turn to the visible transcript.
    fn render_turn(&mut self, turn: &Turn);
    fn clear_transcript(&mut self);
    fn show_error(&mut self, message: &str);
    fn dismiss_error(&mut self);
    /// disable (or re-enable) input controls while a request is in flight.
    fn set_busy(&mut self, busy: bool);
    fn clear_input(&mut self);
}
