/// Messages that drive the plugin monitor worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Msg {
    /// Run a cycle now instead of waiting for the next tick.
    Wake,
    Stop,
}
