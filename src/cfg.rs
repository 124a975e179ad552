use std::num::NonZeroUsize;

/// Lock configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Cfg {
    /// Identifier for trace logging.
    ///
    /// By default a short numeric identifier is generated.
    pub trace_id: Option<String>,
    /// Capacity of the command delivery channel.
    ///
    /// Callers suspend while delivering a command when the channel is full.
    /// By default this is 1.
    pub command_queue: NonZeroUsize,
}

impl Default for Cfg {
    fn default() -> Self {
        Self { trace_id: None, command_queue: NonZeroUsize::new(1).unwrap() }
    }
}
