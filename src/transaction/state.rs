/// Lifecycle of a resource holder
///
/// ```text
/// Open ──close_all──> Closed
///   │                   ▲
///   └──release failed──> Closing ──close_all──┘
/// ```
///
/// There is no way back from `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HolderState {
    /// Resources can be registered and committed
    Open,

    /// Sessions were closed but a connection release failed
    Closing,

    /// Every session was closed and every connection released
    Closed,
}

impl HolderState {
    pub fn is_open(&self) -> bool {
        matches!(self, HolderState::Open)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, HolderState::Closed)
    }
}

impl std::fmt::Display for HolderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HolderState::Open => write!(f, "OPEN"),
            HolderState::Closing => write!(f, "CLOSING"),
            HolderState::Closed => write!(f, "CLOSED"),
        }
    }
}
