//! Sync lifecycle state.

/// Where this profile stands with respect to a sync chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    /// No chain configured
    NotConfigured,
    /// Setup started but the first tick has not completed
    Initializing,
    /// Configured and enabled
    Active,
    /// Configured but switched off by the user
    Disabled,
}
