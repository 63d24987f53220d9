//! Read-only view of whether the user may generate right now.

/// Injected generation allowance. Checked before every agent call.
pub trait Entitlements: Send + Sync {
    fn can_generate(&self) -> bool;

    /// Paywall placement reported with requests and quota events.
    fn paywall_source(&self) -> Option<String> {
        None
    }
}

/// No limits.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unmetered;

impl Entitlements for Unmetered {
    fn can_generate(&self) -> bool {
        true
    }
}
