/// Token lifecycle notifications.
///
/// `RefreshExhausted` and `AuthFailed` mean the device must claim again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// Claim succeeded and the new token is stored.
    Authenticated { expiry: u32 },
    TokenStored { expiry: u32 },
    Refreshed { expiry: u32 },
    /// One refresh attempt failed; a retry is scheduled.
    RefreshFailed { attempt: u32, reason: String },
    RefreshExhausted { attempts: u32 },
    TokenCleared,
    /// The server rejected the device (claim or `auth/error`).
    AuthFailed { reason: String },
}
