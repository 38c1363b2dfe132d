//! JWT token lifecycle.
//!
//! # Components
//!
//! - [`TokenManager`] - owns the token, schedules refreshes, applies answers
//! - [`TokenRecord`] - persisted token with absolute expiry
//! - [`RefreshChannel`] - capability the refresh request is sent through
//! - [`Backoff`] - exponential backoff shared with the claim client
//! - [`Clock`] - wall-clock source (`ManualClock` in tests)

mod backoff;
mod clock;
mod events;
mod manager;
pub mod record;
mod refresh;

pub use backoff::Backoff;
pub use clock::{Clock, ManualClock, SystemClock};
pub use events::AuthEvent;
pub use manager::{ManagerState, RefreshSchedule, TokenManager};
pub use record::{token_proof, TokenRecord};
pub use refresh::{RefreshChannel, RefreshRequest, RefreshResponse, REFRESH_REQUEST_TYPE};
