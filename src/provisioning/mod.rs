//! BLE provisioning channel.
//!
//! A phone app writes one AES-256-GCM encrypted packet carrying WiFi and
//! pairing credentials. The device decrypts it with the Proof-of-Possession
//! key, validates every field, stores the result and replies with a short
//! JSON status.
//!
//! # Components
//!
//! - [`packet`] - wire format, `open_packet` / `seal_packet`
//! - [`data`] - decrypted payload and its bounds
//! - [`status`] - error codes and status replies
//! - [`session`] - state machine with the hard session timeout
//! - `ble_service` - NimBLE GATT front end (`esp32` feature)

pub mod data;
pub mod packet;
pub mod session;
pub mod status;

#[cfg(feature = "esp32")]
mod ble_service;

pub use data::{
    validate_child_age, validate_child_id, validate_pairing_code, ProvisioningData, CHILD_AGE_UNSET,
};
pub use packet::{open_packet, seal_packet, PopKey, ProvisioningPacket};
pub use session::{ProvisioningEvent, ProvisioningSession, ProvisioningState};
pub use status::{ProvisioningErrorCode, StatusReply};

#[cfg(feature = "esp32")]
pub use ble_service::ProvisioningService;
