//! BLE GATT service carrying the encrypted provisioning packet.
//!
//! # GATT Service Structure
//!
//! ```text
//! Service: Teddy Provisioning
//! ├── Packet (Write) - [nonce 12][tag 16][ciphertext N], at most 512 bytes
//! └── Status (Read, Notify) - JSON status reply, at most 64 bytes
//! ```
//!
//! The phone needs an MTU of at least 247 to deliver a full packet in one
//! write. Packets are decrypted with the PoP key loaded into the session; the
//! link itself is not trusted.

use super::packet::MAX_PACKET_LEN;
use super::session::ProvisioningSession;
use super::status::StatusReply;
use esp32_nimble::utilities::mutex::Mutex;
use esp32_nimble::utilities::BleUuid;
use esp32_nimble::{
    uuid128, BLEAdvertisementData, BLECharacteristic, BLEDevice, BLEError, NimbleProperties,
};
use log::{info, warn};
use std::sync::Arc;

const PROVISIONING_SERVICE_UUID: BleUuid = uuid128!("7e1d0000-5a4b-4c3d-8e2f-1a2b3c4d5e6f");

const PACKET_CHAR_UUID: BleUuid = uuid128!("7e1d0001-5a4b-4c3d-8e2f-1a2b3c4d5e6f");

const STATUS_CHAR_UUID: BleUuid = uuid128!("7e1d0002-5a4b-4c3d-8e2f-1a2b3c4d5e6f");

/// Advertised while waiting for credentials.
const DEVICE_NAME_UNPROVISIONED: &str = "Teddy-Setup";

/// Advertised once provisioned.
const DEVICE_NAME_PROVISIONED: &str = "Teddy";

const PREFERRED_MTU: u16 = 517;

/// NimBLE front end for a [`ProvisioningSession`].
pub struct ProvisioningService {
    session: ProvisioningSession,
    status_char: Arc<Mutex<BLECharacteristic>>,
}

fn notify_status(status_char: &Mutex<BLECharacteristic>, reply: &StatusReply) {
    status_char
        .lock()
        .set_value(reply.to_json().as_bytes())
        .notify();
}

impl ProvisioningService {
    /// Register the GATT service and wire its callbacks to `session`.
    pub fn new(session: ProvisioningSession) -> Result<Self, BLEError> {
        let device = BLEDevice::take();
        device.set_preferred_mtu(PREFERRED_MTU)?;
        let server = device.get_server();

        let on_connect_session = session.clone();
        server.on_connect(move |_server, desc| {
            info!("BLE central connected: {:?}", desc.address());
            on_connect_session.on_connect();
        });

        let on_disconnect_session = session.clone();
        server.on_disconnect(move |_desc, reason| {
            info!("BLE central disconnected: {:?}", reason);
            on_disconnect_session.on_disconnect();
        });
        server.advertise_on_disconnect(true);

        let service = server.create_service(PROVISIONING_SERVICE_UUID);

        let status_char = service.lock().create_characteristic(
            STATUS_CHAR_UUID,
            NimbleProperties::READ | NimbleProperties::NOTIFY,
        );

        let packet_char = service
            .lock()
            .create_characteristic(PACKET_CHAR_UUID, NimbleProperties::WRITE);

        let write_session = session.clone();
        let notify_char = status_char.clone();
        packet_char.lock().on_write(move |args| {
            let data = args.recv_data();
            // Oversized writes are answered without copying them
            let reply = if data.len() > MAX_PACKET_LEN {
                warn!("Rejected oversized provisioning write: {} bytes", data.len());
                write_session.handle_packet(&[])
            } else {
                write_session.handle_packet(data)
            };
            notify_status(&notify_char, &reply);
            if reply == StatusReply::Ok {
                info!("Provisioning complete");
            }
        });

        Ok(Self {
            session,
            status_char,
        })
    }

    /// Start advertising and the session (including its timeout watchdog).
    pub fn start(&self) -> Result<(), BLEError> {
        if let Err(e) = self.session.start() {
            warn!("Provisioning session not started: {}", e);
        }
        let status_char = self.status_char.clone();
        let notify = move |reply: StatusReply| {
            info!("Provisioning timed out; notifying peer");
            notify_status(&status_char, &reply);
        };
        if let Err(e) = self.session.spawn_timeout_watchdog(notify) {
            warn!("No provisioning watchdog: {}", e);
        }
        Self::start_advertising(false)
    }

    /// Advertise under the name matching the provisioning state.
    pub fn start_advertising(provisioned: bool) -> Result<(), BLEError> {
        let advertising = BLEDevice::take().get_advertising();
        let name = if provisioned {
            DEVICE_NAME_PROVISIONED
        } else {
            DEVICE_NAME_UNPROVISIONED
        };

        advertising.lock().set_data(
            BLEAdvertisementData::new()
                .name(name)
                .add_service_uuid(PROVISIONING_SERVICE_UUID),
        )?;
        advertising.lock().start()
    }

    /// Stop advertising and abort the session.
    pub fn stop(&self) -> Result<(), BLEError> {
        self.session.stop();
        BLEDevice::take().get_advertising().lock().stop()
    }

    pub fn session(&self) -> &ProvisioningSession {
        &self.session
    }
}
