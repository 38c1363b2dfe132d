//! Teddy device boot flow.
//!
//! Runs on both ESP32 and host platforms:
//! - **Host**: `cargo run` (state under `~/.teddy-auth-esp32/`)
//! - **ESP32**: `cargo espflash flash --features esp32 --release`
//!
//! 1. Open the credential store and derive the device identity
//! 2. If unprovisioned, run BLE provisioning until success or timeout (ESP32)
//! 3. Initialize the token manager and claim the device if no valid token
//!    is held
//! 4. Keep the token fresh until shutdown
//!
//! The PoP key is a 64-char hex string taken from `TEDDY_POP_KEY` (at
//! compile time on ESP32, at run time on the host). Bringing WiFi up between
//! steps 2 and 3 is the application's job.

use log::{error, info, warn};
use std::sync::Arc;
use teddy_auth_esp32::claim::{ClaimClient, ClaimHttp};
use teddy_auth_esp32::config::AuthConfig;
use teddy_auth_esp32::storage::CredentialStore;
use teddy_auth_esp32::token::{AuthEvent, SystemClock, TokenManager};
use teddy_auth_esp32::Result;

// ESP32: Initialize ESP-IDF before anything else
#[cfg(feature = "esp32")]
fn platform_init() {
    esp_idf_sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();
    info!("ESP-IDF initialized");
}

// Host: Just initialize env_logger
#[cfg(not(feature = "esp32"))]
fn platform_init() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

#[cfg(feature = "esp32")]
fn open_store() -> Result<CredentialStore> {
    use teddy_auth_esp32::identity::MacAddress;
    use teddy_auth_esp32::storage::NvsStore;
    use teddy_auth_esp32::StorageError;

    let mac = MacAddress::read_station_mac()
        .map_err(|e| StorageError::Unavailable(format!("read MAC: {:?}", e)))?;
    Ok(CredentialStore::new(Arc::new(NvsStore::open()?), mac))
}

/// Host builds have no radio; the MAC comes from `TEDDY_DEVICE_MAC` or a
/// locally administered default.
#[cfg(not(feature = "esp32"))]
fn open_store() -> Result<CredentialStore> {
    use teddy_auth_esp32::identity::{canonical_device_id, MacAddress};
    use teddy_auth_esp32::storage::FileStore;
    use teddy_auth_esp32::{Error, ValidationError};

    let raw = std::env::var("TEDDY_DEVICE_MAC").unwrap_or_else(|_| "02:00:00:00:00:01".into());
    let id = canonical_device_id(&raw)?;
    let mut mac = [0u8; 6];
    hex::decode_to_slice(&id, &mut mac)
        .map_err(|_| Error::Validation(ValidationError::DeviceId(id.clone())))?;

    let store = FileStore::open_default()?;
    info!("Credential store at {:?}", store.root());
    Ok(CredentialStore::new(Arc::new(store), MacAddress::new(mac)))
}

#[cfg(feature = "esp32")]
fn claim_http(config: &AuthConfig) -> Result<Arc<dyn ClaimHttp>> {
    Ok(Arc::new(teddy_auth_esp32::claim::EspHttp::new(config.http_timeout)))
}

#[cfg(not(feature = "esp32"))]
fn claim_http(config: &AuthConfig) -> Result<Arc<dyn ClaimHttp>> {
    Ok(Arc::new(teddy_auth_esp32::claim::ReqwestHttp::new(
        config.http_timeout,
    )?))
}

#[cfg(feature = "esp32")]
const POP_KEY_HEX: Option<&str> = option_env!("TEDDY_POP_KEY");

/// Run one BLE provisioning session. Returns true once credentials are stored.
#[cfg(feature = "esp32")]
async fn provision(store: &CredentialStore, config: &AuthConfig) -> Result<bool> {
    use teddy_auth_esp32::provisioning::{
        PopKey, ProvisioningEvent, ProvisioningService, ProvisioningSession,
    };
    use teddy_auth_esp32::Error;

    let session = ProvisioningSession::new(store.clone(), config);
    match POP_KEY_HEX.and_then(PopKey::from_hex) {
        Some(key) => session.set_pop_key(key),
        None => warn!("TEDDY_POP_KEY missing or malformed; provisioning packets will be rejected"),
    }

    let mut events = session.subscribe();
    let service = ProvisioningService::new(session).map_err(|e| {
        error!("BLE setup failed: {:?}", e);
        Error::State("BLE provisioning service unavailable")
    })?;
    service.start().map_err(|e| {
        error!("BLE advertising failed: {:?}", e);
        Error::State("BLE advertising failed")
    })?;
    info!("Waiting for provisioning over BLE");

    let provisioned = loop {
        match events.recv().await {
            Ok(ProvisioningEvent::Succeeded) => break true,
            Ok(ProvisioningEvent::TimedOut) | Ok(ProvisioningEvent::Stopped) => break false,
            Ok(ProvisioningEvent::Failed(code)) if code.is_terminal() => break false,
            Ok(event) => info!("Provisioning: {:?}", event),
            Err(e) => {
                warn!("Provisioning event stream ended: {}", e);
                break false;
            }
        }
    };

    service.session().clear_pop_key();
    if provisioned {
        if let Err(e) = ProvisioningService::start_advertising(true) {
            warn!("Could not switch advertising name: {:?}", e);
        }
    } else if let Err(e) = service.stop() {
        warn!("Could not stop advertising: {:?}", e);
    }
    Ok(provisioned)
}

#[cfg(not(feature = "esp32"))]
async fn provision(_store: &CredentialStore, _config: &AuthConfig) -> Result<bool> {
    warn!("No BLE on host; seal a packet with `provisioning-packet` and deliver it from a device");
    Ok(false)
}

async fn run() -> Result<()> {
    let config = AuthConfig::from_env()?;
    let store = open_store()?;
    let device_id = store.load_device_id()?;
    info!("Device ID: {}", device_id);
    // Derive and persist the OOB secret on first boot
    store.load_oob_secret()?;

    if !store.is_provisioned()? && !provision(&store, &config).await? {
        warn!("Device not provisioned; nothing to authenticate");
        return Ok(());
    }
    if let Some(wifi) = store.load_wifi_config()? {
        info!("WiFi credentials for {:?} available", wifi.ssid);
    }

    let manager = TokenManager::new(config.clone(), store.clone(), Arc::new(SystemClock));
    manager.init().await?;

    let mut events = manager.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                AuthEvent::RefreshExhausted { .. } | AuthEvent::AuthFailed { .. } => {
                    warn!("Re-authentication required: {:?}", event)
                }
                other => info!("Auth event: {:?}", other),
            }
        }
    });

    if manager.is_token_valid().await {
        info!(
            "Token valid for {}s",
            manager.seconds_until_expiry().await.unwrap_or_default()
        );
    } else {
        match store.load_pairing_code()? {
            Some(code) => {
                let client = ClaimClient::new(config.clone(), store.clone(), claim_http(&config)?);
                if let Err(e) = manager.authenticate_device(&code, &client).await {
                    error!("Device claim failed: {}", e);
                }
            }
            None => warn!("No pairing code stored; cannot claim"),
        }
    }

    wait_for_shutdown().await;
    manager.shutdown().await;
    Ok(())
}

#[cfg(not(feature = "esp32"))]
async fn wait_for_shutdown() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Signal handler failed: {}", e);
    }
    info!("Shutting down...");
}

#[cfg(feature = "esp32")]
async fn wait_for_shutdown() {
    std::future::pending::<()>().await
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    platform_init();

    info!("=== Teddy auth core starting ===");

    #[cfg(feature = "esp32")]
    info!("Platform: ESP32");
    #[cfg(not(feature = "esp32"))]
    info!("Platform: Host");

    if let Err(e) = run().await {
        error!("Fatal: {}", e);
    }
    info!("Shutdown complete");
}
