//! Provisioning packet sealer for bench testing.
//!
//! Builds the JSON payload a phone app would send, validates it exactly as
//! the device does, and seals it with the PoP key. The packet is printed as
//! hex and base64, ready to paste into a BLE client's write field.
//!
//! Usage:
//!   TEDDY_POP_KEY=<64 hex chars> WIFI_SSID="MyNetwork" WIFI_PASSWORD="secret" \
//!   CHILD_ID=<uuid> PAIRING_CODE="TEDDY-1234" [CHILD_AGE=6] \
//!   cargo run --bin provisioning-packet
//!
//! For open networks set `WIFI_PASSWORD=""` or leave it unset.

use base64::Engine;
use rand_core::{OsRng, RngCore};
use teddy_auth_esp32::provisioning::packet::NONCE_LEN;
use teddy_auth_esp32::provisioning::{seal_packet, PopKey, ProvisioningData};

const USAGE: &str = "Usage:\n  \
    TEDDY_POP_KEY=<64 hex chars> WIFI_SSID=\"MyNetwork\" WIFI_PASSWORD=\"secret\" \\\n  \
    CHILD_ID=<uuid> PAIRING_CODE=\"TEDDY-1234\" [CHILD_AGE=6] \\\n  \
    cargo run --bin provisioning-packet";

/// Print error message and exit.
fn halt_with_error(msg: &str) -> ! {
    eprintln!("\n{}", msg);
    eprintln!("\n{}\n", USAGE);
    std::process::exit(1);
}

fn required(name: &str) -> String {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => value,
        _ => halt_with_error(&format!("Error: {} is not set", name)),
    }
}

fn main() {
    let pop_key = match PopKey::from_hex(&required("TEDDY_POP_KEY")) {
        Some(key) => key,
        None => halt_with_error("Error: TEDDY_POP_KEY must be 64 hex characters"),
    };

    let mut payload = serde_json::json!({
        "ssid": required("WIFI_SSID"),
        "password": std::env::var("WIFI_PASSWORD").unwrap_or_default(),
        "child_id": required("CHILD_ID"),
        "pairing_code": required("PAIRING_CODE"),
    });
    if let Ok(age) = std::env::var("CHILD_AGE") {
        match age.parse::<i32>() {
            Ok(age) => payload["child_age"] = age.into(),
            Err(_) => halt_with_error(&format!("Error: CHILD_AGE {:?} is not a number", age)),
        }
    }
    let plaintext = payload.to_string();

    // Reject anything the device would reject
    let data = match ProvisioningData::from_json(plaintext.as_bytes()) {
        Ok(data) => data,
        Err(e) => halt_with_error(&format!("Error: {}", e)),
    };

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    let packet = match seal_packet(&pop_key, &nonce, plaintext.as_bytes()) {
        Ok(packet) => packet,
        Err(e) => halt_with_error(&format!("Error: {}", e)),
    };

    println!("\n=== Provisioning Packet ===\n");
    println!("SSID:         {}", data.wifi.ssid);
    println!(
        "Password:     {} ({} chars)",
        if data.wifi.is_open() { "(none)" } else { "****" },
        data.wifi.password.len()
    );
    println!("Child ID:     {}", data.child_id);
    if data.has_child_age() {
        println!("Child age:    {}", data.child_age);
    }
    println!("Packet size:  {} bytes\n", packet.len());
    println!("hex:    {}", hex::encode(&packet));
    println!("base64: {}", base64::engine::general_purpose::STANDARD.encode(&packet));
}
