fn main() {
    // ESP-IDF environment is only needed for Xtensa firmware builds; host
    // builds and tests skip it
    if let Ok(target) = std::env::var("TARGET") {
        if target.contains("xtensa") {
            embuild::espidf::sysenv::output();
        }
    }
    println!("cargo:rerun-if-env-changed=TEDDY_API_BASE_URL");
    println!("cargo:rerun-if-env-changed=TEDDY_POP_KEY");
}
