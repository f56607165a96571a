use clinic_comms::{config::CommsConfig, init_comms, init_tracing};
use std::env;
use std::process;

#[tokio::main]
async fn main() {
    init_tracing();

    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "config/comms.yaml".to_string());

    let config = match CommsConfig::from_file(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from {}: {}", config_path, e);
            eprintln!("Usage: clinic-comms [config_file]");
            process::exit(1);
        }
    };

    if let Err(e) = init_comms(config).await {
        eprintln!("clinic-comms error: {}", e);
        process::exit(1);
    }
}
