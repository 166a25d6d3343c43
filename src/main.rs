use std::path::PathBuf;

use env_logger::Env;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    log::info!(
        "[startup] visual-module-host {} (config: {})",
        env!("CARGO_PKG_VERSION"),
        config_path
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "defaults".to_string())
    );

    if let Err(e) = visual_module_host_lib::run(config_path.as_deref()).await {
        log::error!("[startup] {e}");
        std::process::exit(1);
    }
}
