use std::path::Path;

use config::{Config, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::GatewayConfig;

/// Load configuration from a file using the config crate.
/// Supports YAML, JSON and TOML, chosen by file extension.
pub async fn load_config(config_path: &str) -> Result<GatewayConfig> {
    load_config_sync(config_path)
}

/// Load configuration synchronously
pub fn load_config_sync(config_path: &str) -> Result<GatewayConfig> {
    let config_path = Path::new(config_path);

    let format = match config_path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("toml") => FileFormat::Toml,
        _ => FileFormat::Toml,
    };

    let settings = Config::builder()
        .add_source(File::new(
            config_path
                .to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", config_path.display()))?,
            format,
        ))
        .build()
        .with_context(|| format!("Failed to build config from {}", config_path.display()))?;

    let gateway_config: GatewayConfig = settings.try_deserialize().with_context(|| {
        format!(
            "Failed to deserialize config from {}",
            config_path.display()
        )
    })?;

    Ok(gateway_config)
}

/// Starter configuration written by `rpcgate init`.
pub fn starter_config() -> &'static str {
    r#"listen_addr = "127.0.0.1:8080"
application = "gw"
max_body_bytes = 4194304

[routing]
default_version = "1.0.0"

[rpc]
endpoint = "http://127.0.0.1:9090"
timeout = "3s"

# Remove this table (or set core_threads = 0) to run filters inline.
[worker_pool]
core_threads = 4
max_threads = 16
keep_alive = "60s"
queue_capacity = 256

[[filters]]
name = "access_log"
priority = 10

[[filters]]
name = "response_headers"
priority = 20

[[filters]]
name = "authorize"
priority = 30

[[filters]]
name = "invoke"
priority = 100

[response_headers]
x-served-by = "rpcgate"

[logging]
level = "info"
json = false
"#
}
