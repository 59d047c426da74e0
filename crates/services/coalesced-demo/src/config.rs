use config::{Config, ConfigError, File, FileFormat};
use once_cell::sync::OnceCell;
use revolt_coalesced::CoalescionServiceConfig;
use serde::Deserialize;

static SETTINGS: OnceCell<Settings> = OnceCell::new();

#[derive(Deserialize, Debug, Clone)]
pub struct Server {
    pub port: u16,
    pub delay_ms: u64,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Client {
    pub calls: usize,
    pub key: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Settings {
    pub server: Server,
    pub client: Client,
    #[serde(default)]
    pub coalescion: CoalescionServiceConfig,
}

/// Embedded defaults, overridden by `Demo.toml` in the working directory if present
fn read() -> Result<Config, ConfigError> {
    let mut builder = Config::builder().add_source(File::from_str(
        include_str!("../Demo.toml"),
        FileFormat::Toml,
    ));

    if std::path::Path::new("Demo.toml").exists() {
        builder = builder.add_source(File::new("Demo.toml", FileFormat::Toml));
    }

    builder.build()
}

pub fn settings() -> Result<&'static Settings, ConfigError> {
    SETTINGS.get_or_try_init(|| read()?.try_deserialize())
}
