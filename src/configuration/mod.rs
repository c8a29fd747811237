mod request;
mod server;

pub use request::RequestSettings;
pub use server::ServerSettings;

use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub request: RequestSettings,
}

impl Settings {
    /// Compiled-in defaults, overridden by `ASSERTO_*` environment variables
    /// such as `ASSERTO_SERVER_PORT` or `ASSERTO_REQUEST_TIMEOUT`.
    pub fn init() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 0)?
            .set_default("request.encoding", "utf-8")?
            .add_source(config::Environment::with_prefix("ASSERTO").separator("_"))
            .build()?
            .try_deserialize::<Self>()
    }
}
