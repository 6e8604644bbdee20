//! Config handling

use std::num::NonZeroU16;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::log::LevelFilter;
use url::Url;

use crate::cli::CliOptions;
use crate::compositor::Compositor;
use crate::fonts::load_fonts;
use crate::generation::{CredentialSource, GeminiClient};
use crate::pipeline::Pipeline;
use crate::style::Style;

/// Sets up logging based on the debug flag
pub fn setup_logging(debug: bool) -> Result<(), Box<std::io::Error>> {
    let level = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let mut logger = simple_logger::SimpleLogger::new().with_level(level);
    if !debug {
        logger = logger
            .with_module_level("tracing", LevelFilter::Warn)
            .with_module_level("rustls", LevelFilter::Info)
            .with_module_level("hyper_util", LevelFilter::Info)
            .with_module_level("reqwest", LevelFilter::Info)
            .with_module_level("h2", LevelFilter::Info);
    }
    logger.init().map_err(|err| {
        eprintln!("Failed to initialize logger: {}", err);
        Box::new(std::io::Error::other(err))
    })
}

/// Everything the studio needs to start.
#[derive(Clone, Debug)]
pub struct StudioConfig {
    /// Address to bind
    pub listen_address: String,
    /// Port to bind
    pub port: NonZeroU16,
    /// Card style
    pub style: Style,
    /// Image model
    pub model: String,
    /// API base URL
    pub endpoint: Url,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Extra fonts
    pub font_dir: Option<PathBuf>,
    /// Where raw API responses are saved
    pub debug_dir: Option<PathBuf>,
}

impl From<&CliOptions> for StudioConfig {
    fn from(cli: &CliOptions) -> Self {
        Self {
            listen_address: cli.listen_address.clone(),
            port: cli.port,
            style: cli.style,
            model: cli.model.clone(),
            endpoint: cli.endpoint.clone(),
            api_key_env: cli.api_key_env.clone(),
            font_dir: cli.font_dir.clone(),
            debug_dir: cli.debug_dir.clone(),
        }
    }
}

impl StudioConfig {
    /// `address:port` to bind.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_address, self.port)
    }

    /// Client for the configured endpoint and model. The key is looked up per request.
    pub fn generator(&self) -> GeminiClient {
        GeminiClient::new(
            self.endpoint.clone(),
            &self.model,
            CredentialSource::Env(self.api_key_env.clone()),
        )
        .with_debug_dir(self.debug_dir.clone())
    }

    /// Pipeline wired to [`Self::generator`] and a compositor using the discovered fonts.
    pub fn pipeline(&self) -> Pipeline {
        let fonts = load_fonts(self.font_dir.as_deref());
        Pipeline::new(
            Arc::new(self.generator()),
            Arc::new(Compositor::new(fonts)),
            self.style,
        )
    }
}
