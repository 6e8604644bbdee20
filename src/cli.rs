//! CLI parser
use clap::Parser;
use std::num::NonZeroU16;
use std::path::PathBuf;
use url::Url;

use crate::constants::{DEFAULT_API_KEY_ENV, DEFAULT_ENDPOINT, DEFAULT_MODEL};
use crate::style::Style;

#[derive(Parser, Debug)]
/// CLI Options
pub struct CliOptions {
    #[clap(long, help = "Enable debug logging", env = "SNOWCARD_DEBUG")]
    /// Enable debug logging. Env: SNOWCARD_DEBUG
    pub debug: bool,
    #[clap(long, short, default_value = "9000", env = "SNOWCARD_PORT")]
    /// http listener, defaults to `9000`.
    /// Env: SNOWCARD_PORT
    pub port: NonZeroU16,
    #[clap(
        long,
        short,
        default_value = "127.0.0.1",
        env = "SNOWCARD_LISTEN_ADDRESS"
    )]
    /// Listen address, defaults to `127.0.0.1`.
    /// Env: SNOWCARD_LISTEN_ADDRESS
    pub listen_address: String,
    #[clap(long, short, value_enum, default_value_t = Style::Classic, env = "SNOWCARD_STYLE")]
    /// Card style. Env: SNOWCARD_STYLE
    pub style: Style,
    #[clap(long, short, default_value = DEFAULT_MODEL, env = "SNOWCARD_MODEL")]
    /// Image model name. Env: SNOWCARD_MODEL
    pub model: String,
    #[clap(long, default_value = DEFAULT_ENDPOINT, env = "SNOWCARD_ENDPOINT")]
    /// Base URL of the generation API. Env: SNOWCARD_ENDPOINT
    pub endpoint: Url,
    #[clap(long, default_value = DEFAULT_API_KEY_ENV, env = "SNOWCARD_API_KEY_ENV")]
    /// Name of the environment variable holding the API key, read on every request.
    /// Env: SNOWCARD_API_KEY_ENV
    pub api_key_env: String,

    #[clap(long, env = "SNOWCARD_FONT_DIR")]
    /// Extra directory of `.ttf`/`.otf` fonts, eg one holding Marck Script.
    /// Env: SNOWCARD_FONT_DIR
    pub font_dir: Option<PathBuf>,
    #[clap(long, env = "SNOWCARD_DEBUG_DIR")]
    /// Save every raw API response here. Env: SNOWCARD_DEBUG_DIR
    pub debug_dir: Option<PathBuf>,
}
