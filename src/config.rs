//! Command line and environment configuration
//!
//! Every flag can also come from the environment (and therefore from `.env`).
//! The parsed arguments are turned into the plain config structs the library
//! takes, so nothing below this module reads the environment.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::ai::GeminiConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::PipelineConfig;
use crate::server::ServerConfig;

#[derive(Parser, Clone, Debug, PartialEq)]
#[command(author, version, about = "Name new screenshots from an AI description")]
pub struct WatchArgs {
    #[arg(
        short = 'd',
        long = "watch-dir",
        env = "SCREENSHOT_DIR",
        help = "Folder to watch (default: <Pictures>/Screenshots)"
    )]
    pub watch_dir: Option<PathBuf>,

    #[arg(long = "api-key", env = "GKEY", hide_env_values = true, help = "Gemini API key")]
    pub api_key: String,

    #[arg(long, env = "GEMINI_MODEL", default_value = "gemini-1.5-flash")]
    pub model: String,

    #[arg(
        long = "api-base",
        env = "GEMINI_API_BASE",
        default_value = "https://generativelanguage.googleapis.com"
    )]
    pub api_base: String,

    #[arg(
        long = "server-url",
        env = "SERVER_URL",
        help = "Upload endpoint, e.g. https://example.dev/upload; uploads are off when unset"
    )]
    pub server_url: Option<String>,

    #[arg(long = "no-upload", help = "Rename only, never upload")]
    pub no_upload: bool,

    #[arg(long = "no-clipboard", help = "Do not copy uploaded URLs to the clipboard")]
    pub no_clipboard: bool,

    #[arg(
        long = "settle-ms",
        env = "SETTLE_MS",
        default_value = "1000",
        help = "Delay before reading a new file"
    )]
    pub settle_ms: u64,

    #[arg(long = "max-in-flight", default_value = "4", help = "Files processed in parallel")]
    pub max_in_flight: usize,

    #[arg(long = "timeout-secs", default_value = "120", help = "HTTP request timeout")]
    pub timeout_secs: u64,
}

impl WatchArgs {
    /// Folder to watch, falling back to the platform screenshot location
    pub fn watch_dir(&self) -> PipelineResult<PathBuf> {
        if let Some(dir) = &self.watch_dir {
            return Ok(dir.clone());
        }

        dirs::picture_dir()
            .map(|pictures| pictures.join("Screenshots"))
            .filter(|dir| dir.is_dir())
            .or_else(dirs::home_dir)
            .ok_or_else(|| PipelineError::Config("no watch folder given and no home directory".to_string()))
    }

    /// Upload endpoint, if uploading is enabled
    pub fn upload_endpoint(&self) -> Option<&str> {
        if self.no_upload {
            return None;
        }
        self.server_url.as_deref().filter(|url| !url.trim().is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            settle_delay: Duration::from_millis(self.settle_ms),
            max_in_flight: self.max_in_flight.max(1),
        }
    }

    pub fn gemini_config(&self) -> GeminiConfig {
        GeminiConfig {
            api_key: self.api_key.clone(),
            base_url: self.api_base.clone(),
            model: self.model.clone(),
            timeout: self.timeout(),
        }
    }
}

#[derive(Parser, Clone, Debug, PartialEq)]
#[command(author, version, about = "Store uploaded screenshots and serve them back")]
pub struct ServerArgs {
    #[arg(short = 'b', long, env = "BIND_ADDR", default_value = "0.0.0.0:3000")]
    pub bind: SocketAddr,

    #[arg(long = "public-dir", env = "UPLOAD_DIR", default_value = "public/uploads")]
    pub public_dir: PathBuf,

    #[arg(
        long = "public-url",
        env = "PUBLIC_URL",
        default_value = "http://localhost:3000",
        help = "Origin used to build returned URLs"
    )]
    pub public_url: String,
}

impl ServerArgs {
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            public_dir: self.public_dir.clone(),
            public_url: self.public_url.clone(),
        }
    }
}
