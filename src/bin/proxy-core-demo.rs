//! Minimal demo shell for manually exercising the dispatcher: reads a
//! [`ProxyConfig`] from a TOML file and feeds stdin through a
//! [`FrameDispatcher`], logging every delivered frame. Not the production
//! daemon — that stays out of scope for this crate — just a way to poke
//! the library the way the teacher crate's own binaries exercise theirs.

use async_trait::async_trait;
use clap::Parser;
use routecore::connection::drive;
use routecore::dispatch::ErrorCode;
use routecore::protocol::FrameDescriptor;
use routecore::{FrameCallbacks, FrameDispatcher, ProxyConfig};

#[derive(Parser)]
#[command(name = "proxy-core-demo")]
struct Args {
    /// Path to a TOML file with `ProxyConfig` fields; unset fields fall
    /// back to their defaults.
    #[arg(long)]
    config: Option<std::path::PathBuf>,
}

struct LoggingCallbacks;

#[async_trait]
impl FrameCallbacks for LoggingCallbacks {
    async fn on_umbrella_message(&mut self, frame: FrameDescriptor, bytes: &[u8]) -> bool {
        tracing::info!(request_id = frame.request_id, len = bytes.len(), "umbrella frame");
        true
    }

    async fn on_caret_message(&mut self, frame: FrameDescriptor, bytes: &[u8]) -> bool {
        tracing::info!(request_id = frame.request_id, len = bytes.len(), "caret frame");
        true
    }

    async fn on_ascii(&mut self, pending: &[u8]) -> usize {
        // This demo has no real line-oriented sub-parser to hand the bytes
        // to, so it just logs and reports everything as consumed rather
        // than stalling the buffer on bytes nothing will ever retire.
        tracing::info!(len = pending.len(), "ascii bytes");
        pending.len()
    }

    fn parse_error(&mut self, code: ErrorCode, detail: &str) {
        tracing::warn!(?code, detail, "parse error");
    }
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = match args.config {
        Some(path) => {
            let contents = std::fs::read_to_string(&path)?;
            ProxyConfig::from_toml_str(&contents).map_err(std::io::Error::other)?
        }
        None => ProxyConfig::default(),
    };

    let mut dispatcher = FrameDispatcher::new(config, LoggingCallbacks);
    let mut stdin = tokio::io::stdin();
    drive(&mut stdin, &mut dispatcher).await
}
