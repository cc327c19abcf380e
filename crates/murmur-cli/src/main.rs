//! Murmur terminal client entry point.
//!
//! Follows one conversation: prints timeline changes to stdout and sends each
//! stdin line as a text message. Logs go to stderr.

#![forbid(unsafe_code)]

mod command;
mod driver;
mod render;
mod system_env;

use std::time::Duration;

use clap::Parser;
use murmur_app::{Runtime, event_channel};
use murmur_client::{ClientConfig, SyncClient, rest::RestApi};
use murmur_core::{
    ConnectionConfig,
    connection::{
        DEFAULT_KEEPALIVE_INTERVAL, DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_BASE_DELAY,
    },
    pager::DEFAULT_PAGE_SIZE,
};
use murmur_proto::{ConversationId, UserId};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{driver::LiveDriver, system_env::SystemEnv};

/// Murmur terminal client
#[derive(Parser, Debug)]
#[command(name = "murmur")]
#[command(about = "Follow a Murmur conversation from the terminal")]
#[command(version)]
struct Args {
    /// Push-channel WebSocket URL, without the token
    #[arg(long, env = "MURMUR_WS_URL")]
    ws_url: String,

    /// Base URL of the HTTP API
    #[arg(long, env = "MURMUR_API_URL")]
    api_url: String,

    /// Credential for both the channel and the API
    #[arg(long, env = "MURMUR_TOKEN", hide_env_values = true)]
    token: String,

    /// Local user id
    #[arg(long, env = "MURMUR_USER_ID")]
    user_id: u64,

    /// Conversation to follow
    #[arg(long, env = "MURMUR_CONVERSATION")]
    conversation: u64,

    /// Messages per history page
    #[arg(long, env = "MURMUR_PAGE_SIZE", default_value_t = DEFAULT_PAGE_SIZE)]
    page_size: u32,

    /// Seconds between keepalive pings
    #[arg(long, env = "MURMUR_KEEPALIVE_SECS", default_value_t = DEFAULT_KEEPALIVE_INTERVAL.as_secs())]
    keepalive_secs: u64,

    /// Base reconnect delay in milliseconds
    #[arg(
        long,
        env = "MURMUR_RECONNECT_BASE_MS",
        default_value_t = DEFAULT_RECONNECT_BASE_DELAY.as_millis() as u64
    )]
    reconnect_base_ms: u64,

    /// Reconnect attempts before giving up
    #[arg(long, env = "MURMUR_MAX_RECONNECT_ATTEMPTS", default_value_t = DEFAULT_MAX_RECONNECT_ATTEMPTS)]
    max_reconnect_attempts: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "MURMUR_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn client_config(&self) -> ClientConfig {
        ClientConfig {
            endpoint: self.ws_url.clone(),
            page_size: self.page_size,
            connection: ConnectionConfig {
                keepalive_interval: Duration::from_secs(self.keepalive_secs),
                reconnect_base_delay: Duration::from_millis(self.reconnect_base_ms),
                max_reconnect_attempts: self.max_reconnect_attempts,
                ..ConnectionConfig::default()
            },
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    // The client is !Send, so it runs on a single-threaded runtime.
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    let result = runtime.block_on(run(args));

    // Stdin reads block a worker thread that would otherwise hold up shutdown.
    runtime.shutdown_background();
    result
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let conversation = ConversationId(args.conversation);
    let client = SyncClient::new(SystemEnv::new(), UserId(args.user_id), args.client_config())?;
    let api = RestApi::new(&args.api_url, args.token.clone())?;

    tracing::info!(
        user = args.user_id,
        conversation = args.conversation,
        api = %args.api_url,
        "starting"
    );

    let (handle, queue) = event_channel();
    let driver = LiveDriver::new(api, handle.clone(), queue);

    handle.connect(args.token.clone())?;
    handle.set_active_conversation(conversation)?;
    tokio::spawn(command::read_stdin(handle, conversation, args.token));

    Runtime::new(driver, client).run().await?;
    Ok(())
}
