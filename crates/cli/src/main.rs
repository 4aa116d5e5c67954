//! pushcall console
//!
//! Runs the client core against the loopback SDK. Remote behaviour (incoming
//! pushes, remote hangups, dropped calls) is simulated with console commands.

mod console;
mod logging;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use pushcall_client_core::sdk::loopback::{LoopbackInspector, LoopbackSdk};
use pushcall_client_core::{
    App, CallSessionController, ClientConfig, ClientResult, FileIdentityStore, HttpTokenClient,
    IncomingCallRouter, PushRegistrar, SdkEvent, StaticTokenProvider, TokenProvider, UserCommand,
};

use crate::console::{ConsoleAlerts, ConsoleCommand, HELP};
use crate::logging::{parse_log_level, setup_logging, LoggingConfig};

const DEFAULT_DEVICE_TOKEN: &str = "console-device";

#[derive(Parser, Debug)]
#[command(author, version, about = "Push-signaled VoIP client console", long_about = None)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "PUSHCALL_CONFIG")]
    config: Option<PathBuf>,

    /// Token endpoint, e.g. https://example.com/accessToken
    #[arg(long, env = "PUSHCALL_TOKEN_URL")]
    token_url: Option<String>,

    /// File the chosen identity is kept in
    #[arg(long, env = "PUSHCALL_STORE")]
    store: Option<PathBuf>,

    /// Device push token to register
    #[arg(long, env = "PUSHCALL_DEVICE_TOKEN")]
    device_token: Option<String>,

    /// Issue tokens locally instead of calling the token endpoint
    #[arg(long)]
    offline: bool,

    /// Delay before the simulated remote party rings, then answers
    #[arg(long, default_value = "500")]
    answer_delay_ms: u64,

    /// Log level
    #[arg(long, env = "PUSHCALL_LOG", default_value = "warn")]
    log_level: String,

    /// Log as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Include source file and line in log lines
    #[arg(long)]
    log_file_info: bool,
}

impl Args {
    fn client_config(&self) -> Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ClientConfig::new(),
        };
        if let Some(url) = &self.token_url {
            config = config.with_token_url(url.clone());
        }
        if let Some(store) = &self.store {
            config = config.with_identity_store_path(store.clone());
        }
        if let Some(token) = &self.device_token {
            config = config.with_device_push_token(token.clone());
        }
        if config.device_push_token.is_none() {
            config = config.with_device_push_token(DEFAULT_DEVICE_TOKEN);
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut logging = LoggingConfig::new(parse_log_level(&args.log_level)?);
    if args.json_logs {
        logging = logging.with_json();
    }
    if args.log_file_info {
        logging = logging.with_file_info();
    }
    setup_logging(logging)?;

    let config = args.client_config()?;
    info!(token_url = %config.token_url, store = %config.identity_store_path.display(), "Starting pushcall console");

    let delay = Duration::from_millis(args.answer_delay_ms);
    let sdk = Arc::new(LoopbackSdk::with_auto_answer(delay, delay));
    let tokens: Arc<dyn TokenProvider> = if args.offline {
        Arc::new(StaticTokenProvider::new("offline"))
    } else {
        Arc::new(HttpTokenClient::new(&config.token_url, &config.user_agent)?)
    };
    let registrar = Arc::new(PushRegistrar::new(sdk.clone(), config.device_push_token.clone()));
    let controller = Arc::new(CallSessionController::spawn(&config, tokens, registrar, sdk.clone()));
    let router = Arc::new(IncomingCallRouter::new(
        Arc::new(LoopbackInspector),
        Arc::new(ConsoleAlerts),
        controller.clone(),
        config.alert_channel.clone(),
    ));
    let store = Arc::new(FileIdentityStore::new(&config.identity_store_path));
    let app = App::new(store, controller.clone(), router);

    app.start().await?;
    println!("{}", app.screen());
    println!("type 'help' for commands");

    let mut states = controller.subscribe_state();
    let mut invitations = controller.subscribe_invitations();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.parse::<ConsoleCommand>() {
                    Ok(ConsoleCommand::Quit) => break,
                    Ok(command) => run(&app, &sdk, command).await,
                    Err(e) => println!("{}\n{}", e, HELP),
                }
            }
            Ok(()) = states.changed() => println!("{}", app.screen()),
            Ok(()) = invitations.changed() => println!("{}", app.screen()),
        }
    }

    controller.shutdown().await;
    Ok(())
}

async fn run(app: &App, sdk: &LoopbackSdk, command: ConsoleCommand) {
    let result = match command {
        ConsoleCommand::Login(identity) => app.handle(UserCommand::Login(identity)).await,
        ConsoleCommand::Logout => app.handle(UserCommand::Logout).await,
        ConsoleCommand::Call(target) => app.handle(UserCommand::Dial(target)).await,
        ConsoleCommand::HangUp => app.handle(UserCommand::HangUp).await,
        ConsoleCommand::Accept => app.handle(UserCommand::Accept).await,
        ConsoleCommand::Reject => app.handle(UserCommand::Reject).await,
        ConsoleCommand::PushInvite(from) => {
            let payload = LoopbackSdk::invitation_payload(&from, app.identity().as_ref());
            app.router().route(&payload).await.map(|_| ())
        }
        ConsoleCommand::PushCancel => {
            let call_sid = app
                .controller()
                .pending_invitation()
                .map(|invitation| invitation.call_sid)
                .unwrap_or_else(|| "CA-unknown".to_string());
            let payload = LoopbackSdk::cancellation_payload(&call_sid);
            app.router().route(&payload).await.map(|_| ())
        }
        ConsoleCommand::RemoteHangUp => {
            simulate(sdk, SdkEvent::Disconnected { cause: None });
            Ok(())
        }
        ConsoleCommand::Drop(cause) => {
            simulate(sdk, SdkEvent::Disconnected { cause: Some(cause) });
            Ok(())
        }
        ConsoleCommand::Status => {
            println!("{}", app.screen());
            Ok(())
        }
        ConsoleCommand::Help => {
            println!("{}", HELP);
            Ok(())
        }
        ConsoleCommand::Quit => Ok(()),
    };
    report(result);
}

fn simulate(sdk: &LoopbackSdk, event: SdkEvent) {
    let delivered = sdk.last_handle().is_some_and(|handle| sdk.emit(handle, event));
    if !delivered {
        println!("no open call");
    }
}

fn report(result: ClientResult<()>) {
    if let Err(e) = result {
        warn!("Command failed: {}", e);
        println!("error: {}", e);
    }
}
