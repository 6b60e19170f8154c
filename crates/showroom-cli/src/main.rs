//! Showroom terminal chat client.
//!
//! # Usage
//!
//! ```bash
//! # Connect as alice, discovering the real-time endpoint from the API
//! showroom --api http://localhost:8080 --user alice --token "$TOKEN"
//!
//! # Explicit real-time endpoint
//! showroom --api http://localhost:8080 --realtime ws://localhost:8081/ws \
//!     --user alice --token "$TOKEN"
//! ```
//!
//! Type `/open <room>` to enter a room, then plain text to send. Other
//! commands: `/send <room> <text>`, `/read <room>`, `/rooms`, `/close`,
//! `/login <user> <token>`, `/logout`, `/quit`.

mod command;
mod render;

use std::{io::Write, sync::Arc, time::Duration};

use clap::Parser;
use showroom_client::{
    AuthChange, ChatConfig, ChatError, ChatHandle, HttpChatApi, Runtime, StaticAuth, SystemEnv,
    WsConnector,
};
use showroom_proto::{BearerToken, UserId};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    command::{Command, ParseError},
    render::{Renderer, room_list},
};

/// Showroom chat client
#[derive(Parser, Debug)]
#[command(name = "showroom")]
#[command(about = "Terminal client for Showroom real-time chat")]
#[command(version)]
struct Args {
    /// REST API base URL
    #[arg(long, default_value = "http://localhost:8080")]
    api: String,

    /// Real-time endpoint; discovered from the API when omitted
    #[arg(long)]
    realtime: Option<String>,

    /// User to sign in as
    #[arg(short, long)]
    user: Option<String>,

    /// Bearer token for the user
    #[arg(short, long, env = "SHOWROOM_TOKEN")]
    token: Option<String>,

    /// Send acknowledgement timeout in seconds
    #[arg(long, default_value = "10")]
    ack_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    // stdout belongs to the chat transcript
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let mut config = ChatConfig {
        api_base_url: args.api.clone(),
        realtime_url: args.realtime,
        ..ChatConfig::default()
    };
    config.sync.ack_timeout = Duration::from_secs(args.ack_timeout);

    let auth = Arc::new(match (args.user, args.token) {
        (Some(user), Some(token)) => {
            StaticAuth::signed_in(UserId::from(user.as_str()), BearerToken::new(token))
        },
        _ => {
            tracing::warn!("no credentials given, use /login <user> <token>");
            StaticAuth::signed_out()
        },
    });

    let api = Arc::new(HttpChatApi::new(config.api_base_url.clone()));
    let (runtime, handle) =
        Runtime::new(SystemEnv, &config, api, Arc::new(WsConnector), auth.clone());
    let runtime = tokio::spawn(runtime.run());
    let printer = tokio::spawn(print_changes(handle.clone()));

    tracing::info!(api = %config.api_base_url, "showroom client started");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match Command::parse(&line) {
                    Ok(Command::Quit) => break,
                    Ok(command) => execute(&handle, &auth, command)?,
                    Err(ParseError::Empty) => {},
                    Err(error) => emit(&[error.to_string()])?,
                }
            },
        }
    }

    handle.shutdown()?;
    runtime.await?;
    printer.abort();
    Ok(())
}

fn execute(handle: &ChatHandle, auth: &StaticAuth, command: Command) -> Result<(), ChatError> {
    match command {
        Command::Open(room_id) => handle.open_room(room_id),
        Command::Close => handle.close_room(),
        Command::Read(room_id) => handle.mark_read(room_id),
        Command::Send { room_id: Some(room_id), body } => handle.send_message(room_id, body),
        Command::Send { room_id: None, body } => match handle.snapshot().active_room {
            Some(room_id) => handle.send_message(room_id, body),
            None => {
                report(&["* no open room, use /open <room> first".to_owned()]);
                Ok(())
            },
        },
        Command::Rooms => {
            report(&room_list(&handle.snapshot()));
            Ok(())
        },
        Command::Login(user, token) => {
            auth.publish(AuthChange::SignedIn { user, token: Some(token) });
            Ok(())
        },
        Command::Logout => {
            auth.publish(AuthChange::SignedOut);
            Ok(())
        },
        Command::Quit => handle.shutdown(),
    }
}

async fn print_changes(handle: ChatHandle) {
    let mut snapshots = handle.snapshots();
    let mut renderer = Renderer::default();
    loop {
        let lines = renderer.update(&snapshots.borrow_and_update());
        report(&lines);
        if snapshots.changed().await.is_err() {
            return;
        }
    }
}

fn report(lines: &[String]) {
    if let Err(error) = emit(lines) {
        tracing::warn!(%error, "terminal write failed");
    }
}

fn emit(lines: &[String]) -> std::io::Result<()> {
    let mut out = std::io::stdout().lock();
    for line in lines {
        writeln!(out, "{line}")?;
    }
    out.flush()
}
