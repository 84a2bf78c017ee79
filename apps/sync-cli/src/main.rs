use std::sync::Arc;

use clap::Parser;
use game_sync::{
    GameRoomState, GameSession, HttpGameApi, SyncConfig, SyncError, SyncEvent,
    TungsteniteTransport,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

mod commands;
mod telemetry;

use commands::Command;

#[derive(Parser)]
#[command(name = "nommie-sync")]
#[command(about = "Follow a Nommie game live and play from the terminal")]
struct Args {
    /// Game to open
    #[arg(short, long)]
    game: i64,

    /// Bearer token for the backend API
    #[arg(long, env = "NOMMIE_TOKEN", hide_env_values = true)]
    token: String,

    /// Backend base URL; overrides NOMMIE_API_URL and moves the realtime endpoint with it
    #[arg(long)]
    api_url: Option<String>,

    /// Realtime endpoint; derived from the API URL when omitted
    #[arg(long)]
    ws_url: Option<String>,

    /// Emit JSON log lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    telemetry::init_tracing(args.json);

    let config = match SyncConfig::from_env().and_then(|base| apply_overrides(base, &args)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Invalid configuration: {e}");
            std::process::exit(2);
        }
    };

    let api = match HttpGameApi::new(&config, args.token) {
        Ok(api) => api,
        Err(e) => {
            eprintln!("❌ Failed to build HTTP client: {e}");
            std::process::exit(1);
        }
    };

    let session = GameSession::new(config, Arc::new(api), Arc::new(TungsteniteTransport));
    spawn_watchers(&session);

    match session.open_game(args.game).await {
        Ok(state) => print_state(&state),
        Err(e) => {
            error!(game_id = args.game, code = %e.code(), trace_id = ?e.trace_id(), "open failed: {e}");
            eprintln!("❌ Could not load game {}: {}", args.game, e.detail());
            std::process::exit(1);
        }
    }
    println!("{}", commands::HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "stdin read failed");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match commands::parse(&line) {
                    Ok(Command::Quit) => break,
                    Ok(command) => run(&session, command).await,
                    Err(message) => eprintln!("{message}"),
                }
            }
        }
    }

    session.close_game();
    session.disconnect();
    info!("bye");
}

/// Layer command-line URLs over the environment config. `--ws-url` wins over
/// the endpoint derived from `--api-url`.
fn apply_overrides(mut config: SyncConfig, args: &Args) -> Result<SyncConfig, SyncError> {
    if let Some(api) = &args.api_url {
        config = config.with_api_origin(api)?;
    }
    if let Some(ws) = &args.ws_url {
        config = config.with_ws_url(ws.clone());
    }
    Ok(config)
}

async fn run(session: &GameSession, command: Command) {
    let result = match command {
        Command::Bid(bid) => session.bid(bid).await.map(|_| ()),
        Command::Trump(trump) => session.select_trump(trump).await.map(|_| ()),
        Command::Play(card) => session.play(card).await.map(|_| ()),
        Command::Ready => session.toggle_ready().await.map(|_| ()),
        Command::Refresh => session.refresh().await.map(|outcome| {
            info!(outcome = ?outcome, "refreshed");
        }),
        Command::Show => {
            match session.state() {
                Some(state) => print_state(&state),
                None => println!("(no state loaded)"),
            }
            Ok(())
        }
        Command::Quit => Ok(()),
    };

    if let Err(e) = result {
        match e.trace_id() {
            Some(trace_id) => eprintln!("❌ {} (trace {trace_id})", e.detail()),
            None => eprintln!("❌ {}", e.detail()),
        }
    }
}

/// Log connection, state, error, slow-sync and event changes until the session goes away.
fn spawn_watchers(session: &GameSession) {
    let mut connection = session.watch_connection();
    tokio::spawn(async move {
        while connection.changed().await.is_ok() {
            let state = *connection.borrow_and_update();
            info!(state = state.as_str(), "connection");
        }
    });

    let mut states = session.watch_state();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let current = states.borrow_and_update().clone();
            if let Some(state) = current {
                print_state(&state);
            }
        }
    });

    let mut errors = session.watch_errors();
    tokio::spawn(async move {
        while errors.changed().await.is_ok() {
            let current = errors.borrow_and_update().clone();
            match current {
                Some(e) => warn!(source = ?e.source, trace_id = ?e.trace_id, "⚠️  {}", e.message),
                None => info!("errors cleared"),
            }
        }
    });

    let mut slow = session.slow_sync();
    tokio::spawn(async move {
        while slow.changed().await.is_ok() {
            if *slow.borrow_and_update() {
                info!("syncing is taking longer than usual");
            }
        }
    });

    let mut events = session.events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SyncEvent::YourTurn { game_id, version }) => {
                    println!("🔔 Your turn in game {game_id} (v{version})");
                }
                Ok(event) => info!(event = ?event, "sync event"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event stream lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn print_state(state: &GameRoomState) {
    let hand: Vec<String> = state.viewer_hand.iter().map(ToString::to_string).collect();
    println!(
        "game {} v{} [{}] phase={} round={} hand=[{}]",
        state.game_id,
        state.version,
        state.provenance.as_str(),
        state.snapshot.phase.name(),
        state.snapshot.game.round_no,
        hand.join(" ")
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let base = ["nommie-sync", "--game", "42", "--token", "t"];
        Args::parse_from(base.iter().chain(extra))
    }

    #[test]
    fn api_url_also_moves_the_socket() {
        let config = apply_overrides(
            SyncConfig::default(),
            &args(&["--api-url", "https://nommie.app"]),
        )
        .unwrap();
        assert_eq!(config.api_base_url, "https://nommie.app");
        assert_eq!(config.ws_url, "wss://nommie.app/ws");
    }

    #[test]
    fn explicit_ws_url_wins() {
        let config = apply_overrides(
            SyncConfig::default(),
            &args(&[
                "--api-url",
                "https://nommie.app",
                "--ws-url",
                "wss://rt.nommie.app/ws",
            ]),
        )
        .unwrap();
        assert_eq!(config.api_base_url, "https://nommie.app");
        assert_eq!(config.ws_url, "wss://rt.nommie.app/ws");
    }

    #[test]
    fn no_overrides_keeps_environment_config() {
        let base = SyncConfig::default().with_ws_url("ws://env.test/ws");
        let config = apply_overrides(base, &args(&[])).unwrap();
        assert_eq!(config.ws_url, "ws://env.test/ws");
    }

    #[test]
    fn bad_api_url_is_rejected() {
        assert!(apply_overrides(SyncConfig::default(), &args(&["--api-url", "nommie.app"])).is_err());
    }
}
