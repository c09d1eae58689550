//! holysheet: terminal client for the HolySheet assistant.
//! Keeps a reconnecting WebSocket to the server, sends chat lines from stdin
//! and prints answers. `--ask` sends one question and prints the first answer.

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::Parser;
use holysheet_client::config::{self, Config};
use holysheet_client::{Client, ClientEvent, ConnectionStatus, QUICK_ACTIONS};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "holysheet", version, about = "Chat with your spreadsheet data")]
struct Args {
    /// Config file (default: $HOLYSHEET_CONFIG or ~/.holysheet/config.yaml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Server origin, e.g. https://holysheet.example.com
    #[arg(long)]
    origin: Option<String>,

    /// Send one question, print the first answer and exit
    #[arg(long)]
    ask: Option<String>,

    /// Sheet URL or id to load before asking
    #[arg(long)]
    dataset: Option<String>,

    /// Seconds to wait for a connection and an answer in --ask mode
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,
}

fn load_config(args: &Args) -> Config {
    // 1. --config <path>, 2. HOLYSHEET_CONFIG; both must exist.
    let explicit = args
        .config
        .clone()
        .or_else(|| std::env::var_os("HOLYSHEET_CONFIG").map(PathBuf::from));
    if let Some(path) = explicit {
        return config::load(&path).unwrap_or_else(|e| {
            eprintln!("Error: failed to load config from {}: {}", path.display(), e);
            process::exit(1);
        });
    }
    // 3. Default path, optional.
    match config::default_config_path() {
        Some(path) if path.exists() => config::load(&path).unwrap_or_else(|e| {
            eprintln!("Error: failed to load config from {}: {}", path.display(), e);
            process::exit(1);
        }),
        _ => Config::default(),
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut cfg = load_config(&args);
    if let Some(origin) = &args.origin {
        cfg.server.origin = origin.clone();
    }

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|e| {
            eprintln!("Error: failed to create runtime: {}", e);
            process::exit(1);
        });

    rt.block_on(async {
        let (client, events) = match Client::from_config(&cfg) {
            Ok(pair) => pair,
            Err(e) => {
                eprintln!("Error: {}", e);
                process::exit(1);
            }
        };
        client.connect();

        let code = match &args.ask {
            Some(question) => {
                let timeout = Duration::from_secs(args.timeout_secs);
                ask_once(&client, events, question, args.dataset.as_deref(), timeout).await
            }
            None => {
                interactive(&client, events, args.dataset.as_deref()).await;
                0
            }
        };
        client.stop();
        process::exit(code);
    });
}

async fn wait_connected(events: &mut UnboundedReceiver<ClientEvent>) -> bool {
    while let Some(event) = events.recv().await {
        if event == ClientEvent::Status(ConnectionStatus::Connected) {
            return true;
        }
    }
    false
}

async fn ask_once(
    client: &Client,
    mut events: UnboundedReceiver<ClientEvent>,
    question: &str,
    dataset: Option<&str>,
    timeout: Duration,
) -> i32 {
    let connected = tokio::time::timeout(timeout, wait_connected(&mut events)).await;
    if !matches!(connected, Ok(true)) {
        eprintln!("Error: could not connect to {}", client.connection().endpoint());
        return 1;
    }

    if let Some(source) = dataset {
        if let Err(e) = client.load_dataset(source).await {
            eprintln!("Error: {}", e);
            return 1;
        }
    }

    if let Err(e) = client.send_chat(question) {
        eprintln!("Error: {}", e);
        return 1;
    }

    let answer = tokio::time::timeout(timeout, async {
        while let Some(event) = events.recv().await {
            match event {
                ClientEvent::ChatResponse(text) => return Ok(text),
                ClientEvent::RemoteError(message) => return Err(format!("Server error: {}", message)),
                _ => {}
            }
        }
        Err("connection closed".to_string())
    })
    .await;

    match answer {
        Ok(Ok(text)) => {
            println!("{}", text);
            0
        }
        Ok(Err(message)) => {
            eprintln!("{}", message);
            1
        }
        Err(_) => {
            eprintln!("Error: no answer within {}s", timeout.as_secs());
            1
        }
    }
}

fn print_help() {
    eprintln!("Type a message to chat. Commands:");
    eprintln!("  /load <sheet url or id>   load a sheet as chat context");
    for (key, _) in QUICK_ACTIONS {
        eprintln!("  /{:<24} quick action", key);
    }
    eprintln!("  /quit                     exit");
}

fn print_event(event: ClientEvent) {
    match event {
        ClientEvent::Status(status) => eprintln!("[{}]", status),
        ClientEvent::ChatSent(_) => {}
        ClientEvent::ChatResponse(text) => println!("assistant: {}", text),
        ClientEvent::DatasetReady(data) => {
            let rows = data.as_array().map(|rows| rows.len());
            match rows {
                Some(n) => eprintln!("Sheet loaded ({} rows)", n),
                None => eprintln!("Sheet loaded"),
            }
        }
        ClientEvent::RemoteError(message) => eprintln!("Server error: {}", message),
        ClientEvent::Error(e) => eprintln!("Error: {}", e),
    }
}

/// One line of REPL input.
#[derive(Debug, PartialEq, Eq)]
enum ReplInput<'a> {
    Empty,
    Quit,
    Help,
    Load(&'a str),
    QuickAction(&'a str),
    Chat(&'a str),
}

fn parse_input(line: &str) -> ReplInput<'_> {
    let input = line.trim();
    let Some(command) = input.strip_prefix('/') else {
        return if input.is_empty() {
            ReplInput::Empty
        } else {
            ReplInput::Chat(input)
        };
    };
    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };
    match name {
        "quit" | "exit" => ReplInput::Quit,
        "help" => ReplInput::Help,
        "load" => ReplInput::Load(arg),
        _ => ReplInput::QuickAction(command),
    }
}

async fn interactive(
    client: &Client,
    mut events: UnboundedReceiver<ClientEvent>,
    dataset: Option<&str>,
) {
    print_help();
    // Loaded once the first connection is up.
    let mut pending_dataset = dataset;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    let connected = event == ClientEvent::Status(ConnectionStatus::Connected);
                    print_event(event);
                    if connected {
                        if let Some(source) = pending_dataset.take() {
                            // Failures arrive as events.
                            let _ = client.load_dataset(source).await;
                        }
                    }
                }
                None => break,
            },
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        eprintln!("Error: failed to read stdin: {}", e);
                        break;
                    }
                };
                match parse_input(&line) {
                    ReplInput::Empty => {}
                    ReplInput::Quit => break,
                    ReplInput::Help => print_help(),
                    ReplInput::Load(source) => {
                        let _ = client.load_dataset(source).await;
                    }
                    ReplInput::QuickAction(action) => {
                        let _ = client.run_quick_action(action);
                    }
                    ReplInput::Chat(text) => {
                        let _ = client.send_chat(text);
                    }
                }
            }
        }
    }
}
