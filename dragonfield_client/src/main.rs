//! Headless client binary.
//!
//! Usage:
//!   cargo run -p dragonfield_client --bin client -- [--url ws://127.0.0.1:3000/ws]
//!       [--http http://127.0.0.1:3000] [--name Player] [--config client.json] [--spectate]
//!
//! Joins the world without a renderer and logs what happens.
//!
//! Console commands:
//!   mode <customize|play|spectate> - Switch mode
//!   face <n>                       - Pick a face (applies on the next connect)
//!   shoot                          - Fire (1.5 s cooldown)
//!   farm                           - Plant, water or harvest the plot in reach
//!   buy <item>                     - Buy from the shop when in reach
//!   spawn                          - Summon the dragon at the obelisk
//!   scores                         - Request the scoreboard
//!   status                         - Show client status
//!   quit                           - Exit client

use std::env;
use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::Context;
use dragonfield_client::{http::HttpBackend, mode::Mode, view::Frame, Command, GameClient};
use dragonfield_shared::config::ClientConfig;
use tokio::sync::mpsc;
use tracing::{debug, info};

#[derive(Default)]
struct Args {
    config: Option<PathBuf>,
    url: Option<String>,
    http: Option<String>,
    name: Option<String>,
    spectate: bool,
}

fn parse_args() -> Args {
    let mut out = Args::default();
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" if i + 1 < args.len() => {
                out.config = Some(PathBuf::from(&args[i + 1]));
                i += 2;
            }
            "--url" if i + 1 < args.len() => {
                out.url = Some(args[i + 1].clone());
                i += 2;
            }
            "--http" if i + 1 < args.len() => {
                out.http = Some(args[i + 1].clone());
                i += 2;
            }
            "--name" if i + 1 < args.len() => {
                out.name = Some(args[i + 1].clone());
                i += 2;
            }
            "--spectate" => {
                out.spectate = true;
                i += 1;
            }
            _ => i += 1,
        }
    }
    out
}

fn load_config(args: Args) -> anyhow::Result<ClientConfig> {
    let mut cfg = match &args.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    };
    if let Some(url) = args.url {
        cfg.server_url = url;
    }
    if let Some(http) = args.http {
        cfg.http_base = http;
    }
    if let Some(name) = args.name {
        cfg.username = name;
    }
    cfg.spectate |= args.spectate;
    Ok(cfg)
}

/// Returns false when the client should exit.
fn exec_console(client: &mut GameClient<HttpBackend>, line: &str) -> bool {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some(&cmd) = tokens.first() else {
        return true;
    };
    match cmd {
        "mode" => match tokens.get(1).and_then(|m| Mode::parse(m)) {
            Some(mode) => client.set_mode(mode),
            None => println!("Usage: mode <customize|play|spectate>"),
        },
        "face" => match tokens.get(1).and_then(|n| n.parse::<u32>().ok()) {
            Some(face_index) => {
                let mut identity = client.core().session().identity().clone();
                identity.face_index = face_index;
                client.set_identity(identity);
            }
            None => println!("Usage: face <n>"),
        },
        "shoot" => client.command(Command::Shoot),
        "farm" => client.command(Command::Farm),
        "buy" => match tokens.get(1) {
            Some(item) => client.command(Command::Buy((*item).to_string())),
            None => println!("Usage: buy <item>"),
        },
        "spawn" => client.command(Command::SummonBoss),
        "scores" => client.command(Command::RequestScores),
        "status" => {
            for line in client.core().status_lines() {
                println!("{line}");
            }
        }
        "quit" | "exit" => return false,
        other => println!("Unknown command: {other}"),
    }
    true
}

#[derive(Default)]
struct Reporter {
    toast: Option<String>,
    update_required: bool,
    scores_len: usize,
}

impl Reporter {
    fn frame(&mut self, frame: &Frame) {
        for event in &frame.events {
            debug!(?event, "Render event");
        }
        if frame.ui.toast != self.toast {
            if let Some(msg) = &frame.ui.toast {
                println!("! {msg}");
            }
            self.toast.clone_from(&frame.ui.toast);
        }
        if frame.ui.update_required && !self.update_required {
            println!("A new version is available. Please reload the client.");
            self.update_required = true;
        }
        if frame.ui.scores.len() != self.scores_len {
            self.scores_len = frame.ui.scores.len();
            for s in &frame.ui.scores {
                let name = s
                    .username
                    .as_deref()
                    .or(s.first_name.as_deref())
                    .unwrap_or("Player");
                println!("{name:<16} kills {:>3}  deaths {:>3}", s.dragon_kills, s.deaths);
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = load_config(parse_args()).context("load config")?;
    info!(server = %cfg.server_url, http = %cfg.http_base, "Starting client");

    let backend = HttpBackend::new(cfg.http_base.clone())?;
    let start = if cfg.spectate {
        Mode::Spectating
    } else {
        Mode::Playing
    };
    let mut client = GameClient::new(cfg, backend).context("create client")?;
    client.set_mode(start);

    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Type 'status' for info, 'quit' to exit.");

    let mut reporter = Reporter::default();
    loop {
        tokio::select! {
            line = console_rx.recv() => match line {
                Some(line) => {
                    if !exec_console(&mut client, &line) {
                        break;
                    }
                }
                None => break,
            },
            frame = client.run_frame() => {
                if let Some(frame) = frame {
                    reporter.frame(&frame);
                }
            }
        }
    }

    client.set_mode(Mode::Customization);
    info!("Client stopped");
    Ok(())
}
