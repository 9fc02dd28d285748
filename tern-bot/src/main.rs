//! tern-bot — Showcase bot built with tern.
//!
//! # Setup
//! 1. Set SERVER_ADDR, BOT_ID and PASSWORD below.
//! 2. `cargo run -p tern-bot`

use std::io::{BufRead, Write as _};
use std::sync::Arc;

use tern::{Bot, BotConfig, Deferred, LoginResult, VerifySolver};

// ── Fill in your credentials ──────────────────────────────────────────────────
const SERVER_ADDR: &str = "127.0.0.1:8080";
const BOT_ID: u64 = 0;
const PASSWORD: &str = "";
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    if std::env::var("RUST_LOG").is_err() {
        unsafe {
            std::env::set_var("RUST_LOG", "tern_client=info,tern_bot=info");
        }
    }
    env_logger::init();
    if let Err(e) = run().await {
        eprintln!("✗ {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    if BOT_ID == 0 || PASSWORD.is_empty() {
        eprintln!("Set SERVER_ADDR, BOT_ID and PASSWORD at the top of src/main.rs");
        std::process::exit(1);
    }

    println!("🔌 Connecting to {SERVER_ADDR}…");
    let bot = Bot::connect(BotConfig {
        server_addr: SERVER_ADDR.to_string(),
        bot_id: BOT_ID,
        password: PASSWORD.to_string(),
        solver: Some(Arc::new(StdinSolver)),
        ..Default::default()
    })
    .await?;

    match bot.login().await? {
        LoginResult::Success { session_id } => {
            println!("✅ Logged in (session {session_id})");
        }
        LoginResult::WrongPassword => {
            eprintln!("Wrong password");
            std::process::exit(1);
        }
        other => {
            eprintln!("Login did not complete: {other:?}");
            std::process::exit(1);
        }
    }

    // Exercise the directory once so the caches are warm.
    match bot.add_friend(10001, Deferred::lazy(|| greeting()), Deferred::from("met via tern-bot")).await {
        Ok(result) => println!("add_friend(10001) → {result:?}"),
        Err(e) => println!("add_friend(10001) failed: {e}"),
    }

    println!("👂 Listening for pushes… (Ctrl+C to quit)\n");
    let mut events = bot.stream_events();
    while let Some(event) = events.next().await {
        println!(
            "#{} push {:#06x}: {} bytes",
            event.arrival,
            event.command,
            event.payload.len()
        );
    }

    println!("Connection closed.");
    Ok(())
}

fn greeting() -> String {
    format!("Hi! I'm bot {BOT_ID}, running tern {}.", env!("CARGO_PKG_VERSION"))
}

/// Answers login challenges from the terminal.
struct StdinSolver;

impl VerifySolver for StdinSolver {
    fn solve_captcha(&self, image: &[u8]) -> Option<String> {
        println!("Captcha required ({} image bytes). Enter the text:", image.len());
        prompt()
    }

    fn solve_device_lock(&self, url: &str) -> Option<String> {
        println!("Device verification required. Visit {url} and enter the code:");
        prompt()
    }
}

fn prompt() -> Option<String> {
    print!("> ");
    std::io::stdout().flush().ok()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line).ok()?;
    let answer = line.trim();
    if answer.is_empty() { None } else { Some(answer.to_string()) }
}
