//! Poyo login for Galactica Linux.
//!
//! Binds a TTY (or uses the current stdio), authenticates against the
//! shadow database with a fixed-cost failure delay, then drops
//! privileges and execs the user's login shell in place.

mod auth;
mod error;
mod session;
mod tty;

use auth::AuthLog;
use clap::Parser;
use nix::sys::resource::{setrlimit, Resource};
use nix::sys::signal::{signal, SigHandler, Signal};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

const MAX_ATTEMPTS: u32 = 3;

#[derive(Parser)]
#[command(name = "poyo", about = "Secure getty/login for Galactica Linux", version)]
struct Cli {
    /// TTY device to bind (e.g. /dev/tty1); without it the current
    /// stdio is used
    tty: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    harden();

    let mut log = AuthLog::open();

    if !nix::unistd::Uid::effective().is_root() {
        eprintln!("Error: Poyo must be run as root");
        log.err("poyo started without root privileges".to_string());
        std::process::exit(1);
    }

    if let Some(device) = &cli.tty {
        if let Err(e) = tty::bind(device) {
            log.err(format!("{}", e));
            std::process::exit(1);
        }
    }

    let tty_line = tty::current_tty_line().unwrap_or_else(|| "console".to_string());
    let hostname = hostname();

    let mut attempts = 0u32;
    while attempts < MAX_ATTEMPTS {
        banner();
        print!("{} login: ", hostname);
        let _ = std::io::stdout().flush();

        let username = match read_line() {
            // EOF: the terminal went away; exit cleanly, init respawns us.
            None => std::process::exit(0),
            Some(line) => line.trim().to_string(),
        };
        if username.is_empty() {
            continue;
        }
        if !auth::valid_username(&username) {
            println!("Invalid username");
            log.warning(format!("invalid username format on {}", tty_line));
            std::thread::sleep(Duration::from_secs(3));
            attempts += 1;
            continue;
        }

        print!("Password: ");
        let _ = std::io::stdout().flush();
        let mut password = match tty::read_password() {
            Ok(p) => p,
            Err(e) => {
                eprintln!("Error reading password: {}", e);
                attempts += 1;
                continue;
            }
        };

        let authenticated = auth::authenticate(&username, &password, &tty_line, &mut log);
        auth::wipe(&mut password);

        if authenticated {
            start_session(&username, &tty_line, &mut log);
            // start_session only returns on a fatal setup error.
            std::process::exit(1);
        }

        println!("Login incorrect\n");
        attempts += 1;
        // Progressive delay on top of the fixed authentication cost.
        std::thread::sleep(Duration::from_secs(3 * attempts as u64));
    }

    println!("\nToo many failed login attempts.");
    log.warning(format!("too many failed login attempts on {}", tty_line));
    std::process::exit(1);
}

/// Environment, session accounting, privilege drop and shell exec, in
/// that order. Returns only on error.
fn start_session(username: &str, tty_line: &str, log: &mut AuthLog) {
    let user = match session::lookup_user(username) {
        Ok(Some(user)) => user,
        Ok(None) => {
            eprintln!("Error: could not get user information");
            log.err(format!("no passwd entry for authenticated user {}", username));
            return;
        }
        Err(e) => {
            eprintln!("Error: could not get user information");
            log.err(format!("passwd lookup failed for {}: {}", username, e));
            return;
        }
    };

    let env = session::build_environment(&user, tty_line);
    session::apply_environment(&env);
    session::record_session(username, tty_line);
    log.info(format!("session started for {} on {}", username, tty_line));

    match session::launch(&user) {
        Ok(never) => match never {},
        Err(e) => {
            eprintln!("Error: {}", e);
            log.err(format!("session launch failed for {}: {}", username, e));
        }
    }
}

/// Core dumps off, interactive signals ignored.
fn harden() {
    let _ = setrlimit(Resource::RLIMIT_CORE, 0, 0);
    for sig in [Signal::SIGINT, Signal::SIGQUIT, Signal::SIGTSTP, Signal::SIGHUP] {
        unsafe {
            let _ = signal(sig, SigHandler::SigIgn);
        }
    }
}

fn hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "galactica".to_string())
}

fn banner() {
    // Clear screen, home cursor, pink banner.
    print!("\x1b[2J\x1b[H\x1b[38;5;213m");
    println!();
    println!(r"  ________       .__                 __  .__               ");
    println!(r" /  _____/_____  |  | _____    _____/  |_|__| ____ _____   ");
    println!(r"/   \  ___\__  \ |  | \__  \ _/ ___\   __\  |/ ___\\__  \  ");
    println!(r"\    \_\  \/ __ \|  |__/ __ \\  \___|  | |  \  \___ / __ \_");
    println!(r" \______  (____  /____(____  /\___  >__| |__|\___  >____  /");
    println!(r"        \/     \/          \/     \/             \/     \/ ");
    print!("\x1b[0m");
    println!();
    println!("            Galactica Linux v0.1.0");
    println!("                Poyo Login v{}", env!("CARGO_PKG_VERSION"));
    println!();
}

/// Read one line from stdin; None means EOF.
fn read_line() -> Option<String> {
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(0) => None,
        Ok(_) => Some(line),
        Err(_) => Some(String::new()),
    }
}
