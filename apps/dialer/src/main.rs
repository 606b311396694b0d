use std::{
    io::{self, Write},
    sync::Arc,
    thread,
};

use anyhow::Result;
use call_transport::{CallTransport, RelayTransport};
use clap::Parser;
use client_core::{
    format_duration, AuthClient, AuthError, BillingClient, CallController, CallError, CallSnapshot,
    CallStatus, EndReason, SessionEvent, SessionProvider, TokenStore, CREDIT_PACKAGES,
};
use crossterm::{
    cursor,
    event::{Event, KeyEvent, KeyEventKind},
    execute,
    style::Print,
    terminal::{self, ClearType},
};
use shared::domain::{User, COUNTRY_CODES};
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

mod config;
mod keymap;

use keymap::DialerAction;

#[derive(Parser, Debug)]
struct Args {
    /// Backend base URL; overrides bleepo.toml and BLEEPO_SERVER_URL.
    #[arg(long)]
    server_url: Option<String>,
    /// Email to sign in with; prompted when omitted.
    #[arg(long)]
    email: Option<String>,
    /// Create a new account instead of signing in.
    #[arg(long)]
    register: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("BLEEPO_LOG").unwrap_or_else(|_| "warn".to_string()))
        .init();
    let args = Args::parse();

    let mut settings = config::load_settings();
    if let Some(server_url) = args.server_url.clone() {
        settings.server_url = server_url;
    }

    let store = match &settings.session_file {
        Some(path) => TokenStore::at_path(path.clone()),
        None => TokenStore::for_app()?,
    };
    let auth = Arc::new(AuthClient::new(&settings.server_url, store));
    let billing = BillingClient::new(&settings.server_url);
    let transport = Arc::new(RelayTransport::new(&settings.server_url));

    let user = sign_in(&auth, &args).await?;
    println!("Signed in as {} ({} credits).", user.email, user.call_credits);
    if let Some(token) = auth.access_token().await {
        transport.set_bearer(token);
    }

    let controller = CallController::new(
        Arc::clone(&auth) as Arc<dyn SessionProvider>,
        Arc::clone(&transport) as Arc<dyn CallTransport>,
    );
    run_dial_pad(controller, auth, billing, user.call_credits).await
}

async fn sign_in(auth: &AuthClient, args: &Args) -> Result<User> {
    if !args.register {
        match auth.restore().await {
            Ok(Some(user)) => {
                println!("Resumed session for {}.", user.email);
                return Ok(user);
            }
            Ok(None) => {}
            Err(err) => warn!("session restore failed: {err}"),
        }
    }

    let email = match &args.email {
        Some(email) => email.clone(),
        None => prompt_line("email: ")?,
    };
    let password = prompt_line("password: ")?;
    let result = if args.register {
        auth.register(&email, &password).await
    } else {
        auth.login(&email, &password).await
    };
    result.map_err(|err| anyhow::anyhow!(describe_auth_failure(&err)))
}

fn prompt_line(prompt: &str) -> Result<String> {
    let mut stdout = io::stdout();
    stdout.write_all(prompt.as_bytes())?;
    stdout.flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// App-level rendering of the typed auth errors, in words a user can act on.
fn describe_auth_failure(err: &AuthError) -> String {
    match err {
        AuthError::InvalidCredentials => "Sign-in failed: wrong email or password.".to_string(),
        AuthError::AccountExists => {
            "An account with this email already exists; sign in instead.".to_string()
        }
        AuthError::SessionExpired => "Session expired; sign in again.".to_string(),
        AuthError::Network(detail) => {
            format!("Server unreachable; check the URL and your network. ({detail})")
        }
        AuthError::Api(message) => format!("Sign-in failed: {message}"),
    }
}

fn describe_call_failure(err: &CallError) -> String {
    match err {
        CallError::Unauthenticated => "Sign in before placing a call.".to_string(),
        CallError::InsufficientCredits { balance, minimum } => format!(
            "Not enough credits: {balance} left, a call needs at least {minimum}. Press B to buy more."
        ),
        CallError::TransportNotReady => {
            "Still connecting to the call service, try again.".to_string()
        }
        CallError::NoDestination => "Dial a number first.".to_string(),
        CallError::CallInProgress => "A call is already in progress.".to_string(),
        CallError::Rejected { reason } => format!("Call rejected: {reason}"),
        CallError::Transport(detail) => format!("Call service error: {detail}"),
        CallError::Network(detail) => format!("Network trouble: {detail}"),
    }
}

fn describe_call_end(reason: &EndReason, snapshot: &CallSnapshot) -> String {
    let duration = format_duration(snapshot.elapsed_secs);
    match reason {
        EndReason::LocalHangup => format!("Call ended after {duration}."),
        EndReason::RemoteHangup {
            reason: Some(reason),
        } => format!("Call ended by the far side after {duration}: {reason}"),
        EndReason::RemoteHangup { reason: None } => {
            format!("Call ended by the far side after {duration}.")
        }
        EndReason::Failed(err) => {
            format!("Call dropped after {duration}: {}", describe_call_failure(err))
        }
    }
}

struct UiState {
    balance: i64,
    package_index: usize,
}

fn status_line(snapshot: &CallSnapshot, ui: &UiState) -> String {
    match snapshot.status {
        CallStatus::Idle => {
            let package = CREDIT_PACKAGES[ui.package_index];
            format!(
                "dial> [{}] {} {}_   credits: {}   package: ${}/{}min",
                snapshot.country_code.label,
                snapshot.country_code.prefix,
                snapshot.digits,
                ui.balance,
                package.price_usd,
                package.minutes
            )
        }
        CallStatus::Dialing => format!("dialing {} ...", snapshot.destination()),
        CallStatus::Connected => {
            let mut line = format!(
                "on call {}  {}",
                snapshot.destination(),
                format_duration(snapshot.elapsed_secs)
            );
            if snapshot.muted {
                line.push_str("  [muted]");
            }
            if snapshot.speaker_on {
                line.push_str("  [speaker]");
            }
            line
        }
        CallStatus::Ended => "call ended".to_string(),
    }
}

fn draw_status(stdout: &mut io::Stdout, snapshot: &CallSnapshot, ui: &UiState) -> Result<()> {
    execute!(
        stdout,
        cursor::MoveToColumn(0),
        terminal::Clear(ClearType::CurrentLine),
        Print(status_line(snapshot, ui)),
    )?;
    Ok(())
}

/// Print a line above the status line, which the caller then redraws.
fn show_message(stdout: &mut io::Stdout, message: &str) -> Result<()> {
    execute!(
        stdout,
        cursor::MoveToColumn(0),
        terminal::Clear(ClearType::CurrentLine),
        Print(message),
        Print("\r\n"),
    )?;
    Ok(())
}

fn print_help() {
    println!("Keys: 0-9 * # dial, Backspace delete, Enter call, h or Esc hang up,");
    println!("      m mute, s speaker, Left/Right country, b package, B checkout,");
    println!("      r refresh credits, q quit.");
}

struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

/// Blocking crossterm reads happen on their own thread; the async loop
/// consumes key presses from a channel.
fn spawn_key_reader() -> mpsc::UnboundedReceiver<KeyEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    thread::spawn(move || loop {
        match crossterm::event::read() {
            Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => {
                if tx.send(key).is_err() {
                    break;
                }
            }
            Ok(_) => {}
            Err(_) => break,
        }
    });
    rx
}

fn spawn_balance_refresh(auth: &Arc<AuthClient>, tx: &mpsc::UnboundedSender<i64>) {
    let auth = Arc::clone(auth);
    let tx = tx.clone();
    tokio::spawn(async move {
        match auth.verify().await {
            Ok(user) => {
                let _ = tx.send(user.call_credits);
            }
            Err(err) => warn!("balance refresh failed: {err}"),
        }
    });
}

async fn cycle_country(controller: &Arc<CallController>, step: isize) {
    let current = controller.snapshot().await.country_code;
    let position = COUNTRY_CODES
        .iter()
        .position(|code| *code == current)
        .unwrap_or(0);
    let count = COUNTRY_CODES.len() as isize;
    let next = (position as isize + step).rem_euclid(count) as usize;
    controller.set_country_code(COUNTRY_CODES[next]).await;
}

async fn run_dial_pad(
    controller: Arc<CallController>,
    auth: Arc<AuthClient>,
    billing: BillingClient,
    starting_balance: i64,
) -> Result<()> {
    print_help();
    let _raw = RawModeGuard::enable()?;
    let mut stdout = io::stdout();
    let mut keys = spawn_key_reader();
    let mut events = controller.subscribe_events();
    let (balance_tx, mut balance_rx) = mpsc::unbounded_channel::<i64>();
    let mut ui = UiState {
        balance: starting_balance,
        package_index: 0,
    };

    draw_status(&mut stdout, &controller.snapshot().await, &ui)?;
    loop {
        tokio::select! {
            Some(key) = keys.recv() => {
                let Some(action) = keymap::map_key(&key) else { continue };
                match action {
                    DialerAction::Quit => break,
                    DialerAction::Digit(digit) => controller.press_digit(digit).await,
                    DialerAction::DeleteDigit => controller.delete_digit().await,
                    DialerAction::PlaceCall => {
                        if let Err(err) = controller.place_call().await {
                            show_message(&mut stdout, &describe_call_failure(&err))?;
                        }
                    }
                    DialerAction::HangUp => controller.hang_up().await,
                    DialerAction::ToggleMute => controller.toggle_mute().await,
                    DialerAction::ToggleSpeaker => controller.toggle_speaker().await,
                    DialerAction::PrevCountry => cycle_country(&controller, -1).await,
                    DialerAction::NextCountry => cycle_country(&controller, 1).await,
                    DialerAction::NextPackage => {
                        ui.package_index = (ui.package_index + 1) % CREDIT_PACKAGES.len();
                    }
                    DialerAction::Checkout => {
                        let package = CREDIT_PACKAGES[ui.package_index];
                        match auth.access_token().await {
                            Some(token) => match billing.create_checkout(&token, package).await {
                                Ok(url) => show_message(&mut stdout, &format!("Open to pay: {url}"))?,
                                Err(err) => {
                                    show_message(&mut stdout, &format!("Checkout failed: {err}"))?
                                }
                            },
                            None => show_message(&mut stdout, "Sign in before buying credits.")?,
                        }
                    }
                    DialerAction::RefreshBalance => spawn_balance_refresh(&auth, &balance_tx),
                }
                draw_status(&mut stdout, &controller.snapshot().await, &ui)?;
            }
            event = events.recv() => {
                match event {
                    Ok(SessionEvent::StateChanged(snapshot)) => {
                        draw_status(&mut stdout, &snapshot, &ui)?;
                    }
                    Ok(SessionEvent::DurationTick(_)) => {
                        draw_status(&mut stdout, &controller.snapshot().await, &ui)?;
                    }
                    Ok(SessionEvent::CallFailed(err)) => {
                        show_message(&mut stdout, &describe_call_failure(&err))?;
                    }
                    Ok(SessionEvent::CallEnded { reason, snapshot }) => {
                        show_message(&mut stdout, &describe_call_end(&reason, &snapshot))?;
                        // Credits are spent server-side; re-read the balance.
                        spawn_balance_refresh(&auth, &balance_tx);
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        draw_status(&mut stdout, &controller.snapshot().await, &ui)?;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            Some(balance) = balance_rx.recv() => {
                ui.balance = balance;
                draw_status(&mut stdout, &controller.snapshot().await, &ui)?;
            }
        }
    }

    controller.shutdown().await;
    execute!(stdout, Print("\r\n"))?;
    Ok(())
}
