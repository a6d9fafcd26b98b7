//! authline - command-line shell for the authline session engine.
//!
//! Logs a user in against the configured auth service, keeps the session
//! persisted between runs and issues authenticated requests with it.

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::sync::broadcast;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use authline_core::auth::{
    bind_bearer_token, FileTokenStorage, KeyringTokenStorage, MemoryTokenStorage, PermissionSet, TokenStorage,
};
use authline_core::config::StorageBackend;
use authline_core::{AuthApi, AuthState, Config, HttpClient, RequestEvent, SessionEvent, SessionManager};

/// Environment variable overriding the configured base URL
const BASE_URL_ENV: &str = "AUTHLINE_BASE_URL";

const USAGE: &str = "\
Usage: authline <command>

Commands:
  login [username]   Log in (prompts for the password)
  status             Show the current session
  logout             End the session
  get <path>         GET a path with the session's bearer token
  watch              Keep the session alive until Ctrl-C";

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

/// Collaborators shared by every command
struct Shell {
    config: Config,
    storage: Arc<dyn TokenStorage>,
    manager: SessionManager,
}

impl Shell {
    fn new() -> Result<Self> {
        let mut config = Config::load_or_init()?;
        if let Ok(base_url) = std::env::var(BASE_URL_ENV) {
            debug!(%base_url, "Base URL overridden from environment");
            config.base_url = base_url;
        }

        let storage: Arc<dyn TokenStorage> = match config.storage {
            StorageBackend::File => Arc::new(FileTokenStorage::new(config.cache_dir()?)),
            StorageBackend::Keyring => Arc::new(KeyringTokenStorage::new()?),
            StorageBackend::Memory => Arc::new(MemoryTokenStorage::new()),
        };

        let manager = SessionManager::builder()
            .auth_api(AuthApi::new(HttpClient::from_config(&config)?))
            .storage(storage.clone())
            .permissions(Arc::new(PermissionSet::new()))
            .build();

        Ok(Self {
            config,
            storage,
            manager,
        })
    }

    /// Drive the manager until no authentication attempt is outstanding
    async fn settle(&mut self) {
        while self.manager.state().is_busy() {
            self.manager.next_completion().await;
        }
    }

    async fn resume(&mut self) -> AuthState {
        self.manager.try_auto_login();
        self.settle().await;
        self.manager.state()
    }

    async fn require_session(&mut self) -> Result<()> {
        if self.resume().await != AuthState::Authenticated {
            bail!("Not logged in. Run `authline login` first.");
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };

    let mut shell = Shell::new()?;
    info!(command = %command, base_url = %shell.config.base_url, "authline starting");

    match (command.as_str(), args.get(1)) {
        ("login", username) => login(&mut shell, username.cloned()).await,
        ("status", None) => status(&mut shell).await,
        ("logout", None) => logout(&mut shell).await,
        ("get", Some(path)) => get(&mut shell, path).await,
        ("watch", None) => watch(&mut shell).await,
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    }
}

fn prompt(label: &str) -> Result<String> {
    eprint!("{label}");
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

async fn login(shell: &mut Shell, username: Option<String>) -> Result<()> {
    if shell.resume().await == AuthState::Authenticated {
        println!("Already logged in as {}", shell.manager.username().unwrap_or_default());
        return Ok(());
    }

    let username = match username {
        Some(username) => username,
        None => prompt("Username: ")?,
    };
    let password = rpassword::prompt_password("Password: ")?;

    shell.manager.login(&username, &password);
    shell.settle().await;

    match shell.manager.state() {
        AuthState::Authenticated => {
            let user = shell.manager.user().map(|u| u.name().to_string()).unwrap_or_default();
            println!("Logged in as {user}");
            Ok(())
        }
        _ => bail!(
            "Login failed: {}",
            shell.manager.error_message().unwrap_or("unknown error")
        ),
    }
}

async fn status(shell: &mut Shell) -> Result<()> {
    if shell.resume().await != AuthState::Authenticated {
        println!("Not logged in");
        return Ok(());
    }

    let Some(user) = shell.manager.user() else {
        bail!("Session has no user profile");
    };
    println!("Logged in as {} ({})", user.name(), user.username);
    if !user.email.is_empty() {
        println!("Email:       {}", user.email);
    }
    if !user.roles.is_empty() {
        println!("Roles:       {}", user.roles.join(", "));
    }
    if let Some(expires_at) = shell.storage.load_expires_at() {
        println!("Token valid: until {}", expires_at.to_rfc3339());
    }
    Ok(())
}

async fn logout(shell: &mut Shell) -> Result<()> {
    if shell.resume().await != AuthState::Authenticated {
        shell.storage.clear_all();
        println!("Not logged in");
        return Ok(());
    }

    shell.manager.logout();

    // Give the remote logout a chance to complete before the process exits
    let timeout = Duration::from_secs(shell.config.request_timeout_secs);
    let _ = tokio::time::timeout(timeout, shell.manager.next_completion()).await;

    println!("Logged out");
    Ok(())
}

async fn get(shell: &mut Shell, path: &str) -> Result<()> {
    let data = HttpClient::from_config(&shell.config)?;
    let _binding = bind_bearer_token(data.clone(), shell.manager.subscribe());

    shell.require_session().await?;
    if let Some(token) = shell.manager.access_token() {
        data.set_bearer_token(token);
    }

    let mut handle = data.get(path);
    while let Some(event) = handle.next_event().await {
        match event {
            RequestEvent::Attempt(attempt) if attempt > 1 => eprintln!("Retrying (attempt {attempt})..."),
            RequestEvent::Attempt(_) => {}
            RequestEvent::Finished(reply) => {
                println!("{}", reply.text());
                return Ok(());
            }
            RequestEvent::Failed(e) => bail!("Request failed: {e}"),
        }
    }
    bail!("Request was cancelled")
}

async fn watch(shell: &mut Shell) -> Result<()> {
    let mut events = shell.manager.subscribe();
    shell.require_session().await?;
    // Drop the events raised while resuming
    while events.try_recv().is_ok() {}

    println!(
        "Session active for {}. Press Ctrl-C to stop.",
        shell.manager.username().unwrap_or_default()
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = shell.manager.next_completion() => {}
            event = events.recv() => match event {
                Ok(SessionEvent::BearerTokenChanged(Some(_))) => println!("Token refreshed"),
                Ok(SessionEvent::SessionExpired) => bail!("Session expired. Run `authline login` again."),
                Ok(SessionEvent::StateChanged(state)) => println!("State: {state}"),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}
