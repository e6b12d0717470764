mod commands;
mod navigator;
mod persist;

use crate::commands::CliHelper;
use crate::navigator::CliNavigator;
use crate::persist::CliPersistence;
use anyhow::anyhow;
use anyhow::Result;
use clap::Parser;
use commands::CommandResult;
use commands::{execute_command, wait_for_outcome, Commands};
use log::{error, info};
use rustyline::error::ReadlineError;
use rustyline::hint::HistoryHinter;
use rustyline::Editor;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use unihive_checkout::models::ConnectRequest;
use unihive_checkout::{
    connect, CheckoutEvent, Config, Environment, EventListener, Navigator, PaymentReconciler,
};

#[derive(Parser)]
#[command(version, about = "CLI client for the UniHive checkout flow", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the data directory
    #[arg(short, long, default_value = "./.data")]
    data_dir: String,

    /// Marketplace API base URL. Overrides config.json in the data directory.
    #[arg(short, long)]
    gateway_url: Option<String>,

    /// Page the shell starts on, used to resolve the history view
    #[arg(short, long, default_value = "http://localhost:5173/")]
    location: String,
}

fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        dirs::home_dir()
            .expect("Could not find home directory")
            .join(stripped)
    } else {
        PathBuf::from(path)
    }
}

/// Parse a command string into a Commands enum using clap
fn parse_command(input: &str) -> Result<Commands> {
    if input.trim() == "exit" || input.trim() == "quit" {
        return Ok(Commands::Exit {});
    }

    let mut args = vec!["unihive-cli".to_string()];
    args.extend(shlex::split(input).ok_or_else(|| anyhow!("Failed to parse command"))?);

    let cmd = Commands::try_parse_from(&args)?;
    Ok(cmd)
}

struct CliEventListener {}

impl EventListener for CliEventListener {
    fn on_event(&self, event: &CheckoutEvent) {
        info!("Event received: {:?}", event);
        match event {
            CheckoutEvent::Success { attempt } => {
                println!("\nPayment {} confirmed", attempt.reference)
            }
            CheckoutEvent::Error { message, .. } => println!("\nError: {message}"),
            CheckoutEvent::Warning { message, .. } => println!("\nWarning: {message}"),
        }
    }
}

fn load_config(cli: &Cli, persistence: &CliPersistence, data_dir: &Path) -> Result<Config> {
    let mut config = match persistence.load_config()? {
        Some(config) => config,
        None => Config::default_config(
            Environment::Development,
            data_dir.to_string_lossy().to_string(),
        )?,
    };
    if let Some(gateway_url) = &cli.gateway_url {
        config.gateway_url = gateway_url.clone();
    }
    Ok(config)
}

async fn run_interactive_mode(cli: Cli) -> Result<()> {
    let data_dir = expand_path(&cli.data_dir);
    fs::create_dir_all(&data_dir)?;

    let persistence = CliPersistence {
        data_dir: data_dir.clone(),
    };
    let config = load_config(&cli, &persistence, &data_dir)?;

    PaymentReconciler::init_logging(&data_dir.to_string_lossy(), None)?;

    // Resume on the page we left, which may still carry a return reference
    let location = persistence.load_location().unwrap_or(cli.location.clone());
    let navigator = Arc::new(CliNavigator::new(location));

    let reconciler = connect(ConnectRequest {
        config,
        navigator: navigator.clone(),
    })
    .await?;

    let _listener_id = reconciler.add_event_listener(Box::new(CliEventListener {}));

    // Every start picks up a payment left in flight
    match reconciler.recover_from_redirect().await {
        Ok(Some(session)) => {
            println!("Resuming verification of payment {}", session.reference());
            show_results(wait_for_outcome(session).await)?;
        }
        Ok(None) => {}
        Err(e) => error!("Recovery on start failed: {e}"),
    }

    let helper = CliHelper {
        hinter: HistoryHinter {},
    };
    let mut rl = Editor::new()?;
    rl.set_helper(Some(helper));

    let history_file = persistence.history_file();
    if rl.load_history(&history_file).is_err() {
        error!("Failed to load history");
    }

    println!("Welcome to the UniHive checkout CLI!");
    println!("Type 'help' to see available commands or 'exit' to quit.");

    loop {
        let readline = rl.readline("unihive> ");
        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                rl.add_history_entry(line)?;

                match parse_command(line) {
                    Ok(cmd) => {
                        if let Commands::Exit {} = cmd {
                            break;
                        }

                        let res = execute_command(cmd, &reconciler, &navigator).await;
                        show_results(res)?;
                    }
                    Err(e) => println!("Error parsing command: {}", e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("CTRL-C");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("CTRL-D");
                break;
            }
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        }
    }

    if let Err(err) = rl.save_history(&history_file) {
        error!("Failed to save history: {}", err);
    }
    if let Err(err) = persistence.save_location(&navigator.current_url()) {
        error!("Failed to save location: {}", err);
    }

    reconciler.disconnect()?;

    Ok(())
}

fn show_results(result: Result<String>) -> Result<()> {
    let result_str = match result {
        Ok(r) => r,
        Err(err) => serde_json::to_string_pretty(&CommandResult {
            success: false,
            message: err.to_string(),
        })?,
    };

    println!("{result_str}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();
    run_interactive_mode(cli).await
}
