use crate::navigator::CliNavigator;
use clap::arg;
use rustyline::highlight::Highlighter;
use rustyline::hint::HistoryHinter;
use rustyline::{Completer, Helper, Hinter, Validator};
use serde::Serialize;
use serde_json::to_string_pretty;
use std::borrow::Cow;
use std::borrow::Cow::Owned;
use std::io::Write;
use unihive_checkout::{
    AbandonPaymentRequest, CheckPaymentStatusRequest, ListAttemptsRequest, Navigator,
    PaymentReconciler, StartPaymentRequest, VerificationSession,
};

#[derive(Clone, clap::clap_derive::Parser)]
pub(crate) enum Commands {
    /// Start a checkout for a catalog item and open the gateway page
    StartPayment {
        /// The item to purchase
        #[arg(short, long)]
        item: String,
    },

    /// Land on the URL the gateway redirected back to and verify the payment
    Return {
        /// The return URL, usually carrying a `reference` parameter
        #[arg(short, long)]
        url: String,
    },

    /// Resume verification of the newest in-flight payment
    Recover {},

    /// Ask the gateway once for the status of a payment
    CheckStatus {
        /// The payment reference
        #[arg(short, long)]
        reference: String,
    },

    /// Stop verifying a payment and forget it
    Abandon {
        /// The payment reference
        #[arg(short, long)]
        reference: String,
    },

    /// List stored payment attempts
    ListAttempts {},

    /// Show the current location
    Location {},

    /// Exit the interactive shell (interactive mode only)
    #[command(hide = true)]
    Exit {},
}

#[derive(Helper, Completer, Hinter, Validator)]
pub(crate) struct CliHelper {
    #[rustyline(Hinter)]
    pub(crate) hinter: HistoryHinter,
}

impl Highlighter for CliHelper {
    fn highlight_hint<'h>(&self, hint: &'h str) -> Cow<'h, str> {
        Owned("\x1b[1m".to_owned() + hint + "\x1b[m")
    }
}

#[derive(Serialize)]
pub(crate) struct CommandResult<T: Serialize> {
    pub success: bool,
    pub message: T,
}

macro_rules! command_result {
    ($expr:expr) => {{
        to_string_pretty(&CommandResult {
            success: true,
            message: $expr,
        })?
    }};
}

macro_rules! wait_confirmation {
    ($prompt:expr,$result:expr) => {
        print!("{}", $prompt);
        std::io::stdout().flush()?;

        let mut buf = String::new();
        std::io::stdin().read_line(&mut buf)?;
        if !['y', 'Y'].contains(&(buf.as_bytes().first().copied().unwrap_or(b'n') as char)) {
            return Ok(command_result!($result));
        }
    };
}

/// Follows a verification session until it ends or the user presses CTRL-C
pub(crate) async fn wait_for_outcome(
    session: VerificationSession,
) -> Result<String, anyhow::Error> {
    let reference = session.reference().to_string();
    println!("Verifying payment {reference}, press CTRL-C to stop watching");

    tokio::select! {
        outcome = session.outcome() => Ok(command_result!(outcome?)),
        _ = tokio::signal::ctrl_c() => {
            Ok(command_result!(format!("Stopped verifying payment {reference}")))
        }
    }
}

pub(crate) async fn execute_command(
    command: Commands,
    reconciler: &PaymentReconciler,
    navigator: &CliNavigator,
) -> Result<String, anyhow::Error> {
    Ok(match command {
        Commands::StartPayment { item } => {
            let response = reconciler
                .start_payment(StartPaymentRequest { item_id: item })
                .await?;
            command_result!(response)
        }
        Commands::Return { url } => {
            navigator.visit(&url);
            match reconciler.recover_from_redirect().await? {
                Some(session) => wait_for_outcome(session).await?,
                None => command_result!("No payment to verify"),
            }
        }
        Commands::Recover {} => match reconciler.recover_from_redirect().await? {
            Some(session) => wait_for_outcome(session).await?,
            None => command_result!("No payment to verify"),
        },
        Commands::CheckStatus { reference } => {
            let response = reconciler
                .check_payment_status(CheckPaymentStatusRequest { reference })
                .await?;
            command_result!(response)
        }
        Commands::Abandon { reference } => {
            wait_confirmation!(
                format!("Abandon payment {reference}? (y/n): "),
                "Abandon cancelled by user."
            );

            reconciler
                .abandon_payment(AbandonPaymentRequest {
                    reference: reference.clone(),
                })
                .await?;
            command_result!(format!("Payment {reference} abandoned"))
        }
        Commands::ListAttempts {} => {
            let response = reconciler.list_attempts(ListAttemptsRequest {}).await?;

            println!("Payment attempts:");
            println!(
                "{:<32} {:<20} {:<24} {:<8} Date",
                "Reference", "Item", "Status", "Polls"
            );
            println!("{}", "-".repeat(100));

            for attempt in response.attempts {
                let date = chrono::DateTime::from_timestamp(attempt.created_at.try_into()?, 0)
                    .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "Unknown".to_string());

                println!(
                    "{:<32} {:<20} {:<24} {:<8} {}",
                    &attempt.reference,
                    attempt.item_id.as_deref().unwrap_or("-"),
                    attempt.status.to_string(),
                    format!("{}/{}", attempt.poll_count, attempt.max_polls),
                    date
                );
            }
            "".to_string()
        }
        Commands::Location {} => command_result!(navigator.current_url()),
        Commands::Exit {} => {
            command_result!("Exiting...")
        }
    })
}
