use std::path::PathBuf;
use std::process::ExitCode;
use clap::{Parser, Subcommand};
use http::Method;
use serde::Serialize;
use serde_json::Value;

use booking_link::call::{classify_with, CallContext, CallError, ClassifiedOutcome, FailureCause, HttpReply, RawOutcome};
use booking_link::config::{load_config, LinkConfig};
use booking_link::downstream::{
    AuthClient, Downstream, NotificationClient, NotificationRequest, ReservationClient, AUTH, NOTIFICATIONS,
    RESERVATIONS,
};
use booking_link::http::DownstreamRequest;
use booking_link::observability::{logging, metrics};
use booking_link::{CallExecutor, TraceContext};

#[derive(Parser)]
#[command(name = "booking-link")]
#[command(about = "Resilient calls to the booking platform services", long_about = None)]
struct Cli {
    /// TOML configuration file. Built-in defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one request to a configured dependency
    Probe {
        dependency: String,
        path: String,
        #[arg(long, default_value = "GET")]
        method: String,
        /// Authorization header value, forwarded verbatim
        #[arg(long)]
        token: Option<String>,
        /// JSON request body
        #[arg(long)]
        body: Option<String>,
        /// Continue an existing trace
        #[arg(long)]
        traceparent: Option<String>,
    },
    /// Fetch the user owning a token from the auth service
    CurrentUser {
        #[arg(long)]
        token: String,
    },
    /// Fetch a user by id from the auth service
    User { id: String },
    /// List the current guest's reservations
    Reservations {
        #[arg(long)]
        token: String,
    },
    /// Create a notification for a host
    Notify {
        #[arg(long)]
        token: String,
        #[arg(long)]
        host_id: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        text: String,
    },
    /// Validate the configuration and print it
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => LinkConfig::default(),
    };

    logging::init_logging(&config.observability);

    if let Commands::CheckConfig = cli.command {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(ExitCode::SUCCESS);
    }

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let executor = CallExecutor::from_config(&config);
    let trace = match &cli.command {
        Commands::Probe {
            traceparent: Some(raw),
            ..
        } => Some(raw.parse::<TraceContext>()?),
        _ => None,
    };
    let ctx = executor.context(trace);

    let cancel = ctx.cancel_token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling call");
            cancel.cancel();
        }
    });

    let code = match cli.command {
        Commands::Probe {
            dependency,
            path,
            method,
            token,
            body,
            ..
        } => {
            let downstream = Downstream::from_link_config(&dependency, &config, executor)?;
            let mut request = DownstreamRequest::new(Method::from_bytes(method.to_uppercase().as_bytes())?, path);
            if let Some(token) = token {
                request = request.authorization(token)?;
            }
            if let Some(body) = body {
                serde_json::from_str::<Value>(&body)?;
                request = request.raw_json(body);
            }
            match probe(&downstream, &ctx, &request).await {
                Ok(reply) => {
                    println!("{}", reply.status);
                    println!("{}", render_body(&reply.body));
                    ExitCode::SUCCESS
                }
                Err(e) => report(&e),
            }
        }
        Commands::CurrentUser { token } => {
            let auth = AuthClient::new(Downstream::from_link_config(AUTH, &config, executor)?);
            print_result(auth.current_user(&ctx, &token).await)?
        }
        Commands::User { id } => {
            let auth = AuthClient::new(Downstream::from_link_config(AUTH, &config, executor)?);
            print_result(auth.user_by_id(&ctx, &id).await)?
        }
        Commands::Reservations { token } => {
            let reservations =
                ReservationClient::new(Downstream::from_link_config(RESERVATIONS, &config, executor)?);
            print_result(reservations.reservations_for_guest(&ctx, &token).await)?
        }
        Commands::Notify {
            token,
            host_id,
            email,
            text,
        } => {
            let notifications =
                NotificationClient::new(Downstream::from_link_config(NOTIFICATIONS, &config, executor)?);
            let notification = NotificationRequest {
                host_id,
                host_email: email,
                notification_text: text,
            };
            match notifications.create(&ctx, &token, &notification).await {
                Ok(()) => {
                    println!("notification created");
                    ExitCode::SUCCESS
                }
                Err(e) => report(&e),
            }
        }
        Commands::CheckConfig => ExitCode::SUCCESS,
    };

    Ok(code)
}

/// Any reply below 500 is shown to the operator as-is.
async fn probe(downstream: &Downstream, ctx: &CallContext, request: &DownstreamRequest) -> Result<HttpReply, CallError> {
    let classifier = classify_with(|raw: RawOutcome| match raw {
        Ok(reply) if reply.status.is_server_error() => ClassifiedOutcome::RetryableFailure(FailureCause::Status {
            status: reply.status,
            body: String::from_utf8_lossy(&reply.body).into_owned(),
        }),
        Ok(reply) => ClassifiedOutcome::Success(reply),
        Err(e) if e.is_retryable() => ClassifiedOutcome::RetryableFailure(e.into()),
        Err(e) => ClassifiedOutcome::PermanentFailure(e.into()),
    });
    downstream.call(ctx, request, &classifier).await
}

fn render_body(body: &[u8]) -> String {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|json| serde_json::to_string_pretty(&json).ok())
        .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned())
}

fn print_result<T: Serialize>(result: Result<T, CallError>) -> Result<ExitCode, serde_json::Error> {
    match result {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => Ok(report(&e)),
    }
}

fn report(err: &CallError) -> ExitCode {
    eprintln!("Error: {}", err);
    if let Some(wait) = err.retry_after() {
        eprintln!("Retry after: {:.1}s", wait.as_secs_f64());
    }
    ExitCode::FAILURE
}
