use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use remedy_approval::{required_approvals, ApprovalCoordinator};
use remedy_connector::{check_command, ConnectorRouter, SshConnector};
use remedy_core::{Environment, RemediationAction, RemedyConfig, RunOutcome};
use remedy_engine::RemediationRunner;
use remedy_policy::classify_risk;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("remedy")
        .version(remedy_engine::VERSION)
        .about("Policy-gated infrastructure remediation")
        .subcommand_required(true)
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines on stderr"),
        )
        .subcommand(
            Command::new("classify")
                .about("Print the assessed risk of an action type in an environment")
                .arg(Arg::new("action_type").required(true))
                .arg(
                    Arg::new("environment")
                        .required(true)
                        .help("development, staging or production"),
                ),
        )
        .subcommand(
            Command::new("check-command")
                .about("Check a shell command against the safety guard")
                .arg(
                    Arg::new("command")
                        .required(true)
                        .num_args(1..)
                        .trailing_var_arg(true)
                        .allow_hyphen_values(true),
                ),
        )
        .subcommand(
            Command::new("run")
                .about("Run one action through the remediation state machine")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("TOML configuration file"),
                )
                .arg(
                    Arg::new("action")
                        .long("action")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("JSON file describing the action"),
                )
                .arg(
                    Arg::new("alert")
                        .long("alert")
                        .value_parser(value_parser!(PathBuf))
                        .help("JSON file with the triggering alert"),
                )
                .arg(
                    Arg::new("investigation")
                        .long("investigation")
                        .help("Investigation id to attach to the run"),
                ),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn classify(args: &ArgMatches) -> Result<i32> {
    let action_type = args
        .get_one::<String>("action_type")
        .context("missing action type")?;
    let environment: Environment = args
        .get_one::<String>("environment")
        .context("missing environment")?
        .parse()
        .map_err(anyhow::Error::msg)?;

    let risk = classify_risk(action_type, environment);
    println!("{action_type} in {environment}: {risk}");
    println!("approvals required: {}", required_approvals(risk));
    Ok(0)
}

fn check(args: &ArgMatches) -> Result<i32> {
    let command = args
        .get_many::<String>("command")
        .context("missing command")?
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" ");

    match check_command(&command) {
        Ok(()) => {
            println!("allowed: {command}");
            Ok(0)
        }
        Err(violation) => {
            println!("{violation}");
            Ok(1)
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

async fn run(args: &ArgMatches) -> Result<i32> {
    let config = match args.get_one::<PathBuf>("config") {
        Some(path) => RemedyConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => RemedyConfig::default(),
    };
    let action: RemediationAction = read_json(
        args.get_one::<PathBuf>("action")
            .context("missing --action")?,
    )?;
    let alert = args
        .get_one::<PathBuf>("alert")
        .map(|path| read_json::<serde_json::Value>(path))
        .transpose()?;
    let investigation = args.get_one::<String>("investigation").cloned();

    let router =
        ConnectorRouter::new().with_connector(Arc::new(SshConnector::from_config(&config.ssh)));
    let runner = RemediationRunner::from_config(&config, router)?;

    tokio::spawn(announce(runner.approvals().clone()));
    tokio::spawn(approval_input(runner.approvals().clone()));

    let state = runner.remediate(action, alert, investigation).await;
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(if state.outcome == Some(RunOutcome::Succeeded) {
        0
    } else {
        1
    })
}

/// Tell the operator which requests are waiting
async fn announce(approvals: ApprovalCoordinator) {
    let mut requests = approvals.subscribe();
    loop {
        match requests.recv().await {
            Ok(request) => eprintln!(
                "approval {} pending: {} on {} ({} risk, {} approver(s), {:?}). \
                 Reply `approve {} <name>` or `deny {} <name>`",
                request.id,
                request.action.action_type,
                request.action.target_resource,
                request.risk,
                request.required_approvals,
                request.timeout(),
                request.id,
                request.id,
            ),
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        }
    }
}

/// `approve <id> <who>` / `deny <id> <who>` lines from stdin
async fn approval_input(approvals: ApprovalCoordinator) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "stdin closed");
                break;
            }
        };
        let words: Vec<&str> = line.split_whitespace().collect();
        let result = match words.as_slice() {
            [] => continue,
            ["approve", id, who] => approvals.approve(id, who).await,
            ["deny", id, who] => approvals.deny(id, who).await,
            _ => {
                eprintln!("expected `approve <id> <name>` or `deny <id> <name>`");
                continue;
            }
        };
        match result {
            Ok(outcome) => eprintln!("{outcome:?}"),
            Err(e) => eprintln!("{e}"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    let code = match matches.subcommand() {
        Some(("classify", args)) => classify(args)?,
        Some(("check-command", args)) => check(args)?,
        Some(("run", args)) => run(args).await?,
        _ => 2,
    };
    // stdin reader may still be parked on a blocking read
    std::process::exit(code);
}
