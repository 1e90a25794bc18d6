use clap::{value_parser, Arg, ArgAction, Command};
use rust_decimal::Decimal;
use std::path::PathBuf;
use stepup_core::memory::SimulatedCapture;
use stepup_core::{Modality, Role, StepUpConfig, TransactionType};
use stepup_sim::{run, Scenario};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = Command::new("stepup-sim")
        .version(stepup_core::VERSION)
        .about("Run one step-up approval against in-memory collaborators")
        .arg(
            Arg::new("config")
                .long("config")
                .value_parser(value_parser!(PathBuf))
                .help("TOML workflow configuration"),
        )
        .arg(
            Arg::new("tenant")
                .long("tenant")
                .default_value("store-1")
                .help("Tenant id for the transaction and actor"),
        )
        .arg(
            Arg::new("amount")
                .long("amount")
                .default_value("1500")
                .value_parser(value_parser!(Decimal))
                .help("Transaction total"),
        )
        .arg(
            Arg::new("role")
                .long("role")
                .default_value("cashier")
                .value_parser(value_parser!(Role))
                .help("Actor role"),
        )
        .arg(
            Arg::new("kind")
                .long("kind")
                .default_value("sale")
                .value_parser(value_parser!(TransactionType))
                .help("Transaction type"),
        )
        .arg(
            Arg::new("enrolled")
                .long("enrolled")
                .action(ArgAction::Append)
                .value_delimiter(',')
                .value_parser(value_parser!(Modality))
                .help("Enrolled modalities, e.g. fingerprint,iris"),
        )
        .arg(
            Arg::new("captures")
                .long("captures")
                .action(ArgAction::Append)
                .value_delimiter(',')
                .value_parser(value_parser!(SimulatedCapture))
                .help("Device outcomes in order: ok[:score], fail[:reason], stall:<ms>, cancel"),
        )
        .arg(
            Arg::new("min-score")
                .long("min-score")
                .default_value("0.8")
                .value_parser(value_parser!(f64))
                .help("Minimum template match score"),
        )
        .arg(
            Arg::new("credentials")
                .long("credentials")
                .value_parser(value_parser!(bool))
                .help("Answer for PIN and password checks"),
        )
        .arg(
            Arg::new("push")
                .long("push")
                .value_parser(value_parser!(bool))
                .help("Answer for push approval"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .get_matches();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if matches.get_flag("json-logs") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let config = match matches.get_one::<PathBuf>("config") {
        Some(path) => StepUpConfig::load(path)?,
        None => StepUpConfig::new(),
    };

    let mut scenario = Scenario {
        config,
        enrolled: matches
            .get_many::<Modality>("enrolled")
            .map(|values| values.copied().collect())
            .unwrap_or_default(),
        credentials: matches.get_one::<bool>("credentials").copied(),
        push: matches.get_one::<bool>("push").copied(),
        ..Scenario::default()
    };
    if let Some(tenant) = matches.get_one::<String>("tenant") {
        scenario.tenant.clone_from(tenant);
    }
    if let Some(amount) = matches.get_one::<Decimal>("amount") {
        scenario.amount = *amount;
    }
    if let Some(role) = matches.get_one::<Role>("role") {
        scenario.role = role.clone();
    }
    if let Some(kind) = matches.get_one::<TransactionType>("kind") {
        scenario.kind = kind.clone();
    }
    if let Some(captures) = matches.get_many::<SimulatedCapture>("captures") {
        scenario.captures = captures.cloned().collect();
    }
    if let Some(min_score) = matches.get_one::<f64>("min-score") {
        scenario.min_score = *min_score;
    }

    let report = run(&scenario).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    std::process::exit(if report.decision.permits_action() { 0 } else { 1 });
}
