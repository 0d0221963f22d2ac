use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgMatches, Command};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use circuit_guard::{
    config::defaults::DEMO_SERVICE_NAME,
    AppConfig,
    CircuitBreaker,
    Harness,
};

fn cli() -> Command {
    let config_arg = Arg::new("config")
        .long("config")
        .short('c')
        .value_name("PATH")
        .help("Path to a TOML configuration file")
        .value_parser(value_parser!(PathBuf));

    Command::new("circuit-guard")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Compare dependency latency with and without a circuit breaker")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("demo")
                .about("Call a simulated flaky service directly and through a circuit breaker")
                .arg(config_arg.clone())
                .arg(
                    Arg::new("calls")
                        .long("calls")
                        .value_name("N")
                        .help("Number of calls per run")
                        .value_parser(value_parser!(u32).range(1..))
                )
                .arg(
                    Arg::new("concurrency")
                        .long("concurrency")
                        .value_name("N")
                        .help("Logical callers sharing the breaker")
                        .value_parser(value_parser!(u32).range(1..))
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .help("Print the report as JSON")
                        .action(clap::ArgAction::SetTrue)
                )
        )
        .subcommand(
            Command::new("show-config")
                .about("Print the effective configuration")
                .arg(config_arg)
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    match matches.subcommand() {
        Some(("demo", sub_matches)) => run_demo(sub_matches).await,
        Some(("show-config", sub_matches)) => show_config(sub_matches),
        _ => Err(anyhow::anyhow!("Unknown command, use --help for available commands")),
    }
}

fn load_config(matches: &ArgMatches) -> Result<AppConfig> {
    let path = matches.get_one::<PathBuf>("config");
    AppConfig::load(path.map(PathBuf::as_path))
}

fn init_logging(level: &str) {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_demo(matches: &ArgMatches) -> Result<()> {
    let mut config = load_config(matches)?;
    if let Some(calls) = matches.get_one::<u32>("calls") {
        config.demo.calls = *calls;
    }
    if let Some(concurrency) = matches.get_one::<u32>("concurrency") {
        config.demo.concurrency = *concurrency;
    }
    config.validate()?;

    init_logging(&config.logging.level);
    info!("Starting circuit breaker demo");

    let breaker_config = config
        .to_breaker_config()
        .context("Failed to build circuit breaker configuration")?;
    let breaker = CircuitBreaker::new(DEMO_SERVICE_NAME, breaker_config)
        .context("Failed to build circuit breaker")?;

    let direct = config.build_demo_service(DEMO_SERVICE_NAME);
    let guarded = config.build_demo_service(DEMO_SERVICE_NAME);
    let harness = Harness::new(config.to_harness_options());

    let report = harness.compare(&direct, &guarded, &breaker).await;
    report.log_summary();

    if matches.get_flag("json") {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize demo report")?
        );
    } else {
        println!("Average response time without breaker: {:?}", report.direct.average);
        println!("Average response time with breaker:    {:?}", report.guarded.average);
        println!(
            "Rejected by breaker: {} of {} call(s), final state {}",
            report.guarded.rejections, report.guarded.calls, report.final_state
        );
    }

    Ok(())
}

fn show_config(matches: &ArgMatches) -> Result<()> {
    let config = load_config(matches)?;
    let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;
    print!("{}", rendered);
    Ok(())
}
