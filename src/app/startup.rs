//! Process entry: arguments, configuration, logging, runtime and the run

use crate::app::cli::Cli;
use crate::app::config::{load_config, validate_config, AppConfig};
use crate::app::error::{AppError, AppResult};
use crate::app::runner::{build_clients, summary_table, Runner};
use crate::core::error_handling::log_error_with_context;
use crate::core::logging::init_logging;
use crate::core::shutdown::ShutdownCoordinator;
use crate::core::version;
use clap::Parser;

/// Run the command line and return the process exit code
pub fn startup() -> i32 {
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(source) => {
            eprintln!("Error: {}", AppError::Runtime { source });
            return 1;
        }
    };
    runtime.block_on(run_cli(cli))
}

async fn run_cli(cli: Cli) -> i32 {
    // Logging depends on the configuration, so errors up to here go to stderr
    let config = match prepare_config(&cli).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    if let Err(e) = configure_logging(&config) {
        eprintln!("Error: {}", e);
        return 1;
    }
    log::info!("{} starting", version::banner());

    match execute(&cli, config).await {
        Ok(()) => 0,
        Err(e) => {
            log_error_with_context(&e, "Load run");
            1
        }
    }
}

/// File, then command line, then validation
pub async fn prepare_config(cli: &Cli) -> AppResult<AppConfig> {
    let mut config = load_config(cli.config_file.as_deref()).await?;
    cli.apply_to(&mut config);
    validate_config(&config)?;
    Ok(config)
}

fn configure_logging(config: &AppConfig) -> AppResult<()> {
    let use_color = config
        .log
        .color
        .unwrap_or_else(|| std::io::IsTerminal::is_terminal(&std::io::stderr()));
    colored::control::set_override(use_color);

    // "none" and "-" disable file logging
    let log_file = config
        .log
        .file
        .as_deref()
        .filter(|file| !file.eq_ignore_ascii_case("none") && *file != "-");

    init_logging(
        config.log.level.as_deref(),
        config.log.format.as_deref(),
        log_file,
        use_color,
    )
    .map_err(|e| AppError::Logging {
        message: e.to_string(),
    })
}

async fn execute(cli: &Cli, config: AppConfig) -> AppResult<()> {
    let (coordinator, shutdown_rx) = ShutdownCoordinator::new();
    coordinator.install_signal_handlers();

    let clients = build_clients(&config)?;
    log::info!(
        "Backend {}, topic '{}'",
        config.broker.backend,
        config.producer.topic
    );
    let runner = Runner::new(config, cli.command.loops(), cli.command.duration())?;
    let outcome = runner.run(clients, shutdown_rx).await?;

    print!("{}", summary_table(&outcome));
    if cli.dump_metrics {
        print!("{}", runner.stats().render()?);
    }
    Ok(())
}
