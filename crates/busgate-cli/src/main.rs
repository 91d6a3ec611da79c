//! `busgate` – command line entry point for the gateway.
//!
//! 1. Reads `~/.busgate/config.toml` (or `--config PATH`), falling back to a
//!    built-in default when the file is absent.
//! 2. Loads the configured modules from the built-in catalog and supervises
//!    them until Ctrl-C, SIGTERM, a `quit` on the console module, or a fatal
//!    module error.
//! 3. Exits non-zero when the shutdown was caused by a fatal module error.

mod config;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use busgate_middleware::ShutdownReason;
use busgate_modules::builtin_catalog;
use busgate_runtime::{Gateway, telemetry};
use busgate_types::GatewayError;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::{info, warn};

use crate::config::Config;

/// Blocking stdin reads may outlive the gateway; don't wait on them forever.
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(name = "busgate", version, about = "Modular home-automation bus gateway")]
struct Cli {
    /// Config file to use instead of ~/.busgate/config.toml.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Start the gateway (default).
    Run,
    /// Write the default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// List the built-in modules.
    Modules,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _telemetry = telemetry::init_tracing("busgate");
    let path = cli.config.clone().unwrap_or_else(config::config_path);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(&path),
        Command::Init { force } => match init(&path, force) {
            Ok(()) => ExitCode::SUCCESS,
            Err(message) => {
                eprintln!("  {message}");
                ExitCode::FAILURE
            }
        },
        Command::Modules => {
            list_modules();
            ExitCode::SUCCESS
        }
    }
}

fn run(path: &Path) -> ExitCode {
    let cfg = match config::load_from(path) {
        Ok(Some(cfg)) => {
            info!(path = %path.display(), "config loaded");
            cfg
        }
        Ok(None) => {
            warn!(path = %path.display(), "no config file, using built-in defaults");
            let mut cfg = Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            eprintln!("{}: {e}", "Config error".red());
            return ExitCode::FAILURE;
        }
    };

    print_banner();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {e}", "Failed to start runtime".red());
            return ExitCode::FAILURE;
        }
    };
    let result = runtime.block_on(serve(cfg));
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);

    match result {
        Ok(reason) => {
            let code = reason.exit_code();
            if code == 0 {
                println!("{}", "  ✓ Gateway stopped.".green());
            } else {
                println!("{} {reason:?}", "  ✗ Gateway stopped:".red().bold());
            }
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
        Err(e) => {
            eprintln!("{}: {e}", "Gateway error".red());
            ExitCode::FAILURE
        }
    }
}

async fn serve(cfg: Config) -> Result<ShutdownReason, GatewayError> {
    let catalog = builtin_catalog();
    let gateway = Gateway::start(&catalog, &cfg.modules, cfg.supervisor).await?;

    for (id, kind) in gateway.modules() {
        println!("  {} {} {}", "●".green(), id.bold(), format!("({kind})").dimmed());
    }
    for (id, reason) in gateway.skipped() {
        println!("  {} {} {}", "●".red(), id.bold(), reason.dimmed());
    }
    println!();

    let handle = gateway.shutdown_handle();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Termination signal – stopping modules …".yellow().bold());
        handle.signal();
    }) {
        warn!(error = %e, "failed to install signal handler; Ctrl-C will not stop the gateway cleanly");
    }

    let (reason, report) = gateway.run_until_shutdown().await;
    if report.forced() > 0 {
        println!(
            "  {} {} module(s) had to be terminated",
            "⚠".yellow(),
            report.forced()
        );
    }
    Ok(reason)
}

/// Write the default config to `path`. Returns the message to show on failure.
fn init(path: &Path, force: bool) -> Result<(), String> {
    if path.exists() && !force {
        return Err(format!(
            "{} already exists. Use {} to overwrite.",
            path.display().to_string().bold(),
            "--force".bold()
        ));
    }
    config::save_to(&Config::default(), path)
        .map_err(|e| format!("{}: {e}", "Failed to write config".red()))?;
    println!("  {} {}", "✓ Wrote".green(), path.display().to_string().bold());
    Ok(())
}

fn list_modules() {
    for (name, kind) in builtin_catalog().entries() {
        println!("  {:<16} {}", name.bold(), kind.to_string().dimmed());
    }
}

fn print_banner() {
    println!();
    println!("{}", r#"   __                          __     "#.bold().cyan());
    println!("{}", r#"  / /  __ _____ ___ ____ _/ /____ "#.bold().cyan());
    println!("{}", r#" / _ \/ // (_-</ _ `/ _ `/ __/ -_)"#.bold().cyan());
    println!("{}", r#"/_.__/\_,_/___/\_, /\_,_/\__/\__/ "#.bold().cyan());
    println!("{}", r#"              /___/                "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "busgate".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Home-automation bus gateway");
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults_to_run_without_subcommand() {
        let cli = Cli::parse_from(["busgate"]);
        assert_eq!(cli.command, None);
        assert_eq!(cli.config, None);
    }

    #[test]
    fn parses_config_flag_and_init_force() {
        let cli = Cli::parse_from(["busgate", "init", "--force", "--config", "/tmp/gw.toml"]);
        assert_eq!(cli.command, Some(Command::Init { force: true }));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/gw.toml")));
    }

    #[test]
    fn init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        assert!(init(&path, false).is_ok());
        assert!(init(&path, false).is_err());
        assert!(init(&path, true).is_ok());
        assert!(config::load_from(&path).expect("load").is_some());
    }
}
