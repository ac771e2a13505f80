use clap::Parser;
use tracing_subscriber::EnvFilter;

use easyinjection::cli;
use easyinjection::errors::ScanError;

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();

    // Initialize logging
    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(!cli.no_color)
        .init();

    let result = match cli.command {
        cli::Commands::Scan(args) => cli::scan::handle_scan(args).await,
        cli::Commands::Serve(args) => cli::serve::handle_serve(args).await,
        cli::Commands::Validate(args) => handle_validate(args).await,
    };

    match result {
        Ok(()) => {}
        Err(e) => {
            eprintln!("Error: {}", e);
            let exit_code = match &e {
                ScanError::Config(_) => 2,
                ScanError::InvalidTarget(_) => 3,
                ScanError::ToolUnavailable(_) => 4,
                _ => 1,
            };
            std::process::exit(exit_code);
        }
    }
}

async fn handle_validate(args: cli::commands::ValidateArgs) -> Result<(), ScanError> {
    let content = tokio::fs::read_to_string(&args.config).await?;
    let raw: serde_json::Value = serde_json::from_str(&content)?;
    let config = easyinjection::config::validate(&raw)?;
    println!(
        "Configuration is valid: {} (objetivo {})",
        args.config, config.target_url
    );
    Ok(())
}
