use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "easyinjection", version, about = "Educational web-vulnerability scan orchestrator")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase log verbosity (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a scan from the terminal, answering quiz questions on stdin
    Scan(ScanArgs),
    /// Start the HTTP + WebSocket API server
    Serve(ServeArgs),
    /// Validate a scan-config JSON file
    Validate(ValidateArgs),
}

#[derive(Args, Clone)]
pub struct ScanArgs {
    /// Target web application URL (absolute http/https)
    #[arg(short, long)]
    pub url: String,

    /// Enable SQL injection testing
    #[arg(long)]
    pub sqli: bool,

    /// Enable XSS testing
    #[arg(long)]
    pub xss: bool,

    /// Crawl depth (1-5)
    #[arg(long, default_value_t = 2)]
    pub depth: i64,

    /// Test level (1-5)
    #[arg(long, default_value_t = 1)]
    pub level: i64,

    /// Risk level (1-3)
    #[arg(long, default_value_t = 1)]
    pub risk: i64,

    /// Worker threads for the SQLi tool
    #[arg(long, default_value_t = 1)]
    pub threads: i64,

    /// Per-tool timeout in seconds
    #[arg(long, default_value_t = 300)]
    pub timeout: i64,

    /// Worker count for the XSS tool
    #[arg(long, default_value_t = 10)]
    pub workers: i64,

    /// Delay between XSS requests in milliseconds
    #[arg(long, default_value_t = 0)]
    pub delay: i64,

    /// Enable proof-of-concept exploitation (read-only queries)
    #[arg(long)]
    pub exploit: bool,

    /// DBMS hint for the SQLi tool
    #[arg(long)]
    pub dbms: Option<String>,

    /// Extra header, `Name: Value` (repeatable)
    #[arg(long = "header")]
    pub headers: Vec<String>,

    /// Path to the SQLi tool binary or .py script
    #[arg(long)]
    pub sqlmap_path: Option<String>,

    /// Path to the XSS tool binary
    #[arg(long)]
    pub dalfox_path: Option<String>,

    /// Directory of question YAML files (defaults to the embedded set)
    #[arg(long)]
    pub questions: Option<String>,
}

#[derive(Args, Clone)]
pub struct ServeArgs {
    /// Listen address
    #[arg(long, default_value = "127.0.0.1:3001")]
    pub bind: String,

    /// SQLite database path
    #[arg(long, default_value = "./easyinjection.db")]
    pub db: String,

    /// Directory of question YAML files (defaults to the embedded set)
    #[arg(long)]
    pub questions: Option<String>,
}

#[derive(Args, Clone)]
pub struct ValidateArgs {
    /// Scan-config JSON file
    pub config: String,
}
