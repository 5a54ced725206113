use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "kursbot")]
#[command(author, version, about = "Telegram bot backend for a course/consultation business", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the bot services (reconciler, sweeps, webhook server)
    Run,

    /// Run a single reconciliation tick and exit (ops debugging)
    Reconcile,

    /// Run a single subscription sweep and exit (ops debugging)
    Sweep,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
