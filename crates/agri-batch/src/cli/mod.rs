use clap::{ArgAction, CommandFactory, Parser, Subcommand};

mod batch;
pub mod validators;

pub use batch::{
    BatchRunArgs, BuildRequestsArgs, CheckBatchArgs, KindArg, ModeArg, PollArgs, ReconcileArgs,
    ValidateArgs,
};

/// Top-level CLI entry point.
#[derive(Debug, Default, Parser)]
#[command(
    name = "agri-batch",
    version,
    author,
    about = "Batch generation and validation of agricultural scenario records"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
    /// Increase logging verbosity (-v, -vv, -vvv).
    #[arg(global = true, short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub fn print_help() {
        let mut cmd = Cli::command();
        let _ = cmd.print_help();
        println!();
    }
}

/// Supported subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Submit per-record advisory generation requests and print the job id.
    BatchRun(BatchRunArgs),
    /// Resume a submitted job by id, wait for it and fetch its results.
    CheckBatch(CheckBatchArgs),
    /// Classify records in chunks and split them into accepted/rejected.
    Validate(ValidateArgs),
    /// Reconcile a raw result file against its input records offline.
    Reconcile(ReconcileArgs),
    /// Write the request artifact without submitting it.
    BuildRequests(BuildRequestsArgs),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconcile_requires_mode() {
        let parsed = Cli::try_parse_from([
            "agri-batch",
            "reconcile",
            "--input",
            "Cargo.toml",
            "--results",
            "Cargo.toml",
            "--out-dir",
            "out",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn check_batch_parses_poll_overrides() {
        let cli = Cli::try_parse_from([
            "agri-batch",
            "-vv",
            "check-batch",
            "--job-id",
            "batches/1",
            "--poll-interval",
            "5",
        ])
        .expect("parse");
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Some(Commands::CheckBatch(args)) => {
                assert_eq!(args.job_id, "batches/1");
                assert_eq!(args.poll.poll_interval, Some(5));
                assert!(args.workspace.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn chunk_size_above_limit_is_rejected() {
        let parsed = Cli::try_parse_from([
            "agri-batch",
            "build-requests",
            "--input",
            "Cargo.toml",
            "--chunk-size",
            "900",
            "--out",
            "requests.jsonl",
        ]);
        assert!(parsed.is_err());
    }
}
