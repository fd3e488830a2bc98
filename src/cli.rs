//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Proof-of-delivery acquisition for carrier delivery disputes.
///
/// Fetches POD documents for claims from carrier APIs, retrying temporary
/// failures on a backoff schedule under per-carrier rate budgets.
#[derive(Parser, Debug)]
#[command(name = "podfetch")]
#[command(author, version, about)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Claims processed per cycle (1-500) [config default: 30]
    #[arg(long, global = true, value_parser = clap::value_parser!(u32).range(1..=500))]
    pub batch_size: Option<u32>,

    /// Attempts before a claim is finalized (1-10) [config default: 4]
    #[arg(short = 'r', long, global = true, value_parser = clap::value_parser!(u32).range(1..=10))]
    pub max_retries: Option<u32>,

    /// Config file (default: $XDG_CONFIG_HOME/podfetch/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// SQLite database holding the claims
    #[arg(long, global = true, value_name = "PATH")]
    pub database: Option<PathBuf>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Run one acquisition cycle and exit
    Run,

    /// Run cycles on an interval until Ctrl+C
    Watch {
        /// Seconds between cycles [config default: 3600]
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        interval: Option<u64>,
    },

    /// Queue a claim for POD acquisition
    Request {
        /// Claim reference
        claim_ref: String,
    },

    /// Take a claim out of automatic acquisition
    Manual {
        /// Claim reference
        claim_ref: String,

        /// Reason recorded on the claim
        #[arg(long)]
        note: Option<String>,
    },

    /// Give a finally-failed claim one more attempt
    Retrigger {
        /// Claim reference
        claim_ref: String,
    },

    /// Record uploaded damage evidence and recompute the success probability
    Evidence {
        /// Claim reference
        claim_ref: String,
    },

    /// Recompute a claim's success probability
    Rescore {
        /// Claim reference
        claim_ref: String,
    },

    /// Show claim counts per POD status
    Status,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_run_parses_with_defaults() {
        let args = Args::try_parse_from(["podfetch", "run"]).unwrap();
        assert_eq!(args.command, Command::Run);
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert_eq!(args.batch_size, None);
        assert_eq!(args.max_retries, None);
    }

    #[test]
    fn test_cli_subcommand_is_required() {
        let result = Args::try_parse_from(["podfetch"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["podfetch", "run", "-v"]).unwrap();
        assert_eq!(args.verbose, 1);

        let args = Args::try_parse_from(["podfetch", "-vv", "run"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_quiet_flag_sets_quiet() {
        let args = Args::try_parse_from(["podfetch", "status", "--quiet"]).unwrap();
        assert!(args.quiet);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["podfetch", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_version_flag_shows_version() {
        let err = Args::try_parse_from(["podfetch", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_cli_invalid_flag_returns_error() {
        let err = Args::try_parse_from(["podfetch", "run", "--invalid-flag"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }

    // ==================== Batch Size Tests ====================

    #[test]
    fn test_cli_batch_size_bounds() {
        let args = Args::try_parse_from(["podfetch", "run", "--batch-size", "1"]).unwrap();
        assert_eq!(args.batch_size, Some(1));

        let args = Args::try_parse_from(["podfetch", "run", "--batch-size", "500"]).unwrap();
        assert_eq!(args.batch_size, Some(500));
    }

    #[test]
    fn test_cli_batch_size_out_of_range_rejected() {
        for value in ["0", "501"] {
            let err =
                Args::try_parse_from(["podfetch", "run", "--batch-size", value]).unwrap_err();
            assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
        }
    }

    // ==================== Max Retries Tests ====================

    #[test]
    fn test_cli_max_retries_short_and_long() {
        let args = Args::try_parse_from(["podfetch", "run", "-r", "5"]).unwrap();
        assert_eq!(args.max_retries, Some(5));

        let args = Args::try_parse_from(["podfetch", "run", "--max-retries", "10"]).unwrap();
        assert_eq!(args.max_retries, Some(10));
    }

    #[test]
    fn test_cli_max_retries_out_of_range_rejected() {
        for value in ["0", "11"] {
            let err = Args::try_parse_from(["podfetch", "run", "-r", value]).unwrap_err();
            assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
        }
    }

    // ==================== Subcommand Tests ====================

    #[test]
    fn test_cli_watch_interval() {
        let args = Args::try_parse_from(["podfetch", "watch", "--interval", "60"]).unwrap();
        assert_eq!(
            args.command,
            Command::Watch {
                interval: Some(60)
            }
        );

        assert!(Args::try_parse_from(["podfetch", "watch", "--interval", "0"]).is_err());
    }

    #[test]
    fn test_cli_manual_with_note() {
        let args = Args::try_parse_from([
            "podfetch",
            "manual",
            "CLM-42",
            "--note",
            "carrier portal only",
        ])
        .unwrap();
        assert_eq!(
            args.command,
            Command::Manual {
                claim_ref: "CLM-42".to_string(),
                note: Some("carrier portal only".to_string()),
            }
        );
    }

    #[test]
    fn test_cli_claim_commands_require_reference() {
        for command in ["request", "retrigger", "rescore", "manual", "evidence"] {
            assert!(
                Args::try_parse_from(["podfetch", command]).is_err(),
                "{command} without a claim reference should fail"
            );
        }
    }

    #[test]
    fn test_cli_evidence() {
        let args = Args::try_parse_from(["podfetch", "evidence", "CLM-7"]).unwrap();
        assert_eq!(
            args.command,
            Command::Evidence {
                claim_ref: "CLM-7".to_string()
            }
        );
    }

    #[test]
    fn test_cli_paths() {
        let args = Args::try_parse_from([
            "podfetch",
            "status",
            "--database",
            "/tmp/claims.db",
            "--config",
            "/tmp/podfetch.toml",
        ])
        .unwrap();
        assert_eq!(args.database, Some(PathBuf::from("/tmp/claims.db")));
        assert_eq!(args.config, Some(PathBuf::from("/tmp/podfetch.toml")));
    }
}
