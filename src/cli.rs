//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Discover, download and catalog open-access publications.
///
/// libharvest searches open archives for publications matching the
/// library's collection profile, fetches and validates the binaries, and
/// writes barcoded catalog records with signed access URLs.
#[derive(Parser, Debug)]
#[command(name = "libharvest")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to a JSON config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Search providers and enqueue candidate acquisition jobs
    Populate {
        /// Categories to populate (defaults to the configured set)
        #[arg(short = 'C', long = "category")]
        categories: Vec<String>,

        /// Maximum candidates accepted per category
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Process queued jobs until no claimable work remains
    Worker {
        /// Maximum concurrent jobs (1-64)
        #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=64))]
        concurrency: Option<u8>,

        /// Maximum job starts per minute (0 to disable)
        #[arg(short = 'l', long)]
        rate_limit: Option<usize>,
    },

    /// Show queue and catalog counts
    Status,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_worker_defaults_parse() {
        let args = Args::try_parse_from(["libharvest", "worker"]).unwrap();
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert!(matches!(
            args.command,
            Command::Worker {
                concurrency: None,
                rate_limit: None
            }
        ));
    }

    #[test]
    fn test_cli_populate_categories_repeatable() {
        let args =
            Args::try_parse_from(["libharvest", "populate", "-C", "JR", "-C", "MAP", "-n", "5"])
                .unwrap();
        let Command::Populate { categories, limit } = args.command else {
            panic!("expected populate");
        };
        assert_eq!(categories, vec!["JR".to_string(), "MAP".to_string()]);
        assert_eq!(limit, Some(5));
    }

    #[test]
    fn test_cli_worker_concurrency_bounds() {
        let args = Args::try_parse_from(["libharvest", "worker", "-c", "64"]).unwrap();
        assert!(matches!(
            args.command,
            Command::Worker {
                concurrency: Some(64),
                ..
            }
        ));

        let result = Args::try_parse_from(["libharvest", "worker", "-c", "0"]);
        assert_eq!(
            result.unwrap_err().kind(),
            clap::error::ErrorKind::ValueValidation
        );
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let args = Args::try_parse_from(["libharvest", "status", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
        assert!(matches!(args.command, Command::Status));
    }

    #[test]
    fn test_cli_missing_subcommand_rejected() {
        let result = Args::try_parse_from(["libharvest"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let result = Args::try_parse_from(["libharvest", "--help"]);
        assert_eq!(
            result.unwrap_err().kind(),
            clap::error::ErrorKind::DisplayHelp
        );
    }
}
