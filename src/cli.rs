//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use chanfetch_core::media::{DEFAULT_API_BASE, DEFAULT_CDN_BASE};
use chanfetch_core::{DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES, Settings};

/// Archive media from image board threads, catalogs and boards.
///
/// Pass one or more board URLs (or pipe them via stdin). Files land in
/// `<output>/<board>-<thread>/`, videos in a `WEBM/` subfolder, and content
/// already archived in an earlier session is skipped.
#[derive(Parser, Debug)]
#[command(name = "chanfetch")]
#[command(author, version, about)]
pub struct Args {
    /// Thread, catalog or board URLs
    pub urls: Vec<String>,

    /// Output directory
    #[arg(short = 'o', long, default_value = "downloads")]
    pub output: PathBuf,

    /// Ledger database path (default: <output>/.chanfetch/ledger.db)
    #[arg(long)]
    pub ledger: Option<PathBuf>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Maximum concurrent downloads (1-100)
    #[arg(short = 'c', long, default_value_t = DEFAULT_CONCURRENCY as u8, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: u8,

    /// Maximum attempts for transient failures (1-10)
    #[arg(short = 'r', long, default_value_t = DEFAULT_MAX_RETRIES as u8, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub max_retries: u8,

    /// Minimum delay between requests in milliseconds (0 to disable, max 60000)
    #[arg(short = 'l', long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub rate_limit: u64,

    /// Upper bound for the adaptive request delay in seconds
    #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub max_delay: u64,

    /// Threads fetched per catalog or board (0 downloads catalog OP files only)
    #[arg(long)]
    pub catalog_threads: Option<usize>,

    /// Free space required on the output volume in MiB (0 to disable)
    #[arg(long, default_value_t = 100)]
    pub min_free_space: u64,

    /// Base URL of the JSON API
    #[arg(long, default_value = DEFAULT_API_BASE)]
    pub api_base: String,

    /// Base URL of the media CDN
    #[arg(long, default_value = DEFAULT_CDN_BASE)]
    pub cdn_base: String,
}

impl Args {
    /// Maps the flags onto session settings.
    #[must_use]
    pub fn settings(&self) -> Settings {
        let mut settings = Settings::with_output_dir(&self.output);
        settings.ledger_path.clone_from(&self.ledger);
        settings.concurrency = usize::from(self.concurrency);
        settings.max_attempts = u32::from(self.max_retries);
        settings.min_delay = Duration::from_millis(self.rate_limit);
        settings.max_delay = Duration::from_secs(self.max_delay);
        settings.catalog_thread_limit = self.catalog_threads;
        settings.min_free_space_mb = self.min_free_space;
        settings.api_base.clone_from(&self.api_base);
        settings.cdn_base.clone_from(&self.cdn_base);
        settings
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default_args_parses_successfully() {
        let args = Args::try_parse_from(["chanfetch"]).unwrap();
        assert!(args.urls.is_empty());
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert_eq!(args.concurrency, 5); // DEFAULT_CONCURRENCY
        assert_eq!(args.max_retries, 3); // DEFAULT_MAX_RETRIES
        assert_eq!(args.rate_limit, 1000);
        assert_eq!(args.output, PathBuf::from("downloads"));
        assert_eq!(args.api_base, "https://a.4cdn.org");
    }

    #[test]
    fn test_cli_positional_urls() {
        let args = Args::try_parse_from([
            "chanfetch",
            "https://boards.4chan.org/g/thread/1",
            "https://boards.4chan.org/wsg/catalog",
        ])
        .unwrap();
        assert_eq!(args.urls.len(), 2);
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["chanfetch", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["chanfetch", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_concurrency_bounds() {
        assert_eq!(
            Args::try_parse_from(["chanfetch", "-c", "100"]).unwrap().concurrency,
            100
        );
        let err = Args::try_parse_from(["chanfetch", "-c", "0"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
        let err = Args::try_parse_from(["chanfetch", "--concurrency", "101"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_rate_limit_bounds() {
        assert_eq!(
            Args::try_parse_from(["chanfetch", "-l", "0"]).unwrap().rate_limit,
            0
        );
        let err = Args::try_parse_from(["chanfetch", "-l", "60001"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_settings_mapping() {
        let args = Args::try_parse_from([
            "chanfetch",
            "-o",
            "/archive",
            "-c",
            "8",
            "-r",
            "4",
            "-l",
            "0",
            "--max-delay",
            "30",
            "--catalog-threads",
            "2",
            "--ledger",
            "/tmp/l.db",
            "--min-free-space",
            "0",
        ])
        .unwrap();
        let settings = args.settings();
        assert_eq!(settings.output_dir, PathBuf::from("/archive"));
        assert_eq!(settings.concurrency, 8);
        assert_eq!(settings.max_attempts, 4);
        assert_eq!(settings.min_delay, Duration::ZERO);
        assert_eq!(settings.max_delay, Duration::from_secs(30));
        assert_eq!(settings.catalog_thread_limit, Some(2));
        assert_eq!(settings.ledger_path(), PathBuf::from("/tmp/l.db"));
        assert_eq!(settings.min_free_space_mb, 0);
    }
}
