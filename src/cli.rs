use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::scoring::FocusCountPolicy;

/// Command line configuration for the simulated proctoring session.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct CliArgs {
    /// How long to monitor before ending the session, in seconds.
    #[arg(long, default_value_t = 30)]
    pub duration_secs: u64,
    /// Seed for the demo classifier and probe (reproducible runs).
    #[arg(long)]
    pub seed: Option<u64>,
    /// Candidate identifier; a random UUID when omitted.
    #[arg(long)]
    pub candidate_id: Option<String>,
    #[arg(long, default_value = "Demo Candidate")]
    pub candidate_name: String,
    #[arg(long, default_value = "candidate@example.com")]
    pub candidate_email: String,
    /// Settings file (camelCase JSON); defaults apply when it does not exist.
    #[arg(long, default_value = "proctor-settings.json")]
    pub settings: PathBuf,
    /// SQLite journal; overrides `journalPath` from the settings file.
    #[arg(long)]
    pub journal: Option<PathBuf>,
    /// Also deliver events and stats to the HTTP backend at `apiBaseUrl`.
    #[arg(long, default_value_t = false)]
    pub report_http: bool,
    /// Override the focus-loss counting policy.
    #[arg(long, value_enum)]
    pub focus_policy: Option<PolicyArg>,
    /// Write the settings, with command line overrides applied, back to `--settings`.
    #[arg(long, default_value_t = false)]
    pub save_settings: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyArg {
    Edge,
    Level,
}

impl From<PolicyArg> for FocusCountPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Edge => FocusCountPolicy::EdgeTriggered,
            PolicyArg::Level => FocusCountPolicy::LevelTriggered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_defaults_and_overrides() {
        let args = CliArgs::parse_from(["proctor-watch"]);
        assert_eq!(args.duration_secs, 30);
        assert!(!args.report_http);
        assert!(args.focus_policy.is_none());
        assert!(!args.save_settings);

        let args = CliArgs::parse_from([
            "proctor-watch",
            "--duration-secs",
            "5",
            "--seed",
            "9",
            "--focus-policy",
            "level",
            "--report-http",
        ]);
        assert_eq!(args.duration_secs, 5);
        assert_eq!(args.seed, Some(9));
        assert_eq!(
            args.focus_policy.map(FocusCountPolicy::from),
            Some(FocusCountPolicy::LevelTriggered)
        );
        assert!(args.report_http);
    }
}
