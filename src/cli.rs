use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Args {
    /// Calibrate raw records and persist the dataset
    #[arg(long, default_value_t = false)]
    pub process: bool,

    /// Reduce the persisted dataset and write report tables
    #[arg(long, default_value_t = false)]
    pub report: bool,

    /// Path to config TOML
    #[arg(long, default_value = "phasediff.toml")]
    pub config: PathBuf,
}

impl Args {
    /// `(process, report)`; both when neither flag is given.
    pub fn steps(&self) -> (bool, bool) {
        if !self.process && !self.report {
            (true, true)
        } else {
            (self.process, self.report)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_flags_runs_both_steps() {
        let args = Args::parse_from(["phasediff"]);
        assert_eq!(args.steps(), (true, true));
        assert_eq!(args.config, PathBuf::from("phasediff.toml"));
    }

    #[test]
    fn single_flag_runs_one_step() {
        let args = Args::parse_from(["phasediff", "--report", "--config", "x.toml"]);
        assert_eq!(args.steps(), (false, true));
        assert_eq!(args.config, PathBuf::from("x.toml"));
    }
}
