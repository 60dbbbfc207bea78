use anyhow::Result;
use clap::{Parser, ValueHint};
use std::path::PathBuf;

use crate::commands::sync::{self, SyncOptions};

#[derive(Parser, Debug)]
#[command(name = "crux-archiver")]
#[command(version)]
#[command(about = "Download CrUX top lists aggregated by month")]
#[command(long_about = "Download CrUX top lists aggregated by month.

Every month from 2021-02 through last month that has no <dir>/global/YYYYMM.csv.gz
is queried from BigQuery, written as gzip CSV, and the newest month is copied
to <dir>/global/current.csv.gz.")]
pub struct Cli {
    /// Data directory holding the global/ and country/ archives
    #[arg(value_hint = ValueHint::DirPath)]
    pub directory: PathBuf,

    /// Google credentials JSON (service account or authorized user); ambient credentials when omitted
    #[arg(long = "credential-file", value_hint = ValueHint::FilePath)]
    pub credential_file: Option<PathBuf>,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let report = sync::run(&SyncOptions {
        data_dir: cli.directory,
        credential_file: cli.credential_file,
    })?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.render_text());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::Cli;
    use clap::{CommandFactory, Parser};
    use std::path::PathBuf;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn credential_file_is_optional() {
        let cli = Cli::try_parse_from(["crux-archiver", "/data"]).expect("parse");
        assert_eq!(cli.directory, PathBuf::from("/data"));
        assert!(cli.credential_file.is_none());

        let cli = Cli::try_parse_from([
            "crux-archiver",
            "/data",
            "--credential-file",
            "/keys/sa.json",
        ])
        .expect("parse");
        assert_eq!(cli.credential_file, Some(PathBuf::from("/keys/sa.json")));
    }

    #[test]
    fn directory_is_required() {
        assert!(Cli::try_parse_from(["crux-archiver"]).is_err());
    }
}
