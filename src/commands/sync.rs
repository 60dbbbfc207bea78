use anyhow::Result;
use chrono::Local;
use std::path::PathBuf;

use crate::bigquery::auth::CredentialSource;
use crate::bigquery::client::BigQueryClient;
use crate::commands::CommandReport;
use crate::crux::archive::ArchiveManager;
use crate::crux::config::load_config;
use crate::crux::lock::DataDirLock;
use crate::crux::paths::{ArchivePaths, CURRENT_FILE_NAME};

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub data_dir: PathBuf,
    pub credential_file: Option<PathBuf>,
}

fn join_list<T: std::fmt::Display>(items: &[T]) -> String {
    if items.is_empty() {
        return "-".to_string();
    }
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// One full pass: download every missing month, then refresh `current.csv.gz`.
pub fn run(opts: &SyncOptions) -> Result<CommandReport> {
    let cfg = load_config()?;
    let paths = ArchivePaths::new(&opts.data_dir);
    let mut report = CommandReport::new("sync");

    let inline = if opts.credential_file.is_none() {
        cfg.inline_credentials.as_deref()
    } else {
        None
    };
    let source = CredentialSource::from_inputs(opts.credential_file.clone(), inline, true)?;

    let client = BigQueryClient::new(source, cfg.bigquery.clone())?;
    let lock = DataDirLock::acquire(&paths)?;
    let manager = ArchiveManager::new(paths).with_scopes(cfg.archive.scopes.clone());

    report.detail(format!("data_dir={}", manager.paths().data_dir.display()));
    report.detail(format!("lock_file={}", lock.path().display()));
    report.detail(format!("credentials={}", client.credential_label()));
    report.detail(format!("scopes={}", join_list(manager.scopes())));

    let outcomes = manager.download(&client, &Local::now())?;
    for outcome in &outcomes {
        let scope = outcome.scope;
        report.detail(format!("{scope}.missing={}", join_list(&outcome.missing)));
        for archived in &outcome.archived {
            report.detail(format!(
                "{scope}.archived={} rows={} path={}",
                archived.month,
                archived.rows,
                archived.path.display()
            ));
        }
        report.detail(format!(
            "{scope}.skipped_empty={}",
            join_list(&outcome.skipped_empty)
        ));
    }

    let current = manager.update_current(CURRENT_FILE_NAME)?;
    report.detail(format!("current.month={}", current.month));
    report.detail(format!("current.source={}", current.source.display()));
    report.detail(format!("current.path={}", current.dest.display()));
    report.detail(format!("current.bytes={}", current.bytes));
    report.detail(format!("current.sha256={}", current.sha256));

    drop(lock);
    Ok(report)
}
