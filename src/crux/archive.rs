use crate::crux::artifact;
use crate::crux::audit;
use crate::crux::month::{MIN_MONTH, YearMonth, valid_months};
use crate::crux::paths::ArchivePaths;
use crate::crux::query::{MonthQuery, ResultSet};
use crate::crux::scope::Scope;
use crate::crux::util::file_sha256;
use crate::error::ArchiveError;
use crate::logging::{self, WarnEvent};
use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// What a scope directory holds, as far as the naming convention can tell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirListing {
    /// Months with a `YYYYMM.csv.gz` artifact.
    pub archived: BTreeSet<YearMonth>,
    /// Months with only a `YYYYMM.csv` left behind by an interrupted run.
    pub orphaned_plain: BTreeSet<YearMonth>,
}

#[derive(Debug, Clone)]
pub struct ArchivedMonth {
    pub month: YearMonth,
    pub rows: usize,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ScopeSyncOutcome {
    pub scope: Scope,
    pub missing: Vec<YearMonth>,
    pub archived: Vec<ArchivedMonth>,
    pub skipped_empty: Vec<YearMonth>,
}

#[derive(Debug, Clone)]
pub struct CurrentOutcome {
    pub month: YearMonth,
    pub source: PathBuf,
    pub dest: PathBuf,
    pub bytes: u64,
    pub sha256: String,
}

/// The month `name` is the artifact for, if it is exactly `file_name(month)`.
fn data_file_month(name: &str, file_name: fn(YearMonth) -> String) -> Option<YearMonth> {
    if !name.starts_with('2') {
        return None;
    }
    let month = YearMonth::parse_prefix(name)?;
    (name == file_name(month)).then_some(month)
}

/// Lists a scope directory. Only exact `YYYYMM.csv.gz` and `YYYYMM.csv` names
/// count; `current.csv.gz`, dotfiles and `202103-partial.csv.gz` style names
/// are foreign and ignored.
pub fn list_dir(dir: &Path) -> Result<DirListing> {
    let mut out = DirListing::default();
    if !dir.exists() {
        return Ok(out);
    }
    let mut plain = BTreeSet::new();
    for entry in fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(month) = data_file_month(name, artifact::compressed_name) {
            out.archived.insert(month);
        } else if let Some(month) = data_file_month(name, artifact::plain_name) {
            plain.insert(month);
        }
    }
    out.orphaned_plain = plain.difference(&out.archived).copied().collect();
    Ok(out)
}

pub fn existing_months(dir: &Path) -> Result<BTreeSet<YearMonth>> {
    Ok(list_dir(dir)?.archived)
}

pub fn missing_months(
    valid: &BTreeSet<YearMonth>,
    existing: &BTreeSet<YearMonth>,
) -> BTreeSet<YearMonth> {
    valid.difference(existing).copied().collect()
}

#[derive(Debug, Clone)]
pub struct ArchiveManager {
    paths: ArchivePaths,
    scopes: Vec<Scope>,
    floor: YearMonth,
}

impl ArchiveManager {
    pub fn new(paths: ArchivePaths) -> Self {
        Self {
            paths,
            scopes: vec![Scope::Global],
            floor: MIN_MONTH,
        }
    }

    pub fn with_scopes(mut self, scopes: Vec<Scope>) -> Self {
        self.scopes = scopes;
        self
    }

    pub fn paths(&self) -> &ArchivePaths {
        &self.paths
    }

    pub fn scopes(&self) -> &[Scope] {
        &self.scopes
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for scope in Scope::ALL {
            let dir = self.paths.scope_dir(scope);
            fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }

    /// Months in the valid range that have no artifact in `scope`'s directory.
    pub fn plan<Tz: TimeZone>(&self, scope: Scope, now: &DateTime<Tz>) -> Result<Vec<YearMonth>> {
        let dir = self.paths.scope_dir(scope);
        let listing = list_dir(dir)?;
        for month in &listing.orphaned_plain {
            let path = dir.join(artifact::plain_name(*month));
            logging::warn(WarnEvent {
                code: "ORPHAN_PLAIN_FILE",
                scope: scope.label(),
                month: &month.to_string(),
                path: &path.display().to_string(),
                reason: "plain csv without compressed artifact; month will be refetched",
            });
        }
        let valid = valid_months(self.floor, now);
        Ok(missing_months(&valid, &listing.archived).into_iter().collect())
    }

    /// Writes one month's rows and compresses them into the scope directory.
    pub fn archive_month(
        &self,
        scope: Scope,
        month: YearMonth,
        rows: &ResultSet,
    ) -> Result<PathBuf> {
        let dir = self.paths.scope_dir(scope);
        let plain = dir.join(artifact::plain_name(month));
        artifact::write_csv(&plain, rows)?;
        let compressed = artifact::gzip_and_remove(&plain)?;
        Ok(compressed)
    }

    pub fn download<Q, Tz>(&self, client: &Q, now: &DateTime<Tz>) -> Result<Vec<ScopeSyncOutcome>>
    where
        Q: MonthQuery + ?Sized,
        Tz: TimeZone,
    {
        self.ensure_directories()?;

        let mut outcomes = Vec::new();
        for scope in &self.scopes {
            let scope = *scope;
            let missing = self.plan(scope, now)?;
            logging::debug(&format!(
                "{scope}: {} missing month(s) in {}",
                missing.len(),
                self.paths.scope_dir(scope).display()
            ));

            let mut outcome = ScopeSyncOutcome {
                scope,
                missing: missing.clone(),
                archived: Vec::new(),
                skipped_empty: Vec::new(),
            };

            for month in missing {
                logging::progress(&format!("Fetching {scope} {month}"));
                let rows = client
                    .fetch(scope, month)
                    .with_context(|| format!("failed to fetch {scope} {month}"))?;

                if rows.is_empty() {
                    logging::warn(WarnEvent {
                        code: "EMPTY_MONTH",
                        scope: scope.label(),
                        month: &month.to_string(),
                        path: &self.paths.scope_dir(scope).display().to_string(),
                        reason: "query returned no rows; month stays missing",
                    });
                    audit::append_event(
                        &self.paths,
                        "fetch",
                        "skipped",
                        &format!("{scope} {month} returned no rows"),
                    )?;
                    outcome.skipped_empty.push(month);
                    continue;
                }

                let path = self.archive_month(scope, month, &rows)?;
                audit::append_event(
                    &self.paths,
                    "fetch",
                    "ok",
                    &format!("{scope} {month} rows={} path={}", rows.len(), path.display()),
                )?;
                outcome.archived.push(ArchivedMonth {
                    month,
                    rows: rows.len(),
                    path,
                });
            }

            outcomes.push(outcome);
        }

        Ok(outcomes)
    }

    /// Copies the newest global artifact to `dest_name` in the global directory.
    pub fn update_current(&self, dest_name: &str) -> Result<CurrentOutcome> {
        let dir = &self.paths.global_dir;
        let Some(month) = existing_months(dir)?.into_iter().next_back() else {
            return Err(ArchiveError::NoArchive(dir.clone()).into());
        };

        let source = dir.join(artifact::compressed_name(month));
        let dest = dir.join(dest_name);
        let bytes = artifact::copy_replace(&source, &dest)?;
        let sha256 = file_sha256(&dest)?;
        audit::append_event(
            &self.paths,
            "promote",
            "ok",
            &format!("{} <- {} sha256={sha256}", dest.display(), source.display()),
        )?;

        Ok(CurrentOutcome {
            month,
            source,
            dest,
            bytes,
            sha256,
        })
    }
}
