use crate::error::ArchiveError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Global,
    Country,
}

/// Everything that differs between the two partitions.
#[derive(Debug, Clone, Copy)]
pub struct ScopeSpec {
    pub name: &'static str,
    pub table: &'static str,
    pub sql: &'static str,
    pub columns: &'static [&'static str],
    pub dir_name: &'static str,
}

const GLOBAL_SQL: &str = "SELECT DISTINCT origin, experimental.popularity.rank AS rank
FROM `chrome-ux-report.experimental.global`
WHERE yyyymm = ? AND experimental.popularity.rank <= 1000000
GROUP BY origin, experimental.popularity.rank
ORDER BY rank";

const COUNTRY_SQL: &str = "SELECT DISTINCT country_code, origin, experimental.popularity.rank AS rank
FROM `chrome-ux-report.experimental.country`
WHERE yyyymm = ? AND experimental.popularity.rank <= 1000000
GROUP BY country_code, origin, experimental.popularity.rank
ORDER BY country_code, rank";

const GLOBAL: ScopeSpec = ScopeSpec {
    name: "global",
    table: "chrome-ux-report.experimental.global",
    sql: GLOBAL_SQL,
    columns: &["origin", "rank"],
    dir_name: "global",
};

const COUNTRY: ScopeSpec = ScopeSpec {
    name: "country",
    table: "chrome-ux-report.experimental.country",
    sql: COUNTRY_SQL,
    columns: &["country_code", "origin", "rank"],
    dir_name: "country",
};

impl Scope {
    pub const ALL: [Scope; 2] = [Scope::Global, Scope::Country];

    pub fn spec(self) -> &'static ScopeSpec {
        match self {
            Scope::Global => &GLOBAL,
            Scope::Country => &COUNTRY,
        }
    }

    pub fn label(self) -> &'static str {
        self.spec().name
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Scope {
    type Err = ArchiveError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "global" => Ok(Scope::Global),
            "country" => Ok(Scope::Country),
            other => Err(ArchiveError::Configuration(format!(
                "unknown scope `{other}`; use `global` or `country`"
            ))),
        }
    }
}
