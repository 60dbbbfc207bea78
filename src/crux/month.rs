use anyhow::{Result, anyhow};
use chrono::{DateTime, Datelike, TimeZone};
use std::collections::BTreeSet;
use std::fmt;

/// Oldest month published in the popularity tables.
pub const MIN_MONTH: YearMonth = YearMonth { year: 2021, month: 2 };

/// One archival period. Ordered by `(year, month)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            return Err(anyhow!("invalid month {month} for year {year}"));
        }
        if !(0..=9999).contains(&year) {
            return Err(anyhow!("year {year} does not fit YYYYMM"));
        }
        Ok(Self { year, month })
    }

    pub fn of<Tz: TimeZone>(at: &DateTime<Tz>) -> Self {
        Self {
            year: at.year(),
            month: at.month(),
        }
    }

    pub fn next(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    pub fn previous(self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    /// Integer form bound to the `yyyymm` query parameter, e.g. `202305`.
    pub fn as_param(self) -> i64 {
        i64::from(self.year) * 100 + i64::from(self.month)
    }

    /// Parses the leading `YYYYMM` of a name such as `202305.csv.gz`.
    pub fn parse_prefix(name: &str) -> Option<Self> {
        let digits = name.get(0..6)?;
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let year = digits[0..4].parse::<i32>().ok()?;
        let month = digits[4..6].parse::<u32>().ok()?;
        Self::new(year, month).ok()
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}{:02}", self.year, self.month)
    }
}

/// Every month from `floor` through the month before `now`, inclusive.
pub fn valid_months<Tz: TimeZone>(floor: YearMonth, now: &DateTime<Tz>) -> BTreeSet<YearMonth> {
    let last = YearMonth::of(now).previous();
    let mut out = BTreeSet::new();
    let mut cursor = floor;
    while cursor <= last {
        out.insert(cursor);
        cursor = cursor.next();
    }
    out
}
