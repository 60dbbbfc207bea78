use crate::crux::month::YearMonth;
use crate::crux::scope::Scope;
use anyhow::Result;

/// Tabular result of one month's query, in the query's column and row order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ResultSet {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Executes the scope's fixed query for one month.
pub trait MonthQuery {
    fn fetch(&self, scope: Scope, month: YearMonth) -> Result<ResultSet>;
}
