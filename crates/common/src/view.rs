//! Observable row views
//!
//! A [`RowSource`] is anything the poller can re-read: the rendered contact
//! table in a browser, or the store queried directly.

use std::collections::BTreeMap;

use crate::store::FixtureStore;
use crate::Result;

/// One observed row: column name to displayed text
pub type Row = BTreeMap<String, String>;

/// Re-readable source of row snapshots
pub trait RowSource {
    /// Re-read the underlying view (reload a page, re-run a query)
    fn refresh(&mut self) -> Result<()>;

    /// Sample the current rows
    fn query_rows(&mut self) -> Result<Vec<Row>>;
}

/// Rows read straight from a store table
pub struct StoreView<'a, S: FixtureStore + ?Sized> {
    store: &'a S,
    table: String,
}

impl<'a, S: FixtureStore + ?Sized> StoreView<'a, S> {
    pub fn new(store: &'a S, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
        }
    }
}

impl<S: FixtureStore + ?Sized> RowSource for StoreView<'_, S> {
    fn refresh(&mut self) -> Result<()> {
        Ok(())
    }

    fn query_rows(&mut self) -> Result<Vec<Row>> {
        self.store.query_all(&self.table)
    }
}

/// Build a row from column/value pairs
pub fn row<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Row
where
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
