//! The rendered contact table as a row source

use crudcheck_common::{Error, Row, RowSource};

use crate::error::E2eResult;
use crate::session::Session;
use crate::webdriver::Locator;

/// Fewer cells than this is a placeholder row ("no data"), not a record
const MIN_CELLS: usize = 2;

/// Column key for a header cell. Blank headers (action columns) get a
/// positional name.
pub fn column_key(header: &str, index: usize) -> String {
    let key = header.trim().to_lowercase();
    if key.is_empty() {
        format!("col{}", index)
    } else {
        key
    }
}

/// Zip header keys with cell texts. Cells beyond the header get positional
/// keys.
pub fn rows_from_cells(headers: &[String], cells: Vec<Vec<String>>) -> Vec<Row> {
    cells
        .into_iter()
        .filter(|row| row.len() >= MIN_CELLS)
        .map(|row| {
            row.into_iter()
                .enumerate()
                .map(|(i, text)| {
                    let key = headers
                        .get(i)
                        .map(|h| column_key(h, i))
                        .unwrap_or_else(|| format!("col{}", i));
                    (key, text.trim().to_string())
                })
                .collect()
        })
        .collect()
}

/// Reads the first `<table>` on the current page
pub struct TableView<'s> {
    session: &'s Session,
    header_selector: Locator,
    row_selector: Locator,
}

impl<'s> TableView<'s> {
    pub fn new(session: &'s Session) -> Self {
        Self {
            session,
            header_selector: Locator::css("table thead th"),
            row_selector: Locator::css("table tbody tr"),
        }
    }

    /// Header texts as rendered
    pub fn headers(&self) -> E2eResult<Vec<String>> {
        self.session
            .find_all(&self.header_selector)?
            .iter()
            .map(|th| th.text())
            .collect()
    }

    pub fn rows(&self) -> E2eResult<Vec<Row>> {
        let headers = self.headers()?;
        let mut cells = Vec::new();
        for tr in self.session.find_all(&self.row_selector)? {
            let texts = tr
                .find_all_within(&Locator::tag("td"))?
                .iter()
                .map(|td| td.text())
                .collect::<E2eResult<Vec<String>>>()?;
            cells.push(texts);
        }
        Ok(rows_from_cells(&headers, cells))
    }

    /// Resolved link targets in data row `index`, e.g. its edit and delete
    /// actions
    pub fn row_links(&self, index: usize) -> E2eResult<Vec<String>> {
        let mut rows = Vec::new();
        for tr in self.session.find_all(&self.row_selector)? {
            if tr.find_all_within(&Locator::tag("td"))?.len() >= MIN_CELLS {
                rows.push(tr);
            }
        }

        let Some(tr) = rows.get(index) else {
            return Ok(Vec::new());
        };

        let mut links = Vec::new();
        for a in tr.find_all_within(&Locator::tag("a"))? {
            if let Some(href) = a.property("href")? {
                links.push(href);
            }
        }
        Ok(links)
    }

    /// First link in row `index` whose target contains `pattern`
    pub fn row_link(&self, index: usize, pattern: &str) -> E2eResult<Option<String>> {
        Ok(self
            .row_links(index)?
            .into_iter()
            .find(|href| href.contains(pattern)))
    }

    /// Wait until the table has rendered at least one row
    pub fn wait_until_loaded(&self) -> E2eResult<()> {
        self.session.wait_for_all(&self.row_selector)?;
        Ok(())
    }
}

impl RowSource for TableView<'_> {
    fn refresh(&mut self) -> crudcheck_common::Result<()> {
        self.session.refresh().map_err(|e| Error::View(e.to_string()))
    }

    fn query_rows(&mut self) -> crudcheck_common::Result<Vec<Row>> {
        self.rows().map_err(|e| Error::View(e.to_string()))
    }
}
