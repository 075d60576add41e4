//! Fixture snapshots: the seed content a table must hold after a reset

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::view::Row;
use crate::{Error, Result};

/// Table seeded by the default snapshot
pub const CONTACTS_TABLE: &str = "contacts";

/// One seed record: column name to value
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(BTreeMap<String, String>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(column.into(), value.into());
        self
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.0.get(column).map(String::as_str)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether every column of this record has the same value in `row`
    pub fn matches(&self, row: &Row) -> bool {
        self.iter()
            .all(|(column, value)| row.get(column).map(String::as_str) == Some(value))
    }
}

/// Ordered seed content for one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureSnapshot {
    pub table: String,

    #[serde(default)]
    pub records: Vec<Record>,
}

impl Default for FixtureSnapshot {
    fn default() -> Self {
        Self::contacts()
    }
}

impl FixtureSnapshot {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            records: Vec::new(),
        }
    }

    pub fn record(mut self, record: Record) -> Self {
        self.records.push(record);
        self
    }

    /// The three-contact seed every scenario starts from unless it declares
    /// otherwise
    pub fn contacts() -> Self {
        let seed = [
            ("John Doe", "john.doe@email.com", "08123456789", "Software Engineer", "2023-01-15 10:00:00"),
            ("Jane Smith", "jane.smith@email.com", "08987654321", "Product Manager", "2023-01-16 11:00:00"),
            ("Bob Johnson", "bob.johnson@email.com", "08111111111", "QA Engineer", "2023-01-17 12:00:00"),
        ];

        seed.into_iter()
            .fold(Self::new(CONTACTS_TABLE), |snapshot, (name, email, phone, title, created)| {
                snapshot.record(
                    Record::new()
                        .with("name", name)
                        .with("email", email)
                        .with("phone", phone)
                        .with("title", title)
                        .with("created", created),
                )
            })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Load a snapshot file; `.yaml`/`.yml` is YAML, anything else TOML.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let snapshot = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content)?,
            _ => Self::from_toml_str(&content)?,
        };
        if snapshot.table.trim().is_empty() {
            return Err(Error::InvalidConfig(format!(
                "snapshot {} names no table",
                path.display()
            )));
        }
        Ok(snapshot)
    }

    /// Whether `rows` are the snapshot's records as a multiset. Each record
    /// is compared on its own columns only, so extra store columns such as
    /// generated ids or defaulted fields are ignored.
    pub fn matches_rows(&self, rows: &[Row]) -> bool {
        if rows.len() != self.records.len() {
            return false;
        }

        // Record index claiming each row
        let mut claimed: Vec<Option<usize>> = vec![None; rows.len()];
        (0..self.records.len()).all(|record| {
            let mut visited = vec![false; rows.len()];
            self.claim_row(record, rows, &mut claimed, &mut visited)
        })
    }

    /// Find a row for `record`, moving earlier claims along when needed
    fn claim_row(
        &self,
        record: usize,
        rows: &[Row],
        claimed: &mut [Option<usize>],
        visited: &mut [bool],
    ) -> bool {
        for (i, row) in rows.iter().enumerate() {
            if visited[i] || !self.records[record].matches(row) {
                continue;
            }
            visited[i] = true;

            let free = match claimed[i] {
                None => true,
                Some(other) => self.claim_row(other, rows, claimed, visited),
            };
            if free {
                claimed[i] = Some(record);
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::row;

    #[test]
    fn test_default_contacts() {
        let snapshot = FixtureSnapshot::default();
        assert_eq!(snapshot.table, "contacts");
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot.records[0].get("name"), Some("John Doe"));
        assert_eq!(snapshot.records[2].get("title"), Some("QA Engineer"));
    }

    #[test]
    fn test_parse_toml() {
        let snapshot = FixtureSnapshot::from_toml_str(
            r#"
table = "contacts"

[[records]]
name = "Alice Brown"
email = "alice.brown@example.com"

[[records]]
name = "Charlie Wilson"
email = "charlie.wilson@example.com"
"#,
        )
        .unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.records[1].get("email"), Some("charlie.wilson@example.com"));
    }

    #[test]
    fn test_parse_yaml() {
        let snapshot = FixtureSnapshot::from_yaml_str(
            r#"
table: contacts
records:
  - name: Alice Brown
    email: alice.brown@example.com
"#,
        )
        .unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.records[0].get("name"), Some("Alice Brown"));
    }

    #[test]
    fn test_matches_rows_ignores_order_and_extra_columns() {
        let snapshot = FixtureSnapshot::new("contacts")
            .record(Record::new().with("name", "A").with("email", "a@x"))
            .record(Record::new().with("name", "B").with("email", "b@x"));

        let rows = vec![
            row([("id", "7"), ("name", "B"), ("email", "b@x")]),
            row([("id", "6"), ("name", "A"), ("email", "a@x")]),
        ];
        assert!(snapshot.matches_rows(&rows));

        let extra = vec![rows[0].clone(), rows[1].clone(), rows[1].clone()];
        assert!(!snapshot.matches_rows(&extra));

        let changed = vec![rows[0].clone(), row([("id", "6"), ("name", "A"), ("email", "changed@x")])];
        assert!(!snapshot.matches_rows(&changed));
    }

    #[test]
    fn test_matches_rows_with_mixed_columns() {
        let snapshot = FixtureSnapshot::new("contacts")
            .record(Record::new().with("name", "A").with("email", "a@x"))
            .record(Record::new().with("name", "B").with("email", "b@x").with("phone", "1"));

        let rows = vec![
            row([("id", "1"), ("name", "A"), ("email", "a@x"), ("phone", "")]),
            row([("id", "2"), ("name", "B"), ("email", "b@x"), ("phone", "1")]),
        ];
        assert!(snapshot.matches_rows(&rows));

        let wrong_phone = vec![rows[0].clone(), row([("name", "B"), ("email", "b@x"), ("phone", "")])];
        assert!(!snapshot.matches_rows(&wrong_phone));
    }

    #[test]
    fn test_matches_rows_reassigns_greedy_claims() {
        // The less specific record first claims the row the specific one needs
        let snapshot = FixtureSnapshot::new("contacts")
            .record(Record::new().with("name", "A"))
            .record(Record::new().with("name", "A").with("phone", "1"));

        let rows = vec![
            row([("name", "A"), ("phone", "1")]),
            row([("name", "A"), ("phone", "")]),
        ];
        assert!(snapshot.matches_rows(&rows));

        let both_blank = vec![rows[1].clone(), rows[1].clone()];
        assert!(!snapshot.matches_rows(&both_blank));
    }
}
