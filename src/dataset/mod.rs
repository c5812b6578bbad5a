//! Tracked bridge elements sourced from the shared construction sheet.
//!
//! Modules:
//! - source: fetches raw export bytes (HTTP in production)
//! - decode: turns CSV/XLSX bytes into typed records
//! - cache: TTL cache owning the current dataset snapshot

pub mod cache;
pub mod decode;
pub mod source;

use chrono::{DateTime, NaiveDate, Utc};

/// A lab test checkpoint measured in days since the pour date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Milestone {
    D7,
    D14,
    D28,
}

impl Milestone {
    pub const ALL: [Milestone; 3] = [Milestone::D7, Milestone::D14, Milestone::D28];

    /// Days after pouring when the test becomes due
    pub fn threshold_days(self) -> i64 {
        match self {
            Milestone::D7 => 7,
            Milestone::D14 => 14,
            Milestone::D28 => 28,
        }
    }

    /// Label used in rendered reports
    pub fn label(self) -> &'static str {
        match self {
            Milestone::D7 => "7 días",
            Milestone::D14 => "14 días",
            Milestone::D28 => "28 días",
        }
    }

    fn index(self) -> usize {
        match self {
            Milestone::D7 => 0,
            Milestone::D14 => 1,
            Milestone::D28 => 2,
        }
    }
}

/// Raw milestone cells, in `Milestone::ALL` order. `None` means the cell was
/// missing or empty; any other text is kept verbatim for the report policy
/// to classify.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestResults([Option<String>; 3]);

impl TestResults {
    pub fn new(d7: Option<String>, d14: Option<String>, d28: Option<String>) -> Self {
        Self([d7, d14, d28])
    }

    pub fn get(&self, milestone: Milestone) -> Option<&str> {
        self.0[milestone.index()].as_deref()
    }
}

/// One tracked structural sub-element.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub project_id: String,
    pub support_id: String,
    pub element_kind: String,
    pub element_number: String,
    pub pour_date: Option<NaiveDate>,
    pub test_results: TestResults,
    pub progress_percent: Option<String>,
    /// Folded `project_id`, only used for lookups
    pub normalized_key: String,
}

impl Record {
    /// "Zapata 3", "Zapata", "3" or "" depending on what the sheet filled in
    pub fn element_label(&self) -> String {
        match (self.element_kind.trim(), self.element_number.trim()) {
            ("", "") => String::new(),
            (kind, "") => kind.to_string(),
            ("", number) => number.to_string(),
            (kind, number) => format!("{} {}", kind, number),
        }
    }
}

/// A point-in-time view of the sheet. Either fully populated with a fetch
/// timestamp, or the empty sentinel (`fetched_at == None`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub records: Vec<Record>,
    /// Column identifiers present in the export header
    pub columns: Vec<String>,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl Dataset {
    /// The sentinel handed out before the first successful fetch
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty_sentinel(&self) -> bool {
        self.fetched_at.is_none()
    }

    pub fn has_column(&self, column_id: &str) -> bool {
        self.columns.iter().any(|c| c == column_id)
    }
}
