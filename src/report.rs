//! Pending laboratory test report.
//!
//! Every record with a pour date is checked against the 7/14/28-day
//! milestones. A milestone is pending when its result cell is blank and the
//! threshold has elapsed. Pending lines are packed in sheet order into text
//! blocks no longer than the configured maximum, with the title header on the
//! first block only.

use chrono::{NaiveDate, NaiveDateTime};

use crate::dataset::{Dataset, Milestone, Record};
use crate::types::{AllBlankPolicy, ReportPolicy};

/// Default cap on characters per block; stays under Telegram's 4096 limit.
pub const MAX_BLOCK: usize = 3500;

pub const REPORT_TITLE: &str = "*Ensayos de laboratorio pendientes*";
pub const NOTHING_PENDING: &str = "No hay ensayos pendientes.";
pub const DATA_UNAVAILABLE: &str =
    "No se pudieron cargar los datos de la hoja de control. Intenta más tarde.";

// =============================================================================
// Classification
// =============================================================================

/// Per-record result of checking the three milestones.
#[derive(Debug, Clone, PartialEq)]
pub enum TestStatus {
    /// At least one milestone is overdue, listed in milestone order
    Pending {
        elapsed_days: i64,
        milestones: Vec<Milestone>,
    },
    /// Nothing recorded yet and nothing due yet (only under `AllBlankPolicy::TooEarly`)
    TooEarly { elapsed_days: i64 },
    /// Nothing to report for this record
    Clear,
}

/// Whether a result cell counts as "not yet recorded".
///
/// Empty and whitespace-only cells are always blank. A numeric zero
/// (`0`, `0.0`, `0,0`) is blank only when `zero_is_blank` is set.
pub fn is_blank(value: Option<&str>, zero_is_blank: bool) -> bool {
    let Some(value) = value.map(str::trim) else {
        return true;
    };
    if value.is_empty() {
        return true;
    }
    zero_is_blank
        && value
            .replace(',', ".")
            .parse::<f64>()
            .map(|n| n == 0.0)
            .unwrap_or(false)
}

/// Classify one record as of a local calendar date.
///
/// Returns `None` for records that cannot be classified (no pour date) or
/// that the all-blank policy drops.
pub fn classify(record: &Record, as_of: NaiveDate, policy: &ReportPolicy) -> Option<TestStatus> {
    let pour_date = record.pour_date?;
    let elapsed_days = (as_of - pour_date).num_days();

    let blank: Vec<(Milestone, bool)> = Milestone::ALL
        .iter()
        .map(|&m| (m, is_blank(record.test_results.get(m), policy.zero_is_blank)))
        .collect();
    let all_blank = blank.iter().all(|(_, b)| *b);

    if all_blank && policy.all_blank_policy == AllBlankPolicy::Skip {
        return None;
    }

    let milestones: Vec<Milestone> = blank
        .into_iter()
        .filter(|(m, b)| *b && elapsed_days >= m.threshold_days())
        .map(|(m, _)| m)
        .collect();

    if !milestones.is_empty() {
        return Some(TestStatus::Pending {
            elapsed_days,
            milestones,
        });
    }

    if all_blank && policy.all_blank_policy == AllBlankPolicy::TooEarly {
        return Some(TestStatus::TooEarly { elapsed_days });
    }

    Some(TestStatus::Clear)
}

// =============================================================================
// Rendering
// =============================================================================

fn identity_fields(record: &Record) -> Vec<String> {
    let mut fields = vec![format!("*{}*", record.project_id)];
    if !record.support_id.trim().is_empty() {
        fields.push(record.support_id.trim().to_string());
    }
    let element = record.element_label();
    if !element.is_empty() {
        fields.push(element);
    }
    if let Some(date) = record.pour_date {
        fields.push(format!("Vaciado: {}", date.format("%d/%m/%Y")));
    }
    fields
}

/// One report line for a classified record, `None` when there is nothing to say.
pub fn render_line(record: &Record, status: &TestStatus) -> Option<String> {
    let mut fields = identity_fields(record);
    match status {
        TestStatus::Pending {
            elapsed_days,
            milestones,
        } => {
            let labels: Vec<&str> = milestones.iter().map(|m| m.label()).collect();
            fields.push(format!("Transcurridos: *{} días*", elapsed_days));
            fields.push(format!("Pendientes: *{}*", labels.join(", ")));
        }
        TestStatus::TooEarly { elapsed_days } => {
            fields.push(format!("Transcurridos: {} días", elapsed_days));
            fields.push("Sin ensayos registrados aún".to_string());
        }
        TestStatus::Clear => return None,
    }
    Some(fields.join(" | "))
}

pub fn render_header(as_of: NaiveDateTime) -> String {
    format!("{}\nGenerado: {}\n", REPORT_TITLE, as_of.format("%d/%m/%Y %H:%M"))
}

// =============================================================================
// Block packing
// =============================================================================

/// Pack lines into blocks of at most `max_chars` characters.
///
/// Lines are newline-separated and kept whole unless a single line is longer
/// than `max_chars`, in which case it is hard-split. The header (if any) opens
/// the first block.
pub fn pack_blocks(header: &str, lines: &[String], max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut blocks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    let mut push = |piece: &str, blocks: &mut Vec<String>| {
        let piece_len = piece.chars().count();
        let sep = usize::from(!current.is_empty());
        if !current.is_empty() && current_len + sep + piece_len > max_chars {
            blocks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push('\n');
            current_len += 1;
        }
        current.push_str(piece);
        current_len += piece_len;
    };

    if !header.is_empty() {
        for piece in split_chars(header.trim_end_matches('\n'), max_chars) {
            push(&piece, &mut blocks);
        }
        // Blank line between header and body
        push("", &mut blocks);
    }

    for line in lines {
        for piece in split_chars(line, max_chars) {
            push(&piece, &mut blocks);
        }
    }

    if !current.is_empty() {
        blocks.push(current);
    }
    blocks
}

fn split_chars(line: &str, max_chars: usize) -> Vec<String> {
    if line.chars().count() <= max_chars {
        return vec![line.to_string()];
    }
    let chars: Vec<char> = line.chars().collect();
    chars.chunks(max_chars).map(|c| c.iter().collect()).collect()
}

// =============================================================================
// Report
// =============================================================================

/// What the report ended up containing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportStatus {
    Pending { pending: usize, informational: usize },
    NothingPending,
    DataUnavailable,
}

/// A rendered report: display-ready blocks, never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub status: ReportStatus,
    pub blocks: Vec<String>,
}

/// Build the pending-test report for a dataset snapshot.
///
/// `as_of` is local wall-clock time; only its date takes part in the day
/// arithmetic.
pub fn build_report(dataset: &Dataset, as_of: NaiveDateTime, policy: &ReportPolicy) -> Report {
    if dataset.is_empty_sentinel() {
        return Report {
            status: ReportStatus::DataUnavailable,
            blocks: vec![DATA_UNAVAILABLE.to_string()],
        };
    }

    let today = as_of.date();
    let mut lines = Vec::new();
    let mut pending = 0usize;
    let mut informational = 0usize;

    for record in &dataset.records {
        let Some(status) = classify(record, today, policy) else {
            continue;
        };
        if let Some(line) = render_line(record, &status) {
            match status {
                TestStatus::Pending { .. } => pending += 1,
                _ => informational += 1,
            }
            lines.push(line);
        }
    }

    let header = render_header(as_of);
    if lines.is_empty() {
        return Report {
            status: ReportStatus::NothingPending,
            blocks: pack_blocks(&header, &[NOTHING_PENDING.to_string()], policy.max_block_chars),
        };
    }

    Report {
        status: ReportStatus::Pending {
            pending,
            informational,
        },
        blocks: pack_blocks(&header, &lines, policy.max_block_chars),
    }
}
