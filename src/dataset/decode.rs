//! Decode a sheet export (CSV or XLSX) into typed records.

use std::collections::HashMap;
use std::io::Cursor;

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use csv::ReaderBuilder;

use super::{Record, TestResults};
use crate::error::FetchError;
use crate::normalize::{column_id, fold};
use crate::types::{ColumnAliases, DatasetFormat};

/// Header plus string cells, before any field mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Records plus the column identifiers seen in the header.
#[derive(Debug, Clone)]
pub struct DecodedSheet {
    pub records: Vec<Record>,
    pub columns: Vec<String>,
}

/// Decode raw export bytes and map them to records.
pub fn decode_sheet(
    bytes: &[u8],
    format: DatasetFormat,
    aliases: &ColumnAliases,
) -> Result<DecodedSheet, FetchError> {
    let table = decode_table(bytes, format)?;
    build_records(&table, aliases)
}

pub fn decode_table(bytes: &[u8], format: DatasetFormat) -> Result<RawTable, FetchError> {
    match format {
        DatasetFormat::Csv => decode_csv(bytes),
        DatasetFormat::Xlsx => decode_xlsx(bytes),
        DatasetFormat::Auto => {
            // XLSX is a ZIP archive
            if bytes.starts_with(b"PK\x03\x04") {
                decode_xlsx(bytes)
            } else {
                decode_csv(bytes)
            }
        }
    }
}

fn decode_csv(bytes: &[u8]) -> Result<RawTable, FetchError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| FetchError::Decode(format!("CSV is not UTF-8: {}", e)))?;
    let text = text.trim_start_matches('\u{feff}');

    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = rdr
        .headers()
        .map_err(|e| FetchError::Decode(format!("CSV header: {}", e)))?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let mut rows = Vec::new();
    for (row_idx, result) in rdr.records().enumerate() {
        let record =
            result.map_err(|e| FetchError::Decode(format!("CSV row {}: {}", row_idx + 2, e)))?;
        rows.push(record.iter().map(|c| c.to_string()).collect());
    }

    Ok(RawTable { headers, rows })
}

fn decode_xlsx(bytes: &[u8]) -> Result<RawTable, FetchError> {
    use calamine::{open_workbook_auto_from_rs, Reader};

    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| FetchError::Decode(format!("XLSX: {}", e)))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| FetchError::Decode("XLSX has no worksheets".to_string()))?
        .map_err(|e| FetchError::Decode(format!("XLSX sheet: {}", e)))?;

    let mut rows = range.rows();
    let headers = match rows.next() {
        Some(header) => header.iter().map(cell_to_string).collect(),
        None => return Ok(RawTable::default()),
    };
    let rows = rows
        .map(|row| row.iter().map(cell_to_string).collect())
        .collect();

    Ok(RawTable { headers, rows })
}

fn cell_to_string(cell: &calamine::Data) -> String {
    use calamine::Data;
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Int(n) => n.to_string(),
        Data::Float(f) => format!("{}", f),
        Data::Bool(b) => b.to_string(),
        Data::Error(_) => String::new(),
        Data::DateTime(dt) => excel_serial_to_date(dt.as_f64())
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default(),
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
    }
}

/// Last serial Excel can represent (9999-12-31)
const MAX_EXCEL_SERIAL: f64 = 2_958_465.0;

/// Excel serial day (1900 date system, with its leap-year bug) to a date.
fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || !(1.0..=MAX_EXCEL_SERIAL).contains(&serial) {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_signed(TimeDelta::try_days(serial.floor() as i64)?)
}

/// Parse a pour date as typed into the sheet.
///
/// Slashed dates are day-first (`06/10/2026` is 6 October).
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    const DATE_FORMATS: [&str; 5] = ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%Y/%m/%d", "%d/%m/%y"];
    const DATETIME_FORMATS: [&str; 5] = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%d/%m/%Y %H:%M:%S",
        "%d/%m/%Y %H:%M",
        "%Y-%m-%d %H:%M",
    ];

    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, fmt) {
            return Some(date);
        }
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(dt.date());
        }
    }

    // Serial numbers leak through CSV exports of date-formatted cells
    match value.parse::<f64>() {
        Ok(serial) if (20_000.0..80_000.0).contains(&serial) => excel_serial_to_date(serial),
        _ => None,
    }
}

/// Map a raw table onto records using the configured column aliases.
pub fn build_records(table: &RawTable, aliases: &ColumnAliases) -> Result<DecodedSheet, FetchError> {
    let columns: Vec<String> = table.headers.iter().map(|h| column_id(h)).collect();
    let header_map: HashMap<&str, usize> = columns
        .iter()
        .enumerate()
        .rev()
        .map(|(i, c)| (c.as_str(), i))
        .collect();

    let locate = |names: &[String]| names.iter().find_map(|n| header_map.get(n.as_str()).copied());

    let project_idx = locate(&aliases.project).ok_or_else(|| {
        FetchError::SchemaInvalid(aliases.project.first().cloned().unwrap_or_default())
    })?;
    let support_idx = locate(&aliases.support);
    let kind_idx = locate(&aliases.element_kind);
    let number_idx = locate(&aliases.element_number);
    let pour_idx = locate(&aliases.pour_date);
    let test_idx = [
        locate(&aliases.test_7d),
        locate(&aliases.test_14d),
        locate(&aliases.test_28d),
    ];
    let progress_idx = locate(&aliases.progress);

    let cell = |row: &[String], idx: Option<usize>| -> Option<String> {
        idx.and_then(|i| row.get(i))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };

    let mut records = Vec::with_capacity(table.rows.len());
    for row in &table.rows {
        let Some(project_id) = cell(row, Some(project_idx)) else {
            continue;
        };
        let normalized_key = fold(&project_id);
        records.push(Record {
            normalized_key,
            project_id,
            support_id: cell(row, support_idx).unwrap_or_default(),
            element_kind: cell(row, kind_idx).unwrap_or_default(),
            element_number: cell(row, number_idx).unwrap_or_default(),
            pour_date: cell(row, pour_idx).as_deref().and_then(parse_date),
            test_results: TestResults::new(
                cell(row, test_idx[0]),
                cell(row, test_idx[1]),
                cell(row, test_idx[2]),
            ),
            progress_percent: cell(row, progress_idx),
        });
    }

    Ok(DecodedSheet { records, columns })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Milestone;

    const SHEET: &str = "\u{feff}Puente,Apoyo,Elemento,Número,Fecha de Vaciado,7 días,14 días,28 días,Avance (%)\n\
        Puente 10,Apoyo 1,Zapata,1,2026-10-06,,,,45\n\
        Puente Río,Apoyo 2,Columna,3,06/09/2026,210,0,,80\n\
        ,Apoyo 3,Trabe,1,2026-09-01,,,,\n";

    #[test]
    fn test_decode_csv_maps_columns() {
        let sheet = decode_sheet(SHEET.as_bytes(), DatasetFormat::Auto, &ColumnAliases::default())
            .unwrap();

        assert_eq!(sheet.records.len(), 2, "row without project is dropped");
        assert!(sheet.columns.contains(&"fecha_de_vaciado".to_string()));
        assert!(sheet.columns.contains(&"avance_(%)".to_string()));

        let first = &sheet.records[0];
        assert_eq!(first.project_id, "Puente 10");
        assert_eq!(first.normalized_key, "puente 10");
        assert_eq!(first.element_label(), "Zapata 1");
        assert_eq!(first.pour_date, NaiveDate::from_ymd_opt(2026, 10, 6));
        assert_eq!(first.test_results.get(Milestone::D7), None);
        assert_eq!(first.progress_percent.as_deref(), Some("45"));

        let second = &sheet.records[1];
        assert_eq!(second.normalized_key, "puente rio");
        assert_eq!(second.pour_date, NaiveDate::from_ymd_opt(2026, 9, 6));
        assert_eq!(second.test_results.get(Milestone::D7), Some("210"));
        assert_eq!(second.test_results.get(Milestone::D14), Some("0"));
        assert_eq!(second.test_results.get(Milestone::D28), None);
    }

    #[test]
    fn test_missing_project_column_is_schema_error() {
        let csv = "Nombre,Avance\nPuente 1,10\n";
        let err = decode_sheet(csv.as_bytes(), DatasetFormat::Csv, &ColumnAliases::default())
            .unwrap_err();
        assert!(matches!(err, FetchError::SchemaInvalid(ref c) if c == "puente"));
    }

    #[test]
    fn test_invalid_utf8_is_decode_error() {
        let err = decode_table(&[0xff, 0xfe, 0x00, 0x41], DatasetFormat::Csv).unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
    }

    #[test]
    fn test_garbage_xlsx_is_decode_error() {
        let err = decode_table(b"PK\x03\x04not really a zip", DatasetFormat::Auto).unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2026, 10, 6);
        assert_eq!(parse_date("2026-10-06"), expected);
        assert_eq!(parse_date("06/10/2026"), expected);
        assert_eq!(parse_date("06-10-2026"), expected);
        assert_eq!(parse_date("2026/10/06"), expected);
        assert_eq!(parse_date("2026-10-06 14:30:00"), expected);
        assert_eq!(parse_date("06/10/2026 14:30"), expected);
        assert_eq!(parse_date("  "), None);
        assert_eq!(parse_date("pendiente"), None);
    }

    #[test]
    fn test_parse_date_excel_serial() {
        // 45000 is 2023-03-15 in the 1900 date system
        assert_eq!(parse_date("45000"), NaiveDate::from_ymd_opt(2023, 3, 15));
        assert_eq!(parse_date("12"), None);
    }

    #[test]
    fn test_xlsx_cells_to_strings() {
        use calamine::{Data, ExcelDateTime, ExcelDateTimeType};

        let poured = Data::DateTime(ExcelDateTime::new(45000.0, ExcelDateTimeType::DateTime, false));
        assert_eq!(cell_to_string(&poured), "2023-03-15");
        assert_eq!(cell_to_string(&Data::Float(45.5)), "45.5");
        assert_eq!(cell_to_string(&Data::Int(210)), "210");
        assert_eq!(cell_to_string(&Data::String("  Puente 10 ".to_string())), "Puente 10");
        assert_eq!(cell_to_string(&Data::Empty), "");

        let corrupt = Data::DateTime(ExcelDateTime::new(1e20, ExcelDateTimeType::DateTime, false));
        assert_eq!(cell_to_string(&corrupt), "");
    }

    #[test]
    fn test_xlsx_row_builds_record_with_pour_date() {
        use calamine::{Data, ExcelDateTime, ExcelDateTimeType};

        let header = [
            Data::String("Puente".to_string()),
            Data::String("Fecha de vaciado".to_string()),
            Data::String("7 días".to_string()),
        ];
        let row = [
            Data::String("Puente 10".to_string()),
            Data::DateTime(ExcelDateTime::new(45000.0, ExcelDateTimeType::DateTime, false)),
            Data::Empty,
        ];
        let table = RawTable {
            headers: header.iter().map(cell_to_string).collect(),
            rows: vec![row.iter().map(cell_to_string).collect()],
        };

        let sheet = build_records(&table, &ColumnAliases::default()).unwrap();
        assert_eq!(sheet.records[0].pour_date, NaiveDate::from_ymd_opt(2023, 3, 15));
        assert_eq!(sheet.records[0].test_results.get(Milestone::D7), None);
    }

    #[test]
    fn test_excel_serial_out_of_range() {
        assert_eq!(excel_serial_to_date(2_958_465.0), NaiveDate::from_ymd_opt(9999, 12, 31));
        assert_eq!(excel_serial_to_date(2_958_466.0), None);
        assert_eq!(excel_serial_to_date(1e20), None);
        assert_eq!(excel_serial_to_date(f64::NAN), None);
        assert_eq!(excel_serial_to_date(0.5), None);
    }

    #[test]
    fn test_custom_aliases() {
        let csv = "Obra,Colado\nViaducto Norte,2026-01-02\n";
        let aliases = ColumnAliases {
            project: vec!["obra".to_string()],
            pour_date: vec!["colado".to_string()],
            ..ColumnAliases::default()
        };
        let sheet = decode_sheet(csv.as_bytes(), DatasetFormat::Csv, &aliases).unwrap();
        assert_eq!(sheet.records[0].project_id, "Viaducto Norte");
        assert_eq!(sheet.records[0].pour_date, NaiveDate::from_ymd_opt(2026, 1, 2));
    }
}
