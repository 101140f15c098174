use chrono::NaiveDate;
use rust_xlsxwriter::{Format, Workbook};

use crate::error::{TrackerError, TrackerResult};
use crate::record::{DISPLAY_COLUMNS, Record};

fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Convert records to CSV format
///
/// The first line holds the column names. Values containing commas, quotes
/// or newlines are quoted, with inner quotes doubled.
///
/// # Arguments
/// * `records` - Records to export, in the order they should appear
/// * `today` - Reference date for the `days_elapsed` column
///
/// # Returns
/// * `String` - CSV content
pub fn to_csv(records: &[Record], today: NaiveDate) -> String {
    let mut csv_content = DISPLAY_COLUMNS.join(",");
    csv_content.push('\n');

    for record in records {
        let line: Vec<String> = record
            .display_values(today)
            .iter()
            .map(|(_, value)| csv_field(value))
            .collect();
        csv_content.push_str(&line.join(","));
        csv_content.push('\n');
    }

    csv_content
}

/// Convert records to XLSX format
///
/// Writes a single worksheet with a bold header row followed by one row
/// per record.
///
/// # Arguments
/// * `records` - Records to export
/// * `today` - Reference date for the `days_elapsed` column
///
/// # Returns
/// * `TrackerResult<Vec<u8>>` - XLSX file content as bytes or an error
pub fn to_xlsx(records: &[Record], today: NaiveDate) -> TrackerResult<Vec<u8>> {
    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();
    let worksheet = workbook.add_worksheet();
    worksheet
        .set_name("Records")
        .map_err(|e| TrackerError::Export(e.to_string()))?;

    for (col, name) in DISPLAY_COLUMNS.iter().enumerate() {
        worksheet
            .write_string_with_format(0, col as u16, *name, &bold)
            .map_err(|e| TrackerError::Export(e.to_string()))?;
    }

    for (row, record) in records.iter().enumerate() {
        for (col, (_, value)) in record.display_values(today).iter().enumerate() {
            worksheet
                .write_string(row as u32 + 1, col as u16, value)
                .map_err(|e| TrackerError::Export(e.to_string()))?;
        }
    }

    workbook
        .save_to_buffer()
        .map_err(|e| TrackerError::Export(e.to_string()))
}
