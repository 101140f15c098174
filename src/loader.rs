use calamine::{Data, Reader, Xlsx};
use chrono::{Duration, NaiveDate};
use std::fs;
use std::io::Cursor;
use std::path::Path;

use crate::error::{TrackerError, TrackerResult};
use crate::record::NewRecord;
use crate::user::fold_turkish;
use crate::workflow::ImportRow;

/// Record fields an import column can fill
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    ApplicationNo,
    CompanyName,
    Brand,
    VehicleCategory,
    VehicleType,
    Variant,
    Version,
    TradeName,
    GtipNo,
    Unit,
    CountryOfOrigin,
    VehicleCount,
    SubmittedDate,
    Region,
    Notes,
}

/// Accepted header names per column, already folded
///
/// Both the English field names and the Turkish column names of the
/// application spreadsheets are recognised.
const HEADERS: &[(Column, &[&str])] = &[
    (Column::ApplicationNo, &["application_no", "basvuru_no"]),
    (Column::CompanyName, &["company_name", "company", "firma_adi", "firma"]),
    (Column::Brand, &["brand", "marka"]),
    (Column::VehicleCategory, &["vehicle_category", "arac_kategori", "kategori"]),
    (Column::VehicleType, &["vehicle_type", "arac_tipi", "tip"]),
    (Column::Variant, &["variant", "varyant"]),
    (Column::Version, &["version", "versiyon"]),
    (Column::TradeName, &["trade_name", "ticari_ad"]),
    (Column::GtipNo, &["gtip_no", "gtip"]),
    (Column::Unit, &["unit", "birim"]),
    (Column::CountryOfOrigin, &["country_of_origin", "uretim_ulkesi"]),
    (Column::VehicleCount, &["vehicle_count", "arac_sayisi"]),
    (Column::SubmittedDate, &["submitted_date", "basvuru_tarihi"]),
    (Column::Region, &["region", "il"]),
    (Column::Notes, &["notes", "notlar"]),
];

fn column_for(header: &str) -> Option<Column> {
    let folded: String = fold_turkish(header)
        .chars()
        .map(|c| if c == ' ' || c == '-' || c == '.' { '_' } else { c })
        .collect();

    HEADERS
        .iter()
        .find(|(_, names)| names.contains(&folded.as_str()))
        .map(|(column, _)| *column)
}

/// Parse a date cell written as `YYYY-MM-DD`, `DD.MM.YYYY` or `DD/MM/YYYY`
fn parse_date(value: &str) -> Option<NaiveDate> {
    ["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y"]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value.trim(), format).ok())
}

/// Build import rows from a header row and data rows of text cells
///
/// `first_line` is the line number of the header row in the source file.
fn rows_from_table(table: Vec<Vec<String>>, first_line: usize) -> TrackerResult<Vec<ImportRow>> {
    let mut lines = table.into_iter().enumerate();

    let header = match lines.next() {
        Some((_, header)) => header,
        None => return Err(TrackerError::Import("File is empty".to_string())),
    };
    let columns: Vec<Option<Column>> = header.iter().map(|h| column_for(h)).collect();

    for (required, name) in [
        (Column::CompanyName, "company_name"),
        (Column::VehicleType, "vehicle_type"),
    ] {
        if !columns.contains(&Some(required)) {
            return Err(TrackerError::Import(format!("Missing column: {}", name)));
        }
    }

    let mut rows = Vec::new();
    for (index, cells) in lines {
        let line = first_line + index;
        if cells.iter().all(|c| c.trim().is_empty()) {
            continue;
        }

        let mut record = NewRecord::default();
        for (column, value) in columns.iter().zip(cells) {
            let Some(column) = column else { continue };
            let text = Some(value.clone());
            match column {
                Column::ApplicationNo => record.application_no = text,
                Column::CompanyName => record.company_name = value,
                Column::Brand => record.brand = text,
                Column::VehicleCategory => record.vehicle_category = text,
                Column::VehicleType => record.vehicle_type = value,
                Column::Variant => record.variant = text,
                Column::Version => record.version = text,
                Column::TradeName => record.trade_name = text,
                Column::GtipNo => record.gtip_no = text,
                Column::Unit => record.unit = text,
                Column::CountryOfOrigin => record.country_of_origin = text,
                Column::VehicleCount => record.vehicle_count = text,
                Column::Region => record.region = text,
                Column::Notes => record.notes = text,
                Column::SubmittedDate => {
                    if !value.trim().is_empty() {
                        record.submitted_date = Some(parse_date(&value).ok_or_else(|| {
                            TrackerError::validation(format!(
                                "Line {}: invalid date '{}'",
                                line, value
                            ))
                        })?);
                    }
                }
            }
        }
        rows.push(ImportRow { line, record });
    }

    Ok(rows)
}

/// Load import rows from CSV text
///
/// The first line is the header. Quoted fields may contain commas and
/// doubled quotes; fields spanning several lines are not supported.
///
/// # Examples
/// ```
/// use sample_tracker::loader::from_csv_str;
///
/// let rows = from_csv_str("company_name,brand,vehicle_type\nAcme,X,T1\n").unwrap();
/// assert_eq!(rows.len(), 1);
/// assert_eq!(rows[0].line, 2);
/// assert_eq!(rows[0].record.company_name, "Acme");
/// ```
pub fn from_csv_str(content: &str) -> TrackerResult<Vec<ImportRow>> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let table = content
        .lines()
        .map(parse_csv_row)
        .collect::<Vec<Vec<String>>>();
    rows_from_table(table, 1)
}

/// Load import rows from a CSV file
pub fn from_csv(filepath: impl AsRef<Path>) -> TrackerResult<Vec<ImportRow>> {
    let content = fs::read_to_string(filepath)?;
    from_csv_str(&content)
}

/// Load import rows from the first worksheet of an XLSX workbook in memory
pub fn from_excel_bytes(bytes: &[u8]) -> TrackerResult<Vec<ImportRow>> {
    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes))
        .map_err(|e| TrackerError::Import(format!("Cannot read workbook: {}", e)))?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| TrackerError::Import("No sheets found in Excel file".to_string()))?;

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| TrackerError::Import(format!("Failed to read worksheet: {}", e)))?;

    // Data rows keep their worksheet line numbers even if the used range
    // does not start at A1.
    let first_line = range.start().map(|(row, _)| row as usize + 1).unwrap_or(1);
    let table: Vec<Vec<String>> = range
        .rows()
        .map(|row| row.iter().map(cell_text).collect::<Vec<String>>())
        .collect();
    rows_from_table(table, first_line)
}

/// Load import rows from an XLSX file
pub fn from_excel(filepath: impl AsRef<Path>) -> TrackerResult<Vec<ImportRow>> {
    let bytes = fs::read(filepath)?;
    from_excel_bytes(&bytes)
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.fract() == 0.0 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => excel_serial_to_date(dt.as_f64())
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default(),
        Data::DateTimeIso(s) => s.chars().take(10).collect(),
        Data::DurationIso(s) => s.clone(),
        Data::Error(_) | Data::Empty => String::new(),
    }
}

/// Convert an Excel serial day number (1900 date system) to a date
fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(1899, 12, 30)
        .and_then(|epoch| epoch.checked_add_signed(Duration::days(serial.trunc() as i64)))
}

/// Load an uploaded file, choosing the parser by its name
pub fn from_upload(filename: &str, bytes: &[u8]) -> TrackerResult<Vec<ImportRow>> {
    match extension_of(Path::new(filename)).as_deref() {
        Some("csv") => {
            let content = std::str::from_utf8(bytes)
                .map_err(|_| TrackerError::Import("CSV file is not valid UTF-8".to_string()))?;
            from_csv_str(content)
        }
        Some("xlsx") => from_excel_bytes(bytes),
        Some(ext) => Err(TrackerError::Import(format!(
            "Unsupported file extension: {}",
            ext
        ))),
        None => Err(TrackerError::Import("File has no extension".to_string())),
    }
}

/// Detect file type and load appropriate format
///
/// # Arguments
/// * `filepath` - Path to a `.csv` or `.xlsx` file
///
/// # Returns
/// * `TrackerResult<Vec<ImportRow>>` - The parsed rows or an error
pub fn load_import_file(filepath: impl AsRef<Path>) -> TrackerResult<Vec<ImportRow>> {
    let path = filepath.as_ref();
    match extension_of(path).as_deref() {
        Some("csv") => from_csv(path),
        Some("xlsx") => from_excel(path),
        Some(ext) => Err(TrackerError::Import(format!(
            "Unsupported file extension: {}",
            ext
        ))),
        None => Err(TrackerError::Import("File has no extension".to_string())),
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

// Parse a CSV row into a vector of strings
fn parse_csv_row(line: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut current_field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                if in_quotes && chars.peek() == Some(&'"') {
                    // Doubled quote inside a quoted field
                    current_field.push('"');
                    chars.next();
                } else {
                    in_quotes = !in_quotes;
                }
            }
            ',' if !in_quotes => {
                result.push(std::mem::take(&mut current_field));
            }
            '\r' if !in_quotes => {}
            _ => current_field.push(c),
        }
    }

    result.push(current_field);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoted_fields_keep_commas_and_quotes() {
        let row = parse_csv_row(r#"1,"Acme, Inc.","say ""hi""",x"#);
        assert_eq!(row, vec!["1", "Acme, Inc.", r#"say "hi""#, "x"]);
    }

    #[test]
    fn turkish_headers_are_recognised() {
        assert_eq!(column_for("Firma Adı"), Some(Column::CompanyName));
        assert_eq!(column_for("ARAÇ TİPİ"), Some(Column::VehicleType));
        assert_eq!(column_for("Başvuru No"), Some(Column::ApplicationNo));
        assert_eq!(column_for("il"), Some(Column::Region));
        assert_eq!(column_for("colour"), None);
    }

    #[test]
    fn dates_in_common_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 9);
        assert_eq!(parse_date("2024-03-09"), expected);
        assert_eq!(parse_date("09.03.2024"), expected);
        assert_eq!(parse_date("09/03/2024"), expected);
        assert_eq!(parse_date("March 9"), None);
    }

    #[test]
    fn excel_serial_dates() {
        assert_eq!(
            excel_serial_to_date(45360.0),
            NaiveDate::from_ymd_opt(2024, 3, 9)
        );
    }
}
