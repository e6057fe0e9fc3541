use serde_json::{Map, Number, Value};
use std::io::Cursor;
use thiserror::Error;

/// One parsed data row, keyed by column name.
pub type Row = Map<String, Value>;

/// Header list plus data rows extracted from an uploaded file.
#[derive(Debug, Clone)]
pub struct ParsedSheet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unsupported file extension: {0}")]
    UnsupportedExtension(String),
    #[error("file has no extension")]
    MissingExtension,
    #[error("could not read workbook: {0}")]
    Workbook(String),
    #[error("workbook contains no sheets")]
    NoSheets,
}

/// Detect file type and parse the uploaded bytes
///
/// This function examines the file extension and calls the appropriate
/// parser for CSV or Excel uploads. The first row is treated as the header
/// row; every following row becomes an object keyed by those headers.
///
/// # Arguments
/// * `filename` - The original upload filename (used for extension dispatch)
/// * `bytes` - The raw uploaded file contents
///
/// # Returns
/// * `Result<ParsedSheet, ParseError>` - Headers and rows, or an error
pub fn parse_upload(filename: &str, bytes: &[u8]) -> Result<ParsedSheet, ParseError> {
    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase());

    match extension.as_deref() {
        Some("csv") => Ok(from_csv(bytes)),
        Some("xlsx") | Some("xls") => from_excel(bytes),
        Some(ext) => Err(ParseError::UnsupportedExtension(ext.to_string())),
        None => Err(ParseError::MissingExtension),
    }
}

/// Parse CSV bytes into headers and row objects
///
/// Handles quoted fields and doubled quotes. Numeric-looking cells become
/// JSON numbers so previews chart cleanly; everything else stays a string.
fn from_csv(bytes: &[u8]) -> ParsedSheet {
    let text = String::from_utf8_lossy(bytes);
    let mut lines = text.lines().filter(|line| !line.trim().is_empty());

    let Some(header_line) = lines.next() else {
        return ParsedSheet {
            columns: Vec::new(),
            rows: Vec::new(),
        };
    };

    let columns: Vec<String> = parse_csv_row(header_line)
        .into_iter()
        .enumerate()
        .map(|(i, name)| column_name(&name, i))
        .collect();

    let mut rows = Vec::new();
    for line in lines {
        let fields = parse_csv_row(line);
        let mut row = Row::new();
        for (c, column) in columns.iter().enumerate() {
            let raw = fields.get(c).map(String::as_str).unwrap_or("");
            row.insert(column.clone(), cell_value(raw));
        }
        rows.push(row);
    }

    ParsedSheet { columns, rows }
}

/// Parse XLSX/XLS bytes into headers and row objects
///
/// Reads the first worksheet; the first row supplies the headers.
fn from_excel(bytes: &[u8]) -> Result<ParsedSheet, ParseError> {
    use calamine::{Data, Reader, Xlsx};

    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes.to_vec()))
        .map_err(|e| ParseError::Workbook(e.to_string()))?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or(ParseError::NoSheets)?;

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| ParseError::Workbook(e.to_string()))?;

    let mut cells = range.rows();
    let Some(header_row) = cells.next() else {
        return Ok(ParsedSheet {
            columns: Vec::new(),
            rows: Vec::new(),
        });
    };

    let columns: Vec<String> = header_row
        .iter()
        .enumerate()
        .map(|(i, cell)| column_name(&cell.to_string(), i))
        .collect();

    let mut rows = Vec::new();
    for sheet_row in cells {
        let mut row = Row::new();
        for (c, column) in columns.iter().enumerate() {
            let value = match sheet_row.get(c) {
                Some(Data::Int(i)) => Value::from(*i),
                Some(Data::Float(f)) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
                Some(Data::Bool(b)) => Value::Bool(*b),
                Some(Data::Empty) | None => Value::Null,
                Some(other) => Value::String(other.to_string()),
            };
            row.insert(column.clone(), value);
        }
        rows.push(row);
    }

    Ok(ParsedSheet { columns, rows })
}

// Blank header cells still need a stable key for the row objects.
fn column_name(raw: &str, index: usize) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        format!("Column{}", index + 1)
    } else {
        trimmed.to_string()
    }
}

fn cell_value(raw: &str) -> Value {
    if let Ok(i) = raw.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        if let Some(n) = Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    Value::String(raw.to_string())
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
                if let Some(&next) = chars.peek() {
                    if next == '"' && in_quotes {
                        // Doubled quote inside a quoted field
                        current_field.push('"');
                        chars.next();
                    } else {
                        in_quotes = !in_quotes;
                    }
                } else {
                    in_quotes = !in_quotes;
                }
            }
            ',' if !in_quotes => {
                result.push(current_field);
                current_field = String::new();
            }
            _ => {
                current_field.push(c);
            }
        }
    }

    result.push(current_field);
    result
}
