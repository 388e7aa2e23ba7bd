use crate::error::ValidationError;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::Path;

/// Default upload limit: 1 MB
pub const MAX_UPLOAD_BYTES: usize = 1024 * 1024;

/// Check that `filename` names a CSV file (case-insensitive)
pub fn has_csv_extension(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
}

/// Validate an uploaded CSV held in memory
///
/// Rejects uploads larger than `max_bytes`, filenames without a `.csv`
/// extension, and content whose header row is not valid UTF-8 CSV.
///
/// # Examples
/// ```
/// use csv_visualizer::validator::validate;
///
/// assert!(validate("sales.csv", b"Month,Revenue\nJan,10\n", 1024).is_ok());
/// assert!(validate("notes.txt", b"Month,Revenue\n", 1024).is_err());
/// ```
pub fn validate(filename: &str, bytes: &[u8], max_bytes: usize) -> Result<(), ValidationError> {
    validate_reader(&mut Cursor::new(bytes), filename, max_bytes)
}

/// Validate an uploaded CSV stream
///
/// The stream is rewound to where it started before returning, so the
/// caller can hand the same stream on to storage.
pub fn validate_reader<R: Read + Seek>(
    reader: &mut R,
    filename: &str,
    max_bytes: usize,
) -> Result<(), ValidationError> {
    let start = reader
        .stream_position()
        .map_err(|e| ValidationError::Unparseable(e.to_string()))?;
    let result = check(reader, start, filename, max_bytes);
    reader
        .seek(SeekFrom::Start(start))
        .map_err(|e| ValidationError::Unparseable(e.to_string()))?;
    result
}

fn check<R: Read + Seek>(
    reader: &mut R,
    start: u64,
    filename: &str,
    max_bytes: usize,
) -> Result<(), ValidationError> {
    let end = reader
        .seek(SeekFrom::End(0))
        .map_err(|e| ValidationError::Unparseable(e.to_string()))?;
    let size = (end - start) as usize;
    if size > max_bytes {
        return Err(ValidationError::TooLarge {
            size,
            limit: max_bytes,
        });
    }

    if !has_csv_extension(filename) {
        return Err(ValidationError::InvalidType);
    }

    reader
        .seek(SeekFrom::Start(start))
        .map_err(|e| ValidationError::Unparseable(e.to_string()))?;
    parse_header(reader)
}

// Reads the header plus at most one data row. Short rows are fine, the
// missing cells count as empty; rows wider than the header are not.
fn parse_header<R: Read>(reader: R) -> Result<(), ValidationError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers = csv_reader
        .headers()
        .map_err(|e| ValidationError::Unparseable(e.to_string()))?;
    if headers.is_empty() || headers.iter().all(|h| h.trim().is_empty()) {
        return Err(ValidationError::Unparseable(
            "No columns to parse from file.".to_string(),
        ));
    }

    let columns = headers.len();
    if let Some(row) = csv_reader.records().next() {
        let row = row.map_err(|e| ValidationError::Unparseable(e.to_string()))?;
        if row.len() > columns {
            return Err(ValidationError::Unparseable(format!(
                "Expected {} fields in line 2, saw {}",
                columns,
                row.len()
            )));
        }
    }

    Ok(())
}
