use crate::error::UploadError;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

pub const REQUIRED_HEADERS: [&str; 5] = ["Name", "USN", "Email", "Branch", "Semester"];
pub const OPTIONAL_HEADERS: [&str; 2] = ["Phone", "Year"];

pub const DEFAULT_MAX_FILE_BYTES: u64 = 5 * 1024 * 1024;
pub const DEFAULT_ALLOWED_MIME_TYPES: [&str; 3] = [
    "text/csv",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
];

pub const TEMPLATE_FILENAME: &str = "student_upload_template.csv";
const TEMPLATE: &str = "Name,USN,Email,Phone,Branch,Semester,Year\n\
John Doe,1MS20CS001,john@example.com,9876543210,CSE,5,3\n\
Jane Smith,1MS20IS002,jane@example.com,9876543211,ISE,6,3";

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap();
}

pub fn template() -> &'static str {
    TEMPLATE
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRow {
    pub row_number: usize,
    pub values: BTreeMap<String, String>,
}

impl UploadRow {
    /// Cell for `header`, or "" when the column is absent.
    pub fn get(&self, header: &str) -> &str {
        self.values.get(header).map(String::as_str).unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedUpload {
    pub headers: Vec<String>,
    pub rows: Vec<UploadRow>,
}

/// Split uploaded CSV text into header + rows.
///
/// A leading byte-order mark (Excel exports) is dropped. Plain comma splitting: quoted cells with embedded commas are not
/// supported, matching files produced from the download template.
pub fn parse_csv(text: &str) -> Result<ParsedUpload, UploadError> {
    let text = text.trim_start_matches('\u{feff}');
    let lines: Vec<&str> = text.split('\n').filter(|l| !l.trim().is_empty()).collect();
    if lines.len() < 2 {
        return Err(UploadError::MalformedFile {
            non_blank_lines: lines.len(),
        });
    }

    let headers: Vec<String> = lines[0].split(',').map(|h| h.trim().to_string()).collect();
    let rows = lines[1..]
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let cells: Vec<&str> = line.split(',').map(str::trim).collect();
            let mut values = BTreeMap::new();
            for (col, header) in headers.iter().enumerate() {
                let cell = cells.get(col).copied().unwrap_or("");
                // Later duplicates of a header overwrite earlier ones.
                values.insert(header.clone(), cell.to_string());
            }
            UploadRow {
                // Line 1 is the header.
                row_number: i + 2,
                values,
            }
        })
        .collect();

    Ok(ParsedUpload { headers, rows })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowErrors {
    pub row_number: usize,
    pub messages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub total_rows: usize,
    pub valid_rows: usize,
    pub error_rows: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub row_errors: Vec<RowErrors>,
}

impl ValidationResult {
    /// Upload is allowed only when nothing at all was reported as an error,
    /// including the file-level missing-columns entry.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

pub fn is_valid_email(s: &str) -> bool {
    EMAIL_RE.is_match(s)
}

fn semester_in_range(raw: &str) -> bool {
    match raw.parse::<f64>() {
        Ok(n) if n.is_finite() => (1.0..=8.0).contains(&n),
        _ => false,
    }
}

fn row_messages(row: &UploadRow) -> Vec<String> {
    let mut messages = Vec::new();
    if row.get("Name").is_empty() {
        messages.push("Name is required".to_string());
    }
    if row.get("USN").is_empty() {
        messages.push("USN is required".to_string());
    }
    let email = row.get("Email");
    if email.is_empty() {
        messages.push("Email is required".to_string());
    } else if !is_valid_email(email) {
        messages.push("Invalid email format".to_string());
    }
    if row.get("Branch").is_empty() {
        messages.push("Branch is required".to_string());
    }
    let semester = row.get("Semester");
    if semester.is_empty() {
        messages.push("Semester is required".to_string());
    } else if !semester_in_range(semester) {
        messages.push("Semester must be between 1 and 8".to_string());
    }
    messages
}

pub fn validate(rows: &[UploadRow], headers: &[String]) -> ValidationResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut row_errors = Vec::new();

    let missing: Vec<&str> = REQUIRED_HEADERS
        .iter()
        .copied()
        .filter(|h| !headers.iter().any(|have| have == h))
        .collect();
    if !missing.is_empty() {
        errors.push(format!("Missing required columns: {}", missing.join(", ")));
    }

    let mut valid_rows = 0usize;
    for row in rows {
        let messages = row_messages(row);
        if messages.is_empty() {
            valid_rows += 1;
        } else {
            errors.push(format!("Row {}: {}", row.row_number, messages.join(", ")));
            row_errors.push(RowErrors {
                row_number: row.row_number,
                messages,
            });
        }
        if row.get("Phone").is_empty() {
            warnings.push(format!("Row {}: Phone number missing", row.row_number));
        }
    }

    ValidationResult {
        total_rows: rows.len(),
        valid_rows,
        error_rows: rows.len() - valid_rows,
        errors,
        warnings,
        row_errors,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateUsn {
    pub usn: String,
    pub row_numbers: Vec<usize>,
}

/// USNs that appear on more than one row. Importing keeps the last of them.
pub fn duplicate_usns(rows: &[UploadRow]) -> Vec<DuplicateUsn> {
    let mut seen: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for row in rows {
        let usn = row.get("USN");
        if !usn.is_empty() {
            seen.entry(usn).or_default().push(row.row_number);
        }
    }
    seen.into_iter()
        .filter(|(_, found)| found.len() > 1)
        .map(|(usn, row_numbers)| DuplicateUsn {
            usn: usn.to_string(),
            row_numbers,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileLimits {
    pub max_bytes: u64,
    pub allowed_mime_types: Vec<String>,
}

impl Default for FileLimits {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_FILE_BYTES,
            allowed_mime_types: DEFAULT_ALLOWED_MIME_TYPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Pre-parse gate on what the user picked: type first, then size.
pub fn check_file(mime_type: &str, size_bytes: u64, limits: &FileLimits) -> Result<(), UploadError> {
    let mime = mime_type.trim().to_ascii_lowercase();
    if !limits.allowed_mime_types.iter().any(|m| m.eq_ignore_ascii_case(&mime)) {
        return Err(UploadError::UnsupportedFileType {
            mime_type: mime_type.to_string(),
        });
    }
    if size_bytes > limits.max_bytes {
        return Err(UploadError::FileTooLarge {
            size_bytes,
            max_bytes: limits.max_bytes,
        });
    }
    Ok(())
}

/// Hex SHA-256 of the uploaded text.
pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(text: &str) -> ValidationResult {
        let parsed = parse_csv(text).expect("parse");
        validate(&parsed.rows, &parsed.headers)
    }

    #[test]
    fn bad_email_and_semester_are_two_messages_on_one_row() {
        let v = check("Name,USN,Email,Branch,Semester\nJohn,1BG21CS001,bad-email,CSE,9\n");
        assert_eq!(v.total_rows, 1);
        assert_eq!(v.valid_rows, 0);
        assert_eq!(v.error_rows, 1);
        assert_eq!(v.row_errors.len(), 1);
        assert_eq!(v.row_errors[0].row_number, 2);
        assert_eq!(
            v.row_errors[0].messages,
            vec![
                "Invalid email format".to_string(),
                "Semester must be between 1 and 8".to_string()
            ]
        );
        assert_eq!(
            v.errors,
            vec!["Row 2: Invalid email format, Semester must be between 1 and 8".to_string()]
        );
    }

    #[test]
    fn header_only_file_is_malformed() {
        let e = parse_csv("Name,USN,Email,Branch,Semester\n\n   \n").unwrap_err();
        assert_eq!(e, UploadError::MalformedFile { non_blank_lines: 1 });
        assert_eq!(e.code(), "malformed_file");
        assert_eq!(
            e.to_string(),
            "File must contain header and at least one data row"
        );
        assert!(parse_csv("").is_err());
    }

    #[test]
    fn missing_phone_warns_but_row_stays_valid() {
        let v = check(
            "Name,USN,Email,Phone,Branch,Semester\nAsha,1MS20CS010,asha@example.com,,CSE,4\n",
        );
        assert_eq!(v.valid_rows, 1);
        assert_eq!(v.error_rows, 0);
        assert!(v.is_clean());
        assert_eq!(v.warnings, vec!["Row 2: Phone number missing".to_string()]);
    }

    #[test]
    fn missing_columns_reported_once_and_rows_still_checked() {
        let v = check("Name,Email\nRavi,ravi@example.com\n");
        assert_eq!(
            v.errors[0],
            "Missing required columns: USN, Branch, Semester"
        );
        assert_eq!(
            v.errors[1],
            "Row 2: USN is required, Branch is required, Semester is required"
        );
        assert_eq!(v.valid_rows + v.error_rows, v.total_rows);
    }

    #[test]
    fn short_rows_pad_with_empty_and_blank_lines_do_not_shift_numbers() {
        let parsed = parse_csv(
            "Name,USN,Email,Phone,Branch,Semester\r\n\r\nA,U1,a@x.io,1,CSE,1\r\nB,U2\r\n",
        )
        .expect("parse");
        assert_eq!(parsed.headers.last().map(String::as_str), Some("Semester"));
        assert_eq!(parsed.rows.len(), 2);
        assert_eq!(parsed.rows[0].row_number, 2);
        assert_eq!(parsed.rows[1].row_number, 3);
        assert_eq!(parsed.rows[0].get("Semester"), "1");
        assert_eq!(parsed.rows[1].get("Email"), "");
        let v = validate(&parsed.rows, &parsed.headers);
        assert_eq!(v.valid_rows, 1);
        assert_eq!(v.error_rows, 1);
    }

    #[test]
    fn byte_order_mark_does_not_hide_first_header() {
        let v = check("\u{feff}Name,USN,Email,Branch,Semester\nAsha,U1,asha@x.io,CSE,2\n");
        assert!(v.is_clean(), "{:?}", v.errors);
        assert_eq!(v.valid_rows, 1);
    }

    #[test]
    fn repeated_usns_are_listed_with_their_rows() {
        let parsed = parse_csv(
            "Name,USN,Email,Branch,Semester\nA,U1,a@x.io,CSE,1\nB,U2,b@x.io,CSE,1\nA2,U1,a@x.io,CSE,2\n,,,,\n,,,,\n",
        )
        .expect("parse");
        assert_eq!(
            duplicate_usns(&parsed.rows),
            vec![DuplicateUsn {
                usn: "U1".to_string(),
                row_numbers: vec![2, 4]
            }]
        );
    }

    #[test]
    fn semester_bounds() {
        assert!(semester_in_range("1"));
        assert!(semester_in_range("8"));
        assert!(semester_in_range("5.5"));
        assert!(!semester_in_range("0"));
        assert!(!semester_in_range("9"));
        assert!(!semester_in_range("five"));
        assert!(!semester_in_range("NaN"));
    }

    #[test]
    fn email_pattern() {
        assert!(is_valid_email("john@example.com"));
        assert!(!is_valid_email("john@example"));
        assert!(!is_valid_email("jo hn@example.com"));
        assert!(!is_valid_email("a@b@c.d"));
    }

    #[test]
    fn file_gate_checks_type_then_size() {
        let limits = FileLimits::default();
        assert!(check_file("text/csv", 1024, &limits).is_ok());
        assert!(check_file("TEXT/CSV", 1024, &limits).is_ok());
        let e = check_file("application/pdf", 10, &limits).unwrap_err();
        assert_eq!(e.to_string(), "Please upload a CSV or Excel file");
        let e = check_file("text/csv", DEFAULT_MAX_FILE_BYTES + 1, &limits).unwrap_err();
        assert_eq!(e.to_string(), "File size must be less than 5MB");
        assert_eq!(e.code(), "file_rejected");
        assert!(check_file("text/csv", DEFAULT_MAX_FILE_BYTES, &limits).is_ok());
    }

    #[test]
    fn template_passes_its_own_validation() {
        let parsed = parse_csv(template()).expect("parse");
        for h in REQUIRED_HEADERS.iter().chain(OPTIONAL_HEADERS.iter()) {
            assert!(parsed.headers.iter().any(|have| have == h), "{}", h);
        }
        let v = validate(&parsed.rows, &parsed.headers);
        assert_eq!(v.total_rows, 2);
        assert!(v.is_clean());
        assert!(v.warnings.is_empty());
    }

    #[test]
    fn fingerprint_is_stable_hex() {
        let a = fingerprint("Name\nx");
        assert_eq!(a.len(), 64);
        assert_eq!(a, fingerprint("Name\nx"));
        assert_ne!(a, fingerprint("Name\ny"));
    }
}
