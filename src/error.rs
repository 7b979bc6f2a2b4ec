use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GradeError {
    #[error("{field} must be numeric (got {raw:?})")]
    InvalidMark { field: String, raw: String },
    #[error("no course at index {index}")]
    NoSuchCourse { index: usize },
    #[error("unknown course field: {0}")]
    UnknownField(String),
}

impl GradeError {
    pub fn code(&self) -> &'static str {
        match self {
            GradeError::InvalidMark { .. } => "invalid_mark",
            GradeError::NoSuchCourse { .. } => "not_found",
            GradeError::UnknownField(_) => "bad_params",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum UploadError {
    #[error("File must contain header and at least one data row")]
    MalformedFile { non_blank_lines: usize },
    #[error("Please upload a CSV or Excel file")]
    UnsupportedFileType { mime_type: String },
    #[error("File size must be less than {}", size_label(.max_bytes))]
    FileTooLarge { size_bytes: u64, max_bytes: u64 },
}

fn size_label(bytes: &u64) -> String {
    let bytes = *bytes;
    const MIB: u64 = 1024 * 1024;
    if bytes >= MIB && bytes % MIB == 0 {
        format!("{}MB", bytes / MIB)
    } else if bytes >= 1024 && bytes % 1024 == 0 {
        format!("{}KB", bytes / 1024)
    } else {
        format!("{} bytes", bytes)
    }
}

impl UploadError {
    pub fn code(&self) -> &'static str {
        match self {
            UploadError::MalformedFile { .. } => "malformed_file",
            UploadError::UnsupportedFileType { .. } | UploadError::FileTooLarge { .. } => {
                "file_rejected"
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_limit_message_uses_readable_units() {
        let e = UploadError::FileTooLarge { size_bytes: 1, max_bytes: 5 * 1024 * 1024 };
        assert_eq!(e.to_string(), "File size must be less than 5MB");
        let e = UploadError::FileTooLarge { size_bytes: 1, max_bytes: 2048 };
        assert_eq!(e.to_string(), "File size must be less than 2KB");
        let e = UploadError::FileTooLarge { size_bytes: 1, max_bytes: 1000 };
        assert_eq!(e.to_string(), "File size must be less than 1000 bytes");
    }
}
