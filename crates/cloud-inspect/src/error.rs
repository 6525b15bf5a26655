//! Error types for the inspection pipeline.
//!
//! Each error carries a machine-readable code in the format `CLOUD-XXXX`:
//! - `CLOUD-1xxx`: I/O errors (file reading, writing)
//! - `CLOUD-2xxx`: Validation errors (empty or malformed data)
//! - `CLOUD-3xxx`: Processing errors (reconstruction, subprocess, workers)
//! - `CLOUD-4xxx`: Format errors (unsupported or malformed files)
//!
//! Numeric edge cases (insufficient neighbors, zero eigenvalue sums, negative
//! radii, all-zero densities) are deliberately *not* errors; they have defined
//! fallback behaviors in the modules that encounter them. Only I/O and
//! subprocess failures propagate, and they stop at the nearest orchestration
//! boundary (per-file task or per-subfolder generator call).

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pipeline operations.
pub type CloudResult<T> = Result<T, CloudError>;

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// CLOUD-1001: Failed to read file
    IoRead = 1001,
    /// CLOUD-1002: Failed to write file
    IoWrite = 1002,
    /// CLOUD-1003: Failed to parse file contents
    ParseError = 1003,

    /// CLOUD-2001: Point cloud has no usable points
    EmptyCloud = 2001,

    /// CLOUD-3001: Surface reconstruction failed
    ReconstructionFailed = 3001,
    /// CLOUD-3002: External generator exited with nonzero status
    GeneratorFailed = 3002,
    /// CLOUD-3003: External generator exceeded its time budget
    GeneratorTimeout = 3003,
    /// CLOUD-3004: External generator could not be launched
    GeneratorLaunch = 3004,
    /// CLOUD-3005: Worker pool construction failed
    WorkerPool = 3005,

    /// CLOUD-4001: Unsupported file format
    UnsupportedFormat = 4001,
}

impl ErrorCode {
    /// Returns the error code as a string in the format `CLOUD-XXXX`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::IoRead => "CLOUD-1001",
            ErrorCode::IoWrite => "CLOUD-1002",
            ErrorCode::ParseError => "CLOUD-1003",
            ErrorCode::EmptyCloud => "CLOUD-2001",
            ErrorCode::ReconstructionFailed => "CLOUD-3001",
            ErrorCode::GeneratorFailed => "CLOUD-3002",
            ErrorCode::GeneratorTimeout => "CLOUD-3003",
            ErrorCode::GeneratorLaunch => "CLOUD-3004",
            ErrorCode::WorkerPool => "CLOUD-3005",
            ErrorCode::UnsupportedFormat => "CLOUD-4001",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors that can occur during cloud processing.
#[derive(Debug, Error, Diagnostic)]
pub enum CloudError {
    /// Error reading from a file.
    #[error("failed to read point cloud from {path}")]
    #[diagnostic(
        code(cloud::io::read),
        help("Check that the file exists and is readable")
    )]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error writing to a file.
    #[error("failed to write {path}")]
    #[diagnostic(
        code(cloud::io::write),
        help("Check that the output directory exists and is writable")
    )]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error parsing a point cloud file.
    #[error("failed to parse point cloud from {path}: {details}")]
    #[diagnostic(
        code(cloud::parse::error),
        help("The file may be truncated or not a PLY point cloud")
    )]
    ParseError { path: PathBuf, details: String },

    /// Unsupported file format.
    #[error("unsupported point cloud format: {extension:?}")]
    #[diagnostic(code(cloud::format::unsupported), help("Supported format: PLY"))]
    UnsupportedFormat { extension: Option<String> },

    /// Point cloud has no usable points.
    #[error("point cloud is empty: {details}")]
    #[diagnostic(
        code(cloud::validation::empty),
        help("Check that the raw-cloud generator produced a non-empty file")
    )]
    EmptyCloud { details: String },

    /// Surface reconstruction failed.
    #[error("surface reconstruction failed: {details}")]
    #[diagnostic(
        code(cloud::reconstruct::failed),
        help("Try a smaller octree depth or check that the cloud spans a surface")
    )]
    ReconstructionFailed { details: String },

    /// External raw-cloud generator exited with nonzero status.
    #[error("raw-cloud generator failed for {subfolder} with exit status {status}")]
    #[diagnostic(
        code(cloud::generator::failed),
        help("Inspect the captured generator output in the log for details")
    )]
    GeneratorFailed {
        subfolder: PathBuf,
        status: i32,
        stdout: String,
        stderr: String,
    },

    /// External raw-cloud generator exceeded its time budget.
    #[error("raw-cloud generator timed out for {subfolder} after {seconds}s")]
    #[diagnostic(
        code(cloud::generator::timeout),
        help("Increase the generator timeout or check the generator for hangs")
    )]
    GeneratorTimeout { subfolder: PathBuf, seconds: u64 },

    /// External raw-cloud generator could not be launched.
    #[error("failed to launch raw-cloud generator {program}")]
    #[diagnostic(
        code(cloud::generator::launch),
        help("Check that the generator path exists and is executable")
    )]
    GeneratorLaunch {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Worker pool construction failed.
    #[error("failed to build worker pool: {details}")]
    #[diagnostic(code(cloud::batch::pool))]
    WorkerPool { details: String },
}

impl CloudError {
    /// Returns the machine-readable error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            CloudError::IoRead { .. } => ErrorCode::IoRead,
            CloudError::IoWrite { .. } => ErrorCode::IoWrite,
            CloudError::ParseError { .. } => ErrorCode::ParseError,
            CloudError::UnsupportedFormat { .. } => ErrorCode::UnsupportedFormat,
            CloudError::EmptyCloud { .. } => ErrorCode::EmptyCloud,
            CloudError::ReconstructionFailed { .. } => ErrorCode::ReconstructionFailed,
            CloudError::GeneratorFailed { .. } => ErrorCode::GeneratorFailed,
            CloudError::GeneratorTimeout { .. } => ErrorCode::GeneratorTimeout,
            CloudError::GeneratorLaunch { .. } => ErrorCode::GeneratorLaunch,
            CloudError::WorkerPool { .. } => ErrorCode::WorkerPool,
        }
    }

    /// Create an IoRead error.
    pub fn io_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CloudError::IoRead {
            path: path.into(),
            source,
        }
    }

    /// Create an IoWrite error.
    pub fn io_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CloudError::IoWrite {
            path: path.into(),
            source,
        }
    }

    /// Create a ParseError.
    pub fn parse_error(path: impl Into<PathBuf>, details: impl Into<String>) -> Self {
        CloudError::ParseError {
            path: path.into(),
            details: details.into(),
        }
    }

    /// Create an EmptyCloud error.
    pub fn empty_cloud(details: impl Into<String>) -> Self {
        CloudError::EmptyCloud {
            details: details.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        let err = CloudError::empty_cloud("no points");
        assert_eq!(err.code(), ErrorCode::EmptyCloud);
        assert_eq!(err.code().as_str(), "CLOUD-2001");

        let err = CloudError::GeneratorFailed {
            subfolder: PathBuf::from("sub"),
            status: 7,
            stdout: String::new(),
            stderr: String::new(),
        };
        assert_eq!(err.code().as_str(), "CLOUD-3002");
    }

    #[test]
    fn display_includes_context() {
        let err = CloudError::GeneratorTimeout {
            subfolder: PathBuf::from("part-01"),
            seconds: 600,
        };
        let msg = err.to_string();
        assert!(msg.contains("part-01"));
        assert!(msg.contains("600"));
    }
}
