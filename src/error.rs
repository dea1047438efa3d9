use thiserror::Error;

/// The error taxonomy of the system: one variant per kind, not per site.
///
/// Per-record problems (oversized reads, malformed TSV rows) are logged and
/// the record is skipped; they never materialize as an `Err` here. Only
/// per-run invariant violations and unrecoverable I/O surface through this
/// type.
#[derive(Error, Debug)]
pub enum HostCallError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("malformed input: {0}")]
    InputFormat(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("capacity reached: {0}")]
    Capacity(String),

    #[error("filter sizing: computed m_bits={computed} exceeds cap={cap}, clamped")]
    FilterSizing { computed: u64, cap: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal invariant violated: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, HostCallError>;
