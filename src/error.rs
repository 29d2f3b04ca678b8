use std::io;

/// The report container could not be opened or decompressed.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
	#[error("failed to read report: {0}")]
	Io(#[from] io::Error),
	#[error("gzip stream is corrupt: {0}")]
	Gzip(#[source] io::Error),
	#[error("zip archive is corrupt: {0}")]
	Zip(#[from] zip::result::ZipError),
	#[error("zip archive has no entries")]
	EmptyArchive,
}

/// The decoded XML does not match the aggregate report grammar.
///
/// Every variant but `Xml` carries the dotted path of the offending element,
/// e.g. `feedback.record[1].row.source_ip`.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
	#[error("malformed XML: {0}")]
	Xml(#[from] serde_xml_rs::Error),
	#[error("missing required field `{path}`")]
	Missing { path: String },
	#[error("`{path}` has invalid value '{value}', expected one of: {expected}")]
	InvalidEnum {
		path: String,
		value: String,
		expected: String,
	},
	#[error("`{path}` is not a valid number: '{value}'")]
	InvalidNumber { path: String, value: String },
	#[error("`{path}` is {value}, must be between {min} and {max}")]
	OutOfRange {
		path: String,
		value: i64,
		min: i64,
		max: i64,
	},
	#[error("`{path}` is not an IPv4 or IPv6 address: '{value}'")]
	InvalidIp { path: String, value: String },
	#[error("`{path}` is not a representable unix timestamp: '{value}'")]
	InvalidTimestamp { path: String, value: String },
	#[error("`{path}` needs at least {min} element(s)")]
	TooFew { path: String, min: usize },
}

impl SchemaError {
	/// Path of the element at fault, if the error is tied to one.
	pub fn path(&self) -> Option<&str> {
		match self {
			Self::Xml(_) => None,
			Self::Missing { path }
			| Self::InvalidEnum { path, .. }
			| Self::InvalidNumber { path, .. }
			| Self::OutOfRange { path, .. }
			| Self::InvalidIp { path, .. }
			| Self::InvalidTimestamp { path, .. }
			| Self::TooFew { path, .. } => Some(path),
		}
	}
}

/// Failure raised by a [`crate::store::ReportStore`] backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
	#[error("unique constraint on `{entity}` violated by '{key}'")]
	UniqueViolation { entity: &'static str, key: String },
	#[error("mysql: {0}")]
	Mysql(#[from] mysql::Error),
	#[error("store lock poisoned by a panicked import")]
	Poisoned,
	#[error("stored `{entity}` row is unreadable: {reason}")]
	Corrupt { entity: &'static str, reason: String },
}

/// Result of a store operation.
pub type StoreResult<T> = Result<T, StoreError>;

/// Everything that can abort the import of a single report.
///
/// None of these is fatal to a batch: the caller logs it and moves on.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
	#[error(transparent)]
	Container(#[from] ContainerError),
	#[error(transparent)]
	Schema(#[from] SchemaError),
	#[error("report '{report_id}' already imported")]
	Duplicate { report_id: String },
	#[error(transparent)]
	Store(#[from] StoreError),
}

impl ImportError {
	/// Already-imported reports are skipped, not failed.
	pub fn is_duplicate(&self) -> bool {
		matches!(self, Self::Duplicate { .. })
	}
}

/// Result of an import.
pub type ImportResult<T> = Result<T, ImportError>;
