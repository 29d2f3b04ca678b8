//! Relational persistence of imported reports.
//!
//! The import engine only talks to a [`ReportStore`]. Everything it writes for one
//! report goes through a single [`StoreUnit`], which is either committed as a
//! whole or rolled back as a whole.

use crate::dmarc::{
	DkimAuthResult, Feedback, Identifiers, PolicyEvaluated, PolicyOverrideReason,
	PolicyPublished, ReportMetadata, SpfAuthResult,
};
use crate::error::StoreResult;
use rust_decimal::Decimal;
use std::fmt;
use std::net::IpAddr;

mod memory;
mod mysql_store;

pub use self::memory::MemoryStore;
pub use self::mysql_store::MysqlStore;

/// Entity names used in [`crate::error::StoreError::UniqueViolation`].
pub mod entity {
	pub const POLICY_PUBLISHED: &str = "policy_published";
	pub const REPORT_METADATA: &str = "report_metadata";
	pub const IDENTIFIER: &str = "identifier";
}

/// Handle of a persisted report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReportId(pub u64);

impl fmt::Display for ReportId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// Surrogate key of any other stored row.
pub type RowId = u64;

/// Number of rows in every table.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TableCounts {
	pub policy_published: u64,
	pub report: u64,
	pub report_metadata: u64,
	pub identifier: u64,
	pub record: u64,
	pub auth_result: u64,
	pub dkim_auth_result: u64,
	pub spf_auth_result: u64,
	pub row: u64,
	pub policy_evaluated: u64,
	pub policy_override_reason: u64,
}

/// One all-or-nothing batch of writes.
///
/// Dropping a unit without committing it rolls it back.
pub trait StoreUnit {
	/// Returns the policy row structurally equal to `policy`, creating it if needed.
	fn get_or_create_policy(&mut self, policy: &PolicyPublished) -> StoreResult<RowId>;

	/// Returns the identifier row structurally equal to `identifiers`, creating it if needed.
	fn get_or_create_identifier(&mut self, identifiers: &Identifiers) -> StoreResult<RowId>;

	fn create_report(&mut self, policy: RowId, version: Option<Decimal>) -> StoreResult<ReportId>;

	/// Fails with `UniqueViolation` if `metadata.report_id` is already stored, either
	/// right away or at commit time.
	fn create_metadata(&mut self, report: ReportId, metadata: &ReportMetadata)
		-> StoreResult<RowId>;

	fn create_record(&mut self, report: ReportId, identifier: RowId) -> StoreResult<RowId>;

	fn create_auth_result(&mut self, record: RowId) -> StoreResult<RowId>;

	fn create_spf_result(&mut self, auth_result: RowId, spf: &SpfAuthResult)
		-> StoreResult<RowId>;

	fn create_dkim_result(&mut self, auth_result: RowId, dkim: &DkimAuthResult)
		-> StoreResult<RowId>;

	fn create_row(&mut self, record: RowId, source_ip: IpAddr, count: u32) -> StoreResult<RowId>;

	/// Stores the disposition and aligned results; reasons are stored separately.
	fn create_policy_evaluated(&mut self, row: RowId, evaluated: &PolicyEvaluated)
		-> StoreResult<RowId>;

	fn create_override_reason(
		&mut self,
		policy_evaluated: RowId,
		reason: &PolicyOverrideReason,
	) -> StoreResult<RowId>;

	fn commit(self: Box<Self>) -> StoreResult<()>;

	fn rollback(self: Box<Self>) -> StoreResult<()>;
}

/// A relational store for imported reports.
///
/// Implementations must be usable from several threads at once: concurrent
/// get-or-create calls for equal content must end up on the same row.
pub trait ReportStore: Send + Sync {
	/// Opens a new atomic unit of work.
	fn begin(&self) -> StoreResult<Box<dyn StoreUnit + '_>>;

	/// Rebuilds the document a report was imported from.
	fn load_report(&self, id: ReportId) -> StoreResult<Option<Feedback>>;

	/// All stored reports, oldest first.
	fn report_ids(&self) -> StoreResult<Vec<ReportId>>;

	fn counts(&self) -> StoreResult<TableCounts>;
}
