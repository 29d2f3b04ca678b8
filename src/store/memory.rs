use super::{entity, ReportId, ReportStore, RowId, StoreUnit, TableCounts};
use crate::dmarc::{
	AuthResults, DkimAuthResult, Feedback, Identifiers, PolicyEvaluated, PolicyOverrideReason,
	PolicyPublished, Record, ReportMetadata, Row, SpfAuthResult,
};
use crate::error::{StoreError, StoreResult};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard};

struct ReportRow {
	policy: RowId,
	version: Option<Decimal>,
}

struct RecordRow {
	report: ReportId,
	identifier: RowId,
}

struct RowRow {
	record: RowId,
	source_ip: IpAddr,
	count: u32,
}

/// Every table is append-only; the id of a row is its position plus one.
#[derive(Default)]
struct Tables {
	policies: Vec<PolicyPublished>,
	policy_keys: HashMap<String, RowId>,
	identifiers: Vec<Identifiers>,
	identifier_keys: HashMap<String, RowId>,
	reports: Vec<ReportRow>,
	metadata: Vec<(ReportId, ReportMetadata)>,
	report_ids: HashMap<String, RowId>,
	records: Vec<RecordRow>,
	auth_results: Vec<RowId>,
	spf: Vec<(RowId, SpfAuthResult)>,
	dkim: Vec<(RowId, DkimAuthResult)>,
	rows: Vec<RowRow>,
	evaluated: Vec<(RowId, PolicyEvaluated)>,
	reasons: Vec<(RowId, PolicyOverrideReason)>,
}

/// Table lengths at the start of a unit.
#[derive(Clone, Copy)]
struct Marks {
	policies: usize,
	identifiers: usize,
	reports: usize,
	metadata: usize,
	records: usize,
	auth_results: usize,
	spf: usize,
	dkim: usize,
	rows: usize,
	evaluated: usize,
	reasons: usize,
}

fn next_id<T>(table: &[T]) -> RowId {
	table.len() as RowId + 1
}

fn corrupt(entity: &'static str, reason: impl Into<String>) -> StoreError {
	StoreError::Corrupt {
		entity,
		reason: reason.into(),
	}
}

impl Tables {
	fn marks(&self) -> Marks {
		Marks {
			policies: self.policies.len(),
			identifiers: self.identifiers.len(),
			reports: self.reports.len(),
			metadata: self.metadata.len(),
			records: self.records.len(),
			auth_results: self.auth_results.len(),
			spf: self.spf.len(),
			dkim: self.dkim.len(),
			rows: self.rows.len(),
			evaluated: self.evaluated.len(),
			reasons: self.reasons.len(),
		}
	}

	fn rewind(&mut self, marks: &Marks) {
		self.policies.truncate(marks.policies);
		self.identifiers.truncate(marks.identifiers);
		self.reports.truncate(marks.reports);
		self.metadata.truncate(marks.metadata);
		self.records.truncate(marks.records);
		self.auth_results.truncate(marks.auth_results);
		self.spf.truncate(marks.spf);
		self.dkim.truncate(marks.dkim);
		self.rows.truncate(marks.rows);
		self.evaluated.truncate(marks.evaluated);
		self.reasons.truncate(marks.reasons);

		let policies = marks.policies as RowId;
		self.policy_keys.retain(|_, id| *id <= policies);
		let identifiers = marks.identifiers as RowId;
		self.identifier_keys.retain(|_, id| *id <= identifiers);
		let metadata = marks.metadata as RowId;
		self.report_ids.retain(|_, id| *id <= metadata);
	}

	fn counts(&self) -> TableCounts {
		TableCounts {
			policy_published: self.policies.len() as u64,
			report: self.reports.len() as u64,
			report_metadata: self.metadata.len() as u64,
			identifier: self.identifiers.len() as u64,
			record: self.records.len() as u64,
			auth_result: self.auth_results.len() as u64,
			dkim_auth_result: self.dkim.len() as u64,
			spf_auth_result: self.spf.len() as u64,
			row: self.rows.len() as u64,
			policy_evaluated: self.evaluated.len() as u64,
			policy_override_reason: self.reasons.len() as u64,
		}
	}

	fn load(&self, id: ReportId) -> StoreResult<Option<Feedback>> {
		let report = match id.0.checked_sub(1).and_then(|i| self.reports.get(i as usize)) {
			Some(report) => report,
			None => return Ok(None),
		};

		let policy_published = self
			.policies
			.get(report.policy as usize - 1)
			.cloned()
			.ok_or_else(|| corrupt("report", format!("unknown policy {}", report.policy)))?;
		let report_metadata = self
			.metadata
			.iter()
			.find(|(owner, _)| *owner == id)
			.map(|(_, metadata)| metadata.clone())
			.ok_or_else(|| corrupt("report_metadata", format!("none for report {id}")))?;

		let record = self
			.records
			.iter()
			.enumerate()
			.filter(|(_, record)| record.report == id)
			.map(|(i, record)| self.load_record(i as RowId + 1, record))
			.collect::<StoreResult<_>>()?;

		Ok(Some(Feedback {
			version: report.version,
			report_metadata,
			policy_published,
			record,
		}))
	}

	fn load_record(&self, id: RowId, record: &RecordRow) -> StoreResult<Record> {
		let identifiers = self
			.identifiers
			.get(record.identifier as usize - 1)
			.cloned()
			.ok_or_else(|| corrupt("record", format!("unknown identifier {}", record.identifier)))?;

		let auth_result = self
			.auth_results
			.iter()
			.position(|owner| *owner == id)
			.map(|i| i as RowId + 1)
			.ok_or_else(|| corrupt("auth_result", format!("none for record {id}")))?;
		let auth_results = AuthResults {
			dkim: self
				.dkim
				.iter()
				.filter(|(owner, _)| *owner == auth_result)
				.map(|(_, dkim)| dkim.clone())
				.collect(),
			spf: self
				.spf
				.iter()
				.filter(|(owner, _)| *owner == auth_result)
				.map(|(_, spf)| spf.clone())
				.collect(),
		};

		let (row_id, row) = self
			.rows
			.iter()
			.enumerate()
			.find(|(_, row)| row.record == id)
			.map(|(i, row)| (i as RowId + 1, row))
			.ok_or_else(|| corrupt("row", format!("none for record {id}")))?;
		let (evaluated_id, evaluated) = self
			.evaluated
			.iter()
			.enumerate()
			.find(|(_, (owner, _))| *owner == row_id)
			.map(|(i, (_, evaluated))| (i as RowId + 1, evaluated))
			.ok_or_else(|| corrupt("policy_evaluated", format!("none for row {row_id}")))?;

		let policy_evaluated = PolicyEvaluated {
			reason: self
				.reasons
				.iter()
				.filter(|(owner, _)| *owner == evaluated_id)
				.map(|(_, reason)| reason.clone())
				.collect(),
			..evaluated.clone()
		};

		Ok(Record {
			row: Row {
				source_ip: row.source_ip,
				count: row.count,
				policy_evaluated,
			},
			identifiers,
			auth_results,
		})
	}
}

/// A [`ReportStore`] kept in process memory.
///
/// Units take the store lock for their whole lifetime, so imports running on
/// several threads are applied one after the other.
#[derive(Default)]
pub struct MemoryStore {
	tables: Mutex<Tables>,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	fn lock(&self) -> StoreResult<MutexGuard<'_, Tables>> {
		self.tables.lock().map_err(|_| StoreError::Poisoned)
	}
}

impl ReportStore for MemoryStore {
	fn begin(&self) -> StoreResult<Box<dyn StoreUnit + '_>> {
		let tables = self.lock()?;
		let marks = tables.marks();
		Ok(Box::new(MemoryUnit {
			tables,
			marks,
			finished: false,
		}))
	}

	fn load_report(&self, id: ReportId) -> StoreResult<Option<Feedback>> {
		self.lock()?.load(id)
	}

	fn report_ids(&self) -> StoreResult<Vec<ReportId>> {
		let tables = self.lock()?;
		Ok((1..=tables.reports.len() as u64).map(ReportId).collect())
	}

	fn counts(&self) -> StoreResult<TableCounts> {
		Ok(self.lock()?.counts())
	}
}

struct MemoryUnit<'a> {
	tables: MutexGuard<'a, Tables>,
	marks: Marks,
	finished: bool,
}

impl Drop for MemoryUnit<'_> {
	fn drop(&mut self) {
		if !self.finished {
			let marks = self.marks;
			self.tables.rewind(&marks);
		}
	}
}

impl StoreUnit for MemoryUnit<'_> {
	fn get_or_create_policy(&mut self, policy: &PolicyPublished) -> StoreResult<RowId> {
		let key = policy.natural_key();
		if let Some(id) = self.tables.policy_keys.get(&key) {
			return Ok(*id);
		}
		let id = next_id(&self.tables.policies);
		self.tables.policies.push(policy.clone());
		self.tables.policy_keys.insert(key, id);
		Ok(id)
	}

	fn get_or_create_identifier(&mut self, identifiers: &Identifiers) -> StoreResult<RowId> {
		let key = identifiers.natural_key();
		if let Some(id) = self.tables.identifier_keys.get(&key) {
			return Ok(*id);
		}
		let id = next_id(&self.tables.identifiers);
		self.tables.identifiers.push(identifiers.clone());
		self.tables.identifier_keys.insert(key, id);
		Ok(id)
	}

	fn create_report(&mut self, policy: RowId, version: Option<Decimal>) -> StoreResult<ReportId> {
		let id = ReportId(next_id(&self.tables.reports));
		self.tables.reports.push(ReportRow { policy, version });
		Ok(id)
	}

	fn create_metadata(
		&mut self,
		report: ReportId,
		metadata: &ReportMetadata,
	) -> StoreResult<RowId> {
		if self.tables.report_ids.contains_key(&metadata.report_id) {
			return Err(StoreError::UniqueViolation {
				entity: entity::REPORT_METADATA,
				key: metadata.report_id.clone(),
			});
		}
		let id = next_id(&self.tables.metadata);
		self.tables.metadata.push((report, metadata.clone()));
		self.tables.report_ids.insert(metadata.report_id.clone(), id);
		Ok(id)
	}

	fn create_record(&mut self, report: ReportId, identifier: RowId) -> StoreResult<RowId> {
		let id = next_id(&self.tables.records);
		self.tables.records.push(RecordRow { report, identifier });
		Ok(id)
	}

	fn create_auth_result(&mut self, record: RowId) -> StoreResult<RowId> {
		let id = next_id(&self.tables.auth_results);
		self.tables.auth_results.push(record);
		Ok(id)
	}

	fn create_spf_result(&mut self, auth_result: RowId, spf: &SpfAuthResult) -> StoreResult<RowId> {
		let id = next_id(&self.tables.spf);
		self.tables.spf.push((auth_result, spf.clone()));
		Ok(id)
	}

	fn create_dkim_result(
		&mut self,
		auth_result: RowId,
		dkim: &DkimAuthResult,
	) -> StoreResult<RowId> {
		let id = next_id(&self.tables.dkim);
		self.tables.dkim.push((auth_result, dkim.clone()));
		Ok(id)
	}

	fn create_row(&mut self, record: RowId, source_ip: IpAddr, count: u32) -> StoreResult<RowId> {
		let id = next_id(&self.tables.rows);
		self.tables.rows.push(RowRow {
			record,
			source_ip,
			count,
		});
		Ok(id)
	}

	fn create_policy_evaluated(
		&mut self,
		row: RowId,
		evaluated: &PolicyEvaluated,
	) -> StoreResult<RowId> {
		let id = next_id(&self.tables.evaluated);
		let evaluated = PolicyEvaluated {
			reason: vec![],
			..evaluated.clone()
		};
		self.tables.evaluated.push((row, evaluated));
		Ok(id)
	}

	fn create_override_reason(
		&mut self,
		policy_evaluated: RowId,
		reason: &PolicyOverrideReason,
	) -> StoreResult<RowId> {
		let id = next_id(&self.tables.reasons);
		self.tables.reasons.push((policy_evaluated, reason.clone()));
		Ok(id)
	}

	fn commit(mut self: Box<Self>) -> StoreResult<()> {
		self.finished = true;
		Ok(())
	}

	fn rollback(mut self: Box<Self>) -> StoreResult<()> {
		let marks = self.marks;
		self.tables.rewind(&marks);
		self.finished = true;
		Ok(())
	}
}
