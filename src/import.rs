//! Turns report documents into stored entity graphs.

use crate::container;
use crate::dmarc::{self, Feedback, Record};
use crate::error::{ContainerError, ImportError, ImportResult, StoreError};
use crate::store::{entity, ReportId, ReportStore, StoreUnit};
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

/// Reads, decodes and imports one report file.
pub fn import_file<S: ReportStore + ?Sized>(store: &S, path: &Path) -> ImportResult<ReportId> {
	let file = File::open(path).map_err(ContainerError::Io)?;
	import_stream(store, BufReader::new(file))
}

/// Imports one report from a raw, gzip or zip stream.
pub fn import_stream<S, R>(store: &S, stream: R) -> ImportResult<ReportId>
where
	S: ReportStore + ?Sized,
	R: Read + Seek,
{
	let data = container::read_report(stream)?;
	let feedback = dmarc::from_slice(&data)?;
	import_report(store, &feedback)
}

/// Stores `feedback` and everything below it as one atomic unit.
///
/// Nothing is left behind when this fails: the unit is rolled back before the
/// error is returned. A report whose id is already stored yields
/// [`ImportError::Duplicate`].
pub fn import_report<S: ReportStore + ?Sized>(
	store: &S,
	feedback: &Feedback,
) -> ImportResult<ReportId> {
	let report_id = &feedback.report_metadata.report_id;
	let duplicate = |err: StoreError| match err {
		StoreError::UniqueViolation { entity: kind, .. } if kind == entity::REPORT_METADATA => {
			ImportError::Duplicate {
				report_id: report_id.clone(),
			}
		}
		other => ImportError::Store(other),
	};

	let mut unit = store.begin()?;
	match write_report(unit.as_mut(), feedback) {
		Ok(id) => {
			unit.commit().map_err(duplicate)?;
			tracing::info!(%report_id, %id, records = feedback.record.len(), "report imported");
			Ok(id)
		}
		Err(err) => {
			if let Err(rollback) = unit.rollback() {
				tracing::warn!(%report_id, %rollback, "rollback failed");
			}
			Err(duplicate(err))
		}
	}
}

fn write_report(
	unit: &mut (dyn StoreUnit + '_),
	feedback: &Feedback,
) -> Result<ReportId, StoreError> {
	let policy = unit.get_or_create_policy(&feedback.policy_published)?;
	let report = unit.create_report(policy, feedback.version)?;
	unit.create_metadata(report, &feedback.report_metadata)?;

	for record in &feedback.record {
		write_record(unit, report, record)?;
	}
	Ok(report)
}

fn write_record(
	unit: &mut (dyn StoreUnit + '_),
	report: ReportId,
	record: &Record,
) -> Result<(), StoreError> {
	let identifier = unit.get_or_create_identifier(&record.identifiers)?;
	let record_id = unit.create_record(report, identifier)?;

	let auth_result = unit.create_auth_result(record_id)?;
	for spf in &record.auth_results.spf {
		unit.create_spf_result(auth_result, spf)?;
	}
	for dkim in &record.auth_results.dkim {
		unit.create_dkim_result(auth_result, dkim)?;
	}

	let row = &record.row;
	let row_id = unit.create_row(record_id, row.source_ip, row.count)?;
	let evaluated = unit.create_policy_evaluated(row_id, &row.policy_evaluated)?;
	for reason in &row.policy_evaluated.reason {
		unit.create_override_reason(evaluated, reason)?;
	}

	tracing::trace!(%report, record = record_id, source_ip = %row.source_ip, "record written");
	Ok(())
}
