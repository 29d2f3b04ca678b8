use super::{entity, ReportId, ReportStore, RowId, StoreUnit, TableCounts};
use crate::config::DatabaseConfig;
use crate::dmarc::{
	AuthResults, DateRange, DkimAuthResult, Feedback, Identifiers, PolicyEvaluated,
	PolicyOverrideReason, PolicyPublished, Record, ReportMetadata, Row, SpfAuthResult,
};
use crate::error::{StoreError, StoreResult};
use chrono::{TimeZone, Utc};
use mysql::prelude::*;
use mysql::{params, OptsBuilder, Params, Pool, PooledConn, Transaction, TxOpts};
use rust_decimal::Decimal;
use std::net::IpAddr;
use std::str::FromStr;

/// `ER_DUP_ENTRY`, raised when a unique index rejects an insert.
const ER_DUP_ENTRY: u16 = 1062;

const SCHEMA: &[&str] = &[
	r"CREATE TABLE IF NOT EXISTS policy_published (
		id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
		natural_key CHAR(64) NOT NULL UNIQUE,
		domain VARCHAR(255) NOT NULL,
		adkim VARCHAR(1) NULL,
		aspf VARCHAR(1) NULL,
		p VARCHAR(16) NOT NULL,
		sp VARCHAR(16) NULL,
		pct TINYINT UNSIGNED NOT NULL,
		fo VARCHAR(255) NULL,
		np VARCHAR(255) NULL
	) ENGINE=InnoDB",
	r"CREATE TABLE IF NOT EXISTS report (
		id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
		version VARCHAR(32) NULL,
		policy_published BIGINT UNSIGNED NOT NULL,
		FOREIGN KEY (policy_published) REFERENCES policy_published (id) ON DELETE CASCADE
	) ENGINE=InnoDB",
	r"CREATE TABLE IF NOT EXISTS report_metadata (
		id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
		report BIGINT UNSIGNED NOT NULL UNIQUE,
		org_name VARCHAR(255) NOT NULL,
		email VARCHAR(255) NOT NULL,
		extra_contact_info VARCHAR(1024) NULL,
		report_id VARCHAR(255) CHARACTER SET utf8mb4 COLLATE utf8mb4_bin NOT NULL UNIQUE,
		date_range_begin DATETIME NOT NULL,
		date_range_end DATETIME NOT NULL,
		`error` TEXT NOT NULL,
		FOREIGN KEY (report) REFERENCES report (id) ON DELETE CASCADE
	) ENGINE=InnoDB",
	r"CREATE TABLE IF NOT EXISTS identifier (
		id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
		natural_key CHAR(64) NOT NULL UNIQUE,
		envelope_to VARCHAR(255) NULL,
		envelope_from VARCHAR(255) NULL,
		header_from VARCHAR(255) NOT NULL
	) ENGINE=InnoDB",
	r"CREATE TABLE IF NOT EXISTS record (
		id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
		report BIGINT UNSIGNED NOT NULL,
		identifier BIGINT UNSIGNED NOT NULL,
		FOREIGN KEY (report) REFERENCES report (id) ON DELETE CASCADE,
		FOREIGN KEY (identifier) REFERENCES identifier (id) ON DELETE CASCADE
	) ENGINE=InnoDB",
	r"CREATE TABLE IF NOT EXISTS auth_result (
		id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
		record BIGINT UNSIGNED NOT NULL UNIQUE,
		FOREIGN KEY (record) REFERENCES record (id) ON DELETE CASCADE
	) ENGINE=InnoDB",
	r"CREATE TABLE IF NOT EXISTS dkim_auth_result (
		id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
		auth_result BIGINT UNSIGNED NOT NULL,
		domain VARCHAR(255) NOT NULL,
		selector VARCHAR(255) NULL,
		result VARCHAR(16) NOT NULL,
		human_result VARCHAR(1024) NULL,
		FOREIGN KEY (auth_result) REFERENCES auth_result (id) ON DELETE CASCADE
	) ENGINE=InnoDB",
	r"CREATE TABLE IF NOT EXISTS spf_auth_result (
		id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
		auth_result BIGINT UNSIGNED NOT NULL,
		domain VARCHAR(255) NOT NULL,
		scope VARCHAR(8) NULL,
		result VARCHAR(16) NOT NULL,
		FOREIGN KEY (auth_result) REFERENCES auth_result (id) ON DELETE CASCADE
	) ENGINE=InnoDB",
	r"CREATE TABLE IF NOT EXISTS record_row (
		id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
		record BIGINT UNSIGNED NOT NULL UNIQUE,
		source_ip VARCHAR(45) NOT NULL,
		`count` INT UNSIGNED NOT NULL,
		FOREIGN KEY (record) REFERENCES record (id) ON DELETE CASCADE
	) ENGINE=InnoDB",
	r"CREATE TABLE IF NOT EXISTS policy_evaluated (
		id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
		record_row BIGINT UNSIGNED NOT NULL UNIQUE,
		disposition VARCHAR(16) NOT NULL,
		dkim VARCHAR(8) NOT NULL,
		spf VARCHAR(8) NOT NULL,
		FOREIGN KEY (record_row) REFERENCES record_row (id) ON DELETE CASCADE
	) ENGINE=InnoDB",
	r"CREATE TABLE IF NOT EXISTS policy_override_reason (
		id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
		policy_evaluated BIGINT UNSIGNED NOT NULL,
		`type` VARCHAR(32) NOT NULL,
		comment VARCHAR(1024) NULL,
		FOREIGN KEY (policy_evaluated) REFERENCES policy_evaluated (id) ON DELETE CASCADE
	) ENGINE=InnoDB",
];

const TABLES: [&str; 11] = [
	"policy_published",
	"report",
	"report_metadata",
	"identifier",
	"record",
	"auth_result",
	"dkim_auth_result",
	"spf_auth_result",
	"record_row",
	"policy_evaluated",
	"policy_override_reason",
];

// epoch conversions in FROM_UNIXTIME/UNIX_TIMESTAMP follow the session zone
const SESSION_UTC: &str = "SET time_zone = '+00:00'";

fn opts(config: &DatabaseConfig) -> OptsBuilder {
	OptsBuilder::new()
		.ip_or_hostname(Some(config.host.as_str()))
		.tcp_port(config.port)
		.user(Some(config.username.as_str()))
		.pass(Some(config.password.as_str()))
		.db_name(Some(config.database.as_str()))
}

fn classify(err: mysql::Error, entity: &'static str, key: &str) -> StoreError {
	match err {
		mysql::Error::MySqlError(ref e) if e.code == ER_DUP_ENTRY => StoreError::UniqueViolation {
			entity,
			key: key.to_string(),
		},
		other => StoreError::Mysql(other),
	}
}

fn parse<T: FromStr>(entity: &'static str, value: &str) -> StoreResult<T> {
	T::from_str(value).map_err(|_| StoreError::Corrupt {
		entity,
		reason: format!("unexpected value '{value}'"),
	})
}

fn parse_opt<T: FromStr>(entity: &'static str, value: Option<String>) -> StoreResult<Option<T>> {
	value.map(|v| parse(entity, &v)).transpose()
}

/// A [`ReportStore`] backed by a MySQL or MariaDB database.
///
/// The schema is created on connect if it does not exist yet.
pub struct MysqlStore {
	pool: Pool,
}

impl MysqlStore {
	pub fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
		Self::with_pool(Pool::new(opts(config))?)
	}

	/// Connects with a `mysql://` URL, whose credentials must already be percent-encoded.
	pub fn from_url(url: &str) -> StoreResult<Self> {
		Self::with_pool(Pool::new(url)?)
	}

	fn with_pool(pool: Pool) -> StoreResult<Self> {
		let store = Self { pool };
		store.migrate()?;
		Ok(store)
	}

	fn migrate(&self) -> StoreResult<()> {
		let mut conn = self.conn()?;
		for statement in SCHEMA {
			conn.query_drop(*statement)?;
		}
		tracing::debug!("database schema is up to date");
		Ok(())
	}

	fn conn(&self) -> StoreResult<PooledConn> {
		let mut conn = self.pool.get_conn()?;
		conn.query_drop(SESSION_UTC)?;
		Ok(conn)
	}

	fn load_record(
		conn: &mut PooledConn,
		id: RowId,
		identifiers: Identifiers,
	) -> StoreResult<Record> {
		let auth_result: RowId = conn
			.exec_first("SELECT id FROM auth_result WHERE record = ?", (id,))?
			.ok_or_else(|| StoreError::Corrupt {
				entity: "auth_result",
				reason: format!("none for record {id}"),
			})?;

		let dkim: Vec<DkimAuthResult> = conn
			.exec::<(String, Option<String>, String, Option<String>), _, _>(
				"SELECT domain, selector, result, human_result FROM dkim_auth_result
				 WHERE auth_result = ? ORDER BY id",
				(auth_result,),
			)?
			.into_iter()
			.map(|(domain, selector, result, human_result)| {
				Ok(DkimAuthResult {
					domain,
					selector,
					result: parse("dkim_auth_result", &result)?,
					human_result,
				})
			})
			.collect::<StoreResult<_>>()?;
		let spf: Vec<SpfAuthResult> = conn
			.exec::<(String, Option<String>, String), _, _>(
				"SELECT domain, scope, result FROM spf_auth_result
				 WHERE auth_result = ? ORDER BY id",
				(auth_result,),
			)?
			.into_iter()
			.map(|(domain, scope, result)| {
				Ok(SpfAuthResult {
					domain,
					scope: parse_opt("spf_auth_result", scope)?,
					result: parse("spf_auth_result", &result)?,
				})
			})
			.collect::<StoreResult<_>>()?;

		let (source_ip, count, evaluated, disposition, dkim_aligned, spf_aligned) = conn
			.exec_first::<(String, u32, RowId, String, String, String), _, _>(
				"SELECT rw.source_ip, rw.`count`, pe.id, pe.disposition, pe.dkim, pe.spf
				 FROM record_row rw JOIN policy_evaluated pe ON pe.record_row = rw.id
				 WHERE rw.record = ?",
				(id,),
			)?
			.ok_or_else(|| StoreError::Corrupt {
				entity: "record_row",
				reason: format!("none for record {id}"),
			})?;
		let reason: Vec<PolicyOverrideReason> = conn
			.exec::<(String, Option<String>), _, _>(
				"SELECT `type`, comment FROM policy_override_reason
				 WHERE policy_evaluated = ? ORDER BY id",
				(evaluated,),
			)?
			.into_iter()
			.map(|(kind, comment)| {
				Ok(PolicyOverrideReason {
					kind: parse("policy_override_reason", &kind)?,
					comment,
				})
			})
			.collect::<StoreResult<_>>()?;

		Ok(Record {
			row: Row {
				source_ip: parse::<IpAddr>("record_row", &source_ip)?,
				count,
				policy_evaluated: PolicyEvaluated {
					disposition: parse("policy_evaluated", &disposition)?,
					dkim: parse("policy_evaluated", &dkim_aligned)?,
					spf: parse("policy_evaluated", &spf_aligned)?,
					reason,
				},
			},
			identifiers,
			auth_results: AuthResults { dkim, spf },
		})
	}
}

impl ReportStore for MysqlStore {
	fn begin(&self) -> StoreResult<Box<dyn StoreUnit + '_>> {
		let mut tx = self.pool.start_transaction(TxOpts::default())?;
		tx.query_drop(SESSION_UTC)?;
		Ok(Box::new(MysqlUnit { tx }))
	}

	fn load_report(&self, id: ReportId) -> StoreResult<Option<Feedback>> {
		let mut conn = self.conn()?;

		let (version, policy) = match conn.exec_first::<(Option<String>, RowId), _, _>(
			"SELECT version, policy_published FROM report WHERE id = ?",
			(id.0,),
		)? {
			Some(report) => report,
			None => return Ok(None),
		};

		let (domain, adkim, aspf, p, sp, pct, fo, np) = conn
			.exec_first::<(
				String,
				Option<String>,
				Option<String>,
				String,
				Option<String>,
				u8,
				Option<String>,
				Option<String>,
			), _, _>(
				"SELECT domain, adkim, aspf, p, sp, pct, fo, np FROM policy_published WHERE id = ?",
				(policy,),
			)?
			.ok_or_else(|| StoreError::Corrupt {
				entity: "report",
				reason: format!("unknown policy {policy}"),
			})?;
		let policy_published = PolicyPublished {
			domain,
			adkim: parse_opt("policy_published", adkim)?,
			aspf: parse_opt("policy_published", aspf)?,
			p: parse("policy_published", &p)?,
			sp: parse_opt("policy_published", sp)?,
			pct,
			fo,
			np,
		};

		let (org_name, email, extra_contact_info, report_id, begin, end, error) = conn
			.exec_first::<(String, String, Option<String>, String, i64, i64, String), _, _>(
				"SELECT org_name, email, extra_contact_info, report_id,
					CAST(UNIX_TIMESTAMP(date_range_begin) AS SIGNED),
					CAST(UNIX_TIMESTAMP(date_range_end) AS SIGNED),
					`error`
				 FROM report_metadata WHERE report = ?",
				(id.0,),
			)?
			.ok_or_else(|| StoreError::Corrupt {
				entity: "report_metadata",
				reason: format!("none for report {id}"),
			})?;
		let instant = |seconds: i64| {
			Utc.timestamp_opt(seconds, 0)
				.single()
				.ok_or_else(|| StoreError::Corrupt {
					entity: "report_metadata",
					reason: format!("bad timestamp {seconds}"),
				})
		};
		let report_metadata = ReportMetadata {
			org_name,
			email,
			extra_contact_info,
			report_id,
			date_range: DateRange {
				begin: instant(begin)?,
				end: instant(end)?,
			},
			error: serde_json::from_str(&error).map_err(|e| StoreError::Corrupt {
				entity: "report_metadata",
				reason: e.to_string(),
			})?,
		};

		let records = conn.exec::<(RowId, Option<String>, Option<String>, String), _, _>(
			"SELECT r.id, i.envelope_to, i.envelope_from, i.header_from
			 FROM record r JOIN identifier i ON i.id = r.identifier
			 WHERE r.report = ? ORDER BY r.id",
			(id.0,),
		)?;
		let record: Vec<Record> = records
			.into_iter()
			.map(|(record, envelope_to, envelope_from, header_from)| {
				let identifiers = Identifiers {
					envelope_to,
					envelope_from,
					header_from,
				};
				Self::load_record(&mut conn, record, identifiers)
			})
			.collect::<StoreResult<_>>()?;

		Ok(Some(Feedback {
			version: parse_opt::<Decimal>("report", version)?,
			report_metadata,
			policy_published,
			record,
		}))
	}

	fn report_ids(&self) -> StoreResult<Vec<ReportId>> {
		let ids = self.conn()?.query::<u64, _>("SELECT id FROM report ORDER BY id")?;
		Ok(ids.into_iter().map(ReportId).collect())
	}

	fn counts(&self) -> StoreResult<TableCounts> {
		let mut conn = self.conn()?;
		let mut counts = [0u64; TABLES.len()];
		for (count, table) in counts.iter_mut().zip(TABLES) {
			*count = conn
				.query_first::<u64, _>(format!("SELECT COUNT(*) FROM {table}"))?
				.unwrap_or_default();
		}

		let [
			policy_published,
			report,
			report_metadata,
			identifier,
			record,
			auth_result,
			dkim_auth_result,
			spf_auth_result,
			row,
			policy_evaluated,
			policy_override_reason,
		] = counts;
		Ok(TableCounts {
			policy_published,
			report,
			report_metadata,
			identifier,
			record,
			auth_result,
			dkim_auth_result,
			spf_auth_result,
			row,
			policy_evaluated,
			policy_override_reason,
		})
	}
}

struct MysqlUnit {
	tx: Transaction<'static>,
}

impl MysqlUnit {
	fn insert(
		&mut self,
		entity: &'static str,
		key: &str,
		query: &str,
		params: Params,
	) -> StoreResult<RowId> {
		self.tx
			.exec_drop(query, params)
			.map_err(|e| classify(e, entity, key))?;
		self.tx.last_insert_id().ok_or_else(|| StoreError::Corrupt {
			entity,
			reason: "insert returned no id".to_string(),
		})
	}
}

impl StoreUnit for MysqlUnit {
	fn get_or_create_policy(&mut self, policy: &PolicyPublished) -> StoreResult<RowId> {
		let key = policy.natural_key();
		let params = params! {
			"natural_key" => &key,
			"domain" => &policy.domain,
			"adkim" => policy.adkim.map(|a| a.to_string()),
			"aspf" => policy.aspf.map(|a| a.to_string()),
			"p" => policy.p.to_string(),
			"sp" => policy.sp.map(|d| d.to_string()),
			"pct" => policy.pct,
			"fo" => &policy.fo,
			"np" => &policy.np,
		};
		self.insert(
			entity::POLICY_PUBLISHED,
			&key,
			r"INSERT INTO policy_published (natural_key, domain, adkim, aspf, p, sp, pct, fo, np)
			  VALUES (:natural_key, :domain, :adkim, :aspf, :p, :sp, :pct, :fo, :np)
			  ON DUPLICATE KEY UPDATE id = LAST_INSERT_ID(id)",
			params,
		)
	}

	fn get_or_create_identifier(&mut self, identifiers: &Identifiers) -> StoreResult<RowId> {
		let key = identifiers.natural_key();
		let params = params! {
			"natural_key" => &key,
			"envelope_to" => &identifiers.envelope_to,
			"envelope_from" => &identifiers.envelope_from,
			"header_from" => &identifiers.header_from,
		};
		self.insert(
			entity::IDENTIFIER,
			&key,
			r"INSERT INTO identifier (natural_key, envelope_to, envelope_from, header_from)
			  VALUES (:natural_key, :envelope_to, :envelope_from, :header_from)
			  ON DUPLICATE KEY UPDATE id = LAST_INSERT_ID(id)",
			params,
		)
	}

	fn create_report(&mut self, policy: RowId, version: Option<Decimal>) -> StoreResult<ReportId> {
		let params = params! {
			"version" => version.map(|v| v.to_string()),
			"policy_published" => policy,
		};
		self.insert(
			"report",
			"",
			"INSERT INTO report (version, policy_published) VALUES (:version, :policy_published)",
			params,
		)
		.map(ReportId)
	}

	fn create_metadata(
		&mut self,
		report: ReportId,
		metadata: &ReportMetadata,
	) -> StoreResult<RowId> {
		let params = params! {
			"report" => report.0,
			"org_name" => &metadata.org_name,
			"email" => &metadata.email,
			"extra_contact_info" => &metadata.extra_contact_info,
			"report_id" => &metadata.report_id,
			"begin" => metadata.date_range.begin.timestamp(),
			"end" => metadata.date_range.end.timestamp(),
			"error" => serde_json::to_string(&metadata.error).unwrap_or_else(|_| "[]".to_string()),
		};
		self.insert(
			entity::REPORT_METADATA,
			&metadata.report_id,
			r"INSERT INTO report_metadata
				(report, org_name, email, extra_contact_info, report_id,
				 date_range_begin, date_range_end, `error`)
			  VALUES (:report, :org_name, :email, :extra_contact_info, :report_id,
				 FROM_UNIXTIME(:begin), FROM_UNIXTIME(:end), :error)",
			params,
		)
	}

	fn create_record(&mut self, report: ReportId, identifier: RowId) -> StoreResult<RowId> {
		let params = params! {
			"report" => report.0,
			"identifier" => identifier,
		};
		self.insert(
			"record",
			"",
			"INSERT INTO record (report, identifier) VALUES (:report, :identifier)",
			params,
		)
	}

	fn create_auth_result(&mut self, record: RowId) -> StoreResult<RowId> {
		let params = params! { "record" => record };
		self.insert(
			"auth_result",
			"",
			"INSERT INTO auth_result (record) VALUES (:record)",
			params,
		)
	}

	fn create_spf_result(&mut self, auth_result: RowId, spf: &SpfAuthResult) -> StoreResult<RowId> {
		let params = params! {
			"auth_result" => auth_result,
			"domain" => &spf.domain,
			"scope" => spf.scope.map(|s| s.to_string()),
			"result" => spf.result.to_string(),
		};
		self.insert(
			"spf_auth_result",
			"",
			r"INSERT INTO spf_auth_result (auth_result, domain, scope, result)
			  VALUES (:auth_result, :domain, :scope, :result)",
			params,
		)
	}

	fn create_dkim_result(
		&mut self,
		auth_result: RowId,
		dkim: &DkimAuthResult,
	) -> StoreResult<RowId> {
		let params = params! {
			"auth_result" => auth_result,
			"domain" => &dkim.domain,
			"selector" => &dkim.selector,
			"result" => dkim.result.to_string(),
			"human_result" => &dkim.human_result,
		};
		self.insert(
			"dkim_auth_result",
			"",
			r"INSERT INTO dkim_auth_result (auth_result, domain, selector, result, human_result)
			  VALUES (:auth_result, :domain, :selector, :result, :human_result)",
			params,
		)
	}

	fn create_row(&mut self, record: RowId, source_ip: IpAddr, count: u32) -> StoreResult<RowId> {
		let params = params! {
			"record" => record,
			"source_ip" => source_ip.to_string(),
			"count" => count,
		};
		self.insert(
			"record_row",
			"",
			"INSERT INTO record_row (record, source_ip, `count`) VALUES (:record, :source_ip, :count)",
			params,
		)
	}

	fn create_policy_evaluated(
		&mut self,
		row: RowId,
		evaluated: &PolicyEvaluated,
	) -> StoreResult<RowId> {
		let params = params! {
			"record_row" => row,
			"disposition" => evaluated.disposition.to_string(),
			"dkim" => evaluated.dkim.to_string(),
			"spf" => evaluated.spf.to_string(),
		};
		self.insert(
			"policy_evaluated",
			"",
			r"INSERT INTO policy_evaluated (record_row, disposition, dkim, spf)
			  VALUES (:record_row, :disposition, :dkim, :spf)",
			params,
		)
	}

	fn create_override_reason(
		&mut self,
		policy_evaluated: RowId,
		reason: &PolicyOverrideReason,
	) -> StoreResult<RowId> {
		let params = params! {
			"policy_evaluated" => policy_evaluated,
			"type" => reason.kind.to_string(),
			"comment" => &reason.comment,
		};
		self.insert(
			"policy_override_reason",
			"",
			r"INSERT INTO policy_override_reason (policy_evaluated, `type`, comment)
			  VALUES (:policy_evaluated, :type, :comment)",
			params,
		)
	}

	fn commit(self: Box<Self>) -> StoreResult<()> {
		Ok(self.tx.commit()?)
	}

	fn rollback(self: Box<Self>) -> StoreResult<()> {
		Ok(self.tx.rollback()?)
	}
}
