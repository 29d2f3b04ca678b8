use super::raw::{
	RawAuthResults, RawDateRange, RawDkimAuthResult, RawFeedback, RawIdentifiers,
	RawPolicyEvaluated, RawPolicyOverrideReason, RawPolicyPublished, RawRecord,
	RawReportMetadata, RawRow, RawSpfAuthResult, Text,
};
use super::types::*;
use crate::error::SchemaError;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use std::io::Read;
use std::net::IpAddr;
use std::str::FromStr;
use strum::VariantNames;

type Result<T> = std::result::Result<T, SchemaError>;

/// Decodes a decompressed aggregate report.
pub fn from_slice(data: &[u8]) -> Result<Feedback> {
	from_reader(data)
}

/// Decodes a decompressed aggregate report read from `reader`.
pub fn from_reader<R: Read>(reader: R) -> Result<Feedback> {
	let raw: RawFeedback = serde_xml_rs::from_reader(reader)?;
	feedback(raw)
}

/// Trims a textual field and turns a blank one into an absent one.
///
/// Several reporters emit optional tags such as `<sp></sp>` or `<fo/>` with no
/// content; those mean "no value", never the empty string.
pub fn blank_to_none(text: Text) -> Text {
	text.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn child(parent: &str, name: &str) -> String {
	format!("{parent}.{name}")
}

fn nth(parent: &str, name: &str, index: usize) -> String {
	format!("{parent}.{name}[{index}]")
}

fn required<T>(path: String, value: Option<T>) -> Result<T> {
	value.ok_or(SchemaError::Missing { path })
}

fn required_text(path: String, text: Text) -> Result<String> {
	required(path, blank_to_none(text))
}

fn optional_enum<T: FromStr + VariantNames>(path: String, text: Text) -> Result<Option<T>> {
	blank_to_none(text)
		.map(|value| {
			T::from_str(&value).map_err(|_| SchemaError::InvalidEnum {
				path,
				value,
				expected: T::VARIANTS.join(", "),
			})
		})
		.transpose()
}

fn required_enum<T: FromStr + VariantNames>(path: String, text: Text) -> Result<T> {
	let value = optional_enum(path.clone(), text)?;
	required(path, value)
}

fn bounded_int(path: String, text: Text, min: i64, max: i64) -> Result<i64> {
	let value = required_text(path.clone(), text)?;
	let number = i64::from_str(&value).map_err(|_| SchemaError::InvalidNumber {
		path: path.clone(),
		value,
	})?;
	if number < min || number > max {
		return Err(SchemaError::OutOfRange {
			path,
			value: number,
			min,
			max,
		});
	}
	Ok(number)
}

fn timestamp(path: String, text: Text) -> Result<DateTime<Utc>> {
	let value = required_text(path.clone(), text)?;
	let seconds = i64::from_str(&value).map_err(|_| SchemaError::InvalidNumber {
		path: path.clone(),
		value: value.clone(),
	})?;
	Utc.timestamp_opt(seconds, 0)
		.single()
		.ok_or(SchemaError::InvalidTimestamp { path, value })
}

fn feedback(raw: RawFeedback) -> Result<Feedback> {
	let path = "feedback";

	let version = blank_to_none(raw.version)
		.map(|value| {
			Decimal::from_str(&value).map_err(|_| SchemaError::InvalidNumber {
				path: child(path, "version"),
				value,
			})
		})
		.transpose()?;

	let report_metadata = report_metadata(
		&child(path, "report_metadata"),
		required(child(path, "report_metadata"), raw.report_metadata)?,
	)?;
	let policy_published = policy_published(
		&child(path, "policy_published"),
		required(child(path, "policy_published"), raw.policy_published)?,
	)?;

	if raw.record.is_empty() {
		return Err(SchemaError::TooFew {
			path: child(path, "record"),
			min: 1,
		});
	}
	let record = raw
		.record
		.into_iter()
		.enumerate()
		.map(|(i, r)| record(&nth(path, "record", i), r))
		.collect::<Result<Vec<_>>>()?;

	Ok(Feedback {
		version,
		report_metadata,
		policy_published,
		record,
	})
}

fn report_metadata(path: &str, raw: RawReportMetadata) -> Result<ReportMetadata> {
	Ok(ReportMetadata {
		org_name: required_text(child(path, "org_name"), raw.org_name)?,
		email: required_text(child(path, "email"), raw.email)?,
		extra_contact_info: blank_to_none(raw.extra_contact_info),
		report_id: required_text(child(path, "report_id"), raw.report_id)?,
		date_range: date_range(
			&child(path, "date_range"),
			required(child(path, "date_range"), raw.date_range)?,
		)?,
		error: raw
			.error
			.into_iter()
			.filter_map(|e| blank_to_none(Some(e)))
			.collect(),
	})
}

fn date_range(path: &str, raw: RawDateRange) -> Result<DateRange> {
	Ok(DateRange {
		begin: timestamp(child(path, "begin"), raw.begin)?,
		end: timestamp(child(path, "end"), raw.end)?,
	})
}

fn policy_published(path: &str, raw: RawPolicyPublished) -> Result<PolicyPublished> {
	Ok(PolicyPublished {
		domain: required_text(child(path, "domain"), raw.domain)?,
		adkim: optional_enum(child(path, "adkim"), raw.adkim)?,
		aspf: optional_enum(child(path, "aspf"), raw.aspf)?,
		p: required_enum(child(path, "p"), raw.p)?,
		sp: optional_enum(child(path, "sp"), raw.sp)?,
		pct: bounded_int(child(path, "pct"), raw.pct, 0, 100)? as u8,
		fo: blank_to_none(raw.fo),
		np: blank_to_none(raw.np),
	})
}

fn record(path: &str, raw: RawRecord) -> Result<Record> {
	Ok(Record {
		row: row(&child(path, "row"), required(child(path, "row"), raw.row)?)?,
		identifiers: identifiers(
			&child(path, "identifiers"),
			required(child(path, "identifiers"), raw.identifiers)?,
		)?,
		auth_results: auth_results(
			&child(path, "auth_results"),
			required(child(path, "auth_results"), raw.auth_results)?,
		)?,
	})
}

fn row(path: &str, raw: RawRow) -> Result<Row> {
	let ip_path = child(path, "source_ip");
	let ip = required_text(ip_path.clone(), raw.source_ip)?;
	let source_ip = IpAddr::from_str(&ip).map_err(|_| SchemaError::InvalidIp {
		path: ip_path,
		value: ip,
	})?;

	Ok(Row {
		source_ip,
		count: bounded_int(child(path, "count"), raw.count, 0, u32::MAX.into())? as u32,
		policy_evaluated: policy_evaluated(
			&child(path, "policy_evaluated"),
			required(child(path, "policy_evaluated"), raw.policy_evaluated)?,
		)?,
	})
}

fn policy_evaluated(path: &str, raw: RawPolicyEvaluated) -> Result<PolicyEvaluated> {
	Ok(PolicyEvaluated {
		disposition: required_enum(child(path, "disposition"), raw.disposition)?,
		dkim: required_enum(child(path, "dkim"), raw.dkim)?,
		spf: required_enum(child(path, "spf"), raw.spf)?,
		reason: raw
			.reason
			.into_iter()
			.enumerate()
			.map(|(i, r)| override_reason(&nth(path, "reason", i), r))
			.collect::<Result<_>>()?,
	})
}

fn override_reason(path: &str, raw: RawPolicyOverrideReason) -> Result<PolicyOverrideReason> {
	Ok(PolicyOverrideReason {
		kind: required_enum(child(path, "type"), raw.kind)?,
		comment: blank_to_none(raw.comment),
	})
}

fn identifiers(path: &str, raw: RawIdentifiers) -> Result<Identifiers> {
	Ok(Identifiers {
		envelope_to: blank_to_none(raw.envelope_to),
		envelope_from: blank_to_none(raw.envelope_from),
		header_from: required_text(child(path, "header_from"), raw.header_from)?,
	})
}

fn auth_results(path: &str, raw: RawAuthResults) -> Result<AuthResults> {
	if raw.spf.is_empty() {
		return Err(SchemaError::TooFew {
			path: child(path, "spf"),
			min: 1,
		});
	}

	Ok(AuthResults {
		dkim: raw
			.dkim
			.into_iter()
			.enumerate()
			.map(|(i, r)| dkim(&nth(path, "dkim", i), r))
			.collect::<Result<_>>()?,
		spf: raw
			.spf
			.into_iter()
			.enumerate()
			.map(|(i, r)| spf(&nth(path, "spf", i), r))
			.collect::<Result<_>>()?,
	})
}

fn dkim(path: &str, raw: RawDkimAuthResult) -> Result<DkimAuthResult> {
	Ok(DkimAuthResult {
		domain: required_text(child(path, "domain"), raw.domain)?,
		selector: blank_to_none(raw.selector),
		result: required_enum(child(path, "result"), raw.result)?,
		human_result: blank_to_none(raw.human_result),
	})
}

fn spf(path: &str, raw: RawSpfAuthResult) -> Result<SpfAuthResult> {
	Ok(SpfAuthResult {
		domain: required_text(child(path, "domain"), raw.domain)?,
		scope: optional_enum(child(path, "scope"), raw.scope)?,
		result: required_enum(child(path, "result"), raw.result)?,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;
	use rstest::rstest;

	const REPORT: &str = r#"<?xml version="1.0" encoding="UTF-8" ?>
<feedback>
  <version>1.0</version>
  <report_metadata>
    <org_name>google.com</org_name>
    <email>noreply-dmarc-support@google.com</email>
    <extra_contact_info>https://support.google.com/a/answer/2466580</extra_contact_info>
    <report_id>5717107811868587391</report_id>
    <date_range>
      <begin>1672531200</begin>
      <end>1672617599</end>
    </date_range>
  </report_metadata>
  <policy_published>
    <domain>example.com</domain>
    <adkim>r</adkim>
    <aspf>s</aspf>
    <p>reject</p>
    <sp></sp>
    <pct>100</pct>
    <fo/>
    <np>  </np>
  </policy_published>
  <record>
    <row>
      <source_ip>2001:db8::1</source_ip>
      <count>3</count>
      <policy_evaluated>
        <disposition>none</disposition>
        <dkim>pass</dkim>
        <spf>fail</spf>
        <reason>
          <type>mailing_list</type>
          <comment>list.example.org</comment>
        </reason>
      </policy_evaluated>
    </row>
    <identifiers>
      <header_from>example.com</header_from>
    </identifiers>
    <auth_results>
      <dkim>
        <domain>example.com</domain>
        <selector>s1</selector>
        <result>pass</result>
      </dkim>
      <spf>
        <domain>bounce.example.com</domain>
        <scope>mfrom</scope>
        <result>softfail</result>
      </spf>
    </auth_results>
  </record>
</feedback>
"#;

	#[test]
	fn blank_to_none_normalizes() {
		assert_eq!(blank_to_none(None), None);
		assert_eq!(blank_to_none(Some(String::new())), None);
		assert_eq!(blank_to_none(Some(" \n\t".to_string())), None);
		assert_eq!(blank_to_none(Some(" r ".to_string())), Some("r".to_string()));
	}

	#[test]
	fn decode_full_report() {
		let feedback = from_slice(REPORT.as_bytes()).unwrap();

		assert_eq!(feedback.version, Some(Decimal::from_str("1.0").unwrap()));
		assert_eq!(feedback.version.unwrap().to_string(), "1.0");

		let metadata = &feedback.report_metadata;
		assert_eq!(metadata.report_id, "5717107811868587391");
		assert_eq!(
			metadata.date_range.begin,
			Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap()
		);
		assert_eq!(
			metadata.date_range.end,
			Utc.with_ymd_and_hms(2023, 1, 1, 23, 59, 59).unwrap()
		);
		assert!(metadata.error.is_empty());

		assert_eq!(
			feedback.policy_published,
			PolicyPublished {
				domain: "example.com".to_string(),
				adkim: Some(Alignment::R),
				aspf: Some(Alignment::S),
				p: Disposition::Reject,
				sp: None,
				pct: 100,
				fo: None,
				np: None,
			}
		);

		assert_eq!(feedback.record.len(), 1);
		let record = &feedback.record[0];
		assert_eq!(record.row.source_ip, "2001:db8::1".parse::<IpAddr>().unwrap());
		assert_eq!(record.row.count, 3);
		assert_eq!(
			record.row.policy_evaluated.reason,
			vec![PolicyOverrideReason {
				kind: PolicyOverride::MailingList,
				comment: Some("list.example.org".to_string()),
			}]
		);
		assert!(record.row.policy_evaluated.dmarc_pass());
		assert_eq!(record.identifiers.envelope_from, None);
		assert_eq!(record.auth_results.dkim[0].selector.as_deref(), Some("s1"));
		assert_eq!(record.auth_results.spf[0].result, SpfResult::SoftFail);
		assert_eq!(record.auth_results.spf[0].scope, Some(SpfDomainScope::Mfrom));
	}

	#[rstest]
	#[case("<pct>100</pct>", "<pct>0</pct>")]
	#[case("<adkim>r</adkim>", "")]
	#[case("<selector>s1</selector>", "")]
	#[case("<dkim>\n        <domain>example.com</domain>\n        <selector>s1</selector>\n        <result>pass</result>\n      </dkim>", "")]
	#[case("<version>1.0</version>", "")]
	#[case("<reason>\n          <type>mailing_list</type>\n          <comment>list.example.org</comment>\n        </reason>", "")]
	fn accepted_variants(#[case] from: &str, #[case] to: &str) {
		let xml = REPORT.replacen(from, to, 1);
		assert_ne!(xml, REPORT);
		from_slice(xml.as_bytes()).unwrap();
	}

	#[rstest]
	#[case("<pct>100</pct>", "<pct>101</pct>", "feedback.policy_published.pct")]
	#[case("<pct>100</pct>", "<pct>-1</pct>", "feedback.policy_published.pct")]
	#[case("<pct>100</pct>", "<pct>ten</pct>", "feedback.policy_published.pct")]
	#[case("<pct>100</pct>", "", "feedback.policy_published.pct")]
	#[case("<p>reject</p>", "", "feedback.policy_published.p")]
	#[case("<p>reject</p>", "<p>block</p>", "feedback.policy_published.p")]
	#[case("<aspf>s</aspf>", "<aspf>strict</aspf>", "feedback.policy_published.aspf")]
	#[case("<header_from>example.com</header_from>", "", "feedback.record[0].identifiers.header_from")]
	#[case("<disposition>none</disposition>", "", "feedback.record[0].row.policy_evaluated.disposition")]
	#[case("<count>3</count>", "", "feedback.record[0].row.count")]
	#[case("<count>3</count>", "<count>-3</count>", "feedback.record[0].row.count")]
	#[case("<source_ip>2001:db8::1</source_ip>", "<source_ip>mail.example.com</source_ip>", "feedback.record[0].row.source_ip")]
	#[case("<begin>1672531200</begin>", "<begin>yesterday</begin>", "feedback.report_metadata.date_range.begin")]
	#[case("<report_id>5717107811868587391</report_id>", "<report_id/>", "feedback.report_metadata.report_id")]
	#[case("<type>mailing_list</type>", "<type>mailinglist</type>", "feedback.record[0].row.policy_evaluated.reason[0].type")]
	#[case("<result>softfail</result>", "<result>softpass</result>", "feedback.record[0].auth_results.spf[0].result")]
	#[case("<version>1.0</version>", "<version>one</version>", "feedback.version")]
	fn rejected_variants(#[case] from: &str, #[case] to: &str, #[case] path: &str) {
		let xml = REPORT.replacen(from, to, 1);
		assert_ne!(xml, REPORT);
		let err = from_slice(xml.as_bytes()).unwrap_err();
		assert_eq!(err.path(), Some(path), "{err}");
	}

	#[test]
	fn spf_is_mandatory() {
		let start = REPORT.find("<spf>\n        <domain>").unwrap();
		let end = start + REPORT[start..].find("</spf>").unwrap() + "</spf>".len();
		let xml = format!("{}{}", &REPORT[..start], &REPORT[end..]);

		assert!(matches!(
			from_slice(xml.as_bytes()),
			Err(SchemaError::TooFew { path, min: 1 }) if path == "feedback.record[0].auth_results.spf"
		));
	}

	#[test]
	fn records_are_mandatory() {
		let start = REPORT.find("<record>").unwrap();
		let end = REPORT.find("</record>").unwrap() + "</record>".len();
		let xml = format!("{}{}", &REPORT[..start], &REPORT[end..]);

		assert!(matches!(
			from_slice(xml.as_bytes()),
			Err(SchemaError::TooFew { path, .. }) if path == "feedback.record"
		));
	}

	#[test]
	fn invalid_enum_lists_accepted_values() {
		let xml = REPORT.replacen("<p>reject</p>", "<p>drop</p>", 1);
		let err = from_slice(xml.as_bytes()).unwrap_err();
		assert_eq!(
			err.to_string(),
			"`feedback.policy_published.p` has invalid value 'drop', expected one of: none, quarantine, reject"
		);
	}

	#[test]
	fn malformed_xml() {
		assert!(matches!(
			from_slice(b"<feedback><version>1.0</feedback>"),
			Err(SchemaError::Xml(_))
		));
	}
}
