use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::net::IpAddr;

macro_rules! text_enum {
	($(#[$meta:meta])* $name:ident, $case:literal { $($variant:ident),+ $(,)? }) => {
		$(#[$meta])*
		#[derive(
			Debug,
			Clone,
			Copy,
			PartialEq,
			Eq,
			Hash,
			Serialize,
			strum::EnumString,
			strum::Display,
			strum::AsRefStr,
			strum::EnumVariantNames,
		)]
		#[strum(serialize_all = $case)]
		#[serde(rename_all = $case)]
		pub enum $name {
			$($variant),+
		}
	};
}

text_enum!(
	/// Identifier alignment mode.
	Alignment, "lowercase" { R, S }
);

text_enum!(
	/// Handling requested or applied for mail failing DMARC.
	Disposition, "lowercase" { None, Quarantine, Reject }
);

text_enum!(
	/// Aligned DKIM or SPF outcome as seen by DMARC.
	DmarcResult, "lowercase" { Pass, Fail }
);

text_enum!(
	/// Raw outcome of one DKIM signature check.
	DkimResult, "lowercase" { None, Pass, Fail, Policy, Neutral, TempError, PermError }
);

text_enum!(
	/// Raw outcome of one SPF check.
	SpfResult, "lowercase" { None, Neutral, Pass, Fail, SoftFail, TempError, PermError }
);

text_enum!(
	/// Identity an SPF check was run against.
	SpfDomainScope, "lowercase" { Helo, Mfrom }
);

text_enum!(
	/// Why the applied disposition differs from the published policy.
	PolicyOverride, "snake_case" {
		Forwarded,
		SampledOut,
		TrustedForwarder,
		MailingList,
		LocalPolicy,
		Other,
	}
);

fn natural_key<T: Serialize>(tuple: &T) -> String {
	// serializing a tuple of plain strings and enums cannot fail
	let encoded = serde_json::to_vec(tuple).unwrap_or_default();
	format!("{:x}", Sha256::digest(encoded))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateRange {
	pub begin: DateTime<Utc>,
	pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportMetadata {
	pub org_name: String,
	pub email: String,
	pub extra_contact_info: Option<String>,
	pub report_id: String,
	pub date_range: DateRange,
	pub error: Vec<String>,
}

/// The DMARC record the reporter applied, see RFC 7489 section 6.3.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PolicyPublished {
	pub domain: String,
	pub adkim: Option<Alignment>,
	pub aspf: Option<Alignment>,
	pub p: Disposition,
	pub sp: Option<Disposition>,
	pub pct: u8,
	pub fo: Option<String>,
	pub np: Option<String>,
}

impl PolicyPublished {
	/// Content address of the policy: equal policies share a key.
	pub fn natural_key(&self) -> String {
		natural_key(&(
			&self.domain,
			self.adkim,
			self.aspf,
			self.p,
			self.sp,
			self.pct,
			&self.fo,
			&self.np,
		))
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Identifiers {
	pub envelope_to: Option<String>,
	pub envelope_from: Option<String>,
	pub header_from: String,
}

impl Identifiers {
	/// Content address of the identifier triple.
	pub fn natural_key(&self) -> String {
		natural_key(&(&self.envelope_to, &self.envelope_from, &self.header_from))
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DkimAuthResult {
	pub domain: String,
	pub selector: Option<String>,
	pub result: DkimResult,
	pub human_result: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpfAuthResult {
	pub domain: String,
	pub scope: Option<SpfDomainScope>,
	pub result: SpfResult,
}

/// DKIM and SPF results, uninterpreted with respect to DMARC.
///
/// There may be any number of DKIM results but always at least one SPF result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResults {
	pub dkim: Vec<DkimAuthResult>,
	pub spf: Vec<SpfAuthResult>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyOverrideReason {
	pub kind: PolicyOverride,
	pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyEvaluated {
	pub disposition: Disposition,
	pub dkim: DmarcResult,
	pub spf: DmarcResult,
	pub reason: Vec<PolicyOverrideReason>,
}

impl PolicyEvaluated {
	/// DMARC passes when either aligned DKIM or aligned SPF passed.
	pub fn dmarc_pass(&self) -> bool {
		self.dkim == DmarcResult::Pass || self.spf == DmarcResult::Pass
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
	pub source_ip: IpAddr,
	pub count: u32,
	pub policy_evaluated: PolicyEvaluated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
	pub row: Row,
	pub identifiers: Identifiers,
	pub auth_results: AuthResults,
}

/// One aggregate report, the `<feedback>` root element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feedback {
	pub version: Option<Decimal>,
	pub report_metadata: ReportMetadata,
	pub policy_published: PolicyPublished,
	pub record: Vec<Record>,
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;
	use std::str::FromStr;
	use strum::VariantNames;

	fn policy() -> PolicyPublished {
		PolicyPublished {
			domain: "example.com".to_string(),
			adkim: Some(Alignment::R),
			aspf: None,
			p: Disposition::Quarantine,
			sp: None,
			pct: 100,
			fo: None,
			np: None,
		}
	}

	#[test]
	fn enum_spelling() {
		assert_eq!(DkimResult::from_str("temperror").unwrap(), DkimResult::TempError);
		assert_eq!(SpfResult::SoftFail.to_string(), "softfail");
		assert_eq!(
			PolicyOverride::from_str("trusted_forwarder").unwrap(),
			PolicyOverride::TrustedForwarder
		);
		assert_eq!(
			PolicyOverride::VARIANTS,
			&[
				"forwarded",
				"sampled_out",
				"trusted_forwarder",
				"mailing_list",
				"local_policy",
				"other"
			]
		);
		assert!(Disposition::from_str("Reject").is_err());
	}

	#[test]
	fn dmarc_pass_needs_one_aligned_pass() {
		let mut evaluated = PolicyEvaluated {
			disposition: Disposition::None,
			dkim: DmarcResult::Fail,
			spf: DmarcResult::Fail,
			reason: vec![],
		};
		assert!(!evaluated.dmarc_pass());
		evaluated.spf = DmarcResult::Pass;
		assert!(evaluated.dmarc_pass());
		evaluated.spf = DmarcResult::Fail;
		evaluated.dkim = DmarcResult::Pass;
		assert!(evaluated.dmarc_pass());
	}

	#[test]
	fn natural_key_is_structural() {
		assert_eq!(policy().natural_key(), policy().natural_key());
		assert_eq!(policy().natural_key().len(), 64);

		let mut other = policy();
		other.pct = 50;
		assert_ne!(policy().natural_key(), other.natural_key());

		let mut other = policy();
		other.fo = Some("1".to_string());
		assert_ne!(policy().natural_key(), other.natural_key());
	}

	#[test]
	fn identifier_key_distinguishes_positions() {
		let a = Identifiers {
			envelope_to: Some("example.com".to_string()),
			envelope_from: None,
			header_from: "example.com".to_string(),
		};
		let b = Identifiers {
			envelope_to: None,
			envelope_from: Some("example.com".to_string()),
			header_from: "example.com".to_string(),
		};
		assert_ne!(a.natural_key(), b.natural_key());
	}
}
