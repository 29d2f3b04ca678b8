//! Textual shape of an aggregate report as it comes out of the XML.
//!
//! Every leaf is kept as an optional string so that reporters' quirks (empty
//! elements, stray whitespace, missing tags) survive deserialization and can be
//! judged by [`super::decode`] with a precise field path.

use serde::Deserialize;

pub type Text = Option<String>;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawDateRange {
	pub begin: Text,
	pub end: Text,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawReportMetadata {
	pub org_name: Text,
	pub email: Text,
	pub extra_contact_info: Text,
	pub report_id: Text,
	pub date_range: Option<RawDateRange>,
	pub error: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawPolicyPublished {
	pub domain: Text,
	pub adkim: Text,
	pub aspf: Text,
	pub p: Text,
	pub sp: Text,
	pub pct: Text,
	pub fo: Text,
	pub np: Text,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawPolicyOverrideReason {
	#[serde(rename = "type")]
	pub kind: Text,
	pub comment: Text,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawPolicyEvaluated {
	pub disposition: Text,
	pub dkim: Text,
	pub spf: Text,
	pub reason: Vec<RawPolicyOverrideReason>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawRow {
	pub source_ip: Text,
	pub count: Text,
	pub policy_evaluated: Option<RawPolicyEvaluated>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawIdentifiers {
	pub envelope_to: Text,
	pub envelope_from: Text,
	pub header_from: Text,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawDkimAuthResult {
	pub domain: Text,
	pub selector: Text,
	pub result: Text,
	pub human_result: Text,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawSpfAuthResult {
	pub domain: Text,
	pub scope: Text,
	pub result: Text,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawAuthResults {
	pub dkim: Vec<RawDkimAuthResult>,
	pub spf: Vec<RawSpfAuthResult>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawRecord {
	pub row: Option<RawRow>,
	pub identifiers: Option<RawIdentifiers>,
	pub auth_results: Option<RawAuthResults>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawFeedback {
	pub version: Text,
	pub report_metadata: Option<RawReportMetadata>,
	pub policy_published: Option<RawPolicyPublished>,
	pub record: Vec<RawRecord>,
}
