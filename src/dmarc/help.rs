//! Human-readable descriptions of report fields, keyed by element name.

/// Returns the description of `field` within `entity`, both given by their XML
/// element names (e.g. `("policy_published", "adkim")`).
pub fn help_text(entity: &str, field: &str) -> Option<&'static str> {
	let text = match (entity, field) {
		("policy_published", "domain") => "The domain at which the DMARC record was found.",
		("policy_published", "adkim") => {
			"DKIM identifier alignment mode required by the domain owner. \
			 Relaxed (r) requires the signing domain and the RFC5322.From domain to share \
			 an organizational domain; strict (s) requires an exact match."
		}
		("policy_published", "aspf") => {
			"SPF identifier alignment mode required by the domain owner. \
			 Relaxed (r) requires the SPF-authenticated domain and the RFC5322.From domain \
			 to share an organizational domain; strict (s) requires an exact match."
		}
		("policy_published", "p") => {
			"Policy the domain owner asks receivers to apply to mail failing DMARC. \
			 Applies to subdomains too unless sp is given."
		}
		("policy_published", "sp") => {
			"Policy the domain owner asks receivers to apply to subdomains of the \
			 queried domain."
		}
		("policy_published", "pct") => {
			"Percentage of the domain owner's mail stream the policy applies to."
		}
		("policy_published", "fo") => {
			"Failure reporting options. Only meaningful when a ruf address is published."
		}
		("policy_published", "np") => {
			"Policy the domain owner asks receivers to apply to non-existent subdomains."
		}
		("identifiers", "envelope_to") => "The envelope recipient domain.",
		("identifiers", "envelope_from") => "The RFC5321.MailFrom domain.",
		("identifiers", "header_from") => "The RFC5322.From domain.",
		("dkim", "domain") => "The d= parameter of the signature.",
		("dkim", "selector") => "The s= parameter of the signature.",
		("dkim", "result") => "The DKIM verification result.",
		("dkim", "human_result") => {
			"Extra information about the result, e.g. from Authentication-Results."
		}
		("spf", "domain") => "The checked domain.",
		("spf", "scope") => "Whether the HELO or the MAIL FROM identity was checked.",
		("spf", "result") => "The SPF verification result.",
		("row", "source_ip") => "The connecting IP address.",
		("row", "count") => "The number of matching messages.",
		("policy_evaluated", "disposition") => {
			"The disposition the receiver applied to matching messages."
		}
		("policy_evaluated", "dkim") => "Whether DKIM passed and was aligned.",
		("policy_evaluated", "spf") => "Whether SPF passed and was aligned.",
		("reason", "type") => "Why the applied disposition differs from the published policy.",
		("reason", "comment") => "Free-form detail about the override.",
		_ => return None,
	};
	Some(text)
}
