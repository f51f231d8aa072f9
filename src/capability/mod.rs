// ABOUTME: Capability patterns and the matcher deciding what a sender may emit
// ABOUTME: Glob over slash-delimited kinds plus structural payload sub-matching

//! Capability patterns and matching.
//!
//! A capability grants the right to emit envelopes of a given kind, to given
//! recipients, with payloads matching a structural pattern. The language is
//! deliberately underpowered (no regex, no negation) so that denials stay
//! auditable: `*` matches one kind segment, `**` matches many, and a payload
//! pattern matches when every field it declares is present with an equal or
//! recursively matching value.

pub mod grants;

pub use grants::{GrantSet, GrantState, GrantedCapability};

use crate::constants::protocol::BROADCAST_TOKEN;
use crate::envelope::Envelope;

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An authorization pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    /// Optional stable identifier (used by revocation)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Kind glob, e.g. `mcp/*`, `chat`, `**`
    pub kind: String,

    /// Optional recipient constraint; every envelope recipient must appear here
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<Vec<String>>,

    /// Optional structural payload pattern
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Capability {
    /// Shorthand for a kind-only capability.
    pub fn kind_only(kind: impl Into<String>) -> Self {
        Self {
            id: None,
            kind: kind.into(),
            to: None,
            payload: None,
        }
    }

    /// Whether this capability permits emitting `envelope`.
    pub fn matches(&self, envelope: &Envelope) -> bool {
        if !kind_matches(&self.kind, &envelope.kind) {
            return false;
        }

        if let Some(allowed_to) = &self.to {
            if envelope.to.is_empty() {
                if !allowed_to.iter().any(|t| t == BROADCAST_TOKEN) {
                    return false;
                }
            } else if !envelope
                .to
                .iter()
                .all(|recipient| allowed_to.iter().any(|t| t == recipient))
            {
                return false;
            }
        }

        if let Some(pattern) = &self.payload {
            if !payload_sub_match(pattern, &envelope.payload) {
                return false;
            }
        }

        true
    }
}

const KIND_MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Glob-match a capability kind pattern against a concrete kind.
///
/// Segments are separated by `/`; `*` matches exactly one segment, `**`
/// matches any number of them. A bare `*` matches any kind.
pub fn kind_matches(pattern: &str, kind: &str) -> bool {
    if pattern == "*" || pattern == "**" {
        return true;
    }
    match Pattern::new(pattern) {
        Ok(p) => p.matches_with(kind, KIND_MATCH_OPTIONS),
        // An unparsable pattern grants nothing.
        Err(_) => false,
    }
}

/// Structural sub-match: every field the pattern declares must be present in
/// the payload with an equal value; objects recurse; an array pattern matches
/// element-wise for its declared length.
pub fn payload_sub_match(pattern: &Value, payload: &Value) -> bool {
    match (pattern, payload) {
        (Value::Object(pattern_map), Value::Object(payload_map)) => {
            pattern_map.iter().all(|(key, expected)| {
                payload_map
                    .get(key)
                    .is_some_and(|actual| payload_sub_match(expected, actual))
            })
        }
        (Value::Array(pattern_items), Value::Array(payload_items)) => {
            payload_items.len() >= pattern_items.len()
                && pattern_items
                    .iter()
                    .zip(payload_items.iter())
                    .all(|(expected, actual)| payload_sub_match(expected, actual))
        }
        (expected, actual) => expected == actual,
    }
}

/// Find the first capability in `capabilities` that permits `envelope`.
pub fn first_match<'a>(
    capabilities: &'a [Capability],
    envelope: &Envelope,
) -> Option<&'a Capability> {
    capabilities.iter().find(|c| c.matches(envelope))
}

/// Whether `grantor_capabilities` cover a capability being granted.
///
/// Coverage is what decides if a grant is elevated (and therefore needs a
/// `capability/grant-ack` before it counts): some grantor capability must
/// kind-match the granted kind string and carry no narrower recipient or
/// payload restriction than the grant itself.
pub fn covers(grantor_capabilities: &[Capability], granted: &Capability) -> bool {
    grantor_capabilities.iter().any(|own| {
        if !kind_matches(&own.kind, &granted.kind) && own.kind != granted.kind {
            return false;
        }
        match (&own.to, &granted.to) {
            (None, _) => {}
            (Some(_), None) => return false,
            (Some(own_to), Some(granted_to)) => {
                if !granted_to.iter().all(|t| own_to.contains(t)) {
                    return false;
                }
            }
        }
        match (&own.payload, &granted.payload) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(own_payload), Some(granted_payload)) => own_payload == granted_payload,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(kind: &str, to: Vec<&str>, payload: Value) -> Envelope {
        Envelope::builder()
            .from("sender")
            .kind(kind)
            .to(to.into_iter().map(String::from).collect())
            .payload(payload)
            .build()
            .unwrap()
    }

    #[test]
    fn test_star_matches_one_segment() {
        assert!(kind_matches("mcp/*", "mcp/request"));
        assert!(kind_matches("mcp/*", "mcp/proposal"));
        assert!(!kind_matches("mcp/*", "mcp/request/extra"));
        assert!(!kind_matches("mcp/*", "chat"));
    }

    #[test]
    fn test_double_star_matches_many_segments() {
        assert!(kind_matches("mcp/**", "mcp/request"));
        assert!(kind_matches("mcp/**", "mcp/request/extra"));
        assert!(kind_matches("**", "anything/at/all"));
    }

    #[test]
    fn test_bare_star_matches_any_kind() {
        assert!(kind_matches("*", "chat"));
        assert!(kind_matches("*", "mcp/request"));
    }

    #[test]
    fn test_literal_kind_matches_exactly() {
        assert!(kind_matches("chat", "chat"));
        assert!(!kind_matches("chat", "chat/acknowledge"));
    }

    #[test]
    fn test_recipient_constraint() {
        let cap = Capability {
            id: None,
            kind: "mcp/request".to_string(),
            to: Some(vec!["fs".to_string(), "db".to_string()]),
            payload: None,
        };
        assert!(cap.matches(&envelope("mcp/request", vec!["fs"], json!({}))));
        assert!(cap.matches(&envelope("mcp/request", vec!["fs", "db"], json!({}))));
        assert!(!cap.matches(&envelope("mcp/request", vec!["fs", "mail"], json!({}))));
        // Broadcast requires the broadcast token to be listed.
        assert!(!cap.matches(&envelope("mcp/request", vec![], json!({}))));
    }

    #[test]
    fn test_broadcast_token_permits_empty_to() {
        let cap = Capability {
            id: None,
            kind: "chat".to_string(),
            to: Some(vec![BROADCAST_TOKEN.to_string()]),
            payload: None,
        };
        assert!(cap.matches(&envelope("chat", vec![], json!({"text": "hi"}))));
        assert!(!cap.matches(&envelope("chat", vec!["bob"], json!({"text": "hi"}))));
    }

    #[test]
    fn test_payload_pattern_sub_matches() {
        let cap = Capability {
            id: None,
            kind: "mcp/request".to_string(),
            to: None,
            payload: Some(json!({"method": "tools/call", "params": {"name": "read_file"}})),
        };
        assert!(cap.matches(&envelope(
            "mcp/request",
            vec!["fs"],
            json!({
                "method": "tools/call",
                "params": {"name": "read_file", "arguments": {"path": "/tmp/x"}}
            })
        )));
        assert!(!cap.matches(&envelope(
            "mcp/request",
            vec!["fs"],
            json!({"method": "tools/call", "params": {"name": "write_file"}})
        )));
        assert!(!cap.matches(&envelope("mcp/request", vec!["fs"], json!({}))));
    }

    #[test]
    fn test_array_patterns_match_declared_prefix() {
        assert!(payload_sub_match(&json!([1, 2]), &json!([1, 2, 3])));
        assert!(!payload_sub_match(&json!([1, 2]), &json!([1])));
        assert!(!payload_sub_match(&json!([1, 2]), &json!([2, 1])));
    }

    #[test]
    fn test_first_match_returns_some_capability() {
        let caps = vec![
            Capability::kind_only("chat"),
            Capability::kind_only("mcp/*"),
        ];
        let env = envelope("mcp/proposal", vec![], json!({}));
        assert_eq!(first_match(&caps, &env).unwrap().kind, "mcp/*");
        assert!(first_match(&caps, &envelope("stream/request", vec![], json!({}))).is_none());
    }

    #[test]
    fn test_coverage_for_elevation_decisions() {
        let own = vec![Capability::kind_only("mcp/*")];
        assert!(covers(&own, &Capability::kind_only("mcp/request")));
        assert!(covers(&own, &Capability::kind_only("mcp/*")));
        assert!(!covers(&own, &Capability::kind_only("chat")));

        // A grantor restricted by recipient cannot cover an unrestricted grant.
        let narrow = vec![Capability {
            id: None,
            kind: "mcp/request".to_string(),
            to: Some(vec!["fs".to_string()]),
            payload: None,
        }];
        assert!(!covers(&narrow, &Capability::kind_only("mcp/request")));
        assert!(covers(
            &narrow,
            &Capability {
                id: None,
                kind: "mcp/request".to_string(),
                to: Some(vec!["fs".to_string()]),
                payload: None,
            }
        ));
    }
}
