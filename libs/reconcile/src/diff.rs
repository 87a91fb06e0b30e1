//! Field comparison between a normalized desired record and the record the
//! appliance reports.
//!
//! Comparison uses subset semantics: the appliance decorates every record
//! with fields the caller never sets (etags, timestamps, generated ids), so
//! only the keys the desired record carries are compared.

use serde_json::{Map, Value};

/// A remote-reported status field that must hold an expected value for the
/// resource to be considered in sync.
///
/// Writing the expected value is the requested correction, not a guarantee:
/// the appliance may treat the field as read-only and settle it through its
/// own remediation (a profile is brought back in line with its template).
/// The next pass re-reads the field either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriftSignal {
    pub field: &'static str,
    pub expected: &'static str,
}

impl DriftSignal {
    pub const fn new(field: &'static str, expected: &'static str) -> Self {
        Self { field, expected }
    }

    /// Returns true if the record reports a value other than the expected one.
    ///
    /// A record that does not report the field at all carries no signal.
    pub fn is_drifted(&self, current: &Map<String, Value>) -> bool {
        match current.get(self.field) {
            None | Some(Value::Null) => false,
            Some(value) => value.as_str() != Some(self.expected),
        }
    }
}

/// Returns true if every part of `desired` is present and equal in `current`.
///
/// - Objects: every desired key must match; extra current keys are ignored.
/// - Arrays: same length, elements matched pairwise in order.
/// - `null`: matches a missing or null current value.
/// - Scalars: equality.
pub fn matches(desired: &Value, current: &Value) -> bool {
    match (desired, current) {
        (Value::Object(want), Value::Object(have)) => want
            .iter()
            .all(|(key, value)| field_matches(value, have.get(key))),
        (Value::Array(want), Value::Array(have)) => {
            want.len() == have.len() && want.iter().zip(have).all(|(w, h)| matches(w, h))
        }
        (want, have) => want == have,
    }
}

fn field_matches(desired: &Value, current: Option<&Value>) -> bool {
    match current {
        Some(current) => matches(desired, current),
        None => desired.is_null(),
    }
}

/// Differences found by [`compare`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Comparison {
    /// Top-level desired fields whose current value differs.
    pub mismatched: Vec<String>,

    /// Drift signals the current record raises.
    pub drifted: Vec<DriftSignal>,
}

impl Comparison {
    /// Returns true if no update is needed.
    pub fn is_converged(&self) -> bool {
        self.mismatched.is_empty() && self.drifted.is_empty()
    }
}

/// Compare desired fields and drift signals against the current record.
pub fn compare(
    desired: &Map<String, Value>,
    current: &Map<String, Value>,
    signals: &[DriftSignal],
) -> Comparison {
    let mismatched = desired
        .iter()
        .filter(|(key, value)| !field_matches(value, current.get(key.as_str())))
        .map(|(key, _)| key.clone())
        .collect();

    let drifted = signals
        .iter()
        .filter(|signal| signal.is_drifted(current))
        .copied()
        .collect();

    Comparison {
        mismatched,
        drifted,
    }
}

/// Build the body of the single update call for one pass.
///
/// The current record is overlaid with every desired field and with the
/// expected value of every drift signal it raises, so field corrections and
/// drift corrections travel together. Whether a drift correction holds is
/// up to the appliance; see [`DriftSignal`].
pub fn update_body(
    current: &Map<String, Value>,
    desired: &Map<String, Value>,
    signals: &[DriftSignal],
) -> Map<String, Value> {
    let mut body = current.clone();
    for (key, value) in desired {
        body.insert(key.clone(), value.clone());
    }
    for signal in signals.iter().filter(|s| s.is_drifted(current)) {
        body.insert(signal.field.to_string(), Value::String(signal.expected.to_string()));
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    const COMPLIANCE: DriftSignal = DriftSignal::new("templateCompliance", "Compliant");

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn test_subset_ignores_extra_current_fields() {
        let desired = json!({"name": "web", "firmware": {"manageFirmware": true}});
        let current = json!({
            "name": "web",
            "eTag": "abc",
            "firmware": {"manageFirmware": true, "firmwareActivationType": "Immediate"}
        });
        assert!(matches(&desired, &current));
    }

    #[test]
    fn test_arrays_compare_pairwise_in_order() {
        let desired = json!([{"driveName": "boot"}, {"driveName": "data"}]);
        let swapped = json!([{"driveName": "data"}, {"driveName": "boot"}]);
        let longer = json!([{"driveName": "boot"}, {"driveName": "data"}, {"driveName": "x"}]);
        assert!(!matches(&desired, &swapped));
        assert!(!matches(&desired, &longer));
    }

    #[test]
    fn test_null_matches_missing() {
        let desired = object(json!({"ipv4Gateway": null}));
        let current = object(json!({}));
        assert!(compare(&desired, &current, &[]).is_converged());
    }

    #[test]
    fn test_compare_reports_mismatch_and_drift() {
        let desired = object(json!({"serverProfileTemplateUri": "/rest/t/2"}));
        let current = object(json!({
            "serverProfileTemplateUri": "/rest/t/1",
            "templateCompliance": "NonCompliant"
        }));

        let comparison = compare(&desired, &current, &[COMPLIANCE]);
        assert_eq!(comparison.mismatched, vec!["serverProfileTemplateUri"]);
        assert_eq!(comparison.drifted, vec![COMPLIANCE]);
        assert!(!comparison.is_converged());
    }

    #[test]
    fn test_missing_signal_field_is_not_drift() {
        let current = object(json!({"name": "web"}));
        assert!(!COMPLIANCE.is_drifted(&current));
    }

    #[test]
    fn test_update_body_carries_both_corrections() {
        let desired = object(json!({"serverProfileTemplateUri": "/rest/t/2"}));
        let current = object(json!({
            "uri": "/rest/p/1",
            "serverProfileTemplateUri": "/rest/t/1",
            "templateCompliance": "NonCompliant"
        }));

        let body = update_body(&current, &desired, &[COMPLIANCE]);
        assert_eq!(body["uri"], "/rest/p/1");
        assert_eq!(body["serverProfileTemplateUri"], "/rest/t/2");
        assert_eq!(body["templateCompliance"], "Compliant");
        assert!(compare(&desired, &body, &[COMPLIANCE]).is_converged());
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i32>().prop_map(|n| json!(n)),
            "[a-z]{0,6}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,4}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_update_body_converges(
            desired in prop::collection::btree_map("[a-z]{1,4}", arb_json(), 0..5),
            current in prop::collection::btree_map("[a-z]{1,4}", arb_json(), 0..5),
        ) {
            let desired: Map<String, Value> = desired.into_iter().collect();
            let current: Map<String, Value> = current.into_iter().collect();

            let body = update_body(&current, &desired, &[COMPLIANCE]);
            prop_assert!(compare(&desired, &body, &[COMPLIANCE]).is_converged());
        }

        #[test]
        fn prop_value_matches_itself(value in arb_json()) {
            prop_assert!(matches(&value, &value));
        }
    }
}
