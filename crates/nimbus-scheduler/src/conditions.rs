//! Schedule conditions: declarative selectors over the machine collection.
//!
//! A schedule carries a list of conditions and its target set is their
//! conjunction. The set is resolved against the live collection every time
//! the schedule fires, never memoized, so machines tagged (or aged) into a
//! condition after the schedule was saved are picked up automatically.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use nimbus_core::{Machine, NimbusError, Result};

/// Comparison operator for field conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Lt,
}

/// One selector. Conditions are validated at schedule-save time and
/// evaluated per machine at fire time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// Compare a machine attribute against a constant.
    Field {
        field: String,
        operator: CmpOp,
        value: Value,
    },
    /// Every listed tag key must be present; an empty value matches any.
    Tags { tags: BTreeMap<String, String> },
    /// Explicit machine id list.
    Machines { ids: Vec<String> },
    /// Machines created more than `minutes` ago.
    Age { minutes: i64 },
}

fn valid_tag_chars(s: &str) -> bool {
    s.chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

impl Condition {
    /// Structural validation, done once when a schedule is saved. Invalid
    /// conditions are rejected, never coerced.
    pub fn validate(&self) -> Result<()> {
        match self {
            Condition::Field { field, .. } => {
                if field.is_empty() {
                    return Err(NimbusError::MalformedCondition(
                        "field name must not be empty".into(),
                    ));
                }
            }
            Condition::Tags { tags } => {
                for (key, value) in tags {
                    if key.is_empty() {
                        return Err(NimbusError::MalformedCondition(
                            "tag key must not be empty".into(),
                        ));
                    }
                    if !valid_tag_chars(key) || !valid_tag_chars(value) {
                        return Err(NimbusError::MalformedCondition(format!(
                            "tag '{key}={value}' contains characters outside [a-z0-9_-]"
                        )));
                    }
                }
            }
            Condition::Machines { ids } => {
                if ids.iter().any(String::is_empty) {
                    return Err(NimbusError::MalformedCondition(
                        "machine id must not be empty".into(),
                    ));
                }
            }
            Condition::Age { minutes } => {
                if *minutes <= 0 {
                    return Err(NimbusError::MalformedCondition(format!(
                        "age must be a positive number of minutes, got {minutes}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Whether one machine satisfies this condition at `now`.
    pub fn matches(&self, machine: &Machine, now: DateTime<Utc>) -> bool {
        match self {
            Condition::Field {
                field,
                operator,
                value,
            } => {
                let doc = machine.as_json();
                let Some(actual) = doc.get(field) else {
                    return false;
                };
                compare(actual, *operator, value)
            }
            Condition::Tags { tags } => tags.iter().all(|(key, value)| {
                machine
                    .tags
                    .get(key)
                    .is_some_and(|v| value.is_empty() || v == value)
            }),
            Condition::Machines { ids } => ids.iter().any(|id| *id == machine.id),
            Condition::Age { minutes } => machine.created < now - chrono::Duration::minutes(*minutes),
        }
    }
}

fn compare(actual: &Value, op: CmpOp, expected: &Value) -> bool {
    match op {
        CmpOp::Eq => actual == expected,
        CmpOp::Ne => actual != expected,
        CmpOp::Gt | CmpOp::Lt => {
            // Numbers compare numerically, strings lexically; mixed or
            // unordered types never match.
            let ordering = match (actual, expected) {
                (Value::Number(a), Value::Number(b)) => {
                    match (a.as_f64(), b.as_f64()) {
                        (Some(a), Some(b)) => a.partial_cmp(&b),
                        _ => None,
                    }
                }
                (Value::String(a), Value::String(b)) => Some(a.as_str().cmp(b.as_str())),
                _ => None,
            };
            match ordering {
                Some(std::cmp::Ordering::Greater) => op == CmpOp::Gt,
                Some(std::cmp::Ordering::Less) => op == CmpOp::Lt,
                _ => false,
            }
        }
    }
}

/// Resolve a condition list to the matching machine ids: the conjunction of
/// all conditions, or the whole collection when the list is empty.
pub fn resolve(conditions: &[Condition], machines: &[Machine], now: DateTime<Utc>) -> Vec<String> {
    machines
        .iter()
        .filter(|m| conditions.iter().all(|c| c.matches(m, now)))
        .map(|m| m.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_core::MachineState;
    use serde_json::json;

    fn fleet() -> Vec<Machine> {
        vec![
            Machine::new("m1", "org-1", "c1", "web-1")
                .with_tag("env", "staging")
                .with_tag("role", "web"),
            Machine::new("m2", "org-1", "c1", "web-2").with_tag("env", "production"),
            Machine::new("m3", "org-1", "c1", "db-1")
                .with_tag("env", "staging")
                .with_state(MachineState::Stopped),
        ]
    }

    #[test]
    fn test_empty_condition_list_selects_everything() {
        let ids = resolve(&[], &fleet(), Utc::now());
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
    }

    #[test]
    fn test_conjunction_narrows() {
        let machines = fleet();
        let now = Utc::now();

        let staging = vec![Condition::Tags {
            tags: BTreeMap::from([("env".to_string(), "staging".to_string())]),
        }];
        assert_eq!(resolve(&staging, &machines, now), vec!["m1", "m3"]);

        let staging_and_running = vec![
            staging[0].clone(),
            Condition::Field {
                field: "state".into(),
                operator: CmpOp::Eq,
                value: json!("running"),
            },
        ];
        assert_eq!(resolve(&staging_and_running, &machines, now), vec!["m1"]);
    }

    #[test]
    fn test_tag_value_empty_matches_any() {
        let machines = fleet();
        let any_env = vec![Condition::Tags {
            tags: BTreeMap::from([("role".to_string(), String::new())]),
        }];
        assert_eq!(resolve(&any_env, &machines, Utc::now()), vec!["m1"]);
    }

    #[test]
    fn test_all_tag_keys_required() {
        let machines = fleet();
        let both = vec![Condition::Tags {
            tags: BTreeMap::from([
                ("env".to_string(), "staging".to_string()),
                ("role".to_string(), "web".to_string()),
            ]),
        }];
        // m3 has env=staging but no role tag
        assert_eq!(resolve(&both, &machines, Utc::now()), vec!["m1"]);
    }

    #[test]
    fn test_machines_condition() {
        let picked = vec![Condition::Machines {
            ids: vec!["m2".into(), "m3".into(), "missing".into()],
        }];
        assert_eq!(resolve(&picked, &fleet(), Utc::now()), vec!["m2", "m3"]);
    }

    #[test]
    fn test_age_condition() {
        let now = Utc::now();
        let machines = vec![
            Machine::new("old", "org-1", "c1", "old")
                .with_created(now - chrono::Duration::minutes(90)),
            Machine::new("new", "org-1", "c1", "new")
                .with_created(now - chrono::Duration::minutes(5)),
        ];
        let aged = vec![Condition::Age { minutes: 60 }];
        assert_eq!(resolve(&aged, &machines, now), vec!["old"]);
    }

    #[test]
    fn test_field_numeric_comparison() {
        let m = Machine::new("m1", "org-1", "c1", "web-1");
        let cond = Condition::Field {
            field: "name".into(),
            operator: CmpOp::Gt,
            value: json!("web-0"),
        };
        assert!(cond.matches(&m, Utc::now()));
        let cond = Condition::Field {
            field: "name".into(),
            operator: CmpOp::Lt,
            value: json!("web-0"),
        };
        assert!(!cond.matches(&m, Utc::now()));
    }

    #[test]
    fn test_validation_rejects_bad_tags() {
        let cond = Condition::Tags {
            tags: BTreeMap::from([("Env Name".to_string(), "x".to_string())]),
        };
        assert!(matches!(
            cond.validate(),
            Err(NimbusError::MalformedCondition(_))
        ));

        let cond = Condition::Tags {
            tags: BTreeMap::from([(String::new(), "x".to_string())]),
        };
        assert!(cond.validate().is_err());

        let cond = Condition::Tags {
            tags: BTreeMap::from([("env".to_string(), "staging".to_string())]),
        };
        assert!(cond.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_nonpositive_age() {
        assert!(Condition::Age { minutes: 0 }.validate().is_err());
        assert!(Condition::Age { minutes: -5 }.validate().is_err());
        assert!(Condition::Age { minutes: 1 }.validate().is_ok());
    }

    #[test]
    fn test_condition_serde_shape() {
        let cond = Condition::Field {
            field: "state".into(),
            operator: CmpOp::Ne,
            value: json!("terminated"),
        };
        let v = serde_json::to_value(&cond).unwrap();
        assert_eq!(v["type"], "field");
        assert_eq!(v["operator"], "ne");
        let back: Condition = serde_json::from_value(v).unwrap();
        assert_eq!(back, cond);
    }
}
