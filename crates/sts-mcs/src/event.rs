//! The tagged-variant event model (`spec.md` §3, §4.A).
//!
//! Events are immutable records carrying a unique label, a logical
//! timestamp, a fingerprint, and a class-specific payload. Input events are
//! the only events subject to pruning by the delta debugger; internal
//! events are observed during replay and matched by fingerprint.
//!
//! Dynamic dispatch over event classes (the source's runtime type
//! inspection) is replaced by this tagged-variant representation, branching
//! on `EventKind` rather than inspecting a class object.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::StsError;

/// Logical `(seconds, microseconds)` timestamp. Serializes as a two-element
/// JSON array, matching the wire format in `spec.md` §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogicalTime(pub i64, pub i64);

impl LogicalTime {
    pub fn new(seconds: i64, micros: i64) -> Self {
        Self(seconds, micros)
    }

    pub fn seconds(self) -> i64 {
        self.0
    }

    pub fn micros(self) -> i64 {
        self.1
    }

    /// Returns the time `ε` microseconds before `self`, clamped at zero
    /// microseconds (matching `Replayer.time_epsilon_microseconds` in the
    /// original implementation).
    pub fn just_before(self, epsilon_micros: i64) -> Self {
        let just_before = self.1 - epsilon_micros;
        Self(self.0, just_before.max(0))
    }
}

/// Structural identity used to match an expected internal event against an
/// observed one. Compared and hashed by value, never by identity — two
/// fingerprints built from equal class/payload tuples always compare equal
/// regardless of which event produced them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fingerprint(pub Value);

impl Fingerprint {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn is_empty(&self) -> bool {
        matches!(&self.0, Value::Null) || matches!(&self.0, Value::Array(a) if a.is_empty())
    }
}

impl PartialEq for Fingerprint {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl Eq for Fingerprint {}

impl Hash for Fingerprint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // serde_json's default `Map` is a `BTreeMap`, so two structurally
        // equal values serialize to the same canonical string regardless of
        // construction order.
        self.0.to_string().hash(state);
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn fingerprint_hash(value: &Value) -> Fingerprint {
    let mut hasher = DefaultHasher::new();
    value.to_string().hash(&mut hasher);
    Fingerprint(json!(format!("{:016x}", hasher.finish())))
}

/// A network link endpoint pair, used by `LinkFailure`/`LinkRecovery`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkId {
    pub src_dpid: u64,
    pub src_port: u16,
    pub dst_dpid: u64,
    pub dst_port: u16,
}

/// Input events: the only events subject to pruning.
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    SwitchFailure { dpid: u64 },
    SwitchRecovery { dpid: u64 },
    LinkFailure { link: LinkId },
    LinkRecovery { link: LinkId },
    ControllerFailure { cid: u64 },
    ControllerRecovery { cid: u64 },
    ControlChannelBlock { dpid: u64, cid: u64 },
    ControlChannelUnblock { dpid: u64, cid: u64 },
    HostMigration {
        old_dpid: u64,
        old_port: u16,
        new_dpid: u64,
        new_port: u16,
    },
    TrafficInjection { dp_event: Option<Value> },
    DataplaneDrop { fingerprint: Fingerprint },
    DataplanePermit { fingerprint: Fingerprint },
    PolicyChange { detail: Map<String, Value> },
}

/// Internal events: observed during replay, used for causal alignment.
#[derive(Debug, Clone, PartialEq)]
pub enum InternalEvent {
    ControlMessageSend {
        dpid: u64,
        cid: u64,
        fingerprint: Fingerprint,
    },
    ControlMessageReceive {
        dpid: u64,
        cid: u64,
        fingerprint: Fingerprint,
    },
    ControllerStateChange {
        cid: u64,
        time: LogicalTime,
        fingerprint: Fingerprint,
        name: String,
        value: Value,
    },
    /// Terminal marker: the list of fingerprints the invariant checker
    /// returned at the point of violation.
    InvariantViolation { violations: Vec<Fingerprint> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Input(InputEvent),
    Internal(InternalEvent),
}

impl EventKind {
    pub fn is_input(&self) -> bool {
        matches!(self, EventKind::Input(_))
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, EventKind::Internal(_))
    }

    /// The `class` tag used on the wire (`spec.md` §6).
    pub fn class_tag(&self) -> &'static str {
        match self {
            EventKind::Input(i) => match i {
                InputEvent::SwitchFailure { .. } => "SwitchFailure",
                InputEvent::SwitchRecovery { .. } => "SwitchRecovery",
                InputEvent::LinkFailure { .. } => "LinkFailure",
                InputEvent::LinkRecovery { .. } => "LinkRecovery",
                InputEvent::ControllerFailure { .. } => "ControllerFailure",
                InputEvent::ControllerRecovery { .. } => "ControllerRecovery",
                InputEvent::ControlChannelBlock { .. } => "ControlChannelBlock",
                InputEvent::ControlChannelUnblock { .. } => "ControlChannelUnblock",
                InputEvent::HostMigration { .. } => "HostMigration",
                InputEvent::TrafficInjection { .. } => "TrafficInjection",
                InputEvent::DataplaneDrop { .. } => "DataplaneDrop",
                InputEvent::DataplanePermit { .. } => "DataplanePermit",
                InputEvent::PolicyChange { .. } => "PolicyChange",
            },
            EventKind::Internal(i) => match i {
                InternalEvent::ControlMessageSend { .. } => "ControlMessageSend",
                InternalEvent::ControlMessageReceive { .. } => "ControlMessageReceive",
                InternalEvent::ControllerStateChange { .. } => "ControllerStateChange",
                InternalEvent::InvariantViolation { .. } => "InvariantViolation",
            },
        }
    }

    /// Computes the canonical fingerprint for this event's class and
    /// payload, per `spec.md` §4.A: "a tuple of the event class plus the
    /// class-defining payload fields".
    pub fn compute_fingerprint(&self) -> Fingerprint {
        let class = self.class_tag();
        let value = match self {
            EventKind::Input(i) => match i {
                InputEvent::SwitchFailure { dpid } | InputEvent::SwitchRecovery { dpid } => {
                    json!([class, dpid])
                }
                InputEvent::LinkFailure { link } | InputEvent::LinkRecovery { link } => {
                    json!([class, link.src_dpid, link.src_port, link.dst_dpid, link.dst_port])
                }
                InputEvent::ControllerFailure { cid }
                | InputEvent::ControllerRecovery { cid } => json!([class, cid]),
                InputEvent::ControlChannelBlock { dpid, cid }
                | InputEvent::ControlChannelUnblock { dpid, cid } => json!([class, dpid, cid]),
                InputEvent::HostMigration {
                    old_dpid,
                    old_port,
                    new_dpid,
                    new_port,
                } => json!([class, old_dpid, old_port, new_dpid, new_port]),
                InputEvent::TrafficInjection { dp_event } => json!([class, dp_event]),
                InputEvent::DataplaneDrop { fingerprint }
                | InputEvent::DataplanePermit { fingerprint } => {
                    json!([class, fingerprint.0])
                }
                InputEvent::PolicyChange { detail } => json!([class, detail]),
            },
            EventKind::Internal(i) => match i {
                InternalEvent::ControlMessageSend {
                    dpid,
                    cid,
                    fingerprint,
                }
                | InternalEvent::ControlMessageReceive {
                    dpid,
                    cid,
                    fingerprint,
                } => json!([class, dpid, cid, fingerprint.0]),
                InternalEvent::ControllerStateChange {
                    cid,
                    fingerprint,
                    name,
                    ..
                } => json!([class, cid, name, fingerprint.0]),
                InternalEvent::InvariantViolation { violations } => {
                    json!([class, violations.iter().map(|f| f.0.clone()).collect::<Vec<_>>()])
                }
            },
        };
        fingerprint_hash(&value)
    }
}

/// An immutable event record. Unknown JSON keys encountered on parse are
/// preserved in `extra` and re-emitted on serialize, satisfying the
/// round-trip-identity requirement in `spec.md` §6.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub label: String,
    pub time: LogicalTime,
    pub fingerprint: Fingerprint,
    pub kind: EventKind,
    /// Set by the scheduler/driver when an expected internal event timed
    /// out during replay; never persisted directly, recomputed from the
    /// driver's timed-out label set on load.
    pub timed_out: bool,
    pub extra: Map<String, Value>,
}

impl Event {
    pub fn new(label: impl Into<String>, time: LogicalTime, kind: EventKind) -> Self {
        let fingerprint = kind.compute_fingerprint();
        Self {
            label: label.into(),
            time,
            fingerprint,
            kind,
            timed_out: false,
            extra: Map::new(),
        }
    }

    pub fn is_input(&self) -> bool {
        self.kind.is_input()
    }

    pub fn is_internal(&self) -> bool {
        self.kind.is_internal()
    }

    pub fn as_input(&self) -> Option<&InputEvent> {
        match &self.kind {
            EventKind::Input(i) => Some(i),
            EventKind::Internal(_) => None,
        }
    }

    pub fn as_internal(&self) -> Option<&InternalEvent> {
        match &self.kind {
            EventKind::Internal(i) => Some(i),
            EventKind::Input(_) => None,
        }
    }

    /// Serializes this event to its newline-delimited-JSON wire form.
    pub fn to_json(&self) -> Value {
        let mut map = self.extra.clone();
        map.insert("class".into(), json!(self.kind.class_tag()));
        map.insert("label".into(), json!(self.label));
        map.insert("time".into(), json!([self.time.0, self.time.1]));
        map.insert("fingerprint".into(), self.fingerprint.0.clone());
        for (k, v) in payload_fields(&self.kind) {
            map.insert(k, v);
        }
        Value::Object(map)
    }

    /// Parses one event from its wire JSON form. Keys not recognized as a
    /// common or class-specific field are preserved verbatim in `extra`.
    pub fn from_json(value: &Value) -> Result<Self, StsError> {
        let obj = value.as_object().ok_or_else(|| StsError::CorruptTrace {
            path: Default::default(),
            reason: "event is not a JSON object".into(),
        })?;
        let class = obj
            .get("class")
            .and_then(Value::as_str)
            .ok_or_else(|| StsError::CorruptTrace {
                path: Default::default(),
                reason: "missing `class` key".into(),
            })?;
        let label = obj
            .get("label")
            .and_then(Value::as_str)
            .ok_or_else(|| StsError::CorruptTrace {
                path: Default::default(),
                reason: "missing `label` key".into(),
            })?
            .to_string();
        let time = obj
            .get("time")
            .and_then(Value::as_array)
            .filter(|a| a.len() == 2)
            .and_then(|a| Some(LogicalTime(a[0].as_i64()?, a[1].as_i64()?)))
            .ok_or_else(|| StsError::CorruptTrace {
                path: Default::default(),
                reason: "missing or malformed `time` key".into(),
            })?;
        let fingerprint = Fingerprint::new(obj.get("fingerprint").cloned().unwrap_or(Value::Null));

        let (kind, consumed) = parse_payload(class, obj)?;

        let mut extra = obj.clone();
        extra.remove("class");
        extra.remove("label");
        extra.remove("time");
        extra.remove("fingerprint");
        for key in consumed {
            extra.remove(key);
        }

        Ok(Self {
            label,
            time,
            fingerprint,
            kind,
            timed_out: false,
            extra,
        })
    }
}

/// Returns the class-specific fields to emit on the wire, alongside the
/// four common keys handled in [`Event::to_json`].
fn payload_fields(kind: &EventKind) -> Vec<(String, Value)> {
    match kind {
        EventKind::Input(i) => match i {
            InputEvent::SwitchFailure { dpid } | InputEvent::SwitchRecovery { dpid } => {
                vec![("dpid".into(), json!(dpid))]
            }
            InputEvent::LinkFailure { link } | InputEvent::LinkRecovery { link } => vec![
                ("src_dpid".into(), json!(link.src_dpid)),
                ("src_port".into(), json!(link.src_port)),
                ("dst_dpid".into(), json!(link.dst_dpid)),
                ("dst_port".into(), json!(link.dst_port)),
            ],
            InputEvent::ControllerFailure { cid } | InputEvent::ControllerRecovery { cid } => {
                vec![("cid".into(), json!(cid))]
            }
            InputEvent::ControlChannelBlock { dpid, cid }
            | InputEvent::ControlChannelUnblock { dpid, cid } => vec![
                ("dpid".into(), json!(dpid)),
                ("cid".into(), json!(cid)),
            ],
            InputEvent::HostMigration {
                old_dpid,
                old_port,
                new_dpid,
                new_port,
            } => vec![
                ("old_dpid".into(), json!(old_dpid)),
                ("old_port".into(), json!(old_port)),
                ("new_dpid".into(), json!(new_dpid)),
                ("new_port".into(), json!(new_port)),
            ],
            InputEvent::TrafficInjection { dp_event } => {
                vec![("dp_event".into(), dp_event.clone().unwrap_or(Value::Null))]
            }
            InputEvent::DataplaneDrop { fingerprint } | InputEvent::DataplanePermit { fingerprint } => {
                vec![("dp_fingerprint".into(), fingerprint.0.clone())]
            }
            InputEvent::PolicyChange { detail } => {
                detail.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
            }
        },
        EventKind::Internal(i) => match i {
            InternalEvent::ControlMessageSend {
                dpid,
                cid,
                fingerprint,
            }
            | InternalEvent::ControlMessageReceive {
                dpid,
                cid,
                fingerprint,
            } => vec![
                ("dpid".into(), json!(dpid)),
                ("cid".into(), json!(cid)),
                ("msg_fingerprint".into(), fingerprint.0.clone()),
            ],
            InternalEvent::ControllerStateChange {
                cid,
                time,
                fingerprint,
                name,
                value,
            } => vec![
                ("cid".into(), json!(cid)),
                ("state_time".into(), json!([time.0, time.1])),
                ("state_fingerprint".into(), fingerprint.0.clone()),
                ("name".into(), json!(name)),
                ("value".into(), value.clone()),
            ],
            InternalEvent::InvariantViolation { violations } => vec![(
                "violations".into(),
                json!(violations.iter().map(|f| f.0.clone()).collect::<Vec<_>>()),
            )],
        },
    }
}

fn parse_payload(
    class: &str,
    obj: &Map<String, Value>,
) -> Result<(EventKind, Vec<&'static str>), StsError> {
    fn get_u64(obj: &Map<String, Value>, key: &str) -> Option<u64> {
        obj.get(key).and_then(Value::as_u64)
    }
    fn get_u16(obj: &Map<String, Value>, key: &str) -> Option<u16> {
        obj.get(key).and_then(Value::as_u64).map(|v| v as u16)
    }
    fn missing(class: &str, key: &str) -> StsError {
        StsError::CorruptTrace {
            path: Default::default(),
            reason: format!("event class {class} missing field `{key}`"),
        }
    }

    match class {
        "SwitchFailure" => Ok((
            EventKind::Input(InputEvent::SwitchFailure {
                dpid: get_u64(obj, "dpid").ok_or_else(|| missing(class, "dpid"))?,
            }),
            vec!["dpid"],
        )),
        "SwitchRecovery" => Ok((
            EventKind::Input(InputEvent::SwitchRecovery {
                dpid: get_u64(obj, "dpid").ok_or_else(|| missing(class, "dpid"))?,
            }),
            vec!["dpid"],
        )),
        "LinkFailure" | "LinkRecovery" => {
            let link = LinkId {
                src_dpid: get_u64(obj, "src_dpid").ok_or_else(|| missing(class, "src_dpid"))?,
                src_port: get_u16(obj, "src_port").ok_or_else(|| missing(class, "src_port"))?,
                dst_dpid: get_u64(obj, "dst_dpid").ok_or_else(|| missing(class, "dst_dpid"))?,
                dst_port: get_u16(obj, "dst_port").ok_or_else(|| missing(class, "dst_port"))?,
            };
            let consumed = vec!["src_dpid", "src_port", "dst_dpid", "dst_port"];
            let kind = if class == "LinkFailure" {
                InputEvent::LinkFailure { link }
            } else {
                InputEvent::LinkRecovery { link }
            };
            Ok((EventKind::Input(kind), consumed))
        }
        "ControllerFailure" => Ok((
            EventKind::Input(InputEvent::ControllerFailure {
                cid: get_u64(obj, "cid").ok_or_else(|| missing(class, "cid"))?,
            }),
            vec!["cid"],
        )),
        "ControllerRecovery" => Ok((
            EventKind::Input(InputEvent::ControllerRecovery {
                cid: get_u64(obj, "cid").ok_or_else(|| missing(class, "cid"))?,
            }),
            vec!["cid"],
        )),
        "ControlChannelBlock" | "ControlChannelUnblock" => {
            let dpid = get_u64(obj, "dpid").ok_or_else(|| missing(class, "dpid"))?;
            let cid = get_u64(obj, "cid").ok_or_else(|| missing(class, "cid"))?;
            let kind = if class == "ControlChannelBlock" {
                InputEvent::ControlChannelBlock { dpid, cid }
            } else {
                InputEvent::ControlChannelUnblock { dpid, cid }
            };
            Ok((EventKind::Input(kind), vec!["dpid", "cid"]))
        }
        "HostMigration" => Ok((
            EventKind::Input(InputEvent::HostMigration {
                old_dpid: get_u64(obj, "old_dpid").ok_or_else(|| missing(class, "old_dpid"))?,
                old_port: get_u16(obj, "old_port").ok_or_else(|| missing(class, "old_port"))?,
                new_dpid: get_u64(obj, "new_dpid").ok_or_else(|| missing(class, "new_dpid"))?,
                new_port: get_u16(obj, "new_port").ok_or_else(|| missing(class, "new_port"))?,
            }),
            vec!["old_dpid", "old_port", "new_dpid", "new_port"],
        )),
        "TrafficInjection" => Ok((
            EventKind::Input(InputEvent::TrafficInjection {
                dp_event: obj.get("dp_event").cloned().filter(|v| !v.is_null()),
            }),
            vec!["dp_event"],
        )),
        "DataplaneDrop" | "DataplanePermit" => {
            let fp = Fingerprint::new(obj.get("dp_fingerprint").cloned().unwrap_or(Value::Null));
            let kind = if class == "DataplaneDrop" {
                InputEvent::DataplaneDrop { fingerprint: fp }
            } else {
                InputEvent::DataplanePermit { fingerprint: fp }
            };
            Ok((EventKind::Input(kind), vec!["dp_fingerprint"]))
        }
        "PolicyChange" => {
            let mut detail = Map::new();
            for (k, v) in obj {
                if !matches!(k.as_str(), "class" | "label" | "time" | "fingerprint") {
                    detail.insert(k.clone(), v.clone());
                }
            }
            let keys: Vec<&'static str> = vec![];
            Ok((EventKind::Input(InputEvent::PolicyChange { detail }), keys))
        }
        "ControlMessageSend" | "ControlMessageReceive" => {
            let dpid = get_u64(obj, "dpid").ok_or_else(|| missing(class, "dpid"))?;
            let cid = get_u64(obj, "cid").ok_or_else(|| missing(class, "cid"))?;
            let fingerprint =
                Fingerprint::new(obj.get("msg_fingerprint").cloned().unwrap_or(Value::Null));
            let kind = if class == "ControlMessageSend" {
                InternalEvent::ControlMessageSend {
                    dpid,
                    cid,
                    fingerprint,
                }
            } else {
                InternalEvent::ControlMessageReceive {
                    dpid,
                    cid,
                    fingerprint,
                }
            };
            Ok((
                EventKind::Internal(kind),
                vec!["dpid", "cid", "msg_fingerprint"],
            ))
        }
        "ControllerStateChange" => {
            let cid = get_u64(obj, "cid").ok_or_else(|| missing(class, "cid"))?;
            let state_time = obj
                .get("state_time")
                .and_then(Value::as_array)
                .filter(|a| a.len() == 2)
                .and_then(|a| Some(LogicalTime(a[0].as_i64()?, a[1].as_i64()?)))
                .ok_or_else(|| missing(class, "state_time"))?;
            let fingerprint = Fingerprint::new(
                obj.get("state_fingerprint").cloned().unwrap_or(Value::Null),
            );
            let name = obj
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| missing(class, "name"))?
                .to_string();
            let value = obj.get("value").cloned().unwrap_or(Value::Null);
            Ok((
                EventKind::Internal(InternalEvent::ControllerStateChange {
                    cid,
                    time: state_time,
                    fingerprint,
                    name,
                    value,
                }),
                vec!["cid", "state_time", "state_fingerprint", "name", "value"],
            ))
        }
        "InvariantViolation" => {
            let violations = obj
                .get("violations")
                .and_then(Value::as_array)
                .map(|a| a.iter().cloned().map(Fingerprint::new).collect())
                .unwrap_or_default();
            Ok((
                EventKind::Internal(InternalEvent::InvariantViolation { violations }),
                vec!["violations"],
            ))
        }
        other => Err(StsError::CorruptTrace {
            path: Default::default(),
            reason: format!("unknown event class `{other}`"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_switch_failure() {
        let event = Event::new(
            "e0",
            LogicalTime::new(10, 500),
            EventKind::Input(InputEvent::SwitchFailure { dpid: 1 }),
        );
        let json = event.to_json();
        let parsed = Event::from_json(&json).unwrap();
        assert_eq!(parsed.label, "e0");
        assert_eq!(parsed.time, LogicalTime::new(10, 500));
        assert_eq!(parsed.kind, event.kind);
    }

    #[test]
    fn round_trip_preserves_unknown_keys() {
        let mut event = Event::new(
            "e1",
            LogicalTime::new(0, 0),
            EventKind::Input(InputEvent::ControllerFailure { cid: 2 }),
        );
        event.extra.insert("future_field".into(), json!(42));
        let json = event.to_json();
        let parsed = Event::from_json(&json).unwrap();
        assert_eq!(parsed.extra.get("future_field"), Some(&json!(42)));
    }

    #[test]
    fn fingerprint_equal_by_value_not_identity() {
        let a = InputEvent::SwitchFailure { dpid: 7 };
        let b = InputEvent::SwitchFailure { dpid: 7 };
        assert_eq!(
            EventKind::Input(a).compute_fingerprint(),
            EventKind::Input(b).compute_fingerprint()
        );
        let c = InputEvent::SwitchFailure { dpid: 8 };
        assert_ne!(
            EventKind::Input(InputEvent::SwitchFailure { dpid: 7 }).compute_fingerprint(),
            EventKind::Input(c).compute_fingerprint()
        );
    }

    #[test]
    fn invariant_violation_fingerprint_is_non_empty() {
        let kind = EventKind::Internal(InternalEvent::InvariantViolation {
            violations: vec![Fingerprint::new(json!("bug"))],
        });
        assert!(!kind.compute_fingerprint().is_empty());
    }
}
