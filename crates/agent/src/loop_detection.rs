//! Detection of agents that repeat themselves instead of making progress.
//!
//! The detector keeps two bounded histories: fingerprints of exact calls
//! (name plus normalized arguments) and bare tool names. An agent is stuck
//! when one fingerprint repeats `repeat_threshold` times, or one tool name
//! shows up `repeat_threshold * name_frequency_multiplier` times with
//! arguments that never collide.

use std::collections::{HashMap, VecDeque};
use std::sync::OnceLock;

use lorekeep_config::LoopDetectionConfig;
use regex_lite::Regex;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Tools whose free-text arguments are normalized before fingerprinting.
const COMMAND_TOOLS: &[&str] = &["run_command", "install_package"];

#[derive(Debug, Clone)]
pub struct LoopDetector {
    repeat_threshold: usize,
    name_frequency_multiplier: usize,
    capacity: usize,
    fingerprints: VecDeque<String>,
    names: VecDeque<String>,
}

impl LoopDetector {
    pub fn new(repeat_threshold: usize, name_frequency_multiplier: usize, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            repeat_threshold: repeat_threshold.max(1),
            name_frequency_multiplier: name_frequency_multiplier.max(1),
            capacity,
            fingerprints: VecDeque::with_capacity(capacity),
            names: VecDeque::with_capacity(capacity),
        }
    }

    pub fn from_config(config: &LoopDetectionConfig) -> Self {
        Self::new(config.repeat_threshold, config.name_frequency_multiplier, config.history)
    }

    /// Record one tool invocation.
    pub fn record(&mut self, name: &str, args: &Value) {
        if self.fingerprints.len() == self.capacity {
            self.fingerprints.pop_front();
            self.names.pop_front();
        }
        self.fingerprints.push_back(fingerprint(name, args));
        self.names.push_back(name.to_string());
    }

    pub fn is_stuck(&self) -> bool {
        if self.fingerprints.len() < self.repeat_threshold {
            return false;
        }
        if max_count(&self.fingerprints) >= self.repeat_threshold {
            return true;
        }
        max_count(&self.names) >= self.repeat_threshold * self.name_frequency_multiplier
    }

    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }

    pub fn reset(&mut self) {
        self.fingerprints.clear();
        self.names.clear();
    }
}

impl Default for LoopDetector {
    fn default() -> Self {
        Self::from_config(&LoopDetectionConfig::default())
    }
}

fn max_count(items: &VecDeque<String>) -> usize {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for item in items {
        *counts.entry(item.as_str()).or_default() += 1;
    }
    counts.into_values().max().unwrap_or(0)
}

/// SHA-256 over `name:` followed by the canonical (key-sorted) JSON of the
/// normalized arguments, hex encoded.
pub fn fingerprint(name: &str, args: &Value) -> String {
    let normalized = normalize_args(name, args);
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(b":");
    hasher.update(canonical_json(&normalized).as_bytes());
    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}

fn normalize_args(name: &str, args: &Value) -> Value {
    if !COMMAND_TOOLS.contains(&name) {
        return args.clone();
    }
    match args {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let v = match v {
                        Value::String(s) => Value::String(normalize_command(s)),
                        other => other.clone(),
                    };
                    (k.clone(), v)
                })
                .collect(),
        ),
        Value::String(s) => Value::String(normalize_command(s)),
        other => other.clone(),
    }
}

fn version_qualifier() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s*(?:===|==|>=|<=|~=|!=|>|<|@)\s*v?[0-9][A-Za-z0-9.*+!_-]*").ok())
        .as_ref()
}

/// Strip version qualifiers (`foo==1.2.3`, `bar>=2`) and collapse whitespace.
pub fn normalize_command(command: &str) -> String {
    let stripped = match version_qualifier() {
        Some(re) => re.replace_all(command, "").into_owned(),
        None => command.to_string(),
    };
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn canonical_json(value: &Value) -> String {
    fn sorted(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                let mut out = Map::new();
                for key in keys {
                    out.insert(key.clone(), sorted(&map[key]));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }
    sorted(value).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn exact_repeat_trips_on_third_call() {
        let mut detector = LoopDetector::default();
        let args = json!({"query": "invoices"});
        detector.record("check_forum", &args);
        assert!(!detector.is_stuck());
        detector.record("check_forum", &args);
        assert!(!detector.is_stuck());
        detector.record("check_forum", &args);
        assert!(detector.is_stuck());
    }

    #[test]
    fn distinct_calls_are_not_stuck() {
        let mut detector = LoopDetector::default();
        for i in 0..5 {
            detector.record("read_local_file", &json!({"filepath": format!("f{i}.txt")}));
        }
        detector.record("list_workspace", &json!({}));
        assert!(!detector.is_stuck());
    }

    #[test]
    fn name_thrashing_trips_at_threshold_times_multiplier() {
        let mut detector = LoopDetector::default();
        for i in 0..11 {
            detector.record("run_command", &json!({"command": format!("head -n {i} data.csv")}));
            assert!(!detector.is_stuck(), "stuck too early at call {}", i + 1);
        }
        detector.record("run_command", &json!({"command": "head -n 99 data.csv"}));
        assert!(detector.is_stuck());
    }

    #[test]
    fn version_qualifiers_collide() {
        let a = fingerprint("run_command", &json!({"command": "pip install foo==1.2.3"}));
        let b = fingerprint("run_command", &json!({"command": "pip install foo==4.5.6"}));
        let c = fingerprint("run_command", &json!({"command": "pip   install  foo>=2.0"}));
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(normalize_command("uv pip install pandas==2.2.1  openpyxl"), "uv pip install pandas openpyxl");
    }

    #[test]
    fn other_tools_are_not_normalized() {
        let a = fingerprint("write_to_forum", &json!({"content": "foo==1"}));
        let b = fingerprint("write_to_forum", &json!({"content": "foo==2"}));
        assert_ne!(a, b);
    }

    #[test]
    fn key_order_does_not_matter() {
        let a = fingerprint("check_forum", &json!({"query": "q", "phase": "explore"}));
        let b = fingerprint("check_forum", &json!({"phase": "explore", "query": "q"}));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn history_is_bounded() {
        let mut detector = LoopDetector::new(3, 4, 5);
        let args = json!({"command": "ls"});
        detector.record("run_command", &args);
        detector.record("run_command", &args);
        for i in 0..5 {
            detector.record("read_local_file", &json!({"filepath": i}));
        }
        assert_eq!(detector.len(), 5);
        detector.record("run_command", &args);
        assert!(!detector.is_stuck());
    }

    #[test]
    fn reset_clears_history() {
        let mut detector = LoopDetector::default();
        for _ in 0..3 {
            detector.record("list_workspace", &json!({}));
        }
        assert!(detector.is_stuck());
        detector.reset();
        assert!(detector.is_empty());
        assert!(!detector.is_stuck());
    }
}
