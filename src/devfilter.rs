//! An end-to-end example `Device`: watches input channels and relays a transformed value to
//! an output channel, optionally delayed through a child [`crate::scheduler::Scheduler`].

use crate::array::{Array, Value};
use crate::channel::{Channel, ChannelObserver};
use crate::clock::Clock;
use crate::device::{Device, DeviceCore};
use crate::errors::{DeviceError, FilterError, ServiceError};
use crate::scheduler::Scheduler;
use crate::service::{Service, ServiceState};
use crate::task::{Task, TaskFrame, TaskOutcome, TaskPriority};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// The comparison a [`Rule`] evaluates between an input channel's value and its configured
/// trigger value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOp {
    Equal,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    BitAnd,
    BitOr,
    BitXor,
}

impl MatchOp {
    fn from_key(s: &str) -> Option<Self> {
        match s {
            "equal" => Some(MatchOp::Equal),
            "less" => Some(MatchOp::Less),
            "less_eq" => Some(MatchOp::LessEq),
            "greater" => Some(MatchOp::Greater),
            "greater_eq" => Some(MatchOp::GreaterEq),
            "bit_and" => Some(MatchOp::BitAnd),
            "bit_or" => Some(MatchOp::BitOr),
            "bit_xor" => Some(MatchOp::BitXor),
            _ => None,
        }
    }

    fn evaluate(self, lhs: Value, rhs: Value) -> bool {
        match self {
            MatchOp::Equal => lhs.as_f64() == rhs.as_f64(),
            MatchOp::Less => lhs.as_f64() < rhs.as_f64(),
            MatchOp::LessEq => lhs.as_f64() <= rhs.as_f64(),
            MatchOp::Greater => lhs.as_f64() > rhs.as_f64(),
            MatchOp::GreaterEq => lhs.as_f64() >= rhs.as_f64(),
            MatchOp::BitAnd => (lhs.as_i64().unwrap_or(0) & rhs.as_i64().unwrap_or(0)) != 0,
            MatchOp::BitOr => (lhs.as_i64().unwrap_or(0) | rhs.as_i64().unwrap_or(0)) != 0,
            MatchOp::BitXor => (lhs.as_i64().unwrap_or(0) ^ rhs.as_i64().unwrap_or(0)) != 0,
        }
    }
}

/// A single input-to-output relay rule, parsed from a `;`-separated `key=value` rule string
/// (§6 of the design notes; bit-exact with the grammar documented there).
#[derive(Debug, Clone)]
pub struct Rule {
    pub input: String,
    pub output: String,
    pub trigger_idx: usize,
    /// `None` means "any value at `trigger_idx` matches" (the colon form's empty-value
    /// case).
    pub trigger_value: Option<Value>,
    pub match_op: MatchOp,
    pub should_match: bool,
    pub write_idx: usize,
    /// `None` together with `write_same_value == true` means "pass the input value
    /// through unchanged".
    pub write_value: Option<Value>,
    pub write_same_value: bool,
    pub nano_delay: i64,
}

fn parse_scalar(s: &str) -> Option<Value> {
    if let Ok(b) = s.parse::<bool>() {
        return Some(Value::Bool(b));
    }
    if let Ok(i) = s.parse::<i64>() {
        return Some(Value::I64(i));
    }
    if let Ok(f) = s.parse::<f64>() {
        return Some(Value::F64(f));
    }
    None
}

fn parse_trigger(raw: &str) -> Result<(usize, Option<Value>), FilterError> {
    let parts: Vec<&str> = raw.splitn(2, ':').collect();
    if parts.len() == 1 {
        let v = parts[0];
        if v.is_empty() {
            return Err(FilterError::InvalidValue { key: "trigger", value: raw.to_string() });
        }
        let value = parse_scalar(v)
            .ok_or_else(|| FilterError::InvalidValue { key: "trigger", value: raw.to_string() })?;
        Ok((0, Some(value)))
    } else {
        let (idx_s, val_s) = (parts[0], parts[1]);
        if idx_s.is_empty() && val_s.is_empty() {
            return Err(FilterError::InvalidValue { key: "trigger", value: raw.to_string() });
        }
        let idx = if idx_s.is_empty() {
            0
        } else {
            idx_s
                .parse::<usize>()
                .map_err(|_| FilterError::InvalidValue { key: "trigger", value: raw.to_string() })?
        };
        let value = if val_s.is_empty() {
            None
        } else {
            Some(
                parse_scalar(val_s)
                    .ok_or_else(|| FilterError::InvalidValue { key: "trigger", value: raw.to_string() })?,
            )
        };
        Ok((idx, value))
    }
}

fn parse_write(raw: &str, trigger_idx: usize) -> Result<(usize, Option<Value>, bool), FilterError> {
    let parts: Vec<&str> = raw.splitn(2, ':').collect();
    if parts.len() == 1 {
        let v = parts[0];
        if v.is_empty() {
            return Err(FilterError::InvalidValue { key: "write", value: raw.to_string() });
        }
        let value = parse_scalar(v)
            .ok_or_else(|| FilterError::InvalidValue { key: "write", value: raw.to_string() })?;
        Ok((trigger_idx, Some(value), false))
    } else {
        let (idx_s, val_s) = (parts[0], parts[1]);
        if idx_s.is_empty() && val_s.is_empty() {
            return Err(FilterError::InvalidValue { key: "write", value: raw.to_string() });
        }
        let idx = if idx_s.is_empty() {
            trigger_idx
        } else {
            idx_s
                .parse::<usize>()
                .map_err(|_| FilterError::InvalidValue { key: "write", value: raw.to_string() })?
        };
        if val_s.is_empty() {
            Ok((idx, None, true))
        } else {
            let value = parse_scalar(val_s)
                .ok_or_else(|| FilterError::InvalidValue { key: "write", value: raw.to_string() })?;
            Ok((idx, Some(value), false))
        }
    }
}

impl Rule {
    /// Parses a rule string such as `in=/io/in;out=/io/out;trigger=2:42;write=0:1;delay=0.01`.
    pub fn parse(rule_str: &str) -> Result<Rule, FilterError> {
        let pairs: HashMap<&str, &str> =
            rule_str.split(';').filter(|p| !p.is_empty()).filter_map(|p| p.split_once('=')).collect();

        let input = pairs.get("in").ok_or(FilterError::MissingKey("in"))?.to_string();
        let output = pairs.get("out").ok_or(FilterError::MissingKey("out"))?.to_string();
        let trigger_raw = pairs.get("trigger").ok_or(FilterError::MissingKey("trigger"))?;
        let (trigger_idx, trigger_value) = parse_trigger(trigger_raw)?;

        let (write_idx, write_value, write_same_value) = match pairs.get("write") {
            None => (trigger_idx, None, true),
            Some(raw) => parse_write(raw, trigger_idx)?,
        };

        let should_match = match pairs.get("match") {
            None => true,
            Some(raw) => {
                raw.parse::<bool>().map_err(|_| FilterError::InvalidValue { key: "match", value: raw.to_string() })?
            }
        };

        let nano_delay = match pairs.get("delay") {
            None => 0,
            Some(raw) => {
                let seconds: f64 = raw
                    .parse()
                    .map_err(|_| FilterError::InvalidValue { key: "delay", value: raw.to_string() })?;
                (seconds * 1_000_000_000.0) as i64
            }
        };

        let match_op = match pairs.get("op") {
            None => MatchOp::Equal,
            Some(raw) => MatchOp::from_key(raw)
                .ok_or_else(|| FilterError::InvalidValue { key: "op", value: raw.to_string() })?,
        };

        Ok(Rule {
            input,
            output,
            trigger_idx,
            trigger_value,
            match_op,
            should_match,
            write_idx,
            write_value,
            write_same_value,
            nano_delay,
        })
    }

    fn validate(&self, channel_in: &Channel, channel_out: &Channel) -> Result<(), FilterError> {
        if self.trigger_idx >= channel_in.size() {
            return Err(FilterError::Invalid(format!(
                "trigger index {} is out of bounds for input channel `{}` of size {}",
                self.trigger_idx,
                channel_in.name(),
                channel_in.size()
            )));
        }
        if self.write_idx >= channel_out.size() {
            return Err(FilterError::Invalid(format!(
                "write index {} is out of bounds for output channel `{}` of size {}",
                self.write_idx,
                channel_out.name(),
                channel_out.size()
            )));
        }
        let in_is_float = channel_in.element_type().is_float();
        if matches!(self.trigger_value, Some(v) if v.element_type().is_float()) && !in_is_float {
            return Err(FilterError::Invalid(format!(
                "trigger value is float but input channel `{}` is not",
                channel_in.name()
            )));
        }
        let out_is_float = channel_out.element_type().is_float();
        if !out_is_float {
            let write_is_float = if self.write_same_value {
                matches!(self.trigger_value, Some(v) if v.element_type().is_float())
            } else {
                matches!(self.write_value, Some(v) if v.element_type().is_float())
            };
            if write_is_float {
                return Err(FilterError::Invalid(format!(
                    "write value is float but output channel `{}` is not",
                    channel_out.name()
                )));
            }
        }
        Ok(())
    }
}

struct BoundRule {
    rule: Rule,
    channel_out: Arc<Channel>,
}

fn apply_rule(channel_in: &Channel, bound: &BoundRule, scheduler: Option<&Arc<Scheduler>>) {
    let in_value = match channel_in.read(bound.rule.trigger_idx) {
        Ok(v) => v,
        Err(_) => return,
    };
    let matched = match bound.rule.trigger_value {
        Some(trigger) => bound.rule.match_op.evaluate(in_value, trigger),
        None => true,
    };
    if matched != bound.rule.should_match {
        return;
    }
    let out_value = if bound.rule.write_same_value { in_value } else { bound.rule.write_value.unwrap_or(in_value) };
    let write_idx = bound.rule.write_idx;
    let timestamp = channel_in.timestamp();

    if bound.rule.nano_delay > 0 {
        if let Some(scheduler) = scheduler {
            let channel_out = bound.channel_out.clone();
            // `Scheduler::submit` assigns the real tie-break sequence; this placeholder is
            // never observed.
            let task = Arc::new(Task::new(
                Arc::new(DelayedWrite { channel_out, write_idx, value: out_value, timestamp }),
                None,
                Some(bound.rule.nano_delay),
                None,
                TaskPriority::Moderate,
                "devfilter-delayed-write",
                0,
            ));
            scheduler.submit(task);
        }
        return;
    }

    write_value_at(&bound.channel_out, write_idx, out_value, timestamp);
}

fn cast_value(value: Value, target: crate::array::ElementType) -> Value {
    use crate::array::ElementType;
    if value.element_type() == target {
        return value;
    }
    match target {
        ElementType::Bool => Value::Bool(value.as_f64() != 0.0),
        ElementType::I8 => Value::I8(value.as_f64() as i8),
        ElementType::U8 => Value::U8(value.as_f64() as u8),
        ElementType::I16 => Value::I16(value.as_f64() as i16),
        ElementType::U16 => Value::U16(value.as_f64() as u16),
        ElementType::I32 => Value::I32(value.as_f64() as i32),
        ElementType::U32 => Value::U32(value.as_f64() as u32),
        ElementType::I64 => Value::I64(value.as_f64() as i64),
        ElementType::U64 => Value::U64(value.as_f64() as u64),
        ElementType::F32 => Value::F32(value.as_f64() as f32),
        ElementType::F64 => Value::F64(value.as_f64()),
        ElementType::Char => Value::Char(value.as_f64() as u8),
    }
}

fn write_value_at(channel: &Channel, index: usize, value: Value, timestamp: crate::utils::Timestamp) {
    let value = cast_value(value, channel.element_type());
    let width = channel.element_type().byte_width();
    let mut tmp = Array::zeroed(channel.element_type(), 1);
    let _ = tmp.set(0, value);
    let _ = channel.write_bytes_at(tmp.buf(), width * index, timestamp);
}

struct DelayedWrite {
    channel_out: Arc<Channel>,
    write_idx: usize,
    value: Value,
    timestamp: crate::utils::Timestamp,
}

#[async_trait]
impl TaskFrame for DelayedWrite {
    async fn execute(&self) -> Result<TaskOutcome, String> {
        write_value_at(&self.channel_out, self.write_idx, self.value, self.timestamp);
        Ok(TaskOutcome::Stop)
    }
}

struct RuleObserver {
    bound: Vec<Arc<BoundRule>>,
    scheduler: Mutex<Option<Arc<Scheduler>>>,
}

impl ChannelObserver for RuleObserver {
    fn handle(&self, channel: &Channel) {
        let scheduler = self.scheduler.lock().unwrap().clone();
        for bound in &self.bound {
            apply_rule(channel, bound, scheduler.as_ref());
        }
    }
}

/// Watches input channels and relays a transformed value to an output channel per its
/// configured [`Rule`]s, optionally delayed through a child [`Scheduler`].
pub struct DevFilter {
    core: DeviceCore,
    rules: Vec<Rule>,
    observers: Mutex<Vec<(Arc<Channel>, Arc<RuleObserver>)>>,
    scheduler: Mutex<Option<Arc<Scheduler>>>,
}

impl DevFilter {
    /// Creates a filter device named `name`, timestamping against `clock`. Rules are added
    /// with [`DevFilter::add_rule`]/[`DevFilter::add_rule_str`] before `start()`.
    pub fn new(name: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            core: DeviceCore::new(name, clock),
            rules: Vec::new(),
            observers: Mutex::new(Vec::new()),
            scheduler: Mutex::new(None),
        }
    }

    /// Adds an already-parsed rule.
    pub fn add_rule(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    /// Parses and adds a rule string.
    pub fn add_rule_str(&mut self, rule_str: &str) -> Result<(), FilterError> {
        self.add_rule(Rule::parse(rule_str)?);
        Ok(())
    }

    fn has_delayed_rule(&self) -> bool {
        self.rules.iter().any(|r| r.nano_delay > 0)
    }
}

#[async_trait]
impl Service for DevFilter {
    async fn setup(&self) -> Result<(), ServiceError> {
        self.core.controller().run_setup(async { Ok(()) }).await
    }

    async fn init(&self) -> Result<(), ServiceError> {
        let needs_scheduler = self.has_delayed_rule();
        self.core
            .controller()
            .run_init(async {
                if needs_scheduler {
                    let scheduler: Scheduler = Scheduler::builder().clock(self.core.clock().clone()).build();
                    let scheduler = Arc::new(scheduler);
                    scheduler.start().await?;
                    *self.scheduler.lock().unwrap() = Some(scheduler);
                }
                Ok(())
            })
            .await
    }

    async fn start(&self) -> Result<(), ServiceError> {
        self.core
            .controller()
            .run_start(async {
                let mut by_input: HashMap<String, Vec<Arc<BoundRule>>> = HashMap::new();
                for rule in &self.rules {
                    let channel_in = self.core.find_channel(&rule.input).ok_or_else(|| {
                        ServiceError::StartFailed
                    })?;
                    let channel_out = self.core.find_channel(&rule.output).ok_or(ServiceError::StartFailed)?;
                    if Arc::ptr_eq(&channel_in, &channel_out) {
                        return Err(ServiceError::StartFailed);
                    }
                    rule.validate(&channel_in, &channel_out).map_err(|_| ServiceError::StartFailed)?;
                    by_input
                        .entry(rule.input.clone())
                        .or_default()
                        .push(Arc::new(BoundRule { rule: rule.clone(), channel_out }));
                }

                let mut observers = self.observers.lock().unwrap();
                for (input_path, bound) in by_input {
                    let channel_in = self.core.find_channel(&input_path).ok_or(ServiceError::StartFailed)?;
                    let observer = Arc::new(RuleObserver {
                        bound,
                        scheduler: Mutex::new(self.scheduler.lock().unwrap().clone()),
                    });
                    channel_in.add_observer(observer.clone());
                    observers.push((channel_in, observer));
                }
                Ok(())
            })
            .await
    }

    async fn stop(&self) -> Result<(), ServiceError> {
        self.core
            .controller()
            .run_stop(async {
                if let Some(scheduler) = self.scheduler.lock().unwrap().clone() {
                    scheduler.stop().await.ok();
                }
                Ok(())
            })
            .await
    }

    async fn reset(&self) -> Result<(), ServiceError> {
        self.core
            .controller()
            .run_reset(async {
                self.observers.lock().unwrap().clear();
                *self.scheduler.lock().unwrap() = None;
                Ok(())
            })
            .await
    }

    fn state(&self) -> ServiceState {
        self.core.controller().snapshot()
    }
}

impl Device for DevFilter {
    fn core(&self) -> &DeviceCore {
        &self.core
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_rule_string() {
        let rule = Rule::parse("in=/io/in;out=/io/out;trigger=2:42;write=0:1;match=true;delay=0.01").unwrap();
        assert_eq!(rule.input, "/io/in");
        assert_eq!(rule.output, "/io/out");
        assert_eq!(rule.trigger_idx, 2);
        assert_eq!(rule.trigger_value, Some(Value::I64(42)));
        assert_eq!(rule.write_idx, 0);
        assert_eq!(rule.write_value, Some(Value::I64(1)));
        assert!(rule.should_match);
        assert_eq!(rule.nano_delay, 10_000_000);
    }

    #[test]
    fn bare_trigger_defaults_index_to_zero() {
        let rule = Rule::parse("in=a;out=b;trigger=7").unwrap();
        assert_eq!(rule.trigger_idx, 0);
        assert_eq!(rule.trigger_value, Some(Value::I64(7)));
    }

    #[test]
    fn empty_trigger_value_matches_any_value() {
        let rule = Rule::parse("in=a;out=b;trigger=3:").unwrap();
        assert_eq!(rule.trigger_idx, 3);
        assert_eq!(rule.trigger_value, None);
    }

    #[test]
    fn missing_write_passes_input_through_at_trigger_index() {
        let rule = Rule::parse("in=a;out=b;trigger=1:5").unwrap();
        assert_eq!(rule.write_idx, 1);
        assert!(rule.write_same_value);
        assert_eq!(rule.write_value, None);
    }

    #[test]
    fn missing_required_key_is_rejected() {
        let err = Rule::parse("out=b;trigger=1").unwrap_err();
        assert!(matches!(err, FilterError::MissingKey("in")));
    }
}
