//! Declarative argument schema for every engine command
//!
//! The same schema drives validation, the subprocess argv and the structured
//! request sent to the daemon, so the two transports can never disagree about
//! what a command accepts.

use crate::error::CallerContractError;
use chrono::NaiveDate;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineCommand {
    OptimizeAllocate,
    OptimizeAdjust,
    OptimizeCandidates,
    OptimizePeriod,
    Predict,
    Weather,
    Forecast,
    Crop,
    Progress,
    Schedule,
    FertilizePlan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Path,
    Date,
    Text,
    Integer,
    /// Flag without a value
    Switch,
}

impl ArgKind {
    pub fn expected(&self) -> &'static str {
        match self {
            ArgKind::Path => "a file path",
            ArgKind::Date => "a YYYY-MM-DD date",
            ArgKind::Text => "a value",
            ArgKind::Integer => "an integer",
            ArgKind::Switch => "no value",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgSpec {
    pub flag: &'static str,
    pub required: bool,
    pub kind: ArgKind,
}

const fn req(flag: &'static str, kind: ArgKind) -> ArgSpec {
    ArgSpec {
        flag,
        required: true,
        kind,
    }
}

const fn opt(flag: &'static str, kind: ArgKind) -> ArgSpec {
    ArgSpec {
        flag,
        required: false,
        kind,
    }
}

use ArgKind::*;

const OPTIMIZE_ALLOCATE: &[ArgSpec] = &[
    req("fields-file", Path),
    req("crops-file", Path),
    req("planning-start", Date),
    req("planning-end", Date),
    req("weather-file", Path),
    req("objective", Text),
    opt("interaction-rules-file", Path),
    opt("max-time", Integer),
    opt("enable-parallel", Switch),
    req("format", Text),
];

const OPTIMIZE_ADJUST: &[ArgSpec] = &[
    req("current-allocation", Path),
    req("moves", Path),
    req("fields-file", Path),
    req("crops-file", Path),
    req("planning-start", Date),
    req("planning-end", Date),
    req("weather-file", Path),
    opt("objective", Text),
    opt("interaction-rules-file", Path),
    opt("max-time", Integer),
    opt("enable-parallel", Switch),
    req("format", Text),
];

const OPTIMIZE_CANDIDATES: &[ArgSpec] = &[
    req("allocation", Path),
    req("fields-file", Path),
    req("crops-file", Path),
    req("target-crop", Text),
    req("planning-start", Date),
    req("planning-end", Date),
    req("weather-file", Path),
    req("output", Path),
    opt("interaction-rules-file", Path),
    req("format", Text),
];

const OPTIMIZE_PERIOD: &[ArgSpec] = &[
    req("crop-file", Path),
    req("evaluation-start", Date),
    req("evaluation-end", Date),
    req("weather-file", Path),
    req("field-file", Path),
    opt("interaction-rules-file", Path),
    opt("format", Text),
];

const PREDICT: &[ArgSpec] = &[
    req("input", Path),
    req("output", Path),
    req("days", Integer),
    req("model", Text),
    opt("metrics", Text),
];

const WEATHER: &[ArgSpec] = &[
    req("location", Text),
    opt("start-date", Date),
    opt("end-date", Date),
    opt("days", Integer),
    opt("data-source", Text),
    opt("json", Switch),
];

const FORECAST: &[ArgSpec] = &[req("location", Text), opt("json", Switch)];

const CROP: &[ArgSpec] = &[req("query", Text), opt("json", Switch)];

const PROGRESS: &[ArgSpec] = &[
    req("crop-file", Path),
    req("start-date", Date),
    req("weather-file", Path),
    opt("format", Text),
];

const SCHEDULE: &[ArgSpec] = &[
    req("crop-name", Text),
    req("stage-requirements", Path),
    req("agricultural-tasks", Path),
    opt("variety", Text),
    opt("format", Text),
];

const FERTILIZE_PLAN: &[ArgSpec] = &[req("crop-file", Path), opt("format", Text)];

impl EngineCommand {
    pub const ALL: [EngineCommand; 11] = [
        EngineCommand::OptimizeAllocate,
        EngineCommand::OptimizeAdjust,
        EngineCommand::OptimizeCandidates,
        EngineCommand::OptimizePeriod,
        EngineCommand::Predict,
        EngineCommand::Weather,
        EngineCommand::Forecast,
        EngineCommand::Crop,
        EngineCommand::Progress,
        EngineCommand::Schedule,
        EngineCommand::FertilizePlan,
    ];

    /// Command words as passed on the engine's command line
    pub fn words(&self) -> &'static [&'static str] {
        match self {
            EngineCommand::OptimizeAllocate => &["optimize", "allocate"],
            EngineCommand::OptimizeAdjust => &["optimize", "adjust"],
            EngineCommand::OptimizeCandidates => &["optimize", "candidates"],
            EngineCommand::OptimizePeriod => &["optimize", "period"],
            EngineCommand::Predict => &["predict"],
            EngineCommand::Weather => &["weather"],
            EngineCommand::Forecast => &["forecast"],
            EngineCommand::Crop => &["crop"],
            EngineCommand::Progress => &["progress"],
            EngineCommand::Schedule => &["schedule"],
            EngineCommand::FertilizePlan => &["fertilize", "plan"],
        }
    }

    pub fn schema(&self) -> &'static [ArgSpec] {
        match self {
            EngineCommand::OptimizeAllocate => OPTIMIZE_ALLOCATE,
            EngineCommand::OptimizeAdjust => OPTIMIZE_ADJUST,
            EngineCommand::OptimizeCandidates => OPTIMIZE_CANDIDATES,
            EngineCommand::OptimizePeriod => OPTIMIZE_PERIOD,
            EngineCommand::Predict => PREDICT,
            EngineCommand::Weather => WEATHER,
            EngineCommand::Forecast => FORECAST,
            EngineCommand::Crop => CROP,
            EngineCommand::Progress => PROGRESS,
            EngineCommand::Schedule => SCHEDULE,
            EngineCommand::FertilizePlan => FERTILIZE_PLAN,
        }
    }

    pub fn spec(&self, flag: &str) -> Option<&'static ArgSpec> {
        self.schema().iter().find(|s| s.flag == flag)
    }

    /// Commands whose result is written to the `--output` file, not stdout
    pub fn writes_output_file(&self) -> bool {
        matches!(
            self,
            EngineCommand::OptimizeCandidates | EngineCommand::Predict
        )
    }

    /// Commands that run under the long timeout
    pub fn is_long_running(&self) -> bool {
        matches!(self, EngineCommand::Predict)
    }

    /// Match the leading command words of `tokens`, returning the command and
    /// the number of tokens consumed.
    pub fn parse(tokens: &[String]) -> Result<(Self, usize), CallerContractError> {
        Self::ALL
            .iter()
            .filter(|c| {
                let words = c.words();
                tokens.len() >= words.len() && words.iter().zip(tokens).all(|(w, t)| w == t)
            })
            .max_by_key(|c| c.words().len())
            .map(|c| (*c, c.words().len()))
            .ok_or_else(|| {
                CallerContractError::UnknownCommand(
                    tokens
                        .iter()
                        .take_while(|t| !t.starts_with("--"))
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(" "),
                )
            })
    }
}

impl std::fmt::Display for EngineCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.words().join(" "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ArgValue {
    Value(String),
    Switch,
}

/// Flag values for one engine call, keyed by flag name without `--`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandArgs {
    values: BTreeMap<String, ArgValue>,
}

impl CommandArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, flag: &str, value: impl ToString) -> Self {
        self.values
            .insert(flag.to_string(), ArgValue::Value(value.to_string()));
        self
    }

    pub fn set_opt<T: ToString>(self, flag: &str, value: Option<T>) -> Self {
        match value {
            Some(v) => self.set(flag, v),
            None => self,
        }
    }

    pub fn switch(mut self, flag: &str) -> Self {
        self.values.insert(flag.to_string(), ArgValue::Switch);
        self
    }

    pub fn switch_if(self, flag: &str, enabled: bool) -> Self {
        if enabled {
            self.switch(flag)
        } else {
            self
        }
    }

    /// Value of a flag; `None` for absent flags and switches
    pub fn get(&self, flag: &str) -> Option<&str> {
        match self.values.get(flag) {
            Some(ArgValue::Value(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn contains(&self, flag: &str) -> bool {
        self.values.contains_key(flag)
    }

    /// Flags carrying a value, in flag-name order
    pub fn values(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().filter_map(|(flag, value)| match value {
            ArgValue::Value(v) => Some((flag.as_str(), v.as_str())),
            ArgValue::Switch => None,
        })
    }

    /// Parse `--flag value` tokens against the command's schema.
    pub fn parse(command: EngineCommand, tokens: &[String]) -> Result<Self, CallerContractError> {
        let mut args = Self::new();
        let mut iter = tokens.iter();

        while let Some(token) = iter.next() {
            let flag = token.strip_prefix("--").ok_or_else(|| {
                CallerContractError::UnknownArgument {
                    command: command.to_string(),
                    flag: token.clone(),
                }
            })?;

            let spec = command
                .spec(flag)
                .ok_or_else(|| CallerContractError::UnknownArgument {
                    command: command.to_string(),
                    flag: flag.to_string(),
                })?;

            if spec.kind == Switch {
                args = args.switch(flag);
                continue;
            }

            match iter.next() {
                Some(value) => args = args.set(flag, value),
                None => {
                    return Err(CallerContractError::InvalidValue {
                        command: command.to_string(),
                        flag: flag.to_string(),
                        expected: spec.kind.expected(),
                        value: String::new(),
                    })
                }
            }
        }

        Ok(args)
    }

    /// Check the args against the command's schema.
    pub fn validate(&self, command: EngineCommand) -> Result<(), CallerContractError> {
        for (flag, value) in &self.values {
            let spec = command
                .spec(flag)
                .ok_or_else(|| CallerContractError::UnknownArgument {
                    command: command.to_string(),
                    flag: flag.clone(),
                })?;

            let valid = match (spec.kind, value) {
                (Switch, ArgValue::Switch) => true,
                (Switch, ArgValue::Value(_)) | (_, ArgValue::Switch) => false,
                (Integer, ArgValue::Value(v)) => v.trim().parse::<i64>().is_ok(),
                (Date, ArgValue::Value(v)) => NaiveDate::parse_from_str(v, "%Y-%m-%d").is_ok(),
                (Path | Text, ArgValue::Value(v)) => !v.trim().is_empty(),
            };

            if !valid {
                return Err(CallerContractError::InvalidValue {
                    command: command.to_string(),
                    flag: flag.clone(),
                    expected: spec.kind.expected(),
                    value: match value {
                        ArgValue::Value(v) => v.clone(),
                        ArgValue::Switch => String::new(),
                    },
                });
            }
        }

        if let Some(missing) = command
            .schema()
            .iter()
            .find(|s| s.required && !self.values.contains_key(s.flag))
        {
            return Err(CallerContractError::MissingArgument {
                command: command.to_string(),
                flag: missing.flag.to_string(),
            });
        }

        Ok(())
    }

    /// Command words followed by flags in schema order.
    pub fn to_argv(&self, command: EngineCommand) -> Vec<String> {
        let mut argv: Vec<String> = command.words().iter().map(|w| w.to_string()).collect();

        for spec in command.schema() {
            match self.values.get(spec.flag) {
                Some(ArgValue::Value(v)) => {
                    argv.push(format!("--{}", spec.flag));
                    argv.push(v.clone());
                }
                Some(ArgValue::Switch) => argv.push(format!("--{}", spec.flag)),
                None => {}
            }
        }

        argv
    }

    /// Structured request for the daemon: `{"command", "subcommand", "args"}`.
    pub fn to_structured(&self, command: EngineCommand) -> Value {
        let words = command.words();
        let mut args = Map::new();

        for spec in command.schema() {
            let value = match (spec.kind, self.values.get(spec.flag)) {
                (_, None) => continue,
                (_, Some(ArgValue::Switch)) => Value::Bool(true),
                (Integer, Some(ArgValue::Value(v))) => v
                    .trim()
                    .parse::<i64>()
                    .map(Value::from)
                    .unwrap_or_else(|_| Value::String(v.clone())),
                (_, Some(ArgValue::Value(v))) => Value::String(v.clone()),
            };
            args.insert(spec.flag.to_string(), value);
        }

        serde_json::json!({
            "command": words[0],
            "subcommand": words.get(1),
            "args": args,
        })
    }
}
