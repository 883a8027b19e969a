//! Command records - one specification per parsed command, flattened into instances

use serde::{Deserialize, Serialize};

/// A parsed command specification, before repeat expansion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Number of instances this record expands into
    #[serde(default = "default_times")]
    pub times: usize,
    /// Pre-execution delay, in the configured time unit
    pub delay: Option<u64>,
    /// Index into the flattened list; negative counts back from the end of the list built so far
    pub dependency: Option<isize>,
}

fn default_times() -> usize {
    1
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            times: 1,
            delay: None,
            dependency: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn times(mut self, times: usize) -> Self {
        self.times = times;
        self
    }

    pub fn delay(mut self, delay: u64) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn depends_on(mut self, index: isize) -> Self {
        self.dependency = Some(index);
        self
    }
}

/// One concrete unit of work eligible for scheduling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandInstance {
    pub program: String,
    pub args: Vec<String>,
    pub delay: Option<u64>,
    /// Resolved dependency index; still negative if it pointed before the start of the list
    pub dependency: Option<isize>,
}

impl CommandInstance {
    /// Human-readable command line for logs
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Expand repeat counts into a flat instance list and resolve relative dependencies
///
/// A negative dependency is taken relative to the number of instances already
/// emitted when the instance itself is appended, so `-1` names the instance
/// right before it.
pub fn expand(specs: &[CommandSpec]) -> Vec<CommandInstance> {
    let mut instances = Vec::with_capacity(specs.iter().map(|s| s.times).sum());

    for spec in specs {
        for _ in 0..spec.times {
            let dependency = spec.dependency.map(|dep| {
                if dep < 0 {
                    instances.len() as isize + dep
                } else {
                    dep
                }
            });

            instances.push(CommandInstance {
                program: spec.program.clone(),
                args: spec.args.clone(),
                delay: spec.delay,
                dependency,
            });
        }
    }

    instances
}
