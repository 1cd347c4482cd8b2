//! Tokenized command input.

use serde::{Deserialize, Serialize};

/// One flag occurrence as produced by the tokenizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputFlag {
    pub name: String,
    pub value: String,
}

/// Tokenized input for a single command invocation.
///
/// `flags` and `args` keep their order on the command line. `target` holds
/// the command path segments and is only consulted by dispatch.
///
/// # Examples
///
/// ```
/// use param_bind_core::Input;
///
/// let input = Input::new()
///     .with_target(["remote", "add"])
///     .with_flag("verbose", "true")
///     .with_arg("origin");
///
/// assert_eq!(input.target_display(), "remote add");
/// assert_eq!(input.flags[0].name, "verbose");
/// assert_eq!(input.args, vec!["origin"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Input {
    #[serde(default)]
    pub flags: Vec<InputFlag>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub target: Vec<String>,
}

impl Input {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the command path segments.
    pub fn with_target<S: Into<String>>(mut self, target: impl IntoIterator<Item = S>) -> Self {
        self.target = target.into_iter().map(Into::into).collect();
        self
    }

    /// Appends a flag occurrence.
    pub fn with_flag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.flags.push(InputFlag {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// Appends a positional argument.
    pub fn with_arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Target segments joined by a single space.
    pub fn target_display(&self) -> String {
        self.target.join(" ")
    }
}
