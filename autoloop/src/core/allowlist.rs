//! Command-prefix allowlist gating `shell` and `verify` tasks.
//!
//! This is the only protection against arbitrary execution. It does not parse
//! the command, so an allowlisted prefix followed by `;` still runs whatever
//! follows it.

/// Ordered set of permitted command prefixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandAllowlist {
    prefixes: Vec<String>,
}

impl CommandAllowlist {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
        }
    }

    /// True if `command` starts with a permitted prefix.
    ///
    /// A prefix such as `"cargo "` also admits the bare program (`"cargo"`).
    pub fn permits(&self, command: &str) -> bool {
        let command = command.trim_start();
        if command.is_empty() {
            return false;
        }
        self.prefixes.iter().any(|prefix| {
            !prefix.trim().is_empty()
                && (command.starts_with(prefix.as_str()) || command == prefix.trim_end())
        })
    }
}
