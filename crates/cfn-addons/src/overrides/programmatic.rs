//! Programmatic overrides
//!
//! The rendered template is handed over as a whole and the overrider returns the
//! replacement. [FnOverrider] wraps a closure for library users, [CommandOverrider]
//! runs an external program configured in `overrides/override.yml`:
//!
//! ```yaml
//! command: ["node", "override.js"]
//! ```
//!
//! The program reads the template as JSON on stdin and writes the result as JSON on
//! stdout. It runs inside the overrides directory.
use super::{OverrideError, TemplateOverrider};
use serde::Deserialize;
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Overrides a template with a closure
pub struct FnOverrider<F> {
    name: String,
    f: F,
}

impl<F> FnOverrider<F>
where
    F: Fn(Value) -> Result<Value, OverrideError>,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> std::fmt::Debug for FnOverrider<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnOverrider").field("name", &self.name).finish()
    }
}

impl<F> TemplateOverrider for FnOverrider<F>
where
    F: Fn(Value) -> Result<Value, OverrideError>,
{
    fn describe(&self) -> String {
        self.name.clone()
    }

    fn override_template(&self, template: Value) -> Result<Value, OverrideError> {
        (self.f)(template)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandOverrider {
    pub command: Vec<String>,
    #[serde(skip)]
    pub workdir: PathBuf,
}

impl CommandOverrider {
    pub fn parse(text: &str, workdir: &Path, file: &str) -> Result<Self, OverrideError> {
        let malformed = |reason: String| OverrideError::MalformedOverride {
            file: file.to_string(),
            reason,
        };

        let mut overrider: CommandOverrider =
            serde_yaml::from_str(text).map_err(|e| malformed(e.to_string()))?;
        if overrider.command.is_empty() {
            return Err(malformed("`command` must name a program".into()));
        }

        overrider.workdir = workdir.to_path_buf();
        Ok(overrider)
    }

    pub fn load(path: &Path) -> Result<Self, OverrideError> {
        tracing::info!(path=%path.display(), "loading override command");
        let text = std::fs::read_to_string(path).map_err(|source| OverrideError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let workdir = path.parent().unwrap_or(Path::new("."));
        Self::parse(&text, workdir, &path.display().to_string())
    }
}

impl TemplateOverrider for CommandOverrider {
    fn describe(&self) -> String {
        format!("command `{}`", self.command.join(" "))
    }

    fn override_template(&self, template: Value) -> Result<Value, OverrideError> {
        let failed = |reason: String| OverrideError::Command {
            command: self.command.join(" "),
            reason,
        };

        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| failed("empty command".into()))?;

        tracing::debug!(%program, workdir=%self.workdir.display(), "running override command");
        let mut child = Command::new(program)
            .args(args)
            .current_dir(&self.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| failed(e.to_string()))?;

        let input = serde_json::to_vec(&template).map_err(|e| failed(e.to_string()))?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| failed("stdin unavailable".into()))?;
        // the child may fill stdout before it has read all of stdin
        let writer = std::thread::spawn(move || stdin.write_all(&input));

        let output = child.wait_with_output().map_err(|e| failed(e.to_string()))?;
        match writer.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(error=%e, "override command closed stdin early"),
            Err(_) => return Err(failed("stdin writer panicked".into())),
        }

        if !output.status.success() {
            return Err(failed(format!("exited with {}", output.status)));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| failed(format!("stdout is not a JSON template: {e}")))
    }
}
