//! Addon scopes and the stacks they attach to
//!
//! Addons live either next to an environment (`environments/addons/`) or next to a
//! workload (`<workload>/addons/`). The scope decides which parameters every fragment
//! has to declare and which directory the loader searches.
use std::fmt::Formatter;
use std::path::{Path, PathBuf};

pub const ENVIRONMENTS_DIR: &str = "environments";
pub const ADDONS_DIR: &str = "addons";
pub const OVERRIDES_DIR: &str = "overrides";
pub const MANIFEST_FILE: &str = "manifest.yml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddonScope {
    Environment,
    Workload,
}

impl AddonScope {
    /// Parameters every fragment of this scope must declare as `String`
    pub fn required_parameters(&self) -> &'static [&'static str] {
        match self {
            AddonScope::Environment => &["App", "Env"],
            AddonScope::Workload => &["App", "Env", "Name"],
        }
    }

    pub fn is_required(&self, parameter: &str) -> bool {
        self.required_parameters().contains(&parameter)
    }
}

impl std::fmt::Display for AddonScope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AddonScope::Environment => f.write_str("environment"),
            AddonScope::Workload => f.write_str("workload"),
        }
    }
}

/// A concrete stack addons are composed for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub app: String,
    pub env: String,
    pub workload: Option<String>,
}

impl Target {
    pub fn environment(app: impl Into<String>, env: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            env: env.into(),
            workload: None,
        }
    }

    pub fn workload(
        app: impl Into<String>,
        env: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            app: app.into(),
            env: env.into(),
            workload: Some(name.into()),
        }
    }

    pub fn scope(&self) -> AddonScope {
        match self.workload {
            Some(_) => AddonScope::Workload,
            None => AddonScope::Environment,
        }
    }

    /// The environment this target is deployed into
    pub fn environment_target(&self) -> Target {
        Target::environment(&self.app, &self.env)
    }

    /// `<app>-<env>` or `<app>-<env>-<workload>`
    pub fn stack_name(&self) -> String {
        match &self.workload {
            Some(name) => format!("{}-{}-{}", self.app, self.env, name),
            None => format!("{}-{}", self.app, self.env),
        }
    }

    /// Prefix every export of this environment is expected to carry
    pub fn export_prefix(&self) -> String {
        format!("{}-{}-", self.app, self.env)
    }

    /// Value the tool supplies for a required parameter
    pub fn parameter_value(&self, parameter: &str) -> Option<&str> {
        match parameter {
            "App" => Some(&self.app),
            "Env" => Some(&self.env),
            "Name" => self.workload.as_deref(),
            _ => None,
        }
    }

    pub fn scope_dir(&self, workspace: &Path) -> PathBuf {
        match &self.workload {
            Some(name) => workspace.join(name),
            None => workspace.join(ENVIRONMENTS_DIR),
        }
    }

    pub fn addons_dir(&self, workspace: &Path) -> PathBuf {
        self.scope_dir(workspace).join(ADDONS_DIR)
    }

    pub fn overrides_dir(&self, workspace: &Path) -> PathBuf {
        self.scope_dir(workspace).join(OVERRIDES_DIR)
    }

    pub fn manifest_path(&self, workspace: &Path) -> Option<PathBuf> {
        self.workload
            .as_ref()
            .map(|name| workspace.join(name).join(MANIFEST_FILE))
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.scope(), self.stack_name())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn workload_target_layout() {
        let target = Target::workload("app", "test", "api");
        let workspace = Path::new("/ws");

        assert_eq!(target.scope(), AddonScope::Workload);
        assert_eq!(target.stack_name(), "app-test-api");
        assert_eq!(target.addons_dir(workspace), PathBuf::from("/ws/api/addons"));
        assert_eq!(target.parameter_value("Name"), Some("api"));
        assert_eq!(target.environment_target().stack_name(), "app-test");
    }

    #[test]
    fn environment_target_layout() {
        let target = Target::environment("app", "test");
        let workspace = Path::new("/ws");

        assert_eq!(
            target.overrides_dir(workspace),
            PathBuf::from("/ws/environments/overrides")
        );
        assert_eq!(target.parameter_value("Name"), None);
        assert_eq!(target.manifest_path(workspace), None);
        assert!(!AddonScope::Environment.is_required("Name"));
    }
}
