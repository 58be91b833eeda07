//! Backend/linker configuration (spec.md §6)
//!
//! `BackendConfig` is the compile-time knob set that the CLI front end
//! builds from its flags and hands to `backend::link`. Kept as a plain
//! builder-style struct passed by immutable reference, the same shape the
//! teacher uses for `CompilerConfig` — no process-wide mutable singleton
//! (spec.md §9 "Global compile options").

use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitStage {
    /// Run the full pipeline through linking.
    Executable,
    /// Stop after the external backend emits assembly; don't invoke the
    /// linker (`-c`).
    Assembly,
    /// Stop after this compiler emits IR text; don't invoke the backend
    /// (`--emit-ir`).
    Ir,
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// `--target=<triple>`; `None` lets the backend pick its host default.
    pub target: Option<String>,
    /// `--enable-madd-fusion` / `--disable-madd-fusion` (default: enabled).
    /// The only optimization this compiler delegates to the backend
    /// (spec.md §1 Non-goals).
    pub madd_fusion: bool,
    /// `--keep-temps`: don't delete `<base>.ir` / `<base>.s` after linking.
    pub keep_temps: bool,
    /// `-v` / `--verbose`: echo backend/linker subprocess invocations.
    pub verbose: bool,
    /// `--profile`: pass a profiling flag through to the backend.
    pub profile: bool,
    /// Which stage to stop at (`-c`, `--emit-ir`, or all the way through).
    pub emit_stage: EmitStage,
    /// Path to the backend executable, overridable for testing.
    pub backend_path: PathBuf,
    /// Path to the runtime library archive (preferred) or source directory
    /// (fallback), see spec.md §6 "runtime library archive (preferred) or
    /// the individual runtime source files (fallback)".
    pub runtime_lib: Option<PathBuf>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            target: None,
            madd_fusion: true,
            keep_temps: false,
            verbose: false,
            profile: false,
            emit_stage: EmitStage::Executable,
            backend_path: PathBuf::from("backend"),
            runtime_lib: None,
        }
    }
}

impl BackendConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_emit_stage(mut self, stage: EmitStage) -> Self {
        self.emit_stage = stage;
        self
    }

    pub fn with_keep_temps(mut self, keep: bool) -> Self {
        self.keep_temps = keep;
        self
    }

    pub fn with_madd_fusion(mut self, enabled: bool) -> Self {
        self.madd_fusion = enabled;
        self
    }

    /// Apply project-level defaults from a parsed `basicc.toml`, letting
    /// any flag the CLI already set win (CLI flags are applied after this
    /// in `main.rs`, so this just fills in what flags left at their
    /// `Default` value).
    pub fn merge_project_defaults(mut self, project: &ProjectConfig) -> Self {
        if let Some(target) = &project.target {
            self.target = Some(target.clone());
        }
        if let Some(path) = &project.runtime_lib {
            self.runtime_lib = Some(PathBuf::from(path));
        }
        if let Some(madd) = project.madd_fusion {
            self.madd_fusion = madd;
        }
        self
    }
}

/// Project-level defaults loaded from an optional `basicc.toml`, the same
/// `serde`-over-`toml` round trip the teacher uses for `LintConfig`. Every
/// field is optional so an absent or partial file just falls back to
/// `BackendConfig::default()`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectConfig {
    pub target: Option<String>,
    pub runtime_lib: Option<String>,
    pub madd_fusion: Option<bool>,
}

impl ProjectConfig {
    pub fn from_toml(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|e| format!("failed to parse basicc.toml: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_runs_through_executable() {
        let cfg = BackendConfig::default();
        assert_eq!(cfg.emit_stage, EmitStage::Executable);
        assert!(cfg.madd_fusion);
        assert!(!cfg.keep_temps);
    }

    #[test]
    fn builder_overrides_apply() {
        let cfg = BackendConfig::new()
            .with_target("x86_64-unknown-linux-gnu")
            .with_emit_stage(EmitStage::Ir)
            .with_keep_temps(true)
            .with_madd_fusion(false);
        assert_eq!(cfg.target.as_deref(), Some("x86_64-unknown-linux-gnu"));
        assert_eq!(cfg.emit_stage, EmitStage::Ir);
        assert!(cfg.keep_temps);
        assert!(!cfg.madd_fusion);
    }

    #[test]
    fn project_config_parses_partial_toml() {
        let project = ProjectConfig::from_toml("target = \"aarch64-apple-darwin\"\n").unwrap();
        assert_eq!(project.target.as_deref(), Some("aarch64-apple-darwin"));
        assert!(project.runtime_lib.is_none());
        assert!(project.madd_fusion.is_none());
    }

    #[test]
    fn merge_project_defaults_fills_in_target() {
        let project = ProjectConfig {
            target: Some("x86_64-pc-windows-msvc".to_string()),
            runtime_lib: None,
            madd_fusion: Some(false),
        };
        let cfg = BackendConfig::default().merge_project_defaults(&project);
        assert_eq!(cfg.target.as_deref(), Some("x86_64-pc-windows-msvc"));
        assert!(!cfg.madd_fusion);
    }
}
