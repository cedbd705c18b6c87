/// Explicit pass registry: maps pass-group entries to concrete passes
use crate::passes::blank::BlankSource;
use crate::passes::comments::CommentsSource;
use crate::passes::external::{ExternalHintSource, ExternalTransformPass};
use crate::passes::hint_based::HintBasedPass;
use crate::passes::lines::{LinesSource, TopformflatSource};
use crate::passes::special::SpecialPass;
use crate::passes::Pass;
use crate::types::{ReduceError, Result};
use log::debug;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Helper executables the external passes shell out to. Resolved once at
/// startup: a `CVISE_<NAME>` environment override wins, otherwise `PATH` is
/// searched. Built explicitly and injected, never consulted as a global.
pub struct ExternalPrograms {
    resolved: HashMap<String, Option<PathBuf>>,
}

/// Tools the built-in pass set knows about.
const KNOWN_PROGRAMS: &[&str] = &["topformflat_hints", "clex", "clang_delta"];

impl ExternalPrograms {
    pub fn resolve() -> Self {
        let mut resolved = HashMap::new();
        for name in KNOWN_PROGRAMS {
            let path = Self::lookup(name);
            match &path {
                Some(p) => debug!("found {name} at {}", p.display()),
                None => debug!("{name} not found"),
            }
            resolved.insert((*name).to_string(), path);
        }
        Self { resolved }
    }

    fn lookup(name: &str) -> Option<PathBuf> {
        let env_key = format!("CVISE_{}", name.to_uppercase().replace('-', "_"));
        if let Ok(value) = std::env::var(&env_key) {
            let path = PathBuf::from(value);
            if path.is_file() {
                return Some(path);
            }
        }
        let paths = std::env::var_os("PATH")?;
        std::env::split_paths(&paths)
            .map(|dir| dir.join(name))
            .find(|candidate| candidate.is_file())
    }

    /// Resolved location of `name`, if the tool was found.
    pub fn get(&self, name: &str) -> Option<&PathBuf> {
        self.resolved.get(name).and_then(Option::as_ref)
    }

    /// Location to hand a pass constructor: falls back to the bare name so
    /// the pass exists but fails its prerequisite check with a clear
    /// message.
    fn get_or_placeholder(&self, name: &str) -> PathBuf {
        self.get(name)
            .cloned()
            .unwrap_or_else(|| PathBuf::from(name))
    }
}

/// One entry of a pass-group phase, as configured.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct PassEntry {
    pub pass: String,
    #[serde(default)]
    pub arg: Option<String>,
    #[serde(rename = "max-transforms", default)]
    pub max_transforms: Option<usize>,
}

impl PassEntry {
    pub fn new(pass: &str, arg: Option<&str>) -> Self {
        Self {
            pass: pass.to_string(),
            arg: arg.map(str::to_string),
            max_transforms: None,
        }
    }
}

/// Instantiate the pass a group entry names. Unknown names and bad
/// arguments are configuration errors: the group is rejected up front
/// rather than mid-run.
pub fn create_pass(entry: &PassEntry, programs: &ExternalPrograms) -> Result<Arc<dyn Pass>> {
    let arg = entry.arg.as_deref();
    let pass: Arc<dyn Pass> = match entry.pass.as_str() {
        "lines" => match arg {
            None | Some("None") => Arc::new(
                HintBasedPass::new("lines", Box::new(LinesSource))
                    .with_max_transforms(entry.max_transforms),
            ),
            Some(level) => {
                if level.parse::<u32>().is_err() {
                    return Err(ReduceError::Config(format!(
                        "lines: argument must be None or a nesting level, got {level:?}"
                    )));
                }
                let program = programs.get_or_placeholder("topformflat_hints");
                Arc::new(
                    HintBasedPass::new(
                        format!("lines::{level}"),
                        Box::new(TopformflatSource::new(program, level)),
                    )
                    .with_max_transforms(entry.max_transforms),
                )
            }
        },
        "comments" => Arc::new(
            HintBasedPass::new("comments", Box::new(CommentsSource::new()))
                .with_max_transforms(entry.max_transforms),
        ),
        "blank" => Arc::new(
            HintBasedPass::new("blank", Box::new(BlankSource))
                .with_max_transforms(entry.max_transforms),
        ),
        "special" => {
            let arg = arg.ok_or_else(|| {
                ReduceError::Config("special: an argument (a, b, or c) is required".into())
            })?;
            Arc::new(
                SpecialPass::new(arg, entry.max_transforms)
                    .map_err(|e| ReduceError::Config(e.to_string()))?,
            )
        }
        "clexhints" => {
            let arg = arg.ok_or_else(|| {
                ReduceError::Config("clexhints: an argument like rm-toks-16 is required".into())
            })?;
            let window = arg
                .strip_prefix("rm-toks-")
                .and_then(|n| n.parse::<usize>().ok())
                .ok_or_else(|| {
                    ReduceError::Config(format!("clexhints: unexpected argument {arg:?}"))
                })?;
            let program = programs.get_or_placeholder("clex");
            Arc::new(
                HintBasedPass::new(
                    format!("clexhints::{arg}"),
                    Box::new(ExternalHintSource::new(
                        program,
                        "hints-rm-toks",
                        Some(window),
                    )),
                )
                .with_max_transforms(entry.max_transforms),
            )
        }
        "clang" => {
            let arg = arg.ok_or_else(|| {
                ReduceError::Config("clang: a transformation name is required".into())
            })?;
            let program = programs.get_or_placeholder("clang_delta");
            Arc::new(ExternalTransformPass::new(
                "clang",
                program,
                arg,
                entry.max_transforms,
            ))
        }
        other => {
            return Err(ReduceError::Config(format!("unknown pass {other:?}")));
        }
    };
    Ok(pass)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn programs() -> ExternalPrograms {
        ExternalPrograms {
            resolved: HashMap::new(),
        }
    }

    #[test]
    fn internal_passes_resolve() {
        for (name, arg) in [
            ("lines", None),
            ("lines", Some("None")),
            ("comments", None),
            ("blank", None),
            ("special", Some("a")),
        ] {
            let entry = PassEntry::new(name, arg);
            assert!(create_pass(&entry, &programs()).is_ok(), "{name}");
        }
    }

    #[test]
    fn unknown_pass_is_a_config_error() {
        let entry = PassEntry::new("nonesuch", None);
        assert!(matches!(
            create_pass(&entry, &programs()),
            Err(ReduceError::Config(_))
        ));
    }

    #[test]
    fn clexhints_requires_window_argument() {
        let entry = PassEntry::new("clexhints", Some("rm-toks-zap"));
        assert!(create_pass(&entry, &programs()).is_err());
        let entry = PassEntry::new("clexhints", Some("rm-toks-16"));
        assert!(create_pass(&entry, &programs()).is_ok());
    }

    #[test]
    fn external_pass_without_tool_fails_prereqs_not_creation() {
        let entry = PassEntry::new("clang", Some("remove-unused-function"));
        let pass = create_pass(&entry, &programs()).unwrap();
        assert!(pass.check_prerequisites().is_err());
    }

    #[test]
    fn pass_entry_deserializes_from_group_json() {
        let entry: PassEntry =
            serde_json::from_str(r#"{"pass": "lines", "arg": "2", "max-transforms": 10}"#).unwrap();
        assert_eq!(entry.pass, "lines");
        assert_eq!(entry.arg.as_deref(), Some("2"));
        assert_eq!(entry.max_transforms, Some(10));
    }
}
