/// The pass-group driver: phases, fixpoint iteration, and run lifecycle
use crate::manager::TestManager;
use crate::passes::registry::{create_pass, ExternalPrograms, PassEntry};
use crate::passes::{Pass, PassKind};
use crate::runner::TestRunner;
use crate::sandbox::SandboxFactory;
use crate::stats::Statistics;
use crate::types::{Fur, ReduceError, Result, Verdict};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// A pass group as configured: three ordered phases. `first` passes run
/// once up front, `main` passes iterate to a fixpoint, `last` passes polish
/// once at the end.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PassGroupSpec {
    #[serde(default)]
    pub first: Vec<PassEntry>,
    #[serde(default)]
    pub main: Vec<PassEntry>,
    #[serde(default)]
    pub last: Vec<PassEntry>,
}

impl PassGroupSpec {
    pub fn is_empty(&self) -> bool {
        self.first.is_empty() && self.main.is_empty() && self.last.is_empty()
    }
}

/// Load a pass group from a JSON file.
pub fn load_group_file(path: &Path) -> Result<PassGroupSpec> {
    let contents = std::fs::read_to_string(path)?;
    let spec: PassGroupSpec = serde_json::from_str(&contents)
        .map_err(|e| ReduceError::Config(format!("{}: {e}", path.display())))?;
    if spec.is_empty() {
        return Err(ReduceError::Config(format!(
            "{}: at least one of first/main/last must be configured",
            path.display()
        )));
    }
    Ok(spec)
}

/// The named built-in groups. `all` leans on every available tool; `delta`
/// is line-granularity only; `binary` is the token/helper searches;
/// `opencl-120` avoids the C-specific special cases; `no-interleaving`
/// matches `all` with single-commit ordering (the engine never interleaves,
/// so it only differs in composition).
pub fn builtin_group(name: &str) -> Option<PassGroupSpec> {
    let lines_sweep = || {
        vec![
            PassEntry::new("lines", None),
            PassEntry::new("lines", Some("0")),
            PassEntry::new("lines", Some("1")),
            PassEntry::new("lines", Some("2")),
            PassEntry::new("lines", Some("10")),
        ]
    };
    match name {
        "all" | "no-interleaving" => Some(PassGroupSpec {
            first: vec![
                PassEntry::new("comments", None),
                PassEntry::new("blank", None),
            ],
            main: {
                let mut main = lines_sweep();
                main.push(PassEntry::new("clexhints", Some("rm-toks-16")));
                main.push(PassEntry::new("clang", Some("remove-unused-function")));
                main.push(PassEntry::new("clang", Some("remove-unused-var")));
                main
            },
            last: vec![
                PassEntry::new("special", Some("b")),
                PassEntry::new("special", Some("c")),
            ],
        }),
        "opencl-120" => Some(PassGroupSpec {
            first: vec![
                PassEntry::new("comments", None),
                PassEntry::new("blank", None),
            ],
            main: lines_sweep(),
            last: vec![],
        }),
        "delta" => Some(PassGroupSpec {
            first: vec![],
            main: lines_sweep(),
            last: vec![],
        }),
        "binary" => Some(PassGroupSpec {
            first: vec![],
            main: vec![
                PassEntry::new("clexhints", Some("rm-toks-16")),
                PassEntry::new("clang", Some("remove-unused-function")),
            ],
            last: vec![],
        }),
        _ => None,
    }
}

/// Everything a reduction run needs, resolved up front.
pub struct ReducerConfig {
    pub script: PathBuf,
    pub file: PathBuf,
    pub group: PassGroupSpec,
    pub parallel: usize,
    pub timeout: Duration,
    pub save_temps: bool,
    pub skip_initial: bool,
    pub skip_sanity_check: bool,
    pub max_improvement: Option<u64>,
    /// Sandbox root; defaults to the system temp directory.
    pub tmp_root: Option<PathBuf>,
}

struct Phase {
    title: &'static str,
    passes: Vec<Arc<dyn Pass>>,
    /// Looped phases iterate to a fixpoint; others run once.
    looped: bool,
    /// Initial phases are bypassed by `--skip-initial-passes`.
    initial: bool,
}

/// Orchestrates one reduction run end to end.
pub struct Reducer {
    manager: TestManager,
    fur: Fur,
    phases: Vec<Phase>,
    stats: Statistics,
    skip_initial: bool,
    skip_sanity_check: bool,
}

impl Reducer {
    pub fn new(config: ReducerConfig) -> Result<Self> {
        let fur = Fur::load(&config.file)?;
        if fur.size() == 0 {
            return Err(ReduceError::Config(format!(
                "{} is empty - nothing to reduce",
                config.file.display()
            )));
        }

        let programs = ExternalPrograms::resolve();
        let mut stats = Statistics::new(fur.size());
        let phases = vec![
            Phase {
                title: "INITIAL PASSES",
                passes: build_phase(&config.group.first, &programs, &mut stats)?,
                looped: false,
                initial: true,
            },
            Phase {
                title: "MAIN PASSES",
                passes: build_phase(&config.group.main, &programs, &mut stats)?,
                looped: true,
                initial: false,
            },
            Phase {
                title: "CLEANUP PASSES",
                passes: build_phase(&config.group.last, &programs, &mut stats)?,
                looped: false,
                initial: false,
            },
        ];

        let runner = TestRunner::new(&config.script, config.timeout)?;
        let sandboxes = SandboxFactory::new(config.tmp_root, fur.file_name().clone())?;
        let manager = TestManager::new(
            runner,
            sandboxes,
            config.parallel,
            config.save_temps,
            config.max_improvement,
        );

        Ok(Self {
            manager,
            fur,
            phases,
            stats,
            skip_initial: config.skip_initial,
            skip_sanity_check: config.skip_sanity_check,
        })
    }

    /// Run the whole group to completion and return the final size.
    pub fn run(mut self) -> Result<u64> {
        if !self.skip_sanity_check {
            self.check_sanity()?;
        }
        self.fur.backup()?;
        info!(
            "running {} interestingness test{} in parallel",
            self.manager.parallel(),
            if self.manager.parallel() == 1 { "" } else { "s" }
        );

        for i in 0..self.phases.len() {
            if self.phases[i].passes.is_empty() {
                continue;
            }
            if self.skip_initial && self.phases[i].initial {
                info!("skipping initial passes");
                continue;
            }
            info!("{}", self.phases[i].title);
            if self.phases[i].looped {
                loop {
                    let size_before = self.fur.size();
                    self.run_phase_once(i)?;
                    info!(
                        "termination check: size was {}; now {}",
                        size_before,
                        self.fur.size()
                    );
                    if self.fur.size() >= size_before {
                        break;
                    }
                }
            } else {
                self.run_phase_once(i)?;
            }
        }

        self.stats.log_summary(self.fur.size());
        Ok(self.fur.size())
    }

    fn run_phase_once(&mut self, phase_idx: usize) -> Result<()> {
        let passes: Vec<Arc<dyn Pass>> = self.phases[phase_idx].passes.clone();
        for pass in passes {
            if pass.kind() == PassKind::CheckSanity {
                let verdict = self.manager.check_current(&self.fur)?;
                info!("{}: current file is {:?}", pass.name(), verdict);
                continue;
            }
            self.manager
                .run_pass(&pass, &mut self.fur, &mut self.stats)?;
        }
        Ok(())
    }

    /// Verify the unmodified input is interesting before touching anything.
    fn check_sanity(&mut self) -> Result<()> {
        info!("performing sanity check");
        match self.manager.check_current(&self.fur)? {
            Verdict::Interesting => Ok(()),
            verdict => Err(ReduceError::Config(format!(
                "the interestingness test does not pass on the original file ({verdict:?})"
            ))),
        }
    }
}

/// Instantiate a phase, dropping passes whose tools are missing. A missing
/// tool is an error log and a skip, never a fatal error.
fn build_phase(
    entries: &[PassEntry],
    programs: &ExternalPrograms,
    stats: &mut Statistics,
) -> Result<Vec<Arc<dyn Pass>>> {
    let mut passes = Vec::new();
    for entry in entries {
        let pass = create_pass(entry, programs)?;
        if let Err(missing) = pass.check_prerequisites() {
            error!("skipping pass {}: cannot find {missing}", pass.name());
            stats.pass_mut(&pass.name()).skipped = Some(format!("missing {missing}"));
            continue;
        }
        passes.push(pass);
    }
    Ok(passes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_groups_exist() {
        for name in ["all", "delta", "binary", "opencl-120", "no-interleaving"] {
            assert!(builtin_group(name).is_some(), "{name}");
        }
        assert!(builtin_group("nonesuch").is_none());
    }

    #[test]
    fn group_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("group.json");
        std::fs::write(
            &path,
            r#"{"main": [{"pass": "lines", "arg": "None"}, {"pass": "comments"}]}"#,
        )
        .unwrap();
        let spec = load_group_file(&path).unwrap();
        assert_eq!(spec.main.len(), 2);
        assert!(spec.first.is_empty());
    }

    #[test]
    fn empty_group_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("group.json");
        std::fs::write(&path, "{}").unwrap();
        assert!(load_group_file(&path).is_err());
    }

    #[test]
    fn invalid_json_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("group.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            load_group_file(&path),
            Err(ReduceError::Config(_))
        ));
    }
}
