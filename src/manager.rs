/// The parallel test manager: speculative trials, ordered commits
///
/// For one (pass, file) pair the manager fans out up to `parallel` trials,
/// each against its own sandbox copy of the current file. Results are
/// handled strictly in state order, never completion order: the earliest
/// interesting state wins, everything else in flight is cancelled, and the
/// pass resumes against the committed file. With one worker the behavior is
/// bit-identical to a serial run; more workers only change wall-clock time.
use crate::passes::{Pass, PassState, TransformResult};
use crate::runner::TestRunner;
use crate::sandbox::{Sandbox, SandboxFactory};
use crate::stats::Statistics;
use crate::types::{Fur, ReduceError, Result, Verdict};
use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// A pass emitting this many consecutive no-effect states is stuck.
const MAX_CONSECUTIVE_INVALID: u64 = 50_000;

/// A pass invocation whose trials keep timing out is aborted.
const MAX_TIMEOUTS: u64 = 20;

/// Outcome of one pass invocation.
#[derive(Debug)]
pub struct PassRunOutcome {
    pub commits: u64,
    /// Why the invocation was cut short, if it was.
    pub aborted: Option<String>,
}

struct Task {
    epoch: u64,
    order: u64,
    state: PassState,
    snapshot: Arc<Vec<u8>>,
}

struct TrialMsg {
    epoch: u64,
    order: u64,
    state: PassState,
    outcome: TrialOutcome,
}

enum TrialOutcome {
    Tested {
        verdict: Verdict,
        variant: Vec<u8>,
        sandbox: Option<Sandbox>,
    },
    Invalid,
    Stop,
    PassBug(String),
    Fatal(String),
    /// The task belonged to an epoch that ended before the worker started.
    Stale,
}

/// How one epoch of the coordinator loop ended.
enum EpochEnd {
    Committed { state: PassState, variant: Vec<u8> },
    Exhausted,
    Aborted(String),
    Fatal(ReduceError),
}

/// Counters threaded through one pass invocation.
#[derive(Default)]
struct InvocationCounters {
    trials: u64,
    timeouts: u64,
}

pub struct TestManager {
    runner: TestRunner,
    sandboxes: SandboxFactory,
    parallel: usize,
    save_temps: bool,
    max_improvement: Option<u64>,
    epoch: Arc<AtomicU64>,
}

impl TestManager {
    pub fn new(
        runner: TestRunner,
        sandboxes: SandboxFactory,
        parallel: usize,
        save_temps: bool,
        max_improvement: Option<u64>,
    ) -> Self {
        Self {
            runner,
            sandboxes,
            parallel: parallel.max(1),
            save_temps,
            max_improvement,
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn parallel(&self) -> usize {
        self.parallel
    }

    /// Run the interestingness script once against the current file, with
    /// no transformation. Used for the startup sanity check and for
    /// check-sanity passes; never commits.
    pub fn check_current(&self, fur: &Fur) -> Result<Verdict> {
        let sandbox = self.sandboxes.acquire(fur.data())?;
        let run = self.runner.run(sandbox.dir(), || false);
        if run.verdict != Verdict::Interesting {
            debug!("sanity stdout:\n{}", run.stdout);
            debug!("sanity stderr:\n{}", run.stderr);
        }
        sandbox.release();
        Ok(run.verdict)
    }

    /// Run one pass to completion against the file under reduction,
    /// committing every accepted variant along the way.
    pub fn run_pass(
        &self,
        pass: &Arc<dyn Pass>,
        fur: &mut Fur,
        stats: &mut Statistics,
    ) -> Result<PassRunOutcome> {
        let pass_name = pass.name();
        let started = Instant::now();
        info!("===< {pass_name} >===");

        let mut state = match pass.new_state(fur) {
            Ok(Some(state)) => state,
            Ok(None) => {
                debug!("{pass_name}: nothing to do");
                return Ok(PassRunOutcome {
                    commits: 0,
                    aborted: None,
                });
            }
            Err(e) => {
                warn!("{pass_name}: {e}");
                stats.pass_mut(&pass_name).skipped = Some(e.to_string());
                return Ok(PassRunOutcome {
                    commits: 0,
                    aborted: Some(e.to_string()),
                });
            }
        };

        let mut commits: u64 = 0;
        let mut counters = InvocationCounters::default();
        let outcome = std::thread::scope(|scope| -> Result<PassRunOutcome> {
            let (task_tx, task_rx) = bounded::<Task>(self.parallel);
            let (result_tx, result_rx) = bounded::<TrialMsg>(self.parallel);

            for _ in 0..self.parallel {
                let task_rx: Receiver<Task> = task_rx.clone();
                let result_tx: Sender<TrialMsg> = result_tx.clone();
                let pass = Arc::clone(pass);
                let epoch = Arc::clone(&self.epoch);
                let runner = &self.runner;
                let sandboxes = &self.sandboxes;
                scope.spawn(move || {
                    while let Ok(task) = task_rx.recv() {
                        let msg = run_trial(&*pass, runner, sandboxes, &epoch, task);
                        if result_tx.send(msg).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(task_rx);
            drop(result_tx);

            loop {
                let end =
                    self.run_epoch(pass, &task_tx, &result_rx, &state, fur, &mut counters);
                match end {
                    EpochEnd::Committed {
                        state: winning_state,
                        variant,
                    } => {
                        let removed = fur.size() - variant.len() as u64;
                        fur.commit(variant)?;
                        commits += 1;
                        let pass_stats = stats.pass_mut(&pass_name);
                        pass_stats.commits += 1;
                        pass_stats.bytes_removed += removed;
                        info!("{}", stats.commit_note(fur.size(), fur.line_count()));

                        if pass
                            .max_transforms()
                            .is_some_and(|max| commits >= max as u64)
                        {
                            info!("{pass_name}: stopping after {commits} transforms");
                            break Ok(PassRunOutcome {
                                commits,
                                aborted: None,
                            });
                        }

                        match pass.advance_on_success(fur, &winning_state) {
                            Ok(Some(next)) => state = next,
                            Ok(None) => {
                                break Ok(PassRunOutcome {
                                    commits,
                                    aborted: None,
                                })
                            }
                            Err(e) => {
                                warn!("{pass_name}: {e}");
                                stats.pass_mut(&pass_name).skipped = Some(e.to_string());
                                break Ok(PassRunOutcome {
                                    commits,
                                    aborted: Some(e.to_string()),
                                });
                            }
                        }
                    }
                    EpochEnd::Exhausted => {
                        break Ok(PassRunOutcome {
                            commits,
                            aborted: None,
                        })
                    }
                    EpochEnd::Aborted(reason) => {
                        warn!("{pass_name}: {reason}");
                        stats.pass_mut(&pass_name).skipped = Some(reason.clone());
                        break Ok(PassRunOutcome {
                            commits,
                            aborted: Some(reason),
                        });
                    }
                    EpochEnd::Fatal(e) => break Err(e),
                }
            }
        });

        let pass_stats = stats.pass_mut(&pass_name);
        pass_stats.wall_time += started.elapsed();
        pass_stats.trials += counters.trials;
        pass_stats.timeouts += counters.timeouts;
        outcome
    }

    /// Drive one epoch: dispatch states in order, demux results in order,
    /// and stop at the first interesting state (or exhaustion). In-flight
    /// trials are always drained before returning, so sandboxes never
    /// outlive this frame.
    fn run_epoch(
        &self,
        pass: &Arc<dyn Pass>,
        task_tx: &Sender<Task>,
        result_rx: &Receiver<TrialMsg>,
        initial: &PassState,
        fur: &Fur,
        counters: &mut InvocationCounters,
    ) -> EpochEnd {
        let epoch_id = self.epoch.load(Ordering::SeqCst);
        let snapshot = fur.snapshot();
        let current_size = fur.size();

        let mut cursor = Some(initial.clone());
        let mut next_order: u64 = 0;
        let mut expect: u64 = 0;
        let mut pending: BTreeMap<u64, TrialMsg> = BTreeMap::new();
        let mut in_flight: usize = 0;
        let mut invalid_streak: u64 = 0;
        let mut modify_bug_reported = false;

        let end = 'epoch: loop {
            // Keep the pool full as long as states remain.
            while in_flight < self.parallel {
                let Some(state) = cursor.take() else { break };
                cursor = pass.advance(&state);
                let task = Task {
                    epoch: epoch_id,
                    order: next_order,
                    state,
                    snapshot: Arc::clone(&snapshot),
                };
                next_order += 1;
                if task_tx.send(task).is_err() {
                    break 'epoch EpochEnd::Fatal(ReduceError::Process(
                        "worker pool disappeared".to_string(),
                    ));
                }
                in_flight += 1;
            }

            if in_flight == 0 {
                break EpochEnd::Exhausted;
            }

            let msg = match result_rx.recv() {
                Ok(msg) => msg,
                Err(_) => {
                    break EpochEnd::Fatal(ReduceError::Process(
                        "worker pool disappeared".to_string(),
                    ))
                }
            };
            in_flight -= 1;
            if msg.epoch != epoch_id {
                // Left over from a previous epoch; its sandbox drops here.
                continue;
            }
            pending.insert(msg.order, msg);

            // Handle results strictly in state order; buffer the rest.
            while let Some(msg) = pending.remove(&expect) {
                expect += 1;
                match msg.outcome {
                    TrialOutcome::Invalid => {
                        counters.trials += 1;
                        invalid_streak += 1;
                        if invalid_streak >= MAX_CONSECUTIVE_INVALID {
                            break 'epoch EpochEnd::Aborted(format!(
                                "gave up after {invalid_streak} consecutive no-effect states"
                            ));
                        }
                    }
                    TrialOutcome::Stop => {
                        cursor = None;
                    }
                    TrialOutcome::PassBug(e) => {
                        break 'epoch EpochEnd::Aborted(e);
                    }
                    TrialOutcome::Fatal(e) => {
                        break 'epoch EpochEnd::Fatal(ReduceError::Process(e));
                    }
                    TrialOutcome::Stale => {}
                    TrialOutcome::Tested {
                        verdict,
                        variant,
                        sandbox,
                    } => {
                        counters.trials += 1;
                        invalid_streak = 0;
                        if let Some(sandbox) = sandbox {
                            if self.save_temps {
                                let kept = sandbox.keep();
                                info!("keeping interesting trial in {}", kept.display());
                            } else {
                                sandbox.release();
                            }
                        }
                        match verdict {
                            Verdict::Interesting => {
                                if variant.as_slice() == fur.data() {
                                    if !modify_bug_reported {
                                        warn!("pass failed to modify the variant");
                                        modify_bug_reported = true;
                                    }
                                } else if variant.len() as u64 >= current_size {
                                    debug!(
                                        "ignoring non-shrinking variant ({} bytes)",
                                        variant.len()
                                    );
                                } else if self
                                    .max_improvement
                                    .is_some_and(|max| current_size - variant.len() as u64 > max)
                                {
                                    debug!(
                                        "ignoring too-large improvement ({} bytes)",
                                        current_size - variant.len() as u64
                                    );
                                } else {
                                    break 'epoch EpochEnd::Committed {
                                        state: msg.state,
                                        variant,
                                    };
                                }
                            }
                            Verdict::Uninteresting { .. } | Verdict::Cancelled => {}
                            Verdict::Timeout => {
                                counters.timeouts += 1;
                                if counters.timeouts >= MAX_TIMEOUTS {
                                    break 'epoch EpochEnd::Aborted(format!(
                                        "too many timeouts ({})",
                                        counters.timeouts
                                    ));
                                }
                            }
                            Verdict::SpawnError { message } => {
                                break 'epoch EpochEnd::Aborted(format!(
                                    "could not spawn interestingness test: {message}"
                                ));
                            }
                        }
                    }
                }
            }
        };

        // End the epoch for everyone: running scripts notice the bumped
        // counter and abort; unstarted tasks short-circuit. Buffered and
        // still-in-flight results drop their sandboxes here.
        self.epoch.fetch_add(1, Ordering::SeqCst);
        drop(pending);
        while in_flight > 0 {
            if result_rx.recv().is_err() {
                break;
            }
            in_flight -= 1;
        }
        end
    }
}

fn run_trial(
    pass: &dyn Pass,
    runner: &TestRunner,
    sandboxes: &SandboxFactory,
    epoch: &AtomicU64,
    task: Task,
) -> TrialMsg {
    let stale = epoch.load(Ordering::SeqCst) != task.epoch;
    let outcome = if stale {
        TrialOutcome::Stale
    } else {
        trial_outcome(pass, runner, sandboxes, epoch, &task)
    };
    TrialMsg {
        epoch: task.epoch,
        order: task.order,
        state: task.state,
        outcome,
    }
}

fn trial_outcome(
    pass: &dyn Pass,
    runner: &TestRunner,
    sandboxes: &SandboxFactory,
    epoch: &AtomicU64,
    task: &Task,
) -> TrialOutcome {
    let sandbox = match sandboxes.acquire(&task.snapshot) {
        Ok(sandbox) => sandbox,
        Err(e) => return TrialOutcome::Fatal(e.to_string()),
    };

    let variant = match pass.transform(&task.snapshot, sandbox.file_path(), &task.state) {
        Ok(TransformResult::Ok(variant)) => variant,
        Ok(TransformResult::Invalid) => {
            sandbox.release();
            return TrialOutcome::Invalid;
        }
        Ok(TransformResult::Stop) => {
            sandbox.release();
            return TrialOutcome::Stop;
        }
        Err(e) => {
            sandbox.release();
            return TrialOutcome::PassBug(e.to_string());
        }
    };

    if let Err(e) = std::fs::write(sandbox.file_path(), &variant) {
        sandbox.release();
        return TrialOutcome::Fatal(format!("failed to write variant: {e}"));
    }

    let task_epoch = task.epoch;
    let run = runner.run(sandbox.dir(), || {
        epoch.load(Ordering::SeqCst) != task_epoch
    });

    let sandbox = if run.verdict == Verdict::Interesting {
        Some(sandbox)
    } else {
        sandbox.release();
        None
    };
    TrialOutcome::Tested {
        verdict: run.verdict,
        variant,
        sandbox,
    }
}
