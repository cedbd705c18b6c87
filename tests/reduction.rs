//! End-to-end reductions driven through real interestingness scripts.
use cvise::hints::{Hint, HintBundle, SearchState};
use cvise::manager::TestManager;
use cvise::passes::hint_based::{HintBasedPass, HintSource};
use cvise::passes::registry::PassEntry;
use cvise::passes::Pass;
use cvise::runner::TestRunner;
use cvise::sandbox::SandboxFactory;
use cvise::scheduler::{PassGroupSpec, Reducer, ReducerConfig};
use cvise::stats::Statistics;
use cvise::types::{Fur, PassResult};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

fn write_script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("interesting.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn run_reduction(
    contents: &[u8],
    file_name: &str,
    script_body: &str,
    group: PassGroupSpec,
    parallel: usize,
) -> Vec<u8> {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join(file_name);
    std::fs::write(&file, contents).unwrap();
    let script = write_script(dir.path(), script_body);

    let reducer = Reducer::new(ReducerConfig {
        script,
        file: file.clone(),
        group,
        parallel,
        timeout: Duration::from_secs(60),
        save_temps: false,
        skip_initial: false,
        skip_sanity_check: false,
        max_improvement: None,
        tmp_root: None,
    })
    .unwrap();
    reducer.run().unwrap();
    std::fs::read(&file).unwrap()
}

fn lines_group() -> PassGroupSpec {
    PassGroupSpec {
        first: vec![],
        main: vec![PassEntry::new("lines", Some("None"))],
        last: vec![],
    }
}

/// A manager wired to a throwaway script and temp root, for driving a
/// single pass directly.
fn manager_for(dir: &Path, script_body: &str, parallel: usize, timeout: Duration) -> TestManager {
    let script = write_script(dir, script_body);
    let runner = TestRunner::new(&script, timeout).unwrap();
    let sandboxes = SandboxFactory::new(None, std::ffi::OsString::from("case.txt")).unwrap();
    TestManager::new(runner, sandboxes, parallel, false, None)
}

#[test]
fn s1_trivial_line_removal() {
    let out = run_reduction(
        b"int x;\nint y;\n",
        "case.c",
        "grep -q 'int y' case.c",
        lines_group(),
        2,
    );
    assert_eq!(out, b"int y;\n");
}

#[test]
fn s1_result_preserves_interestingness_and_monotonicity() {
    let input: &[u8] = b"int x;\nint y;\n";
    let out = run_reduction(input, "case.c", "grep -q 'int y' case.c", lines_group(), 2);
    assert!(out.len() <= input.len());
    assert!(out.windows(5).any(|w| w == b"int y"));
}

#[test]
fn s2_comments_are_stripped() {
    let group = PassGroupSpec {
        first: vec![PassEntry::new("comments", None)],
        main: vec![],
        last: vec![],
    };
    let out = run_reduction(
        b"/* keep */ int x; // drop\n",
        "case.c",
        "grep -q 'int x' case.c",
        group,
        2,
    );
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("int x;"));
    assert!(!text.contains("/*"));
    assert!(!text.contains("//"));
}

#[test]
fn s3_binary_search_commits_once_at_full_chunk() {
    /// Four non-overlapping pair deletions over whatever is left.
    struct PairSource;
    impl HintSource for PairSource {
        fn generate(&self, fur: &Fur) -> PassResult<HintBundle> {
            let n = fur.data().len() / 2;
            let hints = (0..n).map(|i| Hint::delete(2 * i, 2 * i + 2)).collect();
            Ok(HintBundle::new(vec![], hints))
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("case.txt");
    std::fs::write(&file, b"AABBCCDD").unwrap();
    let mut fur = Fur::load(&file).unwrap();

    let manager = manager_for(dir.path(), "test ! -s case.txt", 2, Duration::from_secs(30));
    let pass: Arc<dyn Pass> = Arc::new(HintBasedPass::new("pairs", Box::new(PairSource)));
    let mut stats = Statistics::new(fur.size());

    let outcome = manager.run_pass(&pass, &mut fur, &mut stats).unwrap();
    assert_eq!(outcome.commits, 1);
    assert!(outcome.aborted.is_none());
    assert_eq!(fur.data(), b"");
}

#[test]
fn s5_earliest_interesting_state_wins() {
    /// One singleton delete hint per byte, enumerated strictly in order.
    struct ByteSource;
    impl HintSource for ByteSource {
        fn generate(&self, fur: &Fur) -> PassResult<HintBundle> {
            let hints = (0..fur.data().len())
                .map(|i| Hint::delete(i, i + 1))
                .collect();
            Ok(HintBundle::new(vec![], hints))
        }
        fn elementary_state(&self, hint_count: usize) -> Option<SearchState> {
            SearchState::subsegment(hint_count, 1)
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("case.txt");
    std::fs::write(&file, b"ABCDEFGHIJ").unwrap();
    let mut fur = Fur::load(&file).unwrap();

    // States 2, 5 and 7 (removing C, F, or H) are interesting; the earliest
    // in state order must win regardless of completion order.
    let script = r#"c=$(cat case.txt)
[ "$c" = "ABDEFGHIJ" ] || [ "$c" = "ABCDEGHIJ" ] || [ "$c" = "ABCDEFGIJ" ]"#;
    let manager = manager_for(dir.path(), script, 4, Duration::from_secs(30));
    let pass: Arc<dyn Pass> = Arc::new(HintBasedPass::new("bytes", Box::new(ByteSource)));
    let mut stats = Statistics::new(fur.size());

    let outcome = manager.run_pass(&pass, &mut fur, &mut stats).unwrap();
    assert_eq!(outcome.commits, 1);
    assert_eq!(fur.data(), b"ABDEFGHIJ");
}

#[test]
fn s6_timeouts_produce_no_commit() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("case.txt");
    std::fs::write(&file, b"a\nb\n").unwrap();
    let mut fur = Fur::load(&file).unwrap();

    let manager = manager_for(dir.path(), "sleep 10", 3, Duration::from_secs(1));
    let entry = PassEntry::new("lines", Some("None"));
    let pass = cvise::passes::registry::create_pass(
        &entry,
        &cvise::passes::registry::ExternalPrograms::resolve(),
    )
    .unwrap();
    let mut stats = Statistics::new(fur.size());

    let outcome = manager.run_pass(&pass, &mut fur, &mut stats).unwrap();
    assert_eq!(outcome.commits, 0);
    assert_eq!(fur.data(), b"a\nb\n");
    assert_eq!(std::fs::read(&file).unwrap(), b"a\nb\n");
}

#[test]
fn deterministic_across_runs_and_worker_counts() {
    let input: &[u8] = b"alpha\none\ntwo\nthree\nomega\nfour\nfive\nsix\n";
    let script = "grep -q alpha case.c && grep -q omega case.c";

    let serial_a = run_reduction(input, "case.c", script, lines_group(), 1);
    let serial_b = run_reduction(input, "case.c", script, lines_group(), 1);
    let parallel = run_reduction(input, "case.c", script, lines_group(), 4);

    assert_eq!(serial_a, serial_b);
    assert_eq!(serial_a, parallel);
    assert!(serial_a.windows(5).any(|w| w == b"alpha"));
    assert!(serial_a.windows(5).any(|w| w == b"omega"));
}

#[test]
fn original_file_is_backed_up() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("case.c");
    std::fs::write(&file, b"int x;\nint y;\n").unwrap();
    let script = write_script(dir.path(), "grep -q 'int y' case.c");

    let reducer = Reducer::new(ReducerConfig {
        script,
        file: file.clone(),
        group: lines_group(),
        parallel: 1,
        timeout: Duration::from_secs(60),
        save_temps: false,
        skip_initial: false,
        skip_sanity_check: false,
        max_improvement: None,
        tmp_root: None,
    })
    .unwrap();
    reducer.run().unwrap();

    assert_eq!(
        std::fs::read(dir.path().join("case.c.orig")).unwrap(),
        b"int x;\nint y;\n"
    );
}

#[test]
fn failing_sanity_check_is_fatal_and_leaves_file_alone() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("case.c");
    std::fs::write(&file, b"int x;\n").unwrap();
    let script = write_script(dir.path(), "exit 1");

    let reducer = Reducer::new(ReducerConfig {
        script,
        file: file.clone(),
        group: lines_group(),
        parallel: 1,
        timeout: Duration::from_secs(60),
        save_temps: false,
        skip_initial: false,
        skip_sanity_check: false,
        max_improvement: None,
        tmp_root: None,
    })
    .unwrap();
    assert!(reducer.run().is_err());
    assert_eq!(std::fs::read(&file).unwrap(), b"int x;\n");
}

#[test]
fn uninteresting_everywhere_reduces_nothing() {
    let input: &[u8] = b"a\nb\nc\n";
    // Requires every line to survive.
    let script = "grep -q a case.c && grep -q b case.c && grep -q c case.c";
    let out = run_reduction(input, "case.c", script, lines_group(), 2);
    assert_eq!(out, input);
}
