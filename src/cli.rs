use crate::sandbox;
use crate::scheduler::{builtin_group, load_group_file, Reducer, ReducerConfig};
use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "cvise", version, about = "Reduce a file while keeping it interesting")]
struct Cli {
    /// Interestingness test: an executable that exits 0 while the file
    /// still exhibits the behavior of interest
    script: Option<PathBuf>,

    /// File to reduce, in place
    file: Option<PathBuf>,

    /// Number of interestingness tests to run in parallel
    #[arg(long = "n", short = 'n')]
    num_workers: Option<usize>,

    /// Timeout for one interestingness test, in seconds
    #[arg(long, default_value_t = 300)]
    timeout: u64,

    /// Built-in pass group to use
    #[arg(long, default_value = "all")]
    pass_group: String,

    /// Load the pass group from a JSON file instead
    #[arg(long, value_name = "PATH")]
    pass_group_file: Option<PathBuf>,

    /// Skip the first-phase passes
    #[arg(long)]
    skip_initial_passes: bool,

    /// Skip the check that the unreduced file is interesting
    #[arg(long)]
    skip_interestingness_test_check: bool,

    /// Accepted for compatibility; interactive key handling is not built in
    #[arg(long, hide = true)]
    skip_key_off: bool,

    /// Remove leftover temporary directories and exit
    #[arg(long)]
    tidy: bool,

    /// Keep sandboxes of interesting trials for debugging
    #[arg(long)]
    save_temps: bool,

    /// Reject commits that remove more than this many bytes at once
    #[arg(long, value_name = "BYTES")]
    max_improvement: Option<u64>,

    /// Verbose logging
    #[arg(long)]
    debug: bool,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();

    if cli.skip_key_off {
        log::debug!("--skip-key-off has no effect; interactive key handling is not built in");
    }

    if cli.tidy {
        let removed = sandbox::tidy(None)?;
        println!("removed {removed} leftover director{}", if removed == 1 { "y" } else { "ies" });
        return Ok(());
    }

    let (Some(script), Some(file)) = (cli.script, cli.file) else {
        bail!("a test script and a file to reduce are required (see --help)");
    };

    let group = match &cli.pass_group_file {
        Some(path) => load_group_file(path)
            .with_context(|| format!("loading pass group {}", path.display()))?,
        None => builtin_group(&cli.pass_group)
            .with_context(|| format!("unknown pass group {:?}", cli.pass_group))?,
    };

    let parallel = cli.num_workers.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    });

    let config = ReducerConfig {
        script,
        file,
        group,
        parallel,
        timeout: Duration::from_secs(cli.timeout),
        save_temps: cli.save_temps,
        skip_initial: cli.skip_initial_passes,
        skip_sanity_check: cli.skip_interestingness_test_check,
        max_improvement: cli.max_improvement,
        tmp_root: None,
    };

    let reducer = Reducer::new(config)?;
    reducer.run()?;
    Ok(())
}
