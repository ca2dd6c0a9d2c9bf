//! `sts mcs`: loads a trace log that reproduces a bug and shrinks it to a
//! minimal causal sequence by re-exec'ing this same binary's hidden
//! `run-trial` subcommand once per candidate subset (`spec.md` §4.G, §5).

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::StsConfig;
use crate::dag::{Atom, EventDag, Peeker, apply_peeker};
use crate::delta_debug::{DeltaDebugger, TrialOutcome, TrialRunner, verify_reproducible};
use crate::error::StsError;
use crate::trace_log::TraceLog;
use crate::trial::{AtomWire, TrialRequest, run_trial_subprocess};

struct SubprocessTrialRunner {
    binary: PathBuf,
    trace_path: PathBuf,
    bug_signature: crate::event::Fingerprint,
    next_id: u64,
}

impl TrialRunner for SubprocessTrialRunner {
    fn run_trial(&mut self, _dag: &EventDag, kept: &[Atom]) -> Result<TrialOutcome, StsError> {
        let request = TrialRequest {
            trace_path: self.trace_path.clone(),
            kept_atoms: kept.iter().map(AtomWire::from).collect(),
            bug_signature: self.bug_signature.clone(),
        };
        let id = self.next_id;
        self.next_id += 1;
        let response = run_trial_subprocess(&self.binary, &request, id)?;
        Ok(TrialOutcome {
            reproduced: response.reproduced,
            timed_out_labels: response.timed_out_labels.into_iter().collect(),
            stats: response.stats,
        })
    }
}

/// Wraps a [`TrialRunner`] to dump a trace snapshot to `dir` every time a
/// reproducing subset strictly smaller than any seen so far is tried, so a
/// long minimization run leaves something inspectable on disk if it is
/// interrupted before finishing (`spec.md` §4.G).
struct IntermediateTraceRunner<'a> {
    inner: &'a mut dyn TrialRunner,
    dir: Option<PathBuf>,
    smallest_reproduced: usize,
    snapshot_id: u64,
}

impl<'a> IntermediateTraceRunner<'a> {
    fn new(inner: &'a mut dyn TrialRunner, dir: Option<PathBuf>) -> Self {
        Self {
            inner,
            dir,
            smallest_reproduced: usize::MAX,
            snapshot_id: 0,
        }
    }
}

impl TrialRunner for IntermediateTraceRunner<'_> {
    fn run_trial(&mut self, dag: &EventDag, kept: &[Atom]) -> Result<TrialOutcome, StsError> {
        let outcome = self.inner.run_trial(dag, kept)?;
        if let (true, Some(dir)) = (outcome.reproduced, self.dir.as_ref()) {
            if kept.len() < self.smallest_reproduced {
                self.smallest_reproduced = kept.len();
                let kept_labels: HashSet<String> =
                    kept.iter().flat_map(|a| a.labels().into_iter().map(str::to_string)).collect();
                let minimized: Vec<_> = dag
                    .live_events()
                    .into_iter()
                    .filter(|e| !e.is_input() || kept_labels.contains(&e.label))
                    .cloned()
                    .collect();
                let snapshot_dir = dir.join(format!("intermcs_{}_{}atoms", self.snapshot_id, kept.len()));
                self.snapshot_id += 1;
                let write = || -> std::io::Result<()> {
                    std::fs::create_dir_all(&snapshot_dir)?;
                    TraceLog::new(minimized).save(&snapshot_dir.join("mcs.trace")).map_err(std::io::Error::other)?;
                    let stats_file = std::fs::File::create(snapshot_dir.join("stats.json"))?;
                    serde_json::to_writer_pretty(stats_file, &outcome.stats).map_err(std::io::Error::other)
                };
                if let Err(e) = write() {
                    warn!(error = %e, path = %snapshot_dir.display(), "failed writing intermediate MCS snapshot");
                }
            }
        }
        Ok(outcome)
    }
}

pub fn run(
    trace_path: &Path,
    out: &Path,
    config_path: Option<&PathBuf>,
    efficient: bool,
    violation_index: usize,
) -> anyhow::Result<()> {
    run_with_peeker(trace_path, out, config_path, efficient, violation_index, None)
}

/// As [`run`], but accepts an optional [`Peeker`] rewrite applied to the
/// loaded DAG before minimization starts. The `sts` binary always calls
/// [`run`] (CLI flags cannot carry a closure); this entry point exists for
/// library callers that have one to supply.
pub fn run_with_peeker(
    trace_path: &Path,
    out: &Path,
    config_path: Option<&PathBuf>,
    efficient: bool,
    violation_index: usize,
    peeker: Option<&Peeker>,
) -> anyhow::Result<()> {
    let config = match config_path {
        Some(path) => StsConfig::load(path)?,
        None => StsConfig::default(),
    };

    let log = TraceLog::load(trace_path)?;
    let total_inputs = log.events.iter().filter(|e| e.is_input()).count() as u64;
    let original_duration_secs = log
        .events
        .first()
        .zip(log.events.last())
        .map(|(first, last)| {
            let secs = (last.time.seconds() - first.time.seconds()) as f64;
            let micros = (last.time.micros() - first.time.micros()) as f64;
            secs + micros / 1_000_000.0
        })
        .unwrap_or(0.0);
    let mut dag = apply_peeker(EventDag::new(log.events), peeker);
    dag.mark_invalid_input_sequences();

    if dag.get_last_invariant_violation().is_none() {
        anyhow::bail!(StsError::BugNotReproducible);
    }
    let bug_signature = dag.bug_signature(violation_index).ok_or(StsError::BugNotReproducible)?;

    let atoms = dag.atomic_input_events();
    let binary = std::env::current_exe()?;
    let mut subprocess_runner = SubprocessTrialRunner {
        binary,
        trace_path: trace_path.to_path_buf(),
        bug_signature,
        next_id: 0,
    };

    if !verify_reproducible(&dag, &atoms, &mut subprocess_runner, config.delta.reproducibility_retries)? {
        anyhow::bail!(StsError::BugNotReproducible);
    }

    let mut runner = IntermediateTraceRunner::new(&mut subprocess_runner, config.delta.intermediate_trace_dir.clone());

    let mut debugger = DeltaDebugger::new(total_inputs, config.delta.max_consecutive_crashes);
    debugger.stats.original_duration_secs = original_duration_secs;
    let prune_start = std::time::Instant::now();
    let result = if efficient || config.delta.efficient {
        debugger.minimize_efficient(&dag, atoms, &mut runner)?
    } else {
        debugger.minimize(&dag, atoms, &mut runner)?
    };
    debugger.stats.prune_wall_clock_secs = prune_start.elapsed().as_secs_f64();

    info!(
        trials = result.trials_run,
        cache_hits = result.cache_hits,
        remaining = result.minimal.len(),
        "minimization complete"
    );

    // A final verifying replay of the minimal set gives the timed-out
    // labels used to produce `mcs.trace.notimeouts` (`spec.md` §6 "MCS
    // output") and folds its counters into the cumulative runtime stats.
    let final_outcome = subprocess_runner.run_trial(&dag, &result.minimal)?;
    debugger.stats.merge_client_dict(&final_outcome.stats, result.trials_run + 1, result.minimal.len());

    let kept_labels: HashSet<String> = result
        .minimal
        .iter()
        .flat_map(|a| a.labels().into_iter().map(str::to_string))
        .collect();
    let minimized: Vec<_> = dag
        .live_events()
        .into_iter()
        .filter(|e| !e.is_input() || kept_labels.contains(&e.label))
        .cloned()
        .collect();

    TraceLog::new(minimized.clone()).save(out)?;
    info!(path = %out.display(), "minimal causal sequence written");

    let notimeouts: Vec<_> = minimized
        .into_iter()
        .filter(|e| !final_outcome.timed_out_labels.contains(&e.label))
        .collect();
    let notimeouts_path = with_suffix(out, ".notimeouts");
    TraceLog::new(notimeouts).save(&notimeouts_path)?;
    info!(path = %notimeouts_path.display(), "minimal causal sequence (no timeouts) written");

    let stats_path = with_suffix(out, ".stats.json");
    let stats_file = std::fs::File::create(&stats_path)?;
    serde_json::to_writer_pretty(stats_file, &debugger.stats).map_err(StsError::Serde)?;
    info!(path = %stats_path.display(), "runtime stats written");

    Ok(())
}

/// Appends `suffix` to `path`'s file name, e.g. `with_suffix("mcs.trace",
/// ".notimeouts")` -> `"mcs.trace.notimeouts"`.
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(suffix);
    PathBuf::from(os)
}
