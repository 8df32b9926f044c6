//! Differential conformance testing for bridged kernels.
//!
//! Every case is generated deterministically, staged through a [`CallBridge`] into the
//! [`HostSimulator`], unstaged, and compared against a host [`oracle`]. A failing case is recorded
//! in the [`ConformanceReport`] and the run continues.
//!
//! ## Environment variables
//!
//! When running via [`run_from_env`], the following environment variables are recognised:
//!
//! - `SVBRIDGE_CONFORMANCE_CASES` (default: `64`): total number of generated cases.
//! - `SVBRIDGE_CONFORMANCE_SEED` (default: `0x5eed_c0de_0123_4567`): RNG seed for deterministic
//!   runs. Decimal or `0x` hex; `_` separators are ignored.
//! - `SVBRIDGE_CONFORMANCE_FILTER` (optional): comma or whitespace separated kernel-name
//!   substrings (case-insensitive).
//! - `SVBRIDGE_CONFORMANCE_REPORT_PATH` (optional): write a JSON report to this path (after each
//!   failure and again at the end of the run).

mod corpus;
pub mod host;
pub mod kernels;
pub mod oracle;
mod report;

use std::path::PathBuf;

use svbridge_core::{CallBridge, SimulatorHandle};
use thiserror::Error;

pub use corpus::{CaseFailure, KernelKind, TestCase, XorShift64};
pub use host::{Cpu, FaultInjector, HostSimulator, KernelFn, KernelImage};
pub use report::{ConformanceReport, CoverageSummary, FailureRecord};

pub const DEFAULT_CASES: usize = 64;
pub const DEFAULT_SEED: u64 = 0x5eed_c0de_0123_4567;

#[derive(Debug, Error)]
pub enum ConformanceError {
    #[error("SVBRIDGE_CONFORMANCE_FILTER={filter:?} matched no kernels (known: {known})")]
    EmptyFilter { filter: String, known: String },

    #[error("failed to write report to {}: {source}", path.display())]
    Report {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConformanceConfig {
    pub cases: usize,
    pub seed: u64,
    pub filter: Option<String>,
    pub report_path: Option<PathBuf>,
}

impl Default for ConformanceConfig {
    fn default() -> Self {
        Self {
            cases: DEFAULT_CASES,
            seed: DEFAULT_SEED,
            filter: None,
            report_path: None,
        }
    }
}

impl ConformanceConfig {
    pub fn from_env() -> Self {
        let cases = std::env::var("SVBRIDGE_CONFORMANCE_CASES")
            .ok()
            .and_then(|v| parse_cases_env(&v))
            .unwrap_or(DEFAULT_CASES);
        let seed = std::env::var("SVBRIDGE_CONFORMANCE_SEED")
            .ok()
            .and_then(|v| parse_seed_env(&v))
            .unwrap_or(DEFAULT_SEED);
        let filter = std::env::var("SVBRIDGE_CONFORMANCE_FILTER")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let report_path =
            std::env::var_os("SVBRIDGE_CONFORMANCE_REPORT_PATH").map(PathBuf::from);
        Self {
            cases,
            seed,
            filter,
            report_path,
        }
    }

    /// Kernels selected by the filter, in corpus order.
    pub fn kernels(&self) -> Result<Vec<KernelKind>, ConformanceError> {
        let Some(filter) = &self.filter else {
            return Ok(KernelKind::ALL.to_vec());
        };
        let terms = parse_filter_terms(filter);
        if terms.is_empty() {
            return Ok(KernelKind::ALL.to_vec());
        }

        let selected: Vec<KernelKind> = KernelKind::ALL
            .into_iter()
            .filter(|kind| {
                let name = kind.name().to_ascii_lowercase();
                terms.iter().any(|term| name.contains(term.as_str()))
            })
            .collect();
        if selected.is_empty() {
            let known = KernelKind::ALL
                .iter()
                .map(|k| k.name())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(ConformanceError::EmptyFilter {
                filter: filter.clone(),
                known,
            });
        }
        Ok(selected)
    }
}

fn parse_cases_env(input: &str) -> Option<usize> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    let cleaned: String = trimmed.chars().filter(|c| *c != '_').collect();
    cleaned.parse::<usize>().ok()
}

fn parse_seed_env(input: &str) -> Option<u64> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    let cleaned: String = trimmed.chars().filter(|c| *c != '_').collect();
    let cleaned = cleaned.as_str();
    let (radix, digits) = match cleaned.strip_prefix("0x").or_else(|| cleaned.strip_prefix("0X")) {
        Some(rest) => (16, rest),
        None => (10, cleaned),
    };
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, radix).ok()
}

fn parse_filter_terms(filter: &str) -> Vec<String> {
    filter
        .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_ascii_lowercase())
        .collect()
}

pub fn run_from_env() -> Result<ConformanceReport, ConformanceError> {
    run(&ConformanceConfig::from_env())
}

/// Runs the corpus against the candidate kernels on a fresh [`HostSimulator`].
pub fn run(config: &ConformanceConfig) -> Result<ConformanceReport, ConformanceError> {
    let handle = SimulatorHandle::new(HostSimulator::with_candidates());
    let report = run_with(&CallBridge::new(handle.clone()), config);
    handle.shutdown();
    report
}

/// Runs the corpus through an existing bridge.
pub fn run_with(
    bridge: &CallBridge,
    config: &ConformanceConfig,
) -> Result<ConformanceReport, ConformanceError> {
    let kinds = config.kernels()?;
    let mut rng = XorShift64::new(config.seed);
    let mut report = ConformanceReport::new(config.cases, config.seed, &kinds);
    let write = |report: &ConformanceReport| match &config.report_path {
        Some(path) => report
            .write_json(path)
            .map_err(|source| ConformanceError::Report {
                path: path.clone(),
                source,
            }),
        None => Ok(()),
    };

    tracing::debug!(
        cases = config.cases,
        seed = config.seed,
        kernels = kinds.len(),
        "starting conformance run"
    );
    for (case_idx, kind) in kinds.iter().copied().cycle().take(config.cases).enumerate() {
        let case = TestCase::generate(case_idx, kind, &mut rng);
        match case.check(bridge) {
            Ok(()) => report.record_pass(kind),
            Err(failure) => {
                tracing::warn!(
                    kernel = kind.name(),
                    case = case_idx,
                    stage = failure.stage.map_or("comparison", |s| s.as_str()),
                    "conformance case failed: {}",
                    failure.message
                );
                report.record_failure(kind, case_idx, failure);
                write(&report)?;
            }
        }
    }

    write(&report)?;
    report.log_summary();
    Ok(report)
}
