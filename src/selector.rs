//! Candidate selection: deterministic filtering of changed files followed by
//! a weighted random draw without replacement.

use std::{collections::HashSet, path::Path};

use rand::{distributions::WeightedIndex, prelude::Distribution, Rng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::files::SourceFileDetails;
use crate::reports::{coverage::CoverageSummary, mutation::Mutator, ReportReader};

/// Identity of a challenged code location. Two challenges with the same key
/// are duplicates.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LocationKey {
  Class { package: String, class: String },
  Method { package: String, class: String, method: String },
  Line { package: String, class: String, line: u32 },
  Mutation { package: String, class: String, method: String, line: u32, mutator: Mutator, description: String },
  Build { branch: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SelectionOptions {
  /// Drop files that are gone from the workspace or lack coverage pages.
  pub remove_missing_reports: bool,
  /// Drop files without missed lines.
  pub remove_fully_covered: bool,
  /// Least covered first; otherwise input (VCS recency) order is kept.
  pub sort_by_coverage: bool,
}

impl SelectionOptions {
  pub const STRICT: SelectionOptions =
    SelectionOptions { remove_missing_reports: true, remove_fully_covered: true, sort_by_coverage: true };
  pub const RELAXED: SelectionOptions =
    SelectionOptions { remove_missing_reports: true, remove_fully_covered: false, sort_by_coverage: false };
}

/// Filter the changed files down to challenge candidates. Test sources and
/// classes without executable lines never qualify. Has no side effects, so
/// callers may re-run it with different options.
pub fn filter_candidates(
  files: &[SourceFileDetails],
  summary: &CoverageSummary,
  reader: &ReportReader,
  workspace: &Path,
  opts: SelectionOptions,
) -> Vec<SourceFileDetails> {
  let mut out: Vec<SourceFileDetails> = files
    .iter()
    .filter(|f| !f.is_test_file())
    .filter(|f| {
      let entry = summary.get(&f.package_name, &f.class_name);
      if entry.is_some_and(|c| c.lines == 0) {
        return false;
      }
      if opts.remove_missing_reports
        && (entry.is_none() || !f.exists_in(workspace) || !reader.has_class_reports(workspace, f))
      {
        return false;
      }
      !(opts.remove_fully_covered && entry.is_some_and(|c| c.is_fully_covered()))
    })
    .cloned()
    .collect();

  if opts.sort_by_coverage {
    out.sort_by(|a, b| a.coverage(summary).total_cmp(&b.coverage(summary)));
  }
  debug!(target: "challenge", input = files.len(), kept = out.len(), ?opts, "Filtered candidate files");
  out
}

/// Draw up to `count` distinct items, each with probability proportional to
/// `weight`. Items whose key is in `excluded`, or repeats a key already drawn,
/// are skipped. Gives up after `max_attempts` draws.
pub fn draw_weighted<'a, T, R: Rng + ?Sized>(
  items: &'a [T],
  weight: impl Fn(&T) -> f64,
  key: impl Fn(&T) -> LocationKey,
  excluded: &HashSet<LocationKey>,
  count: usize,
  max_attempts: usize,
  rng: &mut R,
) -> Vec<&'a T> {
  let mut pool: Vec<(&T, f64)> = items
    .iter()
    .map(|i| (i, weight(i)))
    .filter(|(_, w)| w.is_finite() && *w > 0.0)
    .collect();
  let mut seen: HashSet<LocationKey> = HashSet::new();
  let mut picked = Vec::new();
  let mut attempts = 0;

  while picked.len() < count && attempts < max_attempts && !pool.is_empty() {
    attempts += 1;
    let Ok(dist) = WeightedIndex::new(pool.iter().map(|(_, w)| *w)) else {
      break;
    };
    let (item, _) = pool.swap_remove(dist.sample(rng));
    let k = key(item);
    if excluded.contains(&k) || !seen.insert(k) {
      continue;
    }
    picked.push(item);
  }
  picked
}

/// Rank weight: earlier entries are favoured, the last one still has a chance.
pub fn rank_weight(index: usize, len: usize) -> f64 {
  (len.saturating_sub(index)) as f64
}
