//! Report readers. Every read goes through `ReportReader`, which bounds the
//! filesystem wait and turns absent or malformed reports into `ReportError`
//! values that callers downgrade to "stays open" or "zero candidates".

use std::{
  future::Future,
  path::{Path, PathBuf},
  time::Duration,
};

use tracing::{debug, instrument, warn};

use crate::config::ReportPaths;
use crate::error::ReportError;
use crate::files::SourceFileDetails;

pub mod coverage;
pub mod junit;
pub mod mutation;

use coverage::{CoverageLine, CoverageSummary, MethodInfo};
use junit::TestCounts;
use mutation::MutationRecord;

#[derive(Clone, Debug)]
pub struct ReportReader {
  pub paths: ReportPaths,
  timeout: Duration,
}

impl ReportReader {
  pub fn new(paths: ReportPaths) -> Self {
    let timeout = Duration::from_millis(paths.timeout_ms.max(1));
    Self { paths, timeout }
  }

  async fn read_text(&self, path: &Path) -> Result<String, ReportError> {
    self.bounded(path, tokio::fs::read_to_string(path)).await
  }

  /// Run one filesystem read for `path` under the configured timeout.
  async fn bounded<T>(
    &self,
    path: &Path,
    read: impl Future<Output = std::io::Result<T>>,
  ) -> Result<T, ReportError> {
    match tokio::time::timeout(self.timeout, read).await {
      Err(_) => Err(ReportError::Timeout(path.to_path_buf())),
      Ok(Ok(value)) => Ok(value),
      Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
        Err(ReportError::Missing(path.to_path_buf()))
      }
      Ok(Err(e)) => Err(ReportError::Io { path: path.to_path_buf(), source: e }),
    }
  }

  pub fn coverage_csv_path(&self, workspace: &Path) -> PathBuf {
    workspace.join(&self.paths.coverage_csv)
  }

  pub fn mutation_xml_path(&self, workspace: &Path) -> PathBuf {
    workspace.join(&self.paths.mutation_xml)
  }

  /// Whether both JaCoCo pages a coverage challenge needs exist for `file`.
  pub fn has_class_reports(&self, workspace: &Path, file: &SourceFileDetails) -> bool {
    file.method_report_path(workspace, &self.paths).is_file()
      && file.source_report_path(workspace, &self.paths).is_file()
  }

  #[instrument(level = "debug", skip(self), fields(workspace = %workspace.display()))]
  pub async fn coverage_summary(&self, workspace: &Path) -> Result<CoverageSummary, ReportError> {
    let path = self.coverage_csv_path(workspace);
    let text = self.read_text(&path).await?;
    let summary = coverage::parse_csv(&text, &path)?;
    debug!(target: "reports", path = %path.display(), classes = summary.len(), "Coverage summary parsed");
    Ok(summary)
  }

  #[instrument(level = "debug", skip(self, file), fields(class = %file.class_name))]
  pub async fn methods(
    &self,
    workspace: &Path,
    file: &SourceFileDetails,
  ) -> Result<Vec<MethodInfo>, ReportError> {
    let path = file.method_report_path(workspace, &self.paths);
    let html = self.read_text(&path).await?;
    Ok(coverage::parse_method_table(&html))
  }

  #[instrument(level = "debug", skip(self, file), fields(class = %file.class_name))]
  pub async fn lines(
    &self,
    workspace: &Path,
    file: &SourceFileDetails,
  ) -> Result<Vec<CoverageLine>, ReportError> {
    let path = file.source_report_path(workspace, &self.paths);
    let html = self.read_text(&path).await?;
    Ok(coverage::parse_source_lines(&html))
  }

  #[instrument(level = "debug", skip(self), fields(workspace = %workspace.display()))]
  pub async fn mutations(&self, workspace: &Path) -> Result<Vec<MutationRecord>, ReportError> {
    let path = self.mutation_xml_path(workspace);
    let xml = self.read_text(&path).await?;
    let records = mutation::parse_mutations(&xml);
    if records.is_empty() && xml.contains("<mutation ") {
      return Err(ReportError::Parse { path, message: "no readable <mutation> elements".into() });
    }
    debug!(target: "reports", path = %path.display(), records = records.len(), "Mutation report parsed");
    Ok(records)
  }

  /// Sum of all `TEST-*.xml` files in the surefire directory.
  #[instrument(level = "debug", skip(self), fields(workspace = %workspace.display()))]
  pub async fn test_counts(&self, workspace: &Path) -> Result<TestCounts, ReportError> {
    let dir = workspace.join(&self.paths.junit_dir);
    let mut entries = tokio::fs::read_dir(&dir).await.map_err(|e| match e.kind() {
      std::io::ErrorKind::NotFound => ReportError::Missing(dir.clone()),
      _ => ReportError::Io { path: dir.clone(), source: e },
    })?;
    let mut total = TestCounts::default();
    loop {
      let entry = match entries.next_entry().await {
        Ok(Some(entry)) => entry,
        Ok(None) => break,
        Err(e) => return Err(ReportError::Io { path: dir.clone(), source: e }),
      };
      let name = entry.file_name();
      let name = name.to_string_lossy();
      if !(name.starts_with("TEST-") && name.ends_with(".xml")) {
        continue;
      }
      match self.read_text(&entry.path()).await {
        Ok(xml) => total.add(junit::parse_test_counts(&xml)),
        Err(e) => warn!(target: "reports", error = %e, "Skipping unreadable test report"),
      }
    }
    Ok(total)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[tokio::test]
  async fn missing_reports_are_reported_not_fatal() {
    let dir = TempDir::new().unwrap();
    let reader = ReportReader::new(ReportPaths::default());
    let err = reader.coverage_summary(dir.path()).await.unwrap_err();
    assert!(matches!(err, ReportError::Missing(_)));
    assert!(matches!(reader.mutations(dir.path()).await, Err(ReportError::Missing(_))));
    assert!(matches!(reader.test_counts(dir.path()).await, Err(ReportError::Missing(_))));
  }

  #[tokio::test]
  async fn slow_reads_time_out() {
    let paths = ReportPaths { timeout_ms: 1, ..ReportPaths::default() };
    let reader = ReportReader::new(paths);
    let path = Path::new("target/site/jacoco/jacoco.csv");
    let slow = async {
      tokio::time::sleep(Duration::from_millis(200)).await;
      Ok::<_, std::io::Error>(String::new())
    };
    match reader.bounded(path, slow).await {
      Err(ReportError::Timeout(p)) => assert_eq!(p, path),
      other => panic!("expected a timeout, got {other:?}"),
    }
    let fast = async { Ok::<_, std::io::Error>(7u32) };
    assert_eq!(reader.bounded(path, fast).await.unwrap(), 7);
  }

  #[tokio::test]
  async fn reads_test_reports_in_directory() {
    let dir = TempDir::new().unwrap();
    let junit = dir.path().join("target/surefire-reports");
    std::fs::create_dir_all(&junit).unwrap();
    std::fs::write(junit.join("TEST-a.xml"), r#"<testsuite tests="3" failures="1">"#).unwrap();
    std::fs::write(junit.join("TEST-b.xml"), r#"<testsuite tests="4" failures="0">"#).unwrap();
    std::fs::write(junit.join("other.txt"), r#"<testsuite tests="100">"#).unwrap();
    let reader = ReportReader::new(ReportPaths::default());
    let counts = reader.test_counts(dir.path()).await.unwrap();
    assert_eq!(counts.tests, 7);
    assert_eq!(counts.failures, 1);
  }
}
