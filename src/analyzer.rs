//! Commit-level analysis: classify, score and reduce.
//!
//! [`DiffAnalyzer`] runs the language classifier, the complexity analyzer and
//! the structural heuristic over every file of a commit, then folds the
//! per-file results into one [`DiffAnalysisResult`].
//!
//! Per-file work shares no mutable state and runs on the rayon pool; the
//! reduction afterwards is the single synchronization point. The order of
//! `analyzed_files` always mirrors the input order. Async callers go through
//! [`analyze_blocking`], which runs the whole pass on tokio's blocking pool
//! so runtime worker threads stay free for request handling.
//!
//! # Language breakdown
//!
//! `file_count` counts files that still exist after the commit (status is not
//! `removed`). Line and complexity sums include every file of the language,
//! removed ones too. Unclassified files land in an `unknown` bucket unless
//! the analyzer was built with `include_unknown = false`.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use crate::complexity::ComplexityAnalyzer;
use crate::config::AnalysisConfig;
use crate::error::PipelineError;
use crate::language::{FileType, LanguageTable, UNKNOWN};
use crate::models::{Commit, FileChange, FileStatus};
use crate::structural::{StructuralChanges, StructuralHeuristic};

/// Identity of the commit being analyzed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommitMetadata {
    pub repository: String,
    pub commit_sha: String,
    pub author_email: String,
    pub timestamp: Option<DateTime<Utc>>,
}

impl CommitMetadata {
    pub fn from_commit(repository: &str, commit: &Commit) -> Self {
        Self {
            repository: repository.to_string(),
            commit_sha: commit.sha.clone(),
            author_email: commit.author.email.clone(),
            timestamp: commit.timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LanguageStats {
    pub file_count: usize,
    pub lines_added: u64,
    pub lines_deleted: u64,
    pub complexity_delta: f64,
}

/// One file change with its classification and heuristic results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyzedFile {
    pub filename: String,
    pub status: FileStatus,
    pub additions: u32,
    pub deletions: u32,
    pub language: String,
    pub file_type: FileType,
    pub complexity_delta: f64,
    pub complexity_success: bool,
    pub structural_success: bool,
    #[serde(flatten)]
    pub structure: StructuralChanges,
}

impl AnalyzedFile {
    /// False when either heuristic degraded for this file.
    pub fn fully_analyzed(&self) -> bool {
        self.complexity_success && self.structural_success
    }
}

/// Analysis of one commit. Built once by [`DiffAnalyzer::analyze`] and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiffAnalysisResult {
    pub repository: String,
    pub commit_sha: String,
    pub author_email: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub total_files_changed: usize,
    pub total_additions: u64,
    pub total_deletions: u64,
    pub complexity_delta: f64,
    pub language_breakdown: BTreeMap<String, LanguageStats>,
    pub analyzed_files: Vec<AnalyzedFile>,
    pub functions_added: BTreeSet<String>,
    pub functions_modified: BTreeSet<String>,
    pub functions_removed: BTreeSet<String>,
    pub classes_added: BTreeSet<String>,
    pub classes_modified: BTreeSet<String>,
    pub classes_removed: BTreeSet<String>,
    pub imports_added: BTreeSet<String>,
    pub imports_removed: BTreeSet<String>,
    pub analysis_duration_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisSummary {
    pub commit_info: CommitInfo,
    pub change_summary: ChangeSummary,
    pub structural_summary: StructuralSummary,
    pub language_summary: LanguageSummary,
    pub quality_impact: QualityImpact,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommitInfo {
    pub repository: String,
    pub commit_sha: String,
    pub author_email: String,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChangeSummary {
    pub files_changed: usize,
    pub lines_added: u64,
    pub lines_deleted: u64,
    pub net_change: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StructuralSummary {
    pub functions_added: usize,
    pub functions_modified: usize,
    pub functions_removed: usize,
    /// `functions_added + functions_modified`
    pub functions_total_changed: usize,
    pub classes_added: usize,
    pub classes_total_changed: usize,
    pub imports_added: usize,
    pub imports_removed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LanguageSummary {
    pub primary_language: Option<String>,
    pub languages_affected: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualityImpact {
    pub complexity_delta: f64,
    pub degraded_files: usize,
    pub analysis_duration_ms: f64,
}

impl DiffAnalysisResult {
    /// Condensed, display-oriented view of the result.
    pub fn summary(&self) -> AnalysisSummary {
        let functions_total_changed = self.functions_added.len() + self.functions_modified.len();
        let classes_total_changed = self.classes_added.len() + self.classes_modified.len();

        AnalysisSummary {
            commit_info: CommitInfo {
                repository: self.repository.clone(),
                commit_sha: self.commit_sha.clone(),
                author_email: self.author_email.clone(),
                timestamp: self.timestamp,
            },
            change_summary: ChangeSummary {
                files_changed: self.total_files_changed,
                lines_added: self.total_additions,
                lines_deleted: self.total_deletions,
                net_change: self.total_additions as i64 - self.total_deletions as i64,
            },
            structural_summary: StructuralSummary {
                functions_added: self.functions_added.len(),
                functions_modified: self.functions_modified.len(),
                functions_removed: self.functions_removed.len(),
                functions_total_changed,
                classes_added: self.classes_added.len(),
                classes_total_changed,
                imports_added: self.imports_added.len(),
                imports_removed: self.imports_removed.len(),
            },
            language_summary: LanguageSummary {
                primary_language: self.primary_language(),
                languages_affected: self.language_breakdown.keys().cloned().collect(),
            },
            quality_impact: QualityImpact {
                complexity_delta: self.complexity_delta,
                degraded_files: self
                    .analyzed_files
                    .iter()
                    .filter(|f| !f.fully_analyzed())
                    .count(),
                analysis_duration_ms: self.analysis_duration_ms,
            },
        }
    }

    /// Known language with the most surviving files; ties go to the one with
    /// more changed lines, then to the alphabetically first.
    pub fn primary_language(&self) -> Option<String> {
        let mut best: Option<(&String, &LanguageStats)> = None;
        for (language, stats) in &self.language_breakdown {
            if language == UNKNOWN {
                continue;
            }
            let better = match best {
                None => true,
                Some((_, current)) => {
                    let churn = stats.lines_added + stats.lines_deleted;
                    let current_churn = current.lines_added + current.lines_deleted;
                    (stats.file_count, churn) > (current.file_count, current_churn)
                }
            };
            if better {
                best = Some((language, stats));
            }
        }
        best.map(|(language, _)| language.clone())
    }
}

/// Per-commit analyzer. Build once and share; every method takes `&self`.
#[derive(Debug)]
pub struct DiffAnalyzer {
    languages: LanguageTable,
    complexity: ComplexityAnalyzer,
    structural: StructuralHeuristic,
    include_unknown: bool,
}

impl Default for DiffAnalyzer {
    fn default() -> Self {
        Self::new(LanguageTable::default(), true)
    }
}

impl DiffAnalyzer {
    pub fn new(languages: LanguageTable, include_unknown: bool) -> Self {
        Self {
            languages,
            complexity: ComplexityAnalyzer::new(),
            structural: StructuralHeuristic::new(),
            include_unknown,
        }
    }

    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self::new(
            LanguageTable::with_overrides(&config.extensions),
            config.include_unknown_language,
        )
    }

    pub fn languages(&self) -> &LanguageTable {
        &self.languages
    }

    /// Classify and score a single file.
    pub fn analyze_file(&self, change: &FileChange) -> AnalyzedFile {
        let classification = self.languages.classify(&change.filename);
        let complexity = self.complexity.analyze(change, &classification.language);
        let structural = self.structural.analyze(change, &classification.language);

        AnalyzedFile {
            filename: change.filename.clone(),
            status: change.status,
            additions: change.additions,
            deletions: change.deletions,
            language: classification.language,
            file_type: classification.file_type,
            complexity_delta: complexity.complexity_delta,
            complexity_success: complexity.analysis_success,
            structural_success: structural.analysis_success,
            structure: structural.changes,
        }
    }

    /// Analyze every change of one commit.
    ///
    /// Fails with [`PipelineError::NoChanges`] on an empty change list and
    /// with [`PipelineError::MissingCommitIdentity`] on an empty sha.
    pub fn analyze(
        &self,
        commit: &CommitMetadata,
        changes: &[FileChange],
    ) -> Result<DiffAnalysisResult, PipelineError> {
        if changes.is_empty() {
            return Err(PipelineError::NoChanges);
        }
        if commit.commit_sha.trim().is_empty() {
            return Err(PipelineError::MissingCommitIdentity);
        }

        let started = Instant::now();

        let analyzed_files: Vec<AnalyzedFile> = changes
            .par_iter()
            .map(|change| self.analyze_file(change))
            .collect();

        let mut result = DiffAnalysisResult {
            repository: commit.repository.clone(),
            commit_sha: commit.commit_sha.clone(),
            author_email: commit.author_email.clone(),
            timestamp: commit.timestamp,
            total_files_changed: analyzed_files.len(),
            total_additions: 0,
            total_deletions: 0,
            complexity_delta: 0.0,
            language_breakdown: BTreeMap::new(),
            analyzed_files: Vec::new(),
            functions_added: BTreeSet::new(),
            functions_modified: BTreeSet::new(),
            functions_removed: BTreeSet::new(),
            classes_added: BTreeSet::new(),
            classes_modified: BTreeSet::new(),
            classes_removed: BTreeSet::new(),
            imports_added: BTreeSet::new(),
            imports_removed: BTreeSet::new(),
            analysis_duration_ms: 0.0,
        };

        for file in &analyzed_files {
            result.total_additions += u64::from(file.additions);
            result.total_deletions += u64::from(file.deletions);
            result.complexity_delta += file.complexity_delta;

            if self.include_unknown || file.language != UNKNOWN {
                let stats = result
                    .language_breakdown
                    .entry(file.language.clone())
                    .or_default();
                if file.status != FileStatus::Removed {
                    stats.file_count += 1;
                }
                stats.lines_added += u64::from(file.additions);
                stats.lines_deleted += u64::from(file.deletions);
                stats.complexity_delta += file.complexity_delta;
            }

            let s = &file.structure;
            result.functions_added.extend(s.functions_added.iter().cloned());
            result.functions_modified.extend(s.functions_modified.iter().cloned());
            result.functions_removed.extend(s.functions_removed.iter().cloned());
            result.classes_added.extend(s.classes_added.iter().cloned());
            result.classes_modified.extend(s.classes_modified.iter().cloned());
            result.classes_removed.extend(s.classes_removed.iter().cloned());
            result.imports_added.extend(s.imports_added.iter().cloned());
            result.imports_removed.extend(s.imports_removed.iter().cloned());
        }

        result.analyzed_files = analyzed_files;
        result.analysis_duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        tracing::debug!(
            repository = %result.repository,
            commit_sha = %result.commit_sha,
            files = result.total_files_changed,
            elapsed_ms = result.analysis_duration_ms,
            "commit analyzed"
        );

        Ok(result)
    }
}

/// Run [`DiffAnalyzer::analyze`] on the blocking pool.
///
/// A panic inside the analysis surfaces as [`PipelineError::AnalysisAborted`].
pub async fn analyze_blocking(
    analyzer: Arc<DiffAnalyzer>,
    commit: CommitMetadata,
    changes: Vec<FileChange>,
) -> Result<DiffAnalysisResult, PipelineError> {
    tokio::task::spawn_blocking(move || analyzer.analyze(&commit, &changes))
        .await
        .map_err(|e| PipelineError::AnalysisAborted(e.to_string()))?
}
