//! Git conflict detection from command output.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictType {
    /// `git stash` refused to run because the index has unmerged paths.
    UnmergedIndex,
    /// `git stash pop` hit a conflict and kept the stash entry.
    StashConflict,
    /// A merge (usually from `git pull`) stopped on conflicting content.
    MergeConflict,
    /// A command refused to run because the index file is unmerged.
    UnmergedFile,
}

impl ConflictType {
    /// Detection order. When output matches several signatures the first one wins.
    pub const PRIORITY: [ConflictType; 4] = [
        ConflictType::UnmergedIndex,
        ConflictType::StashConflict,
        ConflictType::MergeConflict,
        ConflictType::UnmergedFile,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictType::UnmergedIndex => "UNMERGED_INDEX",
            ConflictType::StashConflict => "STASH_CONFLICT",
            ConflictType::MergeConflict => "MERGE_CONFLICT",
            ConflictType::UnmergedFile => "UNMERGED_FILE",
        }
    }

    fn pattern(&self) -> &'static Regex {
        let patterns = conflict_patterns();
        match self {
            ConflictType::UnmergedIndex => &patterns[0],
            ConflictType::StashConflict => &patterns[1],
            ConflictType::MergeConflict => &patterns[2],
            ConflictType::UnmergedFile => &patterns[3],
        }
    }
}

impl std::fmt::Display for ConflictType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictDetection {
    pub has_conflict: bool,
    pub conflict_type: Option<ConflictType>,
}

impl ConflictDetection {
    fn none() -> Self {
        Self {
            has_conflict: false,
            conflict_type: None,
        }
    }

    fn found(conflict_type: ConflictType) -> Self {
        Self {
            has_conflict: true,
            conflict_type: Some(conflict_type),
        }
    }
}

fn conflict_patterns() -> &'static [Regex; 4] {
    static PATTERNS: OnceLock<[Regex; 4]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            compile(r"(?i)cannot stash.*unmerged paths"),
            compile(r"(?i)stash entry is kept"),
            compile(r"(?i)CONFLICT \(content\)|Automatic merge failed"),
            compile(r"(?i)Your index file is unmerged"),
        ]
    })
}

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("conflict pattern must compile")
}

/// Classify combined command output against the known git conflict signatures.
///
/// stdout and stderr are joined (stdout first) with a newline before matching.
pub fn detect_conflict(stdout: &str, stderr: &str) -> ConflictDetection {
    let combined = format!("{}\n{}", stdout, stderr);

    ConflictType::PRIORITY
        .iter()
        .find(|conflict| conflict.pattern().is_match(&combined))
        .map(|conflict| ConflictDetection::found(*conflict))
        .unwrap_or_else(ConflictDetection::none)
}
