//! Line-level diff between snapshots.
//!
//! Hash equality is the fast path and the authority: when the hashes match
//! no line diff is computed. Otherwise a longest-common-subsequence
//! alignment over lines yields the minimal set of edit spans.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Snapshot;
use crate::utils::content_hash;

/// Above this many DP cells the differing region is reported as one span.
const MAX_LCS_CELLS: usize = 4_000_000;

/// Kind of an edit span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditKind {
    Insert,
    Delete,
    Replace,
}

/// A contiguous run of changed lines.
///
/// `old_start` / `new_start` are 0-based line indexes into the previous and
/// current text; an insert has no old lines, a delete no new lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edit {
    pub kind: EditKind,
    pub old_start: usize,
    pub old_lines: Vec<String>,
    pub new_start: usize,
    pub new_lines: Vec<String>,
}

/// Structured description of a detected change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeReport {
    pub site_name: String,
    pub url: String,
    pub previous_hash: String,
    pub current_hash: String,
    pub previous_sequence: u64,
    pub detected_at: DateTime<Utc>,
    pub edits: Vec<Edit>,
}

impl ChangeReport {
    pub fn added_lines(&self) -> usize {
        self.edits.iter().map(|e| e.new_lines.len()).sum()
    }

    pub fn removed_lines(&self) -> usize {
        self.edits.iter().map(|e| e.old_lines.len()).sum()
    }

    /// Count of spans of the given kind.
    pub fn count(&self, kind: EditKind) -> usize {
        self.edits.iter().filter(|e| e.kind == kind).count()
    }

    /// One-line description, e.g. `1 replaced, 0 inserted, 2 deleted span(s)`.
    pub fn summary(&self) -> String {
        format!(
            "{} replaced, {} inserted, {} deleted span(s) (+{} / -{} lines)",
            self.count(EditKind::Replace),
            self.count(EditKind::Insert),
            self.count(EditKind::Delete),
            self.added_lines(),
            self.removed_lines()
        )
    }
}

/// Verdict of comparing new content against the previous snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffOutcome {
    pub changed: bool,
    pub report: Option<ChangeReport>,
}

impl DiffOutcome {
    fn unchanged() -> Self {
        Self {
            changed: false,
            report: None,
        }
    }
}

/// Labels attached to reports produced by [`diff`].
#[derive(Debug, Clone, Copy)]
pub struct DiffSubject<'a> {
    pub site_name: &'a str,
    pub url: &'a str,
}

/// Compare `current` normalized text against the previous snapshot.
///
/// No previous snapshot means this is the baseline: never a change.
pub fn diff(previous: Option<&Snapshot>, current: &str, subject: DiffSubject<'_>) -> DiffOutcome {
    let Some(previous) = previous else {
        return DiffOutcome::unchanged();
    };

    let current_hash = content_hash(current);
    if previous.same_content(&current_hash) {
        return DiffOutcome::unchanged();
    }

    let old: Vec<&str> = previous.lines().collect();
    let new: Vec<&str> = current.lines().collect();
    let edits = diff_lines(&old, &new);

    if edits.is_empty() {
        // Hashes differ but the lines align completely: a hash collision.
        log::warn!(
            "Hash mismatch without line changes for {}; treating as unchanged",
            subject.url
        );
        return DiffOutcome::unchanged();
    }

    DiffOutcome {
        changed: true,
        report: Some(ChangeReport {
            site_name: subject.site_name.to_string(),
            url: subject.url.to_string(),
            previous_hash: previous.hash.clone(),
            current_hash,
            previous_sequence: previous.sequence,
            detected_at: Utc::now(),
            edits,
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Equal,
    Delete,
    Insert,
}

/// Minimal edit spans turning `old` into `new`.
pub fn diff_lines(old: &[&str], new: &[&str]) -> Vec<Edit> {
    let prefix = old.iter().zip(new).take_while(|(a, b)| a == b).count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    let a = &old[prefix..old.len() - suffix];
    let b = &new[prefix..new.len() - suffix];

    let ops = if a.len().saturating_mul(b.len()) > MAX_LCS_CELLS {
        let mut ops = vec![Op::Delete; a.len()];
        ops.extend(std::iter::repeat_n(Op::Insert, b.len()));
        ops
    } else {
        lcs_ops(a, b)
    };

    group_edits(&ops, a, b, prefix)
}

/// Alignment score of a suffix pair: common lines in the high half, spans
/// saved in the low half, so a larger value is always the better alignment.
///
/// With at most `MAX_LCS_CELLS` cells neither count can exceed 2001, so both
/// fit in 16 bits.
const SPAN_BITS: u32 = 16;
const NO_SPANS: u32 = (1 << SPAN_BITS) - 1;
const MATCH: u32 = 1 << SPAN_BITS;

/// Longest common subsequence alignment with the fewest edit spans.
///
/// `open[i][j]` scores `a[i..]` against `b[j..]` right after a matched line,
/// where a delete or insert starts a new span. `gap[i][j]` scores the same
/// suffixes while already inside a span, where extending it is free. Among
/// equally good moves the walk prefers match, then delete, then insert, so a
/// gap lists its deletes before its inserts.
fn lcs_ops(a: &[&str], b: &[&str]) -> Vec<Op> {
    let (n, m) = (a.len(), b.len());
    let width = m + 1;
    let at = |i: usize, j: usize| i * width + j;

    let mut open = vec![NO_SPANS; (n + 1) * width];
    let mut gap = vec![NO_SPANS; (n + 1) * width];

    for i in (0..=n).rev() {
        for j in (0..=m).rev() {
            if i == n && j == m {
                continue;
            }
            // Best continuation through a delete or insert, before paying
            // for a new span.
            let mut skip = 0;
            if i < n {
                skip = skip.max(gap[at(i + 1, j)]);
            }
            if j < m {
                skip = skip.max(gap[at(i, j + 1)]);
            }
            let mut matched = 0;
            if i < n && j < m && a[i] == b[j] {
                matched = open[at(i + 1, j + 1)] + MATCH;
            }

            gap[at(i, j)] = matched.max(skip);
            open[at(i, j)] = matched.max(skip.saturating_sub(1));
        }
    }

    let mut ops = Vec::with_capacity(n + m);
    let (mut i, mut j) = (0, 0);
    let mut in_gap = false;
    while i < n || j < m {
        let here = if in_gap { gap[at(i, j)] } else { open[at(i, j)] };
        let cost = if in_gap { 0 } else { 1 };

        if i < n && j < m && a[i] == b[j] && open[at(i + 1, j + 1)] + MATCH == here {
            ops.push(Op::Equal);
            i += 1;
            j += 1;
            in_gap = false;
        } else if i < n && gap[at(i + 1, j)].saturating_sub(cost) == here {
            ops.push(Op::Delete);
            i += 1;
            in_gap = true;
        } else {
            ops.push(Op::Insert);
            j += 1;
            in_gap = true;
        }
    }
    ops
}

fn group_edits(ops: &[Op], a: &[&str], b: &[&str], offset: usize) -> Vec<Edit> {
    let mut edits = Vec::new();
    let (mut i, mut j) = (0, 0);
    let mut k = 0;

    while k < ops.len() {
        if ops[k] == Op::Equal {
            i += 1;
            j += 1;
            k += 1;
            continue;
        }

        let (old_start, new_start) = (i, j);
        while k < ops.len() && ops[k] != Op::Equal {
            match ops[k] {
                Op::Delete => i += 1,
                Op::Insert => j += 1,
                Op::Equal => unreachable!(),
            }
            k += 1;
        }

        let old_lines: Vec<String> = a[old_start..i].iter().map(|s| s.to_string()).collect();
        let new_lines: Vec<String> = b[new_start..j].iter().map(|s| s.to_string()).collect();
        let kind = match (old_lines.is_empty(), new_lines.is_empty()) {
            (true, _) => EditKind::Insert,
            (_, true) => EditKind::Delete,
            _ => EditKind::Replace,
        };

        edits.push(Edit {
            kind,
            old_start: offset + old_start,
            old_lines,
            new_start: offset + new_start,
            new_lines,
        });
    }

    edits
}
