//! Check pipeline.
//!
//! - `extract`: Raw content → normalized text
//! - `diff`: Normalized text vs. stored snapshot → change report
//! - `report`: Text and HTML renderings of a change report
//! - `check`: The full single-site check procedure

pub mod check;
pub mod diff;
pub mod extract;
pub mod report;

pub use check::{CheckMode, CheckRun, SiteChecker};
pub use diff::{ChangeReport, DiffOutcome, DiffSubject, Edit, EditKind, diff, diff_lines};
pub use extract::{ContentExtractor, IgnoreSet, normalize_whitespace};
