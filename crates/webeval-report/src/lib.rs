//! webeval-report: report assembly for finished evaluation runs
//!
//! Turns the agent outcome plus the console/network snapshots captured
//! during the run into one plain-text report: errors first, then the step
//! list and conclusion, then the full logs, then a merged chronological
//! timeline. Formatting never fails; malformed agent payloads degrade to
//! a raw excerpt instead of an error.

pub mod error;
pub mod payload;
pub mod report;

pub use error::ParseError;
pub use payload::AgentResultPayload;
pub use report::format_report;
