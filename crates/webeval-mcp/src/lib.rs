//! webeval-mcp: the MCP tool surface
//!
//! Serves two tools to MCP clients: `web_eval_agent` drives a real browser
//! through a UX evaluation task and returns the formatted report plus step
//! screenshots, and `setup_browser_state` opens a headed browser so a human
//! can sign in and persists the resulting cookies and storage.

pub mod service;

pub use service::{EvalService, EvaluateArgs, SetupStateArgs};
