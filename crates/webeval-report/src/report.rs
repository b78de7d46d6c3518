//! Report rendering.
//!
//! `format_report` is a pure function over the agent payload and the
//! telemetry snapshots; it owns the section order, the per-section
//! character budgets and the degraded paths for errored or unparseable
//! payloads.

use chrono::{DateTime, Utc};
use tracing::debug;

use webeval_core::{ConsoleKind, ConsoleLogEntry, NetworkEvent};

use crate::error::ParseError;
use crate::payload::{parse_all_results, AgentResultPayload};

const STEPS_BUDGET: usize = 6_000;
const CONCLUSION_BUDGET: usize = 2_000;
const CONSOLE_ERRORS_BUDGET: usize = 4_000;
const FAILED_REQUESTS_BUDGET: usize = 4_000;
const CONSOLE_BUDGET: usize = 6_000;
const NETWORK_BUDGET: usize = 6_000;
const TIMELINE_BUDGET: usize = 8_000;
const RAW_EXCERPT_BUDGET: usize = 2_000;

/// Step data in the shape the renderer needs, whichever payload form it
/// came from. Raw payloads carry no URLs or timestamps.
struct ReportStep {
    index: usize,
    text: String,
    url: Option<String>,
    error: Option<String>,
    timestamp: Option<DateTime<Utc>>,
}

struct ReportBody {
    steps: Vec<ReportStep>,
    conclusion: Option<String>,
    outcome: Option<bool>,
    stopped: bool,
}

/// Render the full evaluation report.
///
/// Never fails: an errored run produces an error-only report, and a raw
/// payload that cannot be parsed produces the header plus a capped raw
/// excerpt and the parse error text.
pub fn format_report(
    payload: &AgentResultPayload,
    url: &str,
    task: &str,
    console: &[ConsoleLogEntry],
    network: &[NetworkEvent],
) -> String {
    let mut report = String::new();
    report.push_str(&format!("Web Evaluation Report for {url}\n"));
    report.push_str(&format!("Task: {task}\n"));

    if let Some(error) = execution_error(payload) {
        report.push_str(&format!("\nError during task execution: {error}\n"));
        return report;
    }

    let body = match normalize(payload) {
        Ok(body) => body,
        Err(e) => {
            debug!("Agent payload parse failed: {}", e);
            let raw = match payload {
                AgentResultPayload::Raw(s) => s.as_str(),
                AgentResultPayload::Structured(_) => "",
            };
            report.push_str(&format!("\nCould not parse agent result: {e}\n"));
            report.push_str("\nRaw agent output (excerpt):\n");
            report.push_str(&cap_section(raw.trim(), RAW_EXCERPT_BUDGET));
            report.push('\n');
            return report;
        }
    };

    let console_errors: Vec<&ConsoleLogEntry> = console
        .iter()
        .filter(|e| e.kind == ConsoleKind::Error)
        .collect();
    let failed: Vec<&NetworkEvent> = network.iter().filter(|e| e.is_failed()).collect();

    push_section(&mut report, "Agent Steps", &render_steps(&body), STEPS_BUDGET);
    push_section(
        &mut report,
        "Conclusion",
        &render_conclusion(&body),
        CONCLUSION_BUDGET,
    );
    push_section(
        &mut report,
        &format!("Console Errors ({})", console_errors.len()),
        &render_console(&console_errors),
        CONSOLE_ERRORS_BUDGET,
    );
    push_section(
        &mut report,
        &format!("Failed Network Requests ({})", failed.len()),
        &render_network(&failed),
        FAILED_REQUESTS_BUDGET,
    );
    push_section(
        &mut report,
        &format!("Console Logs ({})", console.len()),
        &render_console_deduped(console),
        CONSOLE_BUDGET,
    );
    push_section(
        &mut report,
        &format!("Network Requests ({})", network.len()),
        &render_network(&network.iter().collect::<Vec<_>>()),
        NETWORK_BUDGET,
    );
    push_section(
        &mut report,
        "Chronological Timeline",
        &render_timeline(&body, console, network),
        TIMELINE_BUDGET,
    );

    report
}

/// An outright execution error short-circuits the whole report.
fn execution_error(payload: &AgentResultPayload) -> Option<String> {
    match payload {
        AgentResultPayload::Structured(result) => result.error.clone(),
        AgentResultPayload::Raw(raw) => {
            let trimmed = raw.trim();
            trimmed.starts_with("Error").then(|| trimmed.to_string())
        }
    }
}

fn normalize(payload: &AgentResultPayload) -> Result<ReportBody, ParseError> {
    match payload {
        AgentResultPayload::Structured(result) => Ok(ReportBody {
            steps: result
                .steps
                .iter()
                .map(|s| ReportStep {
                    index: s.index,
                    text: s.text.clone(),
                    url: s.url.clone(),
                    error: s.error.clone(),
                    timestamp: Some(s.timestamp),
                })
                .collect(),
            conclusion: result.conclusion.clone(),
            outcome: Some(result.success),
            stopped: result.stopped,
        }),
        AgentResultPayload::Raw(raw) => {
            let parsed = parse_all_results(raw)?;
            let terminal = parsed.iter().rev().find(|s| s.is_done);
            Ok(ReportBody {
                conclusion: terminal.and_then(|s| s.text.clone()),
                outcome: terminal.and_then(|s| s.success),
                steps: parsed
                    .iter()
                    .enumerate()
                    .map(|(i, s)| ReportStep {
                        index: i + 1,
                        text: s.text.clone().unwrap_or_default(),
                        url: None,
                        error: s.error.clone(),
                        timestamp: None,
                    })
                    .collect(),
                stopped: false,
            })
        }
    }
}

fn push_section(report: &mut String, title: &str, body: &str, budget: usize) {
    report.push_str(&format!("\n{title}:\n"));
    report.push_str(&cap_section(body, budget));
    report.push('\n');
}

fn render_steps(body: &ReportBody) -> String {
    if body.steps.is_empty() {
        return "No steps recorded.".to_string();
    }
    let mut out = String::new();
    for step in &body.steps {
        out.push_str(&format!("Step {}: {}\n", step.index, step.text));
        if let Some(u) = &step.url {
            out.push_str(&format!("  URL: {u}\n"));
        }
        if let Some(e) = &step.error {
            out.push_str(&format!("  Error: {e}\n"));
        }
    }
    out.trim_end().to_string()
}

fn render_conclusion(body: &ReportBody) -> String {
    let mut out = String::new();
    match &body.conclusion {
        Some(text) => out.push_str(text),
        None => out.push_str("(none)"),
    }
    let outcome = match body.outcome {
        Some(true) => "success",
        Some(false) => "failure",
        None => "unknown",
    };
    out.push_str(&format!("\nOutcome: {outcome}"));
    if body.stopped {
        out.push_str(" (stopped from the dashboard)");
    }
    out
}

fn console_line(entry: &ConsoleLogEntry) -> String {
    match &entry.source {
        Some(src) => format!("[{}] {} ({})", entry.kind.as_str(), entry.text, src),
        None => format!("[{}] {}", entry.kind.as_str(), entry.text),
    }
}

fn render_console(entries: &[&ConsoleLogEntry]) -> String {
    if entries.is_empty() {
        return "(none)".to_string();
    }
    entries
        .iter()
        .map(|e| console_line(e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Full console list with consecutive repeats collapsed.
fn render_console_deduped(entries: &[ConsoleLogEntry]) -> String {
    if entries.is_empty() {
        return "(none)".to_string();
    }
    let mut lines = Vec::new();
    let mut iter = entries.iter().peekable();
    while let Some(entry) = iter.next() {
        let mut count = 1usize;
        while iter
            .peek()
            .is_some_and(|next| next.kind == entry.kind && next.text == entry.text)
        {
            iter.next();
            count += 1;
        }
        let mut line = console_line(entry);
        if count > 1 {
            line.push_str(&format!(" (repeated {count} times)"));
        }
        lines.push(line);
    }
    lines.join("\n")
}

fn render_network(events: &[&NetworkEvent]) -> String {
    if events.is_empty() {
        return "(none)".to_string();
    }
    events
        .iter()
        .map(|e| network_line(e))
        .collect::<Vec<_>>()
        .join("\n")
}

fn network_line(event: &NetworkEvent) -> String {
    let outcome = if let Some(status) = event.status {
        status.to_string()
    } else if let Some(reason) = &event.failure {
        format!("failed: {reason}")
    } else {
        "no response".to_string()
    };
    format!("[{}] {} -> {}", event.method, event.url, outcome)
}

/// Merge agent steps, console entries and network request/response pairs
/// into one timestamp-sorted list. Sort is stable, so same-timestamp
/// entries keep their capture order. Steps from raw payloads carry no
/// timestamps and are left out.
fn render_timeline(
    body: &ReportBody,
    console: &[ConsoleLogEntry],
    network: &[NetworkEvent],
) -> String {
    let mut entries: Vec<(DateTime<Utc>, String)> = Vec::new();
    for step in &body.steps {
        if let Some(ts) = step.timestamp {
            let first_line = step.text.lines().next().unwrap_or("");
            entries.push((ts, format!("AGENT step {}: {}", step.index, first_line)));
        }
    }
    for entry in console {
        entries.push((
            entry.timestamp,
            format!("CONSOLE [{}]: {}", entry.kind.as_str(), entry.text),
        ));
    }
    for event in network {
        entries.push((
            event.timestamp,
            format!("NET REQ [{}]: {}", event.method, event.url),
        ));
        if let (Some(ts), Some(status)) = (event.response_timestamp, event.status) {
            entries.push((ts, format!("NET RESP [{status}]: {}", event.url)));
        } else if let Some(reason) = &event.failure {
            // Failures carry no response timestamp, pin them to the request
            entries.push((
                event.timestamp,
                format!("NET FAIL [{reason}]: {}", event.url),
            ));
        }
    }
    if entries.is_empty() {
        return "(no timestamped events)".to_string();
    }
    entries.sort_by_key(|(ts, _)| *ts);
    entries
        .iter()
        .map(|(ts, line)| format!("{} {}", ts.format("%H:%M:%S%.3f"), line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Cap `text` to roughly `budget` bytes, cutting at the last line break
/// before the budget so no line is ever split, and note how much was
/// dropped.
fn cap_section(text: &str, budget: usize) -> String {
    if text.len() <= budget {
        return text.to_string();
    }
    let mut cut = budget;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    if let Some(pos) = text[..cut].rfind('\n') {
        if pos > 0 {
            cut = pos;
        }
    }
    let hidden = text[cut..].chars().count();
    format!(
        "{}\n… {} more characters not shown",
        text[..cut].trim_end(),
        hidden
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use webeval_agent::{AgentRunResult, StepRecord};

    fn ts(seconds: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, seconds).unwrap()
    }

    fn console_entry(kind: ConsoleKind, text: &str, at: DateTime<Utc>) -> ConsoleLogEntry {
        ConsoleLogEntry {
            kind,
            text: text.to_string(),
            source: None,
            timestamp: at,
        }
    }

    fn step(index: usize, text: &str, at: DateTime<Utc>) -> StepRecord {
        StepRecord {
            index,
            text: text.to_string(),
            url: Some("http://localhost:5173/".to_string()),
            error: None,
            timestamp: at,
            screenshot: None,
        }
    }

    #[test]
    fn test_error_report_short_circuits() {
        let result = AgentRunResult {
            error: Some("browser crashed".to_string()),
            ..Default::default()
        };
        let report = format_report(
            &AgentResultPayload::Structured(result),
            "http://localhost:5173",
            "check the nav bar",
            &[],
            &[],
        );
        assert!(report.starts_with("Web Evaluation Report for http://localhost:5173"));
        assert!(report.contains("Error during task execution: browser crashed"));
        assert!(!report.contains("Agent Steps"));
        assert!(!report.contains("Chronological Timeline"));
    }

    #[test]
    fn test_structured_report_section_order() {
        let mut ok = NetworkEvent::request("1", "GET", "http://localhost:5173/api/items", "xhr");
        ok.status = Some(200);
        ok.response_timestamp = Some(ts(1));
        let mut broken =
            NetworkEvent::request("2", "POST", "http://localhost:5173/api/broken", "fetch");
        broken.status = Some(500);
        broken.response_timestamp = Some(ts(2));

        let console = vec![
            console_entry(ConsoleKind::Info, "app booted", ts(0)),
            console_entry(ConsoleKind::Error, "boom", ts(3)),
        ];
        let result = AgentRunResult {
            steps: vec![step(1, "opened the page", ts(0)), step(2, "submitted", ts(4))],
            success: true,
            conclusion: Some("Form flow works".to_string()),
            error: None,
            stopped: false,
        };

        let report = format_report(
            &AgentResultPayload::Structured(result),
            "http://localhost:5173",
            "exercise the form",
            &console,
            &[ok, broken],
        );

        let order = [
            report.find("Agent Steps:").unwrap(),
            report.find("Conclusion:").unwrap(),
            report.find("Console Errors (1):").unwrap(),
            report.find("Failed Network Requests (1):").unwrap(),
            report.find("Console Logs (2):").unwrap(),
            report.find("Network Requests (2):").unwrap(),
            report.find("Chronological Timeline:").unwrap(),
        ];
        assert!(order.windows(2).all(|w| w[0] < w[1]), "sections out of order");

        // Failed section lists only the 500
        let failed_section = &report[order[3]..order[4]];
        assert!(failed_section.contains("/api/broken"));
        assert!(!failed_section.contains("/api/items"));

        assert!(report.contains("Step 1: opened the page"));
        assert!(report.contains("Form flow works"));
        assert!(report.contains("Outcome: success"));
    }

    #[test]
    fn test_console_dedup_marks_repeats() {
        let console = vec![
            console_entry(ConsoleKind::Error, "ResizeObserver loop", ts(0)),
            console_entry(ConsoleKind::Error, "ResizeObserver loop", ts(1)),
            console_entry(ConsoleKind::Error, "ResizeObserver loop", ts(2)),
            console_entry(ConsoleKind::Log, "done", ts(3)),
        ];
        let rendered = render_console_deduped(&console);
        assert!(rendered.contains("ResizeObserver loop (repeated 3 times)"));
        assert_eq!(rendered.lines().count(), 2);
    }

    #[test]
    fn test_raw_payload_report() {
        let raw = "AgentHistoryList(all_results=[\
            ActionResult(is_done=False, success=None, extracted_content='Clicked [submit]', error=None), \
            ActionResult(is_done=True, success=True, extracted_content='Form saved', error=None)\
            ], all_model_outputs=[])";
        let report = format_report(
            &AgentResultPayload::Raw(raw.to_string()),
            "http://localhost:5173",
            "submit the form",
            &[],
            &[],
        );
        assert!(report.contains("Step 1: Clicked [submit]"));
        assert!(report.contains("Form saved"));
        assert!(report.contains("Outcome: success"));
    }

    #[test]
    fn test_missing_marker_degrades_to_excerpt() {
        let report = format_report(
            &AgentResultPayload::Raw("total garbage without the marker".to_string()),
            "http://localhost:5173",
            "anything",
            &[],
            &[],
        );
        assert!(report.contains("Could not parse agent result"));
        assert!(report.contains("payload has no all_results"));
        assert!(report.contains("Raw agent output (excerpt):"));
        assert!(report.contains("total garbage without the marker"));
    }

    #[test]
    fn test_raw_error_payload_short_circuits() {
        let report = format_report(
            &AgentResultPayload::Raw("Error: agent backend unreachable".to_string()),
            "http://localhost:5173",
            "anything",
            &[],
            &[],
        );
        assert!(report.contains("Error during task execution: Error: agent backend unreachable"));
        assert!(!report.contains("Raw agent output"));
    }

    #[test]
    fn test_cap_section_cuts_at_line_boundary() {
        let text = (1..=100)
            .map(|i| format!("line number {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let capped = cap_section(&text, 120);
        assert!(capped.len() < text.len());

        let marker = capped.lines().last().unwrap();
        assert!(marker.starts_with("… "));
        assert!(marker.ends_with(" more characters not shown"));

        // Everything kept is a complete input line
        let kept_last = capped.lines().rev().nth(1).unwrap();
        assert!(text.lines().any(|l| l == kept_last));
    }

    #[test]
    fn test_cap_section_under_budget_untouched() {
        let text = "short section";
        assert_eq!(cap_section(text, 1_000), text);
    }

    #[test]
    fn test_timeline_sorted_by_timestamp() {
        let mut request =
            NetworkEvent::request("1", "GET", "http://localhost:5173/api/items", "xhr");
        request.timestamp = ts(0);
        request.status = Some(200);
        request.response_timestamp = Some(ts(1));
        let console = vec![console_entry(ConsoleKind::Log, "rendered list", ts(2))];

        let body = ReportBody {
            steps: Vec::new(),
            conclusion: None,
            outcome: None,
            stopped: false,
        };
        let timeline = render_timeline(&body, &console, &[request]);
        let req = timeline.find("NET REQ").unwrap();
        let resp = timeline.find("NET RESP").unwrap();
        let log = timeline.find("CONSOLE").unwrap();
        assert!(req < resp && resp < log);
    }

    #[test]
    fn test_timeline_failure_uses_request_timestamp() {
        let mut aborted =
            NetworkEvent::request("9", "GET", "http://localhost:5173/api/slow", "fetch");
        aborted.timestamp = ts(5);
        aborted.failure = Some("net::ERR_ABORTED".to_string());

        let body = ReportBody {
            steps: Vec::new(),
            conclusion: None,
            outcome: None,
            stopped: false,
        };
        let timeline = render_timeline(&body, &[], &[aborted]);
        assert!(timeline.contains("NET FAIL [net::ERR_ABORTED]"));
        assert!(timeline.contains("10:00:05"));
    }

    #[test]
    fn test_stopped_run_noted_in_conclusion() {
        let result = AgentRunResult {
            steps: vec![step(1, "opened the page", ts(0))],
            success: false,
            conclusion: None,
            error: None,
            stopped: true,
        };
        let report = format_report(
            &AgentResultPayload::Structured(result),
            "http://localhost:5173",
            "poke around",
            &[],
            &[],
        );
        assert!(report.contains("Outcome: failure (stopped from the dashboard)"));
    }
}
