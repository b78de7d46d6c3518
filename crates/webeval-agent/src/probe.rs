//! Deterministic UX probe agent
//!
//! Walks the page without a model behind it: inventories the document,
//! lists interactive controls, exercises scrolling and runs quick
//! accessibility checks. Serves as the default agent and works in
//! environments without API access.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::agent::{PageAgent, StepContext, StepOutcome};
use crate::{AgentError, Result};

const OVERVIEW_JS: &str = r#"
(() => {
    const body = document.body ? document.body.innerText.length : 0;
    return {
        title: document.title || "",
        headings: document.querySelectorAll("h1, h2, h3").length,
        links: document.querySelectorAll("a[href]").length,
        buttons: document.querySelectorAll("button, [role='button'], input[type='submit']").length,
        inputs: document.querySelectorAll("input, textarea, select").length,
        forms: document.forms.length,
        body_chars: body,
    };
})()
"#;

const CONTROLS_JS: &str = r#"
(() => {
    const grab = (el) => (el.innerText || el.value || el.getAttribute("aria-label") || "").trim().slice(0, 40);
    const controls = [];
    for (const el of document.querySelectorAll("button, a[href], [role='button'], input[type='submit']")) {
        controls.push(grab(el) || "<unlabeled>");
        if (controls.length >= 10) break;
    }
    return controls;
})()
"#;

const SCROLL_JS: &str = r#"
(() => {
    const before = window.scrollY;
    window.scrollTo(0, document.body.scrollHeight);
    const bottom = window.scrollY;
    window.scrollTo(0, 0);
    return { before: before, bottom: bottom, height: document.body.scrollHeight };
})()
"#;

const A11Y_JS: &str = r#"
(() => {
    const issues = [];
    const images = document.querySelectorAll("img:not([alt])");
    if (images.length > 0) issues.push(images.length + " image(s) without alt text");
    let unnamed = 0;
    for (const el of document.querySelectorAll("button, [role='button']")) {
        if (!(el.innerText || el.getAttribute("aria-label") || "").trim()) unnamed += 1;
    }
    if (unnamed > 0) issues.push(unnamed + " button(s) without an accessible name");
    let bare = 0;
    for (const input of document.querySelectorAll("input:not([type='hidden'])")) {
        const id = input.getAttribute("id");
        const labelled = (id && document.querySelector("label[for='" + id + "']")) ||
            input.closest("label") || input.getAttribute("aria-label") ||
            input.getAttribute("placeholder");
        if (!labelled) bare += 1;
    }
    if (bare > 0) issues.push(bare + " input(s) without a label");
    return issues;
})()
"#;

#[derive(Debug, Deserialize)]
struct Overview {
    title: String,
    headings: u32,
    links: u32,
    buttons: u32,
    inputs: u32,
    forms: u32,
    body_chars: u64,
}

#[derive(Debug, Deserialize)]
struct ScrollSweep {
    bottom: f64,
    height: f64,
}

/// Heuristic page prober
#[derive(Default)]
pub struct ProbeAgent {
    findings: Vec<String>,
    broken: bool,
}

impl ProbeAgent {
    pub fn new() -> Self {
        Self::default()
    }

    async fn eval<T: DeserializeOwned>(ctx: &StepContext<'_>, js: &str) -> Result<T> {
        ctx.page
            .evaluate(js)
            .await
            .map_err(|e| AgentError::Step(format!("Page evaluation failed: {}", e)))?
            .into_value()
            .map_err(|e| AgentError::Step(format!("Unexpected evaluation result: {}", e)))
    }
}

#[async_trait]
impl PageAgent for ProbeAgent {
    fn name(&self) -> &str {
        "probe"
    }

    async fn step(&mut self, ctx: &StepContext<'_>) -> Result<StepOutcome> {
        match ctx.step {
            1 => {
                let o: Overview = Self::eval(ctx, OVERVIEW_JS).await?;
                if o.body_chars == 0 {
                    self.broken = true;
                    return Ok(StepOutcome::finished(
                        "Document overview: the page rendered no visible content",
                        false,
                        "Broken: the page rendered no visible content",
                    ));
                }
                if o.title.is_empty() {
                    self.findings.push("Document has no title".to_string());
                }
                Ok(StepOutcome::progress(format!(
                    "Document overview: title '{}', {} headings, {} links, {} buttons, {} inputs in {} forms",
                    o.title, o.headings, o.links, o.buttons, o.inputs, o.forms
                )))
            }
            2 => {
                let controls: Vec<String> = Self::eval(ctx, CONTROLS_JS).await?;
                let unlabeled = controls.iter().filter(|c| c.as_str() == "<unlabeled>").count();
                if unlabeled > 0 {
                    self.findings.push(format!(
                        "{} interactive control(s) have no visible label",
                        unlabeled
                    ));
                }
                if controls.is_empty() {
                    self.findings
                        .push("No interactive controls found".to_string());
                    Ok(StepOutcome::progress(
                        "No interactive controls found on the page",
                    ))
                } else {
                    Ok(StepOutcome::progress(format!(
                        "Interactive controls: {}",
                        controls.join(", ")
                    )))
                }
            }
            3 => {
                let sweep: ScrollSweep = Self::eval(ctx, SCROLL_JS).await?;
                Ok(StepOutcome::progress(format!(
                    "Scroll sweep: document height {:.0}px, reached {:.0}px",
                    sweep.height, sweep.bottom
                )))
            }
            4 => {
                let issues: Vec<String> = Self::eval(ctx, A11Y_JS).await?;
                let text = if issues.is_empty() {
                    "Accessibility quick checks passed".to_string()
                } else {
                    format!("Accessibility issues: {}", issues.join("; "))
                };
                self.findings.extend(issues);
                Ok(StepOutcome::progress(text))
            }
            _ => {
                let conclusion = if self.findings.is_empty() {
                    "Component is functioning as expected, no UX issues observed".to_string()
                } else {
                    format!("UX findings: {}", self.findings.join("; "))
                };
                Ok(StepOutcome::finished(
                    "Probe complete",
                    !self.broken,
                    conclusion,
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_js_snippets_are_expressions() {
        // Every snippet is an IIFE so evaluate() returns its value
        for js in [OVERVIEW_JS, CONTROLS_JS, SCROLL_JS, A11Y_JS] {
            assert!(js.trim_start().starts_with("(()"));
            assert!(js.trim_end().ends_with(")()"));
        }
    }

    #[test]
    fn test_overview_deserializes() {
        let value = serde_json::json!({
            "title": "Demo",
            "headings": 3,
            "links": 12,
            "buttons": 4,
            "inputs": 2,
            "forms": 1,
            "body_chars": 5120
        });
        let o: Overview = serde_json::from_value(value).unwrap();
        assert_eq!(o.title, "Demo");
        assert_eq!(o.buttons, 4);
    }

    #[test]
    fn test_scroll_sweep_accepts_integers() {
        // scrollHeight comes back as an integer
        let value = serde_json::json!({ "before": 0, "bottom": 1200, "height": 1800 });
        let s: ScrollSweep = serde_json::from_value(value).unwrap();
        assert_eq!(s.height, 1800.0);
    }
}
