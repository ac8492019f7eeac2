//! Output rendering for the chat front end.
//!
//! This module provides the renderer trait, a plain-text implementation, and the mapping
//! from tool calls to the short cards shown while the agent works.

use std::collections::HashSet;
use std::io::{self, Stdout, Write};

use serde_json::{Map, Value};

use crate::reducer::SessionUpdate;
use crate::types::{ToolCall, ToolCallStatus};

/// ANSI escape code for dim text (used for progress and ids).
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// ANSI escape code for cyan text (used for tool labels).
const ANSI_CYAN: &str = "\x1b[36m";

/// ANSI escape code for green text (used for completed tools).
const ANSI_GREEN: &str = "\x1b[32m";

/// ANSI escape code for red text (used for errors).
const ANSI_RED: &str = "\x1b[31m";

/// Longest tool result shown on a card.
const RESULT_PREVIEW_CHARS: usize = 100;

/////////////////////////////////////////// Tool cards ///////////////////////////////////////////

/// The display form of a tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCard {
    /// Short name of the tool.
    pub label: &'static str,
    /// What the tool is doing with its arguments.
    pub description: String,
}

/// Describe `call` for display.  Unknown tools get a generic card.
pub fn describe_tool_call(call: &ToolCall) -> ToolCard {
    let args = &call.args;
    match call.name.as_str() {
        "get_nsqi_prediction" => ToolCard {
            label: "Quality Score",
            description: format!("Calculating NSQI for ZIP {}", arg_text(args, "zip_code")),
        },
        "get_acs_demographics" => ToolCard {
            label: "Demographics",
            description: format!("Fetching census data for ZIP {}", arg_text(args, "zip_code")),
        },
        "compare_neighborhoods" => ToolCard {
            label: "Comparison",
            description: format!(
                "Comparing {} vs {}",
                arg_text(args, "zip_code_a"),
                arg_text(args, "zip_code_b")
            ),
        },
        "search_neighborhoods" => ToolCard {
            label: "Search",
            description: describe_search(args),
        },
        _ => ToolCard {
            label: "Tool",
            description: "Processing...".to_string(),
        },
    }
}

fn describe_search(args: &Map<String, Value>) -> String {
    let mut filters = Vec::new();
    if let Some(borough) = present(args, "borough") {
        filters.push(value_text(borough));
    }
    if let Some(score) = present(args, "min_nsqi_score") {
        filters.push(format!("score ≥ {}", value_text(score)));
    }
    if let Some(rate) = present(args, "max_poverty_rate").and_then(Value::as_f64) {
        filters.push(format!("poverty ≤ {}%", format_number(rate * 100.0)));
    }
    if let Some(income) = present(args, "min_income").and_then(Value::as_f64) {
        filters.push(format!("income ≥ ${}", group_thousands(income)));
    }
    if filters.is_empty() {
        "Searching neighborhoods...".to_string()
    } else {
        format!("Searching: {}", filters.join(", "))
    }
}

/// The argument under `key` unless it is missing, null, false, zero or empty.
fn present<'a>(args: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    args.get(key).filter(|value| match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    })
}

fn arg_text(args: &Map<String, Value>, key: &str) -> String {
    present(args, key)
        .map(value_text)
        .unwrap_or_else(|| "...".to_string())
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn format_number(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    let text = format!("{rounded:.2}");
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

fn group_thousands(value: f64) -> String {
    let whole = value.round() as i64;
    let digits = whole.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if whole < 0 {
        grouped.insert(0, '-');
    }
    grouped
}

/// Collapse newlines and cut `result` to a short preview.
pub fn truncate_result(result: &str) -> String {
    let cleaned = result
        .split('\n')
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let cleaned = cleaned.trim();
    if cleaned.chars().count() <= RESULT_PREVIEW_CHARS {
        return cleaned.to_string();
    }
    let mut preview: String = cleaned.chars().take(RESULT_PREVIEW_CHARS).collect();
    preview.push_str("...");
    preview
}

//////////////////////////////////////////// Renderer ////////////////////////////////////////////

/// Trait for rendering a streamed conversation.
///
/// This abstraction allows for different rendering strategies:
/// - Plain text with ANSI styling
/// - Plain text without styling (for piping/redirecting)
pub trait Renderer: Send {
    /// Print a chunk of assistant text.
    fn print_text(&mut self, text: &str);

    /// Print an error message.
    fn print_error(&mut self, error: &str);

    /// Print an informational message.
    fn print_info(&mut self, info: &str);

    /// Print a progress message from a running tool.
    fn print_progress(&mut self, message: &str);

    /// Show a tool call that started or received its arguments.
    fn start_tool_call(&mut self, call: &ToolCall);

    /// Show the outcome of a tool call.
    fn finish_tool_call(&mut self, call: &ToolCall);

    /// Called when the response completes.
    fn finish_response(&mut self);

    /// Called when the user interrupts a response.
    fn print_interrupted(&mut self) {
        self.print_info("[interrupted]");
    }

    /// Render one session update.
    fn render_update(&mut self, update: &SessionUpdate) {
        match update {
            SessionUpdate::Token(text) => self.print_text(text),
            SessionUpdate::ToolCallStarted(call) | SessionUpdate::ToolCallRunning(call) => {
                self.start_tool_call(call)
            }
            SessionUpdate::ToolCallCompleted(call) => self.finish_tool_call(call),
            SessionUpdate::Progress(message) => self.print_progress(message),
            SessionUpdate::ThreadAssigned(_) => {}
            SessionUpdate::Done { .. } => self.finish_response(),
            SessionUpdate::Failed(err) => {
                self.print_error(&format!("{err} (type /retry to try again)"));
                self.finish_response();
            }
        }
    }
}

/// Plain text renderer with optional ANSI styling.
///
/// Tool calls are drawn as cards: a header when the call is first seen, the description
/// once arguments arrive, and a status line at the end.
pub struct PlainTextRenderer<W: Write + Send = Stdout> {
    out: W,
    use_color: bool,
    line_start: bool,
    announced: HashSet<String>,
    described: HashSet<String>,
}

impl PlainTextRenderer {
    /// Creates a new PlainTextRenderer with ANSI colors enabled.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Creates a new PlainTextRenderer with specified color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self::with_writer(io::stdout(), use_color)
    }
}

impl<W: Write + Send> PlainTextRenderer<W> {
    /// Render into `out`.
    pub fn with_writer(out: W, use_color: bool) -> Self {
        Self {
            out,
            use_color,
            line_start: true,
            announced: HashSet::new(),
            described: HashSet::new(),
        }
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.out
    }

    fn write(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        _ = self.out.write_all(text.as_bytes());
        _ = self.out.flush();
        self.line_start = text.ends_with('\n');
    }

    fn begin_line(&mut self) {
        if !self.line_start {
            self.write("\n");
        }
    }

    fn styled(&self, style: &str, text: &str) -> String {
        if self.use_color {
            format!("{style}{text}{ANSI_RESET}")
        } else {
            text.to_string()
        }
    }
}

impl Default for PlainTextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write + Send> Renderer for PlainTextRenderer<W> {
    fn print_text(&mut self, text: &str) {
        self.write(text);
    }

    fn print_error(&mut self, error: &str) {
        self.begin_line();
        let line = self.styled(ANSI_RED, &format!("Error: {error}"));
        self.write(&format!("{line}\n"));
    }

    fn print_info(&mut self, info: &str) {
        self.begin_line();
        self.write(&format!("{info}\n"));
    }

    fn print_progress(&mut self, message: &str) {
        self.begin_line();
        let line = self.styled(ANSI_DIM, &format!("  {message}"));
        self.write(&format!("{line}\n"));
    }

    fn start_tool_call(&mut self, call: &ToolCall) {
        let card = describe_tool_call(call);
        if self.announced.insert(call.id.clone()) {
            self.begin_line();
            let header = self.styled(ANSI_CYAN, &format!("[{}]", card.label));
            let id = self.styled(ANSI_DIM, &format!("({})", call.id));
            self.write(&format!("{header} {id}\n"));
        }
        if call.status == ToolCallStatus::Running && self.described.insert(call.id.clone()) {
            self.write(&format!("  {}\n", card.description));
        }
    }

    fn finish_tool_call(&mut self, call: &ToolCall) {
        self.begin_line();
        let line = match call.status {
            ToolCallStatus::Completed => {
                let preview = call.result.as_deref().map(truncate_result).unwrap_or_default();
                self.styled(ANSI_GREEN, &format!("  ✓ {preview}"))
            }
            ToolCallStatus::Error => self.styled(ANSI_RED, "  ✗ Tool execution failed"),
            ToolCallStatus::Pending | ToolCallStatus::Running => {
                self.styled(ANSI_DIM, &format!("  … {}", call.status))
            }
        };
        self.write(&format!("{}\n", line.trim_end()));
    }

    fn finish_response(&mut self) {
        self.begin_line();
        self.announced.clear();
        self.described.clear();
    }

    fn print_interrupted(&mut self) {
        self.begin_line();
        self.write("[interrupted]\n");
        self.announced.clear();
        self.described.clear();
    }
}
