//! Terminal output helpers.
//!
//! Status lines go through [`Output`] so that `--json` and the color
//! switches are honored in one place. Errors and warnings go to stderr.

use colored::{Color, Colorize};
use serde::Serialize;
use serde_json::Value;

/// Decide whether ANSI colors should be emitted.
///
/// Colors are off when `NO_COLOR` is set (to anything) or `TERM` is `dumb`.
pub fn colors_enabled(no_color: Option<&str>, term: Option<&str>) -> bool {
    no_color.is_none() && term != Some("dumb")
}

pub struct Output {
    json: bool,
    colored: bool,
}

impl Output {
    pub fn new(json: bool, colored: bool) -> Self {
        Self { json, colored }
    }

    /// Build from the process environment.
    pub fn from_env(json: bool) -> Self {
        let no_color = std::env::var("NO_COLOR").ok();
        let term = std::env::var("TERM").ok();
        Self::new(json, colors_enabled(no_color.as_deref(), term.as_deref()))
    }

    pub fn is_json(&self) -> bool {
        self.json
    }

    pub fn success(&self, message: &str) {
        println!("{}", self.status_line("✓", Color::Green, message));
    }

    pub fn error(&self, message: &str) {
        eprintln!("{}", self.status_line("✗", Color::Red, message));
    }

    pub fn info(&self, message: &str) {
        println!("{}", self.status_line("ℹ", Color::Blue, message));
    }

    pub fn warn(&self, message: &str) {
        eprintln!("{}", self.status_line("⚠", Color::Yellow, message));
    }

    pub fn header(&self, text: &str) {
        println!("\n{}", self.bold(text));
    }

    pub fn row(&self, label: &str, value: &str, indent: usize) {
        println!("{}", self.row_line(label, value, indent));
    }

    pub fn blank(&self) {
        println!();
    }

    /// Pretty-printed JSON on stdout.
    pub fn print_json<T: Serialize + ?Sized>(&self, data: &T) -> serde_json::Result<()> {
        println!("{}", serde_json::to_string_pretty(data)?);
        Ok(())
    }

    /// Print a JSON document as indented label/value rows.
    ///
    /// Keys come out in sorted order. Nested objects become indented blocks;
    /// array elements are separated by a blank line.
    pub fn fields(&self, value: &Value, indent: usize) {
        for line in self.field_lines(value, indent) {
            println!("{}", line);
        }
    }

    fn field_lines(&self, value: &Value, indent: usize) -> Vec<String> {
        let mut lines = Vec::new();
        match value {
            Value::Object(map) => {
                for (key, item) in map {
                    match item {
                        Value::Object(_) | Value::Array(_) => {
                            lines.push(format!(
                                "{}{}",
                                " ".repeat(indent),
                                self.paint(&format!("{}:", key), Color::Cyan)
                            ));
                            lines.extend(self.field_lines(item, indent + 2));
                        }
                        scalar => lines.push(self.row_line(
                            &format!("{}:", key),
                            &scalar_text(scalar),
                            indent,
                        )),
                    }
                }
            }
            Value::Array(items) if items.is_empty() => {
                lines.push(format!("{}{}", " ".repeat(indent), self.dim("(none)")));
            }
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 && item.is_object() {
                        lines.push(String::new());
                    }
                    lines.extend(self.field_lines(item, indent));
                }
            }
            scalar => lines.push(format!("{}{}", " ".repeat(indent), scalar_text(scalar))),
        }
        lines
    }

    fn status_line(&self, symbol: &str, color: Color, message: &str) -> String {
        format!("{} {}", self.paint(symbol, color), message)
    }

    fn row_line(&self, label: &str, value: &str, indent: usize) -> String {
        format!("{}{} {}", " ".repeat(indent), self.dim(label), value)
    }

    pub fn paint(&self, text: &str, color: Color) -> String {
        if self.colored {
            text.color(color).to_string()
        } else {
            text.to_string()
        }
    }

    pub fn bold(&self, text: &str) -> String {
        if self.colored {
            text.bold().to_string()
        } else {
            text.to_string()
        }
    }

    pub fn dim(&self, text: &str) -> String {
        if self.colored {
            text.dimmed().to_string()
        } else {
            text.to_string()
        }
    }
}

/// Display text for a scalar; missing values (`null`) show as `-`.
pub fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}
