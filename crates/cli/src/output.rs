// Output formatting for CLI

use std::fmt::Write as _;

use anyhow::Result;
use chrono::{DateTime, Utc};
use keypanel_core::{MessageKind, PanelView};
use serde::Serialize;

/// Characters of a secret left visible when masked.
pub const VISIBLE_SECRET_CHARS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
    Yaml,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Self {
        match s {
            "json" => OutputFormat::Json,
            "yaml" => OutputFormat::Yaml,
            _ => OutputFormat::Text,
        }
    }

    /// Serialize for machine-readable formats. Text is rendered by the caller.
    pub fn format_value<T: Serialize>(&self, value: &T) -> Result<Option<String>> {
        match self {
            OutputFormat::Json => Ok(Some(serde_json::to_string_pretty(value)? + "\n")),
            OutputFormat::Yaml => Ok(Some(serde_yaml::to_string(value)?)),
            OutputFormat::Text => Ok(None),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    pub show_secrets: bool,
    pub quiet: bool,
}

/// Render the panel view in the requested format.
pub fn render_view(view: &PanelView, format: OutputFormat, options: RenderOptions) -> Result<String> {
    render_view_at(view, format, options, Utc::now())
}

fn render_view_at(
    view: &PanelView,
    format: OutputFormat,
    options: RenderOptions,
    now: DateTime<Utc>,
) -> Result<String> {
    let mut view = view.clone();
    if !options.show_secrets {
        for key in &mut view.keys {
            key.key = key.masked(VISIBLE_SECRET_CHARS);
        }
    }

    // Quiet output is the outcome message alone, in every format
    let formatted = if options.quiet {
        format.format_value(&view.message)?
    } else {
        format.format_value(&view)?
    };
    if let Some(out) = formatted {
        return Ok(out);
    }

    let mut out = String::new();
    match view.message.kind {
        MessageKind::Success => writeln!(out, "{}", view.message.content)?,
        MessageKind::Error => writeln!(out, "Error: {}", view.message.content)?,
        MessageKind::None => {}
    }
    if options.quiet {
        return Ok(out);
    }

    out.push_str(&field("Session", &view.state.to_string()));
    if !view.state.is_logged_in() {
        out.push_str("Not signed in. Run `keypanel login` to sign in.\n");
        return Ok(out);
    }
    if view.keys.is_empty() {
        out.push_str("No API keys yet. Run `keypanel keys generate` to create one.\n");
        return Ok(out);
    }

    out.push('\n');
    let columns = [("ID", 6), ("KEY", 40), ("CREATED", 20), ("EXPIRES", 20), ("STATUS", 8)];
    out.push_str(&table_header(&columns));
    for key in &view.keys {
        let id = key.id.to_string();
        let created = key.created_at.format("%Y-%m-%d %H:%M").to_string();
        let expires = key
            .expires_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        let status = if key.is_expired_at(now) { "expired" } else { "active" };
        out.push_str(&table_row(&[
            (&id, 6),
            (&key.key, 40),
            (&created, 20),
            (&expires, 20),
            (status, 8),
        ]));
    }
    Ok(out)
}

/// A simple key-value line for text output
pub fn field(label: &str, value: &str) -> String {
    format!("{:<14} {}\n", format!("{}:", label), value)
}

/// A table header line
pub fn table_header(columns: &[(&str, usize)]) -> String {
    let header: String = columns
        .iter()
        .map(|(name, width)| format!("{:<width$}", name, width = width))
        .collect::<Vec<_>>()
        .join("  ");
    format!("{}\n", header.trim_end())
}

/// A table row line; values wider than their column are cut with "..."
pub fn table_row(values: &[(&str, usize)]) -> String {
    let row: String = values
        .iter()
        .map(|(val, width)| {
            let s = if val.chars().count() > *width {
                let keep: String = val.chars().take(width.saturating_sub(3)).collect();
                format!("{}...", keep)
            } else {
                val.to_string()
            };
            format!("{:<width$}", s, width = width)
        })
        .collect::<Vec<_>>()
        .join("  ");
    format!("{}\n", row.trim_end())
}
