//! ContextAssembler — render a payload for the model and for inspection.
//!
//! Items are grouped by source kind in a fixed order (custom, rag,
//! path_reference, tool) and, within a group, by tier then sequence index.
//! Both renderings are pure functions of the payload, so identical payloads
//! always produce byte-identical output.

use std::collections::BTreeMap;

use ctxpack_core::{ContextItem, ContextPayload, Priority, Result, SourceKind};
use serde::Serialize;

/// The two renderings of one payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedContext {
    /// Prompt form: bracketed section headers, one block per item.
    pub text: String,
    /// Canonical JSON form, for caching and tests.
    pub json: String,
}

#[derive(Serialize)]
struct JsonPayload<'a> {
    used_tokens: usize,
    max_tokens: usize,
    reserved_tokens: usize,
    sections: Vec<JsonSection<'a>>,
}

#[derive(Serialize)]
struct JsonSection<'a> {
    source_kind: SourceKind,
    items: Vec<JsonItem<'a>>,
}

#[derive(Serialize)]
struct JsonItem<'a> {
    name: &'a str,
    priority: Priority,
    sequence_index: usize,
    token_cost: usize,
    truncated: bool,
    citation: Option<&'a str>,
    content: &'a str,
}

#[derive(Serialize)]
struct SourceStats {
    count: usize,
    tokens: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ContextAssembler;

impl ContextAssembler {
    pub fn assemble(payload: &ContextPayload) -> Result<SerializedContext> {
        Ok(SerializedContext {
            text: Self::render_text(payload),
            json: Self::render_json(payload)?,
        })
    }

    /// Header shown above each source group in the prompt.
    pub fn section_header(kind: SourceKind) -> &'static str {
        match kind {
            SourceKind::Custom => "[Custom Context]",
            SourceKind::Rag => "[Retrieved Knowledge]",
            SourceKind::PathReference => "[Referenced Files]",
            SourceKind::Tool => "[Tool Outputs]",
        }
    }

    pub fn render_text(payload: &ContextPayload) -> String {
        let mut sections = Vec::new();
        for kind in SourceKind::ALL {
            let items = grouped(payload, kind);
            if items.is_empty() {
                continue;
            }

            let mut section = String::from(Self::section_header(kind));
            section.push('\n');
            for item in items {
                section.push_str("### ");
                section.push_str(&item.name);
                if let Some(citation) = item.citation.as_deref().filter(|c| *c != item.name) {
                    section.push_str(&format!(" (source: {citation})"));
                }
                if item.truncated {
                    section.push_str(" [truncated]");
                }
                section.push('\n');
                section.push_str(item.content.trim_end());
                section.push_str("\n\n");
            }
            sections.push(section.trim_end().to_string());
        }
        sections.join("\n\n")
    }

    pub fn render_json(payload: &ContextPayload) -> Result<String> {
        let sections = SourceKind::ALL
            .iter()
            .map(|&kind| JsonSection {
                source_kind: kind,
                items: grouped(payload, kind)
                    .into_iter()
                    .map(|item| JsonItem {
                        name: &item.name,
                        priority: item.priority,
                        sequence_index: item.sequence_index,
                        token_cost: item.token_cost,
                        truncated: item.truncated,
                        citation: item.citation.as_deref(),
                        content: &item.content,
                    })
                    .collect(),
            })
            .filter(|section| !section.items.is_empty())
            .collect();

        Ok(serde_json::to_string(&JsonPayload {
            used_tokens: payload.used_tokens,
            max_tokens: payload.max_tokens,
            reserved_tokens: payload.reserved_tokens,
            sections,
        })?)
    }

    /// Usage statistics as a JSON object. Every source kind and priority
    /// appears, with zero counts where nothing was included.
    pub fn stats(payload: &ContextPayload) -> serde_json::Value {
        let mut by_source: BTreeMap<&str, SourceStats> = SourceKind::ALL
            .iter()
            .map(|k| (k.as_str(), SourceStats { count: 0, tokens: 0 }))
            .collect();
        let mut by_priority: BTreeMap<&str, usize> =
            Priority::ALL.iter().map(|p| (p.as_str(), 0)).collect();

        for item in &payload.items {
            if let Some(entry) = by_source.get_mut(item.source_kind.as_str()) {
                entry.count += 1;
                entry.tokens += item.token_cost;
            }
            if let Some(count) = by_priority.get_mut(item.priority.as_str()) {
                *count += 1;
            }
        }

        let budget = payload.budget();
        let utilization_pct = if budget == 0 {
            0.0
        } else {
            (payload.used_tokens as f64 / budget as f64 * 10_000.0).round() / 100.0
        };

        serde_json::json!({
            "total_items": payload.items.len(),
            "used_tokens": payload.used_tokens,
            "max_tokens": payload.max_tokens,
            "reserved_tokens": payload.reserved_tokens,
            "budget": budget,
            "remaining_tokens": payload.remaining_tokens(),
            "utilization_pct": utilization_pct,
            "by_source": by_source,
            "by_priority": by_priority,
            "dropped_items": payload.dropped_items.len(),
            "truncated_items": payload.truncated_items.len(),
            "dropped": payload.dropped_items,
            "truncated": payload.truncated_items,
            "warnings": payload.warnings.iter().map(ToString::to_string).collect::<Vec<_>>(),
        })
    }
}

fn grouped(payload: &ContextPayload, kind: SourceKind) -> Vec<&ContextItem> {
    let mut items: Vec<&ContextItem> = payload.items_of(kind).collect();
    items.sort_by_key(|item| item.order_key());
    items
}
