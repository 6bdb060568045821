//! Primary parser: the designated tagged block
//!
//! The model is asked to end its answer with one block such as
//! `<cost_breakdown>…</cost_breakdown>`. The block may sit inside prose or a
//! fenced code block; when several complete blocks exist the last one wins.
//! Markup inside the block is a small tag/attribute tree. Recommendation
//! blocks are a delimited list of `rank | record_id` lines instead.

use super::{card, parse_number, ParsedFields, StructuredParser};
use crate::advisory::schema::{
    ExtractionSchema, FieldKind, FieldSpec, CARDS_FIELD, RECOMMENDATIONS_FIELD,
};
use crate::advisory::types::{ExtractionStrategy, RankedRecord, Value};
use html_escape::decode_html_entities;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

static TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"<(/)?([A-Za-z_][\w\-.]*)((?:\s+[\w\-:.]+\s*=\s*(?:"[^"]*"|'[^']*'))*)\s*(/)?>"#,
    )
    .expect("tag pattern is valid")
});

static ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([\w\-:.]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("attribute pattern is valid")
});

const NUMBER_ATTRS: &[&str] = &["value", "amount", "score"];
const FRONT_NAMES: &[&str] = &["front", "question", "q"];
const BACK_NAMES: &[&str] = &["back", "answer", "a"];

pub struct TaggedBlockParser;

impl StructuredParser for TaggedBlockParser {
    fn strategy(&self) -> ExtractionStrategy {
        ExtractionStrategy::TaggedBlock
    }

    fn parse(&self, text: &str, schema: &ExtractionSchema) -> Option<ParsedFields> {
        let inner = locate_block(text, schema.block_tag())?;
        let root = parse_elements(inner)?;
        let specs = schema.fields();

        let mut fields = BTreeMap::new();
        match schema {
            ExtractionSchema::RecommendationSet { .. } => {
                let records = ranked_records(&root);
                if !records.is_empty() {
                    fields.insert(RECOMMENDATIONS_FIELD.to_string(), Value::Ranked(records));
                }
            }
            ExtractionSchema::FlashcardSet { .. } => {
                let cards: Vec<_> = root
                    .children_named("card")
                    .filter_map(|el| card(&el.side(FRONT_NAMES), &el.side(BACK_NAMES)))
                    .collect();
                if !cards.is_empty() {
                    fields.insert(CARDS_FIELD.to_string(), Value::Cards(cards));
                }
            }
            ExtractionSchema::ProfileAnalysis | ExtractionSchema::CostBreakdown => {
                for spec in &specs {
                    if let Some(value) = root.find(spec.path).and_then(|el| field_value(el, spec)) {
                        fields.insert(spec.name.to_string(), value);
                    }
                }
            }
        }

        if fields.is_empty() {
            return None;
        }
        let confidence = 0.5 + 0.5 * fields.len() as f64 / specs.len().max(1) as f64;
        Some(ParsedFields { fields, confidence })
    }
}

/// Inner content of the last complete `<tag …>…</tag>` block
fn locate_block<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    // ASCII lowering keeps byte offsets aligned with `text`
    let lower = text.to_ascii_lowercase();
    let close_at = lower.rfind(&format!("</{}>", tag))?;
    let open = format!("<{}", tag);

    let mut search_end = close_at;
    loop {
        let open_at = lower[..search_end].rfind(&open)?;
        let after = open_at + open.len();
        match lower[after..].chars().next() {
            Some('>') => return Some(&text[after + 1..close_at]),
            Some(c) if c.is_whitespace() || c == '/' => {
                let gt = after + lower[after..close_at].find('>')?;
                return Some(&text[gt + 1..close_at]);
            }
            // Longer tag sharing the prefix, keep looking
            _ => search_end = open_at,
        }
    }
}

#[derive(Debug, Default)]
struct Element {
    name: String,
    attrs: BTreeMap<String, String>,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn new(name: &str, raw_attrs: &str) -> Self {
        let attrs = ATTR_RE
            .captures_iter(raw_attrs)
            .map(|caps| {
                let value = caps
                    .get(2)
                    .or_else(|| caps.get(3))
                    .map(|m| decode_entities(m.as_str()))
                    .unwrap_or_default();
                (caps[1].to_ascii_lowercase(), value)
            })
            .collect();
        Self {
            name: name.to_ascii_lowercase(),
            attrs,
            ..Default::default()
        }
    }

    fn children_named(&self, name: &'static str) -> impl Iterator<Item = &Element> + '_ {
        self.children.iter().filter(move |c| c.name == name)
    }

    fn find(&self, path: &[&str]) -> Option<&Element> {
        let mut el = self;
        for name in path {
            el = el.children.iter().find(|c| c.name == *name)?;
        }
        Some(el)
    }

    fn attr(&self, names: &[&str]) -> Option<&str> {
        names
            .iter()
            .find_map(|n| self.attrs.get(*n))
            .map(String::as_str)
    }

    /// Own and descendant text, whitespace-collapsed
    fn full_text(&self) -> String {
        let mut raw = String::new();
        self.collect_text(&mut raw);
        raw.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    fn collect_text(&self, out: &mut String) {
        out.push_str(&self.text);
        for child in &self.children {
            out.push(' ');
            child.collect_text(out);
        }
    }

    /// One side of a card: child element text, else attribute
    fn side(&self, names: &[&'static str]) -> String {
        names
            .iter()
            .find_map(|n| self.children_named(*n).next())
            .map(Element::full_text)
            .or_else(|| self.attr(names).map(str::to_string))
            .unwrap_or_default()
    }
}

/// Build the element tree; `None` on unbalanced markup
fn parse_elements(inner: &str) -> Option<Element> {
    let mut stack = vec![Element::default()];
    let mut last = 0;

    for caps in TAG_RE.captures_iter(inner) {
        let whole = caps.get(0)?;
        stack
            .last_mut()?
            .text
            .push_str(&decode_entities(&inner[last..whole.start()]));
        last = whole.end();

        let name = &caps[2];
        let closing = caps.get(1).is_some();
        let self_closing = caps.get(4).is_some();

        if closing {
            if stack.len() < 2 {
                return None;
            }
            let element = stack.pop()?;
            if !element.name.eq_ignore_ascii_case(name) {
                return None;
            }
            stack.last_mut()?.children.push(element);
        } else {
            let element = Element::new(name, caps.get(3).map_or("", |m| m.as_str()));
            if self_closing {
                stack.last_mut()?.children.push(element);
            } else {
                stack.push(element);
            }
        }
    }

    stack
        .last_mut()?
        .text
        .push_str(&decode_entities(&inner[last..]));

    if stack.len() != 1 {
        return None;
    }
    stack.pop()
}

fn field_value(el: &Element, spec: &FieldSpec) -> Option<Value> {
    match spec.kind {
        FieldKind::Number => el
            .attr(NUMBER_ATTRS)
            .and_then(parse_number)
            .or_else(|| parse_number(&el.full_text()))
            .map(Value::Number),
        FieldKind::Text => {
            let text = el.full_text();
            (!text.is_empty()).then_some(Value::Text(text))
        }
        FieldKind::List => {
            let items: Vec<String> = if el.children.is_empty() {
                el.text
                    .lines()
                    .map(|l| l.trim().trim_start_matches(['-', '*', '•']).trim().to_string())
                    .filter(|l| !l.is_empty())
                    .collect()
            } else {
                el.children
                    .iter()
                    .map(Element::full_text)
                    .filter(|t| !t.is_empty())
                    .collect()
            };
            (!items.is_empty()).then_some(Value::List(items))
        }
        FieldKind::Ranked | FieldKind::Cards => None,
    }
}

/// Raw recommendation references in block order
///
/// Accepts `<record id="…" rank="…"/>` elements, else `rank | id` (or
/// `id | rank`) lines. References are resolved against the catalog later.
fn ranked_records(root: &Element) -> Vec<RankedRecord> {
    let from_attrs: Vec<_> = root
        .children
        .iter()
        .filter_map(|el| {
            let id = el.attr(&["id", "record_id"])?.trim();
            let rank = el.attr(&["rank"]).and_then(|r| r.trim().parse().ok()).unwrap_or(0);
            (!id.is_empty()).then(|| RankedRecord {
                record_id: id.to_string(),
                rank,
            })
        })
        .collect();
    if !from_attrs.is_empty() {
        return from_attrs;
    }

    root.full_text_lines()
        .into_iter()
        .filter_map(|line| ranked_line(&line))
        .collect()
}

impl Element {
    /// Text lines of the element and its descendants, tags treated as line breaks
    fn full_text_lines(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.push_lines(&mut out);
        out
    }

    fn push_lines(&self, out: &mut Vec<String>) {
        out.extend(
            self.text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string),
        );
        for child in &self.children {
            child.push_lines(out);
        }
    }
}

fn ranked_line(line: &str) -> Option<RankedRecord> {
    let parts: Vec<&str> = line.split('|').map(str::trim).collect();
    let [first, second] = parts.as_slice() else {
        return None;
    };
    let rank_of = |s: &str| s.trim_end_matches(['.', ')']).trim_start_matches('#').parse::<u32>().ok();

    let (rank, id) = match (rank_of(*first), rank_of(*second)) {
        (Some(rank), _) => (rank, *second),
        (None, Some(rank)) => (rank, *first),
        (None, None) => return None,
    };
    (!id.is_empty()).then(|| RankedRecord {
        record_id: id.to_string(),
        rank,
    })
}

/// Named and numeric character references in text and attribute values
fn decode_entities(s: &str) -> String {
    decode_html_entities(s).into_owned()
}
