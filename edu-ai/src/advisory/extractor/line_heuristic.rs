//! Secondary parser: line-oriented heuristics over free prose
//!
//! Used only when no tagged block could be located. Recognizes
//! `Label: value` lines, bullet lists under a list label (or a markdown
//! heading), numbered lists of universities, and `Q:`/`A:` card pairs.

use super::{card, parse_number, ParsedFields, StructuredParser};
use crate::advisory::schema::{
    ExtractionSchema, FieldKind, FieldSpec, CARDS_FIELD, RECOMMENDATIONS_FIELD,
};
use crate::advisory::types::{ExtractionStrategy, FieldName, Flashcard, RankedRecord, Value};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

static NUMBERED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:#?(\d{1,3})[.):]\s+|(\d{1,3})\s*\|\s*|[-*•]\s+)(.+)$")
        .expect("numbered pattern is valid")
});

static BULLET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[-*•]|\d{1,2}[.)])\s+(.+)$").expect("bullet pattern is valid"));

static QUESTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:q|question|front)\s*\d*\s*[:.)]\s*(.+)$").expect("question pattern is valid")
});

static ANSWER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:a|answer|back)\s*\d*\s*[:.)]\s*(.+)$").expect("answer pattern is valid")
});

/// Separators after which a list entry carries commentary, not a name
const COMMENTARY_SEPARATORS: &[&str] = &[" - ", " – ", " — ", ": ", " ("];

/// Words that may precede a known label without changing its meaning
const LABEL_QUALIFIERS: &[&str] = &["annual", "yearly", "estimated", "expected", "average", "approximate"];

/// Labels longer than this are treated as prose, not a label
const MAX_LABEL_LEN: usize = 40;

pub struct LineHeuristicParser;

impl StructuredParser for LineHeuristicParser {
    fn strategy(&self) -> ExtractionStrategy {
        ExtractionStrategy::LineHeuristic
    }

    fn parse(&self, text: &str, schema: &ExtractionSchema) -> Option<ParsedFields> {
        let lines: Vec<String> = text.lines().map(clean_line).collect();
        let specs = schema.fields();

        let fields = match schema {
            ExtractionSchema::RecommendationSet { .. } => {
                let records = numbered_records(&lines);
                single(RECOMMENDATIONS_FIELD, (!records.is_empty()).then_some(Value::Ranked(records)))
            }
            ExtractionSchema::FlashcardSet { .. } => {
                let cards = qa_cards(&lines);
                single(CARDS_FIELD, (!cards.is_empty()).then_some(Value::Cards(cards)))
            }
            ExtractionSchema::ProfileAnalysis | ExtractionSchema::CostBreakdown => {
                labeled_fields(&lines, &specs)
            }
        };

        if fields.is_empty() {
            return None;
        }
        let confidence = 0.5 * fields.len() as f64 / specs.len().max(1) as f64;
        Some(ParsedFields { fields, confidence })
    }
}

fn single(name: &str, value: Option<Value>) -> BTreeMap<FieldName, Value> {
    value
        .map(|v| BTreeMap::from([(name.to_string(), v)]))
        .unwrap_or_default()
}

/// Trim and drop markdown emphasis
fn clean_line(line: &str) -> String {
    line.replace("**", "").replace("__", "").trim().to_string()
}

/// Split `Label: value` (or a `# Heading`) into a lower-case label and value
fn split_label(line: &str) -> Option<(String, &str)> {
    let (label, value) = match line.strip_prefix('#') {
        Some(heading) => (heading.trim_start_matches('#'), ""),
        None => {
            let body = line.trim_start_matches(['-', '*', '•']).trim_start();
            let (label, value) = body.split_once(':')?;
            (label, value)
        }
    };

    let label = label.trim().to_lowercase();
    if label.is_empty() || label.len() > MAX_LABEL_LEN {
        return None;
    }
    Some((label, value.trim()))
}

/// Exact label match first, then a qualified label (`annual tuition`)
fn match_label<'s>(label: &str, specs: &'s [FieldSpec]) -> Option<&'s FieldSpec> {
    let known = |label: &str| {
        specs
            .iter()
            .find(|spec| spec.labels.iter().any(|l| *l == label))
    };

    known(label).or_else(|| {
        let (qualifier, rest) = label.split_once(' ')?;
        LABEL_QUALIFIERS
            .contains(&qualifier)
            .then(|| known(rest.trim()))
            .flatten()
    })
}

fn labeled_fields(lines: &[String], specs: &[FieldSpec]) -> BTreeMap<FieldName, Value> {
    let mut fields = BTreeMap::new();

    for (i, line) in lines.iter().enumerate() {
        let Some((label, value)) = split_label(line) else {
            continue;
        };
        let Some(spec) = match_label(&label, specs) else {
            continue;
        };
        // First occurrence wins
        if fields.contains_key(spec.name) {
            continue;
        }

        let following = &lines[i + 1..];
        let located = match spec.kind {
            FieldKind::Number => parse_number(value).map(Value::Number),
            FieldKind::Text => {
                let text = if value.is_empty() {
                    paragraph_after(following, specs)
                } else {
                    value.to_string()
                };
                (!text.is_empty()).then_some(Value::Text(text))
            }
            FieldKind::List => {
                let mut items = bullets_after(following);
                if items.is_empty() && !value.is_empty() {
                    items = value
                        .split([';', ','])
                        .map(|s| s.trim().trim_end_matches('.').to_string())
                        .filter(|s| !s.is_empty())
                        .collect();
                }
                (!items.is_empty()).then_some(Value::List(items))
            }
            FieldKind::Ranked | FieldKind::Cards => None,
        };

        if let Some(value) = located {
            fields.insert(spec.name.to_string(), value);
        }
    }

    fields
}

/// Lines following a bare label, up to a blank line or the next label
fn paragraph_after(lines: &[String], specs: &[FieldSpec]) -> String {
    lines
        .iter()
        .skip_while(|l| l.is_empty())
        .take_while(|l| {
            !l.is_empty()
                && split_label(l)
                    .map(|(label, _)| match_label(&label, specs).is_none())
                    .unwrap_or(true)
        })
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Bullet items directly following a label
fn bullets_after(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .skip_while(|l| l.is_empty())
        .map_while(|l| BULLET_RE.captures(l).map(|c| c[1].trim().to_string()))
        .filter(|item| !item.is_empty())
        .collect()
}

/// Numbered, piped, or bulleted list entries, names stripped of commentary
fn numbered_records(lines: &[String]) -> Vec<RankedRecord> {
    let mut records = Vec::new();

    for line in lines {
        let Some(caps) = NUMBERED_RE.captures(line) else {
            continue;
        };
        let mut name = caps[3].trim();
        for sep in COMMENTARY_SEPARATORS {
            if let Some((head, _)) = name.split_once(sep) {
                name = head.trim();
            }
        }
        if name.is_empty() {
            continue;
        }

        let rank = caps
            .get(1)
            .or_else(|| caps.get(2))
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(records.len() as u32 + 1);
        records.push(RankedRecord {
            record_id: name.to_string(),
            rank,
        });
    }

    records
}

/// Alternating question/answer lines; an unanswered question is dropped
fn qa_cards(lines: &[String]) -> Vec<Flashcard> {
    let mut cards = Vec::new();
    let mut pending: Option<String> = None;

    for line in lines {
        if let Some(caps) = QUESTION_RE.captures(line) {
            pending = Some(caps[1].to_string());
        } else if let Some(caps) = ANSWER_RE.captures(line) {
            if let Some(front) = pending.take() {
                cards.extend(card(&front, &caps[1]));
            }
        }
    }

    cards
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str, schema: &ExtractionSchema) -> BTreeMap<FieldName, Value> {
        LineHeuristicParser
            .parse(text, schema)
            .map(|p| p.fields)
            .unwrap_or_default()
    }

    #[test]
    fn test_profile_labels_and_bullets() {
        let text = "**Strength Score:** 72/100\n\
            Summary: A well-rounded applicant.\n\
            \n\
            Key Strengths:\n\
            - Strong math grades\n\
            - Robotics captain\n\
            \n\
            ## Areas for Improvement\n\
            * Essay polish\n";
        let fields = parse(text, &ExtractionSchema::ProfileAnalysis);

        assert_eq!(fields["strength_score"], Value::Number(72.0));
        assert_eq!(fields["summary"], Value::Text("A well-rounded applicant.".into()));
        assert_eq!(
            fields["strengths"],
            Value::List(vec!["Strong math grades".into(), "Robotics captain".into()])
        );
        assert_eq!(fields["improvement_areas"], Value::List(vec!["Essay polish".into()]));
        assert!(!fields.contains_key("outlook"));
    }

    #[test]
    fn test_bare_label_takes_following_paragraph() {
        let text = "Outlook:\nCompetitive for tier 4\nschools.\n\nOther notes";
        let fields = parse(text, &ExtractionSchema::ProfileAnalysis);
        assert_eq!(
            fields["outlook"],
            Value::Text("Competitive for tier 4 schools.".into())
        );
    }

    #[test]
    fn test_inline_list_value() {
        let fields = parse("Weaknesses: test scores; essays", &ExtractionSchema::ProfileAnalysis);
        assert_eq!(
            fields["improvement_areas"],
            Value::List(vec!["test scores".into(), "essays".into()])
        );
    }

    #[test]
    fn test_cost_amounts_with_label_suffix() {
        let text = "- Annual tuition: $48,500\n- Housing: 14k\n- Health insurance: $2,300\n- Total: about $70,000";
        let fields = parse(text, &ExtractionSchema::CostBreakdown);

        assert_eq!(fields["tuition"], Value::Number(48_500.0));
        assert_eq!(fields["living.housing"], Value::Number(14_000.0));
        assert_eq!(fields["other.insurance"], Value::Number(2_300.0));
        assert_eq!(fields["total"], Value::Number(70_000.0));
    }

    #[test]
    fn test_numbered_recommendations_strip_commentary() {
        let text = "My picks:\n1. Stanford University - great CS\n2) **MIT** (reach)\n3 | ucla\n";
        let fields = parse(text, &ExtractionSchema::RecommendationSet { required: 3 });

        let Value::Ranked(records) = &fields[RECOMMENDATIONS_FIELD] else {
            panic!("expected ranked records");
        };
        let names: Vec<_> = records.iter().map(|r| r.record_id.as_str()).collect();
        assert_eq!(names, vec!["Stanford University", "MIT", "ucla"]);
    }

    #[test]
    fn test_question_answer_pairs() {
        let text = "Q1: What is the Common App?\nA1: A shared application.\n\
            Q: Orphan question\nQ: What is EA?\nA: Early action.\nA: stray answer";
        let fields = parse(text, &ExtractionSchema::FlashcardSet { max_cards: 10 });

        let Value::Cards(cards) = &fields[CARDS_FIELD] else {
            panic!("expected cards");
        };
        assert_eq!(cards.len(), 2);
        assert_eq!(cards[1].front, "What is EA?");
        assert_eq!(cards[1].back, "Early action.");
    }

    #[test]
    fn test_plain_prose_locates_nothing() {
        let text = "I think you will do great wherever you go.";
        assert!(LineHeuristicParser
            .parse(text, &ExtractionSchema::ProfileAnalysis)
            .is_none());
        assert!(LineHeuristicParser
            .parse(text, &ExtractionSchema::RecommendationSet { required: 3 })
            .is_none());
    }
}
