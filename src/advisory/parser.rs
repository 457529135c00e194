//! Defensive extraction of recommendations from advisory response text
//!
//! The payload is written by a language model, so it may arrive wrapped in
//! prose, fenced as markdown, or with trailing commas. Extraction tries, in
//! order: the whole text, the text inside a surrounding code fence, the first
//! embedded JSON payload, then all of those again after trailing-comma repair.

use crate::models::{Decision, Provenance, Recommendation, RecommendationSet};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

/// Recommendations recovered from one response
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedAdvice {
    pub analysis: Option<String>,
    pub recommendations: Vec<Recommendation>,
}

impl ParsedAdvice {
    pub fn into_set(self, created_at: DateTime<Utc>) -> RecommendationSet {
        RecommendationSet::new(self.recommendations, created_at, Provenance::Live)
            .with_analysis(self.analysis)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseFailure {
    #[error("advisory response is empty")]
    Empty,
    #[error("no JSON recommendation payload found in advisory response")]
    NoPayload,
}

/// Parse an advisory response; never panics, whatever the input
pub fn parse(text: &str) -> Result<ParsedAdvice, ParseFailure> {
    if text.trim().is_empty() {
        return Err(ParseFailure::Empty);
    }

    let (analysis, elements) = extract(text)
        .or_else(|| {
            let repaired = remove_trailing_commas(text);
            let found = extract(&repaired);
            if found.is_some() {
                tracing::debug!("Advisory response parsed after trailing-comma repair");
            }
            found
        })
        .ok_or(ParseFailure::NoPayload)?;

    let total = elements.len();
    let recommendations: Vec<Recommendation> = elements
        .iter()
        .filter_map(Value::as_object)
        .filter_map(validate)
        .collect();

    if recommendations.len() < total {
        tracing::warn!(
            dropped = total - recommendations.len(),
            "Dropped advisory entries without an asset identifier"
        );
    }

    Ok(ParsedAdvice {
        analysis,
        recommendations,
    })
}

type Payload = (Option<String>, Vec<Value>);

fn extract(text: &str) -> Option<Payload> {
    parse_whole(text)
        .or_else(|| strip_code_fence(text).and_then(parse_whole))
        .or_else(|| search_embedded(text))
}

fn parse_whole(text: &str) -> Option<Payload> {
    let value: Value = serde_json::from_str(text.trim()).ok()?;
    payload_shape(value)
}

/// Accept `[{...}, ...]` or `{"analysis": "...", "recommendations": [...]}`
fn payload_shape(value: Value) -> Option<Payload> {
    match value {
        Value::Array(items) if items.is_empty() || items.iter().any(Value::is_object) => {
            Some((None, items))
        }
        Value::Object(mut map) => {
            let items = match map.remove("recommendations")? {
                Value::Array(items) => items,
                _ => return None,
            };
            let analysis = map
                .remove("analysis")
                .and_then(|a| a.as_str().map(|s| s.trim().to_string()))
                .filter(|s| !s.is_empty());
            Some((analysis, items))
        }
        _ => None,
    }
}

/// Body of a code fence wrapping the whole text, with an optional `json` tag
fn strip_code_fence(text: &str) -> Option<&str> {
    let body = text.trim().strip_prefix("```")?.strip_suffix("```")?;
    let body = body
        .strip_prefix("json")
        .or_else(|| body.strip_prefix("JSON"))
        .unwrap_or(body);
    Some(body.trim())
}

/// First JSON payload embedded in surrounding text
///
/// Candidates start at an array opening on an object (`[` then `{`) or at an
/// object; the value is read with a streaming deserializer so anything after
/// it is ignored.
fn search_embedded(text: &str) -> Option<Payload> {
    text.char_indices()
        .filter(|&(i, c)| match c {
            '[' => text[i + 1..].trim_start().starts_with('{'),
            '{' => true,
            _ => false,
        })
        .find_map(|(i, _)| {
            let value = serde_json::Deserializer::from_str(&text[i..])
                .into_iter::<Value>()
                .next()?
                .ok()?;
            payload_shape(value)
        })
}

/// Drop commas that directly precede `}` or `]`, leaving string contents alone
fn remove_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }

    out
}

fn validate(entry: &Map<String, Value>) -> Option<Recommendation> {
    let pair = ["pair", "symbol", "asset"]
        .iter()
        .filter_map(|key| entry.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())?
        .to_string();

    let decision = match entry.get("decision").and_then(Value::as_str) {
        Some(raw) => Decision::parse_lenient(raw).unwrap_or_else(|| {
            tracing::warn!(pair = %pair, decision = raw, "Unknown advisory decision, using hold");
            Decision::Hold
        }),
        None => Decision::Hold,
    };

    let percentage = |key: &str| number(entry.get(key)).map_or(0.0, |p| p.clamp(0.0, 100.0));
    let (buy_percentage, sell_percentage) = match decision {
        Decision::Buy => (percentage("buy_percentage"), 0.0),
        Decision::Sell => (0.0, percentage("sell_percentage")),
        Decision::Hold => (0.0, 0.0),
    };

    Some(Recommendation {
        pair,
        decision,
        buy_percentage,
        sell_percentage,
        buy_amount: number(entry.get("buy_amount")).filter(|a| *a >= 0.0),
        reason: entry
            .get("reason")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        confidence: number(entry.get("confidence")).map(|c| c.clamp(0.0, 1.0)),
    })
}

/// Numeric field, accepting numbers and numeric strings such as `"12.5%"`
fn number(value: Option<&Value>) -> Option<f64> {
    let n = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}
