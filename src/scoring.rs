//! Environmental scoring of a single article by an LLM judge.
//!
//! The judge only answers yes/no per criterion; all arithmetic happens here:
//!
//! ```text
//! raw        = Σ points of applicable criteria
//! normalized = raw / max_points * 10        (0 when max_points == 0)
//! weighted   = normalized * weight
//! final      = Σ weighted over evaluated groups
//! ```

use crate::api::{AskAsync, JudgeReply, TokenUsage};
use crate::error::ScoringError;
use crate::utils::{looks_truncated, truncate_for_log};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use tracing::{info, instrument, warn};

static FENCED_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```(?:json)?\s*(\{[\s\S]*?\})\s*```").unwrap());

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Criterion {
    pub description: String,
    pub points: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CriteriaGroup {
    pub criteria: Vec<Criterion>,
    pub max_points: f64,
    pub weight: f64,
}

/// Scoring rubric. Groups are kept in name order.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Rubric {
    #[serde(default)]
    pub environmental: BTreeMap<String, CriteriaGroup>,
}

impl Rubric {
    pub fn from_json(contents: &str) -> Result<Self, ScoringError> {
        serde_json::from_str(contents).map_err(ScoringError::Criteria)
    }
}

/// The judge's verdicts, as parsed from its reply.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Evaluation {
    pub criteria_evaluation: BTreeMap<String, EvaluatedGroup>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EvaluatedGroup {
    #[serde(default)]
    pub items: Vec<EvaluatedItem>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EvaluatedItem {
    #[serde(default, deserialize_with = "lenient_bool")]
    pub applicable: bool,
}

/// Accepts `true`, `"true"`, `"TRUE"`; anything else is `false`.
fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Bool(b) => b,
        serde_json::Value::String(s) => s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemResult {
    pub description: String,
    pub points: f64,
    pub applicable: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupScore {
    pub name: String,
    pub raw_score: f64,
    pub max_points: f64,
    pub normalized: f64,
    pub weight: f64,
    pub weighted: f64,
    pub items: Vec<ItemResult>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreCard {
    pub groups: Vec<GroupScore>,
    pub final_score: f64,
}

/// Everything produced by one scoring call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArticleScore {
    pub card: ScoreCard,
    pub usage: Option<TokenUsage>,
    pub raw_response: String,
    /// Set when the reply could not be parsed; the card is then empty.
    pub parse_error: Option<String>,
}

impl ArticleScore {
    pub fn score(&self) -> f64 {
        self.card.final_score
    }
}

/// Build the judge prompt for `article`.
pub fn build_prompt(article: &str, rubric: &Rubric) -> String {
    let mut prompt = String::new();
    let _ = write!(
        prompt,
        "Ты — объективный оценщик новостных статей по экологическим критериям.\n\n\
         Твоя задача проанализировать следующую новостную статью и определить, \
         какие критерии соответствуют содержанию статьи.\n\n\
         ### Новостная статья:\n{article}\n\n\
         ### Инструкции по оценке:\n\
         1. Для КАЖДОГО критерия оцени, есть ли в статье доказательства того, что компания соответствует этому критерию.\n\
         2. Отвечай только \"true\" если критерий выполняется, или \"false\" если не выполняется.\n\
         3. Отсутствие явного упоминания о выполнении критерия означает, что критерий НЕ выполняется (false).\n\
         4. Оценивай СТРОГО по содержанию статьи, не делай предположений.\n\n\
         Оформи ответ в виде JSON-объекта с точной структурой:\n```json\n"
    );

    let groups: serde_json::Map<String, serde_json::Value> = rubric
        .environmental
        .iter()
        .map(|(name, group)| {
            let items: Vec<_> = group
                .criteria
                .iter()
                .map(|c| {
                    serde_json::json!({
                        "description": c.description,
                        "applicable": "true_or_false",
                    })
                })
                .collect();
            (name.clone(), serde_json::json!({ "items": items }))
        })
        .collect();
    let skeleton = serde_json::json!({ "criteria_evaluation": groups });
    let skeleton = serde_json::to_string_pretty(&skeleton).unwrap_or_default();
    prompt.push_str(&skeleton.replace("\"true_or_false\"", "true_or_false"));

    prompt.push_str(
        "\n```\n\n\
         ВАЖНЫЕ ИНСТРУКЦИИ:\n\
         1. Отвечай ТОЛЬКО true или false для поля \"applicable\" каждого критерия.\n\
         2. НЕ добавляй никаких объяснений, только JSON-объект.\n\
         3. НЕ пропускай критерии, каждый пункт должен иметь значение \"applicable\".\n\
         4. НЕ изменяй структуру и не добавляй поля в JSON-ответ.\n",
    );
    prompt
}

/// Locate and parse the evaluation object inside a free-form reply.
///
/// Tried in order: a fenced `json` block, the outermost braces of a reply
/// that mentions `criteria_evaluation`, the whole reply.
pub fn extract_evaluation(raw: &str) -> Result<Evaluation, ScoringError> {
    let candidate = if let Some(caps) = FENCED_JSON.captures(raw) {
        caps.get(1).map_or(raw, |m| m.as_str())
    } else if raw.contains("\"criteria_evaluation\"") {
        match (raw.find('{'), raw.rfind('}')) {
            (Some(start), Some(end)) if start < end => &raw[start..=end],
            _ => raw,
        }
    } else {
        raw.trim()
    };

    serde_json::from_str(candidate).map_err(|e| {
        if looks_truncated(&e) {
            warn!(error = %e, "Judge reply looks truncated; consider raising max_tokens");
        } else {
            warn!(error = %e, reply = %truncate_for_log(raw, 300), "Judge reply is not valid JSON");
        }
        ScoringError::Response(e)
    })
}

/// Turn verdicts into points. Items are matched to criteria by position.
pub fn calculate_scores(evaluation: &Evaluation, rubric: &Rubric) -> ScoreCard {
    let mut card = ScoreCard::default();

    for (name, group) in &rubric.environmental {
        let Some(evaluated) = evaluation.criteria_evaluation.get(name) else {
            continue;
        };

        let items: Vec<ItemResult> = evaluated
            .items
            .iter()
            .zip(&group.criteria)
            .map(|(verdict, criterion)| ItemResult {
                description: criterion.description.clone(),
                points: criterion.points,
                applicable: verdict.applicable,
            })
            .collect();

        let raw_score: f64 = items.iter().filter(|i| i.applicable).map(|i| i.points).sum();
        let normalized = if group.max_points > 0.0 {
            raw_score / group.max_points * 10.0
        } else {
            0.0
        };
        let weighted = normalized * group.weight;
        card.final_score += weighted;
        card.groups.push(GroupScore {
            name: name.clone(),
            raw_score,
            max_points: group.max_points,
            normalized,
            weight: group.weight,
            weighted,
            items,
        });
    }
    card
}

/// Ask `judge` about `article` and score the reply.
///
/// Only a failed LLM call is an error; an unparseable reply yields a zero
/// score with `parse_error` set.
#[instrument(level = "info", skip_all, fields(chars = article.len()))]
pub async fn score_article<J>(
    judge: &J,
    article: &str,
    rubric: &Rubric,
) -> Result<ArticleScore, ScoringError>
where
    J: AskAsync<Response = JudgeReply>,
{
    let reply = judge.ask(&build_prompt(article, rubric)).await?;

    let (card, parse_error) = match extract_evaluation(&reply.content) {
        Ok(evaluation) => (calculate_scores(&evaluation, rubric), None),
        Err(e) => (ScoreCard::default(), Some(e.to_string())),
    };
    info!(score = card.final_score, groups = card.groups.len(), "Scored article");

    Ok(ArticleScore {
        card,
        usage: reply.usage,
        raw_response: reply.content,
        parse_error,
    })
}

pub async fn load_criteria(path: &Path) -> Result<Rubric, ScoringError> {
    let contents = read_text(path).await?;
    Rubric::from_json(&contents)
}

pub async fn read_text(path: &Path) -> Result<String, ScoringError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ScoringError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// Human-readable report. `debug` appends the raw judge reply.
pub fn render_report(score: &ArticleScore, debug: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Environmental Score (0-10): {}", score.score());

    if let Some(reason) = &score.parse_error {
        let _ = writeln!(out, "\nError: failed to parse judge response: {reason}");
    }

    if !score.card.groups.is_empty() {
        out.push_str("\n--- DETAILED CRITERIA EVALUATION ---\n");
        for group in &score.card.groups {
            let _ = writeln!(out, "\n{}:", group.name.to_uppercase());
            let _ = writeln!(out, "  Raw Score: {} / {}", group.raw_score, group.max_points);
            let _ = writeln!(out, "  Normalized Score (0-10): {}", group.normalized);
            let _ = writeln!(out, "  Weight: {}", group.weight);
            let _ = writeln!(out, "  Weighted Score: {}", group.weighted);
            if !group.items.is_empty() {
                out.push_str("  Individual Criteria:\n");
                for item in &group.items {
                    let mark = if item.applicable { "✓" } else { "✗" };
                    let _ = writeln!(out, "    {mark} {} ({} points)", item.description, item.points);
                }
            }
        }

        out.push_str("\n--- SCORE CALCULATION ---\n");
        for group in &score.card.groups {
            let _ = writeln!(
                out,
                "  {}: {:.2} × {} = {:.2}",
                group.name, group.normalized, group.weight, group.weighted
            );
        }
        let _ = writeln!(out, "\nFINAL WEIGHTED SCORE (0-10): {}", score.score());
    }

    if let Some(usage) = &score.usage {
        out.push_str("\n--- TOKEN USAGE ---\n");
        let _ = writeln!(out, "  Prompt tokens: {}", usage.prompt_tokens);
        let _ = writeln!(out, "  Completion tokens: {}", usage.completion_tokens);
        let _ = writeln!(out, "  Total tokens: {}", usage.total_tokens);
    }

    if debug {
        let _ = write!(out, "\n--- RAW RESPONSE ---\n{}\n", score.raw_response);
    }
    out
}
