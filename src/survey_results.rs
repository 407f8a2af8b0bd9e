// Folds stored answers into per-question, per-category and overall figures. Surveys,
// microclimates and benchmark comparisons all read their numbers from here.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::models::survey::{Answer, Question, QuestionType};

pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[derive(Debug, Clone, Serialize)]
pub struct QuestionResult {
    pub question_id: String,
    pub text: String,
    pub question_type: QuestionType,
    pub category: Option<String>,
    pub response_count: usize,
    /// Mean of numeric answers on the question's own scale.
    pub average: Option<f64>,
    /// Score on 0..=100, for numeric and yes/no questions.
    pub score: Option<f64>,
    pub distribution: BTreeMap<String, usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub text_answers: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryScore {
    pub category: String,
    pub score: f64,
    pub question_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultsSummary {
    pub total_responses: usize,
    pub questions: Vec<QuestionResult>,
    pub category_scores: Vec<CategoryScore>,
    pub overall_score: Option<f64>,
}

fn distribution_key(value: &Value) -> String {
    match value {
        Value::Bool(true) => "yes".to_string(),
        Value::Bool(false) => "no".to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn question_result(question: &Question, values: &[&Value]) -> QuestionResult {
    let mut distribution = BTreeMap::new();
    let mut text_answers = Vec::new();

    if question.question_type == QuestionType::OpenEnded {
        text_answers = values
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect();
    } else {
        for v in values {
            *distribution.entry(distribution_key(v)).or_insert(0) += 1;
        }
    }

    let (average, score) = match question.question_type.scale() {
        Some((min, max)) => {
            let nums: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
            if nums.is_empty() {
                (None, None)
            } else {
                let avg = nums.iter().sum::<f64>() / nums.len() as f64;
                (Some(round1(avg)), Some(round1((avg - min) / (max - min) * 100.0)))
            }
        }
        None if question.question_type == QuestionType::YesNo => {
            let bools: Vec<bool> = values.iter().filter_map(|v| v.as_bool()).collect();
            if bools.is_empty() {
                (None, None)
            } else {
                let yes = bools.iter().filter(|b| **b).count() as f64;
                (None, Some(round1(yes / bools.len() as f64 * 100.0)))
            }
        }
        None => (None, None),
    };

    QuestionResult {
        question_id: question.id.clone(),
        text: question.text.clone(),
        question_type: question.question_type,
        category: question.category.clone(),
        response_count: values.len(),
        average,
        score,
        distribution,
        text_answers,
    }
}

/// Aggregates answer sets (one per response) against the question list. Answers to
/// unknown questions are ignored.
pub fn aggregate<'a, I>(questions: &[Question], responses: I) -> ResultsSummary
where
    I: IntoIterator<Item = &'a [Answer]>,
{
    let mut values: BTreeMap<&str, Vec<&'a Value>> = BTreeMap::new();
    let mut total_responses = 0;
    for answers in responses {
        total_responses += 1;
        for answer in answers {
            values
                .entry(answer.question_id.as_str())
                .or_default()
                .push(&answer.value);
        }
    }

    let results: Vec<QuestionResult> = questions
        .iter()
        .map(|q| {
            let vals = values.get(q.id.as_str()).map(Vec::as_slice).unwrap_or(&[]);
            question_result(q, vals)
        })
        .collect();

    let mut by_category: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for r in &results {
        if let (Some(category), Some(score)) = (&r.category, r.score) {
            by_category.entry(category.clone()).or_default().push(score);
        }
    }
    let category_scores: Vec<CategoryScore> = by_category
        .into_iter()
        .map(|(category, scores)| CategoryScore {
            category,
            score: round1(scores.iter().sum::<f64>() / scores.len() as f64),
            question_count: scores.len(),
        })
        .collect();

    let scored: Vec<f64> = results.iter().filter_map(|r| r.score).collect();
    let overall_score = if scored.is_empty() {
        None
    } else {
        Some(round1(scored.iter().sum::<f64>() / scored.len() as f64))
    };

    ResultsSummary {
        total_responses,
        questions: results,
        category_scores,
        overall_score,
    }
}

/// Share of the audience that responded, as a percentage.
pub fn response_rate(responses: u64, audience: u64) -> f64 {
    if audience == 0 {
        return 0.0;
    }
    round1((responses as f64 / audience as f64 * 100.0).min(100.0))
}
