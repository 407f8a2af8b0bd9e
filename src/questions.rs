// Authoring checks for question lists and per-type validation of submitted answers.
// Shared by surveys, templates and microclimates.

use std::collections::HashSet;

use serde_json::Value;

use crate::models::new_id;
use crate::models::survey::{Answer, Question, QuestionType};

pub const MAX_OPEN_ENDED_CHARS: usize = 5000;

/// Normalizes a question list in place: trims text, assigns missing ids and checks
/// that each question is answerable.
pub fn prepare_questions(questions: &mut [Question]) -> Result<(), String> {
    let mut seen = HashSet::new();
    for (index, q) in questions.iter_mut().enumerate() {
        q.text = q.text.trim().to_string();
        if q.text.is_empty() {
            return Err(format!("Question {} has no text", index + 1));
        }
        if q.id.trim().is_empty() {
            q.id = new_id();
        }
        if !seen.insert(q.id.clone()) {
            return Err(format!("Duplicate question id '{}'", q.id));
        }
        match q.question_type {
            QuestionType::MultipleChoice => {
                q.options.retain(|o| !o.trim().is_empty());
                if q.options.len() < 2 {
                    return Err(format!(
                        "Multiple choice question '{}' needs at least two options",
                        q.text
                    ));
                }
            }
            _ => q.options.clear(),
        }
    }
    Ok(())
}

fn as_whole_number(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        _ => None,
    }
}

fn check_value(question: &Question, value: &Value) -> Result<(), String> {
    let ok = match question.question_type {
        QuestionType::Likert => as_whole_number(value).is_some_and(|v| (1..=5).contains(&v)),
        QuestionType::Rating => as_whole_number(value).is_some_and(|v| (0..=10).contains(&v)),
        QuestionType::YesNo => value.is_boolean(),
        QuestionType::MultipleChoice => value
            .as_str()
            .is_some_and(|choice| question.options.iter().any(|o| o == choice)),
        QuestionType::OpenEnded => {
            return match value.as_str() {
                Some(text) if text.chars().count() <= MAX_OPEN_ENDED_CHARS => Ok(()),
                Some(_) => Err(format!(
                    "Answer to '{}' exceeds {} characters",
                    question.text, MAX_OPEN_ENDED_CHARS
                )),
                None => Err(format!("Answer to '{}' must be text", question.text)),
            }
        }
    };
    if ok {
        Ok(())
    } else {
        Err(format!("Invalid answer for question '{}'", question.text))
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Validates answers against the question list. Blank answers are dropped. Returns
/// the cleaned answers and whether every question got one.
pub fn validate_answers(
    questions: &[Question],
    answers: Vec<Answer>,
    allow_partial: bool,
) -> Result<(Vec<Answer>, bool), String> {
    let mut answered = HashSet::new();
    let mut cleaned = Vec::with_capacity(answers.len());

    for answer in answers {
        let Some(question) = questions.iter().find(|q| q.id == answer.question_id) else {
            return Err(format!("Unknown question '{}'", answer.question_id));
        };
        if is_blank(&answer.value) {
            continue;
        }
        if !answered.insert(answer.question_id.clone()) {
            return Err(format!("Question '{}' answered more than once", question.text));
        }
        check_value(question, &answer.value)?;
        cleaned.push(answer);
    }

    if !allow_partial {
        if let Some(missing) = questions
            .iter()
            .find(|q| q.required && !answered.contains(&q.id))
        {
            return Err(format!("Question '{}' is required", missing.text));
        }
    }
    if cleaned.is_empty() {
        return Err("At least one answer is required".to_string());
    }
    let complete = questions.iter().all(|q| answered.contains(&q.id));
    Ok((cleaned, complete))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn q(id: &str, kind: QuestionType, options: &[&str], required: bool) -> Question {
        Question {
            id: id.into(),
            text: format!("question {id}"),
            question_type: kind,
            options: options.iter().map(|o| o.to_string()).collect(),
            required,
            category: None,
        }
    }

    fn a(id: &str, value: Value) -> Answer {
        Answer {
            question_id: id.into(),
            value,
        }
    }

    fn survey_questions() -> Vec<Question> {
        vec![
            q("q1", QuestionType::Likert, &[], true),
            q("q2", QuestionType::MultipleChoice, &["Remote", "Office"], true),
            q("q3", QuestionType::OpenEnded, &[], false),
        ]
    }

    #[test]
    fn prepare_assigns_ids_and_rejects_thin_choices() {
        let mut qs = vec![q("", QuestionType::Likert, &["stray"], true)];
        prepare_questions(&mut qs).unwrap();
        assert!(!qs[0].id.is_empty());
        assert!(qs[0].options.is_empty());

        let mut bad = vec![q("q1", QuestionType::MultipleChoice, &["only", " "], true)];
        assert!(prepare_questions(&mut bad).is_err());
    }

    #[test]
    fn prepare_rejects_duplicate_ids() {
        let mut qs = vec![
            q("q1", QuestionType::Likert, &[], true),
            q("q1", QuestionType::Rating, &[], true),
        ];
        assert!(prepare_questions(&mut qs).unwrap_err().contains("Duplicate"));
    }

    #[test]
    fn accepts_complete_valid_submission() {
        let (answers, complete) = validate_answers(
            &survey_questions(),
            vec![
                a("q1", json!(4)),
                a("q2", json!("Remote")),
                a("q3", json!("More feedback please")),
            ],
            false,
        )
        .unwrap();
        assert_eq!(answers.len(), 3);
        assert!(complete);
    }

    #[test]
    fn optional_question_may_be_skipped() {
        let (_, complete) = validate_answers(
            &survey_questions(),
            vec![a("q1", json!(5.0)), a("q2", json!("Office")), a("q3", json!(""))],
            false,
        )
        .unwrap();
        assert!(!complete);
    }

    #[test]
    fn rejects_out_of_range_and_foreign_values() {
        let qs = survey_questions();
        assert!(validate_answers(&qs, vec![a("q1", json!(6)), a("q2", json!("Remote"))], false).is_err());
        assert!(validate_answers(&qs, vec![a("q1", json!(2.5)), a("q2", json!("Remote"))], false).is_err());
        assert!(validate_answers(&qs, vec![a("q1", json!(3)), a("q2", json!("Hybrid"))], false).is_err());
        assert!(validate_answers(&qs, vec![a("zz", json!(3))], true).is_err());
    }

    #[test]
    fn missing_required_only_allowed_for_partial_surveys() {
        let qs = survey_questions();
        let err = validate_answers(&qs, vec![a("q1", json!(3))], false).unwrap_err();
        assert!(err.contains("required"));
        let (_, complete) = validate_answers(&qs, vec![a("q1", json!(3))], true).unwrap();
        assert!(!complete);
    }

    #[test]
    fn rating_and_yes_no_types() {
        let qs = vec![
            q("nps", QuestionType::Rating, &[], true),
            q("yn", QuestionType::YesNo, &[], true),
        ];
        assert!(validate_answers(&qs, vec![a("nps", json!(0)), a("yn", json!(true))], false).is_ok());
        assert!(validate_answers(&qs, vec![a("nps", json!(11)), a("yn", json!(true))], false).is_err());
        assert!(validate_answers(&qs, vec![a("nps", json!(7)), a("yn", json!("yes"))], false).is_err());
    }
}
