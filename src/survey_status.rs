// Survey lifecycle: which status changes are allowed, and the all-or-nothing check
// used by bulk operations.

use std::collections::HashMap;

use serde::Deserialize;

use crate::models::survey::{Survey, SurveyStatus};

impl SurveyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SurveyStatus::Draft => "draft",
            SurveyStatus::Active => "active",
            SurveyStatus::Paused => "paused",
            SurveyStatus::Completed => "completed",
            SurveyStatus::Archived => "archived",
        }
    }

    pub fn parse(raw: &str) -> Option<SurveyStatus> {
        match raw {
            "draft" => Some(SurveyStatus::Draft),
            "active" => Some(SurveyStatus::Active),
            "paused" => Some(SurveyStatus::Paused),
            "completed" => Some(SurveyStatus::Completed),
            "archived" => Some(SurveyStatus::Archived),
            _ => None,
        }
    }

    pub fn allowed_transitions(self) -> &'static [SurveyStatus] {
        use SurveyStatus::*;
        match self {
            Draft => &[Active, Archived],
            Active => &[Paused, Completed, Archived],
            Paused => &[Active, Completed, Archived],
            Completed => &[Archived],
            Archived => &[],
        }
    }
}

/// Checks a single status change, returning the message sent back with a 400.
pub fn validate_transition(from: SurveyStatus, to: SurveyStatus) -> Result<(), String> {
    let allowed = from.allowed_transitions();
    if allowed.contains(&to) {
        return Ok(());
    }
    let listed = if allowed.is_empty() {
        "none".to_string()
    } else {
        allowed
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };
    Err(format!(
        "Cannot transition survey from '{}' to '{}'. Allowed: {}",
        from.as_str(),
        to.as_str(),
        listed
    ))
}

/// Checks the preconditions for moving a concrete survey to `to`.
pub fn validate_survey_transition(survey: &Survey, to: SurveyStatus) -> Result<(), String> {
    validate_transition(survey.status, to)?;
    if to == SurveyStatus::Active && survey.questions.is_empty() {
        return Err("Cannot activate a survey without questions".to_string());
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkAction {
    Activate,
    Pause,
    Complete,
    Archive,
    Delete,
}

impl BulkAction {
    pub fn as_str(self) -> &'static str {
        match self {
            BulkAction::Activate => "activate",
            BulkAction::Pause => "pause",
            BulkAction::Complete => "complete",
            BulkAction::Archive => "archive",
            BulkAction::Delete => "delete",
        }
    }

    pub fn parse(raw: &str) -> Option<BulkAction> {
        match raw {
            "activate" => Some(BulkAction::Activate),
            "pause" => Some(BulkAction::Pause),
            "complete" => Some(BulkAction::Complete),
            "archive" => Some(BulkAction::Archive),
            "delete" => Some(BulkAction::Delete),
            _ => None,
        }
    }

    /// Status the surveys end up in; `None` for deletion.
    pub fn target_status(self) -> Option<SurveyStatus> {
        match self {
            BulkAction::Activate => Some(SurveyStatus::Active),
            BulkAction::Pause => Some(SurveyStatus::Paused),
            BulkAction::Complete => Some(SurveyStatus::Completed),
            BulkAction::Archive => Some(SurveyStatus::Archived),
            BulkAction::Delete => None,
        }
    }
}

/// Validates every requested survey before anything is written. Returns one message
/// per offending id; an empty list means the whole batch may proceed.
pub fn validate_bulk(action: BulkAction, requested: &[String], found: &[Survey]) -> Vec<String> {
    let by_id: HashMap<&str, &Survey> = found.iter().map(|s| (s.id.as_str(), s)).collect();
    let mut problems = Vec::new();

    for id in requested {
        let Some(survey) = by_id.get(id.as_str()) else {
            problems.push(format!("{}: survey not found", id));
            continue;
        };
        let outcome = match action.target_status() {
            Some(to) => validate_survey_transition(survey, to),
            None if survey.status == SurveyStatus::Draft => Ok(()),
            None => Err(format!(
                "only draft surveys can be deleted (status is '{}')",
                survey.status.as_str()
            )),
        };
        if let Err(reason) = outcome {
            problems.push(format!("{}: {}", id, reason));
        }
    }
    problems
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::survey::{Question, QuestionType, SurveySettings, SurveyType};
    use chrono::Utc;

    fn survey(id: &str, status: SurveyStatus) -> Survey {
        let now = Utc::now();
        Survey {
            id: id.into(),
            company_id: "c1".into(),
            title: "Climate".into(),
            description: None,
            survey_type: SurveyType::GeneralClimate,
            status,
            questions: vec![Question {
                id: "q1".into(),
                text: "I feel valued".into(),
                question_type: QuestionType::Likert,
                options: vec![],
                required: true,
                category: Some("recognition".into()),
            }],
            target_departments: vec![],
            start_date: None,
            end_date: None,
            settings: SurveySettings::default(),
            created_by: "u1".into(),
            template_id: None,
            response_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn draft_to_active_is_allowed() {
        assert!(validate_transition(SurveyStatus::Draft, SurveyStatus::Active).is_ok());
    }

    #[test]
    fn completed_to_active_is_rejected_with_explanation() {
        let err = validate_transition(SurveyStatus::Completed, SurveyStatus::Active).unwrap_err();
        assert_eq!(
            err,
            "Cannot transition survey from 'completed' to 'active'. Allowed: archived"
        );
    }

    #[test]
    fn archived_is_terminal() {
        let err = validate_transition(SurveyStatus::Archived, SurveyStatus::Draft).unwrap_err();
        assert!(err.ends_with("Allowed: none"));
    }

    #[test]
    fn activation_requires_questions() {
        let mut empty = survey("s1", SurveyStatus::Draft);
        empty.questions.clear();
        let err = validate_survey_transition(&empty, SurveyStatus::Active).unwrap_err();
        assert!(err.contains("without questions"));
    }

    #[test]
    fn bulk_delete_rejects_batch_containing_non_drafts() {
        let found = vec![
            survey("s1", SurveyStatus::Draft),
            survey("s2", SurveyStatus::Active),
        ];
        let ids = vec!["s1".to_string(), "s2".to_string()];
        let problems = validate_bulk(BulkAction::Delete, &ids, &found);
        assert_eq!(problems.len(), 1);
        assert!(problems[0].starts_with("s2:"));
    }

    #[test]
    fn bulk_reports_missing_ids() {
        let found = vec![survey("s1", SurveyStatus::Active)];
        let ids = vec!["s1".to_string(), "ghost".to_string()];
        let problems = validate_bulk(BulkAction::Pause, &ids, &found);
        assert_eq!(problems, vec!["ghost: survey not found".to_string()]);
    }

    #[test]
    fn bulk_archive_accepts_mixed_statuses() {
        let found = vec![
            survey("s1", SurveyStatus::Draft),
            survey("s2", SurveyStatus::Completed),
            survey("s3", SurveyStatus::Paused),
        ];
        let ids: Vec<String> = found.iter().map(|s| s.id.clone()).collect();
        assert!(validate_bulk(BulkAction::Archive, &ids, &found).is_empty());
    }
}
