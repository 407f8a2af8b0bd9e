use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SurveyType {
    #[default]
    GeneralClimate,
    Microclimate,
    OrganizationalCulture,
    Custom,
}

impl SurveyType {
    pub fn parse(raw: &str) -> Option<SurveyType> {
        match raw {
            "general_climate" => Some(SurveyType::GeneralClimate),
            "microclimate" => Some(SurveyType::Microclimate),
            "organizational_culture" => Some(SurveyType::OrganizationalCulture),
            "custom" => Some(SurveyType::Custom),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SurveyType::GeneralClimate => "general_climate",
            SurveyType::Microclimate => "microclimate",
            SurveyType::OrganizationalCulture => "organizational_culture",
            SurveyType::Custom => "custom",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurveyStatus {
    Draft,
    Active,
    Paused,
    Completed,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    /// 1..=5 agreement scale.
    Likert,
    MultipleChoice,
    YesNo,
    /// 0..=10 scale.
    Rating,
    OpenEnded,
}

impl QuestionType {
    /// Bounds of numeric answers, used to normalize scores to 0..=100.
    pub fn scale(self) -> Option<(f64, f64)> {
        match self {
            QuestionType::Likert => Some((1.0, 5.0)),
            QuestionType::Rating => Some((0.0, 10.0)),
            _ => None,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    #[serde(default)]
    pub id: String,
    pub text: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveySettings {
    pub anonymous: bool,
    pub allow_partial_responses: bool,
}

impl Default for SurveySettings {
    fn default() -> Self {
        Self {
            anonymous: true,
            allow_partial_responses: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Survey {
    #[serde(rename = "_id")]
    pub id: String,
    pub company_id: String,
    pub title: String,
    pub description: Option<String>,
    #[serde(rename = "type", default)]
    pub survey_type: SurveyType,
    pub status: SurveyStatus,
    pub questions: Vec<Question>,
    #[serde(default)]
    pub target_departments: Vec<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub settings: SurveySettings,
    pub created_by: String,
    pub template_id: Option<String>,
    #[serde(default)]
    pub response_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub question_id: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveyResponse {
    #[serde(rename = "_id")]
    pub id: String,
    pub survey_id: String,
    pub company_id: String,
    /// Absent for anonymous surveys.
    pub user_id: Option<String>,
    pub respondent_hash: String,
    pub department_id: Option<String>,
    pub answers: Vec<Answer>,
    pub is_complete: bool,
    pub submitted_at: DateTime<Utc>,
}
