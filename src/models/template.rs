use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::survey::Question;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveyTemplate {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub questions: Vec<Question>,
    pub is_public: bool,
    /// Private templates belong to one company.
    pub company_id: Option<String>,
    #[serde(default)]
    pub usage_count: i64,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
