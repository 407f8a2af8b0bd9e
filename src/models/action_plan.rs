use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionPlanStatus {
    NotStarted,
    InProgress,
    OnHold,
    Completed,
    Cancelled,
}

impl ActionPlanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionPlanStatus::NotStarted => "not_started",
            ActionPlanStatus::InProgress => "in_progress",
            ActionPlanStatus::OnHold => "on_hold",
            ActionPlanStatus::Completed => "completed",
            ActionPlanStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "not_started" => Some(ActionPlanStatus::NotStarted),
            "in_progress" => Some(ActionPlanStatus::InProgress),
            "on_hold" => Some(ActionPlanStatus::OnHold),
            "completed" => Some(ActionPlanStatus::Completed),
            "cancelled" => Some(ActionPlanStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_closed(self) -> bool {
        matches!(self, ActionPlanStatus::Completed | ActionPlanStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Kpi {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub current_value: f64,
    pub target_value: f64,
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualitativeObjective {
    #[serde(default)]
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub completion_percentage: f64,
    #[serde(default)]
    pub status: ObjectiveStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KpiUpdate {
    pub kpi_id: String,
    pub current_value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectiveUpdate {
    pub objective_id: String,
    pub completion_percentage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub id: String,
    pub author_id: String,
    pub notes: Option<String>,
    #[serde(default)]
    pub kpi_updates: Vec<KpiUpdate>,
    #[serde(default)]
    pub objective_updates: Vec<ObjectiveUpdate>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionPlan {
    #[serde(rename = "_id")]
    pub id: String,
    pub company_id: String,
    pub title: String,
    pub description: Option<String>,
    pub survey_id: Option<String>,
    pub department_id: Option<String>,
    #[serde(default)]
    pub kpis: Vec<Kpi>,
    #[serde(default)]
    pub qualitative_objectives: Vec<QualitativeObjective>,
    #[serde(default)]
    pub progress_updates: Vec<ProgressUpdate>,
    #[serde(default)]
    pub assigned_to: Vec<String>,
    pub due_date: DateTime<Utc>,
    #[serde(default)]
    pub priority: Priority,
    pub status: ActionPlanStatus,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
