use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::survey::{Answer, Question};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MicroclimateStatus {
    Draft,
    Scheduled,
    Active,
    Paused,
    Completed,
    Cancelled,
}

impl MicroclimateStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MicroclimateStatus::Draft => "draft",
            MicroclimateStatus::Scheduled => "scheduled",
            MicroclimateStatus::Active => "active",
            MicroclimateStatus::Paused => "paused",
            MicroclimateStatus::Completed => "completed",
            MicroclimateStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "draft" => Some(MicroclimateStatus::Draft),
            "scheduled" => Some(MicroclimateStatus::Scheduled),
            "active" => Some(MicroclimateStatus::Active),
            "paused" => Some(MicroclimateStatus::Paused),
            "completed" => Some(MicroclimateStatus::Completed),
            "cancelled" => Some(MicroclimateStatus::Cancelled),
            _ => None,
        }
    }

    pub fn allowed_transitions(self) -> &'static [MicroclimateStatus] {
        use MicroclimateStatus::*;
        match self {
            Draft => &[Scheduled, Active, Cancelled],
            Scheduled => &[Active, Cancelled],
            Active => &[Paused, Completed, Cancelled],
            Paused => &[Active, Completed, Cancelled],
            Completed | Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, next: MicroclimateStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    pub fn is_editable(self) -> bool {
        matches!(self, MicroclimateStatus::Draft | MicroclimateStatus::Scheduled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MicroclimateSettings {
    pub anonymous: bool,
    pub show_live_results: bool,
    pub max_responses: Option<i64>,
}

impl Default for MicroclimateSettings {
    fn default() -> Self {
        Self {
            anonymous: true,
            show_live_results: true,
            max_responses: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Microclimate {
    #[serde(rename = "_id")]
    pub id: String,
    pub company_id: String,
    pub title: String,
    pub description: Option<String>,
    pub questions: Vec<Question>,
    #[serde(default)]
    pub target_departments: Vec<String>,
    #[serde(default)]
    pub target_users: Vec<String>,
    #[serde(default)]
    pub settings: MicroclimateSettings,
    pub start_time: Option<DateTime<Utc>>,
    pub duration_minutes: i64,
    pub status: MicroclimateStatus,
    #[serde(default)]
    pub response_count: i64,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Microclimate {
    pub fn ends_at(&self) -> Option<DateTime<Utc>> {
        self.start_time
            .map(|start| start + Duration::minutes(self.duration_minutes))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.ends_at().map(|end| now > end).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MicroclimateResponse {
    #[serde(rename = "_id")]
    pub id: String,
    pub microclimate_id: String,
    pub company_id: String,
    pub user_id: Option<String>,
    pub respondent_hash: String,
    pub department_id: Option<String>,
    pub answers: Vec<Answer>,
    pub submitted_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finished_sessions_are_terminal() {
        for next in [
            MicroclimateStatus::Draft,
            MicroclimateStatus::Active,
            MicroclimateStatus::Paused,
        ] {
            assert!(!MicroclimateStatus::Completed.can_transition_to(next));
            assert!(!MicroclimateStatus::Cancelled.can_transition_to(next));
        }
    }

    #[test]
    fn pause_and_resume_are_allowed() {
        assert!(MicroclimateStatus::Active.can_transition_to(MicroclimateStatus::Paused));
        assert!(MicroclimateStatus::Paused.can_transition_to(MicroclimateStatus::Active));
        assert!(!MicroclimateStatus::Scheduled.can_transition_to(MicroclimateStatus::Paused));
    }

    #[test]
    fn expiry_follows_start_plus_duration() {
        let start = Utc::now() - Duration::minutes(30);
        let mut session = Microclimate {
            id: "m1".into(),
            company_id: "c1".into(),
            title: "Pulse".into(),
            description: None,
            questions: vec![],
            target_departments: vec![],
            target_users: vec![],
            settings: MicroclimateSettings::default(),
            start_time: Some(start),
            duration_minutes: 15,
            status: MicroclimateStatus::Active,
            response_count: 0,
            created_by: "u1".into(),
            created_at: start,
            updated_at: start,
        };
        assert!(session.is_expired(Utc::now()));
        session.duration_minutes = 60;
        assert!(!session.is_expired(Utc::now()));
        session.start_time = None;
        assert!(!session.is_expired(Utc::now()));
    }
}
