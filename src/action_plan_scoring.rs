// Report-time progress and risk figures for action plans. Nothing here is persisted
// except through `apply_progress_update`, which mutates the plan the caller then saves.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::action_plan::{
    ActionPlan, ActionPlanStatus, Kpi, ObjectiveStatus, ProgressUpdate, QualitativeObjective,
};
use crate::survey_results::round1;

pub const STALE_UPDATE_DAYS: i64 = 14;
pub const QUIET_UPDATE_DAYS: i64 = 7;
pub const DUE_SOON_DAYS: i64 = 7;
pub const DUE_THIS_MONTH_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

pub fn kpi_progress(kpi: &Kpi) -> f64 {
    if kpi.target_value <= 0.0 {
        return 0.0;
    }
    (kpi.current_value / kpi.target_value * 100.0).clamp(0.0, 100.0)
}

pub fn objective_progress(objective: &QualitativeObjective) -> f64 {
    objective.completion_percentage.clamp(0.0, 100.0)
}

/// Unweighted mean over every KPI and objective, before rounding.
fn raw_progress(plan: &ActionPlan) -> f64 {
    let scores: Vec<f64> = plan
        .kpis
        .iter()
        .map(kpi_progress)
        .chain(plan.qualitative_objectives.iter().map(objective_progress))
        .collect();
    if scores.is_empty() {
        return 0.0;
    }
    scores.iter().sum::<f64>() / scores.len() as f64
}

/// Unweighted mean over every KPI and objective, rounded to one decimal.
pub fn plan_progress(plan: &ActionPlan) -> f64 {
    if plan.status == ActionPlanStatus::Completed {
        return 100.0;
    }
    round1(raw_progress(plan))
}

/// Whole days until the due date, negative once it has passed.
pub fn days_until_due(plan: &ActionPlan, now: DateTime<Utc>) -> i64 {
    (plan.due_date - now).num_seconds().div_euclid(86_400)
}

pub fn last_activity(plan: &ActionPlan) -> DateTime<Utc> {
    plan.progress_updates
        .iter()
        .map(|u| u.created_at)
        .max()
        .unwrap_or(plan.created_at)
}

pub fn days_since_update(plan: &ActionPlan, now: DateTime<Utc>) -> i64 {
    (now - last_activity(plan)).num_days().max(0)
}

#[derive(Debug, Clone, Copy)]
pub struct RiskInputs {
    pub progress: f64,
    pub days_until_due: i64,
    pub days_since_update: i64,
    pub closed: bool,
}

/// First matching row wins.
pub fn classify_risk(inputs: RiskInputs) -> RiskLevel {
    if inputs.closed {
        return RiskLevel::Low;
    }
    let overdue = inputs.days_until_due < 0;
    let stale = inputs.days_since_update >= STALE_UPDATE_DAYS;

    if overdue && (stale || inputs.progress < 50.0) {
        RiskLevel::Critical
    } else if overdue
        || (inputs.days_until_due <= DUE_SOON_DAYS && inputs.progress < 75.0)
        || stale
    {
        RiskLevel::High
    } else if (inputs.days_until_due <= DUE_THIS_MONTH_DAYS && inputs.progress < 50.0)
        || inputs.days_since_update >= QUIET_UPDATE_DAYS
    {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanAssessment {
    pub plan_id: String,
    pub title: String,
    pub status: ActionPlanStatus,
    pub department_id: Option<String>,
    pub assigned_to: Vec<String>,
    pub due_date: DateTime<Utc>,
    pub progress: f64,
    pub risk_level: RiskLevel,
    pub days_until_due: i64,
    pub days_since_update: i64,
    pub overdue: bool,
}

pub fn assess(plan: &ActionPlan, now: DateTime<Utc>) -> PlanAssessment {
    let progress = plan_progress(plan);
    let until_due = days_until_due(plan, now);
    let since_update = days_since_update(plan, now);
    let closed = plan.status.is_closed();
    PlanAssessment {
        plan_id: plan.id.clone(),
        title: plan.title.clone(),
        status: plan.status,
        department_id: plan.department_id.clone(),
        assigned_to: plan.assigned_to.clone(),
        due_date: plan.due_date,
        progress,
        risk_level: classify_risk(RiskInputs {
            progress,
            days_until_due: until_due,
            days_since_update: since_update,
            closed,
        }),
        days_until_due: until_due,
        days_since_update: since_update,
        overdue: !closed && until_due < 0,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_risk: BTreeMap<String, usize>,
    pub average_progress: f64,
    pub overdue: usize,
}

pub fn summarize(assessments: &[PlanAssessment]) -> ReportSummary {
    let mut by_status = BTreeMap::new();
    let mut by_risk = BTreeMap::new();
    for a in assessments {
        *by_status.entry(a.status.as_str().to_string()).or_insert(0) += 1;
        *by_risk.entry(a.risk_level.as_str().to_string()).or_insert(0) += 1;
    }
    let average_progress = if assessments.is_empty() {
        0.0
    } else {
        round1(assessments.iter().map(|a| a.progress).sum::<f64>() / assessments.len() as f64)
    };
    ReportSummary {
        total: assessments.len(),
        by_status,
        by_risk,
        average_progress,
        overdue: assessments.iter().filter(|a| a.overdue).count(),
    }
}

/// Applies a progress update to the plan: new KPI values, objective percentages, the
/// update log entry and the resulting status. Unknown ids reject the whole update.
pub fn apply_progress_update(plan: &mut ActionPlan, update: ProgressUpdate) -> Result<(), String> {
    if plan.status.is_closed() {
        return Err(format!(
            "Cannot record progress on a {} action plan",
            plan.status.as_str()
        ));
    }
    for ku in &update.kpi_updates {
        if !plan.kpis.iter().any(|k| k.id == ku.kpi_id) {
            return Err(format!("Unknown KPI '{}'", ku.kpi_id));
        }
    }
    for ou in &update.objective_updates {
        if !(0.0..=100.0).contains(&ou.completion_percentage) {
            return Err(format!(
                "Completion percentage for objective '{}' must be between 0 and 100",
                ou.objective_id
            ));
        }
        if !plan
            .qualitative_objectives
            .iter()
            .any(|o| o.id == ou.objective_id)
        {
            return Err(format!("Unknown objective '{}'", ou.objective_id));
        }
    }

    for ku in &update.kpi_updates {
        if let Some(kpi) = plan.kpis.iter_mut().find(|k| k.id == ku.kpi_id) {
            kpi.current_value = ku.current_value;
        }
    }
    for ou in &update.objective_updates {
        if let Some(obj) = plan
            .qualitative_objectives
            .iter_mut()
            .find(|o| o.id == ou.objective_id)
        {
            obj.completion_percentage = ou.completion_percentage;
            obj.status = if ou.completion_percentage >= 100.0 {
                ObjectiveStatus::Completed
            } else if ou.completion_percentage > 0.0 {
                ObjectiveStatus::InProgress
            } else {
                ObjectiveStatus::NotStarted
            };
        }
    }
    plan.updated_at = update.created_at;
    plan.progress_updates.push(update);

    if plan.status == ActionPlanStatus::NotStarted {
        plan.status = ActionPlanStatus::InProgress;
    }
    // Rounding must not complete a plan whose targets are not all met.
    if raw_progress(plan) >= 100.0 {
        plan.status = ActionPlanStatus::Completed;
    }
    Ok(())
}
