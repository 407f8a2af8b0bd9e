// Follow-up action plans under /api/action-plans.

use std::collections::HashSet;

use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use futures::stream::TryStreamExt;
use log::info;
use mongodb::bson::{doc, to_bson, Document};
use serde::Deserialize;
use serde_json::json;

use crate::action_plan_scoring::{
    apply_progress_update, assess, plan_progress, summarize, PlanAssessment,
};
use crate::app_state::AppState;
use crate::audit::{self, AuditEntry};
use crate::auth::AuthUser;
use crate::db::{ACTION_PLANS, SURVEYS};
use crate::error::{ApiError, ApiResult};
use crate::export::{csv_attachment, to_csv};
use crate::models::action_plan::{
    ActionPlan, ActionPlanStatus, Kpi, KpiUpdate, ObjectiveUpdate, Priority, ProgressUpdate,
    QualitativeObjective,
};
use crate::models::new_id;
use crate::models::user::Role;
use crate::query::{apply_search, Paging};

#[derive(Debug, Deserialize)]
pub struct ActionPlanListQuery {
    pub status: Option<String>,
    pub department_id: Option<String>,
    pub search: Option<String>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    pub status: Option<String>,
    pub department_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateActionPlanRequest {
    pub title: String,
    pub description: Option<String>,
    pub survey_id: Option<String>,
    pub department_id: Option<String>,
    #[serde(default)]
    pub kpis: Vec<Kpi>,
    #[serde(default)]
    pub qualitative_objectives: Vec<QualitativeObjective>,
    #[serde(default)]
    pub assigned_to: Vec<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub priority: Option<Priority>,
    pub company_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateActionPlanRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub department_id: Option<String>,
    pub kpis: Option<Vec<Kpi>>,
    pub qualitative_objectives: Option<Vec<QualitativeObjective>>,
    pub assigned_to: Option<Vec<String>>,
    pub due_date: Option<DateTime<Utc>>,
    pub priority: Option<Priority>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProgressRequest {
    pub notes: Option<String>,
    #[serde(default)]
    pub kpi_updates: Vec<KpiUpdate>,
    #[serde(default)]
    pub objective_updates: Vec<ObjectiveUpdate>,
}

/// Validates KPIs and objectives and fills in missing ids.
pub fn prepare_targets(
    kpis: &mut [Kpi],
    objectives: &mut [QualitativeObjective],
) -> Result<(), String> {
    let mut seen = HashSet::new();
    for kpi in kpis.iter_mut() {
        if kpi.name.trim().is_empty() {
            return Err("KPI name is required".to_string());
        }
        if kpi.target_value <= 0.0 {
            return Err(format!("KPI '{}' needs a target_value above 0", kpi.name));
        }
        if kpi.id.is_empty() {
            kpi.id = new_id();
        }
        if !seen.insert(kpi.id.clone()) {
            return Err(format!("Duplicate KPI id '{}'", kpi.id));
        }
    }
    for objective in objectives.iter_mut() {
        if objective.description.trim().is_empty() {
            return Err("Objective description is required".to_string());
        }
        if !(0.0..=100.0).contains(&objective.completion_percentage) {
            return Err(format!(
                "Completion percentage of '{}' must be between 0 and 100",
                objective.description
            ));
        }
        if objective.id.is_empty() {
            objective.id = new_id();
        }
        if !seen.insert(objective.id.clone()) {
            return Err(format!("Duplicate objective id '{}'", objective.id));
        }
    }
    Ok(())
}

/// Plans the caller may read: the whole company from leader up, otherwise only
/// plans assigned to them.
fn scope_filter(auth: &AuthUser) -> Document {
    let mut filter = auth.company_filter();
    if !auth.role.at_least(Role::Leader) {
        filter.insert("assigned_to", auth.user_id.as_str());
    }
    filter
}

async fn load_plan(data: &AppState, auth: &AuthUser, id: &str) -> ApiResult<ActionPlan> {
    let mut filter = scope_filter(auth);
    filter.insert("_id", id);
    data.mongodb
        .collection::<ActionPlan>(ACTION_PLANS)
        .find_one(filter)
        .await?
        .ok_or_else(|| ApiError::not_found("Action plan not found"))
}

fn parse_status(raw: &str) -> ApiResult<ActionPlanStatus> {
    ActionPlanStatus::parse(raw)
        .ok_or_else(|| ApiError::bad_request(format!("Unknown status '{}'", raw)))
}

async fn scoped_plans(
    data: &AppState,
    auth: &AuthUser,
    query: &ReportQuery,
) -> ApiResult<Vec<ActionPlan>> {
    let mut filter = scope_filter(auth);
    if let Some(raw) = &query.status {
        filter.insert("status", parse_status(raw)?.as_str());
    }
    if let Some(department_id) = &query.department_id {
        filter.insert("department_id", department_id);
    }
    Ok(data
        .mongodb
        .collection::<ActionPlan>(ACTION_PLANS)
        .find(filter)
        .sort(doc! { "due_date": 1 })
        .await?
        .try_collect()
        .await?)
}

/// GET /api/action-plans
pub async fn list_action_plans(
    auth: AuthUser,
    data: web::Data<AppState>,
    query: web::Query<ActionPlanListQuery>,
) -> ApiResult<HttpResponse> {
    let mut filter = scope_filter(&auth);
    if let Some(raw) = &query.status {
        filter.insert("status", parse_status(raw)?.as_str());
    }
    if let Some(department_id) = &query.department_id {
        filter.insert("department_id", department_id);
    }
    apply_search(&mut filter, query.search.as_deref(), &["title", "description"]);

    let paging = Paging::new(query.page, query.limit);
    let plans = data.mongodb.collection::<ActionPlan>(ACTION_PLANS);
    let total = plans.count_documents(filter.clone()).await?;
    let found: Vec<ActionPlan> = plans
        .find(filter)
        .sort(doc! { "due_date": 1 })
        .skip(paging.skip())
        .limit(paging.limit as i64)
        .await?
        .try_collect()
        .await?;
    let now = Utc::now();
    let action_plans: Vec<_> = found
        .iter()
        .map(|plan| {
            let assessment = assess(plan, now);
            json!({
                "plan": plan,
                "progress": assessment.progress,
                "risk_level": assessment.risk_level,
            })
        })
        .collect();
    Ok(HttpResponse::Ok().json(json!({
        "action_plans": action_plans,
        "pagination": paging.pagination(total),
    })))
}

/// POST /api/action-plans
pub async fn create_action_plan(
    auth: AuthUser,
    data: web::Data<AppState>,
    payload: web::Json<CreateActionPlanRequest>,
) -> ApiResult<HttpResponse> {
    auth.require(Role::Leader)?;
    let mut req = payload.into_inner();
    let title = req.title.trim().to_string();
    if title.is_empty() {
        return Err(ApiError::bad_request("Title is required"));
    }
    let due_date = req
        .due_date
        .ok_or_else(|| ApiError::bad_request("due_date is required"))?;
    prepare_targets(&mut req.kpis, &mut req.qualitative_objectives)
        .map_err(ApiError::BadRequest)?;
    let company_id = auth.resolve_company(req.company_id.as_deref())?;
    if let Some(survey_id) = &req.survey_id {
        let linked = data
            .mongodb
            .collection::<Document>(SURVEYS)
            .count_documents(doc! { "_id": survey_id, "company_id": &company_id })
            .await?;
        if linked == 0 {
            return Err(ApiError::bad_request("Linked survey does not exist"));
        }
    }

    let now = Utc::now();
    let plan = ActionPlan {
        id: new_id(),
        company_id,
        title,
        description: req.description,
        survey_id: req.survey_id,
        department_id: req.department_id,
        kpis: req.kpis,
        qualitative_objectives: req.qualitative_objectives,
        progress_updates: Vec::new(),
        assigned_to: req.assigned_to,
        due_date,
        priority: req.priority.unwrap_or_default(),
        status: ActionPlanStatus::NotStarted,
        created_by: auth.user_id.clone(),
        created_at: now,
        updated_at: now,
    };
    data.mongodb
        .collection::<ActionPlan>(ACTION_PLANS)
        .insert_one(&plan)
        .await?;
    info!("Action plan {} created by {}", plan.id, auth.user_id);
    audit::record(
        &data,
        &auth,
        AuditEntry::new("action_plan", &plan.id, "create")
            .company(Some(&plan.company_id))
            .after(&plan),
    )
    .await;
    Ok(HttpResponse::Created().json(plan))
}

/// GET /api/action-plans/{id}
pub async fn get_action_plan(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let plan = load_plan(&data, &auth, &path).await?;
    let assessment = assess(&plan, Utc::now());
    Ok(HttpResponse::Ok().json(json!({
        "plan": plan,
        "assessment": assessment,
    })))
}

/// PUT /api/action-plans/{id}
pub async fn update_action_plan(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateActionPlanRequest>,
) -> ApiResult<HttpResponse> {
    auth.require(Role::Leader)?;
    let existing = load_plan(&data, &auth, &path).await?;
    let req = payload.into_inner();

    let mut set_doc = Document::new();
    if let Some(title) = &req.title {
        let title = title.trim();
        if title.is_empty() {
            return Err(ApiError::bad_request("Title cannot be empty"));
        }
        set_doc.insert("title", title);
    }
    if let Some(description) = &req.description {
        set_doc.insert("description", description);
    }
    if let Some(department_id) = &req.department_id {
        set_doc.insert("department_id", department_id);
    }
    if req.kpis.is_some() || req.qualitative_objectives.is_some() {
        let mut kpis = req.kpis.clone().unwrap_or_else(|| existing.kpis.clone());
        let mut objectives = req
            .qualitative_objectives
            .clone()
            .unwrap_or_else(|| existing.qualitative_objectives.clone());
        prepare_targets(&mut kpis, &mut objectives).map_err(ApiError::BadRequest)?;
        set_doc.insert("kpis", to_bson(&kpis)?);
        set_doc.insert("qualitative_objectives", to_bson(&objectives)?);
    }
    if let Some(assigned_to) = &req.assigned_to {
        set_doc.insert("assigned_to", assigned_to.clone());
    }
    if let Some(due_date) = &req.due_date {
        set_doc.insert("due_date", to_bson(due_date)?);
    }
    if let Some(priority) = &req.priority {
        set_doc.insert("priority", to_bson(priority)?);
    }
    if let Some(raw) = &req.status {
        set_doc.insert("status", parse_status(raw)?.as_str());
    }
    if set_doc.is_empty() {
        return Err(ApiError::bad_request("No fields to update"));
    }
    set_doc.insert("updated_at", to_bson(&Utc::now())?);

    data.mongodb
        .collection::<ActionPlan>(ACTION_PLANS)
        .update_one(doc! { "_id": &existing.id }, doc! { "$set": set_doc })
        .await?;
    let updated = load_plan(&data, &auth, &existing.id).await?;
    audit::record(
        &data,
        &auth,
        AuditEntry::new("action_plan", &updated.id, "update")
            .company(Some(&updated.company_id))
            .before(&existing)
            .after(&updated),
    )
    .await;
    Ok(HttpResponse::Ok().json(updated))
}

/// DELETE /api/action-plans/{id}
pub async fn delete_action_plan(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    auth.require(Role::Leader)?;
    let existing = load_plan(&data, &auth, &path).await?;
    data.mongodb
        .collection::<ActionPlan>(ACTION_PLANS)
        .delete_one(doc! { "_id": &existing.id })
        .await?;
    audit::record(
        &data,
        &auth,
        AuditEntry::new("action_plan", &existing.id, "delete")
            .company(Some(&existing.company_id))
            .before(&existing),
    )
    .await;
    Ok(HttpResponse::Ok().json(json!({ "message": "Action plan deleted", "id": existing.id })))
}

/// POST /api/action-plans/{id}/progress
pub async fn record_progress(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<ProgressRequest>,
) -> ApiResult<HttpResponse> {
    // Readable means assigned or leader and above, which is who may report progress.
    let existing = load_plan(&data, &auth, &path).await?;
    let req = payload.into_inner();
    if req.kpi_updates.is_empty()
        && req.objective_updates.is_empty()
        && req.notes.as_deref().map_or(true, |n| n.trim().is_empty())
    {
        return Err(ApiError::bad_request("A progress update needs notes or values"));
    }

    let mut plan = existing.clone();
    let update = ProgressUpdate {
        id: new_id(),
        author_id: auth.user_id.clone(),
        notes: req.notes,
        kpi_updates: req.kpi_updates,
        objective_updates: req.objective_updates,
        created_at: Utc::now(),
    };
    apply_progress_update(&mut plan, update).map_err(ApiError::BadRequest)?;

    // Conditioning on the previous write time keeps concurrent updates from being lost.
    let previous = to_bson(&existing.updated_at)?;
    let result = data
        .mongodb
        .collection::<ActionPlan>(ACTION_PLANS)
        .replace_one(doc! { "_id": &plan.id, "updated_at": previous }, &plan)
        .await?;
    if result.matched_count == 0 {
        return Err(ApiError::Conflict(
            "Action plan changed concurrently; reload and retry".to_string(),
        ));
    }
    info!(
        "Progress recorded on action plan {} ({}%)",
        plan.id,
        plan_progress(&plan)
    );
    audit::record(
        &data,
        &auth,
        AuditEntry::new("action_plan", &plan.id, "progress_update")
            .company(Some(&plan.company_id))
            .before(&existing)
            .after(&plan),
    )
    .await;
    let assessment = assess(&plan, Utc::now());
    Ok(HttpResponse::Ok().json(json!({
        "plan": plan,
        "assessment": assessment,
    })))
}

/// GET /api/action-plans/report
pub async fn progress_report(
    auth: AuthUser,
    data: web::Data<AppState>,
    query: web::Query<ReportQuery>,
) -> ApiResult<HttpResponse> {
    let plans = scoped_plans(&data, &auth, &query).await?;
    let now = Utc::now();
    let assessments: Vec<PlanAssessment> = plans.iter().map(|p| assess(p, now)).collect();
    let summary = summarize(&assessments);
    Ok(HttpResponse::Ok().json(json!({
        "plans": assessments,
        "summary": summary,
        "generated_at": now,
    })))
}

pub fn report_csv(assessments: &[PlanAssessment]) -> String {
    let headers: Vec<String> = [
        "plan_id",
        "title",
        "status",
        "department_id",
        "due_date",
        "progress",
        "risk_level",
        "days_until_due",
        "days_since_update",
        "overdue",
    ]
    .iter()
    .map(|h| h.to_string())
    .collect();
    let rows: Vec<Vec<String>> = assessments
        .iter()
        .map(|a| {
            vec![
                a.plan_id.clone(),
                a.title.clone(),
                a.status.as_str().to_string(),
                a.department_id.clone().unwrap_or_default(),
                a.due_date.format("%Y-%m-%d").to_string(),
                format!("{:.1}", a.progress),
                a.risk_level.as_str().to_string(),
                a.days_until_due.to_string(),
                a.days_since_update.to_string(),
                a.overdue.to_string(),
            ]
        })
        .collect();
    to_csv(&headers, &rows)
}

/// GET /api/action-plans/export
pub async fn export_report(
    auth: AuthUser,
    data: web::Data<AppState>,
    query: web::Query<ReportQuery>,
) -> ApiResult<HttpResponse> {
    auth.require(Role::Leader)?;
    let plans = scoped_plans(&data, &auth, &query).await?;
    let now = Utc::now();
    let assessments: Vec<PlanAssessment> = plans.iter().map(|p| assess(p, now)).collect();
    Ok(csv_attachment(
        &format!("action-plans-{}.csv", now.format("%Y%m%d")),
        report_csv(&assessments),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action_plan_scoring::RiskLevel;
    use crate::test_support::{bearer, test_app};
    use actix_web::{http::StatusCode, test as actix_test};
    use chrono::Duration;

    fn kpi(name: &str, target: f64) -> Kpi {
        Kpi {
            id: String::new(),
            name: name.into(),
            current_value: 0.0,
            target_value: target,
            unit: None,
        }
    }

    fn objective(description: &str, pct: f64) -> QualitativeObjective {
        QualitativeObjective {
            id: String::new(),
            description: description.into(),
            completion_percentage: pct,
            status: Default::default(),
        }
    }

    #[test]
    fn targets_need_positive_goals_and_valid_percentages() {
        let mut kpis = vec![kpi("eNPS", 0.0)];
        assert!(prepare_targets(&mut kpis, &mut []).is_err());

        let mut objectives = vec![objective("Run workshops", 120.0)];
        assert!(prepare_targets(&mut [], &mut objectives).is_err());

        let mut kpis = vec![kpi("eNPS", 40.0)];
        let mut objectives = vec![objective("Run workshops", 10.0)];
        prepare_targets(&mut kpis, &mut objectives).unwrap();
        assert!(!kpis[0].id.is_empty());
        assert_ne!(kpis[0].id, objectives[0].id);
    }

    #[test]
    fn csv_report_row_matches_assessment() {
        let now = Utc::now();
        let assessment = PlanAssessment {
            plan_id: "p1".into(),
            title: "Reduce overtime".into(),
            status: ActionPlanStatus::InProgress,
            department_id: None,
            assigned_to: vec![],
            due_date: now - Duration::days(2),
            progress: 40.0,
            risk_level: RiskLevel::Critical,
            days_until_due: -2,
            days_since_update: 3,
            overdue: true,
        };
        let csv = report_csv(&[assessment]);
        let row = csv.lines().nth(1).unwrap();
        assert!(row.starts_with("p1,Reduce overtime,in_progress,,"));
        assert!(row.ends_with(",40.0,critical,-2,3,true"));
    }

    #[actix_web::test]
    async fn supervisors_cannot_create_plans() {
        let app = actix_test::init_service(test_app().await).await;
        let req = actix_test::TestRequest::post()
            .uri("/api/action-plans")
            .insert_header(bearer(Role::Supervisor, Some("c1")))
            .set_json(json!({ "title": "Fix onboarding", "due_date": Utc::now() }))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}
