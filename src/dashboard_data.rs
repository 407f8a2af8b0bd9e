// Role-specific landing data under /api/dashboard.

use actix_web::{web, HttpResponse};
use futures::stream::TryStreamExt;
use mongodb::bson::{doc, Document};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::app_state::AppState;
use crate::auth::{current_user, AuthUser};
use crate::db::{
    ACTION_PLANS, AUDIT_LOGS, COMPANIES, MICROCLIMATES, RESPONSES, SURVEYS, USERS,
};
use crate::error::ApiResult;
use crate::microclimate::audience_clause;
use crate::models::action_plan::{ActionPlan, ActionPlanStatus};
use crate::models::audit_log::AuditLog;
use crate::models::microclimate::{Microclimate, MicroclimateStatus};
use crate::models::survey::{Survey, SurveyResponse, SurveyStatus};
use crate::models::user::{Role, UserStatus};
use crate::survey_response::respondent_hash;
use crate::survey_results::{response_rate, round1};

const RECENT_SURVEYS: i64 = 5;
const RECENT_ACTIVITY: i64 = 10;

#[derive(Debug, Deserialize)]
pub struct DashboardQuery {
    pub company_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ParticipationMetrics {
    pub total_employees: u64,
    pub active_surveys: usize,
    pub total_responses: i64,
    pub average_response_rate: f64,
}

/// Response rates are averaged over surveys that have been launched.
pub fn participation_metrics(total_employees: u64, surveys: &[Survey]) -> ParticipationMetrics {
    let launched: Vec<&Survey> = surveys
        .iter()
        .filter(|s| s.status != SurveyStatus::Draft)
        .collect();
    let average_response_rate = if launched.is_empty() {
        0.0
    } else {
        round1(
            launched
                .iter()
                .map(|s| response_rate(s.response_count.max(0) as u64, total_employees))
                .sum::<f64>()
                / launched.len() as f64,
        )
    };
    ParticipationMetrics {
        total_employees,
        active_surveys: surveys
            .iter()
            .filter(|s| s.status == SurveyStatus::Active)
            .count(),
        total_responses: surveys.iter().map(|s| s.response_count).sum(),
        average_response_rate,
    }
}

/// GET /api/dashboard/company-admin
pub async fn company_admin_dashboard(
    auth: AuthUser,
    data: web::Data<AppState>,
    query: web::Query<DashboardQuery>,
) -> ApiResult<HttpResponse> {
    auth.require(Role::CompanyAdmin)?;
    let company_id = auth.resolve_company(query.company_id.as_deref())?;
    let db = &data.mongodb;

    let surveys: Vec<Survey> = db
        .collection::<Survey>(SURVEYS)
        .find(doc! { "company_id": &company_id })
        .sort(doc! { "created_at": -1 })
        .await?
        .try_collect()
        .await?;
    let total_employees = db
        .collection::<Document>(USERS)
        .count_documents(doc! { "company_id": &company_id, "status": UserStatus::Active.as_str() })
        .await?;
    let metrics = participation_metrics(total_employees, &surveys);

    let recent_activity: Vec<AuditLog> = db
        .collection::<AuditLog>(AUDIT_LOGS)
        .find(doc! { "company_id": &company_id })
        .sort(doc! { "timestamp": -1 })
        .limit(RECENT_ACTIVITY)
        .await?
        .try_collect()
        .await?;

    let recent_surveys: Vec<_> = surveys
        .iter()
        .take(RECENT_SURVEYS as usize)
        .map(|s| {
            json!({
                "id": s.id,
                "title": s.title,
                "status": s.status,
                "response_count": s.response_count,
                "response_rate": response_rate(s.response_count.max(0) as u64, total_employees),
                "created_at": s.created_at,
                "end_date": s.end_date,
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(json!({
        "company_id": company_id,
        "surveys": recent_surveys,
        "participation_metrics": metrics,
        "recent_activity": recent_activity,
    })))
}

/// GET /api/dashboard/super-admin
pub async fn super_admin_dashboard(
    auth: AuthUser,
    data: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    auth.require(Role::SuperAdmin)?;
    let db = &data.mongodb;

    let companies = db.collection::<Document>(COMPANIES);
    let total_companies = companies.count_documents(doc! {}).await?;
    let active_companies = companies.count_documents(doc! { "is_active": true }).await?;
    let total_users = db.collection::<Document>(USERS).count_documents(doc! {}).await?;

    let survey_coll = db.collection::<Document>(SURVEYS);
    let mut surveys_by_status = serde_json::Map::new();
    for status in [
        SurveyStatus::Draft,
        SurveyStatus::Active,
        SurveyStatus::Paused,
        SurveyStatus::Completed,
        SurveyStatus::Archived,
    ] {
        let count = survey_coll
            .count_documents(doc! { "status": status.as_str() })
            .await?;
        surveys_by_status.insert(status.as_str().to_string(), json!(count));
    }
    let total_responses = db
        .collection::<Document>(RESPONSES)
        .count_documents(doc! {})
        .await?;
    let active_microclimates = db
        .collection::<Document>(MICROCLIMATES)
        .count_documents(doc! { "status": MicroclimateStatus::Active.as_str() })
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "companies": { "total": total_companies, "active": active_companies },
        "users": { "total": total_users },
        "surveys": surveys_by_status,
        "total_responses": total_responses,
        "active_microclimates": active_microclimates,
    })))
}

/// GET /api/dashboard/employee
pub async fn employee_dashboard(
    auth: AuthUser,
    data: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let user = current_user(&data, &auth).await?;
    let Some(company_id) = user.company_id.clone() else {
        return Ok(HttpResponse::Ok().json(json!({
            "pending_surveys": [],
            "active_microclimates": [],
            "action_plans": [],
        })));
    };
    let db = &data.mongodb;

    let mut audience = vec![doc! { "target_departments": { "$size": 0 } }];
    if let Some(department_id) = &user.department_id {
        audience.push(doc! { "target_departments": department_id });
    }
    let active: Vec<Survey> = db
        .collection::<Survey>(SURVEYS)
        .find(doc! {
            "company_id": &company_id,
            "status": SurveyStatus::Active.as_str(),
            "$or": audience,
        })
        .sort(doc! { "end_date": 1 })
        .await?
        .try_collect()
        .await?;

    // Answered surveys are found through the respondent hash so anonymous ones count too.
    let hashes: Vec<String> = active
        .iter()
        .map(|s| respondent_hash(&s.id, &user.id))
        .collect();
    let answered: Vec<SurveyResponse> = if hashes.is_empty() {
        Vec::new()
    } else {
        db.collection::<SurveyResponse>(RESPONSES)
            .find(doc! { "respondent_hash": { "$in": hashes } })
            .await?
            .try_collect()
            .await?
    };
    let pending_surveys: Vec<_> = active
        .iter()
        .filter(|s| !answered.iter().any(|r| r.survey_id == s.id))
        .map(|s| {
            json!({
                "id": s.id,
                "title": s.title,
                "question_count": s.questions.len(),
                "end_date": s.end_date,
            })
        })
        .collect();

    let microclimates: Vec<Microclimate> = db
        .collection::<Microclimate>(MICROCLIMATES)
        .find(doc! {
            "company_id": &company_id,
            "status": MicroclimateStatus::Active.as_str(),
            "$and": [audience_clause(&user.id, user.department_id.as_deref())],
        })
        .await?
        .try_collect()
        .await?;

    let closed = [
        ActionPlanStatus::Completed.as_str(),
        ActionPlanStatus::Cancelled.as_str(),
    ];
    let action_plans: Vec<ActionPlan> = db
        .collection::<ActionPlan>(ACTION_PLANS)
        .find(doc! {
            "company_id": &company_id,
            "assigned_to": &user.id,
            "status": { "$nin": closed.to_vec() },
        })
        .sort(doc! { "due_date": 1 })
        .await?
        .try_collect()
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "pending_surveys": pending_surveys,
        "active_microclimates": microclimates,
        "action_plans": action_plans,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::survey::{SurveySettings, SurveyType};
    use crate::test_support::{bearer, test_app};
    use actix_web::{http::StatusCode, test as actix_test};
    use chrono::Utc;

    fn survey(status: SurveyStatus, responses: i64) -> Survey {
        let now = Utc::now();
        Survey {
            id: crate::models::new_id(),
            company_id: "c1".into(),
            title: "Climate".into(),
            description: None,
            survey_type: SurveyType::GeneralClimate,
            status,
            questions: vec![],
            target_departments: vec![],
            start_date: None,
            end_date: None,
            settings: SurveySettings::default(),
            created_by: "u1".into(),
            template_id: None,
            response_count: responses,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn drafts_do_not_drag_the_average_down() {
        let surveys = vec![
            survey(SurveyStatus::Active, 10),
            survey(SurveyStatus::Completed, 20),
            survey(SurveyStatus::Draft, 0),
        ];
        let metrics = participation_metrics(40, &surveys);
        assert_eq!(
            metrics,
            ParticipationMetrics {
                total_employees: 40,
                active_surveys: 1,
                total_responses: 30,
                average_response_rate: 37.5,
            }
        );
    }

    #[test]
    fn empty_company_has_zero_rates() {
        let metrics = participation_metrics(0, &[survey(SurveyStatus::Active, 3)]);
        assert_eq!(metrics.average_response_rate, 0.0);
    }

    #[actix_web::test]
    async fn company_dashboard_is_for_admins() {
        let app = actix_test::init_service(test_app().await).await;
        let req = actix_test::TestRequest::get()
            .uri("/api/dashboard/company-admin")
            .insert_header(bearer(Role::Leader, Some("c1")))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn dashboards_require_authentication() {
        let app = actix_test::init_service(test_app().await).await;
        let req = actix_test::TestRequest::get()
            .uri("/api/dashboard/super-admin")
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
