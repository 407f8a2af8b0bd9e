// Survey authoring and lifecycle under /api/surveys.

use std::collections::HashSet;

use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use futures::stream::TryStreamExt;
use log::{info, warn};
use mongodb::bson::{doc, to_bson, Document};
use serde::Deserialize;
use serde_json::json;

use crate::app_state::AppState;
use crate::audit::{self, AuditEntry};
use crate::auth::{current_user, AuthUser};
use crate::db::{RESPONSES, SURVEYS};
use crate::error::{ApiError, ApiResult};
use crate::models::new_id;
use crate::models::survey::{Question, Survey, SurveySettings, SurveyStatus, SurveyType};
use crate::models::user::Role;
use crate::query::{apply_search, Paging};
use crate::questions::prepare_questions;
use crate::survey_status::{validate_bulk, validate_survey_transition, BulkAction};

pub const MAX_BULK_SURVEYS: usize = 100;

#[derive(Debug, Deserialize)]
pub struct SurveyListQuery {
    pub status: Option<String>,
    #[serde(rename = "type")]
    pub survey_type: Option<String>,
    pub search: Option<String>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSurveyRequest {
    pub title: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub survey_type: Option<SurveyType>,
    #[serde(default)]
    pub questions: Vec<Question>,
    #[serde(default)]
    pub target_departments: Vec<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub settings: Option<SurveySettings>,
    pub company_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSurveyRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub questions: Option<Vec<Question>>,
    pub target_departments: Option<Vec<String>>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub settings: Option<SurveySettings>,
}

#[derive(Debug, Deserialize)]
pub struct StatusChangeRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct BulkRequest {
    pub action: String,
    pub survey_ids: Vec<String>,
}

pub fn check_date_window(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> ApiResult<()> {
    if let (Some(start), Some(end)) = (start, end) {
        if end <= start {
            return Err(ApiError::bad_request("end_date must be after start_date"));
        }
    }
    Ok(())
}

/// Builds a validated draft survey. Shared with template instantiation.
pub fn draft_survey(
    company_id: String,
    created_by: &str,
    title: &str,
    mut questions: Vec<Question>,
) -> ApiResult<Survey> {
    let title = title.trim();
    if title.is_empty() {
        return Err(ApiError::bad_request("Title is required"));
    }
    if questions.is_empty() {
        return Err(ApiError::bad_request("A survey needs at least one question"));
    }
    prepare_questions(&mut questions).map_err(ApiError::BadRequest)?;
    let now = Utc::now();
    Ok(Survey {
        id: new_id(),
        company_id,
        title: title.to_string(),
        description: None,
        survey_type: SurveyType::default(),
        status: SurveyStatus::Draft,
        questions,
        target_departments: Vec::new(),
        start_date: None,
        end_date: None,
        settings: SurveySettings::default(),
        created_by: created_by.to_string(),
        template_id: None,
        response_count: 0,
        created_at: now,
        updated_at: now,
    })
}

pub async fn load_survey(data: &AppState, auth: &AuthUser, id: &str) -> ApiResult<Survey> {
    let mut filter = auth.company_filter();
    filter.insert("_id", id);
    data.mongodb
        .collection::<Survey>(SURVEYS)
        .find_one(filter)
        .await?
        .ok_or_else(|| ApiError::not_found("Survey not found"))
}

/// GET /api/surveys
pub async fn list_surveys(
    auth: AuthUser,
    data: web::Data<AppState>,
    query: web::Query<SurveyListQuery>,
) -> ApiResult<HttpResponse> {
    let mut filter = auth.company_filter();
    if auth.role.at_least(Role::Supervisor) {
        if let Some(status) = &query.status {
            let status = SurveyStatus::parse(status)
                .ok_or_else(|| ApiError::bad_request(format!("Unknown status '{}'", status)))?;
            filter.insert("status", status.as_str());
        }
    } else {
        // Employees only see what they can answer.
        let user = current_user(&data, &auth).await?;
        filter.insert("status", SurveyStatus::Active.as_str());
        let mut audience = vec![doc! { "target_departments": { "$size": 0 } }];
        if let Some(department_id) = user.department_id {
            audience.push(doc! { "target_departments": department_id });
        }
        filter.insert("$and", vec![doc! { "$or": audience }]);
    }
    if let Some(raw) = &query.survey_type {
        let survey_type = SurveyType::parse(raw)
            .ok_or_else(|| ApiError::bad_request(format!("Unknown survey type '{}'", raw)))?;
        filter.insert("type", survey_type.as_str());
    }
    apply_search(&mut filter, query.search.as_deref(), &["title", "description"]);

    let paging = Paging::new(query.page, query.limit);
    let surveys = data.mongodb.collection::<Survey>(SURVEYS);
    let total = surveys.count_documents(filter.clone()).await?;
    let found: Vec<Survey> = surveys
        .find(filter)
        .sort(doc! { "created_at": -1 })
        .skip(paging.skip())
        .limit(paging.limit as i64)
        .await?
        .try_collect()
        .await?;
    Ok(HttpResponse::Ok().json(json!({
        "surveys": found,
        "pagination": paging.pagination(total),
    })))
}

/// POST /api/surveys
pub async fn create_survey(
    auth: AuthUser,
    data: web::Data<AppState>,
    payload: web::Json<CreateSurveyRequest>,
) -> ApiResult<HttpResponse> {
    auth.require(Role::Supervisor)?;
    let req = payload.into_inner();
    check_date_window(req.start_date, req.end_date)?;
    let company_id = auth.resolve_company(req.company_id.as_deref())?;

    let mut survey = draft_survey(company_id, &auth.user_id, &req.title, req.questions)?;
    survey.description = req.description;
    survey.survey_type = req.survey_type.unwrap_or_default();
    survey.target_departments = req.target_departments;
    survey.start_date = req.start_date;
    survey.end_date = req.end_date;
    survey.settings = req.settings.unwrap_or_default();

    data.mongodb
        .collection::<Survey>(SURVEYS)
        .insert_one(&survey)
        .await?;
    info!("Survey {} created by {}", survey.id, auth.user_id);
    audit::record(
        &data,
        &auth,
        AuditEntry::new("survey", &survey.id, "create")
            .company(Some(&survey.company_id))
            .after(&survey),
    )
    .await;
    Ok(HttpResponse::Created().json(survey))
}

/// GET /api/surveys/{id}
pub async fn get_survey(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let survey = load_survey(&data, &auth, &path).await?;
    if !auth.role.at_least(Role::Supervisor) && survey.status != SurveyStatus::Active {
        return Err(ApiError::not_found("Survey not found"));
    }
    Ok(HttpResponse::Ok().json(survey))
}

/// PUT /api/surveys/{id}
pub async fn update_survey(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateSurveyRequest>,
) -> ApiResult<HttpResponse> {
    auth.require(Role::Supervisor)?;
    let existing = load_survey(&data, &auth, &path).await?;
    if !matches!(existing.status, SurveyStatus::Draft | SurveyStatus::Paused) {
        return Err(ApiError::bad_request(format!(
            "A {} survey cannot be edited",
            existing.status.as_str()
        )));
    }
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
    if let Some(mut questions) = req.questions {
        if existing.status != SurveyStatus::Draft {
            return Err(ApiError::bad_request("Questions can only be edited while in draft"));
        }
        if questions.is_empty() {
            return Err(ApiError::bad_request("A survey needs at least one question"));
        }
        prepare_questions(&mut questions).map_err(ApiError::BadRequest)?;
        set_doc.insert("questions", to_bson(&questions)?);
    }
    if let Some(targets) = &req.target_departments {
        set_doc.insert("target_departments", targets.clone());
    }
    let start = req.start_date.or(existing.start_date);
    let end = req.end_date.or(existing.end_date);
    check_date_window(start, end)?;
    if let Some(start) = &req.start_date {
        set_doc.insert("start_date", to_bson(start)?);
    }
    if let Some(end) = &req.end_date {
        set_doc.insert("end_date", to_bson(end)?);
    }
    if let Some(settings) = &req.settings {
        set_doc.insert("settings", to_bson(settings)?);
    }
    if set_doc.is_empty() {
        return Err(ApiError::bad_request("No fields to update"));
    }
    set_doc.insert("updated_at", to_bson(&Utc::now())?);

    data.mongodb
        .collection::<Survey>(SURVEYS)
        .update_one(doc! { "_id": &existing.id }, doc! { "$set": set_doc })
        .await?;
    let updated = load_survey(&data, &auth, &existing.id).await?;
    audit::record(
        &data,
        &auth,
        AuditEntry::new("survey", &updated.id, "update")
            .company(Some(&updated.company_id))
            .before(&existing)
            .after(&updated),
    )
    .await;
    Ok(HttpResponse::Ok().json(updated))
}

/// DELETE /api/surveys/{id}
pub async fn delete_survey(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    auth.require(Role::Supervisor)?;
    let existing = load_survey(&data, &auth, &path).await?;
    if existing.status != SurveyStatus::Draft {
        return Err(ApiError::bad_request(format!(
            "Only draft surveys can be deleted (status is '{}'); archive it instead",
            existing.status.as_str()
        )));
    }
    data.mongodb
        .collection::<Survey>(SURVEYS)
        .delete_one(doc! { "_id": &existing.id, "status": SurveyStatus::Draft.as_str() })
        .await?;
    audit::record(
        &data,
        &auth,
        AuditEntry::new("survey", &existing.id, "delete")
            .company(Some(&existing.company_id))
            .before(&existing),
    )
    .await;
    Ok(HttpResponse::Ok().json(json!({ "message": "Survey deleted", "id": existing.id })))
}

/// PATCH /api/surveys/{id}/status
pub async fn change_status(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<StatusChangeRequest>,
) -> ApiResult<HttpResponse> {
    auth.require(Role::Supervisor)?;
    let to = SurveyStatus::parse(&payload.status)
        .ok_or_else(|| ApiError::bad_request(format!("Unknown status '{}'", payload.status)))?;
    let existing = load_survey(&data, &auth, &path).await?;
    validate_survey_transition(&existing, to).map_err(ApiError::BadRequest)?;

    // Conditioning on the old status keeps two concurrent changes from both applying.
    let now = to_bson(&Utc::now())?;
    let result = data
        .mongodb
        .collection::<Survey>(SURVEYS)
        .update_one(
            doc! { "_id": &existing.id, "status": existing.status.as_str() },
            doc! { "$set": { "status": to.as_str(), "updated_at": now } },
        )
        .await?;
    if result.matched_count == 0 {
        return Err(ApiError::Conflict(
            "Survey status changed concurrently; reload and retry".to_string(),
        ));
    }
    info!(
        "Survey {} moved {} -> {}",
        existing.id,
        existing.status.as_str(),
        to.as_str()
    );
    audit::record(
        &data,
        &auth,
        AuditEntry::new("survey", &existing.id, "status_change")
            .company(Some(&existing.company_id))
            .before(&json!({ "status": existing.status }))
            .after(&json!({ "status": to })),
    )
    .await;
    let updated = load_survey(&data, &auth, &existing.id).await?;
    Ok(HttpResponse::Ok().json(updated))
}

/// Parses and de-duplicates a bulk request before anything is loaded.
pub fn parse_bulk(req: &BulkRequest) -> ApiResult<(BulkAction, Vec<String>)> {
    let action = BulkAction::parse(&req.action)
        .ok_or_else(|| ApiError::bad_request(format!("Unknown bulk action '{}'", req.action)))?;
    let mut seen = HashSet::new();
    let ids: Vec<String> = req
        .survey_ids
        .iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty() && seen.insert(id.clone()))
        .collect();
    if ids.is_empty() {
        return Err(ApiError::bad_request("survey_ids must not be empty"));
    }
    if ids.len() > MAX_BULK_SURVEYS {
        return Err(ApiError::bad_request(format!(
            "At most {} surveys per bulk operation",
            MAX_BULK_SURVEYS
        )));
    }
    Ok((action, ids))
}

/// POST /api/surveys/bulk
pub async fn bulk_operation(
    auth: AuthUser,
    data: web::Data<AppState>,
    payload: web::Json<BulkRequest>,
) -> ApiResult<HttpResponse> {
    auth.require(Role::Supervisor)?;
    let (action, ids) = parse_bulk(&payload)?;

    let surveys = data.mongodb.collection::<Survey>(SURVEYS);
    let mut filter = auth.company_filter();
    filter.insert("_id", doc! { "$in": ids.clone() });
    let found: Vec<Survey> = surveys.find(filter.clone()).await?.try_collect().await?;

    let problems = validate_bulk(action, &ids, &found);
    if !problems.is_empty() {
        warn!(
            "Bulk {} rejected for {} surveys: {}",
            action.as_str(),
            problems.len(),
            problems.join("; ")
        );
        return Err(ApiError::BadRequest(format!(
            "Bulk {} rejected, no surveys were changed: {}",
            action.as_str(),
            problems.join("; ")
        )));
    }

    let now = to_bson(&Utc::now())?;
    let affected = match action.target_status() {
        Some(to) => {
            surveys
                .update_many(
                    filter,
                    doc! { "$set": { "status": to.as_str(), "updated_at": now } },
                )
                .await?
                .modified_count
        }
        None => {
            filter.insert("status", SurveyStatus::Draft.as_str());
            let deleted = surveys.delete_many(filter).await?.deleted_count;
            data.mongodb
                .collection::<Document>(RESPONSES)
                .delete_many(doc! { "survey_id": { "$in": ids.clone() } })
                .await?;
            deleted
        }
    };

    for survey in &found {
        let entry = AuditEntry::new("survey", &survey.id, "bulk_operation")
            .company(Some(&survey.company_id))
            .before(&json!({ "status": survey.status }));
        let entry = match action.target_status() {
            Some(to) => entry.after(&json!({ "status": to, "action": action.as_str() })),
            None => entry.after(&json!({ "deleted": true })),
        };
        audit::record(&data, &auth, entry).await;
    }
    info!("Bulk {} applied to {} surveys", action.as_str(), affected);
    Ok(HttpResponse::Ok().json(json!({ "action": action.as_str(), "affected": affected })))
}

/// POST /api/surveys/{id}/duplicate
pub async fn duplicate_survey(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    auth.require(Role::Supervisor)?;
    let source = load_survey(&data, &auth, &path).await?;
    let mut copy = draft_survey(
        source.company_id.clone(),
        &auth.user_id,
        &format!("{} (Copy)", source.title),
        source.questions.clone(),
    )?;
    copy.description = source.description.clone();
    copy.survey_type = source.survey_type;
    copy.target_departments = source.target_departments.clone();
    copy.settings = source.settings.clone();
    copy.template_id = source.template_id.clone();

    data.mongodb
        .collection::<Survey>(SURVEYS)
        .insert_one(&copy)
        .await?;
    audit::record(
        &data,
        &auth,
        AuditEntry::new("survey", &copy.id, "duplicate")
            .company(Some(&copy.company_id))
            .before(&json!({ "source_id": source.id }))
            .after(&copy),
    )
    .await;
    Ok(HttpResponse::Created().json(copy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::survey::QuestionType;
    use crate::test_support::{bearer, test_app};
    use actix_web::{http::StatusCode, test as actix_test};
    use chrono::Duration;

    fn likert(text: &str) -> Question {
        Question {
            id: String::new(),
            text: text.into(),
            question_type: QuestionType::Likert,
            options: vec![],
            required: true,
            category: None,
        }
    }

    #[test]
    fn drafts_need_title_and_questions() {
        assert!(draft_survey("c1".into(), "u1", " ", vec![likert("q")]).is_err());
        assert!(draft_survey("c1".into(), "u1", "Pulse", vec![]).is_err());
        let survey = draft_survey("c1".into(), "u1", " Pulse ", vec![likert("q")]).unwrap();
        assert_eq!(survey.title, "Pulse");
        assert_eq!(survey.status, SurveyStatus::Draft);
        assert!(!survey.questions[0].id.is_empty());
    }

    #[test]
    fn end_must_follow_start() {
        let now = Utc::now();
        assert!(check_date_window(Some(now), Some(now - Duration::days(1))).is_err());
        assert!(check_date_window(Some(now), Some(now + Duration::days(1))).is_ok());
        assert!(check_date_window(None, Some(now)).is_ok());
    }

    #[test]
    fn bulk_request_parsing() {
        let req = BulkRequest {
            action: "archive".into(),
            survey_ids: vec!["a".into(), "a".into(), " ".into(), "b".into()],
        };
        let (action, ids) = parse_bulk(&req).unwrap();
        assert_eq!(action, BulkAction::Archive);
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);

        let bad = BulkRequest { action: "explode".into(), survey_ids: vec!["a".into()] };
        assert!(parse_bulk(&bad).is_err());
        let empty = BulkRequest { action: "delete".into(), survey_ids: vec![] };
        assert!(parse_bulk(&empty).is_err());
    }

    #[actix_web::test]
    async fn unknown_status_is_a_bad_request() {
        let app = actix_test::init_service(test_app().await).await;
        let req = actix_test::TestRequest::patch()
            .uri("/api/surveys/s1/status")
            .insert_header(bearer(Role::CompanyAdmin, Some("c1")))
            .set_json(json!({ "status": "launched" }))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn employees_cannot_create_surveys() {
        let app = actix_test::init_service(test_app().await).await;
        let req = actix_test::TestRequest::post()
            .uri("/api/surveys")
            .insert_header(bearer(Role::Employee, Some("c1")))
            .set_json(json!({ "title": "Pulse", "questions": [] }))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}
