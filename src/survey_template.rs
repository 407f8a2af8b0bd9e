use actix_web::{web, HttpResponse};
use chrono::Utc;
use futures::stream::TryStreamExt;
use log::info;
use mongodb::bson::{doc, Document};
use serde::Deserialize;

use crate::app_state::AppState;
use crate::audit::{self, AuditEntry};
use crate::auth::AuthUser;
use crate::db::{SURVEYS, SURVEY_TEMPLATES};
use crate::error::{ApiError, ApiResult};
use crate::models::new_id;
use crate::models::survey::{Question, Survey};
use crate::models::template::SurveyTemplate;
use crate::models::user::Role;
use crate::query::contains_ci;
use crate::questions::prepare_questions;
use crate::survey::draft_survey;

#[derive(Debug, Deserialize)]
pub struct TemplateListQuery {
    pub category: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTemplateRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub questions: Vec<Question>,
    #[serde(default)]
    pub is_public: bool,
}

#[derive(Debug, Deserialize, Default)]
pub struct UseTemplateRequest {
    pub title: Option<String>,
    pub company_id: Option<String>,
}

/// Public templates plus the caller's company ones, narrowed by category and search.
pub fn template_filter(auth: &AuthUser, category: Option<&str>, search: Option<&str>) -> Document {
    let mut clauses = Vec::new();
    if !auth.is_super_admin() {
        let mut visible = vec![doc! { "is_public": true }];
        if let Some(company_id) = &auth.company_id {
            visible.push(doc! { "company_id": company_id });
        }
        clauses.push(doc! { "$or": visible });
    }
    if let Some(category) = category.filter(|c| !c.is_empty()) {
        clauses.push(doc! { "category": category });
    }
    if let Some(term) = search.map(str::trim).filter(|t| !t.is_empty()) {
        let pattern = contains_ci(term);
        clauses.push(doc! { "$or": [
            { "name": pattern.clone() },
            { "description": pattern.clone() },
            { "tags": pattern },
        ] });
    }
    if clauses.is_empty() {
        Document::new()
    } else {
        doc! { "$and": clauses }
    }
}

async fn load_template(data: &AppState, auth: &AuthUser, id: &str) -> ApiResult<SurveyTemplate> {
    let mut filter = template_filter(auth, None, None);
    filter.insert("_id", id);
    data.mongodb
        .collection::<SurveyTemplate>(SURVEY_TEMPLATES)
        .find_one(filter)
        .await?
        .ok_or_else(|| ApiError::not_found("Template not found"))
}

/// GET /api/survey-templates
pub async fn list_templates(
    auth: AuthUser,
    data: web::Data<AppState>,
    query: web::Query<TemplateListQuery>,
) -> ApiResult<HttpResponse> {
    let filter = template_filter(&auth, query.category.as_deref(), query.search.as_deref());
    let templates: Vec<SurveyTemplate> = data
        .mongodb
        .collection::<SurveyTemplate>(SURVEY_TEMPLATES)
        .find(filter)
        .sort(doc! { "usage_count": -1, "name": 1 })
        .await?
        .try_collect()
        .await?;
    Ok(HttpResponse::Ok().json(templates))
}

/// POST /api/survey-templates
pub async fn create_template(
    auth: AuthUser,
    data: web::Data<AppState>,
    payload: web::Json<CreateTemplateRequest>,
) -> ApiResult<HttpResponse> {
    auth.require(Role::Supervisor)?;
    let mut req = payload.into_inner();
    if req.name.trim().is_empty() {
        return Err(ApiError::bad_request("Name is required"));
    }
    if req.category.trim().is_empty() {
        return Err(ApiError::bad_request("Category is required"));
    }
    if req.questions.is_empty() {
        return Err(ApiError::bad_request("A template needs at least one question"));
    }
    prepare_questions(&mut req.questions).map_err(ApiError::BadRequest)?;
    // Only platform admins publish to every company.
    let is_public = req.is_public && auth.is_super_admin();

    let now = Utc::now();
    let template = SurveyTemplate {
        id: new_id(),
        name: req.name.trim().to_string(),
        description: req.description,
        category: req.category.trim().to_string(),
        tags: req.tags,
        questions: req.questions,
        is_public,
        company_id: if is_public { None } else { auth.company_id.clone() },
        usage_count: 0,
        created_by: auth.user_id.clone(),
        created_at: now,
        updated_at: now,
    };
    data.mongodb
        .collection::<SurveyTemplate>(SURVEY_TEMPLATES)
        .insert_one(&template)
        .await?;
    info!("Template {} created by {}", template.id, auth.user_id);
    audit::record(
        &data,
        &auth,
        AuditEntry::new("survey_template", &template.id, "create")
            .company(template.company_id.as_deref())
            .after(&template),
    )
    .await;
    Ok(HttpResponse::Created().json(template))
}

/// GET /api/survey-templates/{id}
pub async fn get_template(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let template = load_template(&data, &auth, &path).await?;
    Ok(HttpResponse::Ok().json(template))
}

/// POST /api/survey-templates/{id}/use
pub async fn use_template(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: Option<web::Json<UseTemplateRequest>>,
) -> ApiResult<HttpResponse> {
    auth.require(Role::Supervisor)?;
    let req = payload.map(web::Json::into_inner).unwrap_or_default();
    let template = load_template(&data, &auth, &path).await?;
    let company_id = auth.resolve_company(req.company_id.as_deref())?;

    let title = req.title.unwrap_or_else(|| template.name.clone());
    // Fresh ids so edits to the survey never alias the template's questions.
    let questions = template
        .questions
        .iter()
        .cloned()
        .map(|mut q| {
            q.id = String::new();
            q
        })
        .collect();
    let mut survey = draft_survey(company_id, &auth.user_id, &title, questions)?;
    survey.description = Some(template.description.clone()).filter(|d| !d.is_empty());
    survey.template_id = Some(template.id.clone());

    data.mongodb.collection::<Survey>(SURVEYS).insert_one(&survey).await?;
    data.mongodb
        .collection::<SurveyTemplate>(SURVEY_TEMPLATES)
        .update_one(doc! { "_id": &template.id }, doc! { "$inc": { "usage_count": 1 } })
        .await?;
    info!("Survey {} created from template {}", survey.id, template.id);
    audit::record(
        &data,
        &auth,
        AuditEntry::new("survey", &survey.id, "create_from_template")
            .company(Some(&survey.company_id))
            .after(&survey),
    )
    .await;
    Ok(HttpResponse::Created().json(survey))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{bearer, test_app};
    use actix_web::{http::StatusCode, test as actix_test};
    use serde_json::json;

    fn user(role: Role, company_id: Option<&str>) -> AuthUser {
        AuthUser {
            user_id: "u1".into(),
            role,
            company_id: company_id.map(String::from),
        }
    }

    #[test]
    fn company_users_see_public_and_own_templates() {
        let filter = template_filter(&user(Role::Leader, Some("c1")), None, None);
        assert_eq!(
            filter,
            doc! { "$and": [ { "$or": [ { "is_public": true }, { "company_id": "c1" } ] } ] }
        );
    }

    #[test]
    fn super_admins_see_everything() {
        assert!(template_filter(&user(Role::SuperAdmin, None), None, None).is_empty());
        let filter = template_filter(&user(Role::SuperAdmin, None), Some("engagement"), None);
        assert_eq!(filter, doc! { "$and": [ { "category": "engagement" } ] });
    }

    #[test]
    fn search_spans_name_description_and_tags() {
        let filter = template_filter(&user(Role::Employee, Some("c1")), None, Some(" a.b "));
        let clauses = filter.get_array("$and").unwrap();
        assert_eq!(clauses.len(), 2);
        let search = clauses[1].as_document().unwrap().get_array("$or").unwrap();
        assert_eq!(search.len(), 3);
        let name = search[0].as_document().unwrap().get_document("name").unwrap();
        assert_eq!(name.get_str("$regex").unwrap(), "a\\.b");
    }

    #[actix_web::test]
    async fn employees_cannot_create_templates() {
        let app = actix_test::init_service(test_app().await).await;
        let req = actix_test::TestRequest::post()
            .uri("/api/survey-templates")
            .insert_header(bearer(Role::Employee, Some("c1")))
            .set_json(json!({ "name": "Pulse", "category": "engagement", "questions": [] }))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}
