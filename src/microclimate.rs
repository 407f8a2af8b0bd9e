// Short pulse sessions with live results under /api/microclimates.

use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use futures::stream::TryStreamExt;
use log::{info, warn};
use mongodb::bson::{doc, to_bson, Document};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::app_state::AppState;
use crate::audit::{self, AuditEntry};
use crate::auth::{current_user, AuthUser};
use crate::db::{MICROCLIMATES, MICROCLIMATE_RESPONSES};
use crate::error::{ApiError, ApiResult};
use crate::microclimate_hub::{Publish, SubscriberCount};
use crate::models::microclimate::{
    Microclimate, MicroclimateResponse, MicroclimateSettings, MicroclimateStatus,
};
use crate::models::new_id;
use crate::models::survey::{Answer, Question};
use crate::models::user::Role;
use crate::query::{apply_search, Paging};
use crate::questions::{prepare_questions, validate_answers};
use crate::survey_response::{audience_size, respondent_hash};
use crate::survey_results::{aggregate, response_rate, ResultsSummary};

pub const DEFAULT_DURATION_MINUTES: i64 = 30;
pub const MAX_DURATION_MINUTES: i64 = 24 * 60;

#[derive(Debug, Deserialize)]
pub struct MicroclimateListQuery {
    pub status: Option<String>,
    pub search: Option<String>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateMicroclimateRequest {
    pub title: String,
    pub description: Option<String>,
    pub questions: Vec<Question>,
    #[serde(default)]
    pub target_departments: Vec<String>,
    #[serde(default)]
    pub target_users: Vec<String>,
    pub settings: Option<MicroclimateSettings>,
    pub start_time: Option<DateTime<Utc>>,
    pub duration_minutes: Option<i64>,
    pub company_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateMicroclimateRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub questions: Option<Vec<Question>>,
    pub target_departments: Option<Vec<String>>,
    pub target_users: Option<Vec<String>>,
    pub settings: Option<MicroclimateSettings>,
    pub start_time: Option<DateTime<Utc>>,
    pub duration_minutes: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct MicroclimateStatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct MicroclimateAnswerRequest {
    pub answers: Vec<Answer>,
}

/// What live viewers receive, on connect and after every response.
#[derive(Debug, Clone, Serialize)]
pub struct LiveSnapshot {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub microclimate_id: String,
    pub status: MicroclimateStatus,
    pub response_count: usize,
    pub audience: u64,
    pub participation_rate: f64,
    pub results: ResultsSummary,
    pub generated_at: DateTime<Utc>,
}

fn check_duration(minutes: i64) -> ApiResult<()> {
    if !(1..=MAX_DURATION_MINUTES).contains(&minutes) {
        return Err(ApiError::bad_request(format!(
            "duration_minutes must be between 1 and {}",
            MAX_DURATION_MINUTES
        )));
    }
    Ok(())
}

pub fn validate_transition(from: MicroclimateStatus, to: MicroclimateStatus) -> Result<(), String> {
    if from.can_transition_to(to) {
        return Ok(());
    }
    let allowed: Vec<&str> = from.allowed_transitions().iter().map(|s| s.as_str()).collect();
    Err(format!(
        "Cannot transition microclimate from '{}' to '{}'. Allowed: {}",
        from.as_str(),
        to.as_str(),
        if allowed.is_empty() { "none".to_string() } else { allowed.join(", ") }
    ))
}

/// Whether the session takes answers right now.
pub fn check_accepting(microclimate: &Microclimate, now: DateTime<Utc>) -> Result<(), String> {
    if microclimate.status != MicroclimateStatus::Active {
        return Err(format!(
            "Microclimate is {} and not accepting responses",
            microclimate.status.as_str()
        ));
    }
    if microclimate.is_expired(now) {
        return Err("Microclimate has expired".to_string());
    }
    if let Some(max) = microclimate.settings.max_responses {
        if microclimate.response_count >= max {
            return Err("Microclimate has reached its response limit".to_string());
        }
    }
    Ok(())
}

/// Explicit user targets win over department targets; no targets means everyone.
pub fn is_targeted(microclimate: &Microclimate, user_id: &str, department_id: Option<&str>) -> bool {
    if !microclimate.target_users.is_empty() {
        return microclimate.target_users.iter().any(|u| u == user_id);
    }
    if !microclimate.target_departments.is_empty() {
        return department_id.is_some_and(|d| microclimate.target_departments.iter().any(|t| t == d));
    }
    true
}

/// Query form of [`is_targeted`].
pub fn audience_clause(user_id: &str, department_id: Option<&str>) -> Document {
    let mut alternatives = vec![
        doc! { "target_users": user_id },
        doc! { "target_users": { "$size": 0 }, "target_departments": { "$size": 0 } },
    ];
    if let Some(department_id) = department_id {
        alternatives.push(doc! { "target_users": { "$size": 0 }, "target_departments": department_id });
    }
    doc! { "$or": alternatives }
}

pub async fn load_microclimate(
    data: &AppState,
    auth: &AuthUser,
    id: &str,
) -> ApiResult<Microclimate> {
    let mut filter = auth.company_filter();
    filter.insert("_id", id);
    data.mongodb
        .collection::<Microclimate>(MICROCLIMATES)
        .find_one(filter)
        .await?
        .ok_or_else(|| ApiError::not_found("Microclimate not found"))
}

async fn target_audience(data: &AppState, microclimate: &Microclimate) -> ApiResult<u64> {
    if !microclimate.target_users.is_empty() {
        return Ok(microclimate.target_users.len() as u64);
    }
    audience_size(data, &microclimate.company_id, &microclimate.target_departments).await
}

/// Recomputes the results of a microclimate from its stored answers.
pub async fn live_snapshot(data: &AppState, microclimate: &Microclimate) -> ApiResult<LiveSnapshot> {
    let responses: Vec<MicroclimateResponse> = data
        .mongodb
        .collection::<MicroclimateResponse>(MICROCLIMATE_RESPONSES)
        .find(doc! { "microclimate_id": &microclimate.id })
        .await?
        .try_collect()
        .await?;
    let results = aggregate(
        &microclimate.questions,
        responses.iter().map(|r| r.answers.as_slice()),
    );
    let audience = target_audience(data, microclimate).await?;
    Ok(LiveSnapshot {
        kind: "snapshot",
        microclimate_id: microclimate.id.clone(),
        status: microclimate.status,
        response_count: results.total_responses,
        audience,
        participation_rate: response_rate(results.total_responses as u64, audience),
        results,
        generated_at: Utc::now(),
    })
}

async fn try_publish_snapshot(data: &AppState, microclimate: &Microclimate) -> ApiResult<()> {
    let snapshot = live_snapshot(data, microclimate).await?;
    let payload = serde_json::to_string(&snapshot)
        .map_err(|e| ApiError::Internal(format!("snapshot encoding failed: {}", e)))?;
    data.hub.do_send(Publish {
        microclimate_id: microclimate.id.clone(),
        payload,
    });
    Ok(())
}

/// Pushes a fresh snapshot to live viewers. Runs after the write has committed, so a
/// failure here is logged and never reported to the caller.
async fn publish_snapshot(data: &AppState, microclimate: &Microclimate) {
    if let Err(e) = try_publish_snapshot(data, microclimate).await {
        warn!("Live snapshot for microclimate {} not published: {}", microclimate.id, e);
    }
}

/// GET /api/microclimates
pub async fn list_microclimates(
    auth: AuthUser,
    data: web::Data<AppState>,
    query: web::Query<MicroclimateListQuery>,
) -> ApiResult<HttpResponse> {
    let mut filter = auth.company_filter();
    if auth.role.at_least(Role::Supervisor) {
        if let Some(raw) = &query.status {
            let status = MicroclimateStatus::parse(raw)
                .ok_or_else(|| ApiError::bad_request(format!("Unknown status '{}'", raw)))?;
            filter.insert("status", status.as_str());
        }
    } else {
        let user = current_user(&data, &auth).await?;
        filter.insert("status", MicroclimateStatus::Active.as_str());
        filter.insert("$and", vec![audience_clause(&auth.user_id, user.department_id.as_deref())]);
    }
    apply_search(&mut filter, query.search.as_deref(), &["title", "description"]);

    let paging = Paging::new(query.page, query.limit);
    let collection = data.mongodb.collection::<Microclimate>(MICROCLIMATES);
    let total = collection.count_documents(filter.clone()).await?;
    let found: Vec<Microclimate> = collection
        .find(filter)
        .sort(doc! { "created_at": -1 })
        .skip(paging.skip())
        .limit(paging.limit as i64)
        .await?
        .try_collect()
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "microclimates": found,
        "pagination": paging.pagination(total),
    })))
}

/// POST /api/microclimates
pub async fn create_microclimate(
    auth: AuthUser,
    data: web::Data<AppState>,
    payload: web::Json<CreateMicroclimateRequest>,
) -> ApiResult<HttpResponse> {
    auth.require(Role::Supervisor)?;
    let mut req = payload.into_inner();
    let title = req.title.trim().to_string();
    if title.is_empty() {
        return Err(ApiError::bad_request("Title is required"));
    }
    if req.questions.is_empty() {
        return Err(ApiError::bad_request("A microclimate needs at least one question"));
    }
    prepare_questions(&mut req.questions).map_err(ApiError::BadRequest)?;
    let duration_minutes = req.duration_minutes.unwrap_or(DEFAULT_DURATION_MINUTES);
    check_duration(duration_minutes)?;
    let company_id = auth.resolve_company(req.company_id.as_deref())?;

    let now = Utc::now();
    let microclimate = Microclimate {
        id: new_id(),
        company_id,
        title,
        description: req.description,
        questions: req.questions,
        target_departments: req.target_departments,
        target_users: req.target_users,
        settings: req.settings.unwrap_or_default(),
        start_time: req.start_time,
        duration_minutes,
        status: MicroclimateStatus::Draft,
        response_count: 0,
        created_by: auth.user_id.clone(),
        created_at: now,
        updated_at: now,
    };
    data.mongodb
        .collection::<Microclimate>(MICROCLIMATES)
        .insert_one(&microclimate)
        .await?;
    info!("Microclimate {} created by {}", microclimate.id, auth.user_id);
    audit::record(
        &data,
        &auth,
        AuditEntry::new("microclimate", &microclimate.id, "create")
            .company(Some(&microclimate.company_id))
            .after(&microclimate),
    )
    .await;
    Ok(HttpResponse::Created().json(microclimate))
}

/// GET /api/microclimates/{id}
pub async fn get_microclimate(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let microclimate = load_microclimate(&data, &auth, &path).await?;
    Ok(HttpResponse::Ok().json(microclimate))
}

/// PUT /api/microclimates/{id}
pub async fn update_microclimate(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateMicroclimateRequest>,
) -> ApiResult<HttpResponse> {
    auth.require(Role::Supervisor)?;
    let existing = load_microclimate(&data, &auth, &path).await?;
    if !existing.status.is_editable() {
        return Err(ApiError::bad_request(format!(
            "A {} microclimate cannot be edited",
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
        if questions.is_empty() {
            return Err(ApiError::bad_request("A microclimate needs at least one question"));
        }
        prepare_questions(&mut questions).map_err(ApiError::BadRequest)?;
        set_doc.insert("questions", to_bson(&questions)?);
    }
    if let Some(targets) = &req.target_departments {
        set_doc.insert("target_departments", targets.clone());
    }
    if let Some(targets) = &req.target_users {
        set_doc.insert("target_users", targets.clone());
    }
    if let Some(settings) = &req.settings {
        set_doc.insert("settings", to_bson(settings)?);
    }
    if let Some(start) = &req.start_time {
        set_doc.insert("start_time", to_bson(start)?);
    }
    if let Some(minutes) = req.duration_minutes {
        check_duration(minutes)?;
        set_doc.insert("duration_minutes", minutes);
    }
    if set_doc.is_empty() {
        return Err(ApiError::bad_request("No fields to update"));
    }
    set_doc.insert("updated_at", to_bson(&Utc::now())?);

    data.mongodb
        .collection::<Microclimate>(MICROCLIMATES)
        .update_one(doc! { "_id": &existing.id }, doc! { "$set": set_doc })
        .await?;
    let updated = load_microclimate(&data, &auth, &existing.id).await?;
    audit::record(
        &data,
        &auth,
        AuditEntry::new("microclimate", &updated.id, "update")
            .company(Some(&updated.company_id))
            .before(&existing)
            .after(&updated),
    )
    .await;
    Ok(HttpResponse::Ok().json(updated))
}

/// DELETE /api/microclimates/{id}
pub async fn delete_microclimate(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    auth.require(Role::Supervisor)?;
    let existing = load_microclimate(&data, &auth, &path).await?;
    if !existing.status.is_editable() {
        return Err(ApiError::bad_request(format!(
            "A {} microclimate cannot be deleted; cancel it instead",
            existing.status.as_str()
        )));
    }
    data.mongodb
        .collection::<Microclimate>(MICROCLIMATES)
        .delete_one(doc! { "_id": &existing.id })
        .await?;
    audit::record(
        &data,
        &auth,
        AuditEntry::new("microclimate", &existing.id, "delete")
            .company(Some(&existing.company_id))
            .before(&existing),
    )
    .await;
    Ok(HttpResponse::Ok().json(json!({ "message": "Microclimate deleted", "id": existing.id })))
}

/// PATCH /api/microclimates/{id}/status
pub async fn change_microclimate_status(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<MicroclimateStatusRequest>,
) -> ApiResult<HttpResponse> {
    auth.require(Role::Supervisor)?;
    let to = MicroclimateStatus::parse(&payload.status)
        .ok_or_else(|| ApiError::bad_request(format!("Unknown status '{}'", payload.status)))?;
    let existing = load_microclimate(&data, &auth, &path).await?;
    validate_transition(existing.status, to).map_err(ApiError::BadRequest)?;
    if to == MicroclimateStatus::Active && existing.questions.is_empty() {
        return Err(ApiError::bad_request("Cannot activate a microclimate without questions"));
    }

    let now = to_bson(&Utc::now())?;
    let mut set_doc = doc! { "status": to.as_str(), "updated_at": now.clone() };
    // The countdown starts on first activation when no start was planned.
    if to == MicroclimateStatus::Active && existing.start_time.is_none() {
        set_doc.insert("start_time", now);
    }
    let result = data
        .mongodb
        .collection::<Microclimate>(MICROCLIMATES)
        .update_one(
            doc! { "_id": &existing.id, "status": existing.status.as_str() },
            doc! { "$set": set_doc },
        )
        .await?;
    if result.matched_count == 0 {
        return Err(ApiError::Conflict(
            "Microclimate status changed concurrently; reload and retry".to_string(),
        ));
    }
    info!(
        "Microclimate {} moved {} -> {}",
        existing.id,
        existing.status.as_str(),
        to.as_str()
    );
    audit::record(
        &data,
        &auth,
        AuditEntry::new("microclimate", &existing.id, "status_change")
            .company(Some(&existing.company_id))
            .before(&json!({ "status": existing.status }))
            .after(&json!({ "status": to })),
    )
    .await;
    let updated = load_microclimate(&data, &auth, &existing.id).await?;
    publish_snapshot(&data, &updated).await;
    Ok(HttpResponse::Ok().json(updated))
}

/// POST /api/microclimates/{id}/responses
pub async fn submit_microclimate_response(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<MicroclimateAnswerRequest>,
) -> ApiResult<HttpResponse> {
    let microclimate = load_microclimate(&data, &auth, &path).await?;
    let now = Utc::now();
    check_accepting(&microclimate, now).map_err(ApiError::BadRequest)?;

    let user = current_user(&data, &auth).await?;
    if !is_targeted(&microclimate, &auth.user_id, user.department_id.as_deref()) {
        return Err(ApiError::forbidden("This microclimate is not addressed to you"));
    }
    let (answers, _) = validate_answers(&microclimate.questions, payload.into_inner().answers, false)
        .map_err(ApiError::BadRequest)?;

    let response = MicroclimateResponse {
        id: new_id(),
        microclimate_id: microclimate.id.clone(),
        company_id: microclimate.company_id.clone(),
        user_id: (!microclimate.settings.anonymous).then(|| auth.user_id.clone()),
        respondent_hash: respondent_hash(&microclimate.id, &auth.user_id),
        department_id: user.department_id,
        answers,
        submitted_at: now,
    };
    let responses = data
        .mongodb
        .collection::<MicroclimateResponse>(MICROCLIMATE_RESPONSES);
    if responses
        .find_one(doc! {
            "microclimate_id": &microclimate.id,
            "respondent_hash": &response.respondent_hash,
        })
        .await?
        .is_some()
    {
        return Err(ApiError::Conflict("You have already responded".to_string()));
    }
    if let Err(e) = responses.insert_one(&response).await {
        if ApiError::is_duplicate_key(&e) {
            return Err(ApiError::Conflict("You have already responded".to_string()));
        }
        return Err(e.into());
    }

    let mut counter = doc! { "_id": &microclimate.id };
    // Guards the limit when responses arrive concurrently.
    if let Some(max) = microclimate.settings.max_responses {
        counter.insert("response_count", doc! { "$lt": max });
    }
    let bumped = data
        .mongodb
        .collection::<Microclimate>(MICROCLIMATES)
        .update_one(counter, doc! { "$inc": { "response_count": 1 } })
        .await?;
    if bumped.matched_count == 0 {
        responses.delete_one(doc! { "_id": &response.id }).await?;
        return Err(ApiError::bad_request("Microclimate has reached its response limit"));
    }

    let updated = load_microclimate(&data, &auth, &microclimate.id).await?;
    publish_snapshot(&data, &updated).await;
    Ok(HttpResponse::Created().json(json!({
        "id": response.id,
        "microclimate_id": updated.id,
        "response_count": updated.response_count,
    })))
}

/// GET /api/microclimates/{id}/results
pub async fn microclimate_results(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let microclimate = load_microclimate(&data, &auth, &path).await?;
    if !microclimate.settings.show_live_results && !auth.role.at_least(Role::Supervisor) {
        return Err(ApiError::forbidden("Results are hidden for this microclimate"));
    }
    let snapshot = live_snapshot(&data, &microclimate).await?;
    let live_viewers = data
        .hub
        .send(SubscriberCount { microclimate_id: microclimate.id.clone() })
        .await
        .unwrap_or(0);
    Ok(HttpResponse::Ok().json(json!({
        "snapshot": snapshot,
        "live_viewers": live_viewers,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{bearer, test_app};
    use actix_web::{http::StatusCode, test as actix_test};
    use chrono::Duration;

    fn session(status: MicroclimateStatus) -> Microclimate {
        let now = Utc::now();
        Microclimate {
            id: "m1".into(),
            company_id: "c1".into(),
            title: "Friday pulse".into(),
            description: None,
            questions: vec![],
            target_departments: vec![],
            target_users: vec![],
            settings: MicroclimateSettings::default(),
            start_time: Some(now - Duration::minutes(5)),
            duration_minutes: 30,
            status,
            response_count: 0,
            created_by: "u1".into(),
            created_at: now,
            updated_at: now,
        }
    }

    #[actix_web::test]
    async fn unreachable_store_only_skips_the_live_push() {
        use crate::config::Config;
        use crate::db::MongoDB;
        use crate::microclimate_hub::MicroclimateHub;
        use actix::Actor;
        use std::sync::Arc;

        let mut config = Config::for_tests();
        config.mongo_uri = "mongodb://127.0.0.1:1/?serverSelectionTimeoutMS=200".to_string();
        let mongodb = MongoDB::init(&config.mongo_uri, &config.database_name)
            .await
            .unwrap();
        let data = AppState {
            hub: MicroclimateHub::new().start(),
            mongodb: Arc::new(mongodb),
            config,
        };
        let m = session(MicroclimateStatus::Active);
        assert!(try_publish_snapshot(&data, &m).await.is_err());
        // Completes without an error for the caller.
        publish_snapshot(&data, &m).await;
    }

    #[test]
    fn rejected_transitions_list_the_alternatives() {
        let err = validate_transition(MicroclimateStatus::Scheduled, MicroclimateStatus::Paused)
            .unwrap_err();
        assert_eq!(
            err,
            "Cannot transition microclimate from 'scheduled' to 'paused'. Allowed: active, cancelled"
        );
        let err = validate_transition(MicroclimateStatus::Completed, MicroclimateStatus::Active)
            .unwrap_err();
        assert!(err.ends_with("Allowed: none"));
    }

    #[test]
    fn accepting_requires_active_unexpired_and_below_limit() {
        let now = Utc::now();
        assert!(check_accepting(&session(MicroclimateStatus::Active), now).is_ok());
        assert!(check_accepting(&session(MicroclimateStatus::Paused), now).is_err());

        let mut expired = session(MicroclimateStatus::Active);
        expired.start_time = Some(now - Duration::minutes(31));
        assert_eq!(check_accepting(&expired, now).unwrap_err(), "Microclimate has expired");

        let mut full = session(MicroclimateStatus::Active);
        full.settings.max_responses = Some(3);
        full.response_count = 3;
        assert!(check_accepting(&full, now).is_err());
    }

    #[test]
    fn user_targets_take_precedence_over_departments() {
        let mut m = session(MicroclimateStatus::Active);
        assert!(is_targeted(&m, "anyone", None));

        m.target_departments = vec!["d1".into()];
        assert!(is_targeted(&m, "u2", Some("d1")));
        assert!(!is_targeted(&m, "u2", Some("d2")));
        assert!(!is_targeted(&m, "u2", None));

        m.target_users = vec!["u3".into()];
        assert!(is_targeted(&m, "u3", None));
        assert!(!is_targeted(&m, "u2", Some("d1")));
    }

    #[actix_web::test]
    async fn employees_cannot_create_microclimates() {
        let app = actix_test::init_service(test_app().await).await;
        let req = actix_test::TestRequest::post()
            .uri("/api/microclimates")
            .insert_header(bearer(Role::Employee, Some("c1")))
            .set_json(json!({ "title": "Pulse", "questions": [] }))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn live_socket_requires_a_token() {
        let app = actix_test::init_service(test_app().await).await;
        let req = actix_test::TestRequest::get()
            .uri("/ws/microclimates/m1")
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
