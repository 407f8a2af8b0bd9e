// Submitting, aggregating and exporting survey responses.

use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use log::{info, warn};
use mongodb::bson::{doc, Document};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::auth::{current_user, AuthUser};
use crate::db::{RESPONSES, SURVEYS, USERS};
use crate::error::{ApiError, ApiResult};
use crate::export::{csv_attachment, slug, to_csv};
use crate::models::new_id;
use crate::models::survey::{Answer, Survey, SurveyResponse, SurveyStatus};
use crate::models::user::{Role, UserStatus};
use crate::questions::validate_answers;
use crate::survey::load_survey;
use crate::survey_results::{aggregate, response_rate};

#[derive(Debug, Deserialize)]
pub struct SubmitResponseRequest {
    pub answers: Vec<Answer>,
}

#[derive(Debug, Deserialize)]
pub struct ResultsQuery {
    pub department_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub format: Option<String>,
}

/// Stable per-person key that enforces one submission without storing who answered.
pub fn respondent_hash(scope_id: &str, user_id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("{}:{}", scope_id, user_id).as_bytes()).to_string()
}

pub fn check_open(survey: &Survey, now: DateTime<Utc>) -> ApiResult<()> {
    if survey.status != SurveyStatus::Active {
        return Err(ApiError::bad_request(format!(
            "Survey is {} and not accepting responses",
            survey.status.as_str()
        )));
    }
    if survey.start_date.is_some_and(|start| now < start) {
        return Err(ApiError::bad_request("Survey has not started yet"));
    }
    if survey.end_date.is_some_and(|end| now > end) {
        return Err(ApiError::bad_request("Survey has ended"));
    }
    Ok(())
}

/// Department targeting is checked against the department stored on the account only.
pub fn check_target(survey: &Survey, department_id: Option<&str>) -> ApiResult<()> {
    if survey.target_departments.is_empty()
        || department_id.is_some_and(|d| survey.target_departments.iter().any(|t| t == d))
    {
        return Ok(());
    }
    Err(ApiError::forbidden("This survey is not addressed to your department"))
}

/// Active users the survey is addressed to.
pub async fn audience_size(
    data: &AppState,
    company_id: &str,
    target_departments: &[String],
) -> ApiResult<u64> {
    let mut filter = doc! { "company_id": company_id, "status": UserStatus::Active.as_str() };
    if !target_departments.is_empty() {
        filter.insert("department_id", doc! { "$in": target_departments.to_vec() });
    }
    Ok(data
        .mongodb
        .collection::<Document>(USERS)
        .count_documents(filter)
        .await?)
}

async fn load_responses(
    data: &AppState,
    survey_id: &str,
    department_id: Option<&str>,
) -> ApiResult<Vec<SurveyResponse>> {
    let mut filter = doc! { "survey_id": survey_id };
    if let Some(department_id) = department_id {
        filter.insert("department_id", department_id);
    }
    let mut cursor = data
        .mongodb
        .collection::<SurveyResponse>(RESPONSES)
        .find(filter)
        .sort(doc! { "submitted_at": 1 })
        .await?;
    let mut responses = Vec::new();
    // A malformed document should not hide every other response.
    while let Some(next) = cursor.next().await {
        match next {
            Ok(response) => responses.push(response),
            Err(e) => warn!("Skipping unreadable response of survey {}: {}", survey_id, e),
        }
    }
    Ok(responses)
}

/// POST /api/surveys/{id}/responses
pub async fn submit_response(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<SubmitResponseRequest>,
) -> ApiResult<HttpResponse> {
    let survey = load_survey(&data, &auth, &path).await?;
    let now = Utc::now();
    check_open(&survey, now)?;

    let user = current_user(&data, &auth).await?;
    check_target(&survey, user.department_id.as_deref())?;
    let department_id = user.department_id;

    let req = payload.into_inner();
    let (answers, is_complete) =
        validate_answers(&survey.questions, req.answers, survey.settings.allow_partial_responses)
            .map_err(ApiError::BadRequest)?;

    let hash = respondent_hash(&survey.id, &auth.user_id);
    let responses = data.mongodb.collection::<SurveyResponse>(RESPONSES);
    if responses
        .find_one(doc! { "survey_id": &survey.id, "respondent_hash": &hash })
        .await?
        .is_some()
    {
        return Err(ApiError::Conflict("You have already responded to this survey".to_string()));
    }

    let response = SurveyResponse {
        id: new_id(),
        survey_id: survey.id.clone(),
        company_id: survey.company_id.clone(),
        user_id: (!survey.settings.anonymous).then(|| auth.user_id.clone()),
        respondent_hash: hash,
        department_id,
        answers,
        is_complete,
        submitted_at: now,
    };
    if let Err(e) = responses.insert_one(&response).await {
        if ApiError::is_duplicate_key(&e) {
            return Err(ApiError::Conflict(
                "You have already responded to this survey".to_string(),
            ));
        }
        return Err(e.into());
    }
    data.mongodb
        .collection::<Survey>(SURVEYS)
        .update_one(doc! { "_id": &survey.id }, doc! { "$inc": { "response_count": 1 } })
        .await?;
    info!("Response {} recorded for survey {}", response.id, survey.id);
    Ok(HttpResponse::Created().json(json!({
        "id": response.id,
        "survey_id": survey.id,
        "is_complete": response.is_complete,
    })))
}

/// GET /api/surveys/{id}/results
pub async fn survey_results(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<ResultsQuery>,
) -> ApiResult<HttpResponse> {
    auth.require(Role::Supervisor)?;
    let survey = load_survey(&data, &auth, &path).await?;
    let responses = load_responses(&data, &survey.id, query.department_id.as_deref()).await?;
    let results = aggregate(&survey.questions, responses.iter().map(|r| r.answers.as_slice()));

    let targets = match &query.department_id {
        Some(d) => vec![d.clone()],
        None => survey.target_departments.clone(),
    };
    let audience = audience_size(&data, &survey.company_id, &targets).await?;
    Ok(HttpResponse::Ok().json(json!({
        "survey_id": survey.id,
        "title": survey.title,
        "status": survey.status,
        "audience": audience,
        "response_rate": response_rate(results.total_responses as u64, audience),
        "results": results,
    })))
}

fn answer_cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(b)) => if *b { "yes" } else { "no" }.to_string(),
        Some(other) => other.to_string(),
    }
}

/// One row per response, one column per question, in question order.
pub fn responses_csv(survey: &Survey, responses: &[SurveyResponse]) -> String {
    let mut headers = vec![
        "response_id".to_string(),
        "submitted_at".to_string(),
        "department_id".to_string(),
        "complete".to_string(),
    ];
    headers.extend(survey.questions.iter().map(|q| q.text.clone()));

    let rows: Vec<Vec<String>> = responses
        .iter()
        .map(|r| {
            let mut row = vec![
                r.id.clone(),
                r.submitted_at.to_rfc3339(),
                r.department_id.clone().unwrap_or_default(),
                r.is_complete.to_string(),
            ];
            row.extend(survey.questions.iter().map(|q| {
                answer_cell(
                    r.answers
                        .iter()
                        .find(|a| a.question_id == q.id)
                        .map(|a| &a.value),
                )
            }));
            row
        })
        .collect();
    to_csv(&headers, &rows)
}

/// GET /api/surveys/{id}/export
pub async fn export_responses(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<ExportQuery>,
) -> ApiResult<HttpResponse> {
    auth.require(Role::Leader)?;
    let survey = load_survey(&data, &auth, &path).await?;
    let responses = load_responses(&data, &survey.id, None).await?;
    info!("Exporting {} responses of survey {}", responses.len(), survey.id);

    match query.format.as_deref().unwrap_or("csv") {
        "csv" => Ok(csv_attachment(
            &format!("{}-responses.csv", slug(&survey.title)),
            responses_csv(&survey, &responses),
        )),
        "json" => {
            let results =
                aggregate(&survey.questions, responses.iter().map(|r| r.answers.as_slice()));
            Ok(HttpResponse::Ok().json(json!({
                "survey": survey,
                "results": results,
                "exported_at": Utc::now(),
            })))
        }
        other => Err(ApiError::bad_request(format!("Unsupported export format '{}'", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::survey::{Question, QuestionType, SurveySettings, SurveyType};
    use chrono::Duration;

    fn survey(status: SurveyStatus) -> Survey {
        let now = Utc::now();
        Survey {
            id: "s1".into(),
            company_id: "c1".into(),
            title: "Climate".into(),
            description: None,
            survey_type: SurveyType::GeneralClimate,
            status,
            questions: vec![
                Question {
                    id: "q1".into(),
                    text: "Workload is fair".into(),
                    question_type: QuestionType::Likert,
                    options: vec![],
                    required: true,
                    category: None,
                },
                Question {
                    id: "q2".into(),
                    text: "Comments".into(),
                    question_type: QuestionType::OpenEnded,
                    options: vec![],
                    required: false,
                    category: None,
                },
            ],
            target_departments: vec![],
            start_date: None,
            end_date: None,
            settings: SurveySettings::default(),
            created_by: "u1".into(),
            template_id: None,
            response_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn only_active_surveys_in_window_accept_answers() {
        let now = Utc::now();
        assert!(check_open(&survey(SurveyStatus::Active), now).is_ok());
        assert!(check_open(&survey(SurveyStatus::Paused), now).is_err());
        let mut ended = survey(SurveyStatus::Active);
        ended.end_date = Some(now - Duration::hours(1));
        assert!(check_open(&ended, now).is_err());
        let mut future = survey(SurveyStatus::Active);
        future.start_date = Some(now + Duration::hours(1));
        assert!(check_open(&future, now).is_err());
    }

    #[test]
    fn department_targeting_uses_the_stored_department() {
        let mut targeted = survey(SurveyStatus::Active);
        targeted.target_departments = vec!["d1".into()];
        assert!(check_target(&targeted, Some("d1")).is_ok());
        assert!(matches!(check_target(&targeted, Some("d2")), Err(ApiError::Forbidden(_))));
        // No stored department means no access, whatever the request body carries.
        assert!(matches!(check_target(&targeted, None), Err(ApiError::Forbidden(_))));
        assert!(check_target(&survey(SurveyStatus::Active), None).is_ok());
    }

    #[test]
    fn respondent_hash_is_stable_and_scoped() {
        assert_eq!(respondent_hash("s1", "u1"), respondent_hash("s1", "u1"));
        assert_ne!(respondent_hash("s1", "u1"), respondent_hash("s2", "u1"));
        assert!(!respondent_hash("s1", "u1").contains("u1"));
    }

    #[test]
    fn csv_has_a_column_per_question() {
        let s = survey(SurveyStatus::Completed);
        let response = SurveyResponse {
            id: "r1".into(),
            survey_id: "s1".into(),
            company_id: "c1".into(),
            user_id: None,
            respondent_hash: "h".into(),
            department_id: Some("d1".into()),
            answers: vec![Answer { question_id: "q1".into(), value: json!(4) }],
            is_complete: false,
            submitted_at: Utc::now(),
        };
        let csv = responses_csv(&s, &[response]);
        let mut lines = csv.lines();
        assert_eq!(
            lines.next().unwrap(),
            "response_id,submitted_at,department_id,complete,Workload is fair,Comments"
        );
        let row = lines.next().unwrap();
        assert!(row.starts_with("r1,"));
        assert!(row.ends_with(",d1,false,4,"));
    }
}
