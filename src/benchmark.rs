// Reference scores under /api/benchmarks and gap analysis against survey results.

use std::collections::BTreeMap;

use actix_web::{web, HttpResponse};
use chrono::Utc;
use futures::stream::TryStreamExt;
use log::info;
use mongodb::bson::{doc, to_bson, Document};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::app_state::AppState;
use crate::audit::{self, AuditEntry};
use crate::auth::AuthUser;
use crate::db::{BENCHMARKS, RESPONSES};
use crate::error::{ApiError, ApiResult};
use crate::models::benchmark::{Benchmark, BenchmarkMetric, BenchmarkType, ValidationStatus};
use crate::models::new_id;
use crate::models::survey::SurveyResponse;
use crate::models::user::Role;
use crate::survey::load_survey;
use crate::survey_results::{aggregate, round1, ResultsSummary};

/// Gap percentages within this band count as on par.
pub const PARITY_BAND: f64 = 5.0;

#[derive(Debug, Deserialize)]
pub struct BenchmarkListQuery {
    #[serde(rename = "type")]
    pub benchmark_type: Option<BenchmarkType>,
    pub category: Option<String>,
    pub industry: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateBenchmarkRequest {
    pub name: String,
    pub benchmark_type: BenchmarkType,
    pub category: String,
    pub industry: Option<String>,
    pub source: String,
    pub metrics: Vec<BenchmarkMetric>,
    pub company_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateBenchmarkRequest {
    pub name: Option<String>,
    pub category: Option<String>,
    pub industry: Option<String>,
    pub source: Option<String>,
    pub metrics: Option<Vec<BenchmarkMetric>>,
}

#[derive(Debug, Deserialize)]
pub struct ValidationRequest {
    pub validation_status: ValidationStatus,
}

#[derive(Debug, Deserialize)]
pub struct CompareRequest {
    pub survey_id: String,
    pub benchmark_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Performance {
    Above,
    At,
    Below,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricGap {
    pub metric: String,
    pub current: f64,
    pub benchmark: f64,
    pub gap: f64,
    pub gap_percentage: f64,
    pub performance: Performance,
}

#[derive(Debug, Clone, Serialize)]
pub struct GapAnalysis {
    pub gaps: Vec<MetricGap>,
    pub strengths: Vec<String>,
    pub improvement_areas: Vec<String>,
    pub overall_gap: Option<f64>,
    pub unmatched_metrics: Vec<String>,
}

pub fn classify_gap(gap_percentage: f64) -> Performance {
    if gap_percentage >= PARITY_BAND {
        Performance::Above
    } else if gap_percentage <= -PARITY_BAND {
        Performance::Below
    } else {
        Performance::At
    }
}

/// Matches benchmark metrics to category scores by case-insensitive name. A metric
/// named "overall" compares against the overall score.
pub fn gap_analysis(results: &ResultsSummary, metrics: &[BenchmarkMetric]) -> GapAnalysis {
    let mut scores: BTreeMap<String, f64> = results
        .category_scores
        .iter()
        .map(|c| (c.category.to_lowercase(), c.score))
        .collect();
    if let Some(overall) = results.overall_score {
        scores.entry("overall".to_string()).or_insert(overall);
    }

    let mut gaps = Vec::new();
    let mut unmatched_metrics = Vec::new();
    for metric in metrics {
        let Some(&current) = scores.get(&metric.name.trim().to_lowercase()) else {
            unmatched_metrics.push(metric.name.clone());
            continue;
        };
        let gap = current - metric.value;
        let gap_percentage = if metric.value == 0.0 {
            0.0
        } else {
            gap / metric.value * 100.0
        };
        gaps.push(MetricGap {
            metric: metric.name.clone(),
            current,
            benchmark: metric.value,
            gap: round1(gap),
            gap_percentage: round1(gap_percentage),
            performance: classify_gap(gap_percentage),
        });
    }

    let named = |wanted: Performance| -> Vec<String> {
        gaps.iter()
            .filter(|g| g.performance == wanted)
            .map(|g| g.metric.clone())
            .collect()
    };
    let strengths = named(Performance::Above);
    let improvement_areas = named(Performance::Below);
    let overall_gap = if gaps.is_empty() {
        None
    } else {
        Some(round1(gaps.iter().map(|g| g.gap).sum::<f64>() / gaps.len() as f64))
    };
    GapAnalysis {
        gaps,
        strengths,
        improvement_areas,
        overall_gap,
        unmatched_metrics,
    }
}

fn check_metrics(metrics: &[BenchmarkMetric]) -> ApiResult<()> {
    if metrics.is_empty() {
        return Err(ApiError::bad_request("A benchmark needs at least one metric"));
    }
    for metric in metrics {
        if metric.name.trim().is_empty() {
            return Err(ApiError::bad_request("Metric name is required"));
        }
        if !metric.value.is_finite() {
            return Err(ApiError::bad_request(format!(
                "Metric '{}' has an invalid value",
                metric.name
            )));
        }
    }
    Ok(())
}

/// Industry benchmarks are shared; internal ones stay inside their company.
fn visibility_filter(auth: &AuthUser) -> Document {
    if auth.is_super_admin() {
        return Document::new();
    }
    let mut visible = vec![doc! { "benchmark_type": BenchmarkType::Industry.as_str() }];
    if let Some(company_id) = &auth.company_id {
        visible.push(doc! { "company_id": company_id });
    }
    doc! { "$or": visible }
}

/// Who may change a benchmark: super admins for industry data, company admins of the
/// owning company for internal data.
fn check_owner(auth: &AuthUser, benchmark: &Benchmark) -> ApiResult<()> {
    let allowed = match benchmark.benchmark_type {
        BenchmarkType::Industry => auth.is_super_admin(),
        BenchmarkType::Internal => {
            auth.role.at_least(Role::CompanyAdmin)
                && benchmark
                    .company_id
                    .as_deref()
                    .is_some_and(|c| auth.can_access_company(c))
        }
    };
    if allowed {
        Ok(())
    } else {
        Err(ApiError::forbidden("Not allowed to modify this benchmark"))
    }
}

async fn load_benchmark(data: &AppState, auth: &AuthUser, id: &str) -> ApiResult<Benchmark> {
    let mut filter = visibility_filter(auth);
    filter.insert("_id", id);
    data.mongodb
        .collection::<Benchmark>(BENCHMARKS)
        .find_one(filter)
        .await?
        .ok_or_else(|| ApiError::not_found("Benchmark not found"))
}

/// GET /api/benchmarks
pub async fn list_benchmarks(
    auth: AuthUser,
    data: web::Data<AppState>,
    query: web::Query<BenchmarkListQuery>,
) -> ApiResult<HttpResponse> {
    let mut filter = visibility_filter(&auth);
    if let Some(benchmark_type) = query.benchmark_type {
        filter.insert("benchmark_type", benchmark_type.as_str());
    }
    if let Some(category) = &query.category {
        filter.insert("category", category);
    }
    if let Some(industry) = &query.industry {
        filter.insert("industry", industry);
    }
    let benchmarks: Vec<Benchmark> = data
        .mongodb
        .collection::<Benchmark>(BENCHMARKS)
        .find(filter)
        .sort(doc! { "category": 1, "name": 1 })
        .await?
        .try_collect()
        .await?;
    Ok(HttpResponse::Ok().json(benchmarks))
}

/// POST /api/benchmarks
pub async fn create_benchmark(
    auth: AuthUser,
    data: web::Data<AppState>,
    payload: web::Json<CreateBenchmarkRequest>,
) -> ApiResult<HttpResponse> {
    let req = payload.into_inner();
    let company_id = match req.benchmark_type {
        BenchmarkType::Industry => {
            auth.require(Role::SuperAdmin)?;
            None
        }
        BenchmarkType::Internal => {
            auth.require(Role::CompanyAdmin)?;
            Some(auth.resolve_company(req.company_id.as_deref())?)
        }
    };
    let name = req.name.trim().to_string();
    if name.is_empty() || req.category.trim().is_empty() {
        return Err(ApiError::bad_request("Name and category are required"));
    }
    check_metrics(&req.metrics)?;

    let now = Utc::now();
    let benchmark = Benchmark {
        id: new_id(),
        name,
        benchmark_type: req.benchmark_type,
        category: req.category.trim().to_string(),
        industry: req.industry,
        company_id,
        source: req.source,
        metrics: req.metrics,
        validation_status: ValidationStatus::Pending,
        created_by: auth.user_id.clone(),
        created_at: now,
        updated_at: now,
    };
    data.mongodb
        .collection::<Benchmark>(BENCHMARKS)
        .insert_one(&benchmark)
        .await?;
    info!(
        "{} benchmark {} created by {}",
        benchmark.benchmark_type.as_str(),
        benchmark.id,
        auth.user_id
    );
    audit::record(
        &data,
        &auth,
        AuditEntry::new("benchmark", &benchmark.id, "create")
            .company(benchmark.company_id.as_deref())
            .after(&benchmark),
    )
    .await;
    Ok(HttpResponse::Created().json(benchmark))
}

/// GET /api/benchmarks/{id}
pub async fn get_benchmark(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let benchmark = load_benchmark(&data, &auth, &path).await?;
    Ok(HttpResponse::Ok().json(benchmark))
}

/// PUT /api/benchmarks/{id}
pub async fn update_benchmark(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateBenchmarkRequest>,
) -> ApiResult<HttpResponse> {
    let existing = load_benchmark(&data, &auth, &path).await?;
    check_owner(&auth, &existing)?;
    let req = payload.into_inner();

    let mut set_doc = Document::new();
    if let Some(name) = &req.name {
        if name.trim().is_empty() {
            return Err(ApiError::bad_request("Name cannot be empty"));
        }
        set_doc.insert("name", name.trim());
    }
    if let Some(category) = &req.category {
        set_doc.insert("category", category.trim());
    }
    if let Some(industry) = &req.industry {
        set_doc.insert("industry", industry);
    }
    if let Some(source) = &req.source {
        set_doc.insert("source", source);
    }
    if let Some(metrics) = &req.metrics {
        check_metrics(metrics)?;
        set_doc.insert("metrics", to_bson(metrics)?);
        // New figures need validating again.
        set_doc.insert("validation_status", ValidationStatus::Pending.as_str());
    }
    if set_doc.is_empty() {
        return Err(ApiError::bad_request("No fields to update"));
    }
    set_doc.insert("updated_at", to_bson(&Utc::now())?);

    data.mongodb
        .collection::<Benchmark>(BENCHMARKS)
        .update_one(doc! { "_id": &existing.id }, doc! { "$set": set_doc })
        .await?;
    let updated = load_benchmark(&data, &auth, &existing.id).await?;
    audit::record(
        &data,
        &auth,
        AuditEntry::new("benchmark", &updated.id, "update")
            .company(updated.company_id.as_deref())
            .before(&existing)
            .after(&updated),
    )
    .await;
    Ok(HttpResponse::Ok().json(updated))
}

/// DELETE /api/benchmarks/{id}
pub async fn delete_benchmark(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let existing = load_benchmark(&data, &auth, &path).await?;
    check_owner(&auth, &existing)?;
    data.mongodb
        .collection::<Benchmark>(BENCHMARKS)
        .delete_one(doc! { "_id": &existing.id })
        .await?;
    audit::record(
        &data,
        &auth,
        AuditEntry::new("benchmark", &existing.id, "delete")
            .company(existing.company_id.as_deref())
            .before(&existing),
    )
    .await;
    Ok(HttpResponse::Ok().json(json!({ "message": "Benchmark deleted", "id": existing.id })))
}

/// PATCH /api/benchmarks/{id}/validation
pub async fn set_validation(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<ValidationRequest>,
) -> ApiResult<HttpResponse> {
    auth.require(Role::SuperAdmin)?;
    let existing = load_benchmark(&data, &auth, &path).await?;
    let status = payload.validation_status;
    let now = to_bson(&Utc::now())?;
    data.mongodb
        .collection::<Benchmark>(BENCHMARKS)
        .update_one(
            doc! { "_id": &existing.id },
            doc! { "$set": { "validation_status": status.as_str(), "updated_at": now } },
        )
        .await?;
    info!("Benchmark {} marked {}", existing.id, status.as_str());
    audit::record(
        &data,
        &auth,
        AuditEntry::new("benchmark", &existing.id, "validation")
            .company(existing.company_id.as_deref())
            .before(&json!({ "validation_status": existing.validation_status }))
            .after(&json!({ "validation_status": status })),
    )
    .await;
    let updated = load_benchmark(&data, &auth, &existing.id).await?;
    Ok(HttpResponse::Ok().json(updated))
}

/// POST /api/benchmarks/compare
pub async fn compare(
    auth: AuthUser,
    data: web::Data<AppState>,
    payload: web::Json<CompareRequest>,
) -> ApiResult<HttpResponse> {
    auth.require(Role::Leader)?;
    let benchmark = load_benchmark(&data, &auth, &payload.benchmark_id).await?;
    if benchmark.validation_status == ValidationStatus::Rejected {
        return Err(ApiError::bad_request("Rejected benchmarks cannot be used for comparison"));
    }
    let survey = load_survey(&data, &auth, &payload.survey_id).await?;
    let responses: Vec<SurveyResponse> = data
        .mongodb
        .collection::<SurveyResponse>(RESPONSES)
        .find(doc! { "survey_id": &survey.id })
        .await?
        .try_collect()
        .await?;
    let results = aggregate(&survey.questions, responses.iter().map(|r| r.answers.as_slice()));
    let analysis = gap_analysis(&results, &benchmark.metrics);
    Ok(HttpResponse::Ok().json(json!({
        "survey_id": survey.id,
        "benchmark_id": benchmark.id,
        "benchmark_name": benchmark.name,
        "validation_status": benchmark.validation_status,
        "total_responses": results.total_responses,
        "analysis": analysis,
    })))
}
