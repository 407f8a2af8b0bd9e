// Tenant administration under /api/admin/companies.

use actix_web::{web, HttpResponse};
use chrono::Utc;
use futures::stream::TryStreamExt;
use log::info;
use mongodb::bson::{doc, to_bson, Document};
use serde::Deserialize;
use serde_json::json;

use crate::app_state::AppState;
use crate::audit::{self, AuditEntry};
use crate::auth::AuthUser;
use crate::db::{COMPANIES, DEPARTMENTS, USERS};
use crate::error::{ApiError, ApiResult};
use crate::models::company::{Branding, Company, CompanySettings};
use crate::models::new_id;
use crate::models::user::Role;
use crate::query::{apply_search, Paging, TOTAL_COUNT_HEADER};

#[derive(Debug, Deserialize)]
pub struct CompanyListQuery {
    pub search: Option<String>,
    pub industry: Option<String>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateCompanyRequest {
    pub name: String,
    pub industry: String,
    pub size: String,
    pub domain: Option<String>,
    pub branding: Option<Branding>,
    pub settings: Option<CompanySettings>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCompanyRequest {
    pub name: Option<String>,
    pub industry: Option<String>,
    pub size: Option<String>,
    pub domain: Option<String>,
    pub branding: Option<Branding>,
    pub settings: Option<CompanySettings>,
    pub is_active: Option<bool>,
}

fn required_field(value: &str, label: &str) -> ApiResult<String> {
    let value = value.trim();
    if value.is_empty() {
        Err(ApiError::bad_request(format!("{} is required", label)))
    } else {
        Ok(value.to_string())
    }
}

async fn load_company(data: &AppState, auth: &AuthUser, id: &str) -> ApiResult<Company> {
    if !auth.can_access_company(id) {
        return Err(ApiError::not_found("Company not found"));
    }
    data.mongodb
        .collection::<Company>(COMPANIES)
        .find_one(doc! { "_id": id })
        .await?
        .ok_or_else(|| ApiError::not_found("Company not found"))
}

/// GET /api/admin/companies
pub async fn list_companies(
    auth: AuthUser,
    data: web::Data<AppState>,
    query: web::Query<CompanyListQuery>,
) -> ApiResult<HttpResponse> {
    auth.require(Role::CompanyAdmin)?;
    let mut filter = Document::new();
    if !auth.is_super_admin() {
        match &auth.company_id {
            Some(own) => filter.insert("_id", own),
            None => return Ok(HttpResponse::Ok().json(Vec::<Company>::new())),
        };
    }
    if let Some(industry) = &query.industry {
        filter.insert("industry", industry);
    }
    apply_search(&mut filter, query.search.as_deref(), &["name", "domain"]);

    let paging = Paging::new(query.page, query.limit);
    let companies = data.mongodb.collection::<Company>(COMPANIES);
    let total = companies.count_documents(filter.clone()).await?;
    let found: Vec<Company> = companies
        .find(filter)
        .sort(doc! { "name": 1 })
        .skip(paging.skip())
        .limit(paging.limit as i64)
        .await?
        .try_collect()
        .await?;
    // The body stays a bare array; paging travels in the total-count header.
    Ok(HttpResponse::Ok()
        .insert_header((TOTAL_COUNT_HEADER, total.to_string()))
        .json(found))
}

/// POST /api/admin/companies
pub async fn create_company(
    auth: AuthUser,
    data: web::Data<AppState>,
    payload: web::Json<CreateCompanyRequest>,
) -> ApiResult<HttpResponse> {
    auth.require(Role::SuperAdmin)?;
    let req = payload.into_inner();
    let now = Utc::now();
    let company = Company {
        id: new_id(),
        name: required_field(&req.name, "Name")?,
        industry: required_field(&req.industry, "Industry")?,
        size: required_field(&req.size, "Size")?,
        domain: req.domain.map(|d| d.trim().to_lowercase()).filter(|d| !d.is_empty()),
        branding: req.branding.unwrap_or_default(),
        settings: req.settings.unwrap_or_default(),
        is_active: true,
        created_at: now,
        updated_at: now,
    };
    let companies = data.mongodb.collection::<Company>(COMPANIES);
    if companies
        .find_one(doc! { "name": &company.name })
        .await?
        .is_some()
    {
        return Err(ApiError::Conflict(format!(
            "A company named '{}' already exists",
            company.name
        )));
    }
    companies.insert_one(&company).await?;
    info!("Company {} created", company.id);
    audit::record(
        &data,
        &auth,
        AuditEntry::new("company", &company.id, "create")
            .company(Some(&company.id))
            .after(&company),
    )
    .await;
    Ok(HttpResponse::Created().json(company))
}

/// GET /api/admin/companies/{id}
pub async fn get_company(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    auth.require(Role::CompanyAdmin)?;
    let company = load_company(&data, &auth, &path).await?;
    Ok(HttpResponse::Ok().json(company))
}

/// PUT /api/admin/companies/{id}
pub async fn update_company(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateCompanyRequest>,
) -> ApiResult<HttpResponse> {
    auth.require(Role::CompanyAdmin)?;
    let existing = load_company(&data, &auth, &path).await?;
    let req = payload.into_inner();

    let mut set_doc = Document::new();
    if let Some(name) = &req.name {
        set_doc.insert("name", required_field(name, "Name")?);
    }
    if let Some(industry) = &req.industry {
        set_doc.insert("industry", required_field(industry, "Industry")?);
    }
    if let Some(size) = &req.size {
        set_doc.insert("size", required_field(size, "Size")?);
    }
    if let Some(domain) = &req.domain {
        set_doc.insert("domain", domain.trim().to_lowercase());
    }
    if let Some(branding) = &req.branding {
        set_doc.insert("branding", to_bson(branding)?);
    }
    if let Some(settings) = &req.settings {
        set_doc.insert("settings", to_bson(settings)?);
    }
    if let Some(is_active) = req.is_active {
        if !auth.is_super_admin() {
            return Err(ApiError::forbidden("Only super admins can change activation"));
        }
        set_doc.insert("is_active", is_active);
    }
    if set_doc.is_empty() {
        return Err(ApiError::bad_request("No fields to update"));
    }
    set_doc.insert("updated_at", to_bson(&Utc::now())?);

    let companies = data.mongodb.collection::<Company>(COMPANIES);
    companies
        .update_one(doc! { "_id": &existing.id }, doc! { "$set": set_doc })
        .await?;
    let updated = load_company(&data, &auth, &existing.id).await?;
    audit::record(
        &data,
        &auth,
        AuditEntry::new("company", &updated.id, "update")
            .company(Some(&updated.id))
            .before(&existing)
            .after(&updated),
    )
    .await;
    Ok(HttpResponse::Ok().json(updated))
}

/// DELETE /api/admin/companies/{id}
pub async fn delete_company(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    auth.require(Role::SuperAdmin)?;
    let existing = load_company(&data, &auth, &path).await?;
    let remaining = data
        .mongodb
        .collection::<Document>(USERS)
        .count_documents(doc! { "company_id": &existing.id })
        .await?;
    if remaining > 0 {
        return Err(ApiError::bad_request(format!(
            "Company still has {} users",
            remaining
        )));
    }
    data.mongodb
        .collection::<Document>(DEPARTMENTS)
        .delete_many(doc! { "company_id": &existing.id })
        .await?;
    data.mongodb
        .collection::<Company>(COMPANIES)
        .delete_one(doc! { "_id": &existing.id })
        .await?;
    info!("Company {} deleted", existing.id);
    audit::record(
        &data,
        &auth,
        AuditEntry::new("company", &existing.id, "delete").before(&existing),
    )
    .await;
    Ok(HttpResponse::Ok().json(json!({ "message": "Company deleted", "id": existing.id })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{bearer, test_app};
    use actix_web::{http::StatusCode, test as actix_test};

    #[actix_web::test]
    async fn only_super_admin_creates_companies() {
        let app = actix_test::init_service(test_app().await).await;
        let req = actix_test::TestRequest::post()
            .uri("/api/admin/companies")
            .insert_header(bearer(Role::CompanyAdmin, Some("c1")))
            .set_json(json!({ "name": "Acme", "industry": "Technology", "size": "50-200" }))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn other_tenants_are_invisible() {
        let app = actix_test::init_service(test_app().await).await;
        let req = actix_test::TestRequest::get()
            .uri("/api/admin/companies/c2")
            .insert_header(bearer(Role::CompanyAdmin, Some("c1")))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn company_list_is_a_bare_array() {
        let app = actix_test::init_service(test_app().await).await;
        let req = actix_test::TestRequest::get()
            .uri("/api/admin/companies")
            .insert_header(bearer(Role::CompanyAdmin, None))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = actix_test::read_body_json(resp).await;
        assert_eq!(body, json!([]));
    }

    #[test]
    fn blank_required_fields_are_rejected() {
        assert!(required_field("  ", "Name").is_err());
        assert_eq!(required_field(" Acme ", "Name").unwrap(), "Acme");
    }
}
