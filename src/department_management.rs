// Department CRUD and hierarchy under /api/admin/departments.

use actix_web::{web, HttpResponse};
use chrono::Utc;
use futures::stream::TryStreamExt;
use log::info;
use mongodb::bson::{doc, to_bson, Bson, Document};
use serde::Deserialize;
use serde_json::json;

use crate::app_state::AppState;
use crate::audit::{self, AuditEntry};
use crate::auth::AuthUser;
use crate::db::{COMPANIES, DEPARTMENTS, USERS};
use crate::error::{ApiError, ApiResult};
use crate::models::department::{build_department_tree, creates_cycle, Department};
use crate::models::new_id;
use crate::models::user::Role;
use crate::query::apply_search;

#[derive(Debug, Deserialize)]
pub struct DepartmentListQuery {
    pub company_id: Option<String>,
    pub parent_department_id: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateDepartmentRequest {
    pub name: String,
    pub company_id: Option<String>,
    pub parent_department_id: Option<String>,
    pub description: Option<String>,
    pub manager_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateDepartmentRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    /// An empty string moves the department to the top level.
    pub parent_department_id: Option<String>,
    pub manager_id: Option<String>,
    pub is_active: Option<bool>,
}

fn list_filter(auth: &AuthUser, requested_company: Option<&str>) -> Document {
    let mut filter = auth.company_filter();
    if auth.is_super_admin() {
        if let Some(company_id) = requested_company {
            filter.insert("company_id", company_id);
        }
    }
    filter
}

async fn company_departments(data: &AppState, company_id: &str) -> ApiResult<Vec<Department>> {
    Ok(data
        .mongodb
        .collection::<Department>(DEPARTMENTS)
        .find(doc! { "company_id": company_id })
        .await?
        .try_collect()
        .await?)
}

async fn load_department(data: &AppState, auth: &AuthUser, id: &str) -> ApiResult<Department> {
    let mut filter = auth.company_filter();
    filter.insert("_id", id);
    data.mongodb
        .collection::<Department>(DEPARTMENTS)
        .find_one(filter)
        .await?
        .ok_or_else(|| ApiError::not_found("Department not found"))
}

async fn check_manager(data: &AppState, company_id: &str, manager_id: &str) -> ApiResult<()> {
    let found = data
        .mongodb
        .collection::<Document>(USERS)
        .find_one(doc! { "_id": manager_id, "company_id": company_id })
        .await?;
    if found.is_none() {
        return Err(ApiError::bad_request("Manager must belong to the same company"));
    }
    Ok(())
}

/// GET /api/admin/departments
pub async fn list_departments(
    auth: AuthUser,
    data: web::Data<AppState>,
    query: web::Query<DepartmentListQuery>,
) -> ApiResult<HttpResponse> {
    auth.require(Role::Supervisor)?;
    if !auth.is_super_admin() && auth.company_id.is_none() {
        return Ok(HttpResponse::Ok().json(Vec::<Department>::new()));
    }
    let mut filter = list_filter(&auth, query.company_id.as_deref());
    if let Some(parent) = &query.parent_department_id {
        filter.insert("parent_department_id", parent);
    }
    apply_search(&mut filter, query.search.as_deref(), &["name", "description"]);
    let departments: Vec<Department> = data
        .mongodb
        .collection::<Department>(DEPARTMENTS)
        .find(filter)
        .sort(doc! { "name": 1 })
        .await?
        .try_collect()
        .await?;
    Ok(HttpResponse::Ok().json(departments))
}

/// GET /api/admin/departments/tree
pub async fn department_tree(
    auth: AuthUser,
    data: web::Data<AppState>,
    query: web::Query<DepartmentListQuery>,
) -> ApiResult<HttpResponse> {
    auth.require(Role::Supervisor)?;
    let filter = list_filter(&auth, query.company_id.as_deref());
    let departments: Vec<Department> = data
        .mongodb
        .collection::<Department>(DEPARTMENTS)
        .find(filter)
        .await?
        .try_collect()
        .await?;
    Ok(HttpResponse::Ok().json(json!({ "tree": build_department_tree(&departments) })))
}

/// POST /api/admin/departments
pub async fn create_department(
    auth: AuthUser,
    data: web::Data<AppState>,
    payload: web::Json<CreateDepartmentRequest>,
) -> ApiResult<HttpResponse> {
    auth.require(Role::CompanyAdmin)?;
    let req = payload.into_inner();
    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::bad_request("Name is required"));
    }
    let company_id = auth.resolve_company(req.company_id.as_deref())?;
    if data
        .mongodb
        .collection::<Document>(COMPANIES)
        .find_one(doc! { "_id": &company_id })
        .await?
        .is_none()
    {
        return Err(ApiError::bad_request(format!("Unknown company '{}'", company_id)));
    }
    if let Some(parent) = &req.parent_department_id {
        let siblings = company_departments(&data, &company_id).await?;
        if !siblings.iter().any(|d| &d.id == parent) {
            return Err(ApiError::bad_request("Parent department not found in this company"));
        }
    }
    if let Some(manager_id) = &req.manager_id {
        check_manager(&data, &company_id, manager_id).await?;
    }

    let now = Utc::now();
    let department = Department {
        id: new_id(),
        company_id,
        name,
        description: req.description,
        parent_department_id: req.parent_department_id,
        manager_id: req.manager_id,
        is_active: true,
        created_at: now,
        updated_at: now,
    };
    data.mongodb
        .collection::<Department>(DEPARTMENTS)
        .insert_one(&department)
        .await?;
    info!("Department {} created in {}", department.id, department.company_id);
    audit::record(
        &data,
        &auth,
        AuditEntry::new("department", &department.id, "create")
            .company(Some(&department.company_id))
            .after(&department),
    )
    .await;
    Ok(HttpResponse::Created().json(department))
}

/// GET /api/admin/departments/{id}
pub async fn get_department(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    auth.require(Role::Supervisor)?;
    Ok(HttpResponse::Ok().json(load_department(&data, &auth, &path).await?))
}

/// PUT /api/admin/departments/{id}
pub async fn update_department(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateDepartmentRequest>,
) -> ApiResult<HttpResponse> {
    auth.require(Role::CompanyAdmin)?;
    let existing = load_department(&data, &auth, &path).await?;
    let req = payload.into_inner();

    let mut set_doc = Document::new();
    if let Some(name) = &req.name {
        let name = name.trim();
        if name.is_empty() {
            return Err(ApiError::bad_request("Name cannot be empty"));
        }
        set_doc.insert("name", name);
    }
    if let Some(description) = &req.description {
        set_doc.insert("description", description);
    }
    if let Some(parent) = req.parent_department_id.as_deref() {
        if parent.is_empty() {
            set_doc.insert("parent_department_id", Bson::Null);
        } else {
            let all = company_departments(&data, &existing.company_id).await?;
            if !all.iter().any(|d| d.id == parent) {
                return Err(ApiError::bad_request("Parent department not found in this company"));
            }
            if creates_cycle(&all, &existing.id, parent) {
                return Err(ApiError::bad_request(
                    "A department cannot be placed under itself or its descendants",
                ));
            }
            set_doc.insert("parent_department_id", parent);
        }
    }
    if let Some(manager_id) = &req.manager_id {
        check_manager(&data, &existing.company_id, manager_id).await?;
        set_doc.insert("manager_id", manager_id);
    }
    if let Some(is_active) = req.is_active {
        set_doc.insert("is_active", is_active);
    }
    if set_doc.is_empty() {
        return Err(ApiError::bad_request("No fields to update"));
    }
    set_doc.insert("updated_at", to_bson(&Utc::now())?);

    data.mongodb
        .collection::<Department>(DEPARTMENTS)
        .update_one(doc! { "_id": &existing.id }, doc! { "$set": set_doc })
        .await?;
    let updated = load_department(&data, &auth, &existing.id).await?;
    audit::record(
        &data,
        &auth,
        AuditEntry::new("department", &updated.id, "update")
            .company(Some(&updated.company_id))
            .before(&existing)
            .after(&updated),
    )
    .await;
    Ok(HttpResponse::Ok().json(updated))
}

/// DELETE /api/admin/departments/{id}
pub async fn delete_department(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    auth.require(Role::CompanyAdmin)?;
    let existing = load_department(&data, &auth, &path).await?;
    let departments = data.mongodb.collection::<Department>(DEPARTMENTS);
    let children = departments
        .count_documents(doc! { "parent_department_id": &existing.id })
        .await?;
    if children > 0 {
        return Err(ApiError::bad_request(format!(
            "Department has {} sub-departments; move or delete them first",
            children
        )));
    }
    departments.delete_one(doc! { "_id": &existing.id }).await?;
    // Members stay in the company without a department.
    data.mongodb
        .collection::<Document>(USERS)
        .update_many(
            doc! { "department_id": &existing.id },
            doc! { "$set": { "department_id": Bson::Null } },
        )
        .await?;
    audit::record(
        &data,
        &auth,
        AuditEntry::new("department", &existing.id, "delete")
            .company(Some(&existing.company_id))
            .before(&existing),
    )
    .await;
    Ok(HttpResponse::Ok().json(json!({ "message": "Department deleted", "id": existing.id })))
}
