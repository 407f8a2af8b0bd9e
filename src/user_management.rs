// Admin user management under /api/admin/users.

use actix_web::{web, HttpResponse};
use chrono::Utc;
use futures::stream::TryStreamExt;
use log::info;
use mongodb::bson::{doc, to_bson, Document};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::audit::{self, AuditEntry};
use crate::auth::{check_membership_targets, hash_password, is_valid_email, AuthUser, MIN_PASSWORD_LEN};
use crate::db::USERS;
use crate::error::{ApiError, ApiResult};
use crate::models::new_id;
use crate::models::user::{Role, User, UserProfile, UserStatus};
use crate::query::{apply_search, Paging};

#[derive(Debug, Deserialize)]
pub struct UserListQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub search: Option<String>,
    pub role: Option<String>,
    pub department_id: Option<String>,
    pub status: Option<String>,
    pub company_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
    pub role: String,
    pub department_id: Option<String>,
    pub company_id: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub department_id: Option<String>,
    pub status: Option<UserStatus>,
}

/// Company admins manage their own company and cannot hand out super admin.
fn check_assignable_role(auth: &AuthUser, role: Role) -> ApiResult<()> {
    if role == Role::SuperAdmin && !auth.is_super_admin() {
        return Err(ApiError::forbidden("Only super admins can grant super admin"));
    }
    Ok(())
}

fn parse_role(raw: &str) -> ApiResult<Role> {
    Role::parse(raw).ok_or_else(|| ApiError::bad_request(format!("Unknown role '{}'", raw)))
}

async fn load_user(data: &AppState, auth: &AuthUser, id: &str) -> ApiResult<User> {
    let users = data.mongodb.collection::<User>(USERS);
    let mut filter = auth.company_filter();
    filter.insert("_id", id);
    users
        .find_one(filter)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))
}

/// GET /api/admin/users
pub async fn list_users(
    auth: AuthUser,
    data: web::Data<AppState>,
    query: web::Query<UserListQuery>,
) -> ApiResult<HttpResponse> {
    auth.require(Role::CompanyAdmin)?;
    let mut filter = auth.company_filter();
    if auth.is_super_admin() {
        if let Some(company_id) = &query.company_id {
            filter.insert("company_id", company_id);
        }
    }
    if let Some(role) = &query.role {
        filter.insert("role", parse_role(role)?.as_str());
    }
    if let Some(department_id) = &query.department_id {
        filter.insert("department_id", department_id);
    }
    if let Some(status) = &query.status {
        filter.insert("status", status);
    }
    apply_search(&mut filter, query.search.as_deref(), &["name", "email"]);

    let paging = Paging::new(query.page, query.limit);
    let users = data.mongodb.collection::<User>(USERS);
    let total = users.count_documents(filter.clone()).await?;
    let found: Vec<User> = users
        .find(filter)
        .sort(doc! { "name": 1 })
        .skip(paging.skip())
        .limit(paging.limit as i64)
        .await?
        .try_collect()
        .await?;
    let profiles: Vec<UserProfile> = found.into_iter().map(UserProfile::from).collect();

    Ok(HttpResponse::Ok().json(json!({
        "users": profiles,
        "pagination": paging.pagination(total),
    })))
}

/// POST /api/admin/users
pub async fn create_user(
    auth: AuthUser,
    data: web::Data<AppState>,
    payload: web::Json<CreateUserRequest>,
) -> ApiResult<HttpResponse> {
    auth.require(Role::CompanyAdmin)?;
    let req = payload.into_inner();
    let name = req.name.trim().to_string();
    let email = req.email.trim().to_lowercase();
    if name.is_empty() {
        return Err(ApiError::bad_request("Name is required"));
    }
    if !is_valid_email(&email) {
        return Err(ApiError::bad_request("A valid email address is required"));
    }
    let role = parse_role(&req.role)?;
    check_assignable_role(&auth, role)?;
    let company_id = match (role, auth.is_super_admin(), req.company_id.as_deref()) {
        (Role::SuperAdmin, _, None) => None,
        (_, true, None) => auth.company_id.clone(),
        _ => Some(auth.resolve_company(req.company_id.as_deref())?),
    };
    // Generated passwords are never returned; the user goes through a reset.
    let password = match req.password {
        Some(p) if p.chars().count() < MIN_PASSWORD_LEN => {
            return Err(ApiError::bad_request(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )))
        }
        Some(p) => p,
        None => Uuid::new_v4().simple().to_string(),
    };

    let users = data.mongodb.collection::<User>(USERS);
    if users.find_one(doc! { "email": &email }).await?.is_some() {
        return Err(ApiError::Conflict("Email is already registered".to_string()));
    }
    check_membership_targets(&data, company_id.as_deref(), req.department_id.as_deref()).await?;

    let now = Utc::now();
    let user = User {
        id: new_id(),
        email,
        name,
        password_hash: hash_password(&password)?,
        role,
        company_id,
        department_id: req.department_id,
        status: UserStatus::Active,
        last_login: None,
        created_at: now,
        updated_at: now,
    };
    if let Err(e) = users.insert_one(&user).await {
        if ApiError::is_duplicate_key(&e) {
            return Err(ApiError::Conflict("Email is already registered".to_string()));
        }
        return Err(e.into());
    }
    let profile = UserProfile::from(user);
    info!("User {} created by {}", profile.id, auth.user_id);
    audit::record(
        &data,
        &auth,
        AuditEntry::new("user", &profile.id, "create")
            .company(profile.company_id.as_deref())
            .after(&profile),
    )
    .await;
    Ok(HttpResponse::Created().json(profile))
}

/// GET /api/admin/users/{id}
pub async fn get_user(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    auth.require(Role::CompanyAdmin)?;
    let user = load_user(&data, &auth, &path).await?;
    Ok(HttpResponse::Ok().json(UserProfile::from(user)))
}

/// PUT /api/admin/users/{id}
pub async fn update_user(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateUserRequest>,
) -> ApiResult<HttpResponse> {
    auth.require(Role::CompanyAdmin)?;
    let existing = load_user(&data, &auth, &path).await?;
    if existing.role == Role::SuperAdmin && !auth.is_super_admin() {
        return Err(ApiError::forbidden("Cannot modify a super admin"));
    }

    let mut set_doc = Document::new();
    if let Some(name) = &payload.name {
        let name = name.trim();
        if name.is_empty() {
            return Err(ApiError::bad_request("Name cannot be empty"));
        }
        set_doc.insert("name", name);
    }
    if let Some(email) = &payload.email {
        let email = email.trim().to_lowercase();
        if !is_valid_email(&email) {
            return Err(ApiError::bad_request("A valid email address is required"));
        }
        if email != existing.email {
            let users = data.mongodb.collection::<Document>(USERS);
            if users.find_one(doc! { "email": &email }).await?.is_some() {
                return Err(ApiError::Conflict("Email is already registered".to_string()));
            }
        }
        set_doc.insert("email", email);
    }
    if let Some(role) = &payload.role {
        let role = parse_role(role)?;
        check_assignable_role(&auth, role)?;
        set_doc.insert("role", role.as_str());
    }
    if let Some(department_id) = &payload.department_id {
        check_membership_targets(&data, existing.company_id.as_deref(), Some(department_id))
            .await?;
        set_doc.insert("department_id", department_id);
    }
    if let Some(status) = payload.status {
        if existing.id == auth.user_id && status != UserStatus::Active {
            return Err(ApiError::bad_request("You cannot deactivate your own account"));
        }
        set_doc.insert("status", status.as_str());
    }
    if set_doc.is_empty() {
        return Err(ApiError::bad_request("No fields to update"));
    }
    set_doc.insert("updated_at", to_bson(&Utc::now())?);

    let users = data.mongodb.collection::<User>(USERS);
    users
        .update_one(doc! { "_id": &existing.id }, doc! { "$set": set_doc })
        .await?;
    let updated = load_user(&data, &auth, &existing.id).await?;
    let before = UserProfile::from(existing);
    let after = UserProfile::from(updated);
    audit::record(
        &data,
        &auth,
        AuditEntry::new("user", &after.id, "update")
            .company(after.company_id.as_deref())
            .before(&before)
            .after(&after),
    )
    .await;
    Ok(HttpResponse::Ok().json(after))
}

/// DELETE /api/admin/users/{id}
pub async fn delete_user(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    auth.require(Role::CompanyAdmin)?;
    if *path == auth.user_id {
        return Err(ApiError::bad_request("You cannot delete your own account"));
    }
    let existing = load_user(&data, &auth, &path).await?;
    if existing.role == Role::SuperAdmin && !auth.is_super_admin() {
        return Err(ApiError::forbidden("Cannot delete a super admin"));
    }
    let users = data.mongodb.collection::<User>(USERS);
    users.delete_one(doc! { "_id": &existing.id }).await?;

    let profile = UserProfile::from(existing);
    info!("User {} deleted by {}", profile.id, auth.user_id);
    audit::record(
        &data,
        &auth,
        AuditEntry::new("user", &profile.id, "delete")
            .company(profile.company_id.as_deref())
            .before(&profile),
    )
    .await;
    Ok(HttpResponse::Ok().json(json!({ "message": "User deleted", "id": profile.id })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{bearer, test_app};
    use actix_web::{http::StatusCode, test as actix_test};

    #[actix_web::test]
    async fn employees_cannot_list_users() {
        let app = actix_test::init_service(test_app().await).await;
        let req = actix_test::TestRequest::get()
            .uri("/api/admin/users?page=1&limit=5")
            .insert_header(bearer(Role::Employee, Some("c1")))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn company_admin_cannot_create_super_admin() {
        let app = actix_test::init_service(test_app().await).await;
        let req = actix_test::TestRequest::post()
            .uri("/api/admin/users")
            .insert_header(bearer(Role::CompanyAdmin, Some("c1")))
            .set_json(json!({ "name": "Root", "email": "root@example.com", "role": "super_admin" }))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn create_rejects_unknown_role() {
        let app = actix_test::init_service(test_app().await).await;
        let req = actix_test::TestRequest::post()
            .uri("/api/admin/users")
            .insert_header(bearer(Role::CompanyAdmin, Some("c1")))
            .set_json(json!({ "name": "Ana", "email": "ana@example.com", "role": "boss" }))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn admins_cannot_delete_themselves() {
        let app = actix_test::init_service(test_app().await).await;
        let req = actix_test::TestRequest::delete()
            .uri("/api/admin/users/test-user")
            .insert_header(bearer(Role::CompanyAdmin, Some("c1")))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
