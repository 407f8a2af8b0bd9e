use std::sync::OnceLock;

use actix_web::{dev::Payload, web, FromRequest, HttpMessage, HttpRequest, HttpResponse};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use futures::future::{ready, Ready};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use log::{info, warn};
use mongodb::bson::{doc, to_bson, Document};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::app_state::AppState;
use crate::db::{COMPANIES, DEPARTMENTS, USERS};
use crate::error::{ApiError, ApiResult};
use crate::models::new_id;
use crate::models::user::{Role, User, UserProfile, UserStatus};

pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub company_id: Option<String>,
    pub exp: usize,
}

pub fn create_jwt(user: &User, secret: &str, expiry_hours: i64) -> ApiResult<String> {
    let expiration = Utc::now() + Duration::hours(expiry_hours);
    let claims = Claims {
        sub: user.id.clone(),
        role: user.role,
        company_id: user.company_id.clone(),
        exp: expiration.timestamp() as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_ref()))
        .map_err(|e| ApiError::Internal(format!("token encoding failed: {}", e)))
}

pub fn validate_jwt(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

/// The authenticated caller, taken from the claims the middleware stored.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub role: Role,
    pub company_id: Option<String>,
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            role: claims.role,
            company_id: claims.company_id,
        }
    }
}

impl FromRequest for AuthUser {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let claims = req.extensions().get::<Claims>().cloned();
        ready(
            claims
                .map(AuthUser::from)
                .ok_or_else(|| ApiError::Unauthorized("Authentication required".to_string())),
        )
    }
}

impl AuthUser {
    pub fn is_super_admin(&self) -> bool {
        self.role == Role::SuperAdmin
    }

    pub fn require(&self, role: Role) -> ApiResult<()> {
        if self.role.at_least(role) {
            Ok(())
        } else {
            Err(ApiError::forbidden(format!(
                "Requires {} role or above",
                role.as_str()
            )))
        }
    }

    pub fn can_access_company(&self, company_id: &str) -> bool {
        self.is_super_admin() || self.company_id.as_deref() == Some(company_id)
    }

    /// Company a write applies to. Super admins may name any company; everyone else is
    /// pinned to their own.
    pub fn resolve_company(&self, requested: Option<&str>) -> ApiResult<String> {
        match (self.is_super_admin(), requested, self.company_id.as_deref()) {
            (true, Some(id), _) => Ok(id.to_string()),
            (true, None, Some(own)) => Ok(own.to_string()),
            (true, None, None) => Err(ApiError::bad_request("company_id is required")),
            (false, Some(id), Some(own)) if id != own => {
                Err(ApiError::forbidden("Cannot act on another company"))
            }
            (false, _, Some(own)) => Ok(own.to_string()),
            (false, _, None) => Err(ApiError::forbidden("User is not attached to a company")),
        }
    }

    /// Filter restricting a query to what the caller may see.
    pub fn company_filter(&self) -> Document {
        match (&self.company_id, self.is_super_admin()) {
            (_, true) => doc! {},
            (Some(id), false) => doc! { "company_id": id },
            // Matches nothing.
            (None, false) => doc! { "_id": { "$exists": false } },
        }
    }
}

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| {
        Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is valid")
    })
}

pub fn is_valid_email(email: &str) -> bool {
    email_regex().is_match(email)
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: Option<String>,
    pub role: Option<String>,
    pub company_id: Option<String>,
    pub department_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Returns the role to register with, or the reason the request is rejected.
pub fn validate_registration(req: &RegisterRequest) -> Result<Role, String> {
    if !is_valid_email(req.email.trim()) {
        return Err("A valid email address is required".to_string());
    }
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        ));
    }
    if req.name.as_deref().map(str::trim).unwrap_or("").is_empty() {
        return Err("Name is required".to_string());
    }
    let role = match req.role.as_deref() {
        None => Role::Employee,
        Some(raw) => Role::parse(raw).ok_or_else(|| format!("Unknown role '{}'", raw))?,
    };
    // Elevated accounts are created by an administrator through /api/admin/users.
    if role != Role::Employee {
        return Err(format!(
            "Role '{}' cannot be self-registered; ask an administrator",
            role.as_str()
        ));
    }
    Ok(role)
}

pub fn hash_password(password: &str) -> ApiResult<String> {
    hash(password, DEFAULT_COST).map_err(|e| ApiError::Internal(format!("hashing failed: {}", e)))
}

/// Checks that a company exists and, when given, that the department belongs to it.
pub async fn check_membership_targets(
    data: &AppState,
    company_id: Option<&str>,
    department_id: Option<&str>,
) -> ApiResult<()> {
    if let Some(company_id) = company_id {
        let companies = data.mongodb.collection::<Document>(COMPANIES);
        if companies.find_one(doc! { "_id": company_id }).await?.is_none() {
            return Err(ApiError::bad_request(format!("Unknown company '{}'", company_id)));
        }
    }
    if let Some(department_id) = department_id {
        let mut filter = doc! { "_id": department_id };
        if let Some(company_id) = company_id {
            filter.insert("company_id", company_id);
        }
        let departments = data.mongodb.collection::<Document>(DEPARTMENTS);
        if departments.find_one(filter).await?.is_none() {
            return Err(ApiError::bad_request(format!(
                "Unknown department '{}'",
                department_id
            )));
        }
    }
    Ok(())
}

/// Loads the caller's user document, for the fields the token does not carry.
pub async fn current_user(data: &AppState, auth: &AuthUser) -> ApiResult<User> {
    data.mongodb
        .collection::<User>(USERS)
        .find_one(doc! { "_id": &auth.user_id })
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Account no longer exists".to_string()))
}

/// POST /api/auth/register
pub async fn register(
    data: web::Data<AppState>,
    payload: web::Json<RegisterRequest>,
) -> ApiResult<HttpResponse> {
    let req = payload.into_inner();
    let role = validate_registration(&req).map_err(ApiError::BadRequest)?;
    let email = req.email.trim().to_lowercase();

    let users = data.mongodb.collection::<User>(USERS);
    if users.find_one(doc! { "email": &email }).await?.is_some() {
        return Err(ApiError::Conflict("Email is already registered".to_string()));
    }
    check_membership_targets(&data, req.company_id.as_deref(), req.department_id.as_deref())
        .await?;

    let now = Utc::now();
    let user = User {
        id: new_id(),
        email,
        name: req.name.unwrap_or_default().trim().to_string(),
        password_hash: hash_password(&req.password)?,
        role,
        company_id: req.company_id,
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
    info!("Registered user {} ({})", user.id, user.role.as_str());
    Ok(HttpResponse::Created().json(UserProfile::from(user)))
}

/// POST /api/auth/login
pub async fn login(
    data: web::Data<AppState>,
    payload: web::Json<LoginRequest>,
) -> ApiResult<HttpResponse> {
    let email = payload.email.trim().to_lowercase();
    let users = data.mongodb.collection::<User>(USERS);
    let Some(user) = users.find_one(doc! { "email": &email }).await? else {
        warn!("Login attempt for unknown email");
        return Err(ApiError::Unauthorized("Invalid credentials".to_string()));
    };
    if !verify(&payload.password, &user.password_hash).unwrap_or(false) {
        return Err(ApiError::Unauthorized("Invalid credentials".to_string()));
    }
    if user.status != UserStatus::Active {
        return Err(ApiError::Unauthorized(format!(
            "Account is {}",
            user.status.as_str()
        )));
    }

    let now = to_bson(&Utc::now())?;
    users
        .update_one(
            doc! { "_id": &user.id },
            doc! { "$set": { "last_login": now } },
        )
        .await?;
    let token = create_jwt(&user, &data.config.jwt_secret, data.config.jwt_expiry_hours)?;
    Ok(HttpResponse::Ok().json(json!({ "token": token, "user": UserProfile::from(user) })))
}

/// GET /api/auth/me
pub async fn me(auth: AuthUser, data: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let user = current_user(&data, &auth).await?;
    Ok(HttpResponse::Ok().json(UserProfile::from(user)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_app;
    use actix_web::{http::StatusCode, test as actix_test};

    fn request(email: &str, password: &str, name: Option<&str>, role: Option<&str>) -> RegisterRequest {
        RegisterRequest {
            email: email.into(),
            password: password.into(),
            name: name.map(String::from),
            role: role.map(String::from),
            company_id: None,
            department_id: None,
        }
    }

    #[test]
    fn registration_defaults_to_employee() {
        let req = request("ana@example.com", "StrongPass1!", Some("Ana"), None);
        assert_eq!(validate_registration(&req), Ok(Role::Employee));
    }

    #[test]
    fn registration_rejections() {
        let cases = [
            request("invalid-email", "StrongPass1!", Some("Ana"), Some("employee")),
            request("a@example.com", "short", Some("Ana"), Some("employee")),
            request("a@example.com", "StrongPass1!", None, Some("employee")),
            request("a@example.com", "StrongPass1!", Some("Ana"), Some("invalid_role")),
            request("a@example.com", "StrongPass1!", Some("Ana"), Some("super_admin")),
        ];
        for case in &cases {
            assert!(validate_registration(case).is_err(), "{:?}", case);
        }
    }

    #[test]
    fn elevated_roles_cannot_be_self_registered() {
        for role in ["company_admin", "leader", "supervisor"] {
            let mut req = request("boss@example.com", "StrongPass1!", Some("Boss"), Some(role));
            req.company_id = Some("other-company".into());
            let err = validate_registration(&req).unwrap_err();
            assert!(err.contains(role), "{}", err);
        }
        let req = request("ana@example.com", "StrongPass1!", Some("Ana"), Some("employee"));
        assert_eq!(validate_registration(&req), Ok(Role::Employee));
    }

    #[test]
    fn token_round_trip_keeps_role_and_company() {
        let now = Utc::now();
        let user = User {
            id: "u1".into(),
            email: "lead@example.com".into(),
            name: "Lead".into(),
            password_hash: String::new(),
            role: Role::Leader,
            company_id: Some("c1".into()),
            department_id: None,
            status: UserStatus::Active,
            last_login: None,
            created_at: now,
            updated_at: now,
        };
        let token = create_jwt(&user, "s3cret", 1).unwrap();
        let claims = validate_jwt(&token, "s3cret").unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.role, Role::Leader);
        assert_eq!(claims.company_id.as_deref(), Some("c1"));
        assert!(validate_jwt(&token, "other").is_err());
    }

    #[test]
    fn company_resolution() {
        let admin = AuthUser {
            user_id: "u1".into(),
            role: Role::CompanyAdmin,
            company_id: Some("c1".into()),
        };
        assert_eq!(admin.resolve_company(None).unwrap(), "c1");
        assert_eq!(admin.resolve_company(Some("c1")).unwrap(), "c1");
        assert!(matches!(
            admin.resolve_company(Some("c2")),
            Err(ApiError::Forbidden(_))
        ));

        let root = AuthUser {
            user_id: "u0".into(),
            role: Role::SuperAdmin,
            company_id: None,
        };
        assert_eq!(root.resolve_company(Some("c2")).unwrap(), "c2");
        assert!(matches!(root.resolve_company(None), Err(ApiError::BadRequest(_))));
        assert!(root.company_filter().is_empty());
    }

    #[actix_web::test]
    async fn register_rejects_invalid_payload_with_message() {
        let app = actix_test::init_service(test_app().await).await;
        let req = actix_test::TestRequest::post()
            .uri("/api/auth/register")
            .set_json(json!({
                "email": "invalid-email",
                "password": "StrongPass1!",
                "name": "Test User",
                "role": "employee"
            }))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = actix_test::read_body_json(resp).await;
        assert!(body["error"].as_str().unwrap().contains("email"));
    }

    #[actix_web::test]
    async fn me_requires_authentication() {
        let app = actix_test::init_service(test_app().await).await;
        let req = actix_test::TestRequest::get().uri("/api/auth/me").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
