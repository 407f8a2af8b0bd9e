// Helpers for request-level tests. The MongoDB client connects lazily, so routes that
// answer before touching the database run without a server.

use std::sync::Arc;

use actix::Actor;
use actix_web::body::MessageBody;
use actix_web::dev::{ServiceFactory, ServiceRequest, ServiceResponse};
use actix_web::http::header;
use actix_web::{web, App, Error};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};

use crate::app_state::AppState;
use crate::auth::Claims;
use crate::config::Config;
use crate::db::MongoDB;
use crate::microclimate_hub::MicroclimateHub;
use crate::models::user::Role;

pub const TEST_USER: &str = "test-user";

pub async fn test_state() -> web::Data<AppState> {
    let config = Config::for_tests();
    let mongodb = MongoDB::init(&config.mongo_uri, &config.database_name)
        .await
        .expect("test client");
    web::Data::new(AppState {
        hub: MicroclimateHub::new().start(),
        mongodb: Arc::new(mongodb),
        config,
    })
}

pub async fn test_app() -> App<
    impl ServiceFactory<
        ServiceRequest,
        Config = (),
        Response = ServiceResponse<impl MessageBody>,
        Error = Error,
        InitError = (),
    >,
> {
    crate::build_app(test_state().await)
}

pub fn bearer(role: Role, company_id: Option<&str>) -> (header::HeaderName, String) {
    let claims = Claims {
        sub: TEST_USER.to_string(),
        role,
        company_id: company_id.map(String::from),
        exp: (Utc::now() + Duration::hours(1)).timestamp() as usize,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(Config::for_tests().jwt_secret.as_ref()),
    )
    .expect("token");
    (header::AUTHORIZATION, format!("Bearer {}", token))
}
