mod action_plan;
mod action_plan_scoring;
mod app_state;
mod audit;
mod auth;
mod benchmark;
mod company_management;
mod config;
mod dashboard_data;
mod db;
mod department_management;
mod error;
mod export;
mod microclimate;
mod microclimate_hub;
mod models;
mod query;
mod questions;
mod survey;
mod survey_response;
mod survey_results;
mod survey_status;
mod survey_template;
#[cfg(test)]
mod test_support;
mod user_management;
mod web_socket_server;

use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll};

use actix::Actor;
use actix_cors::Cors;
use actix_web::{
    body::{BoxBody, MessageBody},
    dev::{Service, ServiceFactory, ServiceRequest, ServiceResponse, Transform},
    http,
    middleware::Logger,
    web, App, Error, HttpMessage, HttpResponse, HttpServer,
};
use env_logger::Env;
use futures::future::{ok, Ready};
use log::{error, info, warn};
use serde_json::json;

use crate::app_state::AppState;
use crate::auth::validate_jwt;
use crate::config::Config;
use crate::db::MongoDB;
use crate::error::ApiError;
use crate::microclimate_hub::MicroclimateHub;

/// Decodes a bearer token when one is sent and stores its claims on the request.
/// Requests without a token pass through; handlers that need a caller reject them.
pub struct Authentication {
    secret: Rc<String>,
}

impl Authentication {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: Rc::new(secret.to_string()),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Authentication
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Transform = AuthMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthMiddleware {
            service,
            secret: self.secret.clone(),
        })
    }
}

pub struct AuthMiddleware<S> {
    service: S,
    secret: Rc<String>,
}

impl<S, B> Service<ServiceRequest> for AuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let token = req
            .headers()
            .get(http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|token| token.trim().to_string());

        if let Some(token) = token {
            match validate_jwt(&token, &self.secret) {
                Ok(claims) => {
                    req.extensions_mut().insert(claims);
                }
                Err(e) => {
                    let (req_parts, _payload) = req.into_parts();
                    let resp = HttpResponse::Unauthorized()
                        .json(json!({ "error": format!("Invalid token: {}", e) }))
                        .map_into_boxed_body();
                    let srv_resp = ServiceResponse::new(req_parts, resp);
                    return Box::pin(async move { Ok(srv_resp) });
                }
            }
        }

        let fut = self.service.call(req);
        Box::pin(async move {
            let res = fut.await?;
            Ok(res.map_into_boxed_body())
        })
    }
}

/// All routes with authentication applied. CORS and access logging are added by `main`.
pub fn build_app(
    state: web::Data<AppState>,
) -> App<
    impl ServiceFactory<
        ServiceRequest,
        Config = (),
        Response = ServiceResponse<impl MessageBody>,
        Error = Error,
        InitError = (),
    >,
> {
    let secret = state.config.jwt_secret.clone();
    App::new()
        .app_data(state)
        // Extractor failures answer with the same JSON body as handler errors.
        .app_data(
            web::JsonConfig::default()
                .error_handler(|e, _| ApiError::BadRequest(e.to_string()).into()),
        )
        .app_data(
            web::QueryConfig::default()
                .error_handler(|e, _| ApiError::BadRequest(e.to_string()).into()),
        )
        .app_data(
            web::PathConfig::default()
                .error_handler(|e, _| ApiError::BadRequest(e.to_string()).into()),
        )
        .wrap(Authentication::new(&secret))
        // AUTH
        .service(
            web::scope("/api/auth")
                .route("/register", web::post().to(auth::register))
                .route("/login", web::post().to(auth::login))
                .route("/me", web::get().to(auth::me)),
        )
        // ADMINISTRATION
        .service(
            web::scope("/api/admin")
                .service(
                    web::scope("/users")
                        .route("", web::get().to(user_management::list_users))
                        .route("", web::post().to(user_management::create_user))
                        .route("/{id}", web::get().to(user_management::get_user))
                        .route("/{id}", web::put().to(user_management::update_user))
                        .route("/{id}", web::delete().to(user_management::delete_user)),
                )
                .service(
                    web::scope("/companies")
                        .route("", web::get().to(company_management::list_companies))
                        .route("", web::post().to(company_management::create_company))
                        .route("/{id}", web::get().to(company_management::get_company))
                        .route("/{id}", web::put().to(company_management::update_company))
                        .route("/{id}", web::delete().to(company_management::delete_company)),
                )
                .service(
                    web::scope("/departments")
                        .route("", web::get().to(department_management::list_departments))
                        .route("", web::post().to(department_management::create_department))
                        .route("/tree", web::get().to(department_management::department_tree))
                        .route("/{id}", web::get().to(department_management::get_department))
                        .route("/{id}", web::put().to(department_management::update_department))
                        .route(
                            "/{id}",
                            web::delete().to(department_management::delete_department),
                        ),
                ),
        )
        // SURVEYS
        .service(
            web::scope("/api/surveys")
                .route("", web::get().to(survey::list_surveys))
                .route("", web::post().to(survey::create_survey))
                .route("/bulk", web::post().to(survey::bulk_operation))
                .route("/{id}", web::get().to(survey::get_survey))
                .route("/{id}", web::put().to(survey::update_survey))
                .route("/{id}", web::delete().to(survey::delete_survey))
                .route("/{id}/status", web::patch().to(survey::change_status))
                .route("/{id}/duplicate", web::post().to(survey::duplicate_survey))
                .route("/{id}/responses", web::post().to(survey_response::submit_response))
                .route("/{id}/results", web::get().to(survey_response::survey_results))
                .route("/{id}/export", web::get().to(survey_response::export_responses)),
        )
        .service(
            web::scope("/api/survey-templates")
                .route("", web::get().to(survey_template::list_templates))
                .route("", web::post().to(survey_template::create_template))
                .route("/{id}", web::get().to(survey_template::get_template))
                .route("/{id}/use", web::post().to(survey_template::use_template)),
        )
        // MICROCLIMATES
        .service(
            web::scope("/api/microclimates")
                .route("", web::get().to(microclimate::list_microclimates))
                .route("", web::post().to(microclimate::create_microclimate))
                .route("/{id}", web::get().to(microclimate::get_microclimate))
                .route("/{id}", web::put().to(microclimate::update_microclimate))
                .route("/{id}", web::delete().to(microclimate::delete_microclimate))
                .route(
                    "/{id}/status",
                    web::patch().to(microclimate::change_microclimate_status),
                )
                .route(
                    "/{id}/responses",
                    web::post().to(microclimate::submit_microclimate_response),
                )
                .route("/{id}/results", web::get().to(microclimate::microclimate_results)),
        )
        .service(
            web::resource("/ws/microclimates/{id}")
                .route(web::get().to(web_socket_server::ws_microclimate)),
        )
        // ACTION PLANS
        .service(
            web::scope("/api/action-plans")
                .route("", web::get().to(action_plan::list_action_plans))
                .route("", web::post().to(action_plan::create_action_plan))
                .route("/report", web::get().to(action_plan::progress_report))
                .route("/export", web::get().to(action_plan::export_report))
                .route("/{id}", web::get().to(action_plan::get_action_plan))
                .route("/{id}", web::put().to(action_plan::update_action_plan))
                .route("/{id}", web::delete().to(action_plan::delete_action_plan))
                .route("/{id}/progress", web::post().to(action_plan::record_progress)),
        )
        // BENCHMARKS
        .service(
            web::scope("/api/benchmarks")
                .route("", web::get().to(benchmark::list_benchmarks))
                .route("", web::post().to(benchmark::create_benchmark))
                .route("/compare", web::post().to(benchmark::compare))
                .route("/{id}", web::get().to(benchmark::get_benchmark))
                .route("/{id}", web::put().to(benchmark::update_benchmark))
                .route("/{id}", web::delete().to(benchmark::delete_benchmark))
                .route("/{id}/validation", web::patch().to(benchmark::set_validation)),
        )
        // DASHBOARDS
        .service(
            web::scope("/api/dashboard")
                .route(
                    "/company-admin",
                    web::get().to(dashboard_data::company_admin_dashboard),
                )
                .route("/super-admin", web::get().to(dashboard_data::super_admin_dashboard))
                .route("/employee", web::get().to(dashboard_data::employee_dashboard)),
        )
        .route("/api/audit-logs", web::get().to(audit::list_audit_logs))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = Config::from_env().map_err(|e| {
        error!("Invalid configuration: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;
    let mongodb = MongoDB::init(&config.mongo_uri, &config.database_name)
        .await
        .map_err(|e| {
            error!("Cannot set up MongoDB client: {}", e);
            std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
        })?;
    if let Err(e) = mongodb.ensure_indexes().await {
        warn!("Could not ensure indexes: {}", e);
    }
    let mongodb = Arc::new(mongodb);
    let hub = MicroclimateHub::new().start();

    let bind_addr = config.bind_addr.clone();
    info!("Server running at http://{}", bind_addr);
    info!("Allowed CORS origin: {}", config.frontend_origin);

    let state = web::Data::new(AppState {
        hub,
        mongodb,
        config,
    });

    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&state.config.frontend_origin)
            .allowed_methods(vec!["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"])
            .allowed_headers(vec![
                http::header::CONTENT_TYPE,
                http::header::ACCEPT,
                http::header::AUTHORIZATION,
            ])
            .supports_credentials()
            .max_age(3600);

        build_app(state.clone())
            .wrap(cors)
            .wrap(Logger::default())
    })
    .bind(bind_addr)?
    .run()
    .await
}

#[cfg(test)]
mod tests {
    use crate::models::user::Role;
    use crate::test_support::{bearer, test_app};
    use actix_web::{http::StatusCode, test as actix_test};

    #[actix_web::test]
    async fn malformed_tokens_are_rejected_before_routing() {
        let app = actix_test::init_service(test_app().await).await;
        let req = actix_test::TestRequest::get()
            .uri("/api/auth/me")
            .insert_header(("Authorization", "Bearer not-a-jwt"))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body: serde_json::Value = actix_test::read_body_json(resp).await;
        assert!(body["error"].as_str().unwrap().starts_with("Invalid token"));
    }

    #[actix_web::test]
    async fn malformed_bodies_get_a_json_error() {
        let app = actix_test::init_service(test_app().await).await;
        let req = actix_test::TestRequest::post()
            .uri("/api/auth/register")
            .set_json(serde_json::json!({ "email": "a@b.co", "name": "X" }))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = actix_test::read_body_json(resp).await;
        assert!(body["error"].as_str().unwrap().contains("password"));
    }

    #[actix_web::test]
    async fn malformed_queries_get_a_json_error() {
        let app = actix_test::init_service(test_app().await).await;
        let req = actix_test::TestRequest::get()
            .uri("/api/benchmarks?type=bogus")
            .insert_header(bearer(Role::Leader, Some("c1")))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = actix_test::read_body_json(resp).await;
        assert!(body["error"].is_string());
    }

    #[actix_web::test]
    async fn missing_token_reaches_handler_and_is_refused() {
        let app = actix_test::init_service(test_app().await).await;
        let req = actix_test::TestRequest::get().uri("/api/surveys").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn audit_log_needs_company_admin() {
        let app = actix_test::init_service(test_app().await).await;
        let req = actix_test::TestRequest::get()
            .uri("/api/audit-logs")
            .insert_header(bearer(Role::Supervisor, Some("c1")))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}
