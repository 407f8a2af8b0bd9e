use actix_web::{web, HttpResponse};
use chrono::Utc;
use futures::stream::TryStreamExt;
use log::{debug, warn};
use mongodb::bson::doc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::app_state::AppState;
use crate::auth::AuthUser;
use crate::db::AUDIT_LOGS;
use crate::error::ApiResult;
use crate::models::audit_log::AuditLog;
use crate::models::new_id;
use crate::models::user::Role;
use crate::query::Paging;

/// One audited mutation. Snapshots are stored as JSON so any entity can be recorded.
pub struct AuditEntry<'a> {
    entity_type: &'a str,
    entity_id: &'a str,
    action: &'a str,
    company_id: Option<&'a str>,
    before: Option<Value>,
    after: Option<Value>,
}

impl<'a> AuditEntry<'a> {
    pub fn new(entity_type: &'a str, entity_id: &'a str, action: &'a str) -> Self {
        Self {
            entity_type,
            entity_id,
            action,
            company_id: None,
            before: None,
            after: None,
        }
    }

    pub fn company(mut self, company_id: Option<&'a str>) -> Self {
        self.company_id = company_id;
        self
    }

    pub fn before<T: Serialize>(mut self, value: &T) -> Self {
        self.before = serde_json::to_value(value).ok();
        self
    }

    pub fn after<T: Serialize>(mut self, value: &T) -> Self {
        self.after = serde_json::to_value(value).ok();
        self
    }

    fn into_log(self, user_id: &str) -> AuditLog {
        AuditLog {
            id: new_id(),
            company_id: self.company_id.map(String::from),
            user_id: user_id.to_string(),
            entity_type: self.entity_type.to_string(),
            entity_id: self.entity_id.to_string(),
            action: self.action.to_string(),
            before: self.before,
            after: self.after,
            timestamp: Utc::now(),
        }
    }
}

/// Stores the entry. Failures are logged and swallowed so auditing never fails the
/// request that triggered it.
pub async fn record(data: &AppState, auth: &AuthUser, entry: AuditEntry<'_>) {
    let log = entry.into_log(&auth.user_id);
    debug!(
        "audit {} {} {} by {}",
        log.entity_type, log.entity_id, log.action, log.user_id
    );
    let logs = data.mongodb.collection::<AuditLog>(AUDIT_LOGS);
    if let Err(e) = logs.insert_one(&log).await {
        warn!("Failed to write audit log for {} {}: {}", log.entity_type, log.entity_id, e);
    }
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub user_id: Option<String>,
    pub action: Option<String>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

/// GET /api/audit-logs
pub async fn list_audit_logs(
    auth: AuthUser,
    data: web::Data<AppState>,
    query: web::Query<AuditQuery>,
) -> ApiResult<HttpResponse> {
    auth.require(Role::CompanyAdmin)?;
    let mut filter = auth.company_filter();
    if let Some(v) = &query.entity_type {
        filter.insert("entity_type", v);
    }
    if let Some(v) = &query.entity_id {
        filter.insert("entity_id", v);
    }
    if let Some(v) = &query.user_id {
        filter.insert("user_id", v);
    }
    if let Some(v) = &query.action {
        filter.insert("action", v);
    }

    let paging = Paging::new(query.page, query.limit);
    let logs = data.mongodb.collection::<AuditLog>(AUDIT_LOGS);
    let total = logs.count_documents(filter.clone()).await?;
    let entries: Vec<AuditLog> = logs
        .find(filter)
        .sort(doc! { "timestamp": -1 })
        .skip(paging.skip())
        .limit(paging.limit as i64)
        .await?
        .try_collect()
        .await?;
    Ok(HttpResponse::Ok().json(json!({
        "logs": entries,
        "pagination": paging.pagination(total),
    })))
}
