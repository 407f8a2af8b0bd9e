pub mod action_plan;
pub mod audit_log;
pub mod benchmark;
pub mod company;
pub mod department;
pub mod microclimate;
pub mod survey;
pub mod template;
pub mod user;

use uuid::Uuid;

/// Every document is keyed by a string UUID stored in `_id`.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
