use log::info;
use mongodb::bson::{doc, Document};
use mongodb::options::{ClientOptions, IndexOptions};
use mongodb::{Client, Collection, Database, IndexModel};

pub const USERS: &str = "users";
pub const COMPANIES: &str = "companies";
pub const DEPARTMENTS: &str = "departments";
pub const SURVEYS: &str = "surveys";
pub const RESPONSES: &str = "responses";
pub const SURVEY_TEMPLATES: &str = "survey_templates";
pub const MICROCLIMATES: &str = "microclimates";
pub const MICROCLIMATE_RESPONSES: &str = "microclimate_responses";
pub const ACTION_PLANS: &str = "actionplans";
pub const BENCHMARKS: &str = "benchmarks";
pub const AUDIT_LOGS: &str = "auditlogs";
pub const REPORTS: &str = "reports";
pub const AI_INSIGHTS: &str = "aiinsights";

pub struct MongoDB {
    pub client: Client,
    pub db: Database,
}

impl MongoDB {
    /// Parses the connection string and builds a client. The driver connects lazily,
    /// so this succeeds without a reachable server.
    pub async fn init(uri: &str, db_name: &str) -> mongodb::error::Result<Self> {
        let client_options = ClientOptions::parse(uri).await?;
        let client = Client::with_options(client_options)?;
        let db = client.database(db_name);
        Ok(MongoDB { client, db })
    }

    pub fn collection<T: Send + Sync>(&self, name: &str) -> Collection<T> {
        self.db.collection::<T>(name)
    }

    pub async fn ensure_indexes(&self) -> mongodb::error::Result<()> {
        for (collection, keys, unique) in index_plan() {
            let options = IndexOptions::builder().unique(unique).build();
            let model = IndexModel::builder().keys(keys).options(options).build();
            self.collection::<Document>(collection)
                .create_index(model)
                .await?;
        }
        info!("MongoDB indexes ensured on {}", self.db.name());
        Ok(())
    }
}

fn index_plan() -> Vec<(&'static str, Document, bool)> {
    vec![
        (USERS, doc! { "email": 1 }, true),
        (USERS, doc! { "company_id": 1, "role": 1 }, false),
        (COMPANIES, doc! { "name": 1 }, false),
        (DEPARTMENTS, doc! { "company_id": 1, "parent_department_id": 1 }, false),
        (SURVEYS, doc! { "company_id": 1, "status": 1 }, false),
        (RESPONSES, doc! { "survey_id": 1, "respondent_hash": 1 }, true),
        (MICROCLIMATES, doc! { "company_id": 1, "status": 1 }, false),
        (
            MICROCLIMATE_RESPONSES,
            doc! { "microclimate_id": 1, "respondent_hash": 1 },
            true,
        ),
        (ACTION_PLANS, doc! { "company_id": 1, "status": 1 }, false),
        (BENCHMARKS, doc! { "benchmark_type": 1, "category": 1 }, false),
        (SURVEY_TEMPLATES, doc! { "category": 1 }, false),
        (AUDIT_LOGS, doc! { "company_id": 1, "timestamp": -1 }, false),
        (REPORTS, doc! { "company_id": 1 }, false),
        (AI_INSIGHTS, doc! { "company_id": 1 }, false),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_indexes_guard_identity_and_single_submission() {
        let unique: Vec<(&str, Document)> = index_plan()
            .into_iter()
            .filter(|(_, _, unique)| *unique)
            .map(|(c, k, _)| (c, k))
            .collect();
        assert_eq!(unique.len(), 3);
        assert!(unique.contains(&(USERS, doc! { "email": 1 })));
        assert!(unique
            .iter()
            .any(|(c, k)| *c == RESPONSES && k.contains_key("respondent_hash")));
    }

    #[test]
    fn every_init_script_collection_is_indexed() {
        let plan = index_plan();
        for name in [
            USERS, COMPANIES, DEPARTMENTS, SURVEYS, RESPONSES, MICROCLIMATES, REPORTS,
            BENCHMARKS, ACTION_PLANS, AI_INSIGHTS,
        ] {
            assert!(plan.iter().any(|(c, _, _)| *c == name), "{name} has no index");
        }
    }
}
