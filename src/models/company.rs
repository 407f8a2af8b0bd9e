use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Branding {
    pub primary_color: Option<String>,
    pub logo_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanySettings {
    pub default_language: String,
    pub anonymous_by_default: bool,
}

impl Default for CompanySettings {
    fn default() -> Self {
        Self {
            default_language: "en".to_string(),
            anonymous_by_default: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub industry: String,
    pub size: String,
    pub domain: Option<String>,
    #[serde(default)]
    pub branding: Branding,
    #[serde(default)]
    pub settings: CompanySettings,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
