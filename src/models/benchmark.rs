use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BenchmarkType {
    Internal,
    Industry,
}

impl BenchmarkType {
    pub fn as_str(self) -> &'static str {
        match self {
            BenchmarkType::Internal => "internal",
            BenchmarkType::Industry => "industry",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    #[default]
    Pending,
    Validated,
    Rejected,
}

impl ValidationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ValidationStatus::Pending => "pending",
            ValidationStatus::Validated => "validated",
            ValidationStatus::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkMetric {
    pub name: String,
    pub value: f64,
    pub unit: Option<String>,
    pub sample_size: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Benchmark {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub benchmark_type: BenchmarkType,
    pub category: String,
    pub industry: Option<String>,
    /// Set for internal benchmarks only.
    pub company_id: Option<String>,
    pub source: String,
    pub metrics: Vec<BenchmarkMetric>,
    #[serde(default)]
    pub validation_status: ValidationStatus,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
