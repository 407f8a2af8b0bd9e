use std::env;

use crate::error::ConfigError;

#[derive(Clone, Debug)]
pub struct Config {
    pub mongo_uri: String,
    pub database_name: String,
    pub jwt_secret: String,
    pub jwt_expiry_hours: i64,
    pub frontend_origin: String,
    pub bind_addr: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let jwt_expiry_hours = match env::var("JWT_EXPIRY_HOURS") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| ConfigError::Invalid("JWT_EXPIRY_HOURS", raw))?,
            Err(_) => 24,
        };

        Ok(Self {
            mongo_uri: required("MONGO_URI")?,
            database_name: env::var("DATABASE_NAME")
                .unwrap_or_else(|_| "climate_survey".to_string()),
            jwt_secret: required("JWT_SECRET")?,
            jwt_expiry_hours,
            frontend_origin: env::var("FRONTEND_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
        })
    }

    /// Settings used by request-level tests; nothing here touches the network.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            mongo_uri: "mongodb://localhost:27017".to_string(),
            database_name: "climate_survey_test".to_string(),
            jwt_secret: "test-secret".to_string(),
            jwt_expiry_hours: 1,
            frontend_origin: "http://localhost:3000".to_string(),
            bind_addr: "127.0.0.1:0".to_string(),
        }
    }
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::Missing(key))
}
