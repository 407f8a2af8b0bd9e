use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Roles ordered from most to least privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    CompanyAdmin,
    Leader,
    Supervisor,
    Employee,
}

impl Role {
    fn rank(self) -> u8 {
        match self {
            Role::SuperAdmin => 4,
            Role::CompanyAdmin => 3,
            Role::Leader => 2,
            Role::Supervisor => 1,
            Role::Employee => 0,
        }
    }

    pub fn at_least(self, other: Role) -> bool {
        self.rank() >= other.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::SuperAdmin => "super_admin",
            Role::CompanyAdmin => "company_admin",
            Role::Leader => "leader",
            Role::Supervisor => "supervisor",
            Role::Employee => "employee",
        }
    }

    pub fn parse(raw: &str) -> Option<Role> {
        match raw {
            "super_admin" => Some(Role::SuperAdmin),
            "company_admin" => Some(Role::CompanyAdmin),
            "leader" => Some(Role::Leader),
            "supervisor" => Some(Role::Supervisor),
            "employee" => Some(Role::Employee),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    #[default]
    Active,
    Inactive,
    Suspended,
}

impl UserStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Inactive => "inactive",
            UserStatus::Suspended => "suspended",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub role: Role,
    pub company_id: Option<String>,
    pub department_id: Option<String>,
    #[serde(default)]
    pub status: UserStatus,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What clients get to see of a user.
#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub company_id: Option<String>,
    pub department_id: Option<String>,
    pub status: UserStatus,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
            role: user.role,
            company_id: user.company_id,
            department_id: user.department_id,
            status: user.status,
            last_login: user.last_login,
            created_at: user.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_ranking_follows_hierarchy() {
        assert!(Role::SuperAdmin.at_least(Role::CompanyAdmin));
        assert!(Role::Leader.at_least(Role::Supervisor));
        assert!(Role::Supervisor.at_least(Role::Supervisor));
        assert!(!Role::Employee.at_least(Role::Supervisor));
        assert!(!Role::CompanyAdmin.at_least(Role::SuperAdmin));
    }

    #[test]
    fn role_strings_match_serde_names() {
        for role in [
            Role::SuperAdmin,
            Role::CompanyAdmin,
            Role::Leader,
            Role::Supervisor,
            Role::Employee,
        ] {
            let json = serde_json::to_value(role).unwrap();
            assert_eq!(json, role.as_str());
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("manager"), None);
    }

    #[test]
    fn profile_drops_password_hash() {
        let now = Utc::now();
        let user = User {
            id: "u1".into(),
            email: "a@b.com".into(),
            name: "Ana".into(),
            password_hash: "$2b$12$secret".into(),
            role: Role::Employee,
            company_id: Some("c1".into()),
            department_id: None,
            status: UserStatus::Active,
            last_login: None,
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_string(&UserProfile::from(user)).unwrap();
        assert!(!json.contains("secret"));
        assert!(json.contains("\"role\":\"employee\""));
    }
}
