//! Fixed test identities.
//!
//! Every harness seeds the same agent and admin so tests can refer to them
//! by constant.

use auth_service::crypto::hash_password;
use auth_service::repositories::{Identity, Standing};
use common::types::IdentityId;

/// Lowest bcrypt cost the service accepts; keeps test logins fast.
pub const TEST_BCRYPT_COST: u32 = 10;

pub const AGENT_ID: IdentityId = IdentityId(42);
pub const AGENT_EMAIL: &str = "agent42@example.com";
pub const AGENT_PHONE: &str = "+254700000042";
pub const AGENT_PASSWORD: &str = "correct-horse-42";
pub const AGENT_ROLES: &[&str] = &["agent"];
pub const AGENT_PERMISSIONS: &[&str] = &["offers:read", "customers:write"];

pub const ADMIN_ID: IdentityId = IdentityId(1);
pub const ADMIN_EMAIL: &str = "ops-admin@example.com";
pub const ADMIN_PHONE: &str = "+254700000001";
pub const ADMIN_PASSWORD: &str = "admin-battery-staple";
pub const ADMIN_ROLES: &[&str] = &["admin"];
pub const ADMIN_PERMISSIONS: &[&str] = &["identity:read", "identity:write", "hub:read"];

/// Identifier that matches no identity.
pub const UNKNOWN_EMAIL: &str = "nobody@example.com";

/// An active identity with a bcrypt hash of `password`.
pub fn test_identity(id: IdentityId, email: &str, phone: &str, password: &str) -> Identity {
    Identity {
        id,
        email: Some(email.to_string()),
        phone: Some(phone.to_string()),
        password_hash: hash_password(password, TEST_BCRYPT_COST).expect("hash test password"),
        email_verified: false,
        phone_verified: false,
        standing: Standing::Active,
        last_login_at: None,
    }
}
