use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a token may be used for.
///
/// Serialized into the `session_purpose` claim. Every verification entry
/// point names exactly one purpose and rejects the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    Access,
    Refresh,
    PasswordReset,
    EmailVerification,
    PhoneVerification,
    MagicLink,
}

/// Lifetime class a purpose falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlClass {
    /// Deployment-configured general API lifetime.
    Access,
    /// Weeks.
    Refresh,
    /// Minutes (password reset, email and phone verification).
    Temporary,
    /// Shortest class.
    MagicLink,
}

/// How a purpose treats the `is_temp` flag at verification time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempRule {
    /// Temporary tokens are rejected.
    Forbidden,
    /// Only temporary tokens are accepted.
    Required,
    /// Either is accepted.
    Allowed,
}

impl Purpose {
    pub const ALL: [Purpose; 6] = [
        Purpose::Access,
        Purpose::Refresh,
        Purpose::PasswordReset,
        Purpose::EmailVerification,
        Purpose::PhoneVerification,
        Purpose::MagicLink,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Purpose::Access => "access",
            Purpose::Refresh => "refresh",
            Purpose::PasswordReset => "password_reset",
            Purpose::EmailVerification => "email_verification",
            Purpose::PhoneVerification => "phone_verification",
            Purpose::MagicLink => "magic_link",
        }
    }

    #[must_use]
    pub const fn ttl_class(self) -> TtlClass {
        match self {
            Purpose::Access => TtlClass::Access,
            Purpose::Refresh => TtlClass::Refresh,
            Purpose::PasswordReset | Purpose::EmailVerification | Purpose::PhoneVerification => {
                TtlClass::Temporary
            }
            Purpose::MagicLink => TtlClass::MagicLink,
        }
    }

    #[must_use]
    pub const fn temp_rule(self) -> TempRule {
        match self {
            Purpose::Access => TempRule::Forbidden,
            Purpose::PasswordReset => TempRule::Required,
            Purpose::Refresh
            | Purpose::EmailVerification
            | Purpose::PhoneVerification
            | Purpose::MagicLink => TempRule::Allowed,
        }
    }

    /// Whether a verified token of this purpose must be consumed exactly once.
    #[must_use]
    pub const fn is_single_use(self) -> bool {
        match self {
            Purpose::Access | Purpose::Refresh => false,
            Purpose::PasswordReset
            | Purpose::EmailVerification
            | Purpose::PhoneVerification
            | Purpose::MagicLink => true,
        }
    }

    /// Whether `is_temp` is acceptable for this purpose.
    #[must_use]
    pub const fn accepts_temp(self, is_temp: bool) -> bool {
        match self.temp_rule() {
            TempRule::Forbidden => !is_temp,
            TempRule::Required => is_temp,
            TempRule::Allowed => true,
        }
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifetime per TTL class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenLifetimes {
    pub access: Duration,
    pub refresh: Duration,
    pub temporary: Duration,
    pub magic_link: Duration,
}

impl Default for TokenLifetimes {
    fn default() -> Self {
        Self {
            access: Duration::hours(24),
            refresh: Duration::days(60),
            temporary: Duration::minutes(30),
            magic_link: Duration::minutes(15),
        }
    }
}

impl TokenLifetimes {
    /// Lifetime for a token of `purpose`.
    ///
    /// `is_temp` forces the temporary class, capped by the nominal lifetime
    /// so a magic link never outlives its own class.
    #[must_use]
    pub fn ttl(&self, purpose: Purpose, is_temp: bool) -> Duration {
        let nominal = match purpose.ttl_class() {
            TtlClass::Access => self.access,
            TtlClass::Refresh => self.refresh,
            TtlClass::Temporary => self.temporary,
            TtlClass::MagicLink => self.magic_link,
        };

        if is_temp {
            nominal.min(self.temporary)
        } else {
            nominal
        }
    }
}
