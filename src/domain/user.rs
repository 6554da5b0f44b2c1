use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::{Cents, now};

pub type UserId = Uuid;

const DIGEST_SCHEME: &str = "sha256";

/// A wallet holder. The balance is only ever changed by the balance mutator
/// inside an atomic unit; everything else about a user is fixed at registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    /// `sha256$<salt>$<hex digest>`; never leaves the process.
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub phone_number: Option<String>,
    pub balance_cents: Cents,
    /// Bumped on every balance write, compared on the next one.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(username: impl Into<String>, email: impl Into<String>, password: &str) -> Self {
        let created_at = now();
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            email: email.into(),
            password_hash: hash_password(password, &Uuid::new_v4().simple().to_string()),
            phone_number: None,
            balance_cents: 0,
            version: 0,
            created_at,
            updated_at: created_at,
        }
    }

    pub fn with_phone_number(mut self, phone_number: impl Into<String>) -> Self {
        self.phone_number = Some(phone_number.into());
        self
    }

    pub fn verify_password(&self, password: &str) -> bool {
        let mut parts = self.password_hash.splitn(3, '$');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(DIGEST_SCHEME), Some(salt), Some(_)) => {
                hash_password(password, salt) == self.password_hash
            }
            _ => false,
        }
    }
}

/// Salted digest for the stored credential. Authentication itself is not part
/// of the ledger; this only keeps plaintext passwords out of the database.
pub fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    format!("{}${}${}", DIGEST_SCHEME, salt, hex::encode(hasher.finalize()))
}
