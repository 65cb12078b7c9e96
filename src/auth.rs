use async_trait::async_trait;
use ulid::Ulid;

use crate::model::{Actor, Role};

/// What the client presents in its `hello` line.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub actor_id: Ulid,
    pub role: Role,
    pub password: String,
}

#[derive(Debug)]
pub struct AuthError;

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "authentication failed")
    }
}

impl std::error::Error for AuthError {}

/// Supplies the session's actor. The engine trusts the result and performs
/// no identity checks beyond the transition table's actor rules.
#[async_trait]
pub trait AuthSource: Send + Sync {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Actor, AuthError>;
}

/// Single shared service password, as configured via `CADENZA_PASSWORD`.
#[derive(Debug)]
pub struct SharedPasswordAuth {
    password: String,
}

impl SharedPasswordAuth {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for SharedPasswordAuth {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Actor, AuthError> {
        if credentials.password == self.password {
            Ok(Actor { id: credentials.actor_id, role: credentials.role })
        } else {
            Err(AuthError)
        }
    }
}
