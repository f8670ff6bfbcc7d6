use std::collections::HashMap;

use crate::config::Config;
use crate::protocol::Identity;

#[derive(Debug, Clone)]
struct Account {
    password: String,
    name: String,
    role: String,
}

/// Static credential store, immutable after startup. Secrets are compared
/// exactly; hardening (hashing, rate limiting, lockout) is explicitly out of
/// scope for this relay.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    accounts: HashMap<String, Account>,
}

impl CredentialStore {
    pub fn from_config(config: &Config) -> Self {
        let mut accounts = HashMap::new();
        accounts.insert(
            config.operator_email.clone(),
            Account {
                password: config.operator_password.clone(),
                name: config.operator_name.clone(),
                role: "admin".to_string(),
            },
        );
        Self { accounts }
    }

    /// Returns the identity iff the account exists and the secret matches.
    pub fn authenticate(&self, email: &str, secret: &str) -> Option<Identity> {
        if email.is_empty() || secret.is_empty() {
            return None;
        }
        let account = self.accounts.get(email)?;
        if account.password != secret {
            return None;
        }
        Some(Identity {
            email: email.to_string(),
            name: account.name.clone(),
            role: account.role.clone(),
        })
    }

    pub fn validate(&self, email: &str, secret: &str) -> bool {
        self.authenticate(email, secret).is_some()
    }
}
