//! Login gate. The credential check is a local stand-in, not an authentication system.

use snafu::{Snafu, ensure};

pub const DEMO_EMAIL: &str = "user@example.com";
pub const DEMO_PASSWORD: &str = "password";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub email: String,
}

impl User {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum LoginError {
    #[snafu(display("Please enter both email and password."))]
    MissingCredentials { stage: &'static str },
    #[snafu(display("Incorrect email or password."))]
    IncorrectCredentials { stage: &'static str },
}

pub trait Authenticator: Send + Sync {
    fn authenticate(&self, email: &str, password: &str) -> Result<User, LoginError>;
}

/// Accepts exactly one configured credential pair.
#[derive(Debug, Clone)]
pub struct MockAuthenticator {
    email: String,
    password: String,
}

impl MockAuthenticator {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl Default for MockAuthenticator {
    fn default() -> Self {
        Self::new(DEMO_EMAIL, DEMO_PASSWORD)
    }
}

impl Authenticator for MockAuthenticator {
    fn authenticate(&self, email: &str, password: &str) -> Result<User, LoginError> {
        let email = email.trim();
        ensure!(
            !email.is_empty() && !password.is_empty(),
            MissingCredentialsSnafu {
                stage: "mock-login-validate",
            }
        );
        ensure!(
            email == self.email && password == self.password,
            IncorrectCredentialsSnafu {
                stage: "mock-login-check",
            }
        );

        tracing::info!(email, "signed in");
        Ok(User::new(email))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_credentials_sign_in() {
        let auth = MockAuthenticator::default();
        assert_eq!(
            auth.authenticate(" user@example.com ", "password"),
            Ok(User::new("user@example.com"))
        );
    }

    #[test]
    fn failures_carry_user_facing_text() {
        let auth = MockAuthenticator::default();

        let missing = auth.authenticate("", "password").unwrap_err();
        assert_eq!(missing.to_string(), "Please enter both email and password.");

        let wrong = auth.authenticate("user@example.com", "hunter2").unwrap_err();
        assert_eq!(wrong.to_string(), "Incorrect email or password.");
    }
}
