use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

/// Shared-secret login: every user name authenticates against the one
/// server password.
#[derive(Debug)]
pub struct BitswapAuthSource {
    password: String,
}

impl BitswapAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for BitswapAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        tracing::debug!("login attempt user={:?}", login.user());
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
