use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};

use crate::model::UserId;

/// Shared-password authentication. The login user name becomes the caller's identity,
/// so it must be a valid user id.
#[derive(Debug)]
pub struct RoomholdAuthSource {
    password: String,
}

impl RoomholdAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for RoomholdAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        if login.user().and_then(UserId::parse).is_none() {
            metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
            return Err(PgWireError::UserError(Box::new(ErrorInfo::new(
                "FATAL".into(),
                "28000".into(),
                "invalid user id".into(),
            ))));
        }
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
