use tracing::info;

use crate::limits::MAX_EMAIL_LEN;
use crate::model::*;
use crate::observability::Operation;

use super::{BookingEngine, BookingError, record};

impl BookingEngine {
    /// Create a user. Emails are unique regardless of case. Hashing the
    /// password is the caller's job.
    pub async fn register_user(&self, email: &str, password_hash: &str) -> Result<User, BookingError> {
        let started = std::time::Instant::now();
        let result: Result<User, BookingError> = async {
            let email = email.trim();
            if email.is_empty() {
                return Err(BookingError::LimitExceeded("email must not be empty"));
            }
            if email.len() > MAX_EMAIL_LEN {
                return Err(BookingError::LimitExceeded("email too long"));
            }

            let _registration = self.registration.lock().await;
            if self.users.find_by_email(email).await?.is_some() {
                return Err(BookingError::UserAlreadyExists(email.to_lowercase()));
            }
            let user = self.users.save(User::new(email, password_hash)).await?;
            info!(user = %user.id, "user registered");
            Ok(user)
        }
        .await;
        record(Operation::RegisterUser, started, &result);
        result
    }

    pub async fn find_user(&self, email: &str) -> Result<User, BookingError> {
        self.users
            .find_by_email(email.trim())
            .await?
            .ok_or_else(|| BookingError::UserNotFound(email.to_string()))
    }
}
