use crate::error::AuthError;
use chrono::{Duration, Utc};
use shellcn_crypto::{hash_password, verify_password};
use shellcn_domain::config::LocalSettings;
use shellcn_domain::user::User;
use shellcn_kernel::safe_nanoid;
use shellcn_repository::UserRepo;
use std::sync::Arc;
use tracing::{info, warn};

/// Local username/password authentication with failed-attempt lockout.
pub struct LocalAuthenticator {
    users: Arc<dyn UserRepo>,
    settings: LocalSettings,
    lockout_threshold: u32,
    lockout_duration: Duration,
}

impl std::fmt::Debug for LocalAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalAuthenticator")
            .field("lockout_threshold", &self.lockout_threshold)
            .finish_non_exhaustive()
    }
}

impl LocalAuthenticator {
    #[must_use]
    pub fn new(
        users: Arc<dyn UserRepo>,
        settings: LocalSettings,
        lockout_threshold: u32,
        lockout_duration_secs: u64,
    ) -> Self {
        Self {
            users,
            settings,
            lockout_threshold,
            lockout_duration: Duration::seconds(lockout_duration_secs.cast_signed().max(0)),
        }
    }

    /// Authenticates by case-insensitive username or email.
    ///
    /// Order of gates: existence → disabled → lockout window → password. A
    /// correct password inside the lockout window still returns `AccountLocked`.
    ///
    /// # Errors
    /// * [`AuthError::InvalidCredentials`] on unknown identifier or wrong password.
    /// * [`AuthError::AccountDisabled`] before the password is ever checked.
    /// * [`AuthError::AccountLocked`] inside the window, or on the attempt that
    ///   reaches the threshold.
    pub async fn authenticate(
        &self,
        identifier: &str,
        password: &str,
        ip: &str,
        user_agent: &str,
    ) -> Result<User, AuthError> {
        let Ok(user) = self.users.find_user_by_login(identifier).await else {
            return Err(AuthError::InvalidCredentials { context: None });
        };

        if !user.is_active {
            return Err(AuthError::AccountDisabled { context: None });
        }

        let now = Utc::now();
        if user.is_locked(now) {
            return Err(AuthError::AccountLocked { context: None });
        }

        let verifier = user.password_hash.as_deref().ok_or(AuthError::InvalidCredentials {
            context: None,
        })?;

        let matches = verify_password(verifier, password).map_err(|_| AuthError::Internal {
            message: "Password verification machinery failed".into(),
            context: None,
        })?;

        if matches {
            let mut updated = user;
            updated.failed_attempts = 0;
            updated.locked_until = None;
            updated.last_login_at = Some(now);
            updated.last_login_ip = Some(ip.to_owned());
            let updated = self.users.update_user(updated).await?;
            info!(user = %updated.id, ip, user_agent, "Local login succeeded");
            return Ok(updated);
        }

        let mut updated = user;
        updated.failed_attempts += 1;
        let locked = updated.failed_attempts >= self.lockout_threshold;
        if locked {
            updated.locked_until = Some(now + self.lockout_duration);
        }
        let attempts = updated.failed_attempts;
        self.users.update_user(updated).await?;

        if locked {
            warn!(identifier, attempts, "Account locked after repeated failures");
            Err(AuthError::AccountLocked { context: None })
        } else {
            Err(AuthError::InvalidCredentials { context: None })
        }
    }

    /// Self-service registration, honoring the persisted local-provider gates.
    ///
    /// With `require_email_verification` set, the account starts disabled until
    /// the verification flow activates it.
    ///
    /// # Errors
    /// * [`AuthError::InvalidConfiguration`] when registration is disabled.
    /// * [`AuthError::Repository`] with an `AlreadyExists` source on duplicates.
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<User, AuthError> {
        if !self.settings.registration_enabled {
            return Err(AuthError::InvalidConfiguration {
                message: "Registration is disabled".into(),
                context: None,
            });
        }

        let password_hash = hash_password(password).map_err(|_| AuthError::Internal {
            message: "Password hashing failed".into(),
            context: None,
        })?;

        let user = User {
            id: safe_nanoid!(),
            username: username.to_owned(),
            email: email.to_owned(),
            password_hash: Some(password_hash),
            is_root: false,
            is_active: !self.settings.require_email_verification,
            failed_attempts: 0,
            locked_until: None,
            mfa_secret: None,
            provider_type: None,
            external_subject: None,
            last_login_at: None,
            last_login_ip: None,
            created_at: Utc::now(),
        };

        let user = self.users.create_user(user).await?;
        info!(user = %user.id, "Local user registered");
        Ok(user)
    }

    /// Repo reachability check for admin diagnostics.
    ///
    /// # Errors
    /// Propagates repository failures other than the expected missing row.
    pub async fn test(&self) -> Result<(), AuthError> {
        match self.users.find_user_by_login("__health_probe__").await {
            Ok(_) => Ok(()),
            Err(shellcn_repository::RepoError::NotFound { .. }) => Ok(()),
            Err(other) => Err(other.into()),
        }
    }
}
