use crate::error::{VaultError, VaultErrorExt};
use chrono::Utc;
use parking_lot::Mutex;
use shellcn_crypto::{Aes, MasterKey, Sealer, derive_master_key, key_verifier, make_salt};
use shellcn_domain::events::TamperingDetected;
use shellcn_domain::identity::{
    CredentialVersion, Identity, IdentityScope, IdentityShare, KdfSettings, PrincipalType,
    SharePermission, VaultKeyMetadata,
};
use shellcn_event_bus::EventBus;
use shellcn_iam::Checker;
use shellcn_kernel::safe_nanoid;
use shellcn_repository::{
    CredentialVersionRepo, IdentityRepo, KeyMetaRepo, ShareRepo, TxContext, UserRepo,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Parameters for [`CredentialVault::create_identity`].
#[derive(Debug, Clone)]
pub struct CreateIdentity {
    pub name: String,
    pub scope: IdentityScope,
    pub team_id: Option<String>,
    pub connection_id: Option<String>,
    pub template: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub payload: serde_json::Value,
}

/// Identity row without its ciphertext, for `view_metadata` listings.
#[derive(Debug, Clone)]
pub struct IdentityMetadata {
    pub id: String,
    pub name: String,
    pub scope: IdentityScope,
    pub owner_id: String,
    pub version: u32,
    pub template: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub usage_count: u64,
}

impl From<&Identity> for IdentityMetadata {
    fn from(identity: &Identity) -> Self {
        Self {
            id: identity.id.clone(),
            name: identity.name.clone(),
            scope: identity.scope,
            owner_id: identity.owner_id.clone(),
            version: identity.version,
            template: identity.template.clone(),
            metadata: identity.metadata.clone(),
            usage_count: identity.usage_count,
        }
    }
}

struct CachedKey {
    key_id: String,
    sealer: Arc<Sealer<Aes>>,
}

/// The credential vault service.
///
/// Owns the cached master key, derived on first use from the operator secret and
/// the active [`VaultKeyMetadata`] row; the cache entry is cleared on rotation.
pub struct CredentialVault {
    identities: Arc<dyn IdentityRepo>,
    versions: Arc<dyn CredentialVersionRepo>,
    shares: Arc<dyn ShareRepo>,
    keys: Arc<dyn KeyMetaRepo>,
    users: Arc<dyn UserRepo>,
    checker: Arc<Checker>,
    events: EventBus,
    kdf_defaults: KdfSettings,
    master_secret: Mutex<String>,
    cache: Mutex<Option<CachedKey>>,
}

impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVault").finish_non_exhaustive()
    }
}

impl CredentialVault {
    #[must_use]
    pub fn new(
        identities: Arc<dyn IdentityRepo>,
        versions: Arc<dyn CredentialVersionRepo>,
        shares: Arc<dyn ShareRepo>,
        keys: Arc<dyn KeyMetaRepo>,
        users: Arc<dyn UserRepo>,
        checker: Arc<Checker>,
        events: EventBus,
        master_secret: String,
        kdf_defaults: KdfSettings,
    ) -> Self {
        Self {
            identities,
            versions,
            shares,
            keys,
            users,
            checker,
            events,
            kdf_defaults,
            master_secret: Mutex::new(master_secret),
            cache: Mutex::new(None),
        }
    }

    fn aad(identity_id: &str, version: u32) -> Vec<u8> {
        format!("{identity_id}:{version}").into_bytes()
    }

    fn kdf_params(settings: &KdfSettings) -> shellcn_crypto::KdfParams {
        shellcn_crypto::KdfParams {
            memory_kib: settings.memory_kib,
            iterations: settings.iterations,
            parallelism: settings.parallelism,
        }
    }

    fn derive_for_meta(&self, meta: &VaultKeyMetadata) -> Result<MasterKey, VaultError> {
        let secret = self.master_secret.lock().clone();
        let key = derive_master_key(&secret, &meta.salt, &Self::kdf_params(&meta.kdf))?;
        if key_verifier(&key) != meta.verifier_sha256 {
            return Err(VaultError::Internal {
                message: "Master secret does not match the stored key verifier".into(),
                context: Some(meta.key_id.clone().into()),
            });
        }
        Ok(key)
    }

    /// Loads (or bootstraps) the active master key and caches its sealer.
    async fn active_sealer(&self) -> Result<(String, Arc<Sealer<Aes>>), VaultError> {
        if let Some(cached) = self.cache.lock().as_ref() {
            return Ok((cached.key_id.clone(), Arc::clone(&cached.sealer)));
        }

        let meta = match self.keys.active_key().await? {
            Some(meta) => meta,
            None => self.bootstrap_key().await?,
        };

        let key = self.derive_for_meta(&meta)?;
        let sealer = Arc::new(Sealer::new(&key)?);

        let mut cache = self.cache.lock();
        *cache = Some(CachedKey { key_id: meta.key_id.clone(), sealer: Arc::clone(&sealer) });
        Ok((meta.key_id, sealer))
    }

    /// First-run path: no key metadata yet, derive and persist one.
    async fn bootstrap_key(&self) -> Result<VaultKeyMetadata, VaultError> {
        let salt = make_salt()?;
        let kdf = self.kdf_defaults.clone();
        let secret = self.master_secret.lock().clone();
        let key = derive_master_key(&secret, &salt, &Self::kdf_params(&kdf))?;

        let meta = VaultKeyMetadata {
            key_id: safe_nanoid!(),
            active: false,
            kdf,
            salt,
            derived_at: Utc::now(),
            verifier_sha256: key_verifier(&key),
            rotated_at: None,
        };
        let meta = self.keys.insert_key(meta).await?;
        self.keys.activate_key(&TxContext::new(), &meta.key_id).await?;
        info!(key_id = %meta.key_id, "Vault master key derived");

        Ok(VaultKeyMetadata { active: true, ..meta })
    }

    /// Sealer for a specific key id, falling back to re-derivation for rows left
    /// on a non-active key by an interrupted rotation.
    async fn sealer_for(&self, key_id: &str) -> Result<Arc<Sealer<Aes>>, VaultError> {
        let (active_id, sealer) = self.active_sealer().await?;
        if active_id == key_id {
            return Ok(sealer);
        }
        let meta = self.keys.find_key(key_id).await?;
        let key = self.derive_for_meta(&meta)?;
        Ok(Arc::new(Sealer::new(&key)?))
    }

    fn validate_scope(params: &CreateIdentity) -> Result<(), VaultError> {
        let violation = match params.scope {
            IdentityScope::Team => {
                params.team_id.is_none() || params.connection_id.is_some()
            },
            IdentityScope::Connection => {
                params.connection_id.is_none() || params.team_id.is_some()
            },
            IdentityScope::Global => {
                params.team_id.is_some() || params.connection_id.is_some()
            },
        };
        if violation {
            return Err(VaultError::InvalidScope {
                message: format!("scope '{}' conflicts with team/connection binding", params.scope)
                    .into(),
                context: None,
            });
        }
        Ok(())
    }

    fn serialize_payload(payload: &serde_json::Value) -> Result<Vec<u8>, VaultError> {
        if !payload.is_object() {
            return Err(VaultError::EncryptionFailed {
                message: "Identity payload must be a JSON object".into(),
                context: None,
            });
        }
        serde_json::to_vec(payload).map_err(|_| VaultError::EncryptionFailed {
            message: "Payload serialization failed".into(),
            context: None,
        })
    }

    /// Creates a new identity at version 1.
    ///
    /// # Errors
    /// * [`VaultError::InvalidScope`] on scope invariant violations.
    /// * [`VaultError::EncryptionFailed`] if serialization or sealing fails.
    pub async fn create_identity(
        &self,
        owner_id: &str,
        params: CreateIdentity,
    ) -> Result<Identity, VaultError> {
        Self::validate_scope(&params)?;

        let serialized = Self::serialize_payload(&params.payload)?;
        let (key_id, sealer) = self.active_sealer().await?;

        let id = safe_nanoid!();
        let encrypted_payload = sealer.seal(&serialized, &Self::aad(&id, 1))?;

        let now = Utc::now();
        let identity = Identity {
            id,
            name: params.name,
            scope: params.scope,
            owner_id: owner_id.to_owned(),
            team_id: params.team_id,
            connection_id: params.connection_id,
            template: params.template,
            version: 1,
            key_id,
            encrypted_payload,
            metadata: params.metadata,
            usage_count: 0,
            last_used_at: None,
            last_rotated_at: None,
            created_at: now,
            updated_at: now,
        };

        let identity = self.identities.create_identity(identity).await?;
        info!(identity = %identity.id, owner = owner_id, "Identity created");
        Ok(identity)
    }

    /// Replaces the secret payload, moving the current ciphertext into history.
    ///
    /// The history insert and the row update land in one transactional repository
    /// call, so concurrent readers see either the old or the new version.
    ///
    /// # Errors
    /// * [`VaultError::Forbidden`] unless the actor is the owner, root, or holds
    ///   an `edit` share.
    pub async fn update_identity_secret(
        &self,
        id: &str,
        new_payload: serde_json::Value,
        actor_id: &str,
    ) -> Result<Identity, VaultError> {
        let current = self.identities.find_identity(id).await?;
        self.authorize_access(&current, actor_id, SharePermission::Edit).await?;

        let serialized = Self::serialize_payload(&new_payload)?;
        let (key_id, sealer) = self.active_sealer().await?;

        let next_version = current.version + 1;
        let encrypted_payload = sealer.seal(&serialized, &Self::aad(id, next_version))?;

        let history = CredentialVersion {
            identity_id: current.id.clone(),
            version: current.version,
            key_id: current.key_id.clone(),
            encrypted_payload: current.encrypted_payload.clone(),
            created_at: Utc::now(),
        };

        let now = Utc::now();
        let updated = Identity {
            version: next_version,
            key_id,
            encrypted_payload,
            last_rotated_at: Some(now),
            updated_at: now,
            ..current
        };

        let updated =
            self.identities.update_identity_secret(&TxContext::new(), updated, history).await?;
        info!(identity = id, version = updated.version, actor = actor_id, "Identity secret updated");
        Ok(updated)
    }

    /// Decrypts and returns the current payload.
    ///
    /// # Errors
    /// * [`VaultError::Forbidden`] unless the viewer is the owner, root, or holds
    ///   a `use` (or stronger) share directly or via a team.
    /// * [`VaultError::Tampered`] if the AEAD open fails; a high-severity audit
    ///   event is emitted and the plaintext is never returned.
    pub async fn read_identity_payload(
        &self,
        id: &str,
        viewer_id: &str,
    ) -> Result<serde_json::Value, VaultError> {
        let identity = self.identities.find_identity(id).await?;
        self.authorize_access(&identity, viewer_id, SharePermission::Use).await?;

        let sealer = self.sealer_for(&identity.key_id).await?;
        let opened = match sealer
            .open(&identity.encrypted_payload, &Self::aad(&identity.id, identity.version))
        {
            Ok(plain) => plain,
            Err(err) => {
                error!(
                    identity = %identity.id,
                    version = identity.version,
                    viewer = viewer_id,
                    "Stored credential payload failed authentication"
                );
                let _ = self.events.publish(TamperingDetected {
                    identity_id: identity.id.clone(),
                    version: identity.version,
                    viewer_id: viewer_id.to_owned(),
                    at: Utc::now(),
                });
                return Err(err.into());
            },
        };

        let value: serde_json::Value =
            serde_json::from_slice(&opened).map_err(|_| VaultError::Internal {
                message: "Decrypted payload is not valid JSON".into(),
                context: None,
            })?;

        // Usage accounting is best-effort; a concurrent update must not fail the read.
        let mut bump = identity;
        bump.usage_count += 1;
        bump.last_used_at = Some(Utc::now());
        if let Err(err) = self.identities.update_identity(bump).await {
            warn!(identity = id, error = %err, "Failed to bump identity usage counters");
        }

        Ok(value)
    }

    /// Decrypts a historical payload version.
    ///
    /// # Errors
    /// Same access rules as [`CredentialVault::read_identity_payload`]; the current
    /// version is read from the identity row, prior versions from history.
    pub async fn read_identity_version(
        &self,
        id: &str,
        version: u32,
        viewer_id: &str,
    ) -> Result<serde_json::Value, VaultError> {
        let identity = self.identities.find_identity(id).await?;
        self.authorize_access(&identity, viewer_id, SharePermission::Use).await?;

        if version == identity.version {
            return self.read_identity_payload(id, viewer_id).await;
        }

        let row = self.versions.find_version(id, version).await?;
        let sealer = self.sealer_for(&row.key_id).await?;
        let opened = sealer.open(&row.encrypted_payload, &Self::aad(id, version))?;
        serde_json::from_slice(&opened).map_err(|_| VaultError::Internal {
            message: "Decrypted payload is not valid JSON".into(),
            context: None,
        })
    }

    /// Returns the identity without its ciphertext.
    ///
    /// # Errors
    /// [`VaultError::Forbidden`] unless the viewer has at least `view_metadata`.
    pub async fn read_identity_metadata(
        &self,
        id: &str,
        viewer_id: &str,
    ) -> Result<IdentityMetadata, VaultError> {
        let identity = self.identities.find_identity(id).await?;
        self.authorize_access(&identity, viewer_id, SharePermission::ViewMetadata).await?;
        Ok(IdentityMetadata::from(&identity))
    }

    /// Shares the identity with a principal. Upserts the single active row per
    /// (identity, principal).
    ///
    /// # Errors
    /// [`VaultError::Forbidden`] unless the grantor holds `vault.share`.
    pub async fn share(
        &self,
        id: &str,
        principal_type: PrincipalType,
        principal_id: &str,
        permission: SharePermission,
        expires_at: Option<chrono::DateTime<Utc>>,
        granted_by: &str,
    ) -> Result<IdentityShare, VaultError> {
        self.checker.require(granted_by, "vault.share", None).await?;
        // The identity must exist before a share can point at it.
        let identity = self.identities.find_identity(id).await?;

        let share = IdentityShare {
            id: safe_nanoid!(),
            identity_id: identity.id.clone(),
            principal_type,
            principal_id: principal_id.to_owned(),
            permission,
            expires_at,
            granted_by: granted_by.to_owned(),
            granted_at: Utc::now(),
            revoked_at: None,
            revoked_by: None,
        };
        let share = self.shares.upsert_share(share).await?;
        info!(
            identity = id,
            principal = principal_id,
            permission = %permission,
            "Identity shared"
        );
        Ok(share)
    }

    /// Soft-revokes a share; the row survives for auditability.
    ///
    /// # Errors
    /// [`VaultError::Forbidden`] unless the actor holds `vault.share`.
    pub async fn revoke_share(
        &self,
        id: &str,
        principal_type: PrincipalType,
        principal_id: &str,
        revoked_by: &str,
    ) -> Result<(), VaultError> {
        self.checker.require(revoked_by, "vault.share", None).await?;
        self.shares
            .revoke_share(id, principal_type, principal_id, revoked_by, Utc::now())
            .await?;
        info!(identity = id, principal = principal_id, "Identity share revoked");
        Ok(())
    }

    /// Rotates the master key: derives a new key from `new_passphrase` with a
    /// fresh salt, re-seals every identity and history row, then activates the new
    /// key metadata in the same step that deactivates the previous one.
    ///
    /// Idempotent across crashes: each row carries the id of the key that sealed
    /// it, so a resumed rotation skips rows already on the new key and can still
    /// open rows left on the old one.
    ///
    /// # Errors
    /// [`VaultError::Forbidden`] unless the actor holds `vault.rotate`.
    pub async fn rotate_master_key(
        &self,
        new_passphrase: &str,
        actor_id: &str,
    ) -> Result<(), VaultError> {
        self.checker.require(actor_id, "vault.rotate", None).await?;

        let (old_key_id, old_sealer) = self.active_sealer().await?;

        let salt = make_salt()?;
        let kdf = self.kdf_defaults.clone();
        let new_key = derive_master_key(new_passphrase, &salt, &Self::kdf_params(&kdf))?;
        let new_sealer = Arc::new(Sealer::<Aes>::new(&new_key)?);
        let new_meta = self
            .keys
            .insert_key(VaultKeyMetadata {
                key_id: safe_nanoid!(),
                active: false,
                kdf,
                salt,
                derived_at: Utc::now(),
                verifier_sha256: key_verifier(&new_key),
                rotated_at: None,
            })
            .await?;

        let tx = TxContext::new();
        let now = Utc::now();

        for identity in self.identities.list_identities().await? {
            if identity.key_id == new_meta.key_id {
                continue;
            }
            let sealer = if identity.key_id == old_key_id {
                Arc::clone(&old_sealer)
            } else {
                self.sealer_for(&identity.key_id).await?
            };
            let aad = Self::aad(&identity.id, identity.version);
            let plain = sealer.open(&identity.encrypted_payload, &aad)?;
            let resealed = new_sealer.seal(plain.as_slice(), &aad)?;

            let updated = Identity {
                key_id: new_meta.key_id.clone(),
                encrypted_payload: resealed,
                last_rotated_at: Some(now),
                updated_at: now,
                ..identity.clone()
            };
            self.identities.update_identity(updated).await?;

            for version in self.versions.list_versions(&identity.id).await? {
                if version.key_id == new_meta.key_id {
                    continue;
                }
                let sealer = if version.key_id == old_key_id {
                    Arc::clone(&old_sealer)
                } else {
                    self.sealer_for(&version.key_id).await?
                };
                let aad = Self::aad(&version.identity_id, version.version);
                let plain = sealer.open(&version.encrypted_payload, &aad)?;
                let resealed = new_sealer.seal(plain.as_slice(), &aad)?;
                self.versions
                    .reseal_version(
                        &tx,
                        &version.identity_id,
                        version.version,
                        new_meta.key_id.clone(),
                        resealed,
                    )
                    .await?;
            }
        }

        self.keys.activate_key(&tx, &new_meta.key_id).await?;

        *self.master_secret.lock() = new_passphrase.to_owned();
        *self.cache.lock() = None;
        info!(old_key = %old_key_id, new_key = %new_meta.key_id, "Vault master key rotated");
        Ok(())
    }

    /// Owner, root, or an active share of sufficient strength (user- or team-scoped).
    async fn authorize_access(
        &self,
        identity: &Identity,
        viewer_id: &str,
        required: SharePermission,
    ) -> Result<(), VaultError> {
        if identity.owner_id == viewer_id {
            return Ok(());
        }

        let viewer = self
            .users
            .find_user(viewer_id)
            .await
            .map_err(VaultError::from)
            .context("Resolving payload viewer")?;
        if viewer.is_root {
            return Ok(());
        }

        let now = Utc::now();
        let teams = self.users.teams_of(viewer_id).await?;
        let shares = self.shares.list_shares_for_identity(&identity.id).await?;

        let allowed = shares.iter().filter(|s| s.is_active(now)).any(|s| {
            let principal_match = match s.principal_type {
                PrincipalType::User => s.principal_id == viewer_id,
                PrincipalType::Team => teams.iter().any(|t| *t == s.principal_id),
            };
            principal_match && s.permission.allows(required)
        });

        // Team-scoped identities are usable by members of their team.
        let team_scoped = identity.scope == IdentityScope::Team
            && identity.team_id.as_ref().is_some_and(|team| teams.iter().any(|t| t == team));

        if allowed || team_scoped {
            Ok(())
        } else {
            Err(VaultError::Forbidden {
                message: format!("No '{required}' grant on identity").into(),
                context: None,
            })
        }
    }
}
