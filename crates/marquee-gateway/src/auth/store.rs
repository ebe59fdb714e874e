//! Credential storage: users and refresh sessions.
//!
//! Refresh sessions are keyed by the digest of the opaque refresh token.
//! Each session belongs to a rotation family; at most one session per family
//! is live at any time, and consumed tokens leave a tombstone so that a
//! replayed token can be recognised and its family revoked.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sled::Transactional;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
};

use super::AuthError;
use super::users::{User, UserRole};

/// Index key holding the number of registered users.
const USER_COUNT_KEY: &[u8] = b"meta:user_count";

/// Input for [`CredentialStore::create_user`].
#[derive(Debug, Clone)]
pub struct NewUser {
    /// Display username.
    pub username: String,
    /// Uniqueness key for the username (case-folded when configured).
    pub username_key: String,
    /// Normalized email.
    pub email: String,
    /// Password hash.
    pub password_hash: String,
    /// Requested role.
    pub role: UserRole,
    /// Upgrade to admin if this is the first user ever stored.
    pub promote_if_first: bool,
}

/// A live refresh session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Owning user.
    pub user_id: u64,
    /// Rotation family.
    pub family_id: String,
    /// When this session was issued.
    pub created_at: DateTime<Utc>,
    /// When this session expires.
    pub expires_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Whether the session is expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Tombstone for a refresh token consumed by rotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConsumedRecord {
    user_id: u64,
    family_id: String,
    expires_at: DateTime<Utc>,
}

/// Result of presenting a refresh token for rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotateOutcome {
    /// The presented token was live; the replacement session is returned.
    Rotated(SessionRecord),
    /// The presented token had expired and was removed.
    Expired,
    /// The presented token was already consumed; its family has been revoked.
    Reused {
        /// Owning user.
        user_id: u64,
        /// Revoked family.
        family_id: String,
    },
    /// No record of the presented token.
    Unknown,
}

/// Durable storage for users and refresh sessions.
///
/// Implementations must make `create_user` and `rotate_session` atomic: two
/// concurrent registrations of one username cannot both succeed, and two
/// concurrent rotations of one token cannot both return `Rotated`.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Insert a user, assigning its ID.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the username key or email is taken.
    async fn create_user(&self, new: NewUser) -> Result<User, AuthError>;

    /// Look up a user by ID.
    async fn user_by_id(&self, id: u64) -> Result<Option<User>, AuthError>;

    /// Look up a user by username key.
    async fn user_by_username(&self, username_key: &str) -> Result<Option<User>, AuthError>;

    /// List all users ordered by ID.
    async fn list_users(&self) -> Result<Vec<User>, AuthError>;

    /// Number of registered users.
    async fn user_count(&self) -> Result<u64, AuthError>;

    /// Stamp a successful login.
    async fn record_login(&self, user_id: u64, at: DateTime<Utc>) -> Result<(), AuthError>;

    /// Store a new session as the head of its family.
    async fn insert_session(
        &self,
        token_hash: &str,
        session: &SessionRecord,
    ) -> Result<(), AuthError>;

    /// Atomically consume `presented_hash` and install `replacement_hash`.
    async fn rotate_session(
        &self,
        presented_hash: &str,
        replacement_hash: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<RotateOutcome, AuthError>;

    /// Delete a session. Returns whether one existed.
    async fn delete_session(&self, token_hash: &str) -> Result<bool, AuthError>;

    /// Delete every session of a user. Returns how many were removed.
    async fn delete_user_sessions(&self, user_id: u64) -> Result<usize, AuthError>;

    /// Remove expired sessions and tombstones. Returns how many were removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, AuthError>;
}

/// Credential store backed by sled.
pub struct SledCredentialStore {
    db: sled::Db,
    users: sled::Tree,
    index: sled::Tree,
    sessions: sled::Tree,
    families: sled::Tree,
    consumed: sled::Tree,
}

impl SledCredentialStore {
    /// Open or create a store under `path/auth`.
    ///
    /// # Errors
    ///
    /// Returns error if database cannot be opened.
    pub fn open(path: &Path) -> Result<Self, AuthError> {
        let db = sled::open(path.join("auth"))
            .map_err(|e| AuthError::Storage(format!("Failed to open auth database: {e}")))?;
        Self::with_db(db)
    }

    /// Create a store on an existing sled database.
    ///
    /// # Errors
    ///
    /// Returns error if trees cannot be opened.
    pub fn with_db(db: sled::Db) -> Result<Self, AuthError> {
        Ok(Self {
            users: db.open_tree("users")?,
            index: db.open_tree("user_index")?,
            sessions: db.open_tree("sessions")?,
            families: db.open_tree("session_families")?,
            consumed: db.open_tree("consumed_tokens")?,
            db,
        })
    }

    /// Number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn sessions_matching(
        &self,
        pred: impl Fn(&SessionRecord) -> bool,
    ) -> Result<Vec<(sled::IVec, SessionRecord)>, AuthError> {
        let mut matched = Vec::new();
        for entry in self.sessions.iter() {
            let (key, value) = entry?;
            let record: SessionRecord = decode(&value)?;
            if pred(&record) {
                matched.push((key, record));
            }
        }
        Ok(matched)
    }

    fn remove_session(&self, key: &[u8], record: &SessionRecord) -> Result<bool, AuthError> {
        (&self.sessions, &self.families)
            .transaction(|(sessions, families)| -> ConflictableTransactionResult<bool, AuthError> {
                let existed = sessions.remove(key)?.is_some();
                let fid = record.family_id.as_bytes();
                if families.get(fid)?.is_some_and(|head| head.as_ref() == key) {
                    families.remove(fid)?;
                }
                Ok(existed)
            })
            .map_err(tx_error)
    }
}

impl std::fmt::Debug for SledCredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledCredentialStore")
            .field("users", &self.users.len())
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CredentialStore for SledCredentialStore {
    async fn create_user(&self, new: NewUser) -> Result<User, AuthError> {
        // IDs start at 1
        let id = self.db.generate_id()? + 1;
        let username_key = format!("username:{}", new.username_key);
        let email_key = format!("email:{}", new.email);
        let created_at = Utc::now();

        (&self.users, &self.index)
            .transaction(|(users, index)| -> ConflictableTransactionResult<User, AuthError> {
                if index.get(username_key.as_bytes())?.is_some() {
                    return Err(ConflictableTransactionError::Abort(AuthError::Conflict(
                        "username".to_string(),
                    )));
                }
                if index.get(email_key.as_bytes())?.is_some() {
                    return Err(ConflictableTransactionError::Abort(AuthError::Conflict(
                        "email".to_string(),
                    )));
                }

                let count = index
                    .get(USER_COUNT_KEY)?
                    .and_then(|v| decode_u64(&v))
                    .unwrap_or(0);
                let role = if count == 0 && new.promote_if_first {
                    UserRole::Admin
                } else {
                    new.role
                };

                let user = User {
                    id,
                    username: new.username.clone(),
                    email: new.email.clone(),
                    password_hash: new.password_hash.clone(),
                    role,
                    onboarded: false,
                    created_at,
                    last_login: None,
                };

                users.insert(id.to_be_bytes().to_vec(), tx_encode(&user)?)?;
                index.insert(username_key.as_bytes(), id.to_be_bytes().to_vec())?;
                index.insert(email_key.as_bytes(), id.to_be_bytes().to_vec())?;
                index.insert(USER_COUNT_KEY, (count + 1).to_be_bytes().to_vec())?;

                Ok(user)
            })
            .map_err(tx_error)
    }

    async fn user_by_id(&self, id: u64) -> Result<Option<User>, AuthError> {
        self.users
            .get(id.to_be_bytes())?
            .map(|v| decode(&v))
            .transpose()
    }

    async fn user_by_username(&self, username_key: &str) -> Result<Option<User>, AuthError> {
        let index_key = format!("username:{username_key}");
        match self.index.get(index_key.as_bytes())? {
            Some(id) => match decode_u64(&id) {
                Some(id) => self.user_by_id(id).await,
                None => Err(AuthError::Storage(format!("Corrupt index entry: {index_key}"))),
            },
            None => Ok(None),
        }
    }

    async fn list_users(&self) -> Result<Vec<User>, AuthError> {
        self.users
            .iter()
            .values()
            .map(|v| decode(&v?))
            .collect()
    }

    async fn user_count(&self) -> Result<u64, AuthError> {
        Ok(self
            .index
            .get(USER_COUNT_KEY)?
            .and_then(|v| decode_u64(&v))
            .unwrap_or(0))
    }

    async fn record_login(&self, user_id: u64, at: DateTime<Utc>) -> Result<(), AuthError> {
        let Some(mut user) = self.user_by_id(user_id).await? else {
            return Ok(());
        };
        user.last_login = Some(at);
        self.users.insert(user_id.to_be_bytes(), encode(&user)?)?;
        Ok(())
    }

    async fn insert_session(
        &self,
        token_hash: &str,
        session: &SessionRecord,
    ) -> Result<(), AuthError> {
        let value = encode(session)?;

        (&self.sessions, &self.families)
            .transaction(|(sessions, families)| -> ConflictableTransactionResult<(), AuthError> {
                sessions.insert(token_hash.as_bytes(), value.as_slice())?;
                families.insert(session.family_id.as_bytes(), token_hash.as_bytes())?;
                Ok(())
            })
            .map_err(tx_error)
    }

    async fn rotate_session(
        &self,
        presented_hash: &str,
        replacement_hash: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<RotateOutcome, AuthError> {
        (&self.sessions, &self.families, &self.consumed)
            .transaction(
                |(sessions, families, consumed)| -> ConflictableTransactionResult<RotateOutcome, AuthError> {
                if let Some(raw) = sessions.get(presented_hash.as_bytes())? {
                    let current: SessionRecord = tx_decode(&raw)?;
                    sessions.remove(presented_hash.as_bytes())?;

                    if current.is_expired(now) {
                        families.remove(current.family_id.as_bytes())?;
                        return Ok(RotateOutcome::Expired);
                    }

                    let replacement = SessionRecord {
                        user_id: current.user_id,
                        family_id: current.family_id.clone(),
                        created_at: now,
                        expires_at,
                    };
                    let tombstone = ConsumedRecord {
                        user_id: current.user_id,
                        family_id: current.family_id.clone(),
                        expires_at: current.expires_at,
                    };

                    sessions.insert(replacement_hash.as_bytes(), tx_encode(&replacement)?)?;
                    families.insert(current.family_id.as_bytes(), replacement_hash.as_bytes())?;
                    consumed.insert(presented_hash.as_bytes(), tx_encode(&tombstone)?)?;

                    return Ok(RotateOutcome::Rotated(replacement));
                }

                if let Some(raw) = consumed.get(presented_hash.as_bytes())? {
                    let tombstone: ConsumedRecord = tx_decode(&raw)?;
                    if let Some(head) = families.remove(tombstone.family_id.as_bytes())? {
                        sessions.remove(head)?;
                    }
                    return Ok(RotateOutcome::Reused {
                        user_id: tombstone.user_id,
                        family_id: tombstone.family_id,
                    });
                }

                Ok(RotateOutcome::Unknown)
                },
            )
            .map_err(tx_error)
    }

    async fn delete_session(&self, token_hash: &str) -> Result<bool, AuthError> {
        let Some(raw) = self.sessions.get(token_hash.as_bytes())? else {
            return Ok(false);
        };
        let record: SessionRecord = decode(&raw)?;
        self.remove_session(token_hash.as_bytes(), &record)
    }

    async fn delete_user_sessions(&self, user_id: u64) -> Result<usize, AuthError> {
        let mut removed = 0;
        for (key, record) in self.sessions_matching(|s| s.user_id == user_id)? {
            if self.remove_session(&key, &record)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, AuthError> {
        let mut removed = 0;
        for (key, record) in self.sessions_matching(|s| s.is_expired(now))? {
            if self.remove_session(&key, &record)? {
                removed += 1;
            }
        }

        for entry in self.consumed.iter() {
            let (key, value) = entry?;
            let tombstone: ConsumedRecord = decode(&value)?;
            if tombstone.expires_at <= now && self.consumed.remove(&key)?.is_some() {
                removed += 1;
            }
        }

        Ok(removed)
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, AuthError> {
    serde_json::to_vec(value).map_err(|e| AuthError::Storage(format!("Serialization error: {e}")))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, AuthError> {
    serde_json::from_slice(bytes)
        .map_err(|e| AuthError::Storage(format!("Deserialization error: {e}")))
}

fn tx_encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ConflictableTransactionError<AuthError>> {
    encode(value).map_err(ConflictableTransactionError::Abort)
}

fn tx_decode<T: DeserializeOwned>(
    bytes: &[u8],
) -> Result<T, ConflictableTransactionError<AuthError>> {
    decode(bytes).map_err(ConflictableTransactionError::Abort)
}

fn tx_error(e: TransactionError<AuthError>) -> AuthError {
    match e {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => AuthError::Storage(e.to_string()),
    }
}

fn decode_u64(bytes: &[u8]) -> Option<u64> {
    bytes.try_into().ok().map(u64::from_be_bytes)
}
