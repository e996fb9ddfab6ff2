use std::path::PathBuf;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use ulid::Ulid;

/// A signed-in person: a stable id plus a display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub uid: String,
    pub display_name: String,
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("session store: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt session record: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("sign-in failed: {0}")]
    SignIn(String),
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn current_user(&self) -> Option<User>;

    /// Start an interactive sign-in. Resolves once the user is signed in.
    async fn begin_sign_in(&self) -> Result<User, IdentityError>;

    async fn sign_out(&self) -> Result<(), IdentityError>;

    /// Pick up a session persisted by an earlier run, if any.
    async fn restore_session(&self) -> Result<Option<User>, IdentityError>;
}

/// Outcome of the startup session check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionBootstrap {
    pub user: Option<User>,
    pub timed_out: bool,
}

/// Restore the persisted session, giving up after `timeout`. A provider that
/// never answers leaves the app signed out instead of stuck loading.
pub async fn bootstrap_session(
    provider: &dyn IdentityProvider,
    timeout: Duration,
) -> SessionBootstrap {
    match tokio::time::timeout(timeout, provider.restore_session()).await {
        Ok(Ok(user)) => {
            if let Some(u) = &user {
                info!("restored session for {}", u.display_name);
            }
            SessionBootstrap {
                user,
                timed_out: false,
            }
        }
        Ok(Err(e)) => {
            warn!("session restore failed: {e}");
            SessionBootstrap {
                user: None,
                timed_out: false,
            }
        }
        Err(_) => {
            warn!("session restore timed out after {timeout:?}");
            SessionBootstrap {
                user: None,
                timed_out: true,
            }
        }
    }
}

/// On-disk session record. The user survives sign-out so the uid stays
/// stable for the next sign-in.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionRecord {
    user: User,
    signed_in: bool,
}

/// In-process identity for a single local user. Sign-in is immediate; the
/// session is optionally persisted as JSON so it can be restored.
pub struct LocalIdentity {
    display_name: String,
    session_path: Option<PathBuf>,
    known: RwLock<Option<User>>,
    signed_in: RwLock<bool>,
}

impl LocalIdentity {
    pub fn new(display_name: impl Into<String>, session_path: Option<PathBuf>) -> Self {
        Self {
            display_name: display_name.into(),
            session_path,
            known: RwLock::new(None),
            signed_in: RwLock::new(false),
        }
    }

    fn known_user(&self) -> Option<User> {
        self.known.read().ok().and_then(|u| u.clone())
    }

    fn set_state(&self, user: Option<User>, signed_in: bool) {
        if let Ok(mut known) = self.known.write() {
            *known = user;
        }
        if let Ok(mut flag) = self.signed_in.write() {
            *flag = signed_in;
        }
    }

    async fn persist(&self, user: &User, signed_in: bool) -> Result<(), IdentityError> {
        let Some(path) = &self.session_path else {
            return Ok(());
        };
        let record = SessionRecord {
            user: user.clone(),
            signed_in,
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, serde_json::to_vec_pretty(&record)?).await?;
        Ok(())
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentity {
    fn current_user(&self) -> Option<User> {
        let signed_in = self.signed_in.read().map(|f| *f).unwrap_or(false);
        if signed_in { self.known_user() } else { None }
    }

    async fn begin_sign_in(&self) -> Result<User, IdentityError> {
        if self.display_name.trim().is_empty() {
            return Err(IdentityError::SignIn("no display name configured".into()));
        }
        let user = self.known_user().unwrap_or_else(|| User {
            uid: Ulid::new().to_string(),
            display_name: self.display_name.clone(),
        });
        self.persist(&user, true).await?;
        self.set_state(Some(user.clone()), true);
        info!("signed in as {} ({})", user.display_name, user.uid);
        Ok(user)
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        let known = self.known_user();
        if let Some(user) = &known {
            self.persist(user, false).await?;
            info!("signed out {}", user.display_name);
        }
        self.set_state(known, false);
        Ok(())
    }

    async fn restore_session(&self) -> Result<Option<User>, IdentityError> {
        let Some(path) = &self.session_path else {
            return Ok(None);
        };
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no persisted session at {}", path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let record: SessionRecord = serde_json::from_slice(&bytes)?;
        let user = record.signed_in.then(|| record.user.clone());
        self.set_state(Some(record.user), record.signed_in);
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("roombook_test_identity");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    struct Unresponsive;

    #[async_trait]
    impl IdentityProvider for Unresponsive {
        fn current_user(&self) -> Option<User> {
            None
        }
        async fn begin_sign_in(&self) -> Result<User, IdentityError> {
            std::future::pending().await
        }
        async fn sign_out(&self) -> Result<(), IdentityError> {
            Ok(())
        }
        async fn restore_session(&self) -> Result<Option<User>, IdentityError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn sign_in_and_out() {
        let id = LocalIdentity::new("Sarah", None);
        assert!(id.current_user().is_none());
        let user = id.begin_sign_in().await.unwrap();
        assert_eq!(id.current_user(), Some(user.clone()));
        id.sign_out().await.unwrap();
        assert!(id.current_user().is_none());

        let again = id.begin_sign_in().await.unwrap();
        assert_eq!(again.uid, user.uid);
    }

    #[tokio::test]
    async fn session_survives_restart() {
        let path = session_path("restart.json");
        let first = LocalIdentity::new("Sarah", Some(path.clone()));
        let user = first.begin_sign_in().await.unwrap();

        let second = LocalIdentity::new("Sarah", Some(path.clone()));
        let restored = bootstrap_session(&second, Duration::from_secs(1)).await;
        assert_eq!(restored.user, Some(user.clone()));
        assert!(!restored.timed_out);
        assert_eq!(second.current_user(), Some(user.clone()));

        second.sign_out().await.unwrap();
        let third = LocalIdentity::new("Sarah", Some(path));
        assert_eq!(third.restore_session().await.unwrap(), None);
        assert_eq!(third.begin_sign_in().await.unwrap().uid, user.uid);
    }

    #[tokio::test]
    async fn corrupt_session_is_reported_and_bootstraps_signed_out() {
        let path = session_path("corrupt.json");
        std::fs::write(&path, b"{not json").unwrap();
        let id = LocalIdentity::new("Sarah", Some(path));
        assert!(matches!(
            id.restore_session().await,
            Err(IdentityError::Corrupt(_))
        ));
        let boot = bootstrap_session(&id, Duration::from_secs(1)).await;
        assert_eq!(boot.user, None);
        assert!(!boot.timed_out);
    }

    #[tokio::test]
    async fn bootstrap_times_out_signed_out() {
        let boot = bootstrap_session(&Unresponsive, Duration::from_millis(20)).await;
        assert_eq!(boot.user, None);
        assert!(boot.timed_out);
    }

    #[tokio::test]
    async fn blank_display_name_cannot_sign_in() {
        let id = LocalIdentity::new("  ", None);
        assert!(matches!(
            id.begin_sign_in().await,
            Err(IdentityError::SignIn(_))
        ));
    }
}
