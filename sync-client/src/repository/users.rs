//! Users repository.

use sync_core::{IssueError, UserChange, UsersState};
use sync_types::{ImageId, Payload, User, UserId};
use thiserror::Error;
use tokio::sync::broadcast;

use super::{author_operation, Replica};
use crate::engine::{SyncEngine, SyncError};
use crate::store::OperationStore;
use crate::transport::Transport;

/// Users repository errors.
#[derive(Debug, Error)]
pub enum UsersError {
    /// No live user with this id.
    #[error("user {0} not found")]
    UserNotFound(UserId),

    /// This replica's user already exists.
    #[error("user {0} already exists")]
    AlreadyExists(UserId),

    /// Another user is bound to this login.
    #[error("login {0:?} is taken")]
    LoginTaken(String),

    /// Display names must not be blank.
    #[error("display name is empty")]
    EmptyDisplayName,

    /// Logins must not be blank.
    #[error("login is empty")]
    EmptyLogin,

    /// Could not mint a fresh id.
    #[error(transparent)]
    Issue(#[from] IssueError),

    /// The engine could not record the operation.
    #[error("internal error: {0}")]
    Internal(#[from] SyncError),
}

/// Query and mutate users.
///
/// Mutations act on the engine author's own user.
pub struct UsersRepository<T, S> {
    engine: SyncEngine<T, S>,
    replica: Replica<UsersState>,
}

impl<T, S> UsersRepository<T, S>
where
    T: Transport + 'static,
    S: OperationStore + 'static,
{
    /// Fold the engine's log and follow its updates.
    pub async fn open(engine: &SyncEngine<T, S>) -> Self {
        Self {
            engine: engine.clone(),
            replica: Replica::open(engine, "users").await,
        }
    }

    /// Look up a user.
    pub fn user(&self, id: &UserId) -> Option<User> {
        self.replica.read(|state| state.user(id))
    }

    /// All users, most recently created first.
    pub fn users(&self) -> Vec<User> {
        self.replica.read(UsersState::users)
    }

    /// The engine author's user, once created.
    pub fn current_user(&self) -> Option<User> {
        self.user(&self.engine.author())
    }

    /// The user bound to `login`.
    pub fn find_by_login(&self, login: &str) -> Option<User> {
        self.replica.read(|state| state.find_by_login(login))
    }

    /// Subscribe to change events.
    pub fn changes(&self) -> broadcast::Receiver<UserChange> {
        self.replica.changes()
    }

    /// Create the engine author's user.
    pub async fn create_user(&self, display_name: &str) -> Result<User, UsersError> {
        let display_name = non_empty(display_name).ok_or(UsersError::EmptyDisplayName)?;
        let mut issuer = self.replica.writer().await;

        let author = self.engine.author();
        if self.user(&author).is_some() {
            return Err(UsersError::AlreadyExists(author));
        }

        let operation = author_operation(
            &self.engine,
            &mut issuer,
            Payload::CreateUser {
                user_id: author,
                display_name,
            },
        )
        .await?;
        self.engine.push(operation.clone()).await?;
        self.replica.fold_local(&operation);

        self.current_user().ok_or(UsersError::UserNotFound(author))
    }

    /// Rename the current user.
    pub async fn update_display_name(&self, display_name: &str) -> Result<User, UsersError> {
        let display_name = non_empty(display_name).ok_or(UsersError::EmptyDisplayName)?;
        let author = self.engine.author();
        self.mutate(Payload::UpdateDisplayName {
            user_id: author,
            display_name,
        })
        .await
    }

    /// Set or clear the current user's avatar.
    ///
    /// The image is not checked: it may not have replicated yet.
    pub async fn update_avatar(&self, avatar: Option<ImageId>) -> Result<User, UsersError> {
        let author = self.engine.author();
        self.mutate(Payload::UpdateAvatar {
            user_id: author,
            avatar,
        })
        .await
    }

    /// Bind the current (anonymous) user to an account login.
    pub async fn bind(&self, login: &str) -> Result<User, UsersError> {
        let login = non_empty(login).ok_or(UsersError::EmptyLogin)?;
        let author = self.engine.author();

        if let Some(owner) = self.find_by_login(&login) {
            if owner.id != author {
                return Err(UsersError::LoginTaken(login));
            }
            // Already bound.
            return Ok(owner);
        }

        self.mutate(Payload::BindUser {
            user_id: author,
            login,
        })
        .await
    }

    async fn mutate(&self, payload: Payload) -> Result<User, UsersError> {
        let mut issuer = self.replica.writer().await;

        let author = self.engine.author();
        if self.user(&author).is_none() {
            return Err(UsersError::UserNotFound(author));
        }

        let operation = author_operation(&self.engine, &mut issuer, payload).await?;
        self.engine.push(operation.clone()).await?;
        self.replica.fold_local(&operation);

        self.current_user().ok_or(UsersError::UserNotFound(author))
    }
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{RetryConfig, SyncConfig};
    use crate::store::MemoryStore;
    use crate::transport::MockTransport;
    use std::sync::Arc;
    use std::time::Duration;
    use sync_core::Reducer;
    use sync_types::{Operation, OperationId, ID_LEN};

    struct Fixture {
        transport: MockTransport,
        store: MemoryStore,
        engine: SyncEngine<MockTransport, MemoryStore>,
        users: UsersRepository<MockTransport, MemoryStore>,
    }

    fn me() -> UserId {
        UserId::from_array([1; ID_LEN])
    }

    fn bob() -> UserId {
        UserId::from_array([2; ID_LEN])
    }

    fn remote(n: u8, created_at: u64, payload: Payload) -> Operation {
        Operation::new(OperationId::from_array([n; ID_LEN]), created_at, bob(), payload)
    }

    fn quiet_config() -> SyncConfig {
        SyncConfig::default()
            .with_push_on_write(false)
            .with_retry(RetryConfig::disabled())
            .with_poll_interval(Duration::from_secs(3600))
    }

    async fn setup() -> Fixture {
        setup_with(quiet_config()).await
    }

    async fn setup_with(config: SyncConfig) -> Fixture {
        let transport = MockTransport::new();
        let store = MemoryStore::new();
        let engine = SyncEngine::open(
            me(),
            transport.clone(),
            store.clone(),
            Arc::new(ManualClock::new(1_000)),
            config,
        )
        .await
        .unwrap();
        let users = UsersRepository::open(&engine).await;
        Fixture {
            transport,
            store,
            engine,
            users,
        }
    }

    #[tokio::test]
    async fn create_user_is_visible_immediately() {
        let f = setup().await;

        let ann = f.users.create_user("  Ann ").await.unwrap();

        assert_eq!(ann.id, me());
        assert_eq!(ann.display_name, "Ann");
        assert_eq!(f.users.current_user(), Some(ann));
        // Nothing went over the network yet
        assert!(f.transport.pushed_batches().is_empty());
        assert_eq!(f.engine.pending_count().await, 1);
    }

    #[tokio::test]
    async fn create_user_twice_fails() {
        let f = setup().await;
        f.users.create_user("Ann").await.unwrap();

        let result = f.users.create_user("Ann again").await;
        assert!(matches!(result, Err(UsersError::AlreadyExists(id)) if id == me()));
    }

    #[tokio::test]
    async fn validation_failures_write_nothing() {
        let f = setup().await;

        assert!(matches!(
            f.users.create_user("   ").await,
            Err(UsersError::EmptyDisplayName)
        ));
        assert!(matches!(
            f.users.update_display_name("Bob").await,
            Err(UsersError::UserNotFound(_))
        ));
        assert!(matches!(f.users.bind(" ").await, Err(UsersError::EmptyLogin)));
        assert!(f.engine.operations().await.is_empty());
    }

    #[tokio::test]
    async fn updates_fold_optimistically() {
        let f = setup().await;
        f.users.create_user("Ann").await.unwrap();

        f.users.update_display_name("Annie").await.unwrap();
        let avatar = ImageId::from_array([9; ID_LEN]);
        let updated = f.users.update_avatar(Some(avatar)).await.unwrap();

        assert_eq!(updated.display_name, "Annie");
        assert_eq!(updated.avatar, Some(avatar));
        assert_eq!(f.engine.operations().await.len(), 3);
    }

    #[tokio::test]
    async fn failed_push_is_not_applied_locally() {
        let f = setup().await;
        f.users.create_user("Ann").await.unwrap();
        let mut changes = f.users.changes();
        f.store.fail_next_save("disk full");

        let result = f.users.update_display_name("Annie").await;

        assert!(matches!(result, Err(UsersError::Internal(SyncError::Store(_)))));
        assert_eq!(f.users.current_user().unwrap().display_name, "Ann");
        assert!(changes.try_recv().is_err());
    }

    #[tokio::test]
    async fn bind_sets_login_and_detects_taken_logins() {
        let f = setup().await;
        f.users.create_user("Ann").await.unwrap();

        // Another replica's user already holds "bob"
        f.transport.queue_pull(vec![
            remote(
                50,
                10,
                Payload::CreateUser {
                    user_id: bob(),
                    display_name: "Bob".into(),
                },
            ),
            remote(
                51,
                11,
                Payload::BindUser {
                    user_id: bob(),
                    login: "bob".into(),
                },
            ),
        ]);
        let mut changes = f.users.changes();
        f.engine.poll().await.unwrap();
        changes.recv().await.unwrap();

        assert!(matches!(
            f.users.bind("bob").await,
            Err(UsersError::LoginTaken(login)) if login == "bob"
        ));

        let ann = f.users.bind("ann").await.unwrap();
        assert_eq!(ann.login.as_deref(), Some("ann"));
        assert_eq!(f.users.find_by_login("ann").map(|u| u.id), Some(me()));

        // Binding again to the same login writes nothing
        let before = f.engine.operations().await.len();
        f.users.bind("ann").await.unwrap();
        assert_eq!(f.engine.operations().await.len(), before);
    }

    #[tokio::test]
    async fn learned_operations_emit_changes() {
        let f = setup().await;
        let mut changes = f.users.changes();
        f.transport.queue_pull(vec![remote(
            50,
            10,
            Payload::CreateUser {
                user_id: bob(),
                display_name: "Bob".into(),
            },
        )]);

        f.engine.poll().await.unwrap();

        assert_eq!(changes.recv().await.unwrap(), UserChange::ListChanged);
        assert_eq!(changes.recv().await.unwrap(), UserChange::UserChanged(bob()));
        assert_eq!(f.users.user(&bob()).unwrap().display_name, "Bob");
        assert_eq!(f.users.users().len(), 1);
    }

    #[tokio::test]
    async fn lagging_listener_rebuilds_from_the_log() {
        // Room for one update: polling several batches before the listener
        // runs overflows the stream.
        let f = setup_with(quiet_config().with_update_buffer(1)).await;
        for n in 0..4u8 {
            let user_id = UserId::from_array([10 + n; ID_LEN]);
            f.transport.queue_pull(vec![Operation::new(
                OperationId::from_array([60 + n; ID_LEN]),
                10 + u64::from(n),
                user_id,
                Payload::CreateUser {
                    user_id,
                    display_name: format!("user {}", n),
                },
            )]);
            assert_eq!(f.engine.poll().await.unwrap(), 1);
        }

        for _ in 0..200 {
            if f.users.users().len() == 4 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let folded = UsersState::fold(&f.engine.operations().await);
        assert_eq!(f.users.users(), folded.users());
        assert_eq!(f.users.users().len(), 4);
    }
}
