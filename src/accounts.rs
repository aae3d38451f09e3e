use crate::*;

const ACCOUNTS_FILE: &str = "accounts.json";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChatState {
    #[default]
    AwaitingLanguage,
    Idle,
    AwaitingCategory,
    AwaitingPayment,
}

#[serde_with::serde_as]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Account {
    pub chat_id: ChatId,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[serde_as(as = "serde_with::TimestampSecondsWithFrac<String>")]
    pub created_at: DateTime<Utc>,
    pub language: Option<Language>,
    pub state: ChatState,
    /// Category key chosen but not yet paid for; only meaningful while
    /// `state == AwaitingPayment`.
    pub pending_category: Option<String>,
    /// Message id of the last interactive prompt, deleted or edited before
    /// the next one is shown.
    pub last_prompt: Option<i32>,
}

impl Account {
    fn new(chat_id: ChatId, profile: &SenderProfile) -> Self {
        Account {
            chat_id,
            username: profile.username.clone(),
            first_name: profile.first_name.clone(),
            last_name: profile.last_name.clone(),
            created_at: Utc::now(),
            language: None,
            state: ChatState::default(),
            pending_category: None,
            last_prompt: None,
        }
    }

    fn apply(&mut self, patch: AccountPatch) {
        if let Some(language) = patch.language {
            self.language = Some(language);
        }
        if let Some(state) = patch.state {
            self.state = state;
        }
        if let Some(pending_category) = patch.pending_category {
            self.pending_category = pending_category;
        }
        if let Some(last_prompt) = patch.last_prompt {
            self.last_prompt = last_prompt;
        }
    }
}

/// Partial account update, merged last-writer-wins per field. The inner
/// `Option` on clearable fields distinguishes "set to None" from "untouched".
#[derive(Debug, Clone, Default)]
pub struct AccountPatch {
    pub language: Option<Language>,
    pub state: Option<ChatState>,
    pub pending_category: Option<Option<String>>,
    pub last_prompt: Option<Option<i32>>,
}

/// In-memory account table plus a mutation counter. Every mutation bumps the
/// generation under the table lock, so a cloned snapshot carries a total
/// order over mutations.
#[derive(Default)]
struct AccountTable {
    accounts: HashMap<ChatId, Account>,
    generation: u64,
}

pub struct AccountRegistry {
    table: Mutex<AccountTable>,
    locks: Mutex<HashMap<ChatId, Arc<Mutex<()>>>>,
    /// Generation of the snapshot currently on disk. Disk writes serialize on
    /// this mutex alone; the table lock is never held across file I/O, so
    /// unrelated accounts' transitions stay parallel.
    flushed: Mutex<u64>,
    snapshot_path: PathBuf,
}

impl AccountRegistry {
    pub fn load(data_dir: &Path) -> AccountRegistry {
        let snapshot_path = data_dir.join(ACCOUNTS_FILE);
        let accounts = match read_snapshot(&snapshot_path) {
            Ok(accounts) => accounts,
            Err(e) => {
                warn!("Failed to read account snapshot: {}", e);
                HashMap::new()
            }
        };
        AccountRegistry {
            table: Mutex::new(AccountTable { accounts, generation: 0 }),
            locks: Mutex::new(HashMap::new()),
            flushed: Mutex::new(0),
            snapshot_path,
        }
    }

    /// Serialization token for one account. All state-affecting work for a
    /// chat id happens under this guard; the tokio mutex is fair, so queued
    /// events for one account run in arrival order. The map lock is held only
    /// for the lookup, so different accounts never contend.
    pub async fn lock_account(&self, chat_id: ChatId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(chat_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Idempotent: a second creation request for the same chat id returns the
    /// existing account untouched.
    pub async fn get_or_create(&self, chat_id: ChatId, profile: &SenderProfile) -> Account {
        let (account, snapshot) = {
            let mut guard = self.table.lock().await;
            let table = &mut *guard;
            let mut created = false;
            let entry = table.accounts.entry(chat_id).or_insert_with(|| {
                created = true;
                Account::new(chat_id, profile)
            });
            let account = entry.clone();
            let snapshot = if created {
                table.generation += 1;
                Some((table.accounts.clone(), table.generation))
            } else {
                None
            };
            (account, snapshot)
        };
        if let Some((accounts, generation)) = snapshot {
            info!("Created account for {}", chat_id);
            self.flush(accounts, generation).await;
        }
        account
    }

    pub async fn read(&self, chat_id: ChatId) -> Result<Account, CoreError> {
        let table = self.table.lock().await;
        table
            .accounts
            .get(&chat_id)
            .cloned()
            .ok_or(CoreError::AccountNotFound(chat_id))
    }

    pub async fn update(&self, chat_id: ChatId, patch: AccountPatch) -> Result<(), CoreError> {
        let (accounts, generation) = {
            let mut guard = self.table.lock().await;
            let table = &mut *guard;
            let account = table
                .accounts
                .get_mut(&chat_id)
                .ok_or(CoreError::AccountNotFound(chat_id))?;
            account.apply(patch);
            table.generation += 1;
            (table.accounts.clone(), table.generation)
        };
        self.flush(accounts, generation).await;
        Ok(())
    }

    /// Writes a cloned snapshot with the table lock already released. When
    /// two writers race to this mutex out of order, the generation check
    /// keeps the older clone from overwriting the newer one; a skipped write
    /// is safe because a higher generation contains every earlier mutation.
    async fn flush(&self, accounts: HashMap<ChatId, Account>, generation: u64) {
        let mut flushed = self.flushed.lock().await;
        if generation <= *flushed {
            return;
        }
        match self.write_snapshot(&accounts) {
            Ok(()) => *flushed = generation,
            Err(e) => warn!("Save accounts error: {}", e),
        }
    }

    fn write_snapshot(&self, accounts: &HashMap<ChatId, Account>) -> Result<(), CoreError> {
        let json = serde_json::to_string_pretty(accounts)?;
        fs::write(&self.snapshot_path, json)?;
        Ok(())
    }
}

fn read_snapshot(path: &Path) -> Result<HashMap<ChatId, Account>, CoreError> {
    if !path.exists() {
        info!("No account snapshot - starting empty");
        return Ok(HashMap::new());
    }
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn profile() -> SenderProfile {
        SenderProfile {
            username: Some("tester".to_string()),
            first_name: Some("Test".to_string()),
            last_name: None,
        }
    }

    #[tokio::test]
    async fn creation_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let registry = AccountRegistry::load(dir.path());
        let chat = ChatId(1);

        let first = registry.get_or_create(chat, &profile()).await;
        assert_eq!(first.state, ChatState::AwaitingLanguage);
        assert_eq!(first.language, None);

        registry
            .update(chat, AccountPatch { state: Some(ChatState::Idle), ..Default::default() })
            .await
            .unwrap();

        let second = registry.get_or_create(chat, &profile()).await;
        assert_eq!(second.state, ChatState::Idle);
        assert_eq!(second.created_at, first.created_at);
    }

    #[tokio::test]
    async fn read_unknown_account_is_not_found() {
        let dir = TempDir::new().unwrap();
        let registry = AccountRegistry::load(dir.path());
        let err = registry.read(ChatId(99)).await.unwrap_err();
        assert!(matches!(err, CoreError::AccountNotFound(ChatId(99))));
    }

    #[tokio::test]
    async fn patch_merges_and_clears_fields() {
        let dir = TempDir::new().unwrap();
        let registry = AccountRegistry::load(dir.path());
        let chat = ChatId(2);
        registry.get_or_create(chat, &profile()).await;

        registry
            .update(
                chat,
                AccountPatch {
                    language: Some(Language::Ru),
                    state: Some(ChatState::AwaitingPayment),
                    pending_category: Some(Some("food".to_string())),
                    last_prompt: Some(Some(10)),
                },
            )
            .await
            .unwrap();

        let account = registry.read(chat).await.unwrap();
        assert_eq!(account.language, Some(Language::Ru));
        assert_eq!(account.pending_category.as_deref(), Some("food"));
        assert_eq!(account.last_prompt, Some(10));

        // Untouched fields survive, cleared fields become None.
        registry
            .update(
                chat,
                AccountPatch {
                    state: Some(ChatState::Idle),
                    pending_category: Some(None),
                    last_prompt: Some(None),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let account = registry.read(chat).await.unwrap();
        assert_eq!(account.language, Some(Language::Ru));
        assert_eq!(account.state, ChatState::Idle);
        assert_eq!(account.pending_category, None);
        assert_eq!(account.last_prompt, None);
    }

    #[tokio::test]
    async fn snapshot_round_trips_across_restart() {
        let dir = TempDir::new().unwrap();
        let chat = ChatId(3);
        {
            let registry = AccountRegistry::load(dir.path());
            registry.get_or_create(chat, &profile()).await;
            registry
                .update(
                    chat,
                    AccountPatch {
                        language: Some(Language::En),
                        state: Some(ChatState::Idle),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }

        let reloaded = AccountRegistry::load(dir.path());
        let account = reloaded.read(chat).await.unwrap();
        assert_eq!(account.username.as_deref(), Some("tester"));
        assert_eq!(account.language, Some(Language::En));
        assert_eq!(account.state, ChatState::Idle);
    }

    #[tokio::test]
    async fn concurrent_cross_account_updates_land_in_snapshot() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(AccountRegistry::load(dir.path()));
        for chat in [20, 21] {
            registry.get_or_create(ChatId(chat), &profile()).await;
        }

        // Interleaved writers for unrelated accounts; each holds only its own
        // account lock while mutating.
        let mut writers = Vec::new();
        for chat in [20i64, 21] {
            let registry = registry.clone();
            writers.push(tokio::spawn(async move {
                for state in [
                    ChatState::AwaitingCategory,
                    ChatState::AwaitingPayment,
                    ChatState::Idle,
                ] {
                    let _guard = registry.lock_account(ChatId(chat)).await;
                    registry
                        .update(
                            ChatId(chat),
                            AccountPatch { state: Some(state), ..Default::default() },
                        )
                        .await
                        .unwrap();
                }
            }));
        }
        for writer in writers {
            writer.await.unwrap();
        }

        // Whatever order the snapshot writes raced in, the last generation
        // on disk reflects every account's final state.
        let reloaded = AccountRegistry::load(dir.path());
        for chat in [20, 21] {
            assert_eq!(reloaded.read(ChatId(chat)).await.unwrap().state, ChatState::Idle);
        }
    }

    #[tokio::test]
    async fn same_chat_gets_same_lock() {
        let dir = TempDir::new().unwrap();
        let registry = AccountRegistry::load(dir.path());
        let guard = registry.lock_account(ChatId(4)).await;

        // A different account must not be blocked by the held guard.
        let _other = registry.lock_account(ChatId(5)).await;

        let second = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            registry.lock_account(ChatId(4)),
        )
        .await;
        assert!(second.is_err(), "same-account lock should still be held");
        drop(guard);
        registry.lock_account(ChatId(4)).await;
    }
}
