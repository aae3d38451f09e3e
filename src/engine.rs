use crate::*;

/// Events older than this (relative to receipt) are dropped without touching
/// any state.
pub const STALE_AFTER_SECONDS: i64 = 5;

/// The per-user state machine. Owns the stores; the transport adapter feeds
/// it normalized events and realizes the intents it returns.
pub struct ConversationEngine {
    registry: AccountRegistry,
    ledger: LedgerStore,
}

impl ConversationEngine {
    pub fn new(registry: AccountRegistry, ledger: LedgerStore) -> ConversationEngine {
        ConversationEngine { registry, ledger }
    }

    pub fn registry(&self) -> &AccountRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &LedgerStore {
        &self.ledger
    }

    /// Called by the transport after a tracked send, once the message id is
    /// known. Takes the account lock so an event racing in between the send
    /// and this call cannot read a half-updated prompt id. Failures only cost
    /// a stale-prompt deletion later, so they are logged and swallowed.
    pub async fn record_prompt(&self, chat_id: ChatId, message_id: i32) {
        let _guard = self.registry.lock_account(chat_id).await;
        let patch = AccountPatch { last_prompt: Some(Some(message_id)), ..Default::default() };
        if let Err(e) = self.registry.update(chat_id, patch).await {
            warn!("Failed to record prompt for {}: {}", chat_id, e);
        }
    }

    pub async fn handle(&self, event: InboundEvent) -> Result<Vec<OutboundIntent>, CoreError> {
        let age = Utc::now().signed_duration_since(event.timestamp);
        if age > Duration::seconds(STALE_AFTER_SECONDS) {
            debug!("Dropping stale event for {} ({}s old)", event.chat_id, age.num_seconds());
            return Ok(Vec::new());
        }

        // Everything below runs serialized per account; other accounts are
        // untouched by this guard.
        let _guard = self.registry.lock_account(event.chat_id).await;
        let account = self.registry.get_or_create(event.chat_id, &event.sender).await;

        let mut intents = Vec::new();
        match (account.state, event.payload) {
            (ChatState::AwaitingLanguage, EventPayload::Command(Command::Start)) => {
                self.prompt_language(&account, &mut intents).await?;
            }
            (ChatState::AwaitingLanguage, EventPayload::Text(text))
                if Language::from_choice(&text).is_some() =>
            {
                let language = Language::from_choice(&text).unwrap();
                self.set_language(&account, language, &mut intents).await?;
            }
            (ChatState::Idle, EventPayload::Text(text))
                if Language::from_choice(&text).is_some() =>
            {
                let language = Language::from_choice(&text).unwrap();
                self.set_language(&account, language, &mut intents).await?;
            }
            (ChatState::Idle, EventPayload::Text(text)) if is_bill_trigger(&text) => {
                self.show_category_menu(&account, &mut intents).await?;
            }
            (ChatState::Idle, EventPayload::Command(Command::Start)) => {
                self.show_main_affordance(&account, &mut intents).await?;
            }
            (ChatState::Idle, EventPayload::Command(Command::Status)) => {
                self.show_status(&account, &mut intents);
            }
            (ChatState::Idle, EventPayload::Command(Command::Reset)) => {
                self.reset_ledger(&account, &mut intents)?;
            }
            (ChatState::Idle, EventPayload::Command(Command::Help)) => {
                intents.push(OutboundIntent::Send {
                    chat_id: account.chat_id,
                    text: Command::descriptions().to_string(),
                    keyboard: None,
                    track_prompt: false,
                });
            }
            (ChatState::AwaitingCategory, EventPayload::CategoryCallback { token }) => {
                self.select_category(&account, &token, &mut intents).await?;
            }
            (ChatState::AwaitingCategory, EventPayload::BackCallback) => {
                self.rerender_category_menu(&account, &mut intents).await?;
            }
            (ChatState::AwaitingPayment, EventPayload::BackCallback) => {
                self.show_category_menu(&account, &mut intents).await?;
            }
            (
                ChatState::AwaitingPayment,
                EventPayload::MediaWithCaption { attachment_ref, caption },
            ) => {
                self.capture_payment(&account, attachment_ref, caption, &mut intents).await?;
            }
            (ChatState::AwaitingPayment, _) => {
                // Missing photo, or any other payload while a payment is due.
                intents.push(OutboundIntent::Send {
                    chat_id: account.chat_id,
                    text: text(TextKey::PaymentInvalid, account.language).to_string(),
                    keyboard: None,
                    track_prompt: false,
                });
            }
            (state, payload) => {
                debug!("Ignoring {:?} for {} while in {:?}", payload, account.chat_id, state);
            }
        }
        Ok(intents)
    }

    async fn prompt_language(
        &self,
        account: &Account,
        intents: &mut Vec<OutboundIntent>,
    ) -> Result<(), CoreError> {
        info!("Prompting {} for language", account.chat_id);
        delete_prompt(account, intents);
        intents.push(OutboundIntent::Send {
            chat_id: account.chat_id,
            text: text(TextKey::ChooseLanguage, account.language).to_string(),
            keyboard: Some(KeyboardSpec::Reply(vec![vec!["EN".to_string(), "RU".to_string()]])),
            track_prompt: true,
        });
        self.registry
            .update(
                account.chat_id,
                AccountPatch { last_prompt: Some(None), ..Default::default() },
            )
            .await
    }

    async fn set_language(
        &self,
        account: &Account,
        language: Language,
        intents: &mut Vec<OutboundIntent>,
    ) -> Result<(), CoreError> {
        info!("Setting language {:?} for {}", language, account.chat_id);
        delete_prompt(account, intents);
        intents.push(OutboundIntent::Send {
            chat_id: account.chat_id,
            text: text(TextKey::LanguageChanged, Some(language)).to_string(),
            keyboard: Some(main_keyboard(Some(language))),
            track_prompt: true,
        });
        self.registry
            .update(
                account.chat_id,
                AccountPatch {
                    language: Some(language),
                    state: Some(ChatState::Idle),
                    pending_category: Some(None),
                    last_prompt: Some(None),
                },
            )
            .await
    }

    async fn show_main_affordance(
        &self,
        account: &Account,
        intents: &mut Vec<OutboundIntent>,
    ) -> Result<(), CoreError> {
        delete_prompt(account, intents);
        intents.push(OutboundIntent::Send {
            chat_id: account.chat_id,
            text: text(TextKey::MainMenu, account.language).to_string(),
            keyboard: Some(main_keyboard(account.language)),
            track_prompt: true,
        });
        self.registry
            .update(
                account.chat_id,
                AccountPatch { last_prompt: Some(None), ..Default::default() },
            )
            .await
    }

    async fn show_category_menu(
        &self,
        account: &Account,
        intents: &mut Vec<OutboundIntent>,
    ) -> Result<(), CoreError> {
        info!("Showing category menu to {}", account.chat_id);
        delete_prompt(account, intents);
        intents.push(OutboundIntent::Send {
            chat_id: account.chat_id,
            text: text(TextKey::ChooseCategory, account.language).to_string(),
            keyboard: Some(category_menu(account.language)),
            track_prompt: true,
        });
        self.registry
            .update(
                account.chat_id,
                AccountPatch {
                    language: None,
                    state: Some(ChatState::AwaitingCategory),
                    pending_category: Some(None),
                    last_prompt: Some(None),
                },
            )
            .await
    }

    /// "Back" while the menu is already up: refresh the existing message in
    /// place when we still know it, otherwise fall back to a fresh send.
    async fn rerender_category_menu(
        &self,
        account: &Account,
        intents: &mut Vec<OutboundIntent>,
    ) -> Result<(), CoreError> {
        match account.last_prompt {
            Some(message_id) => {
                intents.push(OutboundIntent::Edit {
                    chat_id: account.chat_id,
                    message_id,
                    text: text(TextKey::ChooseCategory, account.language).to_string(),
                    keyboard: Some(category_menu(account.language)),
                });
                Ok(())
            }
            None => self.show_category_menu(account, intents).await,
        }
    }

    async fn select_category(
        &self,
        account: &Account,
        token: &str,
        intents: &mut Vec<OutboundIntent>,
    ) -> Result<(), CoreError> {
        let Some(category) = token
            .strip_prefix("category_")
            .and_then(category_by_key)
            .filter(|c| !c.pseudo)
        else {
            debug!("Ignoring malformed category token from {}: {}", account.chat_id, token);
            return Ok(());
        };

        info!("{} selected category {}", account.chat_id, category.key);
        delete_prompt(account, intents);
        intents.push(OutboundIntent::Send {
            chat_id: account.chat_id,
            text: text(TextKey::SendReceipt, account.language).to_string(),
            keyboard: Some(KeyboardSpec::Inline(vec![vec![(
                text(TextKey::Back, account.language).to_string(),
                "back".to_string(),
            )]])),
            track_prompt: true,
        });
        self.registry
            .update(
                account.chat_id,
                AccountPatch {
                    language: None,
                    state: Some(ChatState::AwaitingPayment),
                    pending_category: Some(Some(category.key.to_string())),
                    last_prompt: Some(None),
                },
            )
            .await
    }

    async fn capture_payment(
        &self,
        account: &Account,
        attachment_ref: String,
        caption: Option<String>,
        intents: &mut Vec<OutboundIntent>,
    ) -> Result<(), CoreError> {
        let amount = caption.as_deref().and_then(parse_amount);
        let (Some(amount), Some(category_key)) = (amount, account.pending_category.clone()) else {
            if account.pending_category.is_none() {
                warn!("Payment from {} with no pending category", account.chat_id);
            }
            info!("Rejected payment from {}: no usable amount", account.chat_id);
            intents.push(OutboundIntent::Send {
                chat_id: account.chat_id,
                text: text(TextKey::PaymentInvalid, account.language).to_string(),
                keyboard: None,
                track_prompt: false,
            });
            return Ok(());
        };

        let entry = LedgerEntry {
            date: Utc::now().date_naive(),
            category_key: category_key.clone(),
            amount,
            receipt_ref: attachment_ref,
        };
        self.ledger.append(account.chat_id, &entry)?;

        let label = category_label(&category_key, account.language).unwrap_or(category_key.as_str());
        delete_prompt(account, intents);
        intents.push(OutboundIntent::Send {
            chat_id: account.chat_id,
            text: format!(
                "{}\n{}: {:.2}",
                text(TextKey::PaymentSaved, account.language),
                label,
                amount
            ),
            keyboard: Some(main_keyboard(account.language)),
            track_prompt: true,
        });
        self.registry
            .update(
                account.chat_id,
                AccountPatch {
                    language: None,
                    state: Some(ChatState::Idle),
                    pending_category: Some(None),
                    last_prompt: Some(None),
                },
            )
            .await
    }

    /// Report failures are caught here: the command becomes a no-op to the
    /// user rather than killing the handling task.
    fn show_status(&self, account: &Account, intents: &mut Vec<OutboundIntent>) {
        match self.ledger.aggregate(account.chat_id) {
            Ok(summary) => intents.push(OutboundIntent::Send {
                chat_id: account.chat_id,
                text: render_report(&summary, account.language),
                keyboard: None,
                track_prompt: false,
            }),
            Err(e) => warn!("Status report failed for {}: {}", account.chat_id, e),
        }
    }

    fn reset_ledger(
        &self,
        account: &Account,
        intents: &mut Vec<OutboundIntent>,
    ) -> Result<(), CoreError> {
        self.ledger.reset(account.chat_id)?;
        intents.push(OutboundIntent::Send {
            chat_id: account.chat_id,
            text: text(TextKey::LedgerCleared, account.language).to_string(),
            keyboard: None,
            track_prompt: false,
        });
        Ok(())
    }
}

/// Best-effort invalidation of the previous interactive prompt. The
/// transport swallows deletion failures for messages that vanished.
fn delete_prompt(account: &Account, intents: &mut Vec<OutboundIntent>) {
    if let Some(message_id) = account.last_prompt {
        intents.push(OutboundIntent::Delete { chat_id: account.chat_id, message_id });
    }
}

fn main_keyboard(language: Option<Language>) -> KeyboardSpec {
    KeyboardSpec::Reply(vec![vec![text(TextKey::BillButton, language).to_string()]])
}

fn category_menu(language: Option<Language>) -> KeyboardSpec {
    let mut rows: Vec<Vec<(String, String)>> = Vec::new();
    let mut row: Vec<(String, String)> = Vec::new();
    for category in selectable_categories() {
        let label = match language.unwrap_or(Language::En) {
            Language::En => category.label_en,
            Language::Ru => category.label_ru,
        };
        row.push((label.to_string(), format!("category_{}", category.key)));
        if row.len() == 2 {
            rows.push(std::mem::take(&mut row));
        }
    }
    if !row.is_empty() {
        rows.push(row);
    }
    rows.push(vec![(text(TextKey::Back, language).to_string(), "back".to_string())]);
    KeyboardSpec::Inline(rows)
}

/// First whitespace-separated caption token that parses as a number; the
/// rest of the caption is free-form and ignored.
fn parse_amount(caption: &str) -> Option<f64> {
    caption
        .split_whitespace()
        .find_map(|token| token.parse::<f64>().ok())
        .filter(|amount| amount.is_finite() && *amount >= 0.0)
}

/// One line per real category in catalog order, zeros included, then the
/// grand total after a separator.
fn render_report(summary: &LedgerSummary, language: Option<Language>) -> String {
    let mut report = String::new();
    for category in selectable_categories() {
        let sum = summary.totals.get(category.key).copied().unwrap_or(0.0);
        let label = match language.unwrap_or(Language::En) {
            Language::En => category.label_en,
            Language::Ru => category.label_ru,
        };
        report.push_str(&format!("{}: {:.2}\n", label, sum));
    }
    report.push_str("----------------\n");
    report.push_str(&format!(
        "{}: {:.2}",
        text(TextKey::Total, language),
        summary.grand_total
    ));
    report
}
