use crate::*;

pub async fn on_message(
    bot: Bot,
    msg: Message,
    engine: Arc<ConversationEngine>,
) -> HandlerResult {
    let Some(event) = event_from_message(&msg) else {
        debug!("Message from {} carries no usable payload", msg.chat.id);
        return Ok(());
    };
    dispatch(bot, engine, event).await
}

pub async fn on_callback(
    bot: Bot,
    q: CallbackQuery,
    engine: Arc<ConversationEngine>,
) -> HandlerResult {
    // Ack first so the client stops its spinner even if handling bails out.
    if let Err(e) = bot.answer_callback_query(q.id.clone()).await {
        warn!("Failed to answer callback query: {}", e);
    }

    let chat_id = match q.message.as_ref() {
        Some(MaybeInaccessibleMessage::Regular(message)) => message.chat.id,
        Some(MaybeInaccessibleMessage::Inaccessible(message)) => message.chat.id,
        None => return Ok(()),
    };
    let payload = match q.data.as_deref() {
        Some("back") => EventPayload::BackCallback,
        Some(data) if data.starts_with("category_") => {
            EventPayload::CategoryCallback { token: data.to_string() }
        }
        other => {
            debug!("Ignoring callback with data {:?} from {}", other, chat_id);
            return Ok(());
        }
    };

    let event = InboundEvent {
        chat_id,
        sender: profile_from_user(&q.from),
        // Callback queries carry no timestamp of their own; receipt time is
        // the best reference the staleness check can use.
        timestamp: Utc::now(),
        payload,
    };
    dispatch(bot, engine, event).await
}

/// Failures here are scoped to one event: log and move on, never crash the
/// handling task.
async fn dispatch(
    bot: Bot,
    engine: Arc<ConversationEngine>,
    event: InboundEvent,
) -> HandlerResult {
    let chat_id = event.chat_id;
    match engine.handle(event).await {
        Ok(intents) => realize(&bot, &engine, intents).await,
        Err(e) => {
            warn!("Event for {} failed: {}", chat_id, e);
            Ok(())
        }
    }
}

fn event_from_message(msg: &Message) -> Option<InboundEvent> {
    let sender = msg.from.as_ref().map(profile_from_user).unwrap_or_default();
    let payload = if let Some(photos) = msg.photo() {
        // Telegram lists sizes smallest first; keep the largest rendition.
        let photo = photos.last()?;
        EventPayload::MediaWithCaption {
            attachment_ref: photo.file.id.clone(),
            caption: msg.caption().map(str::to_string),
        }
    } else if let Some(text) = msg.text() {
        match Command::parse(text, "") {
            Ok(command) => EventPayload::Command(command),
            Err(_) => EventPayload::Text(text.to_string()),
        }
    } else {
        return None;
    };

    Some(InboundEvent {
        chat_id: msg.chat.id,
        sender,
        timestamp: msg.date,
        payload,
    })
}

fn profile_from_user(user: &User) -> SenderProfile {
    SenderProfile {
        username: user.username.clone(),
        first_name: Some(user.first_name.clone()),
        last_name: user.last_name.clone(),
    }
}

async fn realize(
    bot: &Bot,
    engine: &ConversationEngine,
    intents: Vec<OutboundIntent>,
) -> HandlerResult {
    for intent in intents {
        match intent {
            OutboundIntent::Send { chat_id, text, keyboard, track_prompt } => {
                let sent = match keyboard {
                    Some(KeyboardSpec::Reply(rows)) => {
                        bot.send_message(chat_id, text)
                            .reply_markup(reply_keyboard(rows))
                            .await?
                    }
                    Some(KeyboardSpec::Inline(rows)) => {
                        bot.send_message(chat_id, text)
                            .reply_markup(inline_keyboard(rows))
                            .await?
                    }
                    None => bot.send_message(chat_id, text).await?,
                };
                if track_prompt {
                    engine.record_prompt(chat_id, sent.id.0).await;
                }
            }
            OutboundIntent::Edit { chat_id, message_id, text, keyboard } => {
                let mut request = bot.edit_message_text(chat_id, MessageId(message_id), text);
                if let Some(KeyboardSpec::Inline(rows)) = keyboard {
                    request = request.reply_markup(inline_keyboard(rows));
                }
                // The message may have been removed by the user meanwhile.
                if let Err(e) = request.await {
                    warn!("Failed to edit message {} in {}: {}", message_id, chat_id, e);
                }
            }
            OutboundIntent::Delete { chat_id, message_id } => {
                if let Err(e) = bot.delete_message(chat_id, MessageId(message_id)).await {
                    warn!("Failed to delete message {} in {}: {}", message_id, chat_id, e);
                }
            }
        }
    }
    Ok(())
}

fn reply_keyboard(rows: Vec<Vec<String>>) -> KeyboardMarkup {
    KeyboardMarkup::new(
        rows.into_iter()
            .map(|row| row.into_iter().map(KeyboardButton::new).collect::<Vec<_>>()),
    )
    .resize_keyboard()
    .one_time_keyboard()
}

fn inline_keyboard(rows: Vec<Vec<(String, String)>>) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(rows.into_iter().map(|row| {
        row.into_iter()
            .map(|(label, token)| InlineKeyboardButton::callback(label, token))
            .collect::<Vec<_>>()
    }))
}
