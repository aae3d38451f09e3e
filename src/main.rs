use std::collections::HashMap;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{signal, sync::Mutex, sync::OwnedMutexGuard};
use teloxide::{
    dispatching::UpdateHandler,
    prelude::*,
    types::{
        InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup,
        MaybeInaccessibleMessage, MessageId, User,
    },
    utils::command::BotCommands,
};
use env_logger;

use bot_structure::*;
use accounts::*;
use ledger::*;
use engine::*;
use locale::*;
use telegram::*;

pub mod bot_structure;
pub mod accounts;
pub mod ledger;
pub mod engine;
pub mod locale;
pub mod telegram;

const DEFAULT_DATA_DIR: &str = "data";

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv::dotenv().ok();
    env_logger::init();

    info!("");
    info!("---------------------------");

    let token = std::env::var("BOT_TOKEN")?;
    let data_dir = std::env::var("DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_DIR));
    fs::create_dir_all(&data_dir)?;

    let bot = Bot::new(token);
    let registry = AccountRegistry::load(&data_dir);
    let ledger = LedgerStore::new(&data_dir);
    let engine = Arc::new(ConversationEngine::new(registry, ledger));

    let _dispatch_task = tokio::spawn(async move {
        Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![engine])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
    });

    signal::ctrl_c().await?;

    Ok(())
}

fn schema() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync + 'static>> {
    dptree::entry()
        .branch(Update::filter_message().endpoint(on_message))
        .branch(Update::filter_callback_query().endpoint(on_callback))
}
