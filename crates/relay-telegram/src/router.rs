use std::{sync::Arc, time::Duration};

use teloxide::{
    dispatching::{Dispatcher, ShutdownToken},
    dptree,
    prelude::*,
};
use tokio::task::JoinHandle;

use relay_core::{
    ports::{ChannelHost, Transcriber},
    storage::GroupStorage,
};

use crate::handlers;

/// Everything the update handlers need, shared across updates.
pub struct Inbound {
    pub assistant_name: String,
    pub bot_username: String,
    pub download_timeout: Duration,
    pub host: Arc<dyn ChannelHost>,
    pub transcriber: Arc<dyn Transcriber>,
    pub storage: GroupStorage,
}

/// A dispatcher running in the background.
pub struct Polling {
    pub shutdown: ShutdownToken,
    pub task: JoinHandle<()>,
}

/// Start long polling. Updates are handled one chat at a time by teloxide's
/// default distribution, so arrival order holds per conversation.
pub fn spawn_polling(bot: Bot, inbound: Arc<Inbound>) -> Polling {
    let handler = Update::filter_message().endpoint(handlers::handle_message);

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![inbound])
        .default_handler(|_| async {})
        .build();
    let shutdown = dispatcher.shutdown_token();
    let task = tokio::spawn(async move {
        dispatcher.dispatch().await;
    });

    Polling { shutdown, task }
}
