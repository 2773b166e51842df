use teloxide::{dptree, prelude::*, types::Update};
use tracing::{error, info};

pub mod handlers;
pub mod keyboards;

use crate::state::AppState;

pub async fn run_bot(
    bot: Bot,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
    state: AppState,
) {
    info!("starting bot dispatcher...");

    match bot.get_me().await {
        Ok(me) => {
            info!("bot connected as @{}", me.username.clone().unwrap_or_else(|| "unknown".into()));
        }
        Err(e) => {
            error!("bot failed to connect to Telegram: {e}");
            return;
        }
    }

    let message_branch = Update::filter_message().endpoint(handlers::message_handler);
    let callback_branch = Update::filter_callback_query().endpoint(handlers::callback_handler);
    let member_branch = Update::filter_chat_member().endpoint(handlers::chat_member_handler);

    let mut dispatcher = Dispatcher::builder(
        bot,
        dptree::entry()
            .branch(message_branch)
            .branch(callback_branch)
            .branch(member_branch),
    )
    .dependencies(dptree::deps![state])
    .default_handler(|upd: std::sync::Arc<Update>| async move {
        info!("unhandled update: {:?}", upd);
    })
    .build();

    tokio::select! {
        _ = dispatcher.dispatch() => {
            info!("bot dispatcher exited");
        }
        _ = shutdown.recv() => {
            info!("bot received shutdown signal, stopping");
        }
    }
}
