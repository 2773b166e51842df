use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use teloxide::prelude::*;
use teloxide::types::{ChatId, ChatMemberStatus, UserId};

/// The Telegram surface the reconciliation core needs. Kept behind a trait
/// so services can be exercised against a stub in tests.
#[async_trait]
pub trait ChatGate: Send + Sync {
    /// Mints a single-join invite link that stops working at `expires_at`.
    async fn create_single_use_invite(
        &self,
        chat_id: i64,
        expires_at: DateTime<Utc>,
    ) -> Result<String>;

    async fn is_member(&self, chat_id: i64, tg_user_id: i64) -> Result<bool>;

    async fn ban(&self, chat_id: i64, tg_user_id: i64) -> Result<()>;

    async fn unban(&self, chat_id: i64, tg_user_id: i64) -> Result<()>;

    async fn send_message(&self, tg_user_id: i64, text: &str) -> Result<()>;
}

pub struct TelegramGate {
    bot: Bot,
}

impl TelegramGate {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl ChatGate for TelegramGate {
    async fn create_single_use_invite(
        &self,
        chat_id: i64,
        expires_at: DateTime<Utc>,
    ) -> Result<String> {
        let link = self
            .bot
            .create_chat_invite_link(ChatId(chat_id))
            .expire_date(expires_at)
            .member_limit(1)
            .await
            .with_context(|| format!("Failed to create invite link for chat {chat_id}"))?;
        Ok(link.invite_link)
    }

    async fn is_member(&self, chat_id: i64, tg_user_id: i64) -> Result<bool> {
        let member = self
            .bot
            .get_chat_member(ChatId(chat_id), UserId(tg_user_id as u64))
            .await
            .with_context(|| format!("Failed to fetch membership of {tg_user_id} in {chat_id}"))?;
        Ok(matches!(
            member.status(),
            ChatMemberStatus::Owner | ChatMemberStatus::Administrator | ChatMemberStatus::Member
        ))
    }

    async fn ban(&self, chat_id: i64, tg_user_id: i64) -> Result<()> {
        self.bot
            .ban_chat_member(ChatId(chat_id), UserId(tg_user_id as u64))
            .await
            .with_context(|| format!("Failed to ban {tg_user_id} in {chat_id}"))?;
        Ok(())
    }

    async fn unban(&self, chat_id: i64, tg_user_id: i64) -> Result<()> {
        self.bot
            .unban_chat_member(ChatId(chat_id), UserId(tg_user_id as u64))
            .await
            .with_context(|| format!("Failed to unban {tg_user_id} in {chat_id}"))?;
        Ok(())
    }

    async fn send_message(&self, tg_user_id: i64, text: &str) -> Result<()> {
        self.bot
            .send_message(ChatId(tg_user_id), text)
            .await
            .with_context(|| format!("Failed to send message to {tg_user_id}"))?;
        Ok(())
    }
}
