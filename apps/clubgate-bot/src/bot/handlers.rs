use clubgate_db::repositories::UserRepository;
use teloxide::prelude::*;
use teloxide::types::{ChatMemberStatus, ChatMemberUpdated, ParseMode};
use tracing::{error, info, warn};

use crate::bot::keyboards::{moderation_kb, pay_kb, tariffs_kb, youth_tariffs_kb};
use crate::pay::robokassa::{build_payment_link, new_inv_id, PaymentLinkRequest};
use crate::plan::parse_plan;
use crate::AppState;

/// Links younger than this are not reused; the user would have too little
/// time to click them before expiry.
const MIN_REUSE_TTL_MINUTES: i64 = 10;

pub async fn message_handler(
    bot: Bot,
    msg: Message,
    state: AppState,
) -> Result<(), teloxide::RequestError> {
    if !msg.chat.is_private() {
        return Ok(());
    }
    let tg_id = msg.chat.id.0;

    if msg.photo().is_some() {
        return handle_verification_photo(bot, msg, state).await;
    }

    let Some(text) = msg.text() else {
        return Ok(());
    };

    if text.starts_with("/start") {
        let users = UserRepository::new(state.pool.clone());
        let from = msg.from.as_ref();
        if let Err(e) = users
            .get_or_create(
                tg_id,
                from.and_then(|u| u.username.as_deref()),
                from.map(|u| u.first_name.as_str()),
                from.and_then(|u| u.last_name.as_deref()),
            )
            .await
        {
            error!("Failed to upsert user {}: {:#}", tg_id, e);
        }

        let has_active = state
            .payments
            .user_has_active_subscription(tg_id)
            .await
            .unwrap_or(false);
        let greeting = if has_active {
            "👋 <b>Welcome back!</b>\n\nYour subscription is active. Press «Check payment» under \
             an invoice to get your invite links, or renew below."
        } else {
            "👋 <b>Welcome to the club!</b>\n\nPick a plan below to get access to the private \
             channel and chat."
        };
        bot.send_message(msg.chat.id, greeting)
        .parse_mode(ParseMode::Html)
        .reply_markup(tariffs_kb(
            &state.settings.plan_prices,
            state.settings.trial_price,
        ))
        .await?;
        return Ok(());
    }

    if text.starts_with("/help") {
        bot.send_message(
            msg.chat.id,
            format!(
                "Questions about payments or access? Write to support: {}",
                state.settings.support_url
            ),
        )
        .await?;
        return Ok(());
    }

    bot.send_message(msg.chat.id, "Use /start to see the available plans.")
        .await?;
    Ok(())
}

async fn handle_verification_photo(
    bot: Bot,
    msg: Message,
    state: AppState,
) -> Result<(), teloxide::RequestError> {
    let tg_id = msg.chat.id.0;

    let Some(admin_id) = state.settings.age_verify_admin_id else {
        warn!("Verification photo from {} but no reviewer is configured", tg_id);
        bot.send_message(
            msg.chat.id,
            "Age verification is not available right now. Please contact support.",
        )
        .await?;
        return Ok(());
    };

    let token = match state.verify.issue(tg_id, None).await {
        Ok(t) => t,
        Err(e) => {
            error!("Failed to issue verification token for {}: {:#}", tg_id, e);
            bot.send_message(msg.chat.id, "Something went wrong, please try again later.")
                .await?;
            return Ok(());
        }
    };

    let _ = bot.forward_message(ChatId(admin_id), msg.chat.id, msg.id).await;
    let requester = msg
        .from
        .as_ref()
        .map(|u| u.full_name())
        .unwrap_or_else(|| tg_id.to_string());
    bot.send_message(
        ChatId(admin_id),
        format!("🪪 Age verification request from {requester} (id {tg_id})"),
    )
    .reply_markup(moderation_kb(&token.token))
    .await?;

    bot.send_message(
        msg.chat.id,
        "📨 Your photo was sent for review. You will be notified once it is checked.",
    )
    .await?;
    Ok(())
}

pub async fn callback_handler(
    bot: Bot,
    q: CallbackQuery,
    state: AppState,
) -> Result<(), teloxide::RequestError> {
    info!("Received callback: {:?}", q.data);
    let callback_id = q.id.clone();
    let tg_id = q.from.id.0 as i64;

    let Some(data) = q.data else {
        let _ = bot.answer_callback_query(callback_id).await;
        return Ok(());
    };

    match data.as_str() {
        "open_tariffs" => {
            let _ = bot.answer_callback_query(callback_id).await;
            if let Some(msg) = q.message {
                bot.send_message(msg.chat().id, "💳 <b>Choose a plan:</b>")
                    .parse_mode(ParseMode::Html)
                    .reply_markup(tariffs_kb(
                        &state.settings.plan_prices,
                        state.settings.trial_price,
                    ))
                    .await?;
            }
        }

        "u18_start" => {
            let verified = state.verify.is_verified(tg_id).await.unwrap_or(false);
            let _ = bot.answer_callback_query(callback_id).await;
            if let Some(msg) = q.message {
                if verified {
                    bot.send_message(
                        msg.chat().id,
                        "✅ Your age is confirmed. Discounted plans:",
                    )
                    .reply_markup(youth_tariffs_kb(
                        &state.settings.plan_prices,
                        state.settings.trial_price,
                    ))
                    .await?;
                } else {
                    bot.send_message(
                        msg.chat().id,
                        "🪪 To unlock the -25% plans, send a photo of a document that shows your age. \
                         A moderator will review it.",
                    )
                    .await?;
                }
            }
        }

        "check_payment" => {
            let sub = match state.payments.active_subscription(tg_id).await {
                Ok(s) => s,
                Err(e) => {
                    error!("check_payment lookup failed for {}: {:#}", tg_id, e);
                    let _ = bot
                        .answer_callback_query(callback_id)
                        .text("Something went wrong, try again.")
                        .show_alert(true)
                        .await;
                    return Ok(());
                }
            };

            match sub {
                Some(sub) => {
                    let _ = bot.answer_callback_query(callback_id).await;
                    let (plan, _) = parse_plan(&sub.plan);
                    if let Some(msg) = q.message {
                        send_access_links(&bot, msg.chat().id, tg_id, plan.duration_days(), &state)
                            .await?;
                    }
                }
                None => {
                    let _ = bot
                        .answer_callback_query(callback_id)
                        .text("Payment is not confirmed yet. Try again in a minute.")
                        .show_alert(true)
                        .await;
                }
            }
        }

        tariff if tariff.starts_with("tariff:") => {
            let code = tariff.trim_start_matches("tariff:");
            let _ = bot.answer_callback_query(callback_id).await;

            // The provider only accepts numeric InvId values on pay links,
            // so mint one here rather than taking the uuid default.
            let inv_id = new_inv_id();
            let (payment, invoice_id) = match state
                .payments
                .create_invoice(tg_id, code, Some(&inv_id))
                .await
            {
                Ok(v) => v,
                Err(e) => {
                    error!("Failed to create invoice for {}: {:#}", tg_id, e);
                    if let Some(msg) = q.message {
                        bot.send_message(
                            msg.chat().id,
                            "Could not create the invoice, please try again later.",
                        )
                        .await?;
                    }
                    return Ok(());
                }
            };

            let link = build_payment_link(
                &state.settings.robokassa,
                &state.settings.public_base_url,
                &PaymentLinkRequest {
                    amount: payment.amount,
                    inv_id: &invoice_id,
                    tg_user_id: tg_id,
                    plan: code,
                    description: "Club subscription",
                    recurring: state.settings.auto_renew_default,
                },
            );

            match link {
                Ok(url) => {
                    if let Some(msg) = q.message {
                        bot.send_message(
                            msg.chat().id,
                            format!(
                                "🧾 Invoice for <b>{} {}</b> is ready.\n\nPay by the button below, \
                                 then press «Check payment».",
                                payment.amount, payment.currency
                            ),
                        )
                        .parse_mode(ParseMode::Html)
                        .reply_markup(pay_kb(url))
                        .await?;
                    }
                }
                Err(e) => {
                    error!("Failed to build payment link for {}: {:#}", invoice_id, e);
                    if let Some(msg) = q.message {
                        bot.send_message(
                            msg.chat().id,
                            "Could not build the payment link, please try again later.",
                        )
                        .await?;
                    }
                }
            }
        }

        agev if agev.starts_with("agev:") => {
            let is_reviewer = state.settings.is_admin(tg_id)
                || state.settings.age_verify_admin_id == Some(tg_id);
            if !is_reviewer {
                let _ = bot
                    .answer_callback_query(callback_id)
                    .text("Not allowed.")
                    .show_alert(true)
                    .await;
                return Ok(());
            }

            let (approve, token) = if let Some(t) = agev.strip_prefix("agev:ok:") {
                (true, t)
            } else if let Some(t) = agev.strip_prefix("agev:no:") {
                (false, t)
            } else {
                let _ = bot.answer_callback_query(callback_id).await;
                return Ok(());
            };

            let resolved = if approve {
                state.verify.approve(token).await
            } else {
                state.verify.deny(token).await
            };

            match resolved {
                Ok(Some(user_tg_id)) => {
                    let _ = bot
                        .answer_callback_query(callback_id)
                        .text(if approve { "Approved" } else { "Denied" })
                        .await;
                    let text = if approve {
                        "✅ Your age is confirmed! Press /start and pick a discounted plan."
                    } else {
                        "❌ Verification was declined. You can send another photo or contact support."
                    };
                    if let Err(e) = bot.send_message(ChatId(user_tg_id), text).await {
                        warn!("Failed to notify {} about verdict: {}", user_tg_id, e);
                    }
                }
                Ok(None) => {
                    let _ = bot
                        .answer_callback_query(callback_id)
                        .text("This request was already handled or expired.")
                        .show_alert(true)
                        .await;
                }
                Err(e) => {
                    error!("Failed to resolve verification {}: {:#}", token, e);
                    let _ = bot
                        .answer_callback_query(callback_id)
                        .text("Storage error, try again.")
                        .show_alert(true)
                        .await;
                }
            }
        }

        other => {
            warn!("Unknown callback data: {}", other);
            let _ = bot.answer_callback_query(callback_id).await;
        }
    }

    Ok(())
}

async fn send_access_links(
    bot: &Bot,
    chat_id: ChatId,
    tg_id: i64,
    access_days: i64,
    state: &AppState,
) -> Result<(), teloxide::RequestError> {
    let channel_id = state.settings.content_channel_id;
    let group_id = state.settings.content_chat_id;

    let in_channel = state.access.is_member(channel_id, tg_id).await.unwrap_or(false);
    let in_group = state.access.is_member(group_id, tg_id).await.unwrap_or(false);
    if in_channel && in_group {
        bot.send_message(chat_id, "✅ You already have access to the channel and the chat.")
            .await?;
        return Ok(());
    }

    let ttl = state.settings.invite_ttl_minutes;
    let channel = state
        .access
        .link_for(tg_id, channel_id, ttl, Some(access_days), MIN_REUSE_TTL_MINUTES)
        .await;
    let group = state
        .access
        .link_for(tg_id, group_id, ttl, Some(access_days), MIN_REUSE_TTL_MINUTES)
        .await;

    match (channel, group) {
        (Ok(ch), Ok(gr)) => {
            bot.send_message(
                chat_id,
                format!(
                    "🎉 <b>Payment confirmed!</b>\n\n\
                     Channel: {ch}\nChat: {gr}\n\n\
                     Each link works once and expires in {ttl} minutes."
                ),
            )
            .parse_mode(ParseMode::Html)
            .await?;
        }
        (ch, gr) => {
            if let Err(e) = ch {
                error!("Failed to issue channel link for {}: {:#}", tg_id, e);
            }
            if let Err(e) = gr {
                error!("Failed to issue group link for {}: {:#}", tg_id, e);
            }
            bot.send_message(
                chat_id,
                "Payment is confirmed, but issuing invite links failed. \
                 Press «Check payment» again in a minute.",
            )
            .await?;
        }
    }
    Ok(())
}

pub async fn chat_member_handler(
    _bot: Bot,
    upd: ChatMemberUpdated,
    state: AppState,
) -> Result<(), teloxide::RequestError> {
    let joined = matches!(
        upd.new_chat_member.status(),
        ChatMemberStatus::Member | ChatMemberStatus::Administrator | ChatMemberStatus::Owner
    ) && !matches!(
        upd.old_chat_member.status(),
        ChatMemberStatus::Member | ChatMemberStatus::Administrator | ChatMemberStatus::Owner
    );
    if !joined {
        return Ok(());
    }

    let Some(link) = upd.invite_link.as_ref() else {
        return Ok(());
    };

    let tg_id = upd.new_chat_member.user.id.0 as i64;
    let chat_id = upd.chat.id.0;
    if let Err(e) = state
        .access
        .mark_used(tg_id, chat_id, &link.invite_link)
        .await
    {
        error!(
            "Failed to mark invite link used for {} in {}: {:#}",
            tg_id, chat_id, e
        );
    }
    Ok(())
}
