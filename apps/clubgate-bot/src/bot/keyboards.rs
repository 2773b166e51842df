use std::collections::HashMap;

use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};
use url::Url;

use crate::plan::{plan_code, price_for, Plan};

fn tariff_label(plan: Plan, youth: bool, prices: &HashMap<String, i64>, trial_price: i64) -> String {
    let price = price_for(plan, youth, prices, trial_price);
    let period = match plan {
        Plan::Trial => "3-day trial",
        Plan::M1 => "1 month",
        Plan::M3 => "3 months",
        Plan::M12 => "12 months",
    };
    if youth {
        format!("{period} -25% — {price} ₽")
    } else {
        format!("{period} — {price} ₽")
    }
}

pub fn tariffs_kb(prices: &HashMap<String, i64>, trial_price: i64) -> InlineKeyboardMarkup {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = [Plan::Trial, Plan::M1, Plan::M3, Plan::M12]
        .into_iter()
        .map(|plan| {
            vec![InlineKeyboardButton::callback(
                tariff_label(plan, false, prices, trial_price),
                format!("tariff:{}", plan_code(plan, false)),
            )]
        })
        .collect();
    rows.push(vec![InlineKeyboardButton::callback(
        "I am under 18",
        "u18_start".to_string(),
    )]);
    InlineKeyboardMarkup::new(rows)
}

pub fn youth_tariffs_kb(prices: &HashMap<String, i64>, trial_price: i64) -> InlineKeyboardMarkup {
    let rows: Vec<Vec<InlineKeyboardButton>> = [Plan::M1, Plan::M3, Plan::M12]
        .into_iter()
        .map(|plan| {
            vec![InlineKeyboardButton::callback(
                tariff_label(plan, true, prices, trial_price),
                format!("tariff:{}", plan_code(plan, true)),
            )]
        })
        .collect();
    InlineKeyboardMarkup::new(rows)
}

pub fn pay_kb(url: Url) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![InlineKeyboardButton::url("💳 Pay", url)],
        vec![InlineKeyboardButton::callback(
            "🔄 Check payment",
            "check_payment".to_string(),
        )],
        vec![InlineKeyboardButton::callback(
            "⬅️ Back to tariffs",
            "open_tariffs".to_string(),
        )],
    ])
}

pub fn moderation_kb(token: &str) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::callback("✅ Approve", format!("agev:ok:{token}")),
        InlineKeyboardButton::callback("❌ Deny", format!("agev:no:{token}")),
    ]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_show_discounted_price() {
        let prices: HashMap<String, i64> =
            [("m1".to_string(), 990i64), ("m3".to_string(), 2490)].into();
        assert_eq!(tariff_label(Plan::M1, false, &prices, 10), "1 month — 990 ₽");
        assert_eq!(tariff_label(Plan::M1, true, &prices, 10), "1 month -25% — 743 ₽");
    }
}
