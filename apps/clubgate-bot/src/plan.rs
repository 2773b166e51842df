use std::collections::HashMap;

/// Subscription tiers. Plan codes are stored as strings in the DB and on
/// pay links (`Shp_plan`); the `_u18` suffix marks the discounted youth
/// variant of a base plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Plan {
    Trial,
    M1,
    M3,
    M12,
}

pub const YOUTH_SUFFIX: &str = "_u18";
pub const YOUTH_DISCOUNT: f64 = 0.25;

impl Plan {
    pub fn code(&self) -> &'static str {
        match self {
            Plan::Trial => "trial3_10",
            Plan::M1 => "m1",
            Plan::M3 => "m3",
            Plan::M12 => "m12",
        }
    }

    pub fn duration_days(&self) -> i64 {
        match self {
            Plan::Trial => 3,
            Plan::M1 => 30,
            Plan::M3 => 90,
            Plan::M12 => 365,
        }
    }

    pub fn is_trial(&self) -> bool {
        matches!(self, Plan::Trial)
    }

    fn from_base_code(code: &str) -> Option<Plan> {
        match code {
            "trial3_10" => Some(Plan::Trial),
            "m1" => Some(Plan::M1),
            "m3" => Some(Plan::M3),
            "m12" => Some(Plan::M12),
            _ => None,
        }
    }
}

/// Splits a raw plan code into (plan, youth flag). Unknown codes fall back
/// to the one-month plan so a stale invoice can always be honored.
pub fn parse_plan(code: &str) -> (Plan, bool) {
    let (base, youth) = match code.strip_suffix(YOUTH_SUFFIX) {
        Some(base) => (base, true),
        None => (code, false),
    };
    (Plan::from_base_code(base).unwrap_or(Plan::M1), youth)
}

pub fn plan_code(plan: Plan, youth: bool) -> String {
    if youth {
        format!("{}{}", plan.code(), YOUTH_SUFFIX)
    } else {
        plan.code().to_string()
    }
}

/// Price in whole currency units. Youth variants get a fixed 25% reduction,
/// rounded to the nearest unit.
pub fn price_for(plan: Plan, youth: bool, prices: &HashMap<String, i64>, trial_price: i64) -> i64 {
    let base = if plan.is_trial() {
        trial_price
    } else {
        prices
            .get(plan.code())
            .copied()
            .or_else(|| prices.get(Plan::M1.code()).copied())
            .unwrap_or(990)
    };
    if youth {
        ((base as f64) * (1.0 - YOUTH_DISCOUNT)).round() as i64
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prices() -> HashMap<String, i64> {
        [("m1", 990i64), ("m3", 2490), ("m12", 8990)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn durations_match_the_tier_table() {
        assert_eq!(Plan::Trial.duration_days(), 3);
        assert_eq!(Plan::M1.duration_days(), 30);
        assert_eq!(Plan::M3.duration_days(), 90);
        assert_eq!(Plan::M12.duration_days(), 365);
    }

    #[test]
    fn unknown_plan_falls_back_to_one_month() {
        let (plan, youth) = parse_plan("m6");
        assert_eq!(plan, Plan::M1);
        assert!(!youth);
    }

    #[test]
    fn youth_suffix_is_detected() {
        let (plan, youth) = parse_plan("m3_u18");
        assert_eq!(plan, Plan::M3);
        assert!(youth);
        assert_eq!(plan_code(plan, youth), "m3_u18");
    }

    #[test]
    fn youth_price_is_quarter_off_rounded() {
        let p = prices();
        assert_eq!(price_for(Plan::M1, false, &p, 10), 990);
        // 990 * 0.75 = 742.5 -> 743
        assert_eq!(price_for(Plan::M1, true, &p, 10), 743);
        // 2490 * 0.75 = 1867.5 -> 1868
        assert_eq!(price_for(Plan::M3, true, &p, 10), 1868);
    }

    #[test]
    fn trial_uses_the_configured_trial_price() {
        assert_eq!(price_for(Plan::Trial, false, &prices(), 10), 10);
    }

    #[test]
    fn missing_plan_price_falls_back_to_m1() {
        let mut p = prices();
        p.remove("m12");
        assert_eq!(price_for(Plan::M12, false, &p, 10), 990);
    }
}
