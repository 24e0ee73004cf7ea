//! Static per-dataset numeric schemas, draw schedules and configured
//! source endpoints. Loaded once at process start.

use std::collections::HashMap;

use chrono::Weekday;

#[derive(Clone, Debug)]
pub enum DrawSchedule {
    /// Fixed number of draws every day.
    Daily(u32),
    /// Draws on specific weekdays only.
    Weekly(HashMap<Weekday, u32>),
}

#[derive(Clone, Debug)]
pub struct DatasetRule {
    pub key: String,
    pub title: String,
    pub aliases: Vec<String>,

    pub primary_count: usize,
    pub primary_min: i64,
    pub primary_max: i64,
    pub primary_unique: bool,

    pub bonus_count: usize,
    pub bonus_min: i64,
    pub bonus_max: i64,
    /// Metadata keys the bonus value may live under.
    pub bonus_keys: Vec<String>,
    /// Bonus numbers arrive appended to the primary field's tokens.
    pub embedded_bonus_in_primary: bool,

    pub sort_primary: bool,
    pub schedule: DrawSchedule,
}

impl DatasetRule {
    pub fn sequence_len(&self) -> usize {
        self.primary_count + self.bonus_count
    }

    pub fn snapshot(&self) -> modelkit::RuleSnapshot {
        modelkit::RuleSnapshot {
            primary_count: self.primary_count,
            primary_min: self.primary_min,
            primary_max: self.primary_max,
            primary_unique: self.primary_unique,
            bonus_count: self.bonus_count,
            bonus_min: self.bonus_min,
            bonus_max: self.bonus_max,
            sort_primary: self.sort_primary,
        }
    }
}

pub struct RuleRegistry {
    rules: HashMap<String, DatasetRule>,
    endpoints: HashMap<String, Vec<String>>,
}

impl RuleRegistry {
    pub fn new(rules: Vec<DatasetRule>, endpoints: HashMap<String, Vec<String>>) -> Self {
        Self {
            rules: rules.into_iter().map(|r| (r.key.clone(), r)).collect(),
            endpoints,
        }
    }

    /// The eight NY open-data games of the original deployment.
    pub fn builtin() -> Self {
        let weekly = |days: &[(Weekday, u32)]| DrawSchedule::Weekly(days.iter().copied().collect());

        let rules = vec![
            DatasetRule {
                key: "take5".into(),
                title: "Lottery Take 5 Winning Numbers".into(),
                aliases: vec!["take 5".into(), "take five".into()],
                primary_count: 5,
                primary_min: 1,
                primary_max: 39,
                primary_unique: true,
                bonus_count: 0,
                bonus_min: 0,
                bonus_max: 0,
                bonus_keys: vec![],
                embedded_bonus_in_primary: false,
                sort_primary: true,
                schedule: DrawSchedule::Daily(2),
            },
            DatasetRule {
                key: "pick3".into(),
                title: "Lottery Numbers Pick 3 Winning Numbers".into(),
                aliases: vec!["pick 3".into(), "numbers".into()],
                primary_count: 3,
                primary_min: 0,
                primary_max: 9,
                primary_unique: false,
                bonus_count: 0,
                bonus_min: 0,
                bonus_max: 0,
                bonus_keys: vec![],
                embedded_bonus_in_primary: false,
                sort_primary: false,
                schedule: DrawSchedule::Daily(2),
            },
            DatasetRule {
                key: "powerball".into(),
                title: "Lottery Powerball Winning Numbers".into(),
                aliases: vec!["power ball".into()],
                primary_count: 5,
                primary_min: 1,
                primary_max: 69,
                primary_unique: true,
                bonus_count: 1,
                bonus_min: 1,
                bonus_max: 26,
                bonus_keys: vec!["powerball".into(), "power_ball".into()],
                embedded_bonus_in_primary: true,
                sort_primary: true,
                schedule: weekly(&[(Weekday::Mon, 1), (Weekday::Wed, 1), (Weekday::Sat, 1)]),
            },
            DatasetRule {
                key: "megamillions".into(),
                title: "Lottery Mega Millions Winning Numbers".into(),
                aliases: vec!["mega millions".into()],
                primary_count: 5,
                primary_min: 1,
                primary_max: 70,
                primary_unique: true,
                bonus_count: 1,
                bonus_min: 1,
                bonus_max: 25,
                bonus_keys: vec!["mega_ball".into(), "mega ball".into()],
                embedded_bonus_in_primary: false,
                sort_primary: true,
                schedule: weekly(&[(Weekday::Tue, 1), (Weekday::Fri, 1)]),
            },
            DatasetRule {
                key: "pick10".into(),
                title: "Lottery Pick 10 Winning Numbers".into(),
                aliases: vec!["pick 10".into(), "pick ten".into()],
                primary_count: 20,
                primary_min: 1,
                primary_max: 80,
                primary_unique: true,
                bonus_count: 0,
                bonus_min: 0,
                bonus_max: 0,
                bonus_keys: vec![],
                embedded_bonus_in_primary: false,
                sort_primary: true,
                schedule: DrawSchedule::Daily(1),
            },
            DatasetRule {
                key: "cash4life".into(),
                title: "Lottery Cash 4 Life Winning Numbers".into(),
                aliases: vec!["cash 4 life".into(), "cash for life".into()],
                primary_count: 5,
                primary_min: 1,
                primary_max: 60,
                primary_unique: true,
                bonus_count: 1,
                bonus_min: 1,
                bonus_max: 4,
                bonus_keys: vec!["cash_ball".into(), "cash ball".into()],
                embedded_bonus_in_primary: false,
                sort_primary: true,
                schedule: DrawSchedule::Daily(1),
            },
            DatasetRule {
                key: "quickdraw".into(),
                title: "Lottery Quick Draw Winning Numbers".into(),
                aliases: vec!["quick draw".into()],
                primary_count: 20,
                primary_min: 1,
                primary_max: 80,
                primary_unique: true,
                bonus_count: 0,
                bonus_min: 0,
                bonus_max: 0,
                bonus_keys: vec![],
                embedded_bonus_in_primary: false,
                sort_primary: true,
                // Runs near-continuously; the per-session safety cap is what
                // actually bounds predictions here.
                schedule: DrawSchedule::Daily(240),
            },
            DatasetRule {
                key: "nylotto".into(),
                title: "Lottery NY Lotto Winning Numbers".into(),
                aliases: vec!["ny lotto".into(), "new york lotto".into()],
                primary_count: 6,
                primary_min: 1,
                primary_max: 59,
                primary_unique: true,
                bonus_count: 1,
                bonus_min: 1,
                bonus_max: 59,
                bonus_keys: vec!["bonus".into()],
                embedded_bonus_in_primary: true,
                sort_primary: true,
                schedule: weekly(&[(Weekday::Wed, 1), (Weekday::Sat, 1)]),
            },
        ];

        let endpoints: HashMap<String, Vec<String>> = [
            ("take5", "dg63-4siq"),
            ("pick3", "hsys-3def"),
            ("powerball", "d6yy-54nr"),
            ("megamillions", "5xaw-6ayf"),
            ("pick10", "bycu-cw7c"),
            ("cash4life", "kwxv-fwze"),
            ("quickdraw", "7sqk-ycpk"),
            ("nylotto", "6nbc-h7bj"),
        ]
        .into_iter()
        .map(|(game, view)| {
            (
                game.to_string(),
                vec![format!(
                    "https://data.ny.gov/api/views/{view}/rows.json?accessType=DOWNLOAD"
                )],
            )
        })
        .collect();

        Self::new(rules, endpoints)
    }

    pub fn get(&self, key: &str) -> Option<&DatasetRule> {
        self.rules.get(key)
    }

    pub fn endpoints(&self, key: &str) -> &[String] {
        self.endpoints.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Sorted dataset keys, used both for iteration order and for naming
    /// valid alternatives in configuration errors.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.rules.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_covers_all_games_with_endpoints() {
        let registry = RuleRegistry::builtin();
        assert_eq!(registry.keys().len(), 8);
        for key in registry.keys() {
            let rule = registry.get(&key).unwrap();
            assert_eq!(rule.key, key);
            assert!(!registry.endpoints(&key).is_empty(), "{key} has no endpoint");
            assert!(rule.primary_count > 0);
        }
    }

    #[test]
    fn sequence_len_includes_bonus() {
        let registry = RuleRegistry::builtin();
        assert_eq!(registry.get("take5").unwrap().sequence_len(), 5);
        assert_eq!(registry.get("powerball").unwrap().sequence_len(), 6);
    }

    #[test]
    fn unknown_key_has_no_rule_and_no_endpoints() {
        let registry = RuleRegistry::builtin();
        assert!(registry.get("keno").is_none());
        assert!(registry.endpoints("keno").is_empty());
    }
}
