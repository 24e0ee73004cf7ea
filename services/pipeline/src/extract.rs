//! Maps one stored record's metadata into the dataset's canonical
//! fixed-width integer sequence.
//!
//! Field discovery runs an ordered list of (predicate, description) rules
//! against the metadata keys, highest priority first. Upstream column
//! renames can still defeat the heuristics; a record that fails discovery
//! or the numeric constraints is dropped, never guessed at.

use docstore::{Metadata, StoredRecord};

use crate::rules::DatasetRule;

struct FieldRule {
    describe: &'static str,
    matches: fn(&str) -> bool,
}

const PRIMARY_FIELD_RULES: &[FieldRule] = &[
    FieldRule {
        describe: "winning-numbers key",
        matches: |key| key.contains("winning") && key.contains("number"),
    },
    FieldRule {
        describe: "generic numbers/result key",
        matches: |key| {
            (key.contains("numbers") || key.contains("result"))
                // "draw_number" and friends identify the draw, not its numbers.
                && !(key.contains("draw") && key.contains("number"))
        },
    },
];

fn primary_field(metadata: &Metadata) -> Option<&str> {
    for rule in PRIMARY_FIELD_RULES {
        for (key, value) in metadata {
            if (rule.matches)(&key.to_lowercase()) {
                tracing::trace!(key, rule = rule.describe, "primary field matched");
                return Some(value);
            }
        }
    }
    None
}

fn bonus_field<'a>(metadata: &'a Metadata, rule: &DatasetRule) -> Option<&'a str> {
    for wanted in &rule.bonus_keys {
        let wanted = wanted.to_lowercase();
        for (key, value) in metadata {
            if key.to_lowercase().contains(&wanted) {
                return Some(value);
            }
        }
    }
    metadata
        .iter()
        .find(|(key, _)| {
            let key = key.to_lowercase();
            key.contains("bonus") && !key.contains("winning")
        })
        .map(|(_, value)| value.as_str())
}

/// All non-negative integer tokens in the value, in order.
fn parse_tokens(value: &str) -> Vec<i64> {
    let mut tokens = Vec::new();
    let mut current: Option<i64> = None;
    for c in value.chars() {
        if let Some(d) = c.to_digit(10) {
            current = Some(current.unwrap_or(0) * 10 + i64::from(d));
        } else if let Some(n) = current.take() {
            tokens.push(n);
        }
    }
    if let Some(n) = current {
        tokens.push(n);
    }
    tokens
}

fn in_range(values: impl IntoIterator<Item = i64>, min: i64, max: i64) -> Vec<i64> {
    values.into_iter().filter(|v| (min..=max).contains(v)).collect()
}

/// Canonical sequence (`primary ++ bonus`) for one record, or `None` when
/// the record cannot satisfy the rule.
pub fn extract(record: &StoredRecord, rule: &DatasetRule) -> Option<Vec<i64>> {
    let tokens = parse_tokens(primary_field(&record.metadata)?);

    let (raw_primary, embedded_bonus) =
        if rule.embedded_bonus_in_primary && tokens.len() > rule.primary_count {
            let (head, tail) = tokens.split_at(rule.primary_count);
            (head.to_vec(), tail.to_vec())
        } else {
            (tokens, Vec::new())
        };

    let mut primary = in_range(raw_primary, rule.primary_min, rule.primary_max);
    if rule.primary_unique {
        let mut seen = std::collections::HashSet::new();
        primary.retain(|v| seen.insert(*v));
    }
    if primary.len() < rule.primary_count {
        return None;
    }
    primary.truncate(rule.primary_count);

    if rule.bonus_count == 0 {
        return Some(primary);
    }

    let mut bonus = match bonus_field(&record.metadata, rule) {
        Some(value) => in_range(parse_tokens(value), rule.bonus_min, rule.bonus_max),
        None => Vec::new(),
    };
    if bonus.is_empty() {
        bonus = in_range(embedded_bonus, rule.bonus_min, rule.bonus_max);
    }
    bonus.truncate(rule.bonus_count);
    if bonus.len() != rule.bonus_count {
        return None;
    }

    primary.extend(bonus);
    Some(primary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleRegistry;

    fn record(pairs: &[(&str, &str)]) -> StoredRecord {
        let metadata: Metadata = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        StoredRecord {
            id: docstore::content_id(&metadata),
            document: String::new(),
            metadata,
        }
    }

    fn rule(key: &str) -> crate::rules::DatasetRule {
        RuleRegistry::builtin().get(key).unwrap().clone()
    }

    #[test]
    fn drops_out_of_range_and_repeated_tokens() {
        // take5: 5 unique numbers in 1..=39.
        let rec = record(&[("winning_numbers", "3 3 7 40 12 19 25")]);
        let seq = extract(&rec, &rule("take5")).unwrap();
        assert_eq!(seq, vec![3, 7, 12, 19, 25]);
    }

    #[test]
    fn too_few_valid_tokens_is_unusable() {
        let rec = record(&[("winning_numbers", "3 3 40 41 42")]);
        assert!(extract(&rec, &rule("take5")).is_none());
    }

    #[test]
    fn missing_primary_field_is_unusable() {
        let rec = record(&[("draw_date", "2024-01-01")]);
        assert!(extract(&rec, &rule("take5")).is_none());
    }

    #[test]
    fn draw_number_key_is_not_the_primary_field() {
        let rec = record(&[("draw_number", "1234"), ("results", "1 2 3 4 5")]);
        let seq = extract(&rec, &rule("take5")).unwrap();
        assert_eq!(seq, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn winning_numbers_key_preferred_over_generic() {
        let rec = record(&[
            ("results", "9 9 9 9 9"),
            ("winning_numbers", "1 2 3 4 5"),
        ]);
        let seq = extract(&rec, &rule("take5")).unwrap();
        assert_eq!(seq, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn bonus_from_configured_key() {
        // megamillions: 5 of 1..=70 plus mega ball 1..=25.
        let rec = record(&[
            ("winning_numbers", "10 20 30 40 50"),
            ("mega_ball", "7"),
        ]);
        let seq = extract(&rec, &rule("megamillions")).unwrap();
        assert_eq!(seq, vec![10, 20, 30, 40, 50, 7]);
    }

    #[test]
    fn bonus_falls_back_to_embedded_tokens() {
        // powerball publishes "n1 n2 n3 n4 n5 pb" in one field.
        let rec = record(&[("winning_numbers", "5 12 23 44 61 19")]);
        let seq = extract(&rec, &rule("powerball")).unwrap();
        assert_eq!(seq, vec![5, 12, 23, 44, 61, 19]);
    }

    #[test]
    fn required_bonus_missing_is_unusable() {
        let rec = record(&[("winning_numbers", "10 20 30 40 50")]);
        assert!(extract(&rec, &rule("megamillions")).is_none());
    }

    #[test]
    fn nonunique_rule_keeps_repeats() {
        // pick3 digits may repeat.
        let rec = record(&[("winning_numbers", "7 7 1")]);
        let seq = extract(&rec, &rule("pick3")).unwrap();
        assert_eq!(seq, vec![7, 7, 1]);
    }

    #[test]
    fn parse_tokens_handles_separators() {
        assert_eq!(parse_tokens("03-07, 12;19 25"), vec![3, 7, 12, 19, 25]);
        assert_eq!(parse_tokens(""), Vec::<i64>::new());
    }
}
