//! Closed enumeration tables

const GENDER: &[&str] = &["unknown", "male", "female", "other"];

const HOUSING: &[&str] = &[
    "unknown",
    "owner",
    "rental",
    "cooperative",
    "family",
    "other",
    "homeless",
];

fn label(table: &'static [&'static str], code: i64) -> &'static str {
    usize::try_from(code)
        .ok()
        .and_then(|index| table.get(index).copied())
        .unwrap_or(table[0])
}

fn code(table: &[&str], label: &str) -> i64 {
    table
        .iter()
        .position(|candidate| *candidate == label)
        .and_then(|index| i64::try_from(index).ok())
        .unwrap_or(0)
}

/// Gender code to label; unrecognized codes are `"unknown"`.
pub fn gender_label(value: i64) -> &'static str {
    label(GENDER, value)
}

/// Gender label to code; unrecognized labels are `0`.
pub fn gender_from_label(value: &str) -> i64 {
    code(GENDER, value)
}

/// Housing situation code to label; unrecognized codes are `"unknown"`.
pub fn housing_label(value: i64) -> &'static str {
    label(HOUSING, value)
}

/// Housing situation label to code; unrecognized labels are `0`.
pub fn housing_from_label(value: &str) -> i64 {
    code(HOUSING, value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gender_table() {
        assert_eq!(gender_label(0), "unknown");
        assert_eq!(gender_label(1), "male");
        assert_eq!(gender_label(2), "female");
        assert_eq!(gender_label(3), "other");
        assert_eq!(gender_label(99), "unknown");
        assert_eq!(gender_label(-1), "unknown");
        assert_eq!(gender_from_label("female"), 2);
        assert_eq!(gender_from_label("Female"), 0);
    }

    #[test]
    fn housing_table_round_trips() {
        for code in 0..=6 {
            assert_eq!(housing_from_label(housing_label(code)), code);
        }
        assert_eq!(housing_label(7), "unknown");
    }
}
