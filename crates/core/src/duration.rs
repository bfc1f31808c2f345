//! Free-text duration parsing.
//!
//! Patients describe durations as "seit 30 Minuten", "3 Monate", "seit Jahren" or "eine halbe
//! Stunde". The parser understands explicit `<amount> <unit>` statements (digits or German
//! number words) and falls back to a small table of vague phrasings. Text that matches nothing
//! yields `None`; ambiguity is never an error.

use std::sync::LazyLock;

use regex::Regex;

use crate::normalize::normalize_text;

const MINUTES_PER_HOUR: f64 = 60.0;
const MINUTES_PER_DAY: f64 = 24.0 * MINUTES_PER_HOUR;
const MINUTES_PER_WEEK: f64 = 7.0 * MINUTES_PER_DAY;
const MINUTES_PER_MONTH: f64 = 30.0 * MINUTES_PER_DAY;
const MINUTES_PER_YEAR: f64 = 365.0 * MINUTES_PER_DAY;

static EXPLICIT_DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \b(?P<amount>
            \d+(?:[.,]\d+)?
            | anderthalb | eineinhalb
            | einem | einen | einer | eine | ein
            | zwei | drei | vier | funf | sechs | sieben | acht | neun | zehn | elf | zwolf
            | one | two | three | four | five | six
        )
        \s*
        (?P<unit>
            minuten | minute | min | minutes
            | stunden | stunde | std | hours | hour | h
            | tagen | tage | tag | days | day
            | wochen | woche | weeks | week
            | monaten | monate | monat | months | month
            | jahren | jahre | jahr | years | year
        )\b",
    )
    .expect("valid explicit duration regex")
});

static HALF_HOUR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:eine\s+)?halbe\s+stunde\b").expect("valid half hour regex"));

static HALF_YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bhalbe[sn]?\s+jahr").expect("valid half year regex"));

/// Vague phrasings, checked in order after explicit amounts.
static FALLBACK_PHRASES: LazyLock<Vec<(Regex, f64)>> = LazyLock::new(|| {
    [
        (r"\bseit (?:vielen |einigen )?jahren\b|\bjahrelang\b", 2.0 * MINUTES_PER_YEAR),
        (r"\bseit (?:vielen |einigen )?monaten\b|\bmonatelang\b", 13.0 * MINUTES_PER_WEEK),
        (r"\bseit (?:einigen |ein paar )?wochen\b|\bwochenlang\b", 4.0 * MINUTES_PER_WEEK),
        (r"\bseit (?:einigen |ein paar )?tagen\b|\btagelang\b", 3.0 * MINUTES_PER_DAY),
        (r"\bseit gestern\b", MINUTES_PER_DAY),
        (r"\bseit (?:einigen |ein paar )?stunden\b|\bstundenlang\b", 3.0 * MINUTES_PER_HOUR),
        (r"\b(?:seit )?(?:ein paar|wenigen) minuten\b", 5.0),
    ]
    .into_iter()
    .map(|(pattern, minutes)| (Regex::new(pattern).expect("valid fallback regex"), minutes))
    .collect()
});

/// A duration extracted from free text.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParsedDuration {
    minutes: f64,
}

impl ParsedDuration {
    pub fn from_minutes(minutes: f64) -> Self {
        Self { minutes }
    }

    pub fn minutes(&self) -> f64 {
        self.minutes
    }

    pub fn weeks(&self) -> f64 {
        self.minutes / MINUTES_PER_WEEK
    }
}

fn amount_value(amount: &str) -> Option<f64> {
    let value = match amount {
        "anderthalb" | "eineinhalb" => 1.5,
        "ein" | "eine" | "einem" | "einen" | "einer" | "one" => 1.0,
        "zwei" | "two" => 2.0,
        "drei" | "three" => 3.0,
        "vier" | "four" => 4.0,
        "funf" | "five" => 5.0,
        "sechs" | "six" => 6.0,
        "sieben" => 7.0,
        "acht" => 8.0,
        "neun" => 9.0,
        "zehn" => 10.0,
        "elf" => 11.0,
        "zwolf" => 12.0,
        digits => return digits.replace(',', ".").parse().ok(),
    };
    Some(value)
}

fn unit_minutes(unit: &str) -> f64 {
    match unit {
        "minuten" | "minute" | "min" | "minutes" => 1.0,
        "stunden" | "stunde" | "std" | "hours" | "hour" | "h" => MINUTES_PER_HOUR,
        "tagen" | "tage" | "tag" | "days" | "day" => MINUTES_PER_DAY,
        "wochen" | "woche" | "weeks" | "week" => MINUTES_PER_WEEK,
        "monaten" | "monate" | "monat" | "months" | "month" => MINUTES_PER_MONTH,
        _ => MINUTES_PER_YEAR,
    }
}

/// Parses the first duration statement in `text`.
///
/// Explicit amounts win over vague phrasings; the first explicit statement is taken.
pub fn parse_duration(text: &str) -> Option<ParsedDuration> {
    let normalized = normalize_text(text);

    if HALF_HOUR_RE.is_match(&normalized) {
        return Some(ParsedDuration::from_minutes(30.0));
    }
    if HALF_YEAR_RE.is_match(&normalized) {
        return Some(ParsedDuration::from_minutes(MINUTES_PER_YEAR / 2.0));
    }

    if let Some(caps) = EXPLICIT_DURATION_RE.captures(&normalized) {
        let amount = amount_value(&caps["amount"])?;
        return Some(ParsedDuration::from_minutes(amount * unit_minutes(&caps["unit"])));
    }

    FALLBACK_PHRASES
        .iter()
        .find(|(re, _)| re.is_match(&normalized))
        .map(|(_, minutes)| ParsedDuration::from_minutes(*minutes))
}
