use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::OnceLock;

const EMAIL: &str = r"[A-Za-z0-9._%+-]+@[A-Za-z0-9-]+(?:\.[A-Za-z0-9-]+)+";
const PHONE: &str = r"(?:\+\d{1,3}[\s.-]?)?(?:\(\d{2,4}\)[\s.-]?)?\d(?:[\s.-]?\d){6,12}\b";
const URL: &str = r"(?:https?://|www\.)\S+";
const DATE: &str = r"\b(?:\d{1,2}[/-]\d{1,2}[/-]\d{2,4}|\d{4}[/-]\d{1,2}[/-]\d{1,2})\b";
const AMOUNT: &str = r"[₹$€£]\s?\d+(?:,\d{2,3})*(?:\.\d+)?";

const MIN_PHONE_DIGITS: usize = 7;
const MAX_PHONE_DIGITS: usize = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Email,
    Phone,
    Url,
    Date,
    Amount,
}

/// Question keywords that select an entity category, checked in order.
pub const ENTITY_TRIGGERS: &[(EntityKind, &[&str])] = &[
    (EntityKind::Email, &["email", "mail"]),
    (EntityKind::Phone, &["phone", "mobile", "contact", "telephone", "tel"]),
    (EntityKind::Url, &["website", "url", "link", "site"]),
    (EntityKind::Date, &["date", "dob", "issued"]),
    (EntityKind::Amount, &["amount", "price", "total", "salary", "cost", "fee"]),
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySet {
    pub emails: Vec<String>,
    pub phones: Vec<String>,
    pub urls: Vec<String>,
    pub dates: Vec<String>,
    pub amounts: Vec<String>,
}

impl EntitySet {
    pub fn get(&self, kind: EntityKind) -> &[String] {
        match kind {
            EntityKind::Email => &self.emails,
            EntityKind::Phone => &self.phones,
            EntityKind::Url => &self.urls,
            EntityKind::Date => &self.dates,
            EntityKind::Amount => &self.amounts,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.emails.is_empty()
            && self.phones.is_empty()
            && self.urls.is_empty()
            && self.dates.is_empty()
            && self.amounts.is_empty()
    }
}

struct Patterns {
    email: Regex,
    phone: Regex,
    url: Regex,
    date: Regex,
    amount: Regex,
}

impl Patterns {
    fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            email: Regex::new(EMAIL)?,
            phone: Regex::new(PHONE)?,
            url: Regex::new(URL)?,
            date: Regex::new(DATE)?,
            amount: Regex::new(AMOUNT)?,
        })
    }
}

fn patterns() -> Option<&'static Patterns> {
    static PATTERNS: OnceLock<Option<Patterns>> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns::compile().ok()).as_ref()
}

/// First-seen order, duplicates removed.
fn unique<'a>(matches: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    matches
        .map(str::trim)
        .filter(|found| !found.is_empty() && seen.insert(*found))
        .map(str::to_string)
        .collect()
}

/// Extract every entity category from `text`. Never fails: empty input or
/// an unavailable pattern set yields empty categories.
pub fn extract_entities(text: &str) -> EntitySet {
    let Some(patterns) = patterns() else {
        return EntitySet::default();
    };
    if text.trim().is_empty() {
        return EntitySet::default();
    }

    let dates = unique(patterns.date.find_iter(text).map(|m| m.as_str()));
    let phones = unique(
        patterns
            .phone
            .find_iter(text)
            .map(|m| m.as_str())
            .filter(|candidate| {
                let digits = candidate.chars().filter(char::is_ascii_digit).count();
                (MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&digits)
            })
            .filter(|candidate| !dates.iter().any(|date| date == candidate.trim())),
    );

    EntitySet {
        emails: unique(patterns.email.find_iter(text).map(|m| m.as_str())),
        phones,
        urls: unique(patterns.url.find_iter(text).map(|m| m.as_str())),
        dates,
        amounts: unique(patterns.amount.find_iter(text).map(|m| m.as_str())),
    }
}

/// `token` is `keyword` or one of its plurals ("fees", "addresses", "salaries").
fn names_keyword(token: &str, keyword: &str) -> bool {
    if token == keyword {
        return true;
    }
    let Some(stem) = token.strip_suffix('s') else {
        return false;
    };
    stem == keyword
        || stem.strip_suffix('e') == Some(keyword)
        || matches!(
            (stem.strip_suffix("ie"), keyword.strip_suffix('y')),
            (Some(root), Some(singular)) if root == singular
        )
}

/// Entity categories the question asks about, in table order.
pub fn requested_kinds(question: &str) -> Vec<EntityKind> {
    let lowered = question.to_lowercase();
    let tokens: HashSet<&str> = lowered
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .collect();

    ENTITY_TRIGGERS
        .iter()
        .filter(|(_, keywords)| {
            keywords
                .iter()
                .any(|keyword| tokens.iter().any(|token| names_keyword(token, keyword)))
        })
        .map(|(kind, _)| *kind)
        .collect()
}

/// Direct answer for a question that asks for a category present in
/// `entities`: the matches joined with `", "`.
pub fn entity_answer(question: &str, entities: &EntitySet) -> Option<(EntityKind, String)> {
    requested_kinds(question).into_iter().find_map(|kind| {
        let found = entities.get(kind);
        if found.is_empty() {
            None
        } else {
            Some((kind, found.join(", ")))
        }
    })
}
