//! Typed model of the Typeform responses payload.
//!
//! These types mirror the JSON returned by `GET /forms/{form_id}/responses`.
//! They deserialize leniently (optional sections default to empty) and
//! serialize back to the same shape, which is what the local cache stores.
//! Fields and answer types not modelled here are carried through as raw JSON
//! so a decoded response re-encodes without loss.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Paged list of [`Response`]s.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Responses {
    /// Total number of items in the retrieved collection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_items: Option<u32>,
    /// Number of pages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
    /// The responses on this page.
    #[serde(default, deserialize_with = "null_as_default")]
    pub items: Vec<Response>,
}

impl Responses {
    /// Total number of responses matching the query, across all pages.
    #[must_use]
    pub fn total_items(&self) -> Option<u32> {
        self.total_items
    }

    /// Number of pages the query spans.
    #[must_use]
    pub fn page_count(&self) -> Option<u32> {
        self.page_count
    }

    /// Number of responses on this page.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if this page has no responses.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Token of the last response on this page, usable as a cursor.
    #[must_use]
    pub fn last_token(&self) -> Option<&str> {
        self.items.last().map(|r| r.token.as_str())
    }

    /// Iterate over the responses on this page.
    pub fn iter(&self) -> std::slice::Iter<'_, Response> {
        self.items.iter()
    }
}

impl<'a> IntoIterator for &'a Responses {
    type Item = &'a Response;
    type IntoIter = std::slice::Iter<'a, Response>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl IntoIterator for Responses {
    type Item = Response;
    type IntoIter = std::vec::IntoIter<Response>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

/// A single submission (or partial landing) on a form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Unique token of the response within its form.
    pub token: String,
    /// Response id. Unique per form, not globally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
    /// When the respondent landed on the form.
    pub landed_at: DateTime<Utc>,
    /// When the response was submitted. `None` for partial responses.
    #[serde(
        default,
        deserialize_with = "deserialize_submitted_at",
        skip_serializing_if = "Option::is_none"
    )]
    pub submitted_at: Option<DateTime<Utc>>,
    /// Metadata about the respondent's HTTP request.
    #[serde(default)]
    pub metadata: Metadata,
    /// Subset of the form definition included with the submission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<Definition>,
    /// Answers given, in form order.
    #[serde(default, deserialize_with = "null_as_default")]
    pub answers: Vec<Answer>,
    /// Hidden field values passed in the form URL.
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub hidden: BTreeMap<String, String>,
    /// Variables computed by form logic.
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub variables: Vec<Variable>,
    /// Calculated values such as the quiz score.
    #[serde(default)]
    pub calculated: Calculated,
    /// Top-level fields not modelled above, kept verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Response {
    /// Check if the respondent submitted the form.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.submitted_at.is_some()
    }

    /// Find the answer for a field, matching its `ref` first and then its id.
    #[must_use]
    pub fn answer_for(&self, field: &str) -> Option<&Answer> {
        self.answers
            .iter()
            .find(|a| a.field.field_ref.as_deref() == Some(field))
            .or_else(|| self.answers.iter().find(|a| a.field.id == field))
    }
}

/// Metadata about a client's HTTP request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    /// The respondent's user agent.
    pub user_agent: String,
    /// Derived from the user agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    /// The page the form was embedded in or linked from.
    pub referer: String,
    /// Anonymized network identifier of the client.
    pub network_id: String,
    /// Browser family, derived from the user agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,
}

/// Subset of a complete form definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    /// Fields of the form.
    #[serde(default, deserialize_with = "null_as_default")]
    pub fields: Vec<Field>,
}

/// A field in a form definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// Field id.
    pub id: String,
    /// Field type, e.g. `short_text` or `multiple_choice`.
    #[serde(rename = "type")]
    pub field_type: String,
    /// The question text.
    #[serde(default)]
    pub title: String,
    /// Optional help text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// An answer to one field.
///
/// Exactly one of the value fields is expected to be set, the one named by
/// `answer_type`. Use [`Answer::value`] rather than matching on them.
/// Value fields for answer types this crate does not know end up in
/// [`Answer::extra`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    /// The field this answer belongs to.
    pub field: AnswerField,
    /// Which of the value fields below carries the answer.
    #[serde(rename = "type")]
    pub answer_type: AnswerType,
    /// Single choice answers for dropdown-like fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choice: Option<Choice>,
    /// Multiple choice answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Choices>,
    /// Date answer, as `YYYY-MM-DD`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    /// Email address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Download URL of an uploaded file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    /// Number, rating or opinion scale value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<f64>,
    /// Yes/no or legal answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boolean: Option<bool>,
    /// Short or long text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Website URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Payment details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment: Option<Payment>,
    /// Phone number in E.164 format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    /// Fields not modelled above, kept verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Answer {
    /// Typed view of the answer's value, selected by [`Answer::answer_type`].
    #[must_use]
    pub fn value(&self) -> AnswerValue<'_> {
        let value = match &self.answer_type {
            AnswerType::Choice => self.choice.as_ref().map(AnswerValue::Choice),
            AnswerType::Choices => self.choices.as_ref().map(AnswerValue::Choices),
            AnswerType::Date => self.date.as_deref().map(AnswerValue::Date),
            AnswerType::Email => self.email.as_deref().map(AnswerValue::Email),
            AnswerType::Url => self.url.as_deref().map(AnswerValue::Url),
            AnswerType::FileUrl => self.file_url.as_deref().map(AnswerValue::FileUrl),
            AnswerType::Number => self.number.map(AnswerValue::Number),
            AnswerType::Boolean => self.boolean.map(AnswerValue::Boolean),
            AnswerType::Text => self.text.as_deref().map(AnswerValue::Text),
            AnswerType::Payment => self.payment.as_ref().map(AnswerValue::Payment),
            AnswerType::PhoneNumber => self.phone_number.as_deref().map(AnswerValue::PhoneNumber),
            AnswerType::Unknown(_) => None,
        };
        value.unwrap_or(AnswerValue::Missing)
    }
}

/// The field an answer refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerField {
    /// The unique id of the form field.
    pub id: String,
    /// The field's type in the original form.
    #[serde(rename = "type")]
    pub field_type: String,
    /// The reference set on the question when the form was created.
    ///
    /// Only present for fields that were given a ref.
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub field_ref: Option<String>,
    /// The field's title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Kind of value carried by an [`Answer`].
///
/// Serialized as its wire name. Names this crate does not recognise decode to
/// [`AnswerType::Unknown`] and encode back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AnswerType {
    /// Dropdown, picture choice or single-select multiple choice.
    Choice,
    /// Multi-select multiple choice.
    Choices,
    /// Date field, as `YYYY-MM-DD`.
    Date,
    /// Email field.
    Email,
    /// Website field.
    Url,
    /// File upload.
    FileUrl,
    /// Number, rating, or opinion scale.
    Number,
    /// Yes/no or legal.
    Boolean,
    /// Short or long text.
    Text,
    /// Payment field.
    Payment,
    /// Phone number field.
    PhoneNumber,
    /// A type this client does not know about yet, with its wire name.
    Unknown(String),
}

impl AnswerType {
    /// The wire name of this type.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Choice => "choice",
            Self::Choices => "choices",
            Self::Date => "date",
            Self::Email => "email",
            Self::Url => "url",
            Self::FileUrl => "file_url",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Text => "text",
            Self::Payment => "payment",
            Self::PhoneNumber => "phone_number",
            Self::Unknown(name) => name.as_str(),
        }
    }
}

impl From<String> for AnswerType {
    fn from(name: String) -> Self {
        match name.as_str() {
            "choice" => Self::Choice,
            "choices" => Self::Choices,
            "date" => Self::Date,
            "email" => Self::Email,
            "url" => Self::Url,
            "file_url" => Self::FileUrl,
            "number" => Self::Number,
            "boolean" => Self::Boolean,
            "text" => Self::Text,
            "payment" => Self::Payment,
            "phone_number" => Self::PhoneNumber,
            _ => Self::Unknown(name),
        }
    }
}

impl From<AnswerType> for String {
    fn from(answer_type: AnswerType) -> Self {
        match answer_type {
            AnswerType::Unknown(name) => name,
            known => known.as_str().to_owned(),
        }
    }
}

impl fmt::Display for AnswerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Borrowed, typed view of an answer's value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AnswerValue<'a> {
    /// A single selected option.
    Choice(&'a Choice),
    /// Several selected options.
    Choices(&'a Choices),
    /// A `YYYY-MM-DD` date.
    Date(&'a str),
    /// An email address.
    Email(&'a str),
    /// A website URL.
    Url(&'a str),
    /// Download URL of an uploaded file.
    FileUrl(&'a str),
    /// A numeric answer.
    Number(f64),
    /// A yes/no answer.
    Boolean(bool),
    /// Free text.
    Text(&'a str),
    /// A payment.
    Payment(&'a Payment),
    /// A phone number.
    PhoneNumber(&'a str),
    /// The type's value field was absent, or the type is unknown.
    Missing,
}

impl fmt::Display for AnswerValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Choice(choice) => f.write_str(choice.display_label()),
            Self::Choices(choices) => {
                let mut labels: Vec<&str> = choices.labels.iter().map(String::as_str).collect();
                if let Some(other) = choices.other.as_deref() {
                    labels.push(other);
                }
                f.write_str(&labels.join(", "))
            }
            Self::Date(s)
            | Self::Email(s)
            | Self::Url(s)
            | Self::FileUrl(s)
            | Self::Text(s)
            | Self::PhoneNumber(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{n}"),
            Self::Boolean(b) => write!(f, "{}", if *b { "yes" } else { "no" }),
            Self::Payment(p) => write!(f, "{} ({} ****{})", p.amount, p.name, p.last4),
            Self::Missing => f.write_str("-"),
        }
    }
}

/// A single choice answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    /// Label of the chosen option.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Free text entered for the "other" option.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other: Option<String>,
}

impl Choice {
    /// The label, or the "other" text when no label was chosen.
    #[must_use]
    pub fn display_label(&self) -> &str {
        self.label
            .as_deref()
            .or(self.other.as_deref())
            .unwrap_or_default()
    }
}

/// A multiple choice answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choices {
    /// Labels of the chosen options.
    #[serde(default, deserialize_with = "null_as_default")]
    pub labels: Vec<String>,
    /// Free text entered for the "other" option.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other: Option<String>,
}

/// A payment answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Payment {
    /// Amount charged, as a decimal string.
    pub amount: String,
    /// Last four digits of the card.
    pub last4: String,
    /// Card holder name.
    pub name: String,
    /// Whether the charge went through.
    pub success: bool,
}

/// Calculated values for a response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Calculated {
    /// Quiz score.
    pub score: i64,
}

/// A variable computed by form logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    /// Variable name.
    pub key: String,
    /// Either `number` or `text`.
    #[serde(rename = "type")]
    pub variable_type: String,
    /// Value of a `number` variable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<f64>,
    /// Value of a `text` variable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Treat an explicit `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Partial responses carry `0001-01-01T00:00:00Z` instead of omitting the field.
fn deserialize_submitted_at<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<DateTime<Utc>>::deserialize(deserializer)?;
    Ok(value.filter(|dt| dt.year() > 1))
}
