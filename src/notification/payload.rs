//! Inbound push payloads.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::config::NotificationConfig;
use crate::error::AgentError;

/// Tag used when a payload carries neither `tag` nor `id`.
pub const DEFAULT_TAG: &str = "notification";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
  Task,
  Message,
  Urgent,
  #[default]
  Default,
}

impl Category {
  /// Map the payload's free-form `type` field. Unknown types are `Default`.
  pub fn from_type(kind: Option<&str>) -> Self {
    match kind {
      Some(k) if k.eq_ignore_ascii_case("task") => Category::Task,
      Some(k) if k.eq_ignore_ascii_case("message") => Category::Message,
      Some(k) if k.eq_ignore_ascii_case("urgent") => Category::Urgent,
      _ => Category::Default,
    }
  }
}

/// A button on a rendered notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
  pub action: String,
  /// Empty titles are replaced with the action id when rendered
  #[serde(default)]
  pub title: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub icon: Option<String>,
}

impl NotificationAction {
  pub fn new(action: &str, title: &str) -> Self {
    Self {
      action: action.to_string(),
      title: title.to_string(),
      icon: None,
    }
  }
}

/// Push message as delivered, every field optional.
///
/// Each field is read on its own: a field of the wrong type is dropped
/// without discarding the rest of the payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushData {
  #[serde(default, deserialize_with = "lenient")]
  pub title: Option<String>,
  #[serde(default, deserialize_with = "lenient")]
  pub body: Option<String>,
  #[serde(default, deserialize_with = "lenient")]
  pub message: Option<String>,
  #[serde(rename = "type", default, deserialize_with = "lenient")]
  pub kind: Option<String>,
  #[serde(default, deserialize_with = "lenient")]
  pub url: Option<String>,
  /// Strings and numbers both show up here
  #[serde(default)]
  pub id: Option<Value>,
  #[serde(default, deserialize_with = "lenient")]
  pub tag: Option<String>,
  #[serde(default, deserialize_with = "lenient")]
  pub icon: Option<String>,
  #[serde(default, deserialize_with = "lenient")]
  pub badge: Option<String>,
  #[serde(default, deserialize_with = "lenient_actions")]
  pub actions: Option<Vec<NotificationAction>>,
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
  D: Deserializer<'de>,
  T: DeserializeOwned,
{
  let value = Value::deserialize(deserializer)?;
  Ok(serde_json::from_value(value).ok())
}

/// Keep the well-formed actions of a list, skipping the rest.
fn lenient_actions<'de, D>(deserializer: D) -> Result<Option<Vec<NotificationAction>>, D::Error>
where
  D: Deserializer<'de>,
{
  match Value::deserialize(deserializer)? {
    Value::Array(items) => Ok(Some(
      items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<NotificationAction>(item).ok())
        .filter(|a| !a.action.is_empty())
        .collect(),
    )),
    _ => Ok(None),
  }
}

impl PushData {
  /// Parse push data that arrived either as JSON text or as a JSON object.
  pub fn parse(data: Option<&Value>) -> Result<Self, AgentError> {
    match data {
      None | Some(Value::Null) => Ok(Self::default()),
      Some(Value::String(text)) if text.trim().is_empty() => Ok(Self::default()),
      Some(Value::String(text)) => {
        serde_json::from_str(text).map_err(|e| AgentError::PayloadParseFailure(e.to_string()))
      }
      Some(value @ Value::Object(_)) => serde_json::from_value(value.clone())
        .map_err(|e| AgentError::PayloadParseFailure(e.to_string())),
      Some(other) => Err(AgentError::PayloadParseFailure(format!(
        "expected an object, got {}",
        other
      ))),
    }
  }

  /// Like [`PushData::parse`], but malformed data degrades to an empty payload.
  pub fn parse_lossy(data: Option<&Value>) -> Self {
    Self::parse(data).unwrap_or_else(|e| {
      warn!(error = %e, "rendering push with defaults");
      Self::default()
    })
  }
}

/// A push payload with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationPayload {
  pub title: String,
  pub body: String,
  pub category: Category,
  pub target_url: Option<String>,
  pub correlation_id: Option<String>,
  pub dedup_tag: String,
  pub icon: String,
  pub badge: String,
  pub explicit_actions: Vec<NotificationAction>,
}

impl NotificationPayload {
  pub fn from_push(data: PushData, defaults: &NotificationConfig) -> Self {
    let correlation_id = data.id.and_then(|id| match id {
      Value::String(s) => Some(s),
      Value::Null => None,
      other => Some(other.to_string()),
    });
    let dedup_tag = data
      .tag
      .filter(|t| !t.is_empty())
      .or_else(|| correlation_id.clone())
      .unwrap_or_else(|| DEFAULT_TAG.to_string());

    Self {
      title: non_empty(data.title).unwrap_or_else(|| defaults.default_title.clone()),
      body: non_empty(data.body)
        .or_else(|| non_empty(data.message))
        .unwrap_or_else(|| defaults.default_body.clone()),
      category: Category::from_type(data.kind.as_deref()),
      target_url: non_empty(data.url),
      correlation_id,
      dedup_tag,
      icon: non_empty(data.icon).unwrap_or_else(|| defaults.default_icon.clone()),
      badge: non_empty(data.badge).unwrap_or_else(|| defaults.default_badge.clone()),
      explicit_actions: data
        .actions
        .unwrap_or_default()
        .into_iter()
        .map(|mut a| {
          if a.title.trim().is_empty() {
            a.title = a.action.clone();
          }
          a
        })
        .collect(),
    }
  }
}

fn non_empty(value: Option<String>) -> Option<String> {
  value.filter(|v| !v.trim().is_empty())
}
