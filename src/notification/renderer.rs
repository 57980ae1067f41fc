//! Turns push payloads into notifications ready for display.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::payload::{Category, NotificationAction, NotificationPayload, PushData};
use crate::config::NotificationConfig;

const TASK_VIBRATION: &[u32] = &[200, 100, 200];
const MESSAGE_VIBRATION: &[u32] = &[100, 50, 100];
const URGENT_VIBRATION: &[u32] = &[300, 100, 300, 100, 500];

impl Category {
  pub fn vibration(&self) -> &'static [u32] {
    match self {
      Category::Task | Category::Default => TASK_VIBRATION,
      Category::Message => MESSAGE_VIBRATION,
      Category::Urgent => URGENT_VIBRATION,
    }
  }

  /// Buttons shown when the payload does not bring its own.
  pub fn default_actions(&self, has_target: bool) -> Vec<NotificationAction> {
    match self {
      Category::Task => vec![
        NotificationAction::new("complete", "Complete"),
        NotificationAction::new("snooze", "Snooze"),
      ],
      Category::Message => vec![
        NotificationAction::new("reply", "Reply"),
        NotificationAction::new("dismiss", "Dismiss"),
      ],
      Category::Urgent => vec![
        NotificationAction::new("view", "View"),
        NotificationAction::new("acknowledge", "Acknowledge"),
      ],
      Category::Default if has_target => vec![
        NotificationAction::new("open", "Open"),
        NotificationAction::new("close", "Close"),
      ],
      Category::Default => Vec::new(),
    }
  }
}

/// Data carried with a notification and handed back on click.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
  pub url: String,
  #[serde(default)]
  pub id: Option<String>,
  #[serde(default)]
  pub category: Category,
}

/// Hosts echo this back on clicks, sometimes trimmed. Only `tag` and
/// `data.url` are needed to route a click.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedNotification {
  #[serde(default)]
  pub title: String,
  #[serde(default)]
  pub body: String,
  #[serde(default)]
  pub icon: String,
  #[serde(default)]
  pub badge: String,
  pub tag: String,
  #[serde(default)]
  pub renotify: bool,
  #[serde(default)]
  pub require_interaction: bool,
  #[serde(default)]
  pub vibrate: Vec<u32>,
  #[serde(default)]
  pub actions: Vec<NotificationAction>,
  pub data: NotificationData,
}

#[derive(Debug, Clone)]
pub struct Renderer {
  defaults: NotificationConfig,
}

impl Renderer {
  pub fn new(defaults: NotificationConfig) -> Self {
    Self { defaults }
  }

  /// Parse raw push data and render it. Malformed data renders with defaults.
  pub fn render_push(&self, data: Option<&Value>) -> RenderedNotification {
    let payload = NotificationPayload::from_push(PushData::parse_lossy(data), &self.defaults);
    self.render(&payload)
  }

  pub fn render(&self, payload: &NotificationPayload) -> RenderedNotification {
    let actions = if payload.explicit_actions.is_empty() {
      payload
        .category
        .default_actions(payload.target_url.is_some())
    } else {
      payload.explicit_actions.clone()
    };

    RenderedNotification {
      title: payload.title.clone(),
      body: payload.body.clone(),
      icon: payload.icon.clone(),
      badge: payload.badge.clone(),
      tag: payload.dedup_tag.clone(),
      // Repeats with the same tag replace the old notification and still alert.
      renotify: true,
      require_interaction: payload.category == Category::Urgent,
      vibrate: payload.category.vibration().to_vec(),
      actions,
      data: NotificationData {
        url: payload
          .target_url
          .clone()
          .unwrap_or_else(|| self.defaults.default_url.clone()),
        id: payload.correlation_id.clone(),
        category: payload.category,
      },
    }
  }

  /// The follow-up shown when a notification is snoozed.
  pub fn snoozed(&self, original: &RenderedNotification) -> RenderedNotification {
    RenderedNotification {
      title: format!("{} (Snoozed)", original.title),
      body: original.body.clone(),
      icon: original.icon.clone(),
      badge: original.badge.clone(),
      tag: format!("{}-snoozed", original.tag),
      renotify: true,
      require_interaction: false,
      vibrate: TASK_VIBRATION.to_vec(),
      actions: vec![
        NotificationAction::new("complete", "Complete"),
        NotificationAction::new("dismiss", "Dismiss"),
      ],
      data: original.data.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn render(data: Value) -> RenderedNotification {
    Renderer::new(NotificationConfig::default()).render_push(Some(&data))
  }

  fn action_ids(n: &RenderedNotification) -> Vec<&str> {
    n.actions.iter().map(|a| a.action.as_str()).collect()
  }

  #[test]
  fn test_task_payload() {
    let n = render(json!({"type": "task", "url": "/dashboard/tasks/5"}));
    assert_eq!(n.vibrate, vec![200, 100, 200]);
    assert_eq!(action_ids(&n), vec!["complete", "snooze"]);
    assert!(!n.require_interaction);
    assert_eq!(n.data.url, "/dashboard/tasks/5");
  }

  #[test]
  fn test_urgent_payload_requires_interaction() {
    let n = render(json!({"type": "urgent"}));
    assert!(n.require_interaction);
    assert_eq!(n.vibrate, vec![300, 100, 300, 100, 500]);
    assert_eq!(action_ids(&n), vec!["view", "acknowledge"]);
  }

  #[test]
  fn test_urgent_flag_alone_does_not_require_interaction() {
    let n = render(json!({"type": "message", "urgent": true}));
    assert!(!n.require_interaction);
    assert_eq!(n.vibrate, vec![100, 50, 100]);
    assert_eq!(action_ids(&n), vec!["reply", "dismiss"]);
  }

  #[test]
  fn test_default_actions_depend_on_target_url() {
    let with_url = render(json!({"url": "/stock"}));
    assert_eq!(action_ids(&with_url), vec!["open", "close"]);
    assert_eq!(with_url.vibrate, vec![200, 100, 200]);

    let without_url = render(json!({"title": "FYI"}));
    assert!(without_url.actions.is_empty());
    assert_eq!(without_url.data.url, "/");
  }

  #[test]
  fn test_explicit_actions_override_category() {
    let n = render(json!({
      "type": "task",
      "actions": [{"action": "approve", "title": "Approve"}]
    }));
    assert_eq!(action_ids(&n), vec!["approve"]);

    let empty = render(json!({"type": "task", "actions": []}));
    assert_eq!(action_ids(&empty), vec!["complete", "snooze"]);
  }

  #[test]
  fn test_tag_and_renotify() {
    let n = render(json!({"tag": "rota-7"}));
    assert_eq!(n.tag, "rota-7");
    assert!(n.renotify);

    let n = render(json!({}));
    assert_eq!(n.tag, "notification");
    assert!(n.renotify);
  }

  #[test]
  fn test_missing_payload_renders_defaults() {
    let defaults = NotificationConfig::default();
    let n = Renderer::new(defaults.clone()).render_push(None);
    assert_eq!(n.title, defaults.default_title);
    assert_eq!(n.body, defaults.default_body);
    assert_eq!(n.icon, defaults.default_icon);
  }

  #[test]
  fn test_snoozed_rendering() {
    let renderer = Renderer::new(NotificationConfig::default());
    let original = render(json!({
      "title": "Check fridge temps",
      "body": "Due at 9:00",
      "type": "urgent",
      "tag": "temps"
    }));

    let snoozed = renderer.snoozed(&original);
    assert_eq!(snoozed.title, "Check fridge temps (Snoozed)");
    assert_eq!(snoozed.body, original.body);
    assert_eq!(snoozed.icon, original.icon);
    assert_eq!(snoozed.tag, "temps-snoozed");
    assert_eq!(snoozed.vibrate, vec![200, 100, 200]);
    assert_eq!(action_ids(&snoozed), vec!["complete", "dismiss"]);
    assert_eq!(snoozed.data, original.data);
  }

  #[test]
  fn test_serializes_with_camel_case_fields() {
    let n = render(json!({"type": "urgent"}));
    let value = serde_json::to_value(&n).unwrap();
    assert_eq!(value["requireInteraction"], json!(true));
    assert_eq!(value["data"]["category"], json!("urgent"));
  }
}
