//! Rich-presence activity payload and null pruning.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Start/end timestamps (unix seconds).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Timestamps {
    /// Activity start.
    pub start: Option<i64>,
    /// Activity end.
    pub end: Option<i64>,
}

/// Image keys and hover texts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Assets {
    /// Large image key.
    pub large_image: Option<String>,
    /// Large image hover text.
    pub large_text: Option<String>,
    /// Small image key.
    pub small_image: Option<String>,
    /// Small image hover text.
    pub small_text: Option<String>,
}

/// Party identity and `[current, max]` size.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Party {
    /// Party id.
    pub id: Option<String>,
    /// `[current, max]`.
    pub size: Option<[u32; 2]>,
}

/// Join/spectate/match secrets.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Secrets {
    /// Join secret.
    pub join: Option<String>,
    /// Spectate secret.
    pub spectate: Option<String>,
    /// Match secret.
    pub r#match: Option<String>,
}

/// Structured presence shown by the remote application.
///
/// Every field is optional. [`Activity::to_payload`] serializes the full
/// nested shape and then prunes it, so unset fields and sub-objects that end
/// up empty never reach the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Activity {
    /// Second line of the presence.
    pub state: Option<String>,
    /// First line of the presence.
    pub details: Option<String>,
    /// Elapsed/remaining timer.
    pub timestamps: Timestamps,
    /// Images.
    pub assets: Assets,
    /// Party info.
    pub party: Party,
    /// Secrets for join/spectate.
    pub secrets: Secrets,
    /// Whether the activity is an instanced session.
    pub instance: Option<bool>,
}

impl Default for Activity {
    fn default() -> Self {
        Self {
            state: None,
            details: None,
            timestamps: Timestamps::default(),
            assets: Assets::default(),
            party: Party::default(),
            secrets: Secrets::default(),
            instance: Some(true),
        }
    }
}

impl Activity {
    /// Empty activity with `instance = true`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the `state` line.
    #[must_use]
    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    /// Set the `details` line.
    #[must_use]
    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Set start and/or end timestamps.
    #[must_use]
    pub fn timestamps(mut self, start: Option<i64>, end: Option<i64>) -> Self {
        self.timestamps = Timestamps { start, end };
        self
    }

    /// Set the large image key and optional hover text.
    #[must_use]
    pub fn large_image(mut self, key: impl Into<String>, text: Option<String>) -> Self {
        self.assets.large_image = Some(key.into());
        self.assets.large_text = text;
        self
    }

    /// Set the small image key and optional hover text.
    #[must_use]
    pub fn small_image(mut self, key: impl Into<String>, text: Option<String>) -> Self {
        self.assets.small_image = Some(key.into());
        self.assets.small_text = text;
        self
    }

    /// Set party id and size.
    #[must_use]
    pub fn party(mut self, id: Option<String>, size: Option<[u32; 2]>) -> Self {
        self.party = Party { id, size };
        self
    }

    /// Set the secrets block.
    #[must_use]
    pub fn secrets(mut self, secrets: Secrets) -> Self {
        self.secrets = secrets;
        self
    }

    /// Override the `instance` flag; `None` omits it.
    #[must_use]
    pub fn instance(mut self, instance: Option<bool>) -> Self {
        self.instance = instance;
        self
    }

    /// Serialize to the pruned JSON object sent as `args.activity`.
    #[must_use]
    pub fn to_payload(&self) -> Value {
        // Plain structs of options and strings always serialize.
        let raw = serde_json::to_value(self).unwrap_or(Value::Object(Map::new()));
        prune(raw)
    }
}

/// Recursively drop `null` values, then drop objects left empty.
///
/// Applied depth-first: children are pruned before their parent decides
/// whether it became empty. The top-level value itself is never removed, so
/// an object that prunes away entirely comes back as `{}`. Arrays and scalars
/// pass through unchanged.
#[must_use]
pub fn prune(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(prune_map(map)),
        other => other,
    }
}

fn prune_map(map: Map<String, Value>) -> Map<String, Value> {
    map.into_iter()
        .filter_map(|(key, value)| match value {
            Value::Null => None,
            Value::Object(inner) => {
                let inner = prune_map(inner);
                if inner.is_empty() {
                    None
                } else {
                    Some((key, Value::Object(inner)))
                }
            }
            other => Some((key, other)),
        })
        .collect()
}
