use std::{collections::HashSet, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{events::Timestamp, triggers::Trigger, Error};

/// Remote configuration document. This is the response format from the config endpoint.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// When the configuration was built.
    #[serde(default)]
    pub built_at: Option<Timestamp>,
    /// Triggers declared for this application.
    ///
    /// Values are wrapped in `TryParse` so that if we fail to parse one trigger (e.g., new server
    /// format), we can still serve the others.
    pub triggers: Vec<TryParse<Trigger>>,
    /// Preloading opt-outs by campaign/event identifier.
    #[serde(default)]
    pub preloading_disabled: PreloadingDisabled,
}

impl Config {
    /// Iterate over the triggers that parsed successfully.
    pub fn valid_triggers(&self) -> impl Iterator<Item = &Trigger> {
        self.triggers.iter().filter_map(Option::<&Trigger>::from)
    }
}

/// Preloading opt-outs delivered with the configuration.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PreloadingDisabled {
    /// Disable preloading entirely.
    #[serde(default)]
    pub all: bool,
    /// Campaign/event identifiers whose triggers must not preload.
    #[serde(default)]
    pub triggers: HashSet<String>,
}

/// `TryParse` allows the subfield to fail parsing without failing the parsing of the whole
/// structure.
///
/// This can be helpful to isolate errors in a subtree. e.g., if configuration for one trigger
/// parses, the rest of the triggers are still usable.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum TryParse<T> {
    /// Successfully parsed.
    Parsed(T),
    /// Parsing failed.
    ParseFailed(serde_json::Value),
}
impl<T> From<TryParse<T>> for Option<T> {
    fn from(value: TryParse<T>) -> Self {
        match value {
            TryParse::Parsed(v) => Some(v),
            TryParse::ParseFailed(_) => None,
        }
    }
}
impl<'a, T> From<&'a TryParse<T>> for Option<&'a T> {
    fn from(value: &TryParse<T>) -> Option<&T> {
        match value {
            TryParse::Parsed(v) => Some(v),
            TryParse::ParseFailed(_) => None,
        }
    }
}

/// Process-wide configuration fetch state. Transitions only forward, except
/// `Retrieving ⇄ Retrying` while the config client backs off between attempts.
#[derive(Debug, Clone, Default)]
pub enum ConfigState {
    /// Initial fetch in progress.
    #[default]
    Retrieving,
    /// A fetch attempt failed; the client is backing off before retrying.
    Retrying,
    /// Configuration is available.
    Retrieved(Arc<Config>),
    /// All fetch attempts are exhausted. Presentation is blocked until a later fetch succeeds.
    Failed(Error),
}

impl ConfigState {
    /// The configuration, if it has been retrieved.
    pub fn config(&self) -> Option<&Arc<Config>> {
        match self {
            ConfigState::Retrieved(config) => Some(config),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_partially_if_unexpected() {
        let config: Config = serde_json::from_str(
            r#"
              {
                "triggers": [
                  {
                    "eventName": "campaign_trigger",
                    "rules": [
                      {
                        "experimentId": "exp-1",
                        "experimentGroupId": "campaign-1",
                        "variants": [
                          {"variantType": "TREATMENT", "id": "v1", "percentage": 100, "paywallId": "pw-1"}
                        ]
                      }
                    ]
                  },
                  {
                    "eventName": "broken_trigger",
                    "rules": "not-a-list"
                  }
                ]
              }
            "#,
        )
        .unwrap();

        assert_eq!(config.triggers.len(), 2);
        assert!(matches!(config.triggers[0], TryParse::Parsed(_)));
        assert!(matches!(config.triggers[1], TryParse::ParseFailed(_)));
        assert_eq!(config.valid_triggers().count(), 1);
        assert!(!config.preloading_disabled.all);
    }
}
