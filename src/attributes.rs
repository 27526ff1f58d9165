use crate::{events::EventData, Result};

/// Attribute tree that rule expressions are evaluated against.
///
/// Top-level keys are namespaces (`user`, `device`, `params`); values are arbitrary JSON, so
/// dot-path lookups like `user.id` can descend into nested objects.
///
/// # Examples
/// ```
/// # use paywall_core::RuleAttributes;
/// let attributes: RuleAttributes = serde_json::json!({
///     "user": { "id": "123", "email": "test@example.com" },
/// })
/// .as_object()
/// .unwrap()
/// .clone();
/// ```
pub type RuleAttributes = serde_json::Map<String, serde_json::Value>;

/// Assembles the attribute tree for rule evaluation.
///
/// Implemented by the host SDK, which owns user/device attribute collection. The `params`
/// namespace is filled in by the evaluator from the event itself.
pub trait AttributesFactory: Send + Sync {
    /// Build the user/device attribute namespaces for the given event.
    fn make_rule_attributes(&self, event: Option<&EventData>) -> Result<RuleAttributes>;
}

impl<T: Fn(Option<&EventData>) -> Result<RuleAttributes> + Send + Sync> AttributesFactory for T {
    fn make_rule_attributes(&self, event: Option<&EventData>) -> Result<RuleAttributes> {
        self(event)
    }
}

/// Resolve a dot-path like `user.id` against the attribute tree.
///
/// Returns `None` if any path segment is missing or a non-object is indexed. Unknown paths are a
/// normal condition, never an error.
pub fn lookup_path<'a>(
    attributes: &'a RuleAttributes,
    path: &str,
) -> Option<&'a serde_json::Value> {
    let mut segments = path.split('.');
    let mut value = attributes.get(segments.next()?)?;
    for segment in segments {
        value = value.as_object()?.get(segment)?;
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::lookup_path;

    fn attributes() -> super::RuleAttributes {
        json!({
            "user": { "id": "123", "plan": { "tier": "pro" } },
            "device": { "os": "android" },
        })
        .as_object()
        .unwrap()
        .clone()
    }

    #[test]
    fn resolves_nested_paths() {
        let attributes = attributes();
        assert_eq!(lookup_path(&attributes, "user.id"), Some(&json!("123")));
        assert_eq!(
            lookup_path(&attributes, "user.plan.tier"),
            Some(&json!("pro"))
        );
        assert_eq!(lookup_path(&attributes, "device.os"), Some(&json!("android")));
    }

    #[test]
    fn unknown_path_is_absent() {
        let attributes = attributes();
        assert_eq!(lookup_path(&attributes, "user.name"), None);
        assert_eq!(lookup_path(&attributes, "session.id"), None);
        // Indexing into a leaf is absent, not an error.
        assert_eq!(lookup_path(&attributes, "user.id.inner"), None);
    }
}
