//! Run context and the dotted-path accessor.
//!
//! A `RunContext` is the resolved requester/owner/property mapping supplied by
//! the context provider collaborator. Steps address it by dotted path
//! (`owner.fullName`, `property.registryNumber`). Lookup is explicit about
//! misses: `resolve*` return `None` and the call site decides whether a miss
//! is skippable (a `fill` step) or worth a warning (a required field).

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RunContext(Value);

impl RunContext {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Resolve a dotted path (`owner.fullName`) against the nested mapping.
    ///
    /// Returns `None` when any segment is missing or when traversal hits a
    /// non-object before the path is exhausted. Never panics, never mutates.
    pub fn resolve(&self, path: &str) -> Option<&Value> {
        let mut current = &self.0;
        for segment in path.split('.') {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Resolve a path to the string a form field should receive.
    ///
    /// Strings pass through; numbers and booleans are rendered; null, arrays
    /// and objects count as a miss (there is nothing sensible to type).
    pub fn resolve_str(&self, path: &str) -> Option<String> {
        match self.resolve(path)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn has(&self, path: &str) -> bool {
        self.resolve(path).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> RunContext {
        RunContext::new(json!({
            "requester": { "name": "Imobiliária Horizonte", "id": 311 },
            "owner": { "fullName": "Maria Santos", "cpf": "111.222.333-44" },
            "property": {
                "registryNumber": 48712,
                "city": "Rio de Janeiro",
                "address": { "street": "Rua do Ouvidor", "number": "77" }
            }
        }))
    }

    #[test]
    fn resolves_nested_paths() {
        let ctx = sample();
        assert_eq!(
            ctx.resolve_str("owner.fullName").as_deref(),
            Some("Maria Santos")
        );
        assert_eq!(
            ctx.resolve_str("property.address.street").as_deref(),
            Some("Rua do Ouvidor")
        );
    }

    #[test]
    fn numbers_render_as_typed_text() {
        let ctx = sample();
        assert_eq!(
            ctx.resolve_str("property.registryNumber").as_deref(),
            Some("48712")
        );
    }

    #[test]
    fn missing_segment_is_a_clean_miss() {
        let ctx = sample();
        assert!(ctx.resolve("owner.rg").is_none());
        assert!(ctx.resolve("buyer.fullName").is_none());
        assert!(!ctx.has("property.address.zip"));
    }

    #[test]
    fn traversal_through_a_leaf_is_a_miss_not_a_panic() {
        let ctx = sample();
        assert!(ctx.resolve("owner.fullName.first").is_none());
    }

    #[test]
    fn container_values_do_not_fill_fields() {
        let ctx = sample();
        assert!(ctx.resolve_str("property.address").is_none());
    }
}
