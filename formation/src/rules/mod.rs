use serde_json::Value;
use std::collections::HashMap;

/// Request identity handed to authorization predicates: either an
/// admin, an authenticated record, or anonymous.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    pub admin: bool,
    pub record_id: Option<String>,
}

impl AuthContext {
    pub fn admin() -> Self {
        AuthContext {
            admin: true,
            record_id: None,
        }
    }

    pub fn record(id: impl Into<String>) -> Self {
        AuthContext {
            admin: false,
            record_id: Some(id.into()),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.admin || self.record_id.is_some()
    }
}

/// An authorization predicate for record creation in one collection.
pub type RulePredicate =
    Box<dyn Fn(&AuthContext, &serde_json::Map<String, Value>) -> bool + Send + Sync>;

/// Capability lookup keyed by collection name. Collections register
/// their create predicate instead of extending a central conditional;
/// unregistered collections fall back to allow-all.
#[derive(Default)]
pub struct RuleRegistry {
    rules: HashMap<String, RulePredicate>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the create predicate for a collection, replacing any
    /// previous registration.
    pub fn register<F>(&mut self, collection: impl Into<String>, predicate: F)
    where
        F: Fn(&AuthContext, &serde_json::Map<String, Value>) -> bool + Send + Sync + 'static,
    {
        self.rules.insert(collection.into(), Box::new(predicate));
    }

    /// Whether the given identity may create a record with these values.
    pub fn check_create(
        &self,
        collection: &str,
        ctx: &AuthContext,
        values: &serde_json::Map<String, Value>,
    ) -> bool {
        match self.rules.get(collection) {
            Some(predicate) => predicate(ctx, values),
            None => true,
        }
    }

    /// Predicate allowing only admins, the original posts-creation
    /// policy.
    pub fn admin_only() -> RulePredicate {
        Box::new(|ctx, _| ctx.admin)
    }

    /// Predicate allowing any authenticated identity.
    pub fn authenticated() -> RulePredicate {
        Box::new(|ctx, _| ctx.is_authenticated())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn values(v: Value) -> serde_json::Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn test_unregistered_collection_allows_all() {
        let registry = RuleRegistry::new();
        assert!(registry.check_create("projects", &AuthContext::default(), &values(json!({}))));
    }

    #[test]
    fn test_admin_only_rule() {
        let mut registry = RuleRegistry::new();
        registry.register("posts", |ctx, _| ctx.admin);

        assert!(registry.check_create("posts", &AuthContext::admin(), &values(json!({}))));
        assert!(!registry.check_create("posts", &AuthContext::record("u1"), &values(json!({}))));
        assert!(!registry.check_create("posts", &AuthContext::default(), &values(json!({}))));
        // Other collections are unaffected.
        assert!(registry.check_create("projects", &AuthContext::default(), &values(json!({}))));
    }

    #[test]
    fn test_value_dependent_rule() {
        let mut registry = RuleRegistry::new();
        registry.register("posts", |ctx, values| {
            ctx.admin || values.get("type") == Some(&json!("Comment"))
        });

        assert!(registry.check_create(
            "posts",
            &AuthContext::record("u1"),
            &values(json!({ "type": "Comment" }))
        ));
        assert!(!registry.check_create(
            "posts",
            &AuthContext::record("u1"),
            &values(json!({ "type": "Standalone" }))
        ));
    }

    #[test]
    fn test_builtin_predicates() {
        let admin_only = RuleRegistry::admin_only();
        assert!(admin_only(&AuthContext::admin(), &values(json!({}))));
        assert!(!admin_only(&AuthContext::record("u1"), &values(json!({}))));

        let authenticated = RuleRegistry::authenticated();
        assert!(authenticated(&AuthContext::record("u1"), &values(json!({}))));
        assert!(!authenticated(&AuthContext::default(), &values(json!({}))));
    }

    #[test]
    fn test_registration_replaces_previous() {
        let mut registry = RuleRegistry::new();
        registry.register("posts", |_, _| false);
        registry.register("posts", |_, _| true);
        assert!(registry.check_create("posts", &AuthContext::default(), &values(json!({}))));
    }
}
