use serde::{Deserialize, Serialize};

/// Runtime knobs of the scope and window manager.
///
/// Lives under the `scopekit:` section of the application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct ScopeKitConfig {
    /// Maximum number of back entries a navigator keeps; oldest are disposed.
    pub navigation_history_limit: Option<usize>,
    /// Forward recorded window errors to `WindowFactory::show_error`.
    pub show_error_notifications: bool,
    /// Auto-save flag for session builders created from the manager.
    pub default_auto_save: bool,
    /// Open child windows against the root scope when the parent is gone.
    pub fallback_to_root_on_missing_parent: bool,
}

impl Default for ScopeKitConfig {
    fn default() -> Self {
        Self {
            navigation_history_limit: None,
            show_error_notifications: true,
            default_auto_save: false,
            fallback_to_root_on_missing_parent: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let cfg: ScopeKitConfig =
            serde_json::from_str(r#"{ "navigation_history_limit": 5 }"#).unwrap();
        assert_eq!(cfg.navigation_history_limit, Some(5));
        assert!(cfg.show_error_notifications);
        assert!(cfg.fallback_to_root_on_missing_parent);
        assert!(!cfg.default_auto_save);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = serde_json::from_str::<ScopeKitConfig>(r#"{ "bogus": true }"#).unwrap_err();
        assert!(err.to_string().contains("unknown field"));
    }
}
