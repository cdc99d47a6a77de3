//! Presentation configuration for the video experience.
//!
//! Pure settings: the store has no knowledge of session state, and nothing in
//! the session layer reads it except [`JoinRequest::with_behavior`]. Partial
//! JSON updates are deep-merged onto the current value, validated, and then
//! swapped in atomically, so readers never see a half-applied update.
//!
//! [`JoinRequest::with_behavior`]: crate::engine::JoinRequest::with_behavior

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tracing::{debug, warn};

/// Maximum tiles the grid layout can render.
pub const MAX_VISIBLE_TILES: u32 = 49;

#[derive(Debug, Error)]
pub enum UiConfigError {
    #[error("Configuration patch must be a JSON object")]
    NotAnObject,

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] serde_json::Error),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutView {
    #[default]
    Grid,
    Speaker,
    Sidebar,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct BrandingConfig {
    pub company_name: String,
    pub logo_url: Option<String>,
    pub primary_color: String,
    pub accent_color: String,
    pub theme: Theme,
}

impl Default for BrandingConfig {
    fn default() -> Self {
        Self {
            company_name: "Video".to_string(),
            logo_url: None,
            primary_color: "#2563eb".to_string(),
            accent_color: "#10b981".to_string(),
            theme: Theme::System,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct LayoutConfig {
    pub default_view: LayoutView,
    pub max_visible_tiles: u32,
    pub show_self_view: bool,
    pub mirror_self_view: bool,
    pub show_names: bool,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            default_view: LayoutView::Grid,
            max_visible_tiles: 25,
            show_self_view: true,
            mirror_self_view: true,
            show_names: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct FeatureConfig {
    pub chat: bool,
    pub screen_share: bool,
    pub recording: bool,
    pub reactions: bool,
    pub participant_list: bool,
    pub background_blur: bool,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            chat: true,
            screen_share: true,
            recording: false,
            reactions: true,
            participant_list: true,
            background_blur: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct BehaviorConfig {
    pub start_audio_off: bool,
    pub start_video_off: bool,
    pub confirm_before_leave: bool,
    pub show_prejoin: bool,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            start_audio_off: false,
            start_video_off: false,
            confirm_before_leave: true,
            show_prejoin: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct ControlsConfig {
    pub show_microphone: bool,
    pub show_camera: bool,
    pub show_screen_share: bool,
    pub show_chat: bool,
    pub show_participants: bool,
    pub show_leave: bool,
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            show_microphone: true,
            show_camera: true,
            show_screen_share: true,
            show_chat: true,
            show_participants: true,
            show_leave: true,
        }
    }
}

/// Control bar buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Control {
    Microphone,
    Camera,
    ScreenShare,
    Chat,
    Participants,
    Leave,
}

/// Top-level configuration sections, for [`UiConfigStore::update_section`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSection {
    Branding,
    Layout,
    Features,
    Behavior,
    Controls,
}

impl ConfigSection {
    #[must_use]
    pub const fn key(&self) -> &'static str {
        match self {
            ConfigSection::Branding => "branding",
            ConfigSection::Layout => "layout",
            ConfigSection::Features => "features",
            ConfigSection::Behavior => "behavior",
            ConfigSection::Controls => "controls",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct VideoUiConfig {
    pub branding: BrandingConfig,
    pub layout: LayoutConfig,
    pub features: FeatureConfig,
    pub behavior: BehaviorConfig,
    pub controls: ControlsConfig,
}

impl VideoUiConfig {
    /// Check cross-field and format constraints.
    ///
    /// # Errors
    ///
    /// `UiConfigError::InvalidValue` naming the first offending field.
    pub fn validate(&self) -> Result<(), UiConfigError> {
        validate_color("branding.primaryColor", &self.branding.primary_color)?;
        validate_color("branding.accentColor", &self.branding.accent_color)?;

        if self.layout.max_visible_tiles == 0 || self.layout.max_visible_tiles > MAX_VISIBLE_TILES {
            return Err(UiConfigError::InvalidValue {
                field: "layout.maxVisibleTiles",
                reason: format!("must be between 1 and {MAX_VISIBLE_TILES}"),
            });
        }
        if self.branding.company_name.trim().is_empty() {
            return Err(UiConfigError::InvalidValue {
                field: "branding.companyName",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Controls to render: shown in `controls` and backed by an enabled feature.
    #[must_use]
    pub fn visible_controls(&self) -> Vec<Control> {
        let c = &self.controls;
        let f = &self.features;
        [
            (Control::Microphone, c.show_microphone),
            (Control::Camera, c.show_camera),
            (Control::ScreenShare, c.show_screen_share && f.screen_share),
            (Control::Chat, c.show_chat && f.chat),
            (Control::Participants, c.show_participants && f.participant_list),
            (Control::Leave, c.show_leave),
        ]
        .into_iter()
        .filter_map(|(control, visible)| visible.then_some(control))
        .collect()
    }
}

fn validate_color(field: &'static str, value: &str) -> Result<(), UiConfigError> {
    let hex = value.strip_prefix('#').unwrap_or("");
    let valid = matches!(hex.len(), 3 | 6) && hex.chars().all(|c| c.is_ascii_hexdigit());
    if valid {
        Ok(())
    } else {
        Err(UiConfigError::InvalidValue {
            field,
            reason: format!("'{value}' is not a #rgb or #rrggbb color"),
        })
    }
}

/// Merge `patch` into `base`. Objects merge key by key; anything else replaces.
fn deep_merge(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            for (key, value) in patch {
                match base.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        deep_merge(existing, value);
                    }
                    _ => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}

/// Holds the active configuration.
#[derive(Debug, Default)]
pub struct UiConfigStore {
    current: RwLock<Arc<VideoUiConfig>>,
}

impl UiConfigStore {
    /// A store holding the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store holding the defaults with `overrides` deep-merged on top.
    ///
    /// # Errors
    ///
    /// Same as [`UiConfigStore::merge`].
    pub fn with_overrides(overrides: &Value) -> Result<Self, UiConfigError> {
        let store = Self::new();
        store.merge(overrides)?;
        Ok(store)
    }

    /// The active configuration.
    #[must_use]
    pub fn current(&self) -> Arc<VideoUiConfig> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    #[must_use]
    pub fn branding(&self) -> BrandingConfig {
        self.current().branding.clone()
    }

    #[must_use]
    pub fn layout(&self) -> LayoutConfig {
        self.current().layout.clone()
    }

    #[must_use]
    pub fn features(&self) -> FeatureConfig {
        self.current().features.clone()
    }

    #[must_use]
    pub fn behavior(&self) -> BehaviorConfig {
        self.current().behavior.clone()
    }

    #[must_use]
    pub fn controls(&self) -> ControlsConfig {
        self.current().controls.clone()
    }

    /// Deep-merge a partial JSON object onto the active configuration.
    ///
    /// Returns the new configuration. On error nothing changes.
    ///
    /// # Errors
    ///
    /// `NotAnObject` for non-object patches, `Invalid` for unknown keys or
    /// mistyped values, `InvalidValue` when validation fails.
    pub fn merge(&self, patch: &Value) -> Result<Arc<VideoUiConfig>, UiConfigError> {
        if !patch.is_object() {
            return Err(UiConfigError::NotAnObject);
        }

        let mut guard = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let mut merged = serde_json::to_value(guard.as_ref())?;
        deep_merge(&mut merged, patch);
        let next: VideoUiConfig = serde_json::from_value(merged).map_err(|e| {
            warn!(target: "vs.config", error = %e, "Rejected UI configuration patch");
            UiConfigError::Invalid(e)
        })?;
        if let Err(e) = next.validate() {
            warn!(target: "vs.config", error = %e, "Rejected UI configuration patch");
            return Err(e);
        }

        let next = Arc::new(next);
        *guard = Arc::clone(&next);
        debug!(target: "vs.config", "UI configuration updated");
        Ok(next)
    }

    /// Deep-merge `patch` into a single section.
    ///
    /// # Errors
    ///
    /// Same as [`UiConfigStore::merge`].
    pub fn update_section(
        &self,
        section: ConfigSection,
        patch: &Value,
    ) -> Result<Arc<VideoUiConfig>, UiConfigError> {
        if !patch.is_object() {
            return Err(UiConfigError::NotAnObject);
        }
        let mut wrapped = serde_json::Map::new();
        wrapped.insert(section.key().to_string(), patch.clone());
        self.merge(&Value::Object(wrapped))
    }

    /// Restore defaults.
    pub fn reset(&self) {
        *self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(VideoUiConfig::default());
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_are_valid() {
        VideoUiConfig::default().validate().unwrap();
    }

    #[test]
    fn test_deep_merge_keeps_untouched_fields() {
        let store = UiConfigStore::new();
        store
            .merge(&json!({"branding": {"companyName": "Acme"}}))
            .unwrap();

        let branding = store.branding();
        assert_eq!(branding.company_name, "Acme");
        assert_eq!(branding.primary_color, "#2563eb");
        assert_eq!(store.layout(), LayoutConfig::default());
    }

    #[test]
    fn test_update_section() {
        let store = UiConfigStore::new();
        store
            .update_section(ConfigSection::Behavior, &json!({"startAudioOff": true}))
            .unwrap();
        let behavior = store.behavior();
        assert!(behavior.start_audio_off);
        assert!(!behavior.start_video_off);
        assert!(behavior.confirm_before_leave);
    }

    #[test]
    fn test_invalid_patch_leaves_config_untouched() {
        let store = UiConfigStore::with_overrides(&json!({"layout": {"maxVisibleTiles": 9}})).unwrap();
        let before = store.current();

        assert!(matches!(
            store.merge(&json!({"layout": {"maxVisibleTiles": 0}})),
            Err(UiConfigError::InvalidValue { field: "layout.maxVisibleTiles", .. })
        ));
        assert!(matches!(
            store.merge(&json!({"branding": {"primaryColor": "blue"}})),
            Err(UiConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            store.merge(&json!({"layout": {"nope": 1}})),
            Err(UiConfigError::Invalid(_))
        ));
        assert!(matches!(
            store.merge(&json!({"features": {"chat": "yes"}})),
            Err(UiConfigError::Invalid(_))
        ));
        assert!(matches!(store.merge(&json!([1, 2])), Err(UiConfigError::NotAnObject)));

        assert!(Arc::ptr_eq(&before, &store.current()));
    }

    #[test]
    fn test_null_clears_optional_field() {
        let store =
            UiConfigStore::with_overrides(&json!({"branding": {"logoUrl": "https://x/logo.png"}}))
                .unwrap();
        assert!(store.branding().logo_url.is_some());
        store.merge(&json!({"branding": {"logoUrl": null}})).unwrap();
        assert!(store.branding().logo_url.is_none());
    }

    #[test]
    fn test_reset_restores_defaults() {
        let store = UiConfigStore::with_overrides(&json!({"branding": {"theme": "dark"}})).unwrap();
        assert_eq!(store.branding().theme, Theme::Dark);
        store.reset();
        assert_eq!(*store.current(), VideoUiConfig::default());
    }

    #[test]
    fn test_visible_controls_follow_features() {
        let store = UiConfigStore::with_overrides(&json!({
            "features": {"chat": false},
            "controls": {"showCamera": false}
        }))
        .unwrap();
        let visible = store.current().visible_controls();
        assert!(!visible.contains(&Control::Chat));
        assert!(!visible.contains(&Control::Camera));
        assert!(visible.contains(&Control::Microphone));
        assert!(visible.contains(&Control::Leave));
    }

    #[test]
    fn test_short_hex_color_accepted() {
        let store = UiConfigStore::new();
        store
            .merge(&json!({"branding": {"accentColor": "#0f0"}}))
            .unwrap();
    }
}
