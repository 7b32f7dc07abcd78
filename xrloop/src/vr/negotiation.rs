//! System negotiation: view configuration, blend mode and per-view layout.
//!
//! Preferences that the runtime does not offer fall back to
//! `PrimaryStereo` / `Opaque` with a warning instead of failing startup.

use tracing::{info, warn};

use crate::error::{NegotiationError, Result};
use crate::vr::runtime::XrRuntime;
use crate::vr::types::{EnvironmentBlendMode, ViewConfigurationType, ViewConfigurationView};

pub const FALLBACK_VIEW_CONFIGURATION: ViewConfigurationType = ViewConfigurationType::PrimaryStereo;
pub const FALLBACK_BLEND_MODE: EnvironmentBlendMode = EnvironmentBlendMode::Opaque;

/// Application preferences, most preferred first.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemPreferences {
    pub view_configurations: Vec<ViewConfigurationType>,
    pub blend_modes: Vec<EnvironmentBlendMode>,
}

impl Default for SystemPreferences {
    fn default() -> Self {
        Self {
            view_configurations: vec![
                ViewConfigurationType::PrimaryStereo,
                ViewConfigurationType::PrimaryMono,
            ],
            blend_modes: vec![EnvironmentBlendMode::Opaque, EnvironmentBlendMode::Additive],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SystemSelection {
    pub view_configuration: ViewConfigurationType,
    pub blend_mode: EnvironmentBlendMode,
    pub views: Vec<ViewConfigurationView>,
}

/// First preferred entry that the runtime also offers.
fn first_offered<T: Copy + PartialEq>(preferred: &[T], offered: &[T]) -> Option<T> {
    preferred.iter().copied().find(|p| offered.contains(p))
}

pub fn select_view_configuration(
    preferred: &[ViewConfigurationType],
    offered: &[ViewConfigurationType],
) -> ViewConfigurationType {
    first_offered(preferred, offered).unwrap_or_else(|| {
        warn!(
            "XR: no preferred view configuration offered by runtime, falling back to {}",
            FALLBACK_VIEW_CONFIGURATION
        );
        FALLBACK_VIEW_CONFIGURATION
    })
}

pub fn select_blend_mode(
    preferred: &[EnvironmentBlendMode],
    offered: &[EnvironmentBlendMode],
) -> EnvironmentBlendMode {
    first_offered(preferred, offered).unwrap_or_else(|| {
        warn!(
            "XR: no preferred blend mode offered by runtime, falling back to {}",
            FALLBACK_BLEND_MODE.as_str()
        );
        FALLBACK_BLEND_MODE
    })
}

pub fn negotiate_system(
    runtime: &dyn XrRuntime,
    prefs: &SystemPreferences,
) -> Result<SystemSelection> {
    let offered = runtime.enumerate_view_configurations()?;
    let view_configuration = select_view_configuration(&prefs.view_configurations, &offered);

    let offered_modes = runtime.enumerate_environment_blend_modes(view_configuration)?;
    let blend_mode = select_blend_mode(&prefs.blend_modes, &offered_modes);

    let views = runtime.enumerate_view_configuration_views(view_configuration)?;
    if views.is_empty() {
        return Err(NegotiationError::NoViews(view_configuration).into());
    }

    info!(
        "XR: using {} with {} view(s), blend mode {}",
        view_configuration,
        views.len(),
        blend_mode.as_str()
    );
    Ok(SystemSelection {
        view_configuration,
        blend_mode,
        views,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{SimulatedRuntime, SimulatedRuntimeConfig};
    use crate::error::XrError;

    #[test]
    fn test_preferred_order_wins() {
        let picked = select_view_configuration(
            &[ViewConfigurationType::PrimaryMono, ViewConfigurationType::PrimaryStereo],
            &[ViewConfigurationType::PrimaryStereo, ViewConfigurationType::PrimaryMono],
        );
        assert_eq!(picked, ViewConfigurationType::PrimaryMono);
    }

    #[test]
    fn test_soft_fallback() {
        assert_eq!(
            select_view_configuration(&[ViewConfigurationType::PrimaryMono], &[]),
            ViewConfigurationType::PrimaryStereo
        );
        assert_eq!(
            select_blend_mode(
                &[EnvironmentBlendMode::AlphaBlend],
                &[EnvironmentBlendMode::Additive]
            ),
            EnvironmentBlendMode::Opaque
        );
    }

    #[test]
    fn test_negotiate_against_runtime() {
        let mut config = SimulatedRuntimeConfig::default();
        config.blend_modes = vec![EnvironmentBlendMode::Additive];
        let runtime = SimulatedRuntime::new(config);

        let sel = negotiate_system(&runtime, &SystemPreferences::default()).unwrap();
        assert_eq!(sel.view_configuration, ViewConfigurationType::PrimaryStereo);
        assert_eq!(sel.blend_mode, EnvironmentBlendMode::Additive);
        assert_eq!(sel.views.len(), 2);
    }

    #[test]
    fn test_no_views_is_error() {
        let mut config = SimulatedRuntimeConfig::default();
        config.views.clear();
        let runtime = SimulatedRuntime::new(config);

        let err = negotiate_system(&runtime, &SystemPreferences::default()).unwrap_err();
        assert!(matches!(
            err,
            XrError::Negotiation(NegotiationError::NoViews(ViewConfigurationType::PrimaryStereo))
        ));
    }
}
