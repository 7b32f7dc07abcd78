//! The reference space poses are resolved against.
//!
//! One space per session, created with an identity offset. A runtime
//! change-pending notice only marks it; the actual destroy (and optional
//! recreate) happens between frames in [`ReferenceSpaceTracker::refresh_if_pending`].

use tracing::{debug, info, warn};

use crate::error::{Result, XrError};
use crate::vr::runtime::XrRuntime;
use crate::vr::types::{
    LocatedView, Pose, ReferenceSpaceType, SpaceHandle, ViewConfigurationType, ViewStateFlags,
    XrTime,
};

const POSE_VALID: ViewStateFlags =
    ViewStateFlags::ORIENTATION_VALID.union(ViewStateFlags::POSITION_VALID);

pub struct ReferenceSpaceTracker {
    space_type: ReferenceSpaceType,
    handle: Option<SpaceHandle>,
    recreate_on_change: bool,
    change_pending: bool,
    last_valid: Vec<Option<LocatedView>>,
    fallback_frames: u64,
}

impl ReferenceSpaceTracker {
    pub fn create(
        runtime: &mut dyn XrRuntime,
        space_type: ReferenceSpaceType,
        recreate_on_change: bool,
    ) -> Result<Self> {
        let handle = runtime.create_reference_space(space_type, Pose::IDENTITY)?;
        info!("XR: {} reference space created ({:?})", space_type.as_str(), handle);
        Ok(Self {
            space_type,
            handle: Some(handle),
            recreate_on_change,
            change_pending: false,
            last_valid: Vec::new(),
            fallback_frames: 0,
        })
    }

    pub fn space_type(&self) -> ReferenceSpaceType {
        self.space_type
    }

    /// None once destroyed (or after a change without recreation).
    pub fn handle(&self) -> Option<SpaceHandle> {
        self.handle
    }

    pub fn is_change_pending(&self) -> bool {
        self.change_pending
    }

    /// Frames rendered with a held-over pose.
    pub fn fallback_frames(&self) -> u64 {
        self.fallback_frames
    }

    pub fn mark_change_pending(&mut self) {
        if !self.change_pending {
            debug!("XR: {} reference space marked for refresh", self.space_type.as_str());
        }
        self.change_pending = true;
    }

    /// Apply a pending change. Must not be called while a frame is open.
    ///
    /// Returns true if the space was replaced or dropped.
    pub fn refresh_if_pending(&mut self, runtime: &mut dyn XrRuntime) -> Result<bool> {
        if !self.change_pending {
            return Ok(false);
        }
        self.change_pending = false;
        self.destroy(runtime);
        self.last_valid.clear();

        if self.recreate_on_change {
            let handle = runtime.create_reference_space(self.space_type, Pose::IDENTITY)?;
            info!(
                "XR: {} reference space recreated ({:?})",
                self.space_type.as_str(),
                handle
            );
            self.handle = Some(handle);
        } else {
            warn!("XR: {} reference space dropped after change", self.space_type.as_str());
        }
        Ok(true)
    }

    /// Locate `view_count` views at `time`.
    ///
    /// Views whose pose is not valid fall back to the last valid pose for the
    /// same view index. Without one the frame fails with a pose location error.
    pub fn locate(
        &mut self,
        runtime: &mut dyn XrRuntime,
        view_configuration: ViewConfigurationType,
        time: XrTime,
        view_count: usize,
    ) -> Result<Vec<LocatedView>> {
        let space = self.handle.ok_or_else(|| XrError::PoseLocation {
            time,
            reason: "no reference space".into(),
        })?;

        let located = runtime
            .locate_views(view_configuration, time, space)
            .map_err(|e| XrError::PoseLocation {
                time,
                reason: e.to_string(),
            })?;

        if located.views.len() != view_count {
            return Err(XrError::PoseLocation {
                time,
                reason: format!(
                    "runtime located {} view(s), expected {}",
                    located.views.len(),
                    view_count
                ),
            });
        }

        if located.flags.contains(POSE_VALID) {
            self.last_valid = located.views.iter().copied().map(Some).collect();
            return Ok(located.views);
        }

        if self.last_valid.len() != view_count || self.last_valid.iter().any(Option::is_none) {
            return Err(XrError::PoseLocation {
                time,
                reason: format!("pose not valid ({:?}) and no previous pose", located.flags),
            });
        }

        self.fallback_frames += 1;
        warn!(
            "XR: pose not valid at {} ({:?}), reusing last valid pose",
            time, located.flags
        );
        Ok(self.last_valid.iter().flatten().copied().collect())
    }

    /// Safe to call more than once.
    pub fn destroy(&mut self, runtime: &mut dyn XrRuntime) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = runtime.destroy_space(handle) {
                warn!("XR: failed to destroy reference space {:?}: {}", handle, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{RuntimeCall, SimulatedRuntime, SimulatedRuntimeConfig};

    const STEREO: ViewConfigurationType = ViewConfigurationType::PrimaryStereo;

    fn runtime_with(config: SimulatedRuntimeConfig) -> SimulatedRuntime {
        SimulatedRuntime::new(config)
    }

    #[test]
    fn test_create_with_identity_pose() {
        let mut runtime = runtime_with(SimulatedRuntimeConfig::default());
        let tracker = ReferenceSpaceTracker::create(&mut runtime, ReferenceSpaceType::Local, true).unwrap();
        assert!(tracker.handle().is_some());
        assert_eq!(
            runtime.calls()[0],
            RuntimeCall::CreateReferenceSpace(ReferenceSpaceType::Local, Pose::IDENTITY)
        );
    }

    #[test]
    fn test_refresh_is_lazy() {
        let mut runtime = runtime_with(SimulatedRuntimeConfig::default());
        let mut tracker = ReferenceSpaceTracker::create(&mut runtime, ReferenceSpaceType::Stage, true).unwrap();
        let first = tracker.handle().unwrap();

        assert!(!tracker.refresh_if_pending(&mut runtime).unwrap());
        tracker.mark_change_pending();
        assert_eq!(tracker.handle(), Some(first));

        assert!(tracker.refresh_if_pending(&mut runtime).unwrap());
        let second = tracker.handle().unwrap();
        assert_ne!(first, second);
        assert!(!tracker.is_change_pending());
        assert_eq!(runtime.live_space_count(), 1);
    }

    #[test]
    fn test_refresh_without_recreate_drops_space() {
        let mut runtime = runtime_with(SimulatedRuntimeConfig::default());
        let mut tracker = ReferenceSpaceTracker::create(&mut runtime, ReferenceSpaceType::Local, false).unwrap();
        tracker.mark_change_pending();
        assert!(tracker.refresh_if_pending(&mut runtime).unwrap());
        assert_eq!(tracker.handle(), None);

        let err = tracker
            .locate(&mut runtime, STEREO, XrTime::from_nanos(1), 2)
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_destroy_idempotent() {
        let mut runtime = runtime_with(SimulatedRuntimeConfig::default());
        let mut tracker = ReferenceSpaceTracker::create(&mut runtime, ReferenceSpaceType::Local, true).unwrap();
        tracker.destroy(&mut runtime);
        tracker.destroy(&mut runtime);
        assert_eq!(runtime.count_calls(|c| matches!(c, RuntimeCall::DestroySpace(_))), 1);
        assert_eq!(runtime.live_space_count(), 0);
    }

    #[test]
    fn test_locate_falls_back_to_last_valid() {
        let mut runtime = runtime_with(SimulatedRuntimeConfig::default());
        let mut tracker = ReferenceSpaceTracker::create(&mut runtime, ReferenceSpaceType::Local, true).unwrap();

        let valid = tracker.locate(&mut runtime, STEREO, XrTime::from_nanos(10), 2).unwrap();
        runtime.set_next_view_flags(ViewStateFlags::ORIENTATION_VALID);
        let held = tracker.locate(&mut runtime, STEREO, XrTime::from_nanos(20), 2).unwrap();
        assert_eq!(valid, held);
        assert_eq!(tracker.fallback_frames(), 1);
    }

    #[test]
    fn test_locate_invalid_without_history_fails() {
        let mut runtime = runtime_with(SimulatedRuntimeConfig::default());
        let mut tracker = ReferenceSpaceTracker::create(&mut runtime, ReferenceSpaceType::Local, true).unwrap();
        runtime.set_next_view_flags(ViewStateFlags::empty());
        let err = tracker
            .locate(&mut runtime, STEREO, XrTime::from_nanos(10), 2)
            .unwrap_err();
        assert!(matches!(err, XrError::PoseLocation { .. }));
    }

    #[test]
    fn test_runtime_failure_maps_to_pose_location() {
        let mut runtime = runtime_with(SimulatedRuntimeConfig::default());
        let mut tracker = ReferenceSpaceTracker::create(&mut runtime, ReferenceSpaceType::Local, true).unwrap();
        runtime.fail_next_locate();
        let err = tracker
            .locate(&mut runtime, STEREO, XrTime::from_nanos(10), 2)
            .unwrap_err();
        match err {
            XrError::PoseLocation { time, reason } => {
                assert_eq!(time, XrTime::from_nanos(10));
                assert!(reason.contains("xrLocateViews"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
