//! Listener pose.
//!
//! Listener space is +Z forward, +X toward the right ear, +Y up. The
//! orientation quaternion rotates listener-space vectors into world space.

use glam::{Mat3, Quat, Vec3};
use serde::{Deserialize, Serialize};

/// A pose update for the listener.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ListenerPose {
    /// World position
    pub position: Vec3,
    /// Listener-to-world rotation
    pub orientation: Quat,
    /// World velocity in units per second
    pub velocity: Vec3,
}

impl ListenerPose {
    /// Pose at `position` with identity orientation and no velocity.
    #[must_use]
    pub const fn at(position: Vec3) -> Self {
        Self {
            position,
            orientation: Quat::IDENTITY,
            velocity: Vec3::ZERO,
        }
    }

    /// Pose at `position` facing `target`.
    ///
    /// Falls back to identity orientation when `target` coincides with
    /// `position` or the view direction is parallel to `up`.
    #[must_use]
    pub fn looking_at(position: Vec3, target: Vec3, up: Vec3) -> Self {
        let orientation = (target - position)
            .try_normalize()
            .and_then(|forward| {
                let right = up.cross(forward).try_normalize()?;
                let up = forward.cross(right);
                Some(Quat::from_mat3(&Mat3::from_cols(right, up, forward)))
            })
            .unwrap_or(Quat::IDENTITY);
        Self {
            position,
            orientation,
            velocity: Vec3::ZERO,
        }
    }

    /// Set velocity.
    #[must_use]
    pub const fn with_velocity(mut self, velocity: Vec3) -> Self {
        self.velocity = velocity;
        self
    }

    /// Returns true if every component is finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.position.is_finite() && self.orientation.is_finite() && self.velocity.is_finite()
    }
}

/// The engine's listener. Mutated only through `set_listener_pose`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ListenerState {
    pose: ListenerPose,
    updates: u64,
}

impl ListenerState {
    /// Current pose.
    #[must_use]
    pub const fn pose(&self) -> &ListenerPose {
        &self.pose
    }

    /// World position.
    #[must_use]
    pub const fn position(&self) -> Vec3 {
        self.pose.position
    }

    /// World velocity.
    #[must_use]
    pub const fn velocity(&self) -> Vec3 {
        self.pose.velocity
    }

    /// Number of pose updates applied so far.
    #[must_use]
    pub const fn updates(&self) -> u64 {
        self.updates
    }

    /// Rotates a world-space vector into listener space.
    #[must_use]
    pub fn to_local(&self, world: Vec3) -> Vec3 {
        self.pose.orientation.inverse() * world
    }

    /// Listener forward direction in world space.
    #[must_use]
    pub fn forward(&self) -> Vec3 {
        self.pose.orientation * Vec3::Z
    }

    pub(crate) fn apply(&mut self, pose: ListenerPose) {
        self.pose = ListenerPose {
            orientation: pose.orientation.normalize(),
            ..pose
        };
        self.updates += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_looking_at_rotates_forward() {
        let pose = ListenerPose::looking_at(Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0), Vec3::Y);
        let mut state = ListenerState::default();
        state.apply(pose);
        assert!((state.forward() - Vec3::X).length() < 1e-5);

        // A source straight ahead lands on +Z in listener space.
        let local = state.to_local(Vec3::new(5.0, 0.0, 0.0));
        assert!((local - Vec3::new(0.0, 0.0, 5.0)).length() < 1e-4);
    }

    #[test]
    fn test_looking_at_degenerate() {
        let pose = ListenerPose::looking_at(Vec3::ONE, Vec3::ONE, Vec3::Y);
        assert_eq!(pose.orientation, Quat::IDENTITY);
        let pose = ListenerPose::looking_at(Vec3::ZERO, Vec3::Y, Vec3::Y);
        assert_eq!(pose.orientation, Quat::IDENTITY);
    }

    #[test]
    fn test_apply_counts_updates() {
        let mut state = ListenerState::default();
        state.apply(ListenerPose::at(Vec3::X).with_velocity(Vec3::Z));
        assert_eq!(state.updates(), 1);
        assert_eq!(state.velocity(), Vec3::Z);
    }
}
