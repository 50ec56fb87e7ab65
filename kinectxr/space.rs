/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Reference spaces. The sensor does not move, so VIEW, LOCAL and STAGE
//! all sit at the camera origin with identity poses.

use crate::runtime::Runtime;
use crate::OpResult;

use euclid::default::{RigidTransform3D, Rotation3D, Vector3D};
use openxr_sys::{
    Posef, Quaternionf, ReferenceSpaceCreateInfo, ReferenceSpaceType, Result,
    SpaceLocationFlags, StructureType, Vector3f,
};

/// Enumeration order is part of the contract.
pub const REFERENCE_SPACE_TYPES: &[ReferenceSpaceType] = &[
    ReferenceSpaceType::VIEW,
    ReferenceSpaceType::LOCAL,
    ReferenceSpaceType::STAGE,
];

pub struct Space {
    pub session: u64,
    pub space_type: ReferenceSpaceType,
    pub pose_in_parent: RigidTransform3D<f32>,
}

pub fn identity_pose() -> Posef {
    Posef {
        orientation: Quaternionf {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            w: 1.0,
        },
        position: Vector3f {
            x: 0.0,
            y: 0.0,
            z: 0.0,
        },
    }
}

pub fn pose_to_transform(pose: &Posef) -> RigidTransform3D<f32> {
    let rotation = Rotation3D::quaternion(
        pose.orientation.x,
        pose.orientation.y,
        pose.orientation.z,
        pose.orientation.w,
    );
    let translation = Vector3D::new(pose.position.x, pose.position.y, pose.position.z);
    RigidTransform3D::new(rotation, translation)
}

pub fn transform_to_pose(transform: &RigidTransform3D<f32>) -> Posef {
    let rotation = transform.rotation.normalize();
    Posef {
        orientation: Quaternionf {
            x: rotation.i,
            y: rotation.j,
            z: rotation.k,
            w: rotation.r,
        },
        position: Vector3f {
            x: transform.translation.x,
            y: transform.translation.y,
            z: transform.translation.z,
        },
    }
}

pub fn all_location_flags() -> SpaceLocationFlags {
    SpaceLocationFlags::ORIENTATION_VALID
        | SpaceLocationFlags::POSITION_VALID
        | SpaceLocationFlags::ORIENTATION_TRACKED
        | SpaceLocationFlags::POSITION_TRACKED
}

pub fn create_reference_space(
    rt: &Runtime,
    session_handle: u64,
    info: &ReferenceSpaceCreateInfo,
) -> OpResult<u64> {
    if info.ty != StructureType::REFERENCE_SPACE_CREATE_INFO {
        return Err(Result::ERROR_VALIDATION_FAILURE);
    }
    if !REFERENCE_SPACE_TYPES.contains(&info.reference_space_type) {
        return Err(Result::ERROR_REFERENCE_SPACE_UNSUPPORTED);
    }
    if !rt.sessions.contains(session_handle) {
        return Err(Result::ERROR_HANDLE_INVALID);
    }
    let space = Space {
        session: session_handle,
        space_type: info.reference_space_type,
        pose_in_parent: pose_to_transform(&info.pose_in_reference_space),
    };
    Ok(rt.spaces.insert(space))
}

pub fn destroy_space(rt: &Runtime, handle: u64) -> OpResult<()> {
    rt.spaces
        .remove(handle)
        .map(|_| ())
        .ok_or(Result::ERROR_HANDLE_INVALID)
}

/// Pose of `space` expressed in `base_space`. Both are anchored at the
/// camera origin, so this composes the two stored poses directly.
pub fn locate_space(rt: &Runtime, handle: u64, base_handle: u64) -> OpResult<Posef> {
    let space = rt.spaces.get(handle).ok_or(Result::ERROR_HANDLE_INVALID)?;
    let base = rt
        .spaces
        .get(base_handle)
        .ok_or(Result::ERROR_HANDLE_INVALID)?;
    let relative = space.pose_in_parent.then(&base.pose_in_parent.inverse());
    Ok(transform_to_pose(&relative))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_poses_compose_to_identity() {
        let identity = pose_to_transform(&identity_pose());
        let relative = identity.then(&identity.inverse());
        let pose = transform_to_pose(&relative);
        assert_eq!(pose.orientation.w, 1.0);
        assert_eq!(pose.position.x, 0.0);
        assert_eq!(pose.position.y, 0.0);
        assert_eq!(pose.position.z, 0.0);
    }

    #[test]
    fn pose_round_trips_through_euclid() {
        let pose = Posef {
            orientation: Quaternionf {
                x: 0.0,
                y: 1.0,
                z: 0.0,
                w: 0.0,
            },
            position: Vector3f {
                x: 1.0,
                y: 2.0,
                z: 3.0,
            },
        };
        let back = transform_to_pose(&pose_to_transform(&pose));
        assert!((back.orientation.y - 1.0).abs() < 1e-6);
        assert_eq!(back.position.z, 3.0);
    }
}
