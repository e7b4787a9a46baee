//! Moving-position safety planner.
//!
//! A 3-axis robot may only rotate freely at or above the height of its
//! moving position. [`plan_moves`] turns one target into the ordered list
//! of poses that gets there without sweeping a lowered arm.
//!
//! Vertical encoder values grow downward: "above" means numerically
//! less or equal.

use fab_common::position::Position;

/// Ordered poses that move the robot from its current height to `target`.
///
/// 1. Pure rotations and explicit opt-outs go straight to `target`.
/// 2. At or above the moving height, the first pose rotates while moving
///    horizontal and vertical to the moving position. Below it, the robot
///    first reaches the full moving position and then rotates alone.
/// 3. Axes whose target lies further along than the moving position are
///    moved next (deferred pose, omitted when empty).
/// 4. The last pose is always `target`.
pub fn plan_moves(
    current_vertical: i64,
    target: Position,
    moving: Position,
    ignore_moving_position: bool,
) -> Vec<Position> {
    if ignore_moving_position || target.is_pure_rotation() {
        return vec![target];
    }

    let mut poses = Vec::with_capacity(4);
    let above = moving.vertical.is_none_or(|safe| current_vertical <= safe);
    if above {
        poses.push(Position {
            rotation: target.rotation,
            horizontal: moving.horizontal,
            vertical: moving.vertical,
        });
    } else {
        poses.push(moving);
        if target.rotation.is_some() {
            poses.push(Position {
                rotation: target.rotation,
                ..Position::KEEP
            });
        }
    }

    let deferred = Position {
        rotation: None,
        horizontal: further(target.horizontal, moving.horizontal),
        vertical: further(target.vertical, moving.vertical),
    };
    if !deferred.is_keep() {
        poses.push(deferred);
    }

    poses.push(target);
    poses
}

fn further(target: Option<i64>, moving: Option<i64>) -> Option<i64> {
    match (target, moving) {
        (Some(t), Some(m)) if t > m => Some(t),
        _ => None,
    }
}
