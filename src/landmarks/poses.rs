//! Canonical synthetic hand poses.
//!
//! Hands are built upright in normalized image space: wrist at the bottom,
//! fingers pointing up, palm length (wrist to middle MCP) of 0.2. An extended
//! finger has its tip well beyond its PIP joint; a curled finger folds its tip
//! back below the MCP row. The thumb extends sideways away from the palm.

use super::{
    Landmark, LandmarkSet, INDEX_MCP, LANDMARK_COUNT, THUMB_CMC, THUMB_IP, THUMB_MCP, THUMB_TIP,
    WRIST,
};
use crate::gesture::{FingerExtension, GestureClass};

const WRIST_AT: (f32, f32) = (0.5, 0.8);

/// (x, MCP y) for index, middle, ring, pinky.
const FINGER_BASES: [(f32, f32); 4] = [(0.44, 0.62), (0.5, 0.6), (0.56, 0.62), (0.62, 0.64)];

const PIP_RISE: f32 = 0.08;

/// Build a hand with the given fingers extended.
pub fn hand_with(extension: FingerExtension) -> LandmarkSet {
    let mut points = [Landmark::default(); LANDMARK_COUNT];
    points[WRIST] = Landmark::new(WRIST_AT.0, WRIST_AT.1, 0.0);

    points[THUMB_CMC] = Landmark::new(0.44, 0.76, 0.0);
    points[THUMB_MCP] = Landmark::new(0.38, 0.72, 0.0);
    if extension.thumb {
        points[THUMB_IP] = Landmark::new(0.32, 0.70, 0.0);
        points[THUMB_TIP] = Landmark::new(0.24, 0.66, 0.0);
    } else {
        points[THUMB_IP] = Landmark::new(0.40, 0.70, 0.0);
        points[THUMB_TIP] = Landmark::new(0.44, 0.68, 0.0);
    }

    let fingers = [
        extension.index,
        extension.middle,
        extension.ring,
        extension.pinky,
    ];
    for (finger, (&(x, mcp_y), extended)) in FINGER_BASES.iter().zip(fingers).enumerate() {
        let base = INDEX_MCP + finger * 4;
        let pip_y = mcp_y - PIP_RISE;
        points[base] = Landmark::new(x, mcp_y, 0.0);
        points[base + 1] = Landmark::new(x, pip_y, 0.0);
        if extended {
            points[base + 2] = Landmark::new(x, pip_y - 0.05, 0.0);
            points[base + 3] = Landmark::new(x, pip_y - 0.10, 0.0);
        } else {
            points[base + 2] = Landmark::new(x, pip_y + 0.03, -0.02);
            points[base + 3] = Landmark::new(x, mcp_y + 0.02, -0.03);
        }
    }
    LandmarkSet::new(points)
}

/// Canonical pose for a gesture.
pub fn pose_for(gesture: GestureClass) -> LandmarkSet {
    let none = FingerExtension::default();
    let extension = match gesture {
        GestureClass::Fist => none,
        GestureClass::ThumbsUp => FingerExtension {
            thumb: true,
            ..none
        },
        GestureClass::Pointing => FingerExtension {
            index: true,
            ..none
        },
        GestureClass::PeaceSign => FingerExtension {
            index: true,
            middle: true,
            ..none
        },
        GestureClass::OpenPalm => FingerExtension {
            thumb: true,
            index: true,
            middle: true,
            ring: true,
            pinky: true,
        },
    };
    hand_with(extension)
}

/// A hand that matches no gesture rule (index and ring extended).
pub fn unmatched_pose() -> LandmarkSet {
    hand_with(FingerExtension {
        index: true,
        ring: true,
        ..FingerExtension::default()
    })
}

/// Scale a pose about the wrist and shift it, as if the hand moved or the camera zoomed.
pub fn transformed(set: &LandmarkSet, scale: f32, dx: f32, dy: f32) -> LandmarkSet {
    let wrist = set.point(WRIST);
    let mut points = *set.points();
    for point in points.iter_mut() {
        *point = Landmark::new(
            wrist.x + (point.x - wrist.x) * scale + dx,
            wrist.y + (point.y - wrist.y) * scale + dy,
            point.z * scale,
        );
    }
    LandmarkSet::new(points)
}
