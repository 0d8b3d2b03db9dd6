use glam::Vec2;

pub fn lerp(start: f32, end: f32, t: f32) -> f32 {
    start + (end - start) * t
}

pub fn lerp_vec2(start: Vec2, end: Vec2, t: f32) -> Vec2 {
    start + (end - start) * t
}

/// Cubic Hermite spline between `start` and `end` with explicit tangents.
/// Feeding velocity-scaled tangents yields C1-continuous motion through
/// velocity-consistent keyframes.
pub fn hermite(start: f32, end: f32, start_tangent: f32, end_tangent: f32, t: f32) -> f32 {
    let t2 = t * t;
    let t3 = t2 * t;

    let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
    let h10 = t3 - 2.0 * t2 + t;
    let h01 = -2.0 * t3 + 3.0 * t2;
    let h11 = t3 - t2;

    start * h00 + start_tangent * h10 + end * h01 + end_tangent * h11
}

pub fn hermite_vec2(start: Vec2, end: Vec2, start_tangent: Vec2, end_tangent: Vec2, t: f32) -> Vec2 {
    Vec2::new(
        hermite(start.x, end.x, start_tangent.x, end_tangent.x, t),
        hermite(start.y, end.y, start_tangent.y, end_tangent.y, t),
    )
}
