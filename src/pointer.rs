//! Pointer tracking: raw window coordinates to simulation texture space.

use crate::color::Color;

/// Mutable state for one tracked input device. The effect follows a single
/// primary pointer; touch and mouse both feed it.
#[derive(Debug, Clone)]
pub struct Pointer {
    pub id: i64,
    pub texcoord_x: f32,
    pub texcoord_y: f32,
    pub prev_texcoord_x: f32,
    pub prev_texcoord_y: f32,
    pub delta_x: f32,
    pub delta_y: f32,
    pub down: bool,
    pub moved: bool,
    pub color: Color,
}

impl Default for Pointer {
    fn default() -> Self {
        Self {
            id: -1,
            texcoord_x: 0.0,
            texcoord_y: 0.0,
            prev_texcoord_x: 0.0,
            prev_texcoord_y: 0.0,
            delta_x: 0.0,
            delta_y: 0.0,
            down: false,
            moved: false,
            color: Color::new(0.0, 0.0, 0.3),
        }
    }
}

impl Pointer {
    /// Press at pixel position (x, y). Texture-space origin is bottom-left,
    /// so the Y axis flips relative to window coordinates.
    pub fn down(&mut self, id: i64, x: f32, y: f32, width: f32, height: f32) {
        self.id = id;
        self.down = true;
        self.moved = false;
        self.texcoord_x = x / width;
        self.texcoord_y = 1.0 - y / height;
        self.prev_texcoord_x = self.texcoord_x;
        self.prev_texcoord_y = self.texcoord_y;
        self.delta_x = 0.0;
        self.delta_y = 0.0;
    }

    /// Move to pixel position (x, y), recomputing the aspect-corrected delta
    /// so motion looks isotropic on non-square surfaces.
    pub fn move_to(&mut self, x: f32, y: f32, color: Color, width: f32, height: f32) {
        self.prev_texcoord_x = self.texcoord_x;
        self.prev_texcoord_y = self.texcoord_y;
        self.texcoord_x = x / width;
        self.texcoord_y = 1.0 - y / height;

        let aspect = width / height;
        let mut dx = self.texcoord_x - self.prev_texcoord_x;
        let mut dy = self.texcoord_y - self.prev_texcoord_y;
        if aspect < 1.0 {
            dx *= aspect;
        }
        if aspect > 1.0 {
            dy /= aspect;
        }
        self.delta_x = dx;
        self.delta_y = dy;
        self.moved = self.delta_x.abs() > 0.0 || self.delta_y.abs() > 0.0;
        self.color = color;
    }

    /// Release. Position and color persist for the next interaction.
    pub fn up(&mut self) {
        self.down = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn down_normalizes_and_flips_y() {
        let mut p = Pointer::default();
        p.down(1, 100.0, 0.0, 400.0, 200.0);
        assert_eq!(p.texcoord_x, 0.25);
        assert_eq!(p.texcoord_y, 1.0); // window top maps to texture top
        assert!(p.down);
        assert!(!p.moved);
        assert_eq!(p.delta_x, 0.0);
        assert_eq!(p.delta_y, 0.0);
    }

    #[test]
    fn portrait_aspect_scales_horizontal_delta() {
        // aspect 0.5: raw dx is scaled by 0.5, dy untouched
        let mut p = Pointer::default();
        p.down(1, 0.0, 0.0, 100.0, 200.0);
        p.move_to(50.0, 0.0, Color::BLACK, 100.0, 200.0);
        assert!((p.delta_x - 0.25).abs() < 1e-6); // raw 0.5 * aspect 0.5
        assert_eq!(p.delta_y, 0.0);
        assert!(p.moved);
    }

    #[test]
    fn landscape_aspect_scales_vertical_delta() {
        // aspect 2.0: raw dy is divided by 2, dx untouched
        let mut p = Pointer::default();
        p.down(1, 0.0, 0.0, 200.0, 100.0);
        p.move_to(0.0, 50.0, Color::BLACK, 200.0, 100.0);
        assert_eq!(p.delta_x, 0.0);
        assert!((p.delta_y - (-0.25)).abs() < 1e-6); // raw -0.5 / aspect 2.0
    }

    #[test]
    fn up_keeps_position() {
        let mut p = Pointer::default();
        p.down(1, 10.0, 10.0, 100.0, 100.0);
        p.move_to(20.0, 20.0, Color::new(0.5, 0.5, 0.5), 100.0, 100.0);
        p.up();
        assert!(!p.down);
        assert_eq!(p.texcoord_x, 0.2);
        assert_eq!(p.color, Color::new(0.5, 0.5, 0.5));
    }

    #[test]
    fn stationary_move_clears_moved() {
        let mut p = Pointer::default();
        p.down(1, 50.0, 50.0, 100.0, 100.0);
        p.move_to(50.0, 50.0, Color::BLACK, 100.0, 100.0);
        assert!(!p.moved);
    }
}
