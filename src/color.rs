//! Splat color generation: random HSV draws or a user-supplied hex palette.

use rand::Rng;

/// RGB color with channels in [0, 1]. Splat colors may exceed 1.0 after
/// amplification; the dye field stores them unclamped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub const BLACK: Color = Color {
        r: 0.0,
        g: 0.0,
        b: 0.0,
    };

    pub fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    /// Uniform channel scaling. Click splats amplify the pointer color by 10x.
    pub fn scale(self, factor: f32) -> Self {
        Self {
            r: self.r * factor,
            g: self.g * factor,
            b: self.b * factor,
        }
    }
}

pub fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Color {
    let i = (h * 6.0).floor();
    let f = h * 6.0 - i;
    let p = v * (1.0 - s);
    let q = v * (1.0 - f * s);
    let t = v * (1.0 - (1.0 - f) * s);

    let (r, g, b) = match (i as i32).rem_euclid(6) {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };
    Color::new(r, g, b)
}

/// Random fully-saturated hue, dimmed so drag trails stay subtle. Click
/// splats undo the dimming by amplifying the stored color.
pub fn random_color<R: Rng>(rng: &mut R) -> Color {
    hsv_to_rgb(rng.gen::<f32>(), 1.0, 1.0).scale(0.15)
}

/// Parses "#RRGGBB" into a normalized color.
pub fn parse_hex(hex: &str) -> anyhow::Result<Color> {
    let digits = hex.strip_prefix('#').unwrap_or(hex);
    if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        anyhow::bail!("invalid hex color {:?}, expected #RRGGBB", hex);
    }
    let channel = |i: usize| -> f32 {
        u8::from_str_radix(&digits[i..i + 2], 16).unwrap_or(0) as f32 / 255.0
    };
    Ok(Color::new(channel(0), channel(2), channel(4)))
}

/// Round-robin cursor over a custom palette. Empty palette means colors are
/// drawn randomly instead.
#[derive(Debug, Default)]
pub struct Palette {
    colors: Vec<Color>,
    next: usize,
}

impl Palette {
    pub fn from_hex(hex_colors: &[String]) -> anyhow::Result<Self> {
        let colors = hex_colors
            .iter()
            .map(|h| parse_hex(h))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self { colors, next: 0 })
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn next_color(&mut self) -> Option<Color> {
        if self.colors.is_empty() {
            return None;
        }
        let color = self.colors[self.next % self.colors.len()];
        self.next = (self.next + 1) % self.colors.len();
        Some(color)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn hex_parsing() {
        assert_eq!(parse_hex("#FF0000").unwrap(), Color::new(1.0, 0.0, 0.0));
        assert_eq!(parse_hex("#00FF00").unwrap(), Color::new(0.0, 1.0, 0.0));
        assert_eq!(parse_hex("0000FF").unwrap(), Color::new(0.0, 0.0, 1.0));
        assert!(parse_hex("#12345").is_err());
        assert!(parse_hex("#GG0000").is_err());
    }

    #[test]
    fn palette_round_robin_is_deterministic() {
        let hex = vec!["#FF0000".to_string(), "#00FF00".to_string()];
        let mut palette = Palette::from_hex(&hex).unwrap();
        let red = Color::new(1.0, 0.0, 0.0);
        let green = Color::new(0.0, 1.0, 0.0);
        assert_eq!(palette.next_color(), Some(red));
        assert_eq!(palette.next_color(), Some(green));
        assert_eq!(palette.next_color(), Some(red));
        assert_eq!(palette.next_color(), Some(green));
    }

    #[test]
    fn empty_palette_yields_nothing() {
        let mut palette = Palette::from_hex(&[]).unwrap();
        assert!(palette.is_empty());
        assert_eq!(palette.next_color(), None);
    }

    #[test]
    fn click_amplification_is_ten_fold() {
        let c = Color::new(0.1, 0.05, 0.02);
        let amplified = c.scale(10.0);
        assert!((amplified.r - 1.0).abs() < 1e-6);
        assert!((amplified.g - 0.5).abs() < 1e-6);
        assert!((amplified.b - 0.2).abs() < 1e-6);
    }

    #[test]
    fn random_colors_are_dimmed() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let c = random_color(&mut rng);
            assert!(c.r <= 0.15 + 1e-6 && c.g <= 0.15 + 1e-6 && c.b <= 0.15 + 1e-6);
            assert!(c.r >= 0.0 && c.g >= 0.0 && c.b >= 0.0);
            // Full saturation/value means one channel always hits the cap.
            let max = c.r.max(c.g).max(c.b);
            assert!((max - 0.15).abs() < 1e-6);
        }
    }
}
