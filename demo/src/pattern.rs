//! Moving-gradient test pattern, ARGB32.

/// Renders a horizontal gradient whose hue peak slides with `phase`
/// (0.0..1.0, one full sweep per unit). Row zero carries a brighter band so
/// motion stays visible in dumps.
pub fn render_gradient(frame: &mut [u32], width: u32, height: u32, phase: f64) {
    debug_assert!(frame.len() >= (width as usize) * (height as usize));
    if width == 0 || height == 0 {
        return;
    }

    let mut row = Vec::with_capacity(width as usize);
    for x in 0..width {
        let position = x as f64 / width as f64;
        // Triangle wave centered on the moving peak.
        let value = (1.0 - ((2.0 + position - phase) * 2.0).rem_euclid(2.0)).abs();
        let red = (value * 255.0) as u32;
        let blue = 255 - (value * 255.0) as u32;
        row.push(0xFF00_0000 | (red << 16) | blue);
    }

    for y in 0..height as usize {
        let line = &mut frame[y * width as usize..(y + 1) * width as usize];
        line.copy_from_slice(&row);
        if y == 0 {
            for pixel in line.iter_mut() {
                *pixel |= 0x0000_FF00;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_every_pixel_opaque() {
        let mut frame = vec![0u32; 8 * 4];
        render_gradient(&mut frame, 8, 4, 0.25);
        assert!(frame.iter().all(|p| p >> 24 == 0xFF));
    }

    #[test]
    fn phase_moves_the_pattern() {
        let mut a = vec![0u32; 16 * 2];
        let mut b = vec![0u32; 16 * 2];
        render_gradient(&mut a, 16, 2, 0.0);
        render_gradient(&mut b, 16, 2, 0.5);
        assert_ne!(a, b);
    }

    #[test]
    fn tolerates_empty_frames() {
        let mut empty: Vec<u32> = Vec::new();
        render_gradient(&mut empty, 0, 0, 0.3);
    }
}
