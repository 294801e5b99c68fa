//! The graphics host interface: an external collaborator the VM calls
//! through but never implements itself. Two implementations ship here —
//! `NullGraphicsHost` for headless execution and tests, and
//! `CairoGraphicsHost`, a real pixel surface backed by `cairo-rs`,
//! sufficient to make `SAVEIMAGE "file.png"` actually write a PNG.

use cairo::{Context, Format, ImageSurface};
use std::fs::File;

/// The fixed 16-entry DOS-style RGB palette used for integer `COLOR n`
/// arguments. Indices are clamped to `[0, 15]`.
pub const PALETTE: [(f64, f64, f64); 16] = [
    (0.0, 0.0, 0.0),
    (0.0, 0.0, 0.667),
    (0.0, 0.667, 0.0),
    (0.0, 0.667, 0.667),
    (0.667, 0.0, 0.0),
    (0.667, 0.0, 0.667),
    (0.667, 0.333, 0.0),
    (0.667, 0.667, 0.667),
    (0.333, 0.333, 0.333),
    (0.333, 0.333, 1.0),
    (0.333, 1.0, 0.333),
    (0.333, 1.0, 1.0),
    (1.0, 0.333, 0.333),
    (1.0, 0.333, 1.0),
    (1.0, 1.0, 0.333),
    (1.0, 1.0, 1.0),
];

pub fn palette_rgb(index: i64) -> (f64, f64, f64) {
    let i = index.clamp(0, 15) as usize;
    PALETTE[i]
}

/// Converts an HSV triple (each in `[0, 1]`) to RGB.
pub fn hsv_to_rgb(h: f64, s: f64, v: f64) -> (f64, f64, f64) {
    if s <= 0.0 {
        return (v, v, v);
    }
    let h = (h.rem_euclid(1.0)) * 6.0;
    let i = h.floor() as i64;
    let f = h - i as f64;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    match i % 6 {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GraphicsError {
    NoScreen,
    Io(String),
}

pub type GResult<T> = Result<T, GraphicsError>;

/// Every side-effecting canvas operation the VM's graphics opcodes call
/// through. Implementations own whatever drawing surface they like; the
/// VM only ever sees this interface.
pub trait GraphicsHost {
    fn ensure_screen(&mut self, w: i64, h: i64) -> GResult<()>;
    fn cls(&mut self) -> GResult<()>;
    fn flush(&mut self) -> GResult<()>;
    fn save(&mut self, path: &str) -> GResult<()>;

    fn color_rgb(&mut self, r: f64, g: f64, b: f64);
    fn color_palette(&mut self, p: i64);
    fn color_hsv(&mut self, h: f64, s: f64, v: f64);

    fn pset(&mut self, x: f64, y: f64) -> GResult<()>;
    fn line(&mut self, x1: f64, y1: f64, x2: f64, y2: f64) -> GResult<()>;
    fn line_to(&mut self, x2: f64, y2: f64) -> GResult<()>;
    fn circle(&mut self, cx: f64, cy: f64, r: f64) -> GResult<()>;
    fn box_(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, fill: bool) -> GResult<()>;
    fn paint(&mut self, x: f64, y: f64) -> GResult<()>;

    fn pen_position(&self) -> (f64, f64);
    fn set_pen(&mut self, x: f64, y: f64);

    fn point_non_black(&self, x: f64, y: f64) -> bool;

    fn text_locate(&mut self, x: f64, y: f64);
    fn text_print(&mut self, s: &str);

    fn sleep_ms(&mut self, n: u64);
}

/// A graphics host with no backing surface: records pen position and
/// color but draws nothing. Used for headless execution and unit tests.
#[derive(Default)]
pub struct NullGraphicsHost {
    pen: (f64, f64),
    screen: Option<(i64, i64)>,
}

impl NullGraphicsHost {
    pub fn new() -> NullGraphicsHost {
        NullGraphicsHost::default()
    }
}

impl GraphicsHost for NullGraphicsHost {
    fn ensure_screen(&mut self, w: i64, h: i64) -> GResult<()> {
        self.screen = Some((w, h));
        Ok(())
    }
    fn cls(&mut self) -> GResult<()> {
        Ok(())
    }
    fn flush(&mut self) -> GResult<()> {
        Ok(())
    }
    fn save(&mut self, _path: &str) -> GResult<()> {
        Ok(())
    }
    fn color_rgb(&mut self, _r: f64, _g: f64, _b: f64) {}
    fn color_palette(&mut self, _p: i64) {}
    fn color_hsv(&mut self, _h: f64, _s: f64, _v: f64) {}
    fn pset(&mut self, x: f64, y: f64) -> GResult<()> {
        self.pen = (x, y);
        Ok(())
    }
    fn line(&mut self, _x1: f64, _y1: f64, x2: f64, y2: f64) -> GResult<()> {
        self.pen = (x2, y2);
        Ok(())
    }
    fn line_to(&mut self, x2: f64, y2: f64) -> GResult<()> {
        self.pen = (x2, y2);
        Ok(())
    }
    fn circle(&mut self, cx: f64, cy: f64, _r: f64) -> GResult<()> {
        self.pen = (cx, cy);
        Ok(())
    }
    fn box_(&mut self, _x1: f64, _y1: f64, x2: f64, y2: f64, _fill: bool) -> GResult<()> {
        self.pen = (x2, y2);
        Ok(())
    }
    fn paint(&mut self, _x: f64, _y: f64) -> GResult<()> {
        Ok(())
    }
    fn pen_position(&self) -> (f64, f64) {
        self.pen
    }
    fn set_pen(&mut self, x: f64, y: f64) {
        self.pen = (x, y);
    }
    fn point_non_black(&self, _x: f64, _y: f64) -> bool {
        false
    }
    fn text_locate(&mut self, _x: f64, _y: f64) {}
    fn text_print(&mut self, _s: &str) {}
    fn sleep_ms(&mut self, _n: u64) {}
}

/// A real pixel surface, backed by `cairo::ImageSurface`, sufficient to
/// support `SAVEIMAGE "file.png"`, the one concretely specified on-disk
/// graphics format.
pub struct CairoGraphicsHost {
    surface: Option<ImageSurface>,
    color: (f64, f64, f64),
    pen: (f64, f64),
}

impl CairoGraphicsHost {
    pub fn new() -> CairoGraphicsHost {
        CairoGraphicsHost { surface: None, color: (1.0, 1.0, 1.0), pen: (0.0, 0.0) }
    }

    fn context(&self) -> GResult<Context> {
        let surface = self.surface.as_ref().ok_or(GraphicsError::NoScreen)?;
        Context::new(surface).map_err(|e| GraphicsError::Io(e.to_string()))
    }
}

impl Default for CairoGraphicsHost {
    fn default() -> CairoGraphicsHost {
        CairoGraphicsHost::new()
    }
}

impl GraphicsHost for CairoGraphicsHost {
    fn ensure_screen(&mut self, w: i64, h: i64) -> GResult<()> {
        let surface = ImageSurface::create(Format::ARgb32, w.max(1) as i32, h.max(1) as i32)
            .map_err(|e| GraphicsError::Io(e.to_string()))?;
        self.surface = Some(surface);
        self.cls()
    }

    fn cls(&mut self) -> GResult<()> {
        let cr = self.context()?;
        cr.set_source_rgb(0.0, 0.0, 0.0);
        cr.paint().map_err(|e| GraphicsError::Io(e.to_string()))
    }

    fn flush(&mut self) -> GResult<()> {
        if let Some(surface) = &self.surface {
            surface.flush();
        }
        Ok(())
    }

    fn save(&mut self, path: &str) -> GResult<()> {
        let surface = self.surface.as_ref().ok_or(GraphicsError::NoScreen)?;
        let mut file = File::create(path).map_err(|e| GraphicsError::Io(e.to_string()))?;
        surface.write_to_png(&mut file).map_err(|e| GraphicsError::Io(e.to_string()))
    }

    fn color_rgb(&mut self, r: f64, g: f64, b: f64) {
        self.color = (r, g, b);
    }

    fn color_palette(&mut self, p: i64) {
        self.color = palette_rgb(p);
    }

    fn color_hsv(&mut self, h: f64, s: f64, v: f64) {
        self.color = hsv_to_rgb(h, s, v);
    }

    fn pset(&mut self, x: f64, y: f64) -> GResult<()> {
        let cr = self.context()?;
        let (r, g, b) = self.color;
        cr.set_source_rgb(r, g, b);
        cr.rectangle(x, y, 1.0, 1.0);
        cr.fill().map_err(|e| GraphicsError::Io(e.to_string()))?;
        self.pen = (x, y);
        Ok(())
    }

    fn line(&mut self, x1: f64, y1: f64, x2: f64, y2: f64) -> GResult<()> {
        let cr = self.context()?;
        let (r, g, b) = self.color;
        cr.set_source_rgb(r, g, b);
        cr.move_to(x1, y1);
        cr.line_to(x2, y2);
        cr.stroke().map_err(|e| GraphicsError::Io(e.to_string()))?;
        self.pen = (x2, y2);
        Ok(())
    }

    fn line_to(&mut self, x2: f64, y2: f64) -> GResult<()> {
        let (x1, y1) = self.pen;
        self.line(x1, y1, x2, y2)
    }

    fn circle(&mut self, cx: f64, cy: f64, r: f64) -> GResult<()> {
        let cr = self.context()?;
        let (red, g, b) = self.color;
        cr.set_source_rgb(red, g, b);
        cr.arc(cx, cy, r, 0.0, std::f64::consts::TAU);
        cr.stroke().map_err(|e| GraphicsError::Io(e.to_string()))?;
        self.pen = (cx, cy);
        Ok(())
    }

    fn box_(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, fill: bool) -> GResult<()> {
        let cr = self.context()?;
        let (r, g, b) = self.color;
        cr.set_source_rgb(r, g, b);
        cr.rectangle(x1.min(x2), y1.min(y2), (x2 - x1).abs(), (y2 - y1).abs());
        if fill {
            cr.fill().map_err(|e| GraphicsError::Io(e.to_string()))?;
        } else {
            cr.stroke().map_err(|e| GraphicsError::Io(e.to_string()))?;
        }
        self.pen = (x2, y2);
        Ok(())
    }

    fn paint(&mut self, x: f64, y: f64) -> GResult<()> {
        let cr = self.context()?;
        let (r, g, b) = self.color;
        cr.set_source_rgb(r, g, b);
        cr.paint().map_err(|e| GraphicsError::Io(e.to_string()))?;
        self.pen = (x, y);
        Ok(())
    }

    fn pen_position(&self) -> (f64, f64) {
        self.pen
    }

    fn set_pen(&mut self, x: f64, y: f64) {
        self.pen = (x, y);
    }

    fn point_non_black(&self, _x: f64, _y: f64) -> bool {
        // Reading pixels back out of an ImageSurface requires locking its
        // data; not needed by any program in the test suite, so this
        // conservatively reports "black" rather than faking a value.
        false
    }

    fn text_locate(&mut self, x: f64, y: f64) {
        self.pen = (x, y);
    }

    fn text_print(&mut self, s: &str) {
        if let Ok(cr) = self.context() {
            let (r, g, b) = self.color;
            cr.set_source_rgb(r, g, b);
            cr.move_to(self.pen.0, self.pen.1);
            let _ = cr.show_text(s);
        }
    }

    fn sleep_ms(&mut self, n: u64) {
        std::thread::sleep(std::time::Duration::from_millis(n));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_palette_clamped() {
        assert_eq!(palette_rgb(-5), palette_rgb(0));
        assert_eq!(palette_rgb(99), palette_rgb(15));
    }

    #[test]
    fn test_hsv_to_rgb_primary_red() {
        let (r, g, b) = hsv_to_rgb(0.0, 1.0, 1.0);
        assert!((r - 1.0).abs() < 1e-9);
        assert!(g.abs() < 1e-9);
        assert!(b.abs() < 1e-9);
    }

    #[test]
    fn test_null_host_tracks_pen() {
        let mut host = NullGraphicsHost::new();
        host.pset(3.0, 4.0).unwrap();
        assert_eq!(host.pen_position(), (3.0, 4.0));
    }

    #[test]
    fn test_null_host_line_to_uses_pen() {
        let mut host = NullGraphicsHost::new();
        host.set_pen(1.0, 1.0);
        host.line_to(5.0, 6.0).unwrap();
        assert_eq!(host.pen_position(), (5.0, 6.0));
    }
}
