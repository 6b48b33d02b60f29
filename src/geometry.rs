//! Minimal vector-drawing model shared by analysis, estimation, and execution.
//!
//! A [`Drawing`] is a stack of [`LayerGeometry`] entries; each layer holds
//! pen-down [`Polyline`]s in plot units (millimeters). The model carries just
//! enough structure for layer detection, feature extraction, and the device
//! execution loop — rendering and path optimization live behind collaborators.

use serde::{Deserialize, Serialize};

/// A point in plot coordinates (millimeters, origin at device home).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const ORIGIN: Point = Point { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    pub fn distance_to(&self, other: &Point) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// A single pen-down stroke: the pen drops at the first vertex, draws through
/// the rest, and lifts after the last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polyline {
    pub points: Vec<Point>,
}

impl Polyline {
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }

    /// First vertex, if the polyline is non-empty.
    pub fn start(&self) -> Option<Point> {
        self.points.first().copied()
    }

    /// Last vertex, if the polyline is non-empty.
    pub fn end(&self) -> Option<Point> {
        self.points.last().copied()
    }

    /// Total pen-down length along the stroke.
    pub fn length(&self) -> f64 {
        self.points
            .windows(2)
            .map(|w| w[0].distance_to(&w[1]))
            .sum()
    }

    /// Counts interior direction changes sharper than `min_angle_deg`.
    ///
    /// A vertex counts as a corner when the heading change between the
    /// incoming and outgoing segment exceeds the threshold. Zero-length
    /// segments are skipped.
    pub fn corners(&self, min_angle_deg: f64) -> u32 {
        let min_rad = min_angle_deg.to_radians();
        let mut count = 0;
        for w in self.points.windows(3) {
            let (a, b, c) = (w[0], w[1], w[2]);
            let v1 = (b.x - a.x, b.y - a.y);
            let v2 = (c.x - b.x, c.y - b.y);
            let n1 = (v1.0 * v1.0 + v1.1 * v1.1).sqrt();
            let n2 = (v2.0 * v2.0 + v2.1 * v2.1).sqrt();
            if n1 == 0.0 || n2 == 0.0 {
                continue;
            }
            let cos = ((v1.0 * v2.0 + v1.1 * v2.1) / (n1 * n2)).clamp(-1.0, 1.0);
            if cos.acos() > min_rad {
                count += 1;
            }
        }
        count
    }
}

/// Pen characteristics a layer declares for itself (from embedded
/// layer-control annotations), used to match against the available pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenHint {
    /// Requested stroke width in millimeters.
    pub width_mm: f64,
    /// Requested color identifier (e.g. "black", "#1a6b9e"), if declared.
    pub color: Option<String>,
}

/// One drawing layer: named, z-ordered, optionally hidden from plotting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerGeometry {
    /// Layer name as found in the source drawing.
    pub name: String,
    /// Stacking index; lower draws first.
    pub z_index: u32,
    /// Hidden layers are excluded from assignment and execution entirely.
    pub hidden: bool,
    /// Declared pen characteristics, if the layer carries an annotation.
    pub pen_hint: Option<PenHint>,
    /// Pen-down strokes in source order.
    pub paths: Vec<Polyline>,
}

impl LayerGeometry {
    pub fn new(name: impl Into<String>, z_index: u32) -> Self {
        Self {
            name: name.into(),
            z_index,
            hidden: false,
            pen_hint: None,
            paths: Vec::new(),
        }
    }

    pub fn with_paths(mut self, paths: Vec<Polyline>) -> Self {
        self.paths = paths;
        self
    }

    pub fn with_hint(mut self, hint: PenHint) -> Self {
        self.pen_hint = Some(hint);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }
}

/// A full vector drawing: layers in z-order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Drawing {
    pub layers: Vec<LayerGeometry>,
}

impl Drawing {
    pub fn new(layers: Vec<LayerGeometry>) -> Self {
        Self { layers }
    }

    /// Layers that take part in plotting, in z-order.
    pub fn visible_layers(&self) -> impl Iterator<Item = &LayerGeometry> {
        self.layers.iter().filter(|l| !l.hidden)
    }

    /// True when any layer declares a pen annotation.
    pub fn has_pen_annotations(&self) -> bool {
        self.layers.iter().any(|l| l.pen_hint.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(side: f64) -> Polyline {
        Polyline::new(vec![
            Point::new(0.0, 0.0),
            Point::new(side, 0.0),
            Point::new(side, side),
            Point::new(0.0, side),
            Point::new(0.0, 0.0),
        ])
    }

    #[test]
    fn polyline_length_sums_segments() {
        assert_eq!(square(10.0).length(), 40.0);
    }

    #[test]
    fn square_has_three_interior_corners() {
        // Four right angles but only three interior vertices in an open
        // windows(3) walk over the closed square path.
        assert_eq!(square(10.0).corners(45.0), 3);
    }

    #[test]
    fn straight_line_has_no_corners() {
        let line = Polyline::new(vec![
            Point::new(0.0, 0.0),
            Point::new(5.0, 0.0),
            Point::new(10.0, 0.0),
        ]);
        assert_eq!(line.corners(45.0), 0);
    }

    #[test]
    fn shallow_bend_below_threshold_is_not_a_corner() {
        let bend = Polyline::new(vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(20.0, 1.0),
        ]);
        assert_eq!(bend.corners(45.0), 0);
        assert_eq!(bend.corners(2.0), 1);
    }

    #[test]
    fn hidden_layers_excluded_from_visible() {
        let drawing = Drawing::new(vec![
            LayerGeometry::new("ink", 0),
            LayerGeometry::new("guides", 1).hidden(),
        ]);
        let visible: Vec<_> = drawing.visible_layers().map(|l| l.name.as_str()).collect();
        assert_eq!(visible, vec!["ink"]);
    }

    #[test]
    fn annotation_detection() {
        let mut drawing = Drawing::new(vec![LayerGeometry::new("ink", 0)]);
        assert!(!drawing.has_pen_annotations());
        drawing.layers[0].pen_hint = Some(PenHint {
            width_mm: 0.3,
            color: Some("black".into()),
        });
        assert!(drawing.has_pen_annotations());
    }
}
