use serde::{Deserialize, Serialize};

/// Point + radius in native image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hotspot {
    pub x: f64,
    pub y: f64,
    pub radius_px: f64,
}

/// Rectangle in native image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Selection {
    #[default]
    None,
    Hotspot(Hotspot),
    Region(Region),
}

/// Selection expressed as percentages of the native image size, so the
/// instruction survives any resizing done by the transport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PercentGeometry {
    Point {
        x_pct: f64,
        y_pct: f64,
        radius_pct: f64,
    },
    Rect {
        x_pct: f64,
        y_pct: f64,
        width_pct: f64,
        height_pct: f64,
    },
}

impl Selection {
    pub fn is_none(&self) -> bool {
        matches!(self, Selection::None)
    }

    /// Converts to percentages. `None` when there is no selection or the
    /// native size is unknown or degenerate.
    pub fn to_percent(&self, native: Option<(u32, u32)>) -> Option<PercentGeometry> {
        let (width, height) = native?;
        if width == 0 || height == 0 {
            return None;
        }
        let w = f64::from(width);
        let h = f64::from(height);
        match self {
            Selection::None => None,
            Selection::Hotspot(spot) => Some(PercentGeometry::Point {
                x_pct: pct(spot.x, w),
                y_pct: pct(spot.y, h),
                radius_pct: pct(spot.radius_px, w.min(h)),
            }),
            Selection::Region(region) => Some(PercentGeometry::Rect {
                x_pct: pct(region.x, w),
                y_pct: pct(region.y, h),
                width_pct: pct(region.width, w),
                height_pct: pct(region.height, h),
            }),
        }
    }
}

impl PercentGeometry {
    pub fn describe(&self) -> String {
        match self {
            PercentGeometry::Point {
                x_pct,
                y_pct,
                radius_pct,
            } => format!(
                "a circular area centred at {:.1}% from the left and {:.1}% from the top, \
with a radius of {:.1}% of the shorter image side",
                x_pct, y_pct, radius_pct
            ),
            PercentGeometry::Rect {
                x_pct,
                y_pct,
                width_pct,
                height_pct,
            } => format!(
                "the rectangle starting {:.1}% from the left and {:.1}% from the top, \
{:.1}% wide and {:.1}% tall",
                x_pct, y_pct, width_pct, height_pct
            ),
        }
    }
}

fn pct(value: f64, total: f64) -> f64 {
    (value / total * 100.0).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::{Hotspot, PercentGeometry, Region, Selection};

    #[test]
    fn hotspot_converts_against_native_size() {
        let selection = Selection::Hotspot(Hotspot {
            x: 50.0,
            y: 150.0,
            radius_px: 20.0,
        });
        let geometry = selection.to_percent(Some((200, 400)));
        assert_eq!(
            geometry,
            Some(PercentGeometry::Point {
                x_pct: 25.0,
                y_pct: 37.5,
                radius_pct: 10.0,
            })
        );
    }

    #[test]
    fn region_is_clamped_to_the_image() {
        let selection = Selection::Region(Region {
            x: 100.0,
            y: 0.0,
            width: 400.0,
            height: 50.0,
        });
        let Some(PercentGeometry::Rect {
            x_pct, width_pct, ..
        }) = selection.to_percent(Some((200, 100)))
        else {
            panic!("expected a rect");
        };
        assert_eq!(x_pct, 50.0);
        assert_eq!(width_pct, 100.0);
    }

    #[test]
    fn unknown_size_drops_geometry() {
        let selection = Selection::Region(Region {
            x: 1.0,
            y: 1.0,
            width: 1.0,
            height: 1.0,
        });
        assert!(selection.to_percent(None).is_none());
        assert!(selection.to_percent(Some((0, 10))).is_none());
        assert!(Selection::None.to_percent(Some((10, 10))).is_none());
    }
}
