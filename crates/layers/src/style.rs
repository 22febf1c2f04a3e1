use formats::LayerStyle;

pub const DEFAULT_COLOR: &str = "#3388ff";
pub const DEFAULT_WEIGHT: f64 = 3.0;
pub const DEFAULT_OPACITY: f64 = 1.0;
pub const DEFAULT_FILL_OPACITY: f64 = 0.2;
pub const DEFAULT_RADIUS: f64 = 6.0;

/// A layer style with every default applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedStyle {
    pub color: String,
    pub weight: f64,
    pub opacity: f64,
    pub fill_color: String,
    pub fill_opacity: f64,
    /// Circle marker radius for point features, in pixels.
    pub radius: f64,
}

impl ResolvedStyle {
    pub fn resolve(style: &LayerStyle) -> Self {
        let color = style
            .color
            .clone()
            .unwrap_or_else(|| DEFAULT_COLOR.to_string());
        Self {
            fill_color: style.fill_color.clone().unwrap_or_else(|| color.clone()),
            color,
            weight: style.weight.unwrap_or(DEFAULT_WEIGHT),
            opacity: style.opacity.unwrap_or(DEFAULT_OPACITY),
            fill_opacity: style.fill_opacity.unwrap_or(DEFAULT_FILL_OPACITY),
            radius: style.radius.unwrap_or(DEFAULT_RADIUS),
        }
    }
}

impl Default for ResolvedStyle {
    fn default() -> Self {
        Self::resolve(&LayerStyle::default())
    }
}
