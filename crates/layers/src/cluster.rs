//! Cluster marker icons.
//!
//! Icons come from the closed `ClusterIconPreset` vocabulary and the number
//! of markers in the cluster. Nothing here evaluates backend-provided code.

use formats::ClusterIconPreset;

use crate::popup::escape_html;

pub const MEDIUM_CLUSTER_MIN: usize = 10;
pub const LARGE_CLUSTER_MIN: usize = 100;
pub const DEFAULT_ICON_SIZE_PX: u32 = 40;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClusterTier {
    Small,
    Medium,
    Large,
}

impl ClusterTier {
    pub fn for_count(count: usize) -> Self {
        if count < MEDIUM_CLUSTER_MIN {
            ClusterTier::Small
        } else if count < LARGE_CLUSTER_MIN {
            ClusterTier::Medium
        } else {
            ClusterTier::Large
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ClusterTier::Small => "small",
            ClusterTier::Medium => "medium",
            ClusterTier::Large => "large",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterIcon {
    pub html: String,
    pub class_name: String,
    pub size_px: u32,
}

pub fn cluster_icon(preset: &ClusterIconPreset, count: usize) -> ClusterIcon {
    let tier = ClusterTier::for_count(count);
    match preset {
        ClusterIconPreset::Default => ClusterIcon {
            html: format!("<div><span>{count}</span></div>"),
            class_name: format!("marker-cluster marker-cluster-{}", tier.as_str()),
            size_px: DEFAULT_ICON_SIZE_PX,
        },
        ClusterIconPreset::Circle { color, size } => ClusterIcon {
            html: format!(
                "<div style=\"background-color:{color};width:{size}px;height:{size}px;\
                 line-height:{size}px;border-radius:50%;text-align:center\"><span>{count}</span></div>",
                color = escape_html(color),
            ),
            class_name: format!("marker-cluster-custom marker-cluster-{}", tier.as_str()),
            size_px: *size,
        },
        ClusterIconPreset::Badge {
            background,
            text_color,
        } => {
            let size_px = match tier {
                ClusterTier::Small => 30,
                ClusterTier::Medium => 40,
                ClusterTier::Large => 50,
            };
            ClusterIcon {
                html: format!(
                    "<div style=\"background:{};color:{}\"><span>{count}</span></div>",
                    escape_html(background),
                    escape_html(text_color),
                ),
                class_name: format!("marker-cluster-badge marker-cluster-{}", tier.as_str()),
                size_px,
            }
        }
    }
}
