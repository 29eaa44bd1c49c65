//! Design-token extraction: one pre-order pass that folds every node's
//! paints, text style, auto-layout spacing, borders and effects into a
//! de-duplicated [`DesignTokenSummary`].
//!
//! Extraction never fails. Nodes with unusable values (missing colors,
//! non-finite numbers) simply contribute nothing for that value.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::workflow::types::{
    Color, DesignNode, EffectKind, GradientKind, GradientStop, LayoutMode, Measure, Paint,
    PaintKind,
};
use crate::workflow::walker::walk;

/// Text at or above this size is a heading.
pub const HEADING_MIN_FONT_SIZE: f64 = 24.0;
/// Text strictly below this size is a caption.
pub const CAPTION_MAX_FONT_SIZE: f64 = 14.0;
const DEFAULT_FONT_WEIGHT: f64 = 400.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesignTokenSummary {
    pub colors: Vec<String>,
    pub fonts: Vec<String>,
    pub gradients: Vec<String>,
    pub typography: Typography,
    pub spacing_scale: Vec<f64>,
    pub borders: Borders,
    pub effects: EffectCounts,
    pub layout: LayoutMeasurements,
}

impl DesignTokenSummary {
    /// Distinct family names out of the `fonts` descriptors.
    pub fn font_families(&self) -> Vec<String> {
        let mut seen = FirstSeen::default();
        for descriptor in &self.fonts {
            let family = descriptor
                .strip_prefix("Family: ")
                .and_then(|rest| rest.split(',').next())
                .map(str::trim)
                .unwrap_or_default();
            if !family.is_empty() {
                seen.insert(family.to_owned());
            }
        }
        seen.into_vec()
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Typography {
    pub headings: Vec<String>,
    pub body: Vec<String>,
    pub captions: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Borders {
    pub radius: Vec<f64>,
    pub widths: Vec<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectCounts {
    pub shadows: usize,
    pub blurs: usize,
}

/// Per-node measurements; duplicates are kept on purpose.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayoutMeasurements {
    pub gaps: Vec<f64>,
    pub paddings: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypographyBucket {
    Heading,
    Body,
    Caption,
}

impl TypographyBucket {
    pub fn for_font_size(size: f64) -> Self {
        if size >= HEADING_MIN_FONT_SIZE {
            Self::Heading
        } else if size < CAPTION_MAX_FONT_SIZE {
            Self::Caption
        } else {
            Self::Body
        }
    }
}

pub fn extract_design_tokens(root: Option<&DesignNode>) -> DesignTokenSummary {
    let mut acc = TokenAccumulator::default();
    walk(root, &mut |node, _| acc.visit(node));
    let summary = acc.finish();
    info!(
        colors = summary.colors.len(),
        fonts = summary.fonts.len(),
        gradients = summary.gradients.len(),
        spacing = summary.spacing_scale.len(),
        "design tokens extracted"
    );
    summary
}

#[derive(Default)]
struct TokenAccumulator {
    colors: FirstSeen,
    fonts: FirstSeen,
    gradients: FirstSeen,
    typography: Typography,
    spacing: HundredthSet,
    radius: HundredthSet,
    widths: HundredthSet,
    effects: EffectCounts,
    layout: LayoutMeasurements,
}

impl TokenAccumulator {
    fn visit(&mut self, node: &DesignNode) {
        for paint in node.visible_fills().chain(node.visible_strokes()) {
            self.record_paint(node, paint);
        }
        self.record_text_style(node);
        self.record_layout(node);
        self.record_borders(node);
        self.record_effects(node);
    }

    fn record_paint(&mut self, node: &DesignNode, paint: &Paint) {
        match paint.kind() {
            PaintKind::Solid { color, opacity } => match color {
                Some(color) => {
                    self.colors.insert(color_to_hex(*color, *opacity));
                }
                None => debug!(node = %node.id, "solid paint without usable color skipped"),
            },
            PaintKind::Gradient { kind, stops, .. } => match gradient_descriptor(*kind, stops) {
                Some(descriptor) => {
                    self.gradients.insert(descriptor);
                }
                None => debug!(node = %node.id, "gradient without usable stops skipped"),
            },
            PaintKind::Image { .. } | PaintKind::Unsupported { .. } => {}
        }
    }

    fn record_text_style(&mut self, node: &DesignNode) {
        let Some(style) = &node.style else {
            return;
        };
        let weight = style
            .font_weight()
            .filter(|value| value.is_finite())
            .unwrap_or(DEFAULT_FONT_WEIGHT);

        if let Some(family) = style
            .font_family()
            .map(str::trim)
            .filter(|family| !family.is_empty())
        {
            self.fonts.insert(format!(
                "Family: {family}, Weight: {}",
                format_number(weight)
            ));
        }

        let Some(size) = style
            .font_size()
            .filter(|size| size.is_finite() && *size > 0.0)
        else {
            return;
        };
        let line_height = style
            .line_height_px()
            .filter(|value| value.is_finite() && *value > 0.0)
            .map(|value| format!("{}px", format_number(value)))
            .unwrap_or_else(|| "auto".to_owned());
        let entry = format!(
            "{}px/{}/{}",
            format_number(size),
            format_number(weight),
            line_height
        );
        match TypographyBucket::for_font_size(size) {
            TypographyBucket::Heading => self.typography.headings.push(entry),
            TypographyBucket::Body => self.typography.body.push(entry),
            TypographyBucket::Caption => self.typography.captions.push(entry),
        }
    }

    fn record_layout(&mut self, node: &DesignNode) {
        if !node
            .layout_mode
            .as_ref()
            .is_some_and(LayoutMode::is_auto_layout)
        {
            return;
        }
        if let Some(gap) = node
            .item_spacing
            .map(Measure::get)
            .filter(|value| value.is_finite())
        {
            self.layout.gaps.push(gap);
            self.spacing.insert(gap);
        }
        for padding in node.paddings().filter(|value| value.is_finite()) {
            self.layout.paddings.push(padding);
            self.spacing.insert(padding);
        }
    }

    fn record_borders(&mut self, node: &DesignNode) {
        if let Some(radius) = node.corner_radius {
            self.radius.insert(radius.get());
        }
        for radius in node.rectangle_corner_radii.iter().flatten() {
            self.radius.insert(radius.get());
        }
        if node.visible_strokes().next().is_some() {
            if let Some(weight) = node.stroke_weight {
                self.widths.insert(weight.get());
            }
        }
    }

    fn record_effects(&mut self, node: &DesignNode) {
        for effect in node.effects.iter().filter(|effect| effect.is_visible()) {
            match effect.kind() {
                EffectKind::Shadow { .. } => self.effects.shadows += 1,
                EffectKind::Blur { .. } => self.effects.blurs += 1,
                EffectKind::Unsupported { .. } => {}
            }
        }
    }

    fn finish(self) -> DesignTokenSummary {
        DesignTokenSummary {
            colors: self.colors.into_vec(),
            fonts: self.fonts.into_vec(),
            gradients: self.gradients.into_vec(),
            typography: self.typography,
            spacing_scale: self.spacing.into_vec(),
            borders: Borders {
                radius: self.radius.into_vec(),
                widths: self.widths.into_vec(),
            },
            effects: self.effects,
            layout: self.layout,
        }
    }
}

/// Insertion-ordered set with case-insensitive membership.
#[derive(Debug, Default)]
struct FirstSeen {
    order: Vec<String>,
    keys: HashSet<String>,
}

impl FirstSeen {
    fn insert(&mut self, value: String) -> bool {
        if self.keys.insert(value.to_ascii_lowercase()) {
            self.order.push(value);
            true
        } else {
            false
        }
    }

    fn into_vec(self) -> Vec<String> {
        self.order
    }
}

/// Sorted set of positive measurements at 0.01 precision.
#[derive(Debug, Default)]
struct HundredthSet(BTreeSet<i64>);

impl HundredthSet {
    fn insert(&mut self, value: f64) {
        if value.is_finite() && value > 0.0 {
            self.0.insert((value * 100.0).round() as i64);
        }
    }

    fn into_vec(self) -> Vec<f64> {
        self.0
            .into_iter()
            .map(|hundredths| hundredths as f64 / 100.0)
            .collect()
    }
}

pub fn color_to_hex(color: Color, opacity: f64) -> String {
    let alpha = (color.a * opacity).clamp(0.0, 1.0);
    let red = channel_to_u8(color.r);
    let green = channel_to_u8(color.g);
    let blue = channel_to_u8(color.b);
    if (alpha - 1.0).abs() <= f64::EPSILON {
        format!("#{red:02X}{green:02X}{blue:02X}")
    } else {
        let a = channel_to_u8(alpha);
        format!("#{red:02X}{green:02X}{blue:02X}{a:02X}")
    }
}

fn channel_to_u8(channel: f64) -> u8 {
    (channel.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn gradient_descriptor(kind: GradientKind, stops: &[GradientStop]) -> Option<String> {
    let rendered = stops
        .iter()
        .filter_map(|stop| {
            let color = stop.color?;
            let position = if stop.position.is_finite() {
                (stop.position.clamp(0.0, 1.0) * 100.0).round() as i32
            } else {
                0
            };
            Some(format!("{} {}%", color_to_hex(color, 1.0), position))
        })
        .collect::<Vec<_>>();
    if rendered.is_empty() {
        return None;
    }
    Some(format!("{}-gradient({})", kind.label(), rendered.join(", ")))
}

fn format_number(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    if rounded.fract() == 0.0 {
        format!("{}", rounded as i64)
    } else {
        format!("{rounded:.2}")
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_owned()
    }
}
