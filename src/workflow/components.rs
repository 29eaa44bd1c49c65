//! Heuristic UI component inventory.
//!
//! Each category is an independent predicate over a visited node, so one
//! node may count toward several categories. Results are deterministic for
//! a given tree; accuracy is best effort. Size-dependent predicates never
//! match a node without a valid bounding box.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::workflow::types::{DesignNode, LayoutMode, NodeType};
use crate::workflow::walker::{any_descendant, walk, VisitContext};

/// Tunable parameters of the shape heuristics.
pub mod thresholds {
    pub const BUTTON_MIN_WIDTH: f64 = 24.0;
    pub const BUTTON_MAX_WIDTH: f64 = 400.0;
    pub const BUTTON_MIN_HEIGHT: f64 = 20.0;
    pub const BUTTON_MAX_HEIGHT: f64 = 80.0;
    pub const BUTTON_MAX_CHILDREN: usize = 3;

    pub const CARD_MIN_CORNER_RADIUS: f64 = 4.0;

    pub const NAV_MAX_DEPTH: usize = 2;
    pub const NAV_MIN_WIDTH: f64 = 600.0;
    pub const NAV_MAX_HEIGHT: f64 = 120.0;
    pub const NAV_MIN_ASPECT_RATIO: f64 = 4.0;
    pub const NAV_MIN_ITEMS: usize = 3;

    pub const INPUT_MIN_WIDTH: f64 = 120.0;
    pub const INPUT_MIN_HEIGHT: f64 = 24.0;
    pub const INPUT_MAX_HEIGHT: f64 = 64.0;

    pub const ICON_MAX_SIZE: f64 = 48.0;
}

use thresholds::*;

const BUTTON_NAME_HINTS: &[&str] = &["button", "btn", "cta"];
const INPUT_NAME_HINTS: &[&str] = &["input", "field", "textbox", "textarea", "search"];
const FORM_NAME_HINTS: &[&str] = &["form"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Button,
    Card,
    Navigation,
    Form,
    Icon,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 5] = [
        ComponentKind::Button,
        ComponentKind::Card,
        ComponentKind::Navigation,
        ComponentKind::Form,
        ComponentKind::Icon,
    ];

    fn matches(self, node: &DesignNode, context: VisitContext<'_>) -> bool {
        match self {
            Self::Button => looks_like_button(node),
            Self::Card => looks_like_card(node),
            Self::Navigation => looks_like_navigation(node, context.depth),
            Self::Form => looks_like_form(node),
            Self::Icon => looks_like_icon(node),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentCounts {
    pub button_count: usize,
    pub card_count: usize,
    pub navigation_count: usize,
    pub form_count: usize,
    pub icon_count: usize,
}

impl ComponentCounts {
    pub fn get(&self, kind: ComponentKind) -> usize {
        match kind {
            ComponentKind::Button => self.button_count,
            ComponentKind::Card => self.card_count,
            ComponentKind::Navigation => self.navigation_count,
            ComponentKind::Form => self.form_count,
            ComponentKind::Icon => self.icon_count,
        }
    }

    fn bump(&mut self, kind: ComponentKind) {
        let slot = match kind {
            ComponentKind::Button => &mut self.button_count,
            ComponentKind::Card => &mut self.card_count,
            ComponentKind::Navigation => &mut self.navigation_count,
            ComponentKind::Form => &mut self.form_count,
            ComponentKind::Icon => &mut self.icon_count,
        };
        *slot += 1;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentDetectionSummary {
    pub summary: ComponentCounts,
    /// Matched node ids per category, in traversal order.
    pub matches: BTreeMap<ComponentKind, Vec<String>>,
}

pub fn detect_components(root: Option<&DesignNode>) -> ComponentDetectionSummary {
    let mut result = ComponentDetectionSummary::default();
    walk(root, &mut |node, context| {
        for kind in ComponentKind::ALL {
            if kind.matches(node, context) {
                debug!(node = %node.id, name = %node.name, ?kind, "component candidate");
                result.summary.bump(kind);
                result.matches.entry(kind).or_default().push(node.id.clone());
            }
        }
    });
    info!(
        buttons = result.summary.button_count,
        cards = result.summary.card_count,
        navigation = result.summary.navigation_count,
        forms = result.summary.form_count,
        icons = result.summary.icon_count,
        "components detected"
    );
    result
}

fn looks_like_button(node: &DesignNode) -> bool {
    let shaped_like_control = node.node_type.is_container()
        || (node.node_type == NodeType::Rectangle && !node.is_leaf());
    if !shaped_like_control {
        return false;
    }
    let Some(bounds) = node.bounds() else {
        return false;
    };
    if !(BUTTON_MIN_WIDTH..=BUTTON_MAX_WIDTH).contains(&bounds.width)
        || !(BUTTON_MIN_HEIGHT..=BUTTON_MAX_HEIGHT).contains(&bounds.height)
    {
        return false;
    }
    let text_children = node
        .children
        .iter()
        .filter(|child| child.node_type == NodeType::Text)
        .count();
    if text_children != 1 || node.children.len() > BUTTON_MAX_CHILDREN {
        return false;
    }
    let painted = node.has_visible_solid_fill() || node.visible_strokes().next().is_some();
    painted && (name_has_hint(&node.name, BUTTON_NAME_HINTS) || node.max_corner_radius() > 0.0)
}

fn looks_like_card(node: &DesignNode) -> bool {
    if !node.node_type.is_container() || node.children.len() < 2 {
        return false;
    }
    let has_surface =
        node.visible_fills().next().is_some() || node.visible_strokes().next().is_some();
    if !has_surface || node.max_corner_radius() < CARD_MIN_CORNER_RADIUS {
        return false;
    }
    any_descendant(node, |candidate| candidate.node_type == NodeType::Text)
        && any_descendant(node, |candidate| {
            candidate.has_visible_image_fill() || candidate.node_type.is_vector_shape()
        })
}

fn looks_like_navigation(node: &DesignNode, depth: usize) -> bool {
    if depth > NAV_MAX_DEPTH || node.layout_mode != Some(LayoutMode::Horizontal) {
        return false;
    }
    let Some(bounds) = node.bounds() else {
        return false;
    };
    if bounds.width < NAV_MIN_WIDTH
        || bounds.height > NAV_MAX_HEIGHT
        || bounds.width / bounds.height < NAV_MIN_ASPECT_RATIO
    {
        return false;
    }
    let items = node
        .children
        .iter()
        .filter(|child| child.node_type == NodeType::Text || looks_like_icon(child))
        .count();
    items >= NAV_MIN_ITEMS
}

fn looks_like_form(node: &DesignNode) -> bool {
    if !node.node_type.is_container() || node.is_leaf() {
        return false;
    }
    name_has_hint(&node.name, FORM_NAME_HINTS) || node.children.iter().any(looks_like_input)
}

fn looks_like_input(node: &DesignNode) -> bool {
    if name_has_hint(&node.name, INPUT_NAME_HINTS) {
        return true;
    }
    let input_shaped = matches!(
        node.node_type,
        NodeType::Rectangle | NodeType::Frame | NodeType::Instance
    ) && node.children.len() <= 1;
    if !input_shaped {
        return false;
    }
    let Some(bounds) = node.bounds() else {
        return false;
    };
    bounds.width >= INPUT_MIN_WIDTH
        && (INPUT_MIN_HEIGHT..=INPUT_MAX_HEIGHT).contains(&bounds.height)
        && node.visible_strokes().next().is_some()
        && node.visible_fills().next().is_none()
}

fn looks_like_icon(node: &DesignNode) -> bool {
    if !node.node_type.is_vector_shape() || !node.is_leaf() {
        return false;
    }
    node.bounds()
        .is_some_and(|bounds| bounds.width <= ICON_MAX_SIZE && bounds.height <= ICON_MAX_SIZE)
}

fn name_has_hint(name: &str, hints: &[&str]) -> bool {
    let lower = name.to_lowercase();
    hints.iter().any(|hint| lower.contains(hint))
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{detect_components, ComponentCounts, ComponentKind};
    use crate::workflow::types::DesignNode;

    fn decode(value: Value) -> DesignNode {
        serde_json::from_value(value).expect("fixture should decode")
    }

    fn bbox(width: f64, height: f64) -> Value {
        json!({"x": 0, "y": 0, "width": width, "height": height})
    }

    fn text(id: &str) -> Value {
        json!({"id": id, "type": "TEXT", "characters": "Label", "style": {"fontSize": 14}})
    }

    fn solid() -> Value {
        json!([{"type": "SOLID", "color": {"r": 0.1, "g": 0.3, "b": 0.9}}])
    }

    #[test]
    fn rounded_single_label_frame_is_a_button() {
        let root = decode(json!({
            "id": "1:1", "name": "Primary", "type": "FRAME",
            "cornerRadius": 8, "fills": solid(),
            "absoluteBoundingBox": bbox(120.0, 40.0),
            "children": [text("1:2")]
        }));
        let result = detect_components(Some(&root));
        assert_eq!(result.summary.button_count, 1);
        assert_eq!(result.matches[&ComponentKind::Button], vec!["1:1"]);
    }

    #[test]
    fn button_without_geometry_is_not_matched() {
        let root = decode(json!({
            "id": "1:1", "name": "Button", "type": "FRAME",
            "cornerRadius": 8, "fills": solid(),
            "children": [text("1:2")]
        }));
        assert_eq!(detect_components(Some(&root)).summary.button_count, 0);
    }

    #[test]
    fn rounded_container_with_text_and_image_is_a_card() {
        let root = decode(json!({
            "id": "2:1", "type": "FRAME", "cornerRadius": 12, "fills": solid(),
            "children": [
                {"id": "2:2", "type": "RECTANGLE", "fills": [{"type": "IMAGE", "imageRef": "a"}]},
                text("2:3"),
                text("2:4")
            ]
        }));
        let result = detect_components(Some(&root));
        assert_eq!(result.summary.card_count, 1);
        assert_eq!(result.summary.button_count, 0);
    }

    #[test]
    fn wide_short_horizontal_row_near_top_is_navigation() {
        let nav = json!({
            "id": "3:2", "type": "FRAME", "layoutMode": "HORIZONTAL",
            "absoluteBoundingBox": bbox(1200.0, 64.0),
            "children": [text("3:3"), text("3:4"),
                {"id": "3:5", "type": "VECTOR", "absoluteBoundingBox": bbox(24.0, 24.0)}]
        });
        let shallow = decode(json!({"id": "3:1", "type": "FRAME", "children": [nav.clone()]}));
        let result = detect_components(Some(&shallow));
        assert_eq!(result.summary.navigation_count, 1);
        assert_eq!(result.summary.icon_count, 1);

        let deep = decode(json!({"id": "a", "type": "FRAME", "children": [
            {"id": "b", "type": "FRAME", "children": [
                {"id": "c", "type": "FRAME", "children": [nav]}
            ]}
        ]}));
        assert_eq!(detect_components(Some(&deep)).summary.navigation_count, 0);
    }

    #[test]
    fn stroke_only_field_marks_its_parent_as_form() {
        let root = decode(json!({
            "id": "4:1", "type": "FRAME", "name": "Signup",
            "children": [{
                "id": "4:2", "type": "RECTANGLE",
                "absoluteBoundingBox": bbox(280.0, 40.0),
                "strokes": [{"type": "SOLID", "color": {"r": 0.8, "g": 0.8, "b": 0.8}}]
            }]
        }));
        assert_eq!(detect_components(Some(&root)).summary.form_count, 1);

        let named = decode(json!({
            "id": "4:3", "type": "GROUP", "name": "Contact",
            "children": [{"id": "4:4", "type": "INSTANCE", "name": "Email Input"}]
        }));
        assert_eq!(detect_components(Some(&named)).summary.form_count, 1);
    }

    #[test]
    fn large_vectors_are_not_icons() {
        let root = decode(json!({
            "id": "5:1", "type": "FRAME",
            "children": [
                {"id": "5:2", "type": "VECTOR", "absoluteBoundingBox": bbox(16.0, 16.0)},
                {"id": "5:3", "type": "VECTOR", "absoluteBoundingBox": bbox(300.0, 120.0)},
                {"id": "5:4", "type": "VECTOR"}
            ]
        }));
        let result = detect_components(Some(&root));
        assert_eq!(result.summary.icon_count, 1);
        assert_eq!(result.matches[&ComponentKind::Icon], vec!["5:2"]);
    }

    #[test]
    fn detection_is_deterministic_and_total() {
        let root = decode(json!({
            "id": "6:1", "type": "FRAME",
            "absoluteBoundingBox": {"x": 0, "y": 0, "width": -5, "height": 0},
            "children": [text("6:2")]
        }));
        assert_eq!(detect_components(Some(&root)), detect_components(Some(&root)));
        assert_eq!(detect_components(None).summary, ComponentCounts::default());
    }
}
