use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Number, Value};

/// Node identity -> web-servable local path. Entries exist only for assets
/// that resolved a URL and downloaded successfully.
pub type AssetMap = BTreeMap<String, String>;

/// One element of a Figma document tree.
///
/// Strictly tree-shaped: children are owned, never shared, never cyclic.
/// Decoding is per field: a value that does not have the expected shape is
/// left in `extra` exactly as it arrived and the typed field stays empty, so
/// one malformed node never rejects the document and every node serializes
/// back with the keys and numbers it arrived with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "Map<String, Value>")]
pub struct DesignNode {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(rename = "type", skip_serializing_if = "NodeType::is_unset")]
    pub node_type: NodeType,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fills: Vec<Paint>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub strokes: Vec<Paint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stroke_weight: Option<Measure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corner_radius: Option<Measure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rectangle_corner_radii: Option<Vec<Measure>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub effects: Vec<Effect>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<TextStyle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub characters: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout_mode: Option<LayoutMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_spacing: Option<Measure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub padding_top: Option<Measure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub padding_right: Option<Measure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub padding_bottom: Option<Measure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub padding_left: Option<Measure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub absolute_bounding_box: Option<BoundingBox>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<DesignNode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_src: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_instruction: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DesignNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn visible_fills(&self) -> impl Iterator<Item = &Paint> {
        self.fills.iter().filter(|paint| paint.is_visible())
    }

    pub fn visible_strokes(&self) -> impl Iterator<Item = &Paint> {
        self.strokes.iter().filter(|paint| paint.is_visible())
    }

    pub fn has_visible_image_fill(&self) -> bool {
        self.visible_fills()
            .any(|paint| matches!(paint.kind(), PaintKind::Image { .. }))
    }

    pub fn has_visible_solid_fill(&self) -> bool {
        self.visible_fills()
            .any(|paint| matches!(paint.kind(), PaintKind::Solid { .. }))
    }

    /// Bounding box when it describes a real, finite, non-empty area.
    pub fn bounds(&self) -> Option<Rect> {
        self.absolute_bounding_box
            .map(|bounding_box| bounding_box.rect())
            .filter(Rect::is_valid)
    }

    /// Largest explicit corner radius, uniform or per-corner.
    pub fn max_corner_radius(&self) -> f64 {
        let uniform = self.corner_radius.map_or(0.0, Measure::get);
        self.rectangle_corner_radii
            .iter()
            .flatten()
            .map(|radius| radius.get())
            .fold(uniform, f64::max)
    }

    pub fn paddings(&self) -> impl Iterator<Item = f64> {
        [
            self.padding_top,
            self.padding_right,
            self.padding_bottom,
            self.padding_left,
        ]
        .into_iter()
        .flatten()
        .map(Measure::get)
    }

    /// Records where the node's image was stored and how to use it. Raw
    /// upstream values under the same keys are replaced.
    pub fn set_local_source(&mut self, public_path: String, usage_instruction: String) {
        self.extra.remove("localSrc");
        self.extra.remove("usageInstruction");
        self.local_src = Some(public_path);
        self.usage_instruction = Some(usage_instruction);
    }
}

impl From<Map<String, Value>> for DesignNode {
    fn from(mut wire: Map<String, Value>) -> Self {
        Self {
            id: take(&mut wire, "id", non_empty_text).unwrap_or_default(),
            name: take(&mut wire, "name", non_empty_text).unwrap_or_default(),
            node_type: take(&mut wire, "type", |value| {
                non_empty_text(value).map(NodeType::from)
            })
            .unwrap_or_default(),
            fills: take(&mut wire, "fills", records).unwrap_or_default(),
            strokes: take(&mut wire, "strokes", records).unwrap_or_default(),
            stroke_weight: take(&mut wire, "strokeWeight", measure),
            corner_radius: take(&mut wire, "cornerRadius", measure),
            rectangle_corner_radii: take(&mut wire, "rectangleCornerRadii", measures),
            effects: take(&mut wire, "effects", records).unwrap_or_default(),
            style: take(&mut wire, "style", |value| match value {
                Value::Object(fields) => Ok(TextStyle::from(fields)),
                other => Err(other),
            }),
            characters: take(&mut wire, "characters", text),
            layout_mode: take(&mut wire, "layoutMode", |value| {
                non_empty_text(value).map(LayoutMode::from)
            }),
            item_spacing: take(&mut wire, "itemSpacing", measure),
            padding_top: take(&mut wire, "paddingTop", measure),
            padding_right: take(&mut wire, "paddingRight", measure),
            padding_bottom: take(&mut wire, "paddingBottom", measure),
            padding_left: take(&mut wire, "paddingLeft", measure),
            absolute_bounding_box: take(&mut wire, "absoluteBoundingBox", |value| {
                BoundingBox::from_json(&value).ok_or(value)
            }),
            children: take(&mut wire, "children", records).unwrap_or_default(),
            local_src: take(&mut wire, "localSrc", text),
            usage_instruction: take(&mut wire, "usageInstruction", text),
            extra: wire,
        }
    }
}

/// Moves `key` out of `wire` when `decode` accepts its value. A rejected
/// value goes back into `wire` untouched.
fn take<T>(
    wire: &mut Map<String, Value>,
    key: &str,
    decode: impl FnOnce(Value) -> Result<T, Value>,
) -> Option<T> {
    let value = wire.remove(key)?;
    match decode(value) {
        Ok(decoded) => Some(decoded),
        Err(rejected) => {
            wire.insert(key.to_owned(), rejected);
            None
        }
    }
}

fn text(value: Value) -> Result<String, Value> {
    match value {
        Value::String(text) => Ok(text),
        other => Err(other),
    }
}

fn non_empty_text(value: Value) -> Result<String, Value> {
    match value {
        Value::String(text) if !text.is_empty() => Ok(text),
        other => Err(other),
    }
}

fn measure(value: Value) -> Result<Measure, Value> {
    Measure::from_json(&value).ok_or(value)
}

fn measures(value: Value) -> Result<Vec<Measure>, Value> {
    let decoded = value.as_array().and_then(|items| {
        items
            .iter()
            .map(Measure::from_json)
            .collect::<Option<Vec<_>>>()
    });
    decoded.ok_or(value)
}

/// Non-empty arrays made only of objects.
fn records<T: From<Map<String, Value>>>(value: Value) -> Result<Vec<T>, Value> {
    match value {
        Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_object) => {
            Ok(items
                .into_iter()
                .filter_map(|item| match item {
                    Value::Object(fields) => Some(T::from(fields)),
                    _ => None,
                })
                .collect())
        }
        other => Err(other),
    }
}

fn number_field(fields: &Map<String, Value>, key: &str) -> Option<f64> {
    fields.get(key).and_then(Value::as_f64)
}

fn text_field(fields: &Map<String, Value>, key: &str) -> Option<String> {
    fields.get(key).and_then(Value::as_str).map(str::to_owned)
}

fn visibility(fields: &Map<String, Value>) -> bool {
    fields
        .get("visible")
        .and_then(Value::as_bool)
        .unwrap_or(true)
}

/// A JSON number kept in the form it arrived in, so `16` goes back out as
/// `16` and `0.1234567` as `0.1234567`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Measure {
    Unsigned(u64),
    Signed(i64),
    Float(f64),
}

impl Measure {
    pub fn get(self) -> f64 {
        match self {
            Self::Unsigned(value) => value as f64,
            Self::Signed(value) => value as f64,
            Self::Float(value) => value,
        }
    }

    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(number) => Self::from_number(number),
            _ => None,
        }
    }

    fn from_number(number: &Number) -> Option<Self> {
        if let Some(value) = number.as_u64() {
            Some(Self::Unsigned(value))
        } else if let Some(value) = number.as_i64() {
            Some(Self::Signed(value))
        } else {
            number.as_f64().map(Self::Float)
        }
    }
}

impl From<f64> for Measure {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl Serialize for Measure {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match *self {
            Self::Unsigned(value) => serializer.serialize_u64(value),
            Self::Signed(value) => serializer.serialize_i64(value),
            Self::Float(value) => serializer.serialize_f64(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeType {
    Document,
    Canvas,
    Frame,
    Group,
    Section,
    Component,
    ComponentSet,
    Instance,
    Rectangle,
    Text,
    Vector,
    BooleanOperation,
    Star,
    Line,
    Ellipse,
    RegularPolygon,
    Slice,
    Other(String),
}

impl Default for NodeType {
    fn default() -> Self {
        Self::Other(String::new())
    }
}

impl NodeType {
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            Self::Frame
                | Self::Group
                | Self::Section
                | Self::Component
                | Self::ComponentSet
                | Self::Instance
        )
    }

    pub fn is_vector_shape(&self) -> bool {
        matches!(
            self,
            Self::Vector
                | Self::BooleanOperation
                | Self::Star
                | Self::Line
                | Self::Ellipse
                | Self::RegularPolygon
        )
    }

    fn is_unset(&self) -> bool {
        self.as_str().is_empty()
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Document => "DOCUMENT",
            Self::Canvas => "CANVAS",
            Self::Frame => "FRAME",
            Self::Group => "GROUP",
            Self::Section => "SECTION",
            Self::Component => "COMPONENT",
            Self::ComponentSet => "COMPONENT_SET",
            Self::Instance => "INSTANCE",
            Self::Rectangle => "RECTANGLE",
            Self::Text => "TEXT",
            Self::Vector => "VECTOR",
            Self::BooleanOperation => "BOOLEAN_OPERATION",
            Self::Star => "STAR",
            Self::Line => "LINE",
            Self::Ellipse => "ELLIPSE",
            Self::RegularPolygon => "REGULAR_POLYGON",
            Self::Slice => "SLICE",
            Self::Other(raw) => raw,
        }
    }
}

impl From<String> for NodeType {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "DOCUMENT" => Self::Document,
            "CANVAS" => Self::Canvas,
            "FRAME" => Self::Frame,
            "GROUP" => Self::Group,
            "SECTION" => Self::Section,
            "COMPONENT" => Self::Component,
            "COMPONENT_SET" => Self::ComponentSet,
            "INSTANCE" => Self::Instance,
            "RECTANGLE" => Self::Rectangle,
            "TEXT" => Self::Text,
            "VECTOR" => Self::Vector,
            "BOOLEAN_OPERATION" => Self::BooleanOperation,
            "STAR" => Self::Star,
            "LINE" => Self::Line,
            "ELLIPSE" => Self::Ellipse,
            "REGULAR_POLYGON" => Self::RegularPolygon,
            "SLICE" => Self::Slice,
            _ => Self::Other(raw),
        }
    }
}

impl From<NodeType> for String {
    fn from(value: NodeType) -> Self {
        value.as_str().to_owned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LayoutMode {
    None,
    Horizontal,
    Vertical,
    Other(String),
}

impl LayoutMode {
    pub fn is_auto_layout(&self) -> bool {
        matches!(self, Self::Horizontal | Self::Vertical)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::None => "NONE",
            Self::Horizontal => "HORIZONTAL",
            Self::Vertical => "VERTICAL",
            Self::Other(raw) => raw,
        }
    }
}

impl From<String> for LayoutMode {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "NONE" => Self::None,
            "HORIZONTAL" => Self::Horizontal,
            "VERTICAL" => Self::Vertical,
            _ => Self::Other(raw),
        }
    }
}

impl From<LayoutMode> for String {
    fn from(value: LayoutMode) -> Self {
        value.as_str().to_owned()
    }
}

/// `absoluteBoundingBox` as sent. Only boxes made of numeric `x`, `y`,
/// `width` and `height` (position optional) decode; read it through
/// [`BoundingBox::rect`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<Measure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<Measure>,
    pub width: Measure,
    pub height: Measure,
}

impl BoundingBox {
    pub fn rect(&self) -> Rect {
        Rect {
            x: self.x.map_or(0.0, Measure::get),
            y: self.y.map_or(0.0, Measure::get),
            width: self.width.get(),
            height: self.height.get(),
        }
    }

    fn from_json(value: &Value) -> Option<Self> {
        let fields = value.as_object()?;
        if fields
            .keys()
            .any(|key| !matches!(key.as_str(), "x" | "y" | "width" | "height"))
        {
            return None;
        }
        let position = |key: &str| match fields.get(key) {
            None => Some(None),
            Some(value) => Measure::from_json(value).map(Some),
        };
        Some(Self {
            x: position("x")?,
            y: position("y")?,
            width: Measure::from_json(fields.get("width")?)?,
            height: Measure::from_json(fields.get("height")?)?,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn is_valid(&self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
            && self.width > 0.0
            && self.height > 0.0
    }
}

/// A text node's style record. The fields token extraction reads are
/// decoded up front; the record itself is kept for serialization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextStyle {
    font_family: Option<String>,
    font_size: Option<f64>,
    font_weight: Option<f64>,
    line_height_px: Option<f64>,
    wire: Map<String, Value>,
}

impl TextStyle {
    pub fn font_family(&self) -> Option<&str> {
        self.font_family.as_deref()
    }

    pub fn font_size(&self) -> Option<f64> {
        self.font_size
    }

    pub fn font_weight(&self) -> Option<f64> {
        self.font_weight
    }

    pub fn line_height_px(&self) -> Option<f64> {
        self.line_height_px
    }
}

impl From<Map<String, Value>> for TextStyle {
    fn from(wire: Map<String, Value>) -> Self {
        Self {
            font_family: text_field(&wire, "fontFamily"),
            font_size: number_field(&wire, "fontSize"),
            font_weight: number_field(&wire, "fontWeight"),
            line_height_px: number_field(&wire, "lineHeightPx"),
            wire,
        }
    }
}

impl Serialize for TextStyle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.wire.serialize(serializer)
    }
}

/// RGBA color with channels in `0.0..=1.0`, as the Figma API sends it.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Color {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    #[serde(default = "opaque")]
    pub a: f64,
}

fn opaque() -> f64 {
    1.0
}

impl Color {
    pub fn is_valid(&self) -> bool {
        self.r.is_finite() && self.g.is_finite() && self.b.is_finite() && self.a.is_finite()
    }

    fn from_value(value: &Value) -> Option<Self> {
        Color::deserialize(value).ok().filter(Color::is_valid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradientKind {
    Linear,
    Radial,
    Angular,
    Diamond,
}

impl GradientKind {
    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "GRADIENT_LINEAR" => Some(Self::Linear),
            "GRADIENT_RADIAL" => Some(Self::Radial),
            "GRADIENT_ANGULAR" => Some(Self::Angular),
            "GRADIENT_DIAMOND" => Some(Self::Diamond),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Radial => "radial",
            Self::Angular => "angular",
            Self::Diamond => "diamond",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GradientStop {
    pub position: f64,
    pub color: Option<Color>,
}

/// What a paint is, as far as token extraction cares. Unrecognized paint
/// tags are `Unsupported` and ignored by every consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum PaintKind {
    Solid {
        color: Option<Color>,
        opacity: f64,
    },
    Gradient {
        kind: GradientKind,
        stops: Vec<GradientStop>,
        opacity: f64,
    },
    Image {
        image_ref: Option<String>,
        scale_mode: Option<String>,
    },
    Unsupported {
        paint_type: String,
    },
}

/// A fill or stroke paint: its decoded [`PaintKind`] plus the record it was
/// decoded from, which is what serializes.
#[derive(Debug, Clone, PartialEq)]
pub struct Paint {
    kind: PaintKind,
    visible: bool,
    wire: Map<String, Value>,
}

impl Paint {
    pub fn kind(&self) -> &PaintKind {
        &self.kind
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }
}

impl From<Map<String, Value>> for Paint {
    fn from(wire: Map<String, Value>) -> Self {
        let opacity = number_field(&wire, "opacity").unwrap_or(1.0);
        let paint_type = wire.get("type").and_then(Value::as_str).unwrap_or_default();
        let kind = match (GradientKind::from_tag(paint_type), paint_type) {
            (Some(kind), _) => PaintKind::Gradient {
                kind,
                stops: gradient_stops(&wire),
                opacity,
            },
            (None, "SOLID") => PaintKind::Solid {
                color: wire.get("color").and_then(Color::from_value),
                opacity,
            },
            (None, "IMAGE") => PaintKind::Image {
                image_ref: text_field(&wire, "imageRef"),
                scale_mode: text_field(&wire, "scaleMode"),
            },
            (None, other) => PaintKind::Unsupported {
                paint_type: other.to_owned(),
            },
        };
        Self {
            kind,
            visible: visibility(&wire),
            wire,
        }
    }
}

impl Serialize for Paint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.wire.serialize(serializer)
    }
}

fn gradient_stops(wire: &Map<String, Value>) -> Vec<GradientStop> {
    let Some(stops) = wire.get("gradientStops").and_then(Value::as_array) else {
        return Vec::new();
    };
    stops
        .iter()
        .map(|stop| GradientStop {
            position: stop.get("position").and_then(Value::as_f64).unwrap_or(0.0),
            color: stop.get("color").and_then(Color::from_value),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowKind {
    Drop,
    Inner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlurKind {
    Layer,
    Background,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EffectKind {
    Shadow {
        kind: ShadowKind,
        color: Option<Color>,
        radius: Option<f64>,
    },
    Blur {
        kind: BlurKind,
        radius: Option<f64>,
    },
    Unsupported {
        effect_type: String,
    },
}

/// A node effect. Only the kind and visibility drive token extraction; the
/// record it was decoded from is what serializes.
#[derive(Debug, Clone, PartialEq)]
pub struct Effect {
    kind: EffectKind,
    visible: bool,
    wire: Map<String, Value>,
}

impl Effect {
    pub fn kind(&self) -> &EffectKind {
        &self.kind
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }
}

impl From<Map<String, Value>> for Effect {
    fn from(wire: Map<String, Value>) -> Self {
        let radius = number_field(&wire, "radius");
        let shadow = |kind| EffectKind::Shadow {
            kind,
            color: wire.get("color").and_then(Color::from_value),
            radius,
        };
        let kind = match wire.get("type").and_then(Value::as_str).unwrap_or_default() {
            "DROP_SHADOW" => shadow(ShadowKind::Drop),
            "INNER_SHADOW" => shadow(ShadowKind::Inner),
            "LAYER_BLUR" => EffectKind::Blur {
                kind: BlurKind::Layer,
                radius,
            },
            "BACKGROUND_BLUR" => EffectKind::Blur {
                kind: BlurKind::Background,
                radius,
            },
            other => EffectKind::Unsupported {
                effect_type: other.to_owned(),
            },
        };
        Self {
            kind,
            visible: visibility(&wire),
            wire,
        }
    }
}

impl Serialize for Effect {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.wire.serialize(serializer)
    }
}

/// A node carrying at least one visible image fill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetTarget {
    pub id: String,
    pub name: String,
}

/// Outcome of one image-bearing node's trip through the fetcher.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRecord {
    pub node_id: String,
    pub node_name: String,
    pub download_url: Option<String>,
    pub byte_len: Option<usize>,
    pub sha256: Option<String>,
    pub file_path: Option<PathBuf>,
    pub public_path: Option<String>,
}

impl AssetRecord {
    pub fn pending(target: &AssetTarget, download_url: Option<String>) -> Self {
        Self {
            node_id: target.id.clone(),
            node_name: target.name.clone(),
            download_url,
            byte_len: None,
            sha256: None,
            file_path: None,
            public_path: None,
        }
    }

    pub fn is_stored(&self) -> bool {
        self.public_path.is_some()
    }
}

/// Whole-frame raster accepted by scale negotiation.
#[derive(Debug, Clone)]
pub struct FrameRender {
    pub node_id: String,
    pub scale: f32,
    pub bytes: Vec<u8>,
}

impl FrameRender {
    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }
}
