use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

/// Stored classification of an image that has not been classified yet.
pub const NONE_CLASSIFICATION: &str = "None";

/// Labels the vision model is asked to choose from.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, EnumString, EnumIter, Display, PartialEq, Eq, Hash,
)]
#[strum(serialize_all = "title_case")]
pub enum Label {
    Person,
    Animal,
    Vehicle,
    Food,
    Landscape,
    Building,
    Document,
    Product,
    Artwork,
}

impl Label {
    /// Lowercase words in model output that select this label.
    pub fn keywords(&self) -> &'static [&'static str] {
        match self {
            Label::Person => &["person", "people", "man", "woman", "child", "portrait"],
            Label::Animal => &["animal", "dog", "cat", "bird", "horse", "wildlife"],
            Label::Vehicle => &["vehicle", "car", "truck", "bicycle", "motorcycle", "boat"],
            Label::Food => &["food", "meal", "dish", "fruit", "drink"],
            Label::Landscape => &["landscape", "mountain", "beach", "forest", "sky", "nature"],
            Label::Building => &["building", "house", "architecture", "bridge", "tower"],
            Label::Document => &["document", "receipt", "invoice", "text", "screenshot"],
            Label::Product => &["product", "packaging", "device", "bottle"],
            Label::Artwork => &["artwork", "painting", "drawing", "illustration", "sculpture"],
        }
    }

    pub fn all() -> impl Iterator<Item = Label> {
        Label::iter()
    }
}

/// Convert a stored classification column into a label.
/// The sentinel and unknown values both read back as unclassified.
pub fn parse_stored(value: &str) -> Option<Label> {
    if value == NONE_CLASSIFICATION {
        return None;
    }
    value.parse().ok()
}

/// Inverse of [`parse_stored`].
pub fn to_stored(label: Option<Label>) -> String {
    label
        .map(|l| l.to_string())
        .unwrap_or_else(|| NONE_CLASSIFICATION.to_string())
}
