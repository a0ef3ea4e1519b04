//! Project parameters, the field catalogue, and the parameter store.
//!
//! [`ParamField`] is the single source for each field's label, allowed
//! values and input kind. The index page, the edit flow, the terminal chat
//! and the prompt all read it from here.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::constants::NO_SPECIAL_REQUIREMENTS;
use crate::error::ValidationError;

const CONSTRUCTION_TYPES: &[&str] = &["Steel Frame", "Concrete Frame", "Wood Frame", "Hybrid"];
const STORIES: &[&str] = &["1", "2", "3", "4", "5+"];
const HOUSE_TYPES: &[&str] = &["Residential", "Commercial", "Industrial", "Warehouse"];
const FOUNDATION_TYPES: &[&str] = &[
    "Slab-on-Grade",
    "T-Shaped",
    "Basement",
    "Crawl Space",
    "Pile Foundation",
];
const ROOF_TYPES: &[&str] = &["Gable", "Hip", "Shed", "Gambrel", "Flat", "Truss System"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParamField {
    PlotSize,
    ConstructionType,
    Stories,
    HouseType,
    FoundationType,
    RoofType,
    SpecialRequirements,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    Number,
    Select,
    Text,
}

/// Serializable view of one catalogue entry, handed to templates and the API.
#[derive(Debug, Clone, Serialize)]
pub struct FieldDescriptor {
    pub key: &'static str,
    pub label: &'static str,
    pub input: InputKind,
    pub options: &'static [&'static str],
    pub required: bool,
}

impl ParamField {
    pub const ALL: [ParamField; 7] = [
        ParamField::PlotSize,
        ParamField::ConstructionType,
        ParamField::Stories,
        ParamField::HouseType,
        ParamField::FoundationType,
        ParamField::RoofType,
        ParamField::SpecialRequirements,
    ];

    pub fn key(self) -> &'static str {
        match self {
            ParamField::PlotSize => "plotSize",
            ParamField::ConstructionType => "constructionType",
            ParamField::Stories => "stories",
            ParamField::HouseType => "houseType",
            ParamField::FoundationType => "foundationType",
            ParamField::RoofType => "roofType",
            ParamField::SpecialRequirements => "specialRequirements",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ParamField::PlotSize => "Plot Size",
            ParamField::ConstructionType => "Construction Type",
            ParamField::Stories => "Number of Stories",
            ParamField::HouseType => "Building Type",
            ParamField::FoundationType => "Foundation Type",
            ParamField::RoofType => "Roof Type",
            ParamField::SpecialRequirements => "Special Requirements",
        }
    }

    pub fn input_kind(self) -> InputKind {
        match self {
            ParamField::PlotSize => InputKind::Number,
            ParamField::SpecialRequirements => InputKind::Text,
            _ => InputKind::Select,
        }
    }

    /// Allowed values for select fields; empty for free-form fields.
    pub fn options(self) -> &'static [&'static str] {
        match self {
            ParamField::ConstructionType => CONSTRUCTION_TYPES,
            ParamField::Stories => STORIES,
            ParamField::HouseType => HOUSE_TYPES,
            ParamField::FoundationType => FOUNDATION_TYPES,
            ParamField::RoofType => ROOF_TYPES,
            ParamField::PlotSize | ParamField::SpecialRequirements => &[],
        }
    }

    pub fn is_required(self) -> bool {
        self != ParamField::SpecialRequirements
    }

    pub fn descriptor(self) -> FieldDescriptor {
        FieldDescriptor {
            key: self.key(),
            label: self.label(),
            input: self.input_kind(),
            options: self.options(),
            required: self.is_required(),
        }
    }

    /// Checks and normalizes a raw input value for this field.
    ///
    /// Returns `Ok(None)` for a blank value on a required field, which callers
    /// treat as "nothing to do". A blank special-requirements value becomes the
    /// `"None"` sentinel.
    pub fn normalize(self, raw: &str) -> Result<Option<String>, ValidationError> {
        let value = raw.trim();
        match self.input_kind() {
            InputKind::Text => {
                if value.is_empty() {
                    Ok(Some(NO_SPECIAL_REQUIREMENTS.to_string()))
                } else {
                    Ok(Some(value.to_string()))
                }
            }
            _ if value.is_empty() => Ok(None),
            InputKind::Number => parse_plot_size(value).map(|size| Some(size.to_string())),
            InputKind::Select => {
                if self.options().contains(&value) {
                    Ok(Some(value.to_string()))
                } else {
                    Err(ValidationError::single(
                        self.key(),
                        format!("{} must be one of: {}", self.label(), self.options().join(", ")),
                    ))
                }
            }
        }
    }
}

impl fmt::Display for ParamField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ParamField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ParamField::ALL
            .into_iter()
            .find(|field| field.key() == s)
            .ok_or_else(|| format!("unknown parameter '{}'", s))
    }
}

fn parse_plot_size(value: &str) -> Result<u32, ValidationError> {
    match value.parse::<u32>() {
        Ok(size) if size > 0 => Ok(size),
        _ => Err(ValidationError::single(
            ParamField::PlotSize.key(),
            "Plot Size must be a positive whole number",
        )),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectParameters {
    pub plot_size: u32,
    pub construction_type: String,
    pub stories: String,
    pub house_type: String,
    pub foundation_type: String,
    pub roof_type: String,
    pub special_requirements: String,
}

impl ProjectParameters {
    fn blank() -> Self {
        Self {
            plot_size: 0,
            construction_type: String::new(),
            stories: String::new(),
            house_type: String::new(),
            foundation_type: String::new(),
            roof_type: String::new(),
            special_requirements: NO_SPECIAL_REQUIREMENTS.to_string(),
        }
    }

    pub fn get(&self, field: ParamField) -> String {
        match field {
            ParamField::PlotSize => self.plot_size.to_string(),
            ParamField::ConstructionType => self.construction_type.clone(),
            ParamField::Stories => self.stories.clone(),
            ParamField::HouseType => self.house_type.clone(),
            ParamField::FoundationType => self.foundation_type.clone(),
            ParamField::RoofType => self.roof_type.clone(),
            ParamField::SpecialRequirements => self.special_requirements.clone(),
        }
    }

    // `value` must already be normalized for `field`.
    fn set_normalized(&mut self, field: ParamField, value: String) -> Result<(), ValidationError> {
        match field {
            ParamField::PlotSize => self.plot_size = parse_plot_size(&value)?,
            ParamField::ConstructionType => self.construction_type = value,
            ParamField::Stories => self.stories = value,
            ParamField::HouseType => self.house_type = value,
            ParamField::FoundationType => self.foundation_type = value,
            ParamField::RoofType => self.roof_type = value,
            ParamField::SpecialRequirements => self.special_requirements = value,
        }
        Ok(())
    }

    /// Display value used in the parameters panel.
    pub fn display_value(&self, field: ParamField) -> String {
        match field {
            ParamField::PlotSize => format!("{} sq ft", self.plot_size),
            _ => self.get(field),
        }
    }
}

/// A single applied edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParameterChange {
    pub field: ParamField,
    pub value: String,
}

impl ParameterChange {
    /// The assistant message announcing the change in the transcript.
    pub fn notification(&self) -> String {
        format!(
            "I've updated your {} to: {}. This change will be considered in all future responses.",
            self.field.label(),
            self.value
        )
    }
}

#[derive(Debug, Clone)]
pub struct ParameterStore {
    params: ProjectParameters,
}

impl ParameterStore {
    pub fn new(initial: ProjectParameters) -> Self {
        Self { params: initial }
    }

    pub fn set(&mut self, initial: ProjectParameters) {
        self.params = initial;
    }

    pub fn get(&self, field: ParamField) -> String {
        self.params.get(field)
    }

    pub fn params(&self) -> &ProjectParameters {
        &self.params
    }

    /// Replaces one field. Blank or unchanged values are a no-op and return
    /// `Ok(None)`; invalid values are rejected without touching the store.
    pub fn update(
        &mut self,
        field: ParamField,
        raw: &str,
    ) -> Result<Option<ParameterChange>, ValidationError> {
        let Some(value) = field.normalize(raw)? else {
            return Ok(None);
        };
        if value == self.params.get(field) {
            return Ok(None);
        }
        self.params.set_normalized(field, value.clone())?;
        Ok(Some(ParameterChange { field, value }))
    }
}

/// Raw form submission. Every field is optional so missing ones can be
/// reported together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectForm {
    #[serde(deserialize_with = "string_or_number")]
    pub plot_size: Option<String>,
    pub construction_type: Option<String>,
    #[serde(deserialize_with = "string_or_number")]
    pub stories: Option<String>,
    pub house_type: Option<String>,
    pub foundation_type: Option<String>,
    pub roof_type: Option<String>,
    pub special_requirements: Option<String>,
    pub first_query: Option<String>,
}

/// Result of a successful form submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedForm {
    pub params: ProjectParameters,
    pub first_query: String,
}

impl ProjectForm {
    fn raw(&self, field: ParamField) -> Option<&str> {
        let value = match field {
            ParamField::PlotSize => &self.plot_size,
            ParamField::ConstructionType => &self.construction_type,
            ParamField::Stories => &self.stories,
            ParamField::HouseType => &self.house_type,
            ParamField::FoundationType => &self.foundation_type,
            ParamField::RoofType => &self.roof_type,
            ParamField::SpecialRequirements => &self.special_requirements,
        };
        value.as_deref()
    }

    pub fn validate(&self) -> Result<ValidatedForm, ValidationError> {
        let mut errors = ValidationError::new();
        let mut params = ProjectParameters::blank();

        for field in ParamField::ALL {
            let normalized = field
                .normalize(self.raw(field).unwrap_or_default())
                .and_then(|value| match value {
                    Some(value) => params.set_normalized(field, value).map(|_| true),
                    None => Ok(false),
                });
            match normalized {
                Ok(true) => {}
                Ok(false) => errors.add(field.key(), format!("{} is required", field.label())),
                Err(err) => errors.errors.extend(err.errors),
            }
        }

        let first_query = self.first_query.as_deref().unwrap_or_default().trim();
        if first_query.is_empty() {
            errors.add("firstQuery", "First Question is required");
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(ValidatedForm {
            params,
            first_query: first_query.to_string(),
        })
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Text(text) => text,
        Raw::Number(number) => number.to_string(),
    }))
}
