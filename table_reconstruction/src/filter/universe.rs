use std::sync::OnceLock;

use cube_types::{AttributeElement, DatasetDefinition, ObjectInfo};
use tracing::debug;

use crate::error::{Result, TableReconstructionError};

/// Length of a server object id.
pub const OBJECT_ID_LEN: usize = 32;

/// Separates an attribute id from an explicit form id: `attributeId;formId`.
pub const FORM_SEPARATOR: char = ';';

/// Separates the owning attribute id from the value in element ids: `attributeId:value`.
pub const ELEMENT_SEPARATOR: char = ':';

/// Metrics named `Row Count - <table>` count the rows of a source table.
pub const ROW_COUNT_METRIC_PREFIX: &str = "Row Count - ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniverseAttribute {
    pub id: String,
    pub name: String,
    /// May be empty when the dataset definition does not list forms.
    pub forms: Vec<ObjectInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SelectorKind {
    Attribute,
    Metric,
    Element,
}

/// A user-supplied id after validation against the universe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedSelector {
    pub kind: SelectorKind,
    /// Attribute or metric id without form suffix, or the full element id.
    pub id: String,
    pub form_id: Option<String>,
    /// Set for elements only.
    pub owning_attribute_id: Option<String>,
}

/// The elements of one attribute, as loaded from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeElements {
    pub attribute_id: String,
    pub elements: Vec<AttributeElement>,
}

/// The selectable objects of a dataset. Attribute elements are attached once, when loaded.
#[derive(Debug, Default)]
pub struct FilterUniverse {
    attributes: Vec<UniverseAttribute>,
    metrics: Vec<ObjectInfo>,
    row_count_metrics: Vec<ObjectInfo>,
    elements: OnceLock<Vec<AttributeElements>>,
}

impl FilterUniverse {
    pub fn new(attributes: Vec<UniverseAttribute>, metrics: Vec<ObjectInfo>) -> Self {
        Self {
            attributes,
            metrics,
            ..Default::default()
        }
    }

    /// Builds the universe of a dataset. Metrics named after one of `table_names` with
    /// the row-count prefix are kept apart from the regular metrics.
    pub fn from_definition(definition: &DatasetDefinition, table_names: &[String]) -> Self {
        let attributes = definition
            .available_objects
            .attributes
            .iter()
            .map(|a| UniverseAttribute {
                id: a.id.clone(),
                name: a.name.clone(),
                forms: a.forms.clone(),
            })
            .collect();

        let (row_count_metrics, metrics): (Vec<_>, Vec<_>) =
            definition.available_objects.metrics.iter().cloned().partition(|m| {
                m.name
                    .strip_prefix(ROW_COUNT_METRIC_PREFIX)
                    .is_some_and(|table| table_names.iter().any(|t| t == table))
            });

        debug!(
            dataset_id = %definition.id,
            metrics = metrics.len(),
            row_count_metrics = row_count_metrics.len(),
            "Built filter universe"
        );

        Self {
            attributes,
            metrics,
            row_count_metrics,
            elements: OnceLock::new(),
        }
    }

    pub fn attributes(&self) -> &[UniverseAttribute] {
        &self.attributes
    }

    pub fn metrics(&self) -> &[ObjectInfo] {
        &self.metrics
    }

    pub fn row_count_metrics(&self) -> &[ObjectInfo] {
        &self.row_count_metrics
    }

    pub fn attribute(&self, id: &str) -> Option<&UniverseAttribute> {
        self.attributes.iter().find(|a| a.id == id)
    }

    pub fn is_metric(&self, id: &str) -> bool {
        self.metrics.iter().chain(&self.row_count_metrics).any(|m| m.id == id)
    }

    pub fn elements(&self) -> Option<&[AttributeElements]> {
        self.elements.get().map(Vec::as_slice)
    }

    /// Attaches loaded elements. Returns false, leaving the universe unchanged, if elements were already set.
    pub fn set_elements(&self, elements: Vec<AttributeElements>) -> bool {
        self.elements.set(elements).is_ok()
    }

    /// Resolves an attribute id (optionally `attributeId;formId`) or a metric id.
    pub fn resolve(&self, raw: &str) -> Result<ResolvedSelector> {
        let invalid = || TableReconstructionError::InvalidObjectId(raw.to_owned());

        let (base, form_id) = match (raw.get(..OBJECT_ID_LEN), raw.get(OBJECT_ID_LEN..)) {
            (Some(base), Some(rest)) if rest.starts_with(FORM_SEPARATOR) => {
                let form = &rest[FORM_SEPARATOR.len_utf8()..];
                if form.is_empty() {
                    return Err(invalid());
                }
                (base, Some(form))
            },
            _ => (raw, None),
        };

        if let Some(attribute) = self.attribute(base) {
            if let Some(form) = form_id
                && !attribute.forms.is_empty()
                && !attribute.forms.iter().any(|f| f.id == form)
            {
                return Err(invalid());
            }
            return Ok(ResolvedSelector {
                kind: SelectorKind::Attribute,
                id: base.to_owned(),
                form_id: form_id.map(str::to_owned),
                owning_attribute_id: None,
            });
        }

        if form_id.is_none() && self.is_metric(base) {
            return Ok(ResolvedSelector {
                kind: SelectorKind::Metric,
                id: base.to_owned(),
                form_id: None,
                owning_attribute_id: None,
            });
        }

        Err(invalid())
    }

    /// Resolves an element id of the form `attributeId:value`.
    pub fn resolve_element(&self, raw: &str) -> Result<ResolvedSelector> {
        let Some((attribute_id, _value)) = raw.split_once(ELEMENT_SEPARATOR) else {
            return Err(TableReconstructionError::InvalidObjectId(raw.to_owned()));
        };

        if self.attribute(attribute_id).is_none() {
            return Err(TableReconstructionError::InvalidObjectId(raw.to_owned()));
        }

        Ok(ResolvedSelector {
            kind: SelectorKind::Element,
            id: raw.to_owned(),
            form_id: None,
            owning_attribute_id: Some(attribute_id.to_owned()),
        })
    }
}

#[cfg(test)]
mod tests {
    use cube_types::{AttributeDefinition, AvailableObjects};

    use super::*;

    const REGION: &str = "8D679D3711D3E4981000E787EC6DE8A4";
    const REVENUE: &str = "4C05177011D3E877C000B3B2D86C964F";
    const ROWS_SALES: &str = "7E3B6F1C4A2D4E8F9B0C1D2E3F405162";

    fn universe() -> FilterUniverse {
        let definition = DatasetDefinition {
            id: "CUBE".into(),
            name: "Sales".into(),
            available_objects: AvailableObjects {
                attributes: vec![AttributeDefinition {
                    id: REGION.into(),
                    name: "Region".into(),
                    forms: vec![ObjectInfo {
                        id: "45C11FA478E745FEA08D781CEA190FE5".into(),
                        name: "DESC".into(),
                    }],
                }],
                metrics: vec![
                    ObjectInfo {
                        id: REVENUE.into(),
                        name: "Revenue".into(),
                    },
                    ObjectInfo {
                        id: ROWS_SALES.into(),
                        name: "Row Count - sales".into(),
                    },
                ],
            },
        };
        FilterUniverse::from_definition(&definition, &["sales".to_owned()])
    }

    #[test]
    fn test_row_count_metrics_kept_apart() {
        let u = universe();
        assert_eq!(u.metrics().len(), 1);
        assert_eq!(u.row_count_metrics()[0].id, ROWS_SALES);
        assert!(u.is_metric(ROWS_SALES));
    }

    #[test]
    fn test_resolve_attribute_with_form() {
        let u = universe();
        let s = u.resolve(&format!("{REGION};45C11FA478E745FEA08D781CEA190FE5")).unwrap();
        assert_eq!(s.kind, SelectorKind::Attribute);
        assert_eq!(s.id, REGION);
        assert_eq!(s.form_id.as_deref(), Some("45C11FA478E745FEA08D781CEA190FE5"));

        assert!(matches!(
            u.resolve(&format!("{REGION};0000")),
            Err(TableReconstructionError::InvalidObjectId(_))
        ));
        assert!(u.resolve(&format!("{REGION};")).is_err());
    }

    #[test]
    fn test_resolve_metric_and_unknown() {
        let u = universe();
        assert_eq!(u.resolve(REVENUE).unwrap().kind, SelectorKind::Metric);
        assert!(u.resolve(&format!("{REVENUE};X")).is_err());

        let err = u.resolve("DEADBEEF").unwrap_err();
        assert_eq!(err.to_string(), "Invalid object ID: 'DEADBEEF'");
    }

    #[test]
    fn test_resolve_element() {
        let u = universe();
        let s = u.resolve_element(&format!("{REGION}:North")).unwrap();
        assert_eq!(s.owning_attribute_id.as_deref(), Some(REGION));
        assert!(u.resolve_element("UNKNOWN:North").is_err());
        assert!(u.resolve_element(REGION).is_err());
    }

    #[test]
    fn test_elements_are_set_once() {
        let u = universe();
        assert!(u.elements().is_none());
        assert!(u.set_elements(vec![]));
        assert!(!u.set_elements(vec![AttributeElements {
            attribute_id: REGION.into(),
            elements: vec![],
        }]));
        assert_eq!(u.elements().map(|e| e.len()), Some(0));
    }
}
