use tracing::warn;

use super::request::{RequestBody, RequestedAttribute, RequestedObject, RequestedObjects, ViewFilter};
use super::universe::{FilterUniverse, ResolvedSelector, SelectorKind};
use crate::error::Result;

/// How the selected elements restrict the rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ElementOperator {
    #[default]
    In,
    NotIn,
}

impl ElementOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementOperator::In => "In",
            ElementOperator::NotIn => "NotIn",
        }
    }
}

/// A non-fatal problem found while selecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionWarning {
    /// The id was already selected and was skipped.
    Duplicate(String),
}

/// The attributes, metrics and elements chosen from a `FilterUniverse`, in selection order.
///
/// `revision` increases with every change, so holders of server state built from an
/// earlier selection can tell it is out of date.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    attributes: Option<Vec<ResolvedSelector>>,
    metrics: Option<Vec<ResolvedSelector>>,
    elements: Vec<ResolvedSelector>,
    operator: ElementOperator,
    revision: u64,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attributes(&self) -> &[ResolvedSelector] {
        self.attributes.as_deref().unwrap_or_default()
    }

    pub fn metrics(&self) -> &[ResolvedSelector] {
        self.metrics.as_deref().unwrap_or_default()
    }

    pub fn elements(&self) -> &[ResolvedSelector] {
        &self.elements
    }

    pub fn element_operator(&self) -> ElementOperator {
        self.operator
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Adds attributes (optionally `attributeId;formId`) and metrics.
    ///
    /// All ids are validated before anything is added, so an invalid id leaves the selection
    /// unchanged. Ids already selected, including repeats within `ids`, are skipped and reported.
    /// An attribute counts as selected once, whatever form was chosen.
    pub fn select<S: AsRef<str>>(&mut self, universe: &FilterUniverse, ids: &[S]) -> Result<Vec<SelectionWarning>> {
        let resolved = ids
            .iter()
            .map(|id| universe.resolve(id.as_ref()).map(|s| (id.as_ref(), s)))
            .collect::<Result<Vec<_>>>()?;

        let mut warnings = Vec::new();
        let mut changed = false;

        for (raw, selector) in resolved {
            let list = match selector.kind {
                SelectorKind::Attribute => self.attributes.get_or_insert_with(Vec::new),
                _ => self.metrics.get_or_insert_with(Vec::new),
            };

            if list.iter().any(|s| s.id == selector.id) {
                warn!(object_id = raw, "Duplicate object ID: '{raw}'");
                warnings.push(SelectionWarning::Duplicate(raw.to_owned()));
                continue;
            }

            list.push(selector);
            changed = true;
        }

        if changed {
            self.revision += 1;
        }
        Ok(warnings)
    }

    /// Adds element ids of the form `attributeId:value`, with the same validation and
    /// duplicate handling as `select`.
    pub fn select_elements<S: AsRef<str>>(
        &mut self,
        universe: &FilterUniverse,
        ids: &[S],
    ) -> Result<Vec<SelectionWarning>> {
        let resolved = ids
            .iter()
            .map(|id| universe.resolve_element(id.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        let mut warnings = Vec::new();
        let mut changed = false;

        for selector in resolved {
            if self.elements.iter().any(|s| s.id == selector.id) {
                warn!(element_id = %selector.id, "Duplicate object ID: '{}'", selector.id);
                warnings.push(SelectionWarning::Duplicate(selector.id));
                continue;
            }
            self.elements.push(selector);
            changed = true;
        }

        if changed {
            self.revision += 1;
        }
        Ok(warnings)
    }

    /// Empties the named lists only. A class that was never selected stays unselected.
    pub fn clear(&mut self, attributes: bool, metrics: bool, elements: bool) {
        if attributes && let Some(list) = self.attributes.as_mut() {
            list.clear();
        }
        if metrics && let Some(list) = self.metrics.as_mut() {
            list.clear();
        }
        if elements {
            self.elements.clear();
        }
        if attributes || metrics || elements {
            self.revision += 1;
        }
    }

    pub fn set_element_operator(&mut self, operator: ElementOperator) {
        if self.operator != operator {
            self.operator = operator;
            self.revision += 1;
        }
    }

    /// Groups the selected elements by owning attribute, in first-seen order.
    /// Several groups are combined with `And`.
    pub fn build_view_filter(&self) -> Option<ViewFilter> {
        let mut groups: Vec<(&str, Vec<String>)> = Vec::new();

        for element in &self.elements {
            let attribute_id = element.owning_attribute_id.as_deref().unwrap_or_default();
            match groups.iter_mut().find(|(id, _)| *id == attribute_id) {
                Some((_, ids)) => ids.push(element.id.clone()),
                None => groups.push((attribute_id, vec![element.id.clone()])),
            }
        }

        let mut predicates: Vec<ViewFilter> = groups
            .into_iter()
            .map(|(attribute_id, element_ids)| ViewFilter::Elements {
                operator: self.operator,
                attribute_id: attribute_id.to_owned(),
                element_ids,
            })
            .collect();

        match predicates.len() {
            0 => None,
            1 => predicates.pop(),
            _ => Some(ViewFilter::And(predicates)),
        }
    }

    pub fn build_request_body(&self) -> RequestBody {
        let attributes = self.attributes.as_ref().map(|list| {
            list.iter()
                .map(|s| RequestedAttribute {
                    id: s.id.clone(),
                    forms: s.form_id.iter().map(|f| RequestedObject { id: f.clone() }).collect(),
                })
                .collect()
        });

        let metrics = self
            .metrics
            .as_ref()
            .map(|list| list.iter().map(|s| RequestedObject { id: s.id.clone() }).collect());

        RequestBody {
            requested_objects: RequestedObjects { attributes, metrics },
            view_filter: self.build_view_filter(),
        }
    }
}
