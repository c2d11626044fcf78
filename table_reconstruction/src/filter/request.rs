use serde::{Serialize, Serializer};
use serde_json::Value;

use super::selection::ElementOperator;
use crate::error::{Result, TableReconstructionError};

/// Element predicate applied by the server before paging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewFilter {
    Elements {
        operator: ElementOperator,
        attribute_id: String,
        element_ids: Vec<String>,
    },
    And(Vec<ViewFilter>),
}

impl Serialize for ViewFilter {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Node<'a, T: Serialize> {
            operator: &'a str,
            operands: T,
        }

        #[derive(Serialize)]
        struct ElementRef<'a> {
            id: &'a str,
        }

        #[derive(Serialize)]
        #[serde(tag = "type", rename_all = "lowercase")]
        enum Operand<'a> {
            Attribute { id: &'a str },
            Elements { elements: Vec<ElementRef<'a>> },
        }

        match self {
            ViewFilter::And(children) => Node {
                operator: "And",
                operands: children,
            }
            .serialize(serializer),
            ViewFilter::Elements {
                operator,
                attribute_id,
                element_ids,
            } => Node {
                operator: operator.as_str(),
                operands: [
                    Operand::Attribute { id: attribute_id },
                    Operand::Elements {
                        elements: element_ids.iter().map(|id| ElementRef { id }).collect(),
                    },
                ],
            }
            .serialize(serializer),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestedObject {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestedAttribute {
    pub id: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub forms: Vec<RequestedObject>,
}

/// A class that was never selected is absent, letting the server default to all objects of that class.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RequestedObjects {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Vec<RequestedAttribute>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Vec<RequestedObject>>,
}

/// Body of the instance creation request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestBody {
    pub requested_objects: RequestedObjects,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_filter: Option<ViewFilter>,
}

impl RequestBody {
    pub fn to_json(&self) -> Result<Value> {
        serde_json::to_value(self)
            .map_err(|e| TableReconstructionError::InternalError(format!("Failed to serialize request body: {e}")))
    }
}
