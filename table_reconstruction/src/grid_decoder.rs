use cube_types::{Grid, InstancePayload};
use serde_json::Value;

use crate::error::{Result, TableReconstructionError};

/// Separates attribute and form names in the column names of multi-form attributes.
pub const ATTRIBUTE_FORM_SEPARATOR: char = '@';

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Number(f64),
    Bool(bool),
    Null,
}

impl CellValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<&Value> for CellValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => CellValue::Null,
            Value::Bool(b) => CellValue::Bool(*b),
            Value::Number(n) => n.as_f64().map(CellValue::Number).unwrap_or(CellValue::Null),
            Value::String(s) => CellValue::Text(s.clone()),
            other => CellValue::Text(other.to_string()),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_owned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnKind {
    AttributeForm {
        attribute_id: String,
        form_index: usize,
        /// Whether the attribute contributes more than one column.
        multiform: bool,
    },
    Metric {
        metric_id: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
}

impl Column {
    pub fn is_multiform(&self) -> bool {
        matches!(self.kind, ColumnKind::AttributeForm { multiform: true, .. })
    }

    pub fn is_metric(&self) -> bool {
        matches!(self.kind, ColumnKind::Metric { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttributeLayout {
    id: String,
    form_count: usize,
}

/// Form values of each element of each attribute, valid for the page it was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap {
    // attribute -> element index -> one value per form
    labels: Vec<Vec<Vec<String>>>,
}

impl LabelMap {
    fn from_grid(grid: &Grid, layouts: &[AttributeLayout]) -> Result<Self> {
        let mut labels = Vec::with_capacity(layouts.len());

        for (attribute, layout) in grid.rows.iter().zip(layouts) {
            let mut elements = Vec::with_capacity(attribute.elements.len());
            for (idx, element) in attribute.elements.iter().enumerate() {
                let values = &element.form_values;
                let values = if values.len() == layout.form_count {
                    values.clone()
                } else if values.len() == 1 {
                    // Subtotal rows carry a single label for every form.
                    vec![values[0].clone(); layout.form_count]
                } else {
                    return Err(TableReconstructionError::malformed(format!(
                        "Element {idx} of attribute '{}' has {} form values, expected {}",
                        attribute.name,
                        values.len(),
                        layout.form_count
                    )));
                };
                elements.push(values);
            }
            labels.push(elements);
        }

        Ok(Self { labels })
    }

    pub fn label(&self, attribute: usize, element: usize) -> Option<&[String]> {
        self.labels.get(attribute)?.get(element).map(Vec::as_slice)
    }
}

/// Rows decoded from one page, in page order.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedChunk {
    pub offset: usize,
    pub rows: Vec<Vec<CellValue>>,
}

impl DecodedChunk {
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }
}

/// Turns pages into rows of typed cells, using the column layout of the first page.
#[derive(Debug, Clone)]
pub struct GridDecoder {
    attributes: Vec<AttributeLayout>,
    metric_count: usize,
    columns: Vec<Column>,
}

impl GridDecoder {
    pub fn from_first_page(payload: &InstancePayload) -> Result<Self> {
        let grid = &payload.definition.grid;
        let mut attributes = Vec::with_capacity(grid.rows.len());
        let mut columns = Vec::new();

        for attribute in &grid.rows {
            let form_count = attribute.forms.len().max(1);
            let multiform = form_count > 1;

            if multiform {
                for (form_index, form) in attribute.forms.iter().enumerate() {
                    columns.push(Column {
                        name: format!("{}{ATTRIBUTE_FORM_SEPARATOR}{}", attribute.name, form.name),
                        kind: ColumnKind::AttributeForm {
                            attribute_id: attribute.id.clone(),
                            form_index,
                            multiform,
                        },
                    });
                }
            } else {
                columns.push(Column {
                    name: attribute.name.clone(),
                    kind: ColumnKind::AttributeForm {
                        attribute_id: attribute.id.clone(),
                        form_index: 0,
                        multiform,
                    },
                });
            }

            attributes.push(AttributeLayout {
                id: attribute.id.clone(),
                form_count,
            });
        }

        let metric_elements = grid.columns.last().map(|c| c.elements.as_slice()).unwrap_or_default();
        for metric in metric_elements {
            columns.push(Column {
                name: metric.name.clone(),
                kind: ColumnKind::Metric {
                    metric_id: metric.id.clone(),
                },
            });
        }

        Ok(Self {
            attributes,
            metric_count: metric_elements.len(),
            columns,
        })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    fn check_layout(&self, grid: &Grid, offset: usize) -> Result<()> {
        let matches = grid.rows.len() == self.attributes.len()
            && grid
                .rows
                .iter()
                .zip(&self.attributes)
                .all(|(a, layout)| a.id == layout.id && a.forms.len().max(1) == layout.form_count);

        if !matches {
            return Err(TableReconstructionError::malformed(format!(
                "Page at offset {offset} has a different attribute layout than the first page"
            )));
        }

        let metrics = grid.columns.last().map(|c| c.elements.len()).unwrap_or(0);
        if metrics != self.metric_count {
            return Err(TableReconstructionError::malformed(format!(
                "Page at offset {offset} has {metrics} metrics, expected {}",
                self.metric_count
            )));
        }
        Ok(())
    }

    /// Decodes the page requested at `offset`. The page's own element lists resolve its header indices.
    pub fn decode(&self, payload: &InstancePayload, offset: usize) -> Result<DecodedChunk> {
        let grid = &payload.definition.grid;
        self.check_layout(grid, offset)?;

        let label_map = LabelMap::from_grid(grid, &self.attributes)?;
        let headers = &payload.data.headers.rows;
        let raw = &payload.data.metric_values.raw;

        let num_rows = headers.len().max(raw.len());
        if !self.attributes.is_empty() && headers.len() != num_rows {
            return Err(TableReconstructionError::malformed(format!(
                "Page at offset {offset} has {} header rows and {} metric rows",
                headers.len(),
                raw.len()
            )));
        }
        if self.metric_count > 0 && raw.len() != num_rows {
            return Err(TableReconstructionError::malformed(format!(
                "Page at offset {offset} has {} metric rows and {} header rows",
                raw.len(),
                headers.len()
            )));
        }

        let mut rows = Vec::with_capacity(num_rows);
        for r in 0..num_rows {
            let mut row = Vec::with_capacity(self.columns.len());

            if let Some(header) = headers.get(r) {
                if header.len() != self.attributes.len() {
                    return Err(TableReconstructionError::malformed(format!(
                        "Header row {r} at offset {offset} has {} entries, expected {}",
                        header.len(),
                        self.attributes.len()
                    )));
                }
                for (a, &element) in header.iter().enumerate() {
                    let label = label_map.label(a, element).ok_or_else(|| {
                        TableReconstructionError::malformed(format!(
                            "Header row {r} at offset {offset} references missing element {element} of attribute {a}"
                        ))
                    })?;
                    row.extend(label.iter().map(|v| CellValue::Text(v.clone())));
                }
            }

            if self.metric_count > 0 {
                let values = &raw[r];
                if values.len() != self.metric_count {
                    return Err(TableReconstructionError::malformed(format!(
                        "Metric row {r} at offset {offset} has {} values, expected {}",
                        values.len(),
                        self.metric_count
                    )));
                }
                row.extend(values.iter().map(CellValue::from));
            }

            rows.push(row);
        }

        Ok(DecodedChunk { offset, rows })
    }
}
