use cube_types::TableMembershipResponse;
use tracing::debug;

use crate::error::{Result, TableReconstructionError};
use crate::grid_decoder::{CellValue, Column, DecodedChunk};

/// A reconstructed table: ordered columns and row-major cells.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
    rows: Vec<Vec<CellValue>>,
}

impl Table {
    pub fn new(columns: Vec<Column>, rows: Vec<Vec<CellValue>>) -> Self {
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn rows(&self) -> &[Vec<CellValue>] {
        &self.rows
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// The cells of the named column, top to bottom.
    pub fn column(&self, name: &str) -> Option<Vec<&CellValue>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| &r[idx]).collect())
    }

    pub fn into_rows(self) -> Vec<Vec<CellValue>> {
        self.rows
    }

    /// One sub-table per source table, in membership order, each holding the member
    /// columns present in this table. Row order and count are unchanged.
    pub fn split_by_source_table(&self, membership: &TableMembership) -> Result<Vec<(String, Table)>> {
        if let Some(column) = self.columns.iter().find(|c| c.is_multiform()) {
            return Err(TableReconstructionError::NotSupported(format!(
                "Splitting by source table is not supported with multi-form attributes (column '{}')",
                column.name
            )));
        }

        let mut tables = Vec::with_capacity(membership.tables.len());
        for (table_name, column_names) in &membership.tables {
            let indices: Vec<usize> = column_names.iter().filter_map(|name| self.column_index(name)).collect();

            let columns = indices.iter().map(|&i| self.columns[i].clone()).collect();
            let rows = self
                .rows
                .iter()
                .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
                .collect();

            debug!(table = %table_name, columns = indices.len(), "Split source table");
            tables.push((table_name.clone(), Table::new(columns, rows)));
        }
        Ok(tables)
    }
}

/// Source-table name to member column names, in table order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableMembership {
    tables: Vec<(String, Vec<String>)>,
}

impl TableMembership {
    pub fn new(tables: Vec<(String, Vec<String>)>) -> Self {
        Self { tables }
    }

    /// Tables keep the order of `tables` in the response; columns naming an unlisted
    /// table add that table after the listed ones.
    pub fn from_response(response: &TableMembershipResponse) -> Self {
        let mut tables: Vec<(String, Vec<String>)> =
            response.tables.iter().map(|t| (t.name.clone(), Vec::new())).collect();

        for column in &response.columns {
            match tables.iter_mut().find(|(name, _)| *name == column.table_name) {
                Some((_, columns)) => columns.push(column.column_name.clone()),
                None => tables.push((column.table_name.clone(), vec![column.column_name.clone()])),
            }
        }
        Self { tables }
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn tables(&self) -> &[(String, Vec<String>)] {
        &self.tables
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Accumulates decoded chunks in offset order. It has a single owner, the task driving
/// the fetch, and chunks must arrive contiguously.
#[derive(Debug)]
pub struct TableAssembler {
    columns: Vec<Column>,
    rows: Vec<Vec<CellValue>>,
}

impl TableAssembler {
    pub fn new(columns: Vec<Column>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn with_capacity(columns: Vec<Column>, rows: usize) -> Self {
        Self {
            columns,
            rows: Vec::with_capacity(rows),
        }
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn append(&mut self, chunk: DecodedChunk) -> Result<()> {
        if chunk.offset != self.rows.len() {
            return Err(TableReconstructionError::InternalError(format!(
                "Chunk not sequential: expected offset {}, got {}",
                self.rows.len(),
                chunk.offset
            )));
        }

        if let Some((r, row)) = chunk.rows.iter().enumerate().find(|(_, row)| row.len() != self.columns.len()) {
            return Err(TableReconstructionError::malformed(format!(
                "Row {} has {} cells, expected {}",
                chunk.offset + r,
                row.len(),
                self.columns.len()
            )));
        }

        self.rows.extend(chunk.rows);
        Ok(())
    }

    /// Completes the table; its row count must equal `expected_total`.
    pub fn finalize(self, expected_total: usize) -> Result<Table> {
        if self.rows.len() != expected_total {
            return Err(TableReconstructionError::malformed(format!(
                "Assembled {} rows, but the instance holds {expected_total}",
                self.rows.len()
            )));
        }
        Ok(Table::new(self.columns, self.rows))
    }
}
