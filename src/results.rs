//! Result Store: materialized diff tables addressed by [`ResultId`], with
//! page slicing and spreadsheet export. Stored tables are never mutated, so
//! page boundaries stay stable across calls.

use std::sync::Arc;

use log::{debug, info};
use serde::Serialize;

use crate::{
    cache::EntryStore,
    error::{EngineError, EngineResult},
    export,
    ids::ResultId,
    table::{Cell, Table},
};

/// One page of a stored result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
    pub total: usize,
}

pub struct ResultStore {
    results: EntryStore<ResultId, Table>,
}

impl ResultStore {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            results: EntryStore::new("result", capacity),
        }
    }

    pub fn store(&self, table: Table) -> ResultId {
        let id = ResultId::generate();
        let rows = table.row_count();
        self.results.put(id, table);
        info!("Stored result {id} with {rows} row(s)");
        id
    }

    pub fn get(&self, id: ResultId) -> EngineResult<Arc<Table>> {
        self.results
            .get(&id)
            .ok_or_else(|| EngineError::not_found("result", id))
    }

    /// Returns rows `[(page - 1) * size, page * size)` of result `id`.
    pub fn page(&self, id: ResultId, page: usize, size: usize) -> EngineResult<Page> {
        if page == 0 || size == 0 {
            return Err(EngineError::InvalidPage { page, size });
        }
        let table = self.get(id)?;
        let start = (page - 1).saturating_mul(size);
        let end = start.saturating_add(size);
        let rows = table.slice(start..end).to_vec();
        debug!(
            "Result {id}: page {page} (size {size}) returned {} row(s)",
            rows.len()
        );
        Ok(Page {
            headers: table.columns().to_vec(),
            rows,
            total: table.row_count(),
        })
    }

    pub fn export(&self, id: ResultId) -> EngineResult<Vec<u8>> {
        let table = self.get(id)?;
        export::to_xlsx(&table, export::RESULT_SHEET)
    }

    pub fn evict(&self, id: ResultId) -> bool {
        self.results.evict(&id)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(rows: usize) -> Table {
        Table::from_rows(
            vec!["n".into()],
            (0..rows).map(|i| vec![Cell::Text(i.to_string())]).collect(),
        )
        .unwrap()
    }

    #[test]
    fn pages_slice_without_overlap() {
        let store = ResultStore::new(None);
        let id = store.store(numbered(75));

        let first = store.page(id, 1, 50).unwrap();
        let second = store.page(id, 2, 50).unwrap();
        assert_eq!(first.rows.len(), 50);
        assert_eq!(second.rows.len(), 25);
        assert_eq!(first.total, 75);
        assert_eq!(second.total, 75);
        assert_eq!(first.rows[49], vec![Cell::from("49")]);
        assert_eq!(second.rows[0], vec![Cell::from("50")]);

        let beyond = store.page(id, 3, 50).unwrap();
        assert!(beyond.rows.is_empty());
    }

    #[test]
    fn invalid_page_arguments_are_rejected() {
        let store = ResultStore::new(None);
        let id = store.store(numbered(3));
        assert!(matches!(
            store.page(id, 0, 10),
            Err(EngineError::InvalidPage { page: 0, size: 10 })
        ));
        assert!(store.page(id, 1, 0).is_err());
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let store = ResultStore::new(None);
        let missing = ResultId::generate();
        assert!(matches!(
            store.page(missing, 1, 10),
            Err(EngineError::NotFound { kind: "result", .. })
        ));
        assert!(matches!(
            store.export(missing),
            Err(EngineError::NotFound { .. })
        ));
    }
}
