use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use itertools::Itertools;
use log::debug;

use crate::database::Database;
use crate::error::{DbError, DbResult};
use crate::executor::{materialize, PhysicalOperator};
use crate::session::current_session_id;
use crate::storage::tuple::{Row, TableColumn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortMethod {
    Internal,
    External,
}

/// ORDER BY over a materialized child. The internal strategy is a stable
/// in-memory sort; the external strategy sorts fixed-size chunks, spills
/// them to session-scoped temp files and k-way merges the fronts, ties
/// broken by chunk order.
pub struct Sort {
    db: Arc<Database>,
    sort_column: TableColumn,
    asc: bool,
    method: SortMethod,
    child: Box<dyn PhysicalOperator + Send>,
    columns: Vec<TableColumn>,
    sort_column_index: usize,
    output: Option<std::vec::IntoIter<Row>>,
    temp_files: Vec<PathBuf>,
}

impl Sort {
    pub fn new(
        db: Arc<Database>,
        sort_column: TableColumn,
        asc: bool,
        method: SortMethod,
        child: Box<dyn PhysicalOperator + Send>,
    ) -> Self {
        Self {
            db,
            sort_column,
            asc,
            method,
            child,
            columns: Vec::new(),
            sort_column_index: 0,
            output: None,
            temp_files: Vec::new(),
        }
    }

    fn compare(&self, a: &Row, b: &Row) -> Ordering {
        let ordering = a[self.sort_column_index].cmp(&b[self.sort_column_index]);
        if self.asc {
            ordering
        } else {
            ordering.reverse()
        }
    }

    fn internal_sort(&self, mut rows: Vec<Row>) -> Vec<Row> {
        rows.sort_by(|a, b| self.compare(a, b));
        rows
    }

    fn temp_file_path(&self, chunk: usize) -> PathBuf {
        self.db
            .config()
            .temp_dir()
            .join(format!("temp_sort_{}_{}", current_session_id(), chunk))
    }

    fn write_run(&self, path: &PathBuf, rows: &[Row]) -> DbResult<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        for row in rows {
            let body = bincode::serialize(row)?;
            writer.write_all(&(body.len() as u32).to_le_bytes())?;
            writer.write_all(&body)?;
        }
        writer.flush()?;
        Ok(())
    }

    fn external_sort(&mut self, rows: Vec<Row>) -> DbResult<Vec<Row>> {
        let chunk_size = self.db.config().sort_chunk_size.max(1);
        std::fs::create_dir_all(self.db.config().temp_dir())?;

        // sort each chunk and spill it
        for (i, chunk) in rows.chunks(chunk_size).enumerate() {
            let sorted: Vec<Row> = chunk
                .iter()
                .cloned()
                .sorted_by(|a, b| self.compare(a, b))
                .collect();
            let path = self.temp_file_path(i);
            self.write_run(&path, &sorted)?;
            self.temp_files.push(path);
        }
        debug!(
            "external sort spilled {} rows into {} runs",
            rows.len(),
            self.temp_files.len()
        );
        drop(rows);

        let mut readers: Vec<RunReader> = self
            .temp_files
            .iter()
            .map(RunReader::open)
            .collect::<DbResult<_>>()?;

        // prime one front row per run, then repeatedly take the smallest;
        // equal keys resolve to the lowest chunk index, keeping the merge
        // stable
        let mut fronts: Vec<Option<Row>> = readers
            .iter_mut()
            .map(|r| r.read_row())
            .collect::<DbResult<_>>()?;

        let mut merged = Vec::new();
        loop {
            let mut best: Option<usize> = None;
            for (i, front) in fronts.iter().enumerate() {
                if let Some(row) = front {
                    best = match best {
                        None => Some(i),
                        Some(b) => {
                            if self.compare(row, fronts[b].as_ref().unwrap()) == Ordering::Less {
                                Some(i)
                            } else {
                                Some(b)
                            }
                        }
                    };
                }
            }
            let winner = match best {
                None => break,
                Some(i) => i,
            };
            merged.push(fronts[winner].take().unwrap());
            fronts[winner] = readers[winner].read_row()?;
        }

        drop(readers);
        self.remove_temp_files();
        Ok(merged)
    }

    fn remove_temp_files(&mut self) {
        for path in self.temp_files.drain(..) {
            let _ = std::fs::remove_file(path);
        }
    }
}

struct RunReader {
    reader: BufReader<File>,
}

impl RunReader {
    fn open(path: &PathBuf) -> DbResult<Self> {
        Ok(Self {
            reader: BufReader::new(File::open(path)?),
        })
    }

    fn read_row(&mut self) -> DbResult<Option<Row>> {
        let mut lenbuf = [0u8; 4];
        match self.reader.read_exact(&mut lenbuf) {
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
            Ok(()) => {}
        }
        let mut body = vec![0u8; u32::from_le_bytes(lenbuf) as usize];
        self.reader.read_exact(&mut body)?;
        Ok(Some(bincode::deserialize(&body)?))
    }
}

impl PhysicalOperator for Sort {
    fn name(&self) -> &str {
        "Sort"
    }

    fn columns(&self) -> &[TableColumn] {
        &self.columns
    }

    fn open(&mut self) -> DbResult<()> {
        self.child.open()?;
        self.columns = self.child.columns().to_vec();
        self.sort_column_index = self
            .columns
            .iter()
            .position(|c| c == &self.sort_column)
            .ok_or_else(|| {
                DbError::ExecutorCheck(format!("cannot sort by unknown column {}", self.sort_column))
            })?;
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Row>> {
        if self.output.is_none() {
            let rows = materialize(self.child.as_mut())?;
            let sorted = match self.method {
                SortMethod::Internal => self.internal_sort(rows),
                SortMethod::External => self.external_sort(rows)?,
            };
            self.output = Some(sorted.into_iter());
        }
        Ok(self.output.as_mut().unwrap().next())
    }

    fn close(&mut self) -> DbResult<()> {
        self.output = None;
        // error paths can leave spilled runs behind
        self.remove_temp_files();
        self.child.close()
    }
}
