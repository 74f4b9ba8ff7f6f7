pub mod csv;
pub mod sqlite;

use crate::errors::EngineResult;
use crate::types::TableRow;

/// Destination for factor rows. Scans call `write` once per completed result;
/// without a sink the engine only returns what it computed.
pub trait OutputSink: Send {
    fn write(&mut self, rows: &[TableRow]) -> EngineResult<()>;
}

/// Rows collected in memory.
#[derive(Debug, Default)]
pub struct VecSink {
    pub rows: Vec<TableRow>,
}

impl OutputSink for VecSink {
    fn write(&mut self, rows: &[TableRow]) -> EngineResult<()> {
        self.rows.extend_from_slice(rows);
        Ok(())
    }
}

/// Fans each write out to several sinks in order.
#[derive(Default)]
pub struct MultiSink {
    sinks: Vec<Box<dyn OutputSink>>,
}

impl MultiSink {
    pub fn push(&mut self, sink: Box<dyn OutputSink>) {
        self.sinks.push(sink);
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl OutputSink for MultiSink {
    fn write(&mut self, rows: &[TableRow]) -> EngineResult<()> {
        for sink in &mut self.sinks {
            sink.write(rows)?;
        }
        Ok(())
    }
}
