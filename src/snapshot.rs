use crate::models::Bar;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

pub const BAR_SNAPSHOT_VERSION: u32 = 1;

/// Retrieved bar sequences for a list of symbols, kept in symbol-list order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarSnapshot {
    pub version: u32,
    pub generated_at: DateTime<Utc>,
    pub start_date: NaiveDate,
    pub series: Vec<SymbolBars>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolBars {
    pub symbol: String,
    pub bars: Vec<Bar>,
}

impl BarSnapshot {
    pub fn new(start_date: NaiveDate, series: Vec<SymbolBars>) -> Self {
        Self {
            version: BAR_SNAPSHOT_VERSION,
            generated_at: Utc::now(),
            start_date,
            series,
        }
    }

    pub fn bar_count(&self) -> usize {
        self.series.iter().map(|entry| entry.bars.len()).sum()
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open bar snapshot at {}", path.display()))?;
        let reader = BufReader::new(file);
        let snapshot: BarSnapshot =
            bincode::deserialize_from(reader).context("Snapshot decode failed")?;

        if snapshot.version != BAR_SNAPSHOT_VERSION {
            return Err(anyhow!(
                "Bar snapshot version mismatch (found {}, expected {})",
                snapshot.version,
                BAR_SNAPSHOT_VERSION
            ));
        }
        Ok(snapshot)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create snapshot directory {}", parent.display())
                })?;
            }
        }

        let file = File::create(path)
            .with_context(|| format!("Unable to create bar snapshot at {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, self).context("Failed to serialize bar snapshot")?;
        writer
            .flush()
            .context("Failed to flush bar snapshot to disk")?;
        Ok(())
    }
}
