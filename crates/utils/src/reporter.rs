/// Accumulates per-pass statistics and serializes them as a flat JSON object.
///
/// One reporter is threaded through a pipeline run (it is not process-global);
/// each pass bumps its counters and the pipeline re-emits the document at the
/// end of every pass, so the sink always holds the latest totals and the last
/// writer wins.
use serde_json::to_string_pretty;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use tracing::warn;

pub const NUM_STRINGS_ENCRYPTED: &str = "num_strings_encrypted";
pub const TOTAL_STRING_BYTES: &str = "total_string_bytes";
pub const BOGUS_BLOCKS_INSERTED: &str = "bogus_blocks_inserted";
pub const FAKE_LOOPS_ADDED: &str = "fake_loops_added";
pub const FUNCTIONS_FLATTENED: &str = "functions_flattened";

#[derive(Debug, Default)]
pub struct Reporter {
    counters: BTreeMap<&'static str, u64>,
    sink: Option<PathBuf>,
}

impl Reporter {
    pub fn new(sink: Option<PathBuf>) -> Self {
        Self {
            counters: BTreeMap::new(),
            sink,
        }
    }

    /// Adds `n` to a counter, materializing it at zero first. Counters only
    /// ever increase within a run.
    pub fn bump(&mut self, name: &'static str, n: u64) {
        *self.counters.entry(name).or_insert(0) += n;
    }

    pub fn get(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn counters(&self) -> &BTreeMap<&'static str, u64> {
        &self.counters
    }

    pub fn render(&self) -> String {
        // BTreeMap keys are ordered, so the document is byte-stable.
        to_string_pretty(&self.counters).unwrap_or_else(|_| "{}".to_string())
    }

    /// Writes the JSON document to the configured sink, or stdout when none is
    /// set. Sink failures are logged and do not fail the pass.
    pub fn emit(&self) {
        let doc = self.render();
        match &self.sink {
            Some(path) => {
                if let Err(e) = fs::write(path, &doc) {
                    warn!("could not write counter report to {}: {e}", path.display());
                }
            }
            None => println!("{doc}"),
        }
    }
}
