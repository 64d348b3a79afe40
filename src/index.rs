//! Message index: metadata key tuple to byte location.
//!
//! Every input file is scanned exactly once. Each message is classified
//! along all [`INDEX_KEYS`] dimensions and its location recorded under the
//! resulting [`IndexKey`]. Files are scanned concurrently and merged in
//! input order, so a later message with the same key replaces an earlier
//! one exactly as a sequential scan would.

use crate::constants::{INDEX_KEY_COUNT, INDEX_KEYS};
use crate::decoder::Decoder;
use crate::error::{GridCheckError, Result};
use crate::models::{Condition, IndexKey, MessageLocation};
use futures::stream::{self, StreamExt, TryStreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task;
use tracing::{debug, info};

/// Read-only lookup table built once per run
#[derive(Debug, Default, Clone)]
pub struct MessageIndex {
    entries: HashMap<IndexKey, MessageLocation>,
    message_count: usize,
    file_count: usize,
}

impl MessageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a message; an existing entry under the same key is replaced
    pub fn insert(&mut self, key: IndexKey, location: MessageLocation) {
        self.message_count += 1;
        self.entries.insert(key, location);
    }

    pub fn get(&self, key: &IndexKey) -> Option<&MessageLocation> {
        self.entries.get(key)
    }

    /// Locate the message matching a fully specified condition list
    ///
    /// Returns `None` if any index dimension has no condition or no
    /// message matches; lookups never fail.
    pub fn lookup(&self, conditions: &[Condition]) -> Option<&MessageLocation> {
        let Some(key) = IndexKey::from_conditions(conditions) else {
            debug!("Data not found from index");
            return None;
        };
        self.entries.get(&key)
    }

    /// Number of distinct index keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of messages scanned, including replaced duplicates
    pub fn message_count(&self) -> usize {
        self.message_count
    }

    pub fn file_count(&self) -> usize {
        self.file_count
    }

    /// Fold a later file's sub-index into this one
    fn merge(&mut self, other: MessageIndex) {
        self.message_count += other.message_count;
        self.file_count += other.file_count;
        self.entries.extend(other.entries);
    }
}

/// Scan a single file into its own sub-index
pub fn index_file(decoder: &dyn Decoder, path: &Path) -> Result<MessageIndex> {
    let mut index = MessageIndex::new();
    let mut offset = 0u64;

    for (message_no, message) in decoder.open(path)?.enumerate() {
        let message = message?;

        let mut slots = [None; INDEX_KEY_COUNT];
        for (slot, key) in slots.iter_mut().zip(INDEX_KEYS) {
            *slot = message.scalar(key);
        }

        let length = message.total_length();
        index.insert(
            IndexKey(slots),
            MessageLocation {
                file: path.to_path_buf(),
                message_no,
                offset,
                length,
            },
        );
        offset += length;
    }

    index.file_count = 1;
    debug!(
        "Indexed {} messages from {}",
        index.message_count,
        path.display()
    );
    Ok(index)
}

/// Builds a [`MessageIndex`] from a list of input files
pub struct MessageLocator {
    decoder: Arc<dyn Decoder>,
    concurrency: usize,
    show_progress: bool,
}

impl MessageLocator {
    pub fn new(decoder: Arc<dyn Decoder>) -> Self {
        Self {
            decoder,
            concurrency: num_cpus::get(),
            show_progress: false,
        }
    }

    /// Limit the number of files scanned at once
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Show a progress bar on stderr while scanning
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Scan every file and merge the results in input order
    ///
    /// A file that cannot be opened or is not a valid message file aborts
    /// the whole build.
    pub async fn build(&self, files: &[PathBuf]) -> Result<MessageIndex> {
        info!("Indexing grib files");

        let pb = if self.show_progress {
            let pb = ProgressBar::new(files.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            pb.set_message("Indexing");
            pb
        } else {
            ProgressBar::hidden()
        };

        let index = stream::iter(files.iter().cloned())
            .map(|path| {
                let decoder = Arc::clone(&self.decoder);
                let pb = pb.clone();
                async move {
                    let result = task::spawn_blocking(move || index_file(decoder.as_ref(), &path))
                        .await
                        .map_err(|e| GridCheckError::TaskFailed {
                            reason: format!("indexing task panicked: {e}"),
                        })?;
                    pb.inc(1);
                    result
                }
            })
            .buffered(self.concurrency)
            .try_fold(MessageIndex::new(), |mut index, sub_index| async move {
                index.merge(sub_index);
                Ok(index)
            })
            .await?;

        pb.finish_and_clear();
        info!(
            "Indexed {} messages from {} file(s)",
            index.message_count(),
            files.len()
        );

        Ok(index)
    }
}
