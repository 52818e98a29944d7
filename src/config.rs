//! Startup configuration for a processor instance

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{marshal::ShareLayout, PartyId};

/// The default batch-size hint handed to the backend contexts
const DEFAULT_BATCH_HINT: usize = 100;

/// The per-party input streams consumed by the input opcodes
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InputStream {
    /// Whole integers, one per line
    Integers,
    /// Fixed-point decimals, one per line
    Fixes,
    /// Single bits, one per line
    Bits,
    /// Pre-shared values, one per line
    Shares,
}

impl InputStream {
    /// The on-disk name of this stream for a party
    pub fn file_name(&self, party_id: PartyId) -> String {
        let prefix = match self {
            InputStream::Integers => "integers",
            InputStream::Fixes => "fixes",
            InputStream::Bits => "bits",
            InputStream::Shares => "shares",
        };
        format!("{prefix}_input_{party_id}.txt")
    }

    /// A static tag for diagnostics
    pub fn tag(&self) -> &'static str {
        match self {
            InputStream::Integers => "integers",
            InputStream::Fixes => "fixes",
            InputStream::Bits => "bits",
            InputStream::Shares => "shares",
        }
    }
}

/// Everything a processor needs to know at construction
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// This party's identity
    pub party_id: PartyId,
    /// The number of parties in the session
    pub num_parties: usize,
    /// The worker thread this processor runs on; nonzero threads suffix
    /// their output files
    pub thread_num: usize,
    /// The field selector handed to the backend, e.g. `"p254"` or `"ring64"`
    pub field_tag: String,
    /// Expected open batch size
    pub open_batch_hint: usize,
    /// Expected multiply batch size
    pub mult_batch_hint: usize,
    /// Expected bit batch size
    pub bits_batch_hint: usize,
    /// How shares map onto backend buffer words
    pub share_layout: ShareLayout,
    /// Where the per-party input files live
    pub input_dir: PathBuf,
    /// Where the public/private output files are written
    pub output_dir: PathBuf,
    /// Where the transactions file lives
    pub persistence_dir: PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            party_id: 0,
            num_parties: 3,
            thread_num: 0,
            field_tag: "ring64".to_string(),
            open_batch_hint: DEFAULT_BATCH_HINT,
            mult_batch_hint: DEFAULT_BATCH_HINT,
            bits_batch_hint: DEFAULT_BATCH_HINT,
            share_layout: ShareLayout::Replicated,
            input_dir: PathBuf::from("."),
            output_dir: PathBuf::from("Player-Data"),
            persistence_dir: PathBuf::from("Persistence"),
        }
    }
}

impl RuntimeConfig {
    /// A configuration for one party of an `num_parties`-party session, with
    /// defaults everywhere else
    pub fn new(party_id: PartyId, num_parties: usize) -> Self {
        Self { party_id, num_parties, ..Self::default() }
    }

    /// Root every relative path at `dir`
    pub fn rooted_at(mut self, dir: &Path) -> Self {
        self.input_dir = dir.join(&self.input_dir);
        self.output_dir = dir.join(&self.output_dir);
        self.persistence_dir = dir.join(&self.persistence_dir);
        self
    }

    /// The path of one of this party's input streams
    pub fn input_file(&self, stream: InputStream) -> PathBuf {
        self.input_dir.join(stream.file_name(self.party_id))
    }

    /// The path of this party's public or private output file
    pub fn output_file(&self, public: bool) -> PathBuf {
        let kind = if public { "Public" } else { "Private" };
        let mut name = format!("{kind}-Output-{}", self.party_id);
        if self.thread_num > 0 {
            name.push_str(&format!("-{}", self.thread_num));
        }
        self.output_dir.join(name)
    }

    /// The path of this party's transactions file
    pub fn transactions_file(&self) -> PathBuf {
        crate::persistence::transactions_path(&self.persistence_dir, self.party_id)
    }
}

#[cfg(test)]
mod test {
    use std::path::Path;

    use super::{InputStream, RuntimeConfig};

    /// Output files carry the thread suffix only off the main thread
    #[test]
    fn test_output_file_naming() {
        let mut config = RuntimeConfig::new(1, 3);
        assert!(config.output_file(true).ends_with("Public-Output-1"));
        assert!(config.output_file(false).ends_with("Private-Output-1"));

        config.thread_num = 2;
        assert!(config.output_file(true).ends_with("Public-Output-1-2"));
    }

    /// Input streams resolve to the per-party file names
    #[test]
    fn test_input_file_naming() {
        let config = RuntimeConfig::new(2, 3).rooted_at(Path::new("/work"));
        assert_eq!(
            config.input_file(InputStream::Integers),
            Path::new("/work/integers_input_2.txt")
        );
        assert_eq!(config.input_file(InputStream::Shares), Path::new("/work/shares_input_2.txt"));
    }

    /// The config deserializes from partial documents
    #[test]
    fn test_deserialize_partial() {
        let config: RuntimeConfig =
            serde_json::from_str(r#"{"party_id": 2, "field_tag": "p254", "share_layout": "additive"}"#)
                .unwrap();
        assert_eq!(config.party_id, 2);
        assert_eq!(config.field_tag, "p254");
        assert_eq!(config.num_parties, 3);
    }
}
