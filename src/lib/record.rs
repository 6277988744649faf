//! The records that flow through the routing stages: reads and the adapter matches found on them.

use bstr::ByteSlice;
use seq_io::{fasta, fastq};

/// A single sequenced read.
///
/// The `name` is the complete header line without the leading `@`/`>`, including any comment
/// after the first space.  Stages never modify a read; only writers persist it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SequenceRecord {
    pub name: Vec<u8>,
    pub sequence: Vec<u8>,
    pub qualities: Option<Vec<u8>>,
}

impl SequenceRecord {
    /// Create a new [`SequenceRecord`].
    pub fn new(name: &[u8], sequence: &[u8], qualities: Option<&[u8]>) -> Self {
        Self {
            name: name.to_vec(),
            sequence: sequence.to_vec(),
            qualities: qualities.map(<[u8]>::to_vec),
        }
    }

    /// The number of bases in the read.
    #[inline]
    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// The read name as a lossy string, for messages and logging.
    pub fn name_str(&self) -> String {
        self.name.to_str_lossy().into_owned()
    }
}

impl From<fastq::OwnedRecord> for SequenceRecord {
    fn from(record: fastq::OwnedRecord) -> Self {
        Self { name: record.head, sequence: record.seq, qualities: Some(record.qual) }
    }
}

impl From<fasta::OwnedRecord> for SequenceRecord {
    fn from(record: fasta::OwnedRecord) -> Self {
        Self { name: record.head, sequence: record.seq, qualities: None }
    }
}

/// One adapter-trimming event applied to a read, as reported by the matching stage.
///
/// A read's matches are ordered as trimming occurred, the last one being the most recent and the
/// one that decides naming.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AdapterMatch {
    /// The name of the adapter that matched.
    pub adapter_name: String,
    /// The part of the read after (or before, for 5' adapters) the adapter, may be empty.
    pub rest: Vec<u8>,
    /// The bases that aligned to wildcard positions in the adapter.
    pub wildcards: Vec<u8>,
    /// The fields of the tabular info record describing this match.
    pub info_record: Vec<String>,
}

impl AdapterMatch {
    /// Create a new [`AdapterMatch`] with only the adapter name set.
    pub fn new(adapter_name: &str) -> Self {
        Self { adapter_name: adapter_name.to_string(), ..Self::default() }
    }
}

/// The name of the adapter in the last (authoritative) match, if any.
#[inline]
pub fn last_adapter_name(matches: &[AdapterMatch]) -> Option<&str> {
    matches.last().map(|m| m.adapter_name.as_str())
}
