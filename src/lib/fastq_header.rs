#![forbid(unsafe_code)]
#![allow(clippy::must_use_candidate)]
//! Split a FASTQ header into its read name and comment, and inspect the CASAVA fields.
//!
//! Unlike a strict parser this never fails: reads routinely arrive with headers from many
//! instruments, and a header that does not look like a CASAVA 1.8 header is simply reported as
//! "not flagged".
//!
//! # Grammar
//!
//! Only the shape of the comment is inspected:
//!
//! ```text
//! <header>      ::= <read-name> | “<read-name> <comment>”
//! <comment>     ::= <read-number>:<is-filtered>:<control-number>:<other>
//! <read-number> ::= <any single byte>
//! <is-filtered> ::= “Y” | “N”
//! ```
//!
//! # Usage
//!
//! ```rust
//! use readrouter_lib::fastq_header::FastqHeader;
//! let header = FastqHeader::from(b"H00233:4:AAAFGW3HV:1:1101:59586:1000 1:Y:0:GCATAAGCTT".as_slice());
//! assert!(header.is_failed_quality_filter());
//! ```

use bstr::ByteSlice;

/// The byte sequence that marks a read as failing the instrument quality filter.
const FAILED_FILTER_FLAG: &[u8] = b":Y:";

/// A FASTQ header split at its first space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FastqHeader<'a> {
    /// Everything before the first space.
    pub read_name: &'a [u8],
    /// Everything after the first space, `None` if there is no space.
    pub comment: Option<&'a [u8]>,
}

impl<'a> FastqHeader<'a> {
    /// Returns true if the comment carries the `:Y:` flag right after the single-byte read number.
    ///
    /// Headers without a comment, or whose comment is too short, are not flagged.
    pub fn is_failed_quality_filter(&self) -> bool {
        self.comment.and_then(|comment| comment.get(1..4)) == Some(FAILED_FILTER_FLAG)
    }
}

impl<'a> From<&'a [u8]> for FastqHeader<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        match bytes.find_byte(b' ') {
            Some(index) => Self { read_name: &bytes[..index], comment: Some(&bytes[index + 1..]) },
            None => Self { read_name: bytes, comment: None },
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::FastqHeader;

    #[test]
    fn test_split_at_first_space() {
        let header = FastqHeader::from(b"read1 1:N:0:ACGT extra words".as_slice());
        assert_eq!(header.read_name, b"read1");
        assert_eq!(header.comment, Some(b"1:N:0:ACGT extra words".as_slice()));
    }

    #[test]
    fn test_no_comment() {
        let header = FastqHeader::from(b"H00233:4:AAAFGW3HV:1:1101:59586:1000".as_slice());
        assert_eq!(header.read_name, b"H00233:4:AAAFGW3HV:1:1101:59586:1000");
        assert!(header.comment.is_none());
        assert!(!header.is_failed_quality_filter());
    }

    #[rstest]
    #[case(b"r 1:Y:0:GCATAAGCTT", true)]
    #[case(b"r 2:Y:18:ATCACG", true)]
    #[case(b"r 1:N:0:GCATAAGCTT", false)]
    #[case(b"r 1:Y", false)]
    #[case(b"r", false)]
    #[case(b"r :Y:", false)]
    #[case(b"r 10:Y:0:A", false)]
    #[case(b"", false)]
    fn test_is_failed_quality_filter(#[case] header: &[u8], #[case] expected: bool) {
        assert_eq!(FastqHeader::from(header).is_failed_quality_filter(), expected);
    }
}
