//! Utility functions.
use std::{io, path::Path};

use log::warn;

use crate::writer::{OutputOpener, SequenceWriter};

/// How much the soft limit on open files is raised by when a lazily opened output hits it.
pub const OPEN_FILES_LIMIT_INCREMENT: u64 = 8;

/// Returns true if the error is the operating system refusing to open another file descriptor.
pub fn is_too_many_open_files(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EMFILE)
}

/// Open a writer for `path`, raising the open-files limit once if the process has run out.
///
/// Only an `EMFILE` failure is retried, and only once.  If raising the limit fails the original
/// error is returned; any other error, or a second failure, is returned unchanged.
pub fn open_with_retry<O: OutputOpener + ?Sized>(
    opener: &O,
    path: &Path,
    qualities: bool,
) -> io::Result<Box<dyn SequenceWriter>> {
    match opener.open(path, qualities) {
        Err(err) if is_too_many_open_files(&err) => {
            warn!(
                "Too many open files while opening {}, raising the limit by {}",
                path.to_string_lossy(),
                OPEN_FILES_LIMIT_INCREMENT
            );
            if let Err(raise_err) = opener.raise_open_files_limit(OPEN_FILES_LIMIT_INCREMENT) {
                warn!("Unable to raise the open files limit: {}", raise_err);
                return Err(err);
            }
            opener.open(path, qualities)
        }
        result => result,
    }
}

/// The current `(soft, hard)` limits on open file descriptors for this process.
#[cfg(unix)]
#[allow(unsafe_code)]
pub fn open_files_limit() -> io::Result<(u64, u64)> {
    let mut limit = libc::rlimit { rlim_cur: 0, rlim_max: 0 };
    let result = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) };
    if result != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok((limit.rlim_cur as u64, limit.rlim_max as u64))
}

#[cfg(not(unix))]
pub fn open_files_limit() -> io::Result<(u64, u64)> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "open files limit is only available on unix"))
}

/// Raise the soft limit on open file descriptors by `increment`, never past the hard limit.
#[cfg(unix)]
#[allow(unsafe_code)]
pub fn raise_open_files_limit(increment: u64) -> io::Result<()> {
    let (soft, hard) = open_files_limit()?;
    let new_soft = soft.saturating_add(increment).min(hard);
    if new_soft <= soft {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!("The open files limit is already at its maximum of {}", hard),
        ));
    }
    let limit = libc::rlimit {
        rlim_cur: new_soft as libc::rlim_t,
        rlim_max: hard as libc::rlim_t,
    };
    let result = unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &limit) };
    if result != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn raise_open_files_limit(_increment: u64) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "open files limit is only available on unix"))
}


#[cfg(test)]
mod test {
    use std::path::Path;

    use crate::utils::test_commons::{read, RecordingOpener};

    use super::{is_too_many_open_files, open_with_retry};

    #[test]
    fn test_is_too_many_open_files() {
        assert!(is_too_many_open_files(&std::io::Error::from_raw_os_error(libc::EMFILE)));
        assert!(!is_too_many_open_files(&std::io::Error::from_raw_os_error(libc::ENOENT)));
        assert!(!is_too_many_open_files(&std::io::Error::new(std::io::ErrorKind::Other, "x")));
    }

    #[test]
    fn test_open_with_retry_succeeds_without_raising() {
        let opener = RecordingOpener::new();
        let mut writer = open_with_retry(&opener, Path::new("a.fq"), true).unwrap();
        writer.write(&read("r1", b"ACGT")).unwrap();
        assert_eq!(opener.raise_calls(), 0);
        assert_eq!(opener.names_written_to("a.fq"), vec!["r1"]);
    }

    #[test]
    fn test_open_with_retry_raises_once_then_retries() {
        let opener = RecordingOpener::with_emfile_failures(1, false);
        assert!(open_with_retry(&opener, Path::new("a.fq"), true).is_ok());
        assert_eq!(opener.raise_calls(), 1);
        assert_eq!(opener.opened(), vec!["a.fq"]);
    }

    #[test]
    fn test_open_with_retry_retries_only_once() {
        let opener = RecordingOpener::with_emfile_failures(2, false);
        let err = open_with_retry(&opener, Path::new("a.fq"), true).err().unwrap();
        assert!(is_too_many_open_files(&err));
        assert_eq!(opener.raise_calls(), 1);
        assert!(opener.opened().is_empty());
    }

    #[test]
    fn test_open_with_retry_returns_original_error_when_raise_fails() {
        let opener = RecordingOpener::with_emfile_failures(1, true);
        let err = open_with_retry(&opener, Path::new("a.fq"), true).err().unwrap();
        assert!(is_too_many_open_files(&err));
        assert_eq!(opener.raise_calls(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_open_files_limit_is_readable() {
        let (soft, hard) = super::open_files_limit().unwrap();
        assert!(soft <= hard);
    }
}
