use std::fmt;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::io::RawFd;

#[cfg(not(unix))]
type RawFd = i32;

/// Identity under which the [`Manager`](crate::Manager) deduplicates
/// [`RegionList`](crate::RegionList)s: either a filesystem path or an OS file
/// descriptor borrowed from the caller.
///
/// Equality (and hashing) is by value: two `FileKey::Path` with the same
/// path always refer to the same `RegionList`, but two `FileKey::Fd` wrapping
/// different descriptor numbers are distinct keys even if the descriptors
/// happen to point at the same underlying file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FileKey {
    Path(PathBuf),
    Fd(RawFd),
}

impl FileKey {
    #[inline]
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        FileKey::Path(path.into())
    }

    #[inline]
    pub fn from_fd(fd: RawFd) -> Self {
        FileKey::Fd(fd)
    }

    #[inline]
    pub fn as_path(&self) -> Option<&Path> {
        match self {
            FileKey::Path(p) => Some(p.as_path()),
            FileKey::Fd(_) => None,
        }
    }

    #[inline]
    pub fn as_fd(&self) -> Option<RawFd> {
        match self {
            FileKey::Path(_) => None,
            FileKey::Fd(fd) => Some(*fd),
        }
    }

    /// Name of the variant, used in `WrongKeyKind` error messages.
    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            FileKey::Path(_) => "path",
            FileKey::Fd(_) => "fd",
        }
    }
}

impl From<PathBuf> for FileKey {
    fn from(p: PathBuf) -> Self {
        FileKey::Path(p)
    }
}

impl From<&Path> for FileKey {
    fn from(p: &Path) -> Self {
        FileKey::Path(p.to_path_buf())
    }
}

impl fmt::Display for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileKey::Path(p) => write!(f, "{}", p.display()),
            FileKey::Fd(fd) => write!(f, "fd:{fd}"),
        }
    }
}
