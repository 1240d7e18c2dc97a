//! Which paths the watcher cares about, and what a raw notification means

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use notify::event::ModifyKind;

use crate::types::EventKind;

/// Excludes the store's metadata subtree
#[derive(Debug, Clone)]
pub struct PathFilter {
    root: PathBuf,
    metadata_dir: OsString,
}

impl PathFilter {
    pub fn new(root: impl Into<PathBuf>, metadata_dir: &str) -> Self {
        Self {
            root: root.into(),
            metadata_dir: OsString::from(metadata_dir),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// True for the root itself and for anything inside the metadata directory
    pub fn is_excluded(&self, path: &Path) -> bool {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        if relative.as_os_str().is_empty() {
            return true;
        }
        relative
            .components()
            .any(|c| c.as_os_str() == self.metadata_dir.as_os_str())
    }
}

/// Map a raw notification onto the event kinds the scheduler understands.
/// Access and unclassified notifications are dropped.
pub fn classify(kind: &notify::EventKind) -> Option<EventKind> {
    match kind {
        notify::EventKind::Create(_) => Some(EventKind::Created),
        notify::EventKind::Modify(ModifyKind::Name(_)) => Some(EventKind::Moved),
        notify::EventKind::Modify(_) => Some(EventKind::Modified),
        notify::EventKind::Remove(_) => Some(EventKind::Deleted),
        notify::EventKind::Access(_) | notify::EventKind::Any | notify::EventKind::Other => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, RemoveKind, RenameMode};

    #[test]
    fn test_metadata_subtree_excluded() {
        let filter = PathFilter::new("/home/me/notes", ".git");

        assert!(filter.is_excluded(Path::new("/home/me/notes/.git")));
        assert!(filter.is_excluded(Path::new("/home/me/notes/.git/objects/ab/cdef")));
        assert!(filter.is_excluded(Path::new("/home/me/notes/sub/.git/HEAD")));
        assert!(filter.is_excluded(Path::new("/home/me/notes")));

        assert!(!filter.is_excluded(Path::new("/home/me/notes/todo.txt")));
        assert!(!filter.is_excluded(Path::new("/home/me/notes/.gitignore")));
        assert!(!filter.is_excluded(Path::new("/home/me/notes/my.git.txt")));
    }

    #[test]
    fn test_root_named_like_metadata_is_not_excluded() {
        let filter = PathFilter::new("/srv/.git-mirror", ".git");
        assert!(!filter.is_excluded(Path::new("/srv/.git-mirror/a.txt")));
    }

    #[test]
    fn test_classify() {
        use notify::EventKind as K;

        assert_eq!(classify(&K::Create(CreateKind::File)), Some(EventKind::Created));
        assert_eq!(
            classify(&K::Modify(ModifyKind::Data(DataChange::Content))),
            Some(EventKind::Modified)
        );
        assert_eq!(
            classify(&K::Modify(ModifyKind::Name(RenameMode::To))),
            Some(EventKind::Moved)
        );
        assert_eq!(classify(&K::Remove(RemoveKind::Folder)), Some(EventKind::Deleted));
        assert_eq!(classify(&K::Access(AccessKind::Any)), None);
        assert_eq!(classify(&K::Other), None);
    }
}
