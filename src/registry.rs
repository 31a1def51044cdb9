use std::path::Path;

use crate::buffer::{Buffer, BufferFlags};

/// A directory of live buffers with unique names.
///
/// The set owns its buffers. Requested names are kept unique by appending
/// `<2>`, `<3>`, … as needed, so a name identifies a buffer for the
/// lifetime of the set. Save-log sibling buffers are owned by their buffer
/// directly and never appear here.
pub struct BufferSet {
    buffers: Vec<Buffer>,
}

impl BufferSet {
    /// Creates an empty buffer directory.
    pub fn new() -> Self {
        BufferSet {
            buffers: Vec::new(),
        }
    }

    /// Creates a buffer, adjusting `name` to keep it unique within the set.
    pub fn create(&mut self, name: &str, flags: BufferFlags) -> &mut Buffer {
        let unique = self.unique_name(name);
        self.buffers.push(Buffer::new(unique, flags));
        self.buffers.last_mut().unwrap()
    }

    /// Smallest-suffix free variant of `name`: the name itself, then
    /// `name<2>`, `name<3>`, …
    fn unique_name(&self, name: &str) -> String {
        if self.find_by_name(name).is_none() {
            return name.to_string();
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}<{}>", name, n);
            if self.find_by_name(&candidate).is_none() {
                return candidate;
            }
            n += 1;
        }
    }

    /// Looks a buffer up by name.
    pub fn find_by_name(&self, name: &str) -> Option<&Buffer> {
        self.buffers.iter().find(|b| b.name() == name)
    }

    /// Looks a buffer up by name, mutably.
    pub fn find_by_name_mut(&mut self, name: &str) -> Option<&mut Buffer> {
        self.buffers.iter_mut().find(|b| b.name() == name)
    }

    /// Looks a buffer up by the file it is associated with.
    pub fn find_by_filename(&self, path: impl AsRef<Path>) -> Option<&Buffer> {
        let path = path.as_ref();
        self.buffers.iter().find(|b| b.filename() == Some(path))
    }

    /// All buffers, in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Buffer> {
        self.buffers.iter()
    }

    /// The buffers a user-facing listing should show, skipping `SYSTEM`
    /// ones.
    pub fn iter_user(&self) -> impl Iterator<Item = &Buffer> {
        self.buffers
            .iter()
            .filter(|b| !b.flags().contains(BufferFlags::SYSTEM))
    }

    /// Two distinct buffers, mutably; for cross-buffer edits such as
    /// [`Buffer::insert_from`].
    pub fn pair_mut(&mut self, first: &str, second: &str) -> Option<(&mut Buffer, &mut Buffer)> {
        let a = self.buffers.iter().position(|b| b.name() == first)?;
        let b = self.buffers.iter().position(|b| b.name() == second)?;
        if a == b {
            return None;
        }
        if a < b {
            let (left, right) = self.buffers.split_at_mut(b);
            Some((&mut left[a], &mut right[0]))
        } else {
            let (left, right) = self.buffers.split_at_mut(a);
            Some((&mut right[0], &mut left[b]))
        }
    }

    /// Associates a buffer with a file and renames it to the file's
    /// basename, unique-ified against the rest of the set.
    ///
    /// Returns the new name, or `None` when no buffer is called `name`.
    pub fn set_filename(&mut self, name: &str, path: impl AsRef<Path>) -> Option<String> {
        let index = self.buffers.iter().position(|b| b.name() == name)?;
        let path = path.as_ref();
        let base = path
            .file_name()
            .map(|base| base.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());

        // the buffer must not collide with itself while picking the name
        self.buffers[index].name = String::new();
        let unique = self.unique_name(&base);

        let buffer = &mut self.buffers[index];
        buffer.name = unique.clone();
        buffer.filename = Some(path.to_path_buf());
        Some(unique)
    }

    /// Releases a buffer: its data type is closed, its contents and undo
    /// history dropped, and its name becomes free again. Returns `false`
    /// when no buffer is called `name`.
    pub fn remove(&mut self, name: &str) -> bool {
        match self.buffers.iter().position(|b| b.name() == name) {
            Some(index) => {
                let mut buffer = self.buffers.remove(index);
                buffer.close();
                true
            }
            None => false,
        }
    }

    /// Number of buffers in the set, system ones included.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether the set holds no buffers.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

impl Default for BufferSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique() {
        let mut set = BufferSet::new();
        set.create("*scratch*", BufferFlags::empty());
        set.create("*scratch*", BufferFlags::empty());
        set.create("*scratch*", BufferFlags::empty());

        assert!(set.find_by_name("*scratch*").is_some());
        assert!(set.find_by_name("*scratch*<2>").is_some());
        assert!(set.find_by_name("*scratch*<3>").is_some());
        assert!(set.find_by_name("*scratch*<4>").is_none());
    }

    #[test]
    fn removed_names_become_free() {
        let mut set = BufferSet::new();
        set.create("b", BufferFlags::empty());
        set.create("b", BufferFlags::empty());
        assert!(set.remove("b"));
        assert!(!set.remove("b"));

        set.create("b", BufferFlags::empty());
        assert!(set.find_by_name("b").is_some());
        assert!(set.find_by_name("b<2>").is_some());
    }

    #[test]
    fn find_by_filename() {
        let mut set = BufferSet::new();
        set.create("readme", BufferFlags::empty());
        set.set_filename("readme", "/tmp/README.md").unwrap();

        assert!(set.find_by_filename("/tmp/README.md").is_some());
        assert!(set.find_by_filename("/tmp/other").is_none());
    }

    #[test]
    fn set_filename_renames_to_the_basename() {
        let mut set = BufferSet::new();
        set.create("old", BufferFlags::empty());
        let name = set.set_filename("old", "/home/user/notes.txt").unwrap();
        assert_eq!(name, "notes.txt");
        assert!(set.find_by_name("old").is_none());

        // a second buffer on an equally named file gets a suffix
        set.create("other", BufferFlags::empty());
        let name = set.set_filename("other", "/elsewhere/notes.txt").unwrap();
        assert_eq!(name, "notes.txt<2>");
    }

    #[test]
    fn system_buffers_are_hidden_from_user_listings() {
        let mut set = BufferSet::new();
        set.create("visible", BufferFlags::empty());
        set.create("*internal*", BufferFlags::SYSTEM);

        let user: Vec<&str> = set.iter_user().map(|b| b.name()).collect();
        assert_eq!(user, ["visible"]);
        assert_eq!(set.iter().count(), 2);
    }

    #[test]
    fn pair_mut_allows_cross_buffer_copies() {
        let mut set = BufferSet::new();
        set.create("src", BufferFlags::empty()).insert(0, b"payload");
        set.create("dst", BufferFlags::empty()).insert(0, b"<>");

        let (dst, src) = set.pair_mut("dst", "src").unwrap();
        dst.insert_from(1, src, 0, 7);
        assert_eq!(dst.contents(), b"<payload>");

        assert!(set.pair_mut("dst", "dst").is_none());
        assert!(set.pair_mut("dst", "missing").is_none());
    }
}
