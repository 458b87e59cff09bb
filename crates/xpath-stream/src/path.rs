//! Builder for the concrete, position-qualified path of a match.

use std::fmt;
use std::fmt::Write;

/// Growable path buffer with truncate-to-mark semantics.
///
/// The match engine appends one step per descent and truncates back to the
/// recorded length when the scope ends, so the buffer always spells the
/// concrete path of the element currently under the cursor.
#[derive(Debug, Default, Clone)]
pub struct PathBuilder {
    buf: String,
}

impl PathBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one step. `index` is the 1-based occurrence count of the name
    /// among siblings; the root step carries no index.
    pub fn push_step(&mut self, name: &str, index: Option<u32>) {
        match index {
            Some(i) => {
                let _ = write!(self.buf, "/{name}[{i}]");
            }
            None => {
                let _ = write!(self.buf, "/{name}");
            }
        }
    }

    /// Current length, used as a restore mark.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Drop everything appended after `mark`.
    pub fn truncate(&mut self, mark: usize) {
        self.buf.truncate(mark);
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }
}

impl fmt::Display for PathBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_step_has_no_index() {
        let mut path = PathBuilder::new();
        path.push_step("ukraine", None);
        path.push_step("geography", Some(1));
        path.push_step("region", Some(2));
        assert_eq!(path.as_str(), "/ukraine/geography[1]/region[2]");
    }

    #[test]
    fn test_truncate_restores_previous_path() {
        let mut path = PathBuilder::new();
        path.push_step("root", None);
        let mark = path.len();
        path.push_step("child", Some(3));
        assert_eq!(path.as_str(), "/root/child[3]");
        path.truncate(mark);
        assert_eq!(path.as_str(), "/root");
    }
}
