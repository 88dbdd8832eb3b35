//! Source positions shared by every diagnostic in the engine.

use std::{fmt, ops::Range};

use serde::{Deserialize, Serialize};

/// A span of characters in a source file, given as a half-open range of
/// character offsets.
pub type Span = Range<usize>;

/// A human-facing position in a source file.
///
/// Both the line and the column are 1-based, and the column counts characters
/// rather than bytes.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Location {
    pub line:   usize,
    pub column: usize,
}

impl Location {
    #[must_use]
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Converts character offsets into [`Location`]s for a given piece of source
/// text.
///
/// The index is built once per source and answers queries in logarithmic time,
/// which matters as every node in the syntax tree asks for its location.
#[derive(Clone, Debug)]
pub struct LineIndex {
    /// The character offset at which each line starts.
    line_starts: Vec<usize>,

    /// The total number of characters in the source.
    len: usize,
}

impl LineIndex {
    /// Builds the line index for `source`.
    #[must_use]
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        let mut len = 0;
        for (offset, c) in source.chars().enumerate() {
            if c == '\n' {
                line_starts.push(offset + 1);
            }
            len = offset + 1;
        }
        Self { line_starts, len }
    }

    /// Gets the location of the character at `offset`.
    ///
    /// Offsets past the end of the source are clamped to the end, so that
    /// end-of-file diagnostics still point somewhere valid.
    #[must_use]
    pub fn location(&self, offset: usize) -> Location {
        let offset = offset.min(self.len);
        let line = match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next - 1,
        };
        Location::new(line + 1, offset - self.line_starts[line] + 1)
    }

    /// Gets the character offset of `location`.
    ///
    /// Locations past the end of their line or of the source are clamped, so
    /// an editor cursor just after the last character maps to the end.
    #[must_use]
    pub fn offset(&self, location: Location) -> usize {
        let line = location.line.clamp(1, self.line_starts.len()) - 1;
        let start = self.line_starts[line];
        let end = self.line_starts.get(line + 1).map_or(self.len, |next| next - 1);
        (start + location.column.saturating_sub(1)).min(end)
    }

    /// Gets the 1-based line on which the character at `offset` lives.
    #[must_use]
    pub fn line(&self, offset: usize) -> usize {
        self.location(offset).line
    }

    /// The number of characters in the indexed source.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Checks whether the indexed source was empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod test {
    use crate::location::{LineIndex, Location};

    #[test]
    fn maps_offsets_to_lines_and_columns() {
        let index = LineIndex::new("ab\ncd\n\nef");
        assert_eq!(index.location(0), Location::new(1, 1));
        assert_eq!(index.location(1), Location::new(1, 2));
        assert_eq!(index.location(3), Location::new(2, 1));
        assert_eq!(index.location(6), Location::new(3, 1));
        assert_eq!(index.location(8), Location::new(4, 2));
    }

    #[test]
    fn maps_locations_back_to_offsets() {
        let index = LineIndex::new("ab\ncd\n\nef");
        assert_eq!(index.offset(Location::new(2, 2)), 4);
        assert_eq!(index.offset(Location::new(1, 40)), 2);
        assert_eq!(index.offset(Location::new(9, 1)), 7);
        assert_eq!(index.offset(index.location(8)), 8);
    }

    #[test]
    fn clamps_offsets_past_the_end() {
        let index = LineIndex::new("abc");
        assert_eq!(index.location(100), Location::new(1, 4));

        let empty = LineIndex::new("");
        assert!(empty.is_empty());
        assert_eq!(empty.location(5), Location::new(1, 1));
    }
}
