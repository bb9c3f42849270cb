//! Conversions between UTF-16 offsets and line/column positions.
//!
//! Browsers count string positions in UTF-16 code units, and so do editors
//! that speak LSP-style positions. `character` here is a UTF-16 column.

/// Zero-based line and UTF-16 column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Position {
    pub line: usize,
    pub character: usize,
}

impl Position {
    pub fn new(line: usize, character: usize) -> Self {
        Self { line, character }
    }
}

/// Length of `text` in UTF-16 code units.
pub fn utf16_len(text: &str) -> usize {
    text.chars().map(char::len_utf16).sum()
}

/// Position of the UTF-16 `offset` in `text`. Offsets past the end clamp to
/// the end; an offset in the middle of a surrogate pair snaps to the start of
/// that character.
pub fn position_at(text: &str, offset: usize) -> Position {
    let mut line = 0;
    let mut character = 0;
    let mut consumed = 0;

    for c in text.chars() {
        let width = c.len_utf16();
        if consumed + width > offset {
            break;
        }
        consumed += width;
        if c == '\n' {
            line += 1;
            character = 0;
        } else {
            character += width;
        }
    }

    Position { line, character }
}

/// UTF-16 offset of `position` in `text`. Columns past the end of a line clamp
/// to the line end; lines past the end clamp to the end of the text.
pub fn offset_at(text: &str, position: Position) -> usize {
    let mut offset = 0;

    for (index, line) in text.split('\n').enumerate() {
        let line_len = utf16_len(line);
        if index == position.line {
            return offset + position.character.min(line_len);
        }
        // +1 for the newline that split() consumed
        offset += line_len + 1;
    }

    utf16_len(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line() {
        assert_eq!(position_at("hello", 0), Position::new(0, 0));
        assert_eq!(position_at("hello", 5), Position::new(0, 5));
        assert_eq!(offset_at("hello", Position::new(0, 3)), 3);
    }

    #[test]
    fn multi_line() {
        let text = "ab\ncd\n\nef";
        assert_eq!(position_at(text, 2), Position::new(0, 2));
        assert_eq!(position_at(text, 3), Position::new(1, 0));
        assert_eq!(position_at(text, 7), Position::new(3, 0));
        assert_eq!(offset_at(text, Position::new(1, 1)), 4);
        assert_eq!(offset_at(text, Position::new(3, 2)), 9);
    }

    #[test]
    fn clamps_out_of_range() {
        assert_eq!(position_at("ab\ncd", 99), Position::new(1, 2));
        assert_eq!(offset_at("ab\ncd", Position::new(0, 99)), 2);
        assert_eq!(offset_at("ab\ncd", Position::new(9, 0)), 5);
    }

    #[test]
    fn counts_utf16_units() {
        // U+1F47B is two UTF-16 units
        let text = "a\u{1F47B}b";
        assert_eq!(utf16_len(text), 4);
        assert_eq!(position_at(text, 3), Position::new(0, 3));
        assert_eq!(position_at(text, 2), Position::new(0, 1));
        assert_eq!(offset_at(text, Position::new(0, 3)), 3);
    }
}
