use std::fmt::Display;
use std::rc::Rc;

/// A position within a single source file, used to point diagnostics at the
/// offending token.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Span {
    pub line: usize,
    pub col: usize,
    pub file: Rc<str>,
    pub source: Rc<str>,
}

impl Default for Span {
    fn default() -> Self {
        Span {
            line: 0,
            col: 0,
            file: Rc::from(""),
            source: Rc::from(""),
        }
    }
}

impl Span {
    pub fn new(line: usize, col: usize, file: Rc<str>, source: Rc<str>) -> Self {
        Span {
            line,
            col,
            file,
            source,
        }
    }

    /// Render the offending source line with a caret pointing at `col`.
    fn caret_excerpt(&self) -> Option<String> {
        let line_text = self.source.lines().nth(self.line.saturating_sub(1))?;
        let mut out = String::new();
        out.push_str(line_text);
        out.push('\n');
        for _ in 0..self.col.saturating_sub(1) {
            out.push(' ');
        }
        out.push('^');
        Some(out)
    }
}

impl Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use colored::Colorize;

        write!(f, "{}:{}:{}", self.file, self.line, self.col)?;
        if let Some(excerpt) = self.caret_excerpt() {
            write!(f, "\n{}", excerpt.red())?;
        }
        Ok(())
    }
}
