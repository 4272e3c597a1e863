// Output buffer with indentation for emitted C

use crate::diagnostics::CompileError;

#[derive(Debug, Default)]
pub struct CWriter {
    output: String,
    indent: usize,
}

impl CWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(&mut self, s: &str) {
        if s.is_empty() {
            self.output.push('\n');
            return;
        }
        for _ in 0..self.indent {
            self.output.push_str("    ");
        }
        self.output.push_str(s);
        self.output.push('\n');
    }

    /// `s` followed by `{`, then indent.
    pub fn open(&mut self, s: &str) {
        if s.is_empty() {
            self.line("{");
        } else {
            self.line(&format!("{s} {{"));
        }
        self.indent += 1;
    }

    /// Dedent, then `}` followed by `tail` (for `} else {`, `} while (0);`).
    pub fn close(&mut self, tail: &str) {
        self.indent = self.indent.saturating_sub(1);
        self.line(&format!("}}{tail}"));
    }

    /// `} else {` between the two arms of an if.
    pub fn else_branch(&mut self) {
        self.indent = self.indent.saturating_sub(1);
        self.line("} else {");
        self.indent += 1;
    }

    /// Empty buffer one level deeper, for code that may or may not be
    /// wrapped in a block once it is known whether it produced anything.
    pub fn nested(&self) -> CWriter {
        CWriter { output: String::new(), indent: self.indent + 1 }
    }

    /// Empty buffer at the current depth, for statements that are spliced
    /// back in place after something has been emitted ahead of them.
    pub fn detached(&self) -> CWriter {
        CWriter { output: String::new(), indent: self.indent }
    }

    pub fn splice(&mut self, inner: CWriter) {
        self.output.push_str(&inner.output);
    }

    pub fn is_empty(&self) -> bool {
        self.output.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.indent
    }

    /// A type declaration's text without its trailing newline.
    pub fn finish_decl(self) -> String {
        self.output.trim_end().to_string()
    }

    /// The finished text. Unbalanced braces mean a lowering bug upstream.
    pub fn finish(self, function: &str) -> Result<String, CompileError> {
        if self.indent != 0 {
            return Err(CompileError::verification(
                function,
                format!("unbalanced C blocks (depth {} at end)", self.indent),
            ));
        }
        Ok(self.output)
    }
}
