use std::fmt::{self, Write};
use sqlx::any::AnyKind;

/// Helper struct for generating one SQL statement.
#[derive(Debug)]
pub struct SqlWriter {
    kind: AnyKind,
    text: String,
}

impl SqlWriter {
    pub fn new(kind: AnyKind) -> Self {
        Self { kind, text: String::new() }
    }

    pub fn kind(&self) -> AnyKind {
        self.kind
    }

    /// Appends the string verbatim into the SQL statement.
    pub fn write_str(&mut self, x: &str) {
        self.text.push_str(x);
    }

    /// Appends a quoted identifier into the SQL statement, using the quote
    /// character of the target database (backticks on MySQL, double quotes
    /// elsewhere).
    pub fn write_name(&mut self, name: &str) {
        let quote = match self.kind {
            AnyKind::MySql => '`',
            _ => '"',
        };
        self.text.reserve(2 + name.len());
        self.text.push(quote);
        for c in name.chars() {
            if c == quote {
                self.text.push(quote);
            }
            self.text.push(c);
        }
        self.text.push(quote);
    }

    /// Appends a parameter with given **zero-based** index, using the
    /// placeholder syntax of the target database (`$n` for Postgres, `?n` for
    /// SQLite, plain `?` for MySQL).
    pub fn write_param(&mut self, idx: usize) {
        match self.kind {
            AnyKind::Postgres => write!(self, "${}", idx + 1),
            AnyKind::Sqlite => write!(self, "?{}", idx + 1),
            AnyKind::MySql => self.write_str("?"),
        }
    }

    /// Appends a string literal, quoted and escaped.
    pub fn write_literal_str(&mut self, value: &str) {
        self.text.reserve(2 + value.len());
        self.text.push('\'');
        for c in value.chars() {
            if c == '\'' {
                self.text.push('\'');
            }
            self.text.push(c);
        }
        self.text.push('\'');
    }

    /// This method makes the `write!` macro work with this struct.
    pub fn write_fmt(&mut self, fmt: fmt::Arguments<'_>) {
        self.text.write_fmt(fmt).expect("formatting failed")
    }

    /// Returns the produced SQL statement.
    pub fn build(self) -> String {
        self.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_identifiers_per_dialect() {
        let mut sql = SqlWriter::new(AnyKind::Postgres);
        sql.write_name(r#"weird"name"#);
        assert_eq!(sql.build(), r#""weird""name""#);

        let mut sql = SqlWriter::new(AnyKind::MySql);
        sql.write_name("Todo");
        assert_eq!(sql.build(), "`Todo`");
    }

    #[test]
    fn parameter_syntax_per_dialect() {
        let mut sql = SqlWriter::new(AnyKind::Postgres);
        sql.write_param(0);
        assert_eq!(sql.build(), "$1");

        let mut sql = SqlWriter::new(AnyKind::Sqlite);
        sql.write_param(1);
        assert_eq!(sql.build(), "?2");

        let mut sql = SqlWriter::new(AnyKind::MySql);
        sql.write_param(3);
        assert_eq!(sql.build(), "?");
    }

    #[test]
    fn escapes_string_literals() {
        let mut sql = SqlWriter::new(AnyKind::Sqlite);
        sql.write_literal_str("it's");
        assert_eq!(sql.build(), "'it''s'");
    }
}
