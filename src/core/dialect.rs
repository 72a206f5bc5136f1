//! SQL dialect strategies
//!
//! Statements are assembled with MySQL-style backtick identifiers. A
//! [`Dialect`] rewrites those fragments into its own identifier quoting,
//! decides how positional placeholders are spelled on the wire and tells the
//! binder how string literals escape.

use std::fmt::Debug;

/// Identifier quoting and placeholder conventions of one SQL dialect
pub trait Dialect: Send + Sync + Debug {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Character that delimits identifiers in this dialect
    fn quote_char(&self) -> char;

    /// Rewrite backtick-quoted identifiers in `sql` into this dialect's
    /// quoting.
    ///
    /// The default is the identity transform, so a dialect that does not
    /// override it leaves fragments untouched.
    fn convert_identifiers(&self, sql: &str) -> String {
        sql.to_string()
    }

    /// Quote a possibly dot-qualified identifier for this dialect
    fn quote_identifier(&self, name: &str) -> String {
        self.convert_identifiers(&backtick_identifier(name))
    }

    /// Spelling of the `index`-th (1-based) positional placeholder
    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    /// Whether a backslash escapes the next character inside string literals
    fn backslash_escapes(&self) -> bool {
        false
    }
}

/// Wrap each dot-separated part of `name` in backticks.
///
/// Embedded backticks are doubled; a bare `*` part stays unquoted so that
/// `t.*` keeps working.
pub fn backtick_identifier(name: &str) -> String {
    name.split('.')
        .map(|part| {
            if part == "*" {
                part.to_string()
            } else {
                format!("`{}`", part.replace('`', "``"))
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// SQLite: backtick identifiers, `?` placeholders
#[derive(Debug, Clone, Copy, Default)]
pub struct BacktickDialect;

impl Dialect for BacktickDialect {
    fn name(&self) -> &'static str {
        "backtick"
    }

    fn quote_char(&self) -> char {
        '`'
    }
}

/// MySQL: backtick identifiers, `?` placeholders, backslash escapes in literals
#[derive(Debug, Clone, Copy, Default)]
pub struct MysqlDialect;

impl Dialect for MysqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_char(&self) -> char {
        '`'
    }

    fn backslash_escapes(&self) -> bool {
        true
    }
}

/// PostgreSQL: double-quoted identifiers, `$n` placeholders
#[derive(Debug, Clone, Copy, Default)]
pub struct DoubleQuoteDialect;

impl Dialect for DoubleQuoteDialect {
    fn name(&self) -> &'static str {
        "double-quote"
    }

    fn quote_char(&self) -> char {
        '"'
    }

    fn convert_identifiers(&self, sql: &str) -> String {
        rewrite_backticks(sql, '"', '"')
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }
}

/// SQL Server: bracketed identifiers, `@Pn` placeholders
#[derive(Debug, Clone, Copy, Default)]
pub struct BracketDialect;

impl Dialect for BracketDialect {
    fn name(&self) -> &'static str {
        "bracket"
    }

    fn quote_char(&self) -> char {
        '['
    }

    fn convert_identifiers(&self, sql: &str) -> String {
        rewrite_backticks(sql, '[', ']')
    }

    fn placeholder(&self, index: usize) -> String {
        format!("@P{}", index)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Lexeme {
    Plain,
    SingleQuoted,
    DoubleQuoted,
    Backticked,
}

/// Replace backtick identifier quotes outside string literals with
/// `open`/`close`. A `close` inside an identifier is doubled.
fn rewrite_backticks(sql: &str, open: char, close: char) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut state = Lexeme::Plain;

    while let Some(c) = chars.next() {
        match state {
            Lexeme::Plain => match c {
                '`' => {
                    out.push(open);
                    state = Lexeme::Backticked;
                }
                '\'' => {
                    out.push(c);
                    state = Lexeme::SingleQuoted;
                }
                '"' => {
                    out.push(c);
                    state = Lexeme::DoubleQuoted;
                }
                _ => out.push(c),
            },
            Lexeme::SingleQuoted | Lexeme::DoubleQuoted => {
                out.push(c);
                let end = if state == Lexeme::SingleQuoted { '\'' } else { '"' };
                if c == end {
                    if chars.peek() == Some(&end) {
                        out.push(end);
                        chars.next();
                    } else {
                        state = Lexeme::Plain;
                    }
                }
            }
            Lexeme::Backticked => match c {
                '`' if chars.peek() == Some(&'`') => {
                    chars.next();
                    out.push('`');
                }
                '`' => {
                    out.push(close);
                    state = Lexeme::Plain;
                }
                c if c == close => {
                    out.push(close);
                    out.push(close);
                }
                _ => out.push(c),
            },
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backtick_identifier() {
        assert_eq!(backtick_identifier("Users"), "`Users`");
        assert_eq!(backtick_identifier("app.Users"), "`app`.`Users`");
        assert_eq!(backtick_identifier("u.*"), "`u`.*");
        assert_eq!(backtick_identifier("we`ird"), "`we``ird`");
    }

    #[test]
    fn test_backtick_dialect_is_identity() {
        let sql = "SELECT `Id` FROM `Users` WHERE `Name` = :Name";
        assert_eq!(BacktickDialect.convert_identifiers(sql), sql);
        assert_eq!(BacktickDialect.placeholder(3), "?");
    }

    #[test]
    fn test_double_quote_conversion() {
        let sql = "SELECT `Id`, `Name` FROM `Users` WHERE `Id` IN (:Id0, :Id1)";
        assert_eq!(
            DoubleQuoteDialect.convert_identifiers(sql),
            "SELECT \"Id\", \"Name\" FROM \"Users\" WHERE \"Id\" IN (:Id0, :Id1)"
        );
    }

    #[test]
    fn test_double_quote_leaves_literals_alone() {
        let sql = "SELECT `a` FROM `t` WHERE `b` = 'it''s `quoted`'";
        assert_eq!(
            DoubleQuoteDialect.convert_identifiers(sql),
            "SELECT \"a\" FROM \"t\" WHERE \"b\" = 'it''s `quoted`'"
        );
    }

    #[test]
    fn test_double_quote_escapes_inside_identifiers() {
        assert_eq!(DoubleQuoteDialect.quote_identifier("we`ird"), "\"we`ird\"");
        assert_eq!(DoubleQuoteDialect.quote_identifier("say\"hi"), "\"say\"\"hi\"");
        assert_eq!(DoubleQuoteDialect.quote_identifier("s.t"), "\"s\".\"t\"");
    }

    #[test]
    fn test_mysql_dialect_keeps_backticks_and_honours_backslashes() {
        let sql = "SELECT `Id` FROM `Users`";
        assert_eq!(MysqlDialect.convert_identifiers(sql), sql);
        assert_eq!(MysqlDialect.placeholder(2), "?");
        assert!(MysqlDialect.backslash_escapes());
        assert!(!BacktickDialect.backslash_escapes());
        assert!(!DoubleQuoteDialect.backslash_escapes());
    }

    #[test]
    fn test_bracket_conversion() {
        let sql = "SELECT `Id` FROM `dbo`.`Users` WHERE `Name` = 'a `b`' AND `x]y` = @P1";
        assert_eq!(
            BracketDialect.convert_identifiers(sql),
            "SELECT [Id] FROM [dbo].[Users] WHERE [Name] = 'a `b`' AND [x]]y] = @P1"
        );
        assert_eq!(BracketDialect.quote_identifier("u.*"), "[u].*");
        assert_eq!(BracketDialect.placeholder(3), "@P3");
    }

    #[test]
    fn test_double_quote_placeholders() {
        assert_eq!(DoubleQuoteDialect.placeholder(1), "$1");
        assert_eq!(DoubleQuoteDialect.placeholder(12), "$12");
    }
}
