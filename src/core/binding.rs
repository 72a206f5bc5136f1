//! Placeholder resolution
//!
//! Turns SQL written with `:name` or `?` placeholders plus a [`Params`]
//! table into the driver's positional form and an ordered value list.
//! Type hints are applied here, and list parameters expand into one
//! placeholder per element.

use super::dialect::Dialect;
use super::error::{DatabaseError, Result};
use super::value::{DatabaseValue, Param, ParamKey, Params};

/// How placeholders are written in a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `?`, keys `0..n` in order
    Positional,
    /// `:name`
    Named,
}

/// SQL in driver form together with its values in placeholder order
#[derive(Debug, Clone, PartialEq)]
pub struct BoundStatement {
    pub sql: String,
    pub values: Vec<DatabaseValue>,
}

/// Decide the placeholder style of `params`.
///
/// Keys that are exactly `0, 1, 2, ...` in order are positional; keys that
/// are all names are named. Anything else is rejected.
pub fn detect_style(params: &Params) -> Result<PlaceholderStyle> {
    let mut indexed = 0usize;
    let mut named = 0usize;

    for (position, (key, _)) in params.iter().enumerate() {
        match key {
            ParamKey::Index(i) if *i == position => indexed += 1,
            ParamKey::Index(i) => {
                return Err(DatabaseError::invalid_params(format!(
                    "positional parameter #{} found at position {}; positional keys must run 0..n",
                    i, position
                )))
            }
            ParamKey::Name(_) => named += 1,
        }
    }

    match (indexed, named) {
        (_, 0) => Ok(PlaceholderStyle::Positional),
        (0, _) => Ok(PlaceholderStyle::Named),
        _ => Err(DatabaseError::invalid_params(
            "positional and named parameters cannot be mixed in one statement",
        )),
    }
}

/// Rewrite `sql` for `dialect` and collect its bound values.
///
/// Without parameters the SQL is returned untouched.
pub fn bind(sql: &str, params: &Params, dialect: &dyn Dialect) -> Result<BoundStatement> {
    if params.is_empty() {
        return Ok(BoundStatement {
            sql: sql.to_string(),
            values: Vec::new(),
        });
    }

    let style = detect_style(params)?;
    let entries = params.as_slice();
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len() + 16);
    let mut values = Vec::new();
    let mut used = vec![false; params.len()];
    let mut next_index = 0usize;
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];

        if let Some(end) = skip_opaque(&chars, i, dialect.backslash_escapes()) {
            out.extend(&chars[i..end]);
            i = end;
            continue;
        }

        match (c, style) {
            (':', PlaceholderStyle::Named) if chars.get(i + 1) == Some(&':') => {
                out.push_str("::");
                i += 2;
            }
            (':', PlaceholderStyle::Named)
                if chars.get(i + 1).is_some_and(|ch| is_name_start(*ch)) =>
            {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && is_name_char(chars[end]) {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();
                let position = entries
                    .iter()
                    .position(|(k, _)| matches!(k, ParamKey::Name(n) if *n == name))
                    .ok_or_else(|| {
                        DatabaseError::invalid_params(format!("no value bound for :{}", name))
                    })?;
                used[position] = true;
                let (key, param) = &entries[position];
                emit(
                    key,
                    param,
                    parenthesized(&out, &chars, end),
                    &mut out,
                    &mut values,
                    dialect,
                )?;
                i = end;
            }
            ('?', PlaceholderStyle::Positional) => {
                if next_index >= entries.len() {
                    return Err(DatabaseError::invalid_params(format!(
                        "statement has more placeholders than the {} supplied parameters",
                        entries.len()
                    )));
                }
                used[next_index] = true;
                let (key, param) = &entries[next_index];
                emit(
                    key,
                    param,
                    parenthesized(&out, &chars, i + 1),
                    &mut out,
                    &mut values,
                    dialect,
                )?;
                next_index += 1;
                i += 1;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    if let Some(position) = used.iter().position(|u| !u) {
        let (key, _) = &entries[position];
        return Err(DatabaseError::invalid_params(format!(
            "parameter {} is not referenced by the statement",
            key
        )));
    }

    Ok(BoundStatement { sql: out, values })
}

fn emit(
    key: &ParamKey,
    param: &Param,
    already_parenthesized: bool,
    out: &mut String,
    values: &mut Vec<DatabaseValue>,
    dialect: &dyn Dialect,
) -> Result<()> {
    let bound = param.bound_values()?;

    match param {
        Param::List(..) => {
            if bound.is_empty() {
                return Err(DatabaseError::invalid_params(format!(
                    "list parameter {} is empty",
                    key
                )));
            }
            let mut placeholders = Vec::with_capacity(bound.len());
            for value in bound {
                values.push(value);
                placeholders.push(dialect.placeholder(values.len()));
            }
            if already_parenthesized {
                out.push_str(&placeholders.join(", "));
            } else {
                out.push('(');
                out.push_str(&placeholders.join(", "));
                out.push(')');
            }
        }
        _ => {
            values.extend(bound);
            out.push_str(&dialect.placeholder(values.len()));
        }
    }

    Ok(())
}

/// Whether the token ending at `after` sits alone inside `( ... )`.
fn parenthesized(out: &str, chars: &[char], after: usize) -> bool {
    out.trim_end().ends_with('(')
        && chars[after..]
            .iter()
            .find(|c| !c.is_whitespace())
            .is_some_and(|c| *c == ')')
}

/// If a quoted span or comment starts at `i`, return the index just past it.
///
/// With `backslash` set, `\<c>` inside a string literal is an escape.
fn skip_opaque(chars: &[char], i: usize, backslash: bool) -> Option<usize> {
    let c = chars[i];
    match c {
        '\'' | '"' | '`' => {
            let escapes = backslash && c != '`';
            let mut j = i + 1;
            while j < chars.len() {
                if escapes && chars[j] == '\\' {
                    j += 2;
                    continue;
                }
                if chars[j] == c {
                    if chars.get(j + 1) == Some(&c) {
                        j += 2;
                        continue;
                    }
                    return Some(j + 1);
                }
                j += 1;
            }
            Some(chars.len())
        }
        '-' if chars.get(i + 1) == Some(&'-') => {
            let end = chars[i..]
                .iter()
                .position(|ch| *ch == '\n')
                .map_or(chars.len(), |p| i + p);
            Some(end)
        }
        '/' if chars.get(i + 1) == Some(&'*') => {
            let mut j = i + 2;
            while j + 1 < chars.len() {
                if chars[j] == '*' && chars[j + 1] == '/' {
                    return Some(j + 2);
                }
                j += 1;
            }
            Some(chars.len())
        }
        _ => None,
    }
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dialect::{BacktickDialect, DoubleQuoteDialect, MysqlDialect};
    use crate::core::value::ParamType;

    fn s(v: &str) -> DatabaseValue {
        DatabaseValue::String(v.to_string())
    }

    #[test]
    fn test_detect_style() {
        assert_eq!(
            detect_style(&Params::positional([1, 2])).unwrap(),
            PlaceholderStyle::Positional
        );
        assert_eq!(
            detect_style(&Params::new().bind("a", 1)).unwrap(),
            PlaceholderStyle::Named
        );

        let mixed = Params::new().push(1).bind("a", 2);
        assert!(matches!(
            detect_style(&mixed),
            Err(DatabaseError::InvalidParameters(_))
        ));

        let mut gap = Params::new();
        gap.insert(ParamKey::Index(1), 5.into());
        assert!(detect_style(&gap).is_err());
    }

    #[test]
    fn test_named_binding_in_order_of_appearance() {
        let params = Params::new().bind("name", "A").bind("id", 1);
        let bound = bind(
            "SELECT * FROM t WHERE id = :id AND name = :name",
            &params,
            &BacktickDialect,
        )
        .unwrap();

        assert_eq!(bound.sql, "SELECT * FROM t WHERE id = ? AND name = ?");
        assert_eq!(bound.values, vec![s("1"), s("A")]);
    }

    #[test]
    fn test_named_placeholder_reused() {
        let params = Params::new().bind("v", 3);
        let bound = bind("SELECT :v + :v", &params, &DoubleQuoteDialect).unwrap();
        assert_eq!(bound.sql, "SELECT $1 + $2");
        assert_eq!(bound.values.len(), 2);
    }

    #[test]
    fn test_positional_binding_for_double_quote_dialect() {
        let params = Params::positional(["a", "b"]);
        let bound = bind(
            "INSERT INTO \"t\" (\"x\", \"y\") VALUES (?, ?)",
            &params,
            &DoubleQuoteDialect,
        )
        .unwrap();
        assert_eq!(bound.sql, "INSERT INTO \"t\" (\"x\", \"y\") VALUES ($1, $2)");
    }

    #[test]
    fn test_typed_parameters() {
        let params = Params::new()
            .bind("n", Param::typed("42", ParamType::Int))
            .bind("b", Param::typed(1, ParamType::Bool));
        let bound = bind("SELECT :n, :b", &params, &BacktickDialect).unwrap();
        assert_eq!(
            bound.values,
            vec![DatabaseValue::Long(42), DatabaseValue::Bool(true)]
        );
    }

    #[test]
    fn test_list_expansion_named() {
        let params = Params::new().bind("ids", Param::list([1, 2, 3]));
        let bound = bind("SELECT * FROM t WHERE id IN :ids", &params, &BacktickDialect).unwrap();
        assert_eq!(bound.sql, "SELECT * FROM t WHERE id IN (?, ?, ?)");
        assert_eq!(bound.values, vec![s("1"), s("2"), s("3")]);
    }

    #[test]
    fn test_list_expansion_inside_existing_parentheses() {
        let params = Params::new().bind("ids", Param::list([1, 2]));
        let bound = bind(
            "SELECT * FROM t WHERE id IN ( :ids )",
            &params,
            &DoubleQuoteDialect,
        )
        .unwrap();
        assert_eq!(bound.sql, "SELECT * FROM t WHERE id IN ( $1, $2 )");
    }

    #[test]
    fn test_list_expansion_positional() {
        let params = Params::positional([Param::from("x"), Param::list([7, 8])]);
        let bound = bind(
            "SELECT * FROM t WHERE a = ? AND b IN ?",
            &params,
            &BacktickDialect,
        )
        .unwrap();
        assert_eq!(bound.sql, "SELECT * FROM t WHERE a = ? AND b IN (?, ?)");
        assert_eq!(bound.values, vec![s("x"), s("7"), s("8")]);
    }

    #[test]
    fn test_empty_list_rejected() {
        let params = Params::new().bind("ids", Param::list(Vec::<i32>::new()));
        let err = bind("SELECT 1 WHERE 1 IN :ids", &params, &BacktickDialect).unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidParameters(_)));
    }

    #[test]
    fn test_literals_casts_and_comments_are_skipped() {
        let params = Params::new().bind("id", 1);
        let bound = bind(
            "SELECT '10:30', \"a:b\", x::text -- :nope\nFROM t /* :nope */ WHERE id = :id",
            &params,
            &DoubleQuoteDialect,
        )
        .unwrap();
        assert_eq!(
            bound.sql,
            "SELECT '10:30', \"a:b\", x::text -- :nope\nFROM t /* :nope */ WHERE id = $1"
        );
    }

    #[test]
    fn test_missing_and_unused_parameters() {
        let params = Params::new().bind("a", 1);
        assert!(bind("SELECT :b", &params, &BacktickDialect).is_err());

        let params = Params::new().bind("a", 1).bind("extra", 2);
        let err = bind("SELECT :a", &params, &BacktickDialect).unwrap_err();
        assert!(err.to_string().contains(":extra"));

        let params = Params::positional([1]);
        assert!(bind("SELECT ?, ?", &params, &BacktickDialect).is_err());
    }

    #[test]
    fn test_mysql_backslash_escaped_quote_stays_inside_literal() {
        let params = Params::new().bind("x", 1);
        let bound = bind(r"SELECT 'it\'s :x' AS s, :x AS v", &params, &MysqlDialect).unwrap();
        assert_eq!(bound.sql, r"SELECT 'it\'s :x' AS s, ? AS v");
        assert_eq!(bound.values, vec![s("1")]);

        let bound = bind(r#"SELECT "a\"b :x", :x"#, &params, &MysqlDialect).unwrap();
        assert_eq!(bound.sql, r#"SELECT "a\"b :x", ?"#);

        // A trailing backslash does not swallow the closing quote
        let bound = bind(r"SELECT 'dir\\', :x", &params, &MysqlDialect).unwrap();
        assert_eq!(bound.sql, r"SELECT 'dir\\', ?");
    }

    #[test]
    fn test_backslash_is_literal_without_mysql_escapes() {
        let params = Params::new().bind("x", 1);
        let bound = bind(r"SELECT 'C:\', :x", &params, &BacktickDialect).unwrap();
        assert_eq!(bound.sql, r"SELECT 'C:\', ?");
        assert_eq!(bound.values.len(), 1);
    }

    #[test]
    fn test_no_params_passes_sql_through() {
        let bound = bind("SELECT '?' , :x", &Params::new(), &DoubleQuoteDialect).unwrap();
        assert_eq!(bound.sql, "SELECT '?' , :x");
        assert!(bound.values.is_empty());
    }
}
