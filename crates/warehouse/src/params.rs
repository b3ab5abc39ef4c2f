//! Named-parameter rewriting.
//!
//! Functions write `:name` or `@name`; ClickHouse wants `{name:Type}` with the
//! value sent separately as `param_name`. Placeholders inside quoted literals
//! and `::` casts are left alone.

use rotor_ports::QueryParams;

use crate::error::WarehouseError;

/// A parameter value bound to its placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundParam {
    /// Parameter name.
    pub name: String,
    /// ClickHouse type used in the placeholder.
    pub ty: &'static str,
    /// Value in ClickHouse text format.
    pub value: String,
}

/// SQL with typed placeholders plus the values to send alongside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenQuery {
    /// Rewritten SQL.
    pub sql: String,
    /// Bound values, one per distinct name, in first-use order.
    pub params: Vec<BoundParam>,
}

/// ClickHouse type for a JSON value.
#[must_use]
pub fn infer_type(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "Nullable(String)",
        serde_json::Value::Bool(_) => "Bool",
        serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => "Int64",
        serde_json::Value::Number(_) => "Float64",
        serde_json::Value::String(_)
        | serde_json::Value::Array(_)
        | serde_json::Value::Object(_) => "String",
    }
}

fn text_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "\\N".to_owned(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Rewrite `:name` / `@name` placeholders.
///
/// # Errors
///
/// [`WarehouseError::MissingParameter`] when the SQL references a name that
/// `params` does not contain.
pub fn rewrite_named_params(
    sql: &str,
    params: &QueryParams,
) -> Result<RewrittenQuery, WarehouseError> {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut bound: Vec<BoundParam> = Vec::new();
    let mut quote: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if let Some(q) = quote {
            out.push(c);
            if c == '\\' {
                if let Some(&next) = chars.get(i + 1) {
                    out.push(next);
                    i += 1;
                }
            } else if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }

        match c {
            '\'' | '"' | '`' => {
                quote = Some(c);
                out.push(c);
                i += 1;
            }
            ':' if chars.get(i + 1) == Some(&':') => {
                out.push_str("::");
                i += 2;
            }
            ':' | '@' if chars.get(i + 1).is_some_and(|n| is_ident_start(*n)) => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && is_ident_char(chars[end]) {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();
                let value = params
                    .get(&name)
                    .ok_or_else(|| WarehouseError::MissingParameter(name.clone()))?;
                let ty = infer_type(value);
                out.push_str(&format!("{{{name}:{ty}}}"));
                if !bound.iter().any(|p| p.name == name) {
                    bound.push(BoundParam {
                        name,
                        ty,
                        value: text_value(value),
                    });
                }
                i = end;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    Ok(RewrittenQuery {
        sql: out,
        params: bound,
    })
}
