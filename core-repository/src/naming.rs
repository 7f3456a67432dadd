//! Field-name conversion between caller-facing names and backend columns.
//!
//! `to_snake_case` is total: every input yields a column-safe name made of
//! lowercase ASCII letters, digits and underscores. Input that is already
//! snake_case comes back unchanged.

use core_runtime::config::NamingConvention;

/// Convert a field name such as `lastUpdatedDate` to `last_updated_date`.
///
/// Uppercase letters start a new word, acronyms stay together
/// (`HTTPStatus` becomes `http_status`), digits stay attached to the word
/// before them and any other character becomes `_`.
pub fn to_snake_case(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c.is_ascii_uppercase() {
            let prev = if i > 0 { Some(chars[i - 1]) } else { None };
            let next = chars.get(i + 1).copied();
            let starts_word = match prev {
                Some(p) if p.is_ascii_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_ascii_uppercase() => next.is_some_and(|n| n.is_ascii_lowercase()),
                _ => false,
            };
            if starts_word && !out.ends_with('_') {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c);
        } else {
            out.push('_');
        }
    }

    out
}

/// Convert a column name such as `last_updated_date` to `lastUpdatedDate`.
///
/// Leading underscores are kept; repeated underscores collapse.
pub fn to_camel_case(input: &str) -> String {
    let trimmed = input.trim_start_matches('_');
    let mut out: String = "_".repeat(input.len() - trimmed.len());
    let mut upper_next = false;

    for c in trimmed.chars() {
        if c == '_' {
            upper_next = true;
        } else if upper_next {
            out.push(c.to_ascii_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }

    out
}

/// Backend column for a caller-facing field
pub fn column_name(naming: NamingConvention, field: &str) -> String {
    match naming {
        NamingConvention::SnakeCase => to_snake_case(field),
        NamingConvention::Identity => field.to_string(),
    }
}

/// Caller-facing field for a backend column
pub fn field_name(naming: NamingConvention, column: &str) -> String {
    match naming {
        NamingConvention::SnakeCase => to_camel_case(column),
        NamingConvention::Identity => column.to_string(),
    }
}
