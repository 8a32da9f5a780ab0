//! Identifier-safe SQL fragments. Every table or column name that ends up in
//! generated SQL goes through this module.

/// Escape an identifier for use inside double quotes.
pub fn escape_ident(ident: &str) -> String {
    ident.replace('"', "\"\"")
}

/// `name` -> `"name"`
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", escape_ident(ident))
}

/// `it's` -> `'it''s'`
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn prefixed(prefix: Option<&str>, col: &str) -> String {
    match prefix {
        Some(p) => format!("{p}{}", quote_ident(col)),
        None => quote_ident(col),
    }
}

/// `"a", "b"` or, with a prefix such as `NEW.`, `NEW."a", NEW."b"`.
pub fn identifier_list<S: AsRef<str>>(cols: &[S], prefix: Option<&str>) -> String {
    cols.iter()
        .map(|c| prefixed(prefix, c.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `"a" = ? AND "b" = ?`
pub fn where_list<S: AsRef<str>>(cols: &[S]) -> String {
    cols.iter()
        .map(|c| format!("{} = ?", quote_ident(c.as_ref())))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// `"a" = OLD."a" AND "b" = OLD."b"`
pub fn where_list_against<S: AsRef<str>>(cols: &[S], prefix: &str) -> String {
    cols.iter()
        .map(|c| {
            let c = c.as_ref();
            format!("{} = {}", quote_ident(c), prefixed(Some(prefix), c))
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// `?, ?, ?`
pub fn binding_list(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// `"schema"."name"`; the schema is omitted for `main`.
pub fn qualified(schema: &str, name: &str) -> String {
    if schema == "main" {
        quote_ident(name)
    } else {
        format!("{}.{}", quote_ident(schema), quote_ident(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_are_doubled() {
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_literal("it's"), "'it''s'");
    }

    #[test]
    fn lists() {
        let cols = ["a", "order"];
        assert_eq!(identifier_list(&cols, None), "\"a\", \"order\"");
        assert_eq!(identifier_list(&cols, Some("NEW.")), "NEW.\"a\", NEW.\"order\"");
        assert_eq!(where_list(&cols), "\"a\" = ? AND \"order\" = ?");
        assert_eq!(
            where_list_against(&cols, "OLD."),
            "\"a\" = OLD.\"a\" AND \"order\" = OLD.\"order\""
        );
        assert_eq!(binding_list(3), "?, ?, ?");
    }

    #[test]
    fn main_schema_is_implicit() {
        assert_eq!(qualified("main", "t"), "\"t\"");
        assert_eq!(qualified("aux", "t"), "\"aux\".\"t\"");
    }
}
