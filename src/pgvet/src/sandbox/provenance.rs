//! Best-effort provenance of view columns.
//!
//! The catalog reports every view column as nullable, which would make any
//! query through a view useless for nullability checking. This pass scans
//! each view's definition (as the server itself prints it) for simple
//! column projections and lets those columns inherit the nullability of the
//! base table column they ultimately project, recursing through views that
//! select from views.
//!
//! The scan deliberately owns no SQL grammar: only plain `col`,
//! `alias.col`, and `... AS name` projections resolve; computed expressions,
//! subqueries, and set operations leave their columns nullable.

use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;

use pgvet_postgres_util::desc::RelationIndex;

/// Patches the nullability of view columns in `index`, given each view's
/// printed definition.
pub(crate) fn patch_view_nullability(index: &mut RelationIndex, defs: &BTreeMap<String, String>) {
    let parsed: BTreeMap<String, ParsedView> = defs
        .iter()
        .filter_map(|(name, def)| parse_view(def).map(|p| (name.clone(), p)))
        .collect();

    let mut patches = Vec::new();
    for (view, _) in &parsed {
        let Some(rel) = index.get(view) else { continue };
        for col in &rel.columns {
            let mut visited = BTreeSet::new();
            if column_not_null(view, &col.name, &parsed, index, &mut visited) {
                patches.push((view.clone(), col.name.clone()));
            }
        }
    }
    for (view, column) in patches {
        if let Some(rel) = index.get_mut(&view) {
            if let Some(col) = rel.columns.iter_mut().find(|c| c.name == column) {
                col.not_null = true;
            }
        }
    }
}

fn column_not_null(
    relation: &str,
    column: &str,
    parsed: &BTreeMap<String, ParsedView>,
    index: &RelationIndex,
    visited: &mut BTreeSet<(String, String)>,
) -> bool {
    if !visited.insert((relation.to_owned(), column.to_owned())) {
        return false;
    }
    let Some(rel) = index.get(relation) else {
        return false;
    };
    if !rel.is_view {
        return rel.column(column).map(|c| c.not_null).unwrap_or(false);
    }
    let Some(view) = parsed.get(relation) else {
        return false;
    };
    let Some(item) = view.items.iter().find(|i| i.output == column) else {
        return false;
    };
    let base = match &item.qualifier {
        Some(q) => view.aliases.get(q).cloned(),
        None => view.single_relation.clone(),
    };
    match base {
        Some(base) => column_not_null(&base, &item.column, parsed, index, visited),
        None => false,
    }
}

struct TargetItem {
    output: String,
    qualifier: Option<String>,
    column: String,
}

struct ParsedView {
    items: Vec<TargetItem>,
    aliases: BTreeMap<String, String>,
    single_relation: Option<String>,
}

fn parse_view(def: &str) -> Option<ParsedView> {
    let select_end = find_keyword(def, "SELECT")? + "SELECT".len();
    let mut list_start = select_end;
    // Skip DISTINCT [ON (...)].
    if let Some(pos) = find_keyword(&def[list_start..], "DISTINCT") {
        if def[list_start..list_start + pos].trim().is_empty() {
            list_start += pos + "DISTINCT".len();
            let rest = &def[list_start..];
            if let Some(on) = find_keyword(rest, "ON") {
                if rest[..on].trim().is_empty() {
                    let after_on = list_start + on + "ON".len();
                    list_start = after_on + skip_group(&def[after_on..])?;
                }
            }
        }
    }
    let from = list_start + find_keyword(&def[list_start..], "FROM")?;
    let target_list = &def[list_start..from];

    let item_re = Regex::new(
        r"(?is)^(?:([a-z_][a-z0-9_$]*)\.)?([a-z_][a-z0-9_$]*)(?:\s+AS\s+([a-z_][a-z0-9_$]*))?$",
    )
    .expect("valid regex");
    let mut items = Vec::new();
    for raw in split_top_level(target_list) {
        let raw = raw.trim();
        if let Some(caps) = item_re.captures(raw) {
            let qualifier = caps.get(1).map(|m| m.as_str().to_owned());
            let column = caps[2].to_owned();
            let output = caps
                .get(3)
                .map(|m| m.as_str().to_owned())
                .unwrap_or_else(|| column.clone());
            items.push(TargetItem {
                output,
                qualifier,
                column,
            });
        }
    }

    let (aliases, relation_count) = parse_from_clause(&def[from + "FROM".len()..]);
    let single_relation = if relation_count == 1 {
        aliases.values().next().cloned()
    } else {
        None
    };
    Some(ParsedView {
        items,
        aliases,
        single_relation,
    })
}

const FROM_END_KEYWORDS: [&str; 12] = [
    "WHERE", "GROUP", "HAVING", "ORDER", "LIMIT", "OFFSET", "UNION", "INTERSECT", "EXCEPT",
    "WINDOW", "FETCH", "FOR",
];

const JOIN_KEYWORDS: [&str; 7] = ["JOIN", "LEFT", "RIGHT", "FULL", "INNER", "CROSS", "NATURAL"];

fn parse_from_clause(text: &str) -> (BTreeMap<String, String>, usize) {
    let mut end = text.len();
    for kw in FROM_END_KEYWORDS {
        if let Some(pos) = find_keyword(text, kw) {
            end = end.min(pos);
        }
    }
    let clause = text[..end].trim_end_matches(';').trim();

    let mut aliases = BTreeMap::new();
    let mut relations = BTreeSet::new();
    // Relations appear at the start of the clause, after each top-level
    // comma, and after each JOIN keyword.
    let mut segments: Vec<String> = Vec::new();
    for part in split_top_level(clause) {
        let mut rest = part.trim();
        loop {
            segments.push(rest.to_owned());
            match find_keyword(rest, "JOIN") {
                Some(pos) => rest = rest[pos + "JOIN".len()..].trim(),
                None => break,
            }
        }
    }
    for segment in segments {
        let mut words = segment.split_whitespace();
        let Some(first) = words.next() else { continue };
        if !is_plain_ident(first) && !first.contains('.') {
            continue;
        }
        if JOIN_KEYWORDS.contains(&first.to_ascii_uppercase().as_str()) {
            continue;
        }
        // Strip any schema qualifier; the sandbox schema is flat.
        let relation = first.rsplit('.').next().unwrap_or(first).to_owned();
        if !is_plain_ident(&relation) {
            continue;
        }
        let mut alias = relation.clone();
        match words.next() {
            Some(word) if word.eq_ignore_ascii_case("AS") => {
                if let Some(a) = words.next() {
                    if is_plain_ident(a) {
                        alias = a.to_owned();
                    }
                }
            }
            Some(word)
                if is_plain_ident(word)
                    && !JOIN_KEYWORDS.contains(&word.to_ascii_uppercase().as_str())
                    && !word.eq_ignore_ascii_case("ON")
                    && !word.eq_ignore_ascii_case("USING") =>
            {
                alias = word.to_owned();
            }
            _ => {}
        }
        aliases.insert(alias, relation.clone());
        aliases.entry(relation.clone()).or_insert_with(|| relation.clone());
        relations.insert(relation);
    }
    let count = relations.len();
    (aliases, count)
}

fn is_plain_ident(word: &str) -> bool {
    let mut chars = word.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Finds a keyword as a standalone word at paren depth zero, outside
/// quotes. Returns its byte offset.
fn find_keyword(text: &str, keyword: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let upper = keyword.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut in_ident = false;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            if b == b'\'' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        if in_ident {
            if b == b'"' {
                in_ident = false;
            }
            i += 1;
            continue;
        }
        match b {
            b'\'' => in_string = true,
            b'"' => in_ident = true,
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            _ if depth == 0 && i + upper.len() <= bytes.len() => {
                let candidate = &bytes[i..i + upper.len()];
                if candidate.eq_ignore_ascii_case(upper)
                    && !is_word_byte(bytes.get(i.wrapping_sub(1)).copied(), i == 0)
                    && !is_word_byte(bytes.get(i + upper.len()).copied(), false)
                {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

fn is_word_byte(byte: Option<u8>, at_start: bool) -> bool {
    if at_start {
        return false;
    }
    match byte {
        Some(b) => b.is_ascii_alphanumeric() || b == b'_',
        None => false,
    }
}

/// Splits on top-level commas, respecting parens and quotes.
fn split_top_level(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut in_ident = false;
    let mut start = 0;
    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if b == b'\'' {
                in_string = false;
            }
            continue;
        }
        if in_ident {
            if b == b'"' {
                in_ident = false;
            }
            continue;
        }
        match b {
            b'\'' => in_string = true,
            b'"' => in_ident = true,
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            b',' if depth == 0 => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

/// Skips leading whitespace and one parenthesized group, returning the
/// number of bytes consumed.
fn skip_group(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    if bytes.get(i) != Some(&b'(') {
        return None;
    }
    let mut depth = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgvet_postgres_util::desc::{PgColumnDesc, PgRelationDesc};

    fn column(name: &str, not_null: bool) -> PgColumnDesc {
        PgColumnDesc {
            name: name.into(),
            col_num: 1,
            type_name: "int4".into(),
            not_null,
            has_default: false,
        }
    }

    fn index_with_view(view_cols: &[&str]) -> RelationIndex {
        RelationIndex::new(vec![
            (
                1,
                PgRelationDesc {
                    name: "users".into(),
                    is_view: false,
                    columns: vec![column("id", true), column("email", false)],
                },
            ),
            (
                2,
                PgRelationDesc {
                    name: "v_users".into(),
                    is_view: true,
                    columns: view_cols.iter().map(|c| column(c, false)).collect(),
                },
            ),
        ])
    }

    #[test]
    fn test_simple_projection_inherits_not_null() {
        let mut index = index_with_view(&["id", "email"]);
        let defs = BTreeMap::from([(
            "v_users".to_owned(),
            " SELECT u.id,\n    u.email\n   FROM users u;".to_owned(),
        )]);
        patch_view_nullability(&mut index, &defs);
        let view = index.get("v_users").unwrap();
        assert!(view.column("id").unwrap().not_null);
        assert!(!view.column("email").unwrap().not_null);
    }

    #[test]
    fn test_aliased_output_and_unqualified_column() {
        let mut index = index_with_view(&["user_id"]);
        let defs = BTreeMap::from([(
            "v_users".to_owned(),
            "SELECT id AS user_id FROM users;".to_owned(),
        )]);
        patch_view_nullability(&mut index, &defs);
        assert!(index.get("v_users").unwrap().column("user_id").unwrap().not_null);
    }

    #[test]
    fn test_expression_stays_nullable() {
        let mut index = index_with_view(&["id", "n"]);
        let defs = BTreeMap::from([(
            "v_users".to_owned(),
            "SELECT u.id, count(*) AS n FROM users u GROUP BY u.id;".to_owned(),
        )]);
        patch_view_nullability(&mut index, &defs);
        let view = index.get("v_users").unwrap();
        assert!(view.column("id").unwrap().not_null);
        assert!(!view.column("n").unwrap().not_null);
    }

    #[test]
    fn test_join_qualifiers_resolve_through_aliases() {
        let mut index = RelationIndex::new(vec![
            (
                1,
                PgRelationDesc {
                    name: "users".into(),
                    is_view: false,
                    columns: vec![column("id", true)],
                },
            ),
            (
                2,
                PgRelationDesc {
                    name: "orders".into(),
                    is_view: false,
                    columns: vec![column("user_id", true), column("note", false)],
                },
            ),
            (
                3,
                PgRelationDesc {
                    name: "v_joined".into(),
                    is_view: true,
                    columns: vec![column("id", false), column("note", false)],
                },
            ),
        ]);
        let defs = BTreeMap::from([(
            "v_joined".to_owned(),
            " SELECT u.id,\n    o.note\n   FROM users u\n     JOIN orders o ON o.user_id = u.id;"
                .to_owned(),
        )]);
        patch_view_nullability(&mut index, &defs);
        let view = index.get("v_joined").unwrap();
        assert!(view.column("id").unwrap().not_null);
        assert!(!view.column("note").unwrap().not_null);
    }

    #[test]
    fn test_view_over_view_recurses() {
        let mut index = RelationIndex::new(vec![
            (
                1,
                PgRelationDesc {
                    name: "users".into(),
                    is_view: false,
                    columns: vec![column("id", true)],
                },
            ),
            (
                2,
                PgRelationDesc {
                    name: "v_inner".into(),
                    is_view: true,
                    columns: vec![column("id", false)],
                },
            ),
            (
                3,
                PgRelationDesc {
                    name: "v_outer".into(),
                    is_view: true,
                    columns: vec![column("id", false)],
                },
            ),
        ]);
        let defs = BTreeMap::from([
            ("v_inner".to_owned(), "SELECT u.id FROM users u;".to_owned()),
            (
                "v_outer".to_owned(),
                "SELECT v.id FROM v_inner v;".to_owned(),
            ),
        ]);
        patch_view_nullability(&mut index, &defs);
        assert!(index.get("v_outer").unwrap().column("id").unwrap().not_null);
    }

    #[test]
    fn test_ambiguous_unqualified_column_stays_nullable() {
        let mut index = RelationIndex::new(vec![
            (
                1,
                PgRelationDesc {
                    name: "a".into(),
                    is_view: false,
                    columns: vec![column("x", true)],
                },
            ),
            (
                2,
                PgRelationDesc {
                    name: "b".into(),
                    is_view: false,
                    columns: vec![column("y", true)],
                },
            ),
            (
                3,
                PgRelationDesc {
                    name: "v".into(),
                    is_view: true,
                    columns: vec![column("x", false)],
                },
            ),
        ]);
        let defs = BTreeMap::from([(
            "v".to_owned(),
            "SELECT x FROM a, b;".to_owned(),
        )]);
        patch_view_nullability(&mut index, &defs);
        assert!(!index.get("v").unwrap().column("x").unwrap().not_null);
    }
}
