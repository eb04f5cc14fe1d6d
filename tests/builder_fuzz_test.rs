//! Randomized tests for QueryBuilder rendering.
//!
//! Builders are assembled from random identifiers and clause choices, then
//! checked for deterministic output and insertion-ordered clause lists.

use dbkit::{DatabaseType, DbError, QueryBuilder, QueryType};
use rand::Rng;
use rand::distributions::Alphanumeric;
use rand::seq::SliceRandom;

/// Random lowercase identifier, unique within `taken`.
fn identifier(rng: &mut impl Rng, taken: &mut Vec<String>) -> String {
    loop {
        let len = rng.gen_range(1..12);
        let tail: String = (0..len)
            .map(|_| char::from(rng.sample(Alphanumeric)).to_ascii_lowercase())
            .collect();
        let name = format!("c_{}", tail);
        if !taken.contains(&name) {
            taken.push(name.clone());
            return name;
        }
    }
}

fn identifiers(rng: &mut impl Rng, count: usize) -> Vec<String> {
    let mut taken = Vec::new();
    (0..count).map(|_| identifier(rng, &mut taken)).collect()
}

fn random_builder(rng: &mut impl Rng) -> (QueryBuilder, QueryType, Vec<String>, Vec<String>) {
    let kind = *[
        QueryType::Select,
        QueryType::Update,
        QueryType::Delete,
        QueryType::Insert,
    ]
    .choose(rng)
    .unwrap();
    let table = format!("@t_{}", rng.gen_range(0..1000));
    let field_count = rng.gen_range(1..6);
    let where_count = rng.gen_range(0..4);
    let fields = identifiers(rng, field_count);
    let wheres = identifiers(rng, where_count);

    let builder = match kind {
        QueryType::Select => QueryBuilder::new().select(fields.clone()).from(table),
        QueryType::Update => QueryBuilder::new().update(table).set(fields.clone()),
        QueryType::Delete => QueryBuilder::new().delete(table),
        QueryType::Insert => QueryBuilder::new().insert(table).values(fields.clone()),
    };
    let builder = builder.where_(wheres.clone());
    (builder, kind, fields, wheres)
}

#[test]
fn fuzz_rendering_is_deterministic() {
    let mut rng = rand::thread_rng();
    for _ in 0..500 {
        let (builder, _, _, _) = random_builder(&mut rng);
        let first = builder.to_sql().unwrap();
        let again = builder.to_sql().unwrap();
        let cloned = builder.clone().to_sql().unwrap();
        assert_eq!(first, again);
        assert_eq!(first, cloned);
        for backend in [DatabaseType::MySql, DatabaseType::Postgres, DatabaseType::SQLite] {
            assert_eq!(
                builder.to_sql_for(backend).unwrap(),
                builder.to_sql_for(backend).unwrap()
            );
        }
    }
}

#[test]
fn fuzz_clause_order_matches_insertion() {
    let mut rng = rand::thread_rng();
    for _ in 0..500 {
        let (builder, kind, fields, wheres) = random_builder(&mut rng);
        let sql = builder.to_sql().unwrap();
        assert!(sql.starts_with(kind.as_str()), "{}", sql);

        let mut last = 0;
        let expected: Vec<&String> = match kind {
            QueryType::Delete => Vec::new(),
            _ => fields.iter().collect(),
        };
        for name in expected {
            let pos = sql[last..]
                .find(name.as_str())
                .map(|p| p + last)
                .unwrap_or_else(|| panic!("{} missing or out of order in {}", name, sql));
            last = pos + name.len();
        }

        if kind != QueryType::Insert && !wheres.is_empty() {
            let clause = wheres
                .iter()
                .map(|w| format!("{} = :{}", w, w))
                .collect::<Vec<_>>()
                .join(" AND ");
            assert!(sql.ends_with(&format!(" WHERE {}", clause)), "{}", sql);
        } else {
            assert!(!sql.contains(" WHERE "), "{}", sql);
        }
    }
}

#[test]
fn fuzz_fields_never_duplicate() {
    let mut rng = rand::thread_rng();
    for _ in 0..200 {
        let names = identifiers(&mut rng, 4);
        let mut builder = QueryBuilder::new().update("@t");
        let mut expected: Vec<String> = Vec::new();
        for _ in 0..20 {
            let name = names.choose(&mut rng).unwrap().clone();
            if !expected.contains(&name) {
                expected.push(name.clone());
            }
            builder = builder.set(name);
        }
        let sql = builder.to_sql().unwrap();
        let assignments = expected
            .iter()
            .map(|n| format!("{} = :{}", n, n))
            .collect::<Vec<_>>()
            .join(", ");
        assert_eq!(sql, format!("UPDATE @t SET {}", assignments));
    }
}

#[test]
fn fuzz_missing_pieces_always_fail() {
    let mut rng = rand::thread_rng();
    for _ in 0..200 {
        let count = rng.gen_range(1..4);
        let fields = identifiers(&mut rng, count);
        let no_table = QueryBuilder::new().select(fields.clone()).to_sql();
        assert!(matches!(no_table, Err(DbError::Query { .. })));

        let no_kind = QueryBuilder::new().table("@t").field(fields).to_sql();
        assert!(matches!(no_kind, Err(DbError::Query { .. })));

        let no_fields = if rng.gen_bool(0.5) {
            QueryBuilder::new().update("@t").to_sql()
        } else {
            QueryBuilder::new().insert("@t").to_sql()
        };
        assert!(matches!(no_fields, Err(DbError::Query { .. })));
    }
}
