//! Database dispatch and binding macros.

/// Macro for generating database dispatch match arms.
///
/// This macro generates match arms for `DbHandle` variants, so backend
/// specific code reads as one arm per driver.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(handle, {
///     MySql(c) => do_mysql(c),
///     Postgres(c) => do_postgres(c),
///     SQLite(c) => do_sqlite(c),
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($handle:expr, { $($variant:ident($c:ident) => $body:expr),+ $(,)? }) => {
        match $handle {
            $(
                $crate::db::connector::DbHandle::$variant($c) => $body,
            )+
        }
    };
}

/// Build [`Bindings`](crate::models::Bindings) from `name => value` pairs.
///
/// ```
/// let bindings = dbkit::bindings! { "id" => 7, "title" => "hello" };
/// assert_eq!(bindings.len(), 2);
/// ```
#[macro_export]
macro_rules! bindings {
    () => {
        $crate::models::Bindings::new()
    };
    ($($name:expr => $value:expr),+ $(,)?) => {{
        let mut bindings = $crate::models::Bindings::new();
        $(
            bindings.insert($name, $value);
        )+
        bindings
    }};
}

pub use impl_db_dispatch;

#[cfg(test)]
mod tests {
    use crate::models::Value;

    #[test]
    fn test_bindings_macro_keeps_order() {
        let bindings = bindings! { "b" => 1, "a" => "x", "c" => Value::Null };
        assert_eq!(bindings.keys().collect::<Vec<_>>(), vec!["b", "a", "c"]);
        assert_eq!(bindings.get("a"), Some(&Value::Text("x".to_string())));
    }

    #[test]
    fn test_bindings_macro_empty() {
        let bindings = bindings! {};
        assert!(bindings.is_empty());
    }
}
