use crate::models::ValueKind;

/// A declared column of an [`Entity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub kind: ValueKind,
    pub nullable: bool,
}

impl Column {
    pub const fn new(name: &'static str, kind: ValueKind) -> Self {
        Self {
            name,
            kind,
            nullable: false,
        }
    }

    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// Static schema of a table mapped by [`Model`](super::Model).
///
/// ```
/// use dbkit::models::ValueKind;
/// use dbkit::record::{Column, Entity};
///
/// struct Post;
///
/// impl Entity for Post {
///     const TABLE: Option<&'static str> = Some("@posts");
///     const COLUMNS: &'static [Column] = &[
///         Column::new("id", ValueKind::Int),
///         Column::new("title", ValueKind::Text),
///         Column::new("body", ValueKind::Text).nullable(),
///     ];
/// }
/// ```
pub trait Entity: 'static {
    /// Table name; defaults to `@` plus the lowercased type name.
    const TABLE: Option<&'static str> = None;

    const PRIMARY_KEY: &'static str = "id";

    const COLUMNS: &'static [Column];

    fn column(name: &str) -> Option<&'static Column> {
        Self::COLUMNS.iter().find(|c| c.name == name)
    }

    fn table_name() -> String {
        match Self::TABLE {
            Some(table) => table.to_string(),
            None => {
                let full = std::any::type_name::<Self>();
                let short = full.split('<').next().unwrap_or(full);
                let short = short.rsplit("::").next().unwrap_or(short);
                format!("@{}", short.to_lowercase())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BlogPost;

    impl Entity for BlogPost {
        const COLUMNS: &'static [Column] = &[
            Column::new("id", ValueKind::Int),
            Column::new("title", ValueKind::Text).nullable(),
        ];
    }

    struct Named;

    impl Entity for Named {
        const TABLE: Option<&'static str> = Some("@articles");
        const PRIMARY_KEY: &'static str = "article_id";
        const COLUMNS: &'static [Column] = &[];
    }

    #[test]
    fn test_default_table_name() {
        assert_eq!(BlogPost::table_name(), "@blogpost");
        assert_eq!(BlogPost::PRIMARY_KEY, "id");
    }

    #[test]
    fn test_explicit_table_name() {
        assert_eq!(Named::table_name(), "@articles");
        assert_eq!(Named::PRIMARY_KEY, "article_id");
    }

    #[test]
    fn test_column_lookup() {
        let title = BlogPost::column("title").unwrap();
        assert_eq!(title.kind, ValueKind::Text);
        assert!(title.nullable);
        assert!(!BlogPost::column("id").unwrap().nullable);
        assert!(BlogPost::column("missing").is_none());
    }
}
