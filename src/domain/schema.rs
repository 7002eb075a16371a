// ============================================================
// KNOWN DATASET SCHEMAS
// ============================================================
// Closed set of record layouts an upload can be classified into

/// A named, ordered list of canonical column identifiers.
#[derive(Debug, PartialEq, Eq)]
pub struct SchemaDefinition {
    /// Dataset type recorded in the registry and used as table name prefix
    pub name: &'static str,

    /// Canonical column order, also the export order
    pub columns: &'static [&'static str],

    /// Secondary key that orders point lookup results
    pub sort_key: &'static str,
}

pub const TEACHER: SchemaDefinition = SchemaDefinition {
    name: "teacher",
    columns: &[
        "school_code",
        "school_name",
        "employee_name",
        "employee_code",
        "designation",
    ],
    sort_key: "employee_name",
};

pub const SCHOOL: SchemaDefinition = SchemaDefinition {
    name: "school",
    columns: &[
        "school_code",
        "school_name",
        "block_name",
        "district_name",
        "lowest_class",
        "highest_class",
    ],
    sort_key: "school_name",
};

/// Registered schemas in detection priority order: when a header satisfies
/// more than one definition, the earlier one wins.
pub static SCHEMAS: &[SchemaDefinition] = &[TEACHER, SCHOOL];

/// Columns that may be used for point lookups (and get an index).
pub const SEARCHABLE_COLUMNS: &[&str] = &["school_code", "employee_code"];

impl SchemaDefinition {
    pub fn by_name(name: &str) -> Option<&'static SchemaDefinition> {
        SCHEMAS.iter().find(|schema| schema.name == name)
    }

    /// Resolves a user-supplied column name to this schema's static identifier.
    pub fn column(&self, name: &str) -> Option<&'static str> {
        self.columns.iter().copied().find(|column| *column == name)
    }

    /// Searchable columns this schema actually carries.
    pub fn searchable_columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns
            .iter()
            .copied()
            .filter(|column| SEARCHABLE_COLUMNS.contains(column))
    }

    /// Comma-separated column list for SQL text.
    pub fn column_list(&self) -> String {
        self.columns.join(", ")
    }
}
