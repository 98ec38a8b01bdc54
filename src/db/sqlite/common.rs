use crate::models::FileScope;

/// SQLite's default SQLITE_MAX_VARIABLE_NUMBER on older builds is 999.
/// Keep bound-parameter lists comfortably below it.
pub const MAX_BIND_PARAMS: usize = 500;

/// `?, ?, ?` with `count` placeholders.
pub fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

/// SQL fragment restricting `file_type` to `scope`, plus the values to bind
/// in order. An empty exclusion list yields an always-true fragment.
pub fn file_scope_clause(scope: &FileScope) -> (String, Vec<i32>) {
    match scope {
        FileScope::Only(file_type) => ("file_type = ?".to_string(), vec![*file_type]),
        FileScope::AllExcept(excluded) if excluded.is_empty() => ("1 = 1".to_string(), vec![]),
        FileScope::AllExcept(excluded) => (
            format!("file_type NOT IN ({})", placeholders(excluded.len())),
            excluded.clone(),
        ),
    }
}
