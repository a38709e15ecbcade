use harbor_domain::ExecKind;

/// Query parameters for `GET /sessions/{id}/history`, threaded straight
/// through to the Store so pagination and filtering happen at the storage
/// layer rather than in application code.
#[derive(Debug, Clone, Default)]
pub struct ExecutionHistoryFilter {
    pub exec_type: Option<ExecKind>,
    pub success_only: bool,
    pub limit: Option<usize>,
    pub offset: usize,
    /// Matches a record whose tag list contains any of these (substring match
    /// on the comma-separated column, per the original's `tags` filter).
    pub tag_contains: Option<String>,
    pub has_notes: Option<bool>,
    pub has_description: Option<bool>,
}
