use crate::protocol::command::ColumnDefinition;

/// Handle to a server-side prepared statement.
///
/// Holds the metadata the server sent back at prepare time; the
/// statement itself lives on the connection that prepared it and is only
/// meaningful there.
#[derive(Debug)]
pub struct PreparedStatement {
    id: u32,
    param_defs: Vec<ColumnDefinition>,
    column_defs: Vec<ColumnDefinition>,
}

impl PreparedStatement {
    pub(crate) fn new(
        id: u32,
        param_defs: Vec<ColumnDefinition>,
        column_defs: Vec<ColumnDefinition>,
    ) -> Self {
        Self {
            id,
            param_defs,
            column_defs,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Parameter placeholder metadata, one entry per `?`.
    pub fn params(&self) -> &[ColumnDefinition] {
        &self.param_defs
    }

    /// Result-set column metadata as of prepare time.
    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.column_defs
    }
}
