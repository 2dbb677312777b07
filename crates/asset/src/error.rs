use thiserror::Error;

/// Errors raised while loading an OBJ mesh.
///
/// Records with the wrong number of tokens are never errors; they are
/// skipped while parsing.
#[derive(Debug, Error)]
pub enum ObjError {
    #[error("failed to read OBJ line {line}")]
    Io {
        line: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid numeric field '{token}' on line {line}")]
    InvalidNumber { line: usize, token: String },

    /// A `v` record arrived before any `vn` record created its vertex.
    #[error("position record on line {line} has no preceding normal record")]
    PositionWithoutNormal { line: usize },

    /// The stream was readable but produced no vertices to normalize.
    #[error("OBJ contained no vertices")]
    EmptyMesh,
}
