use thiserror::Error;

/// Status taxonomy shared by every public entry point.
///
/// Factories and validators fail fast with the first error they detect.
/// Multi-attribute query helpers instead accumulate through [`StatusAcc`]
/// so independent queries still run before the merged status surfaces.
#[derive(Error, Debug)]
pub enum VxError {
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("invalid type: {0}")]
    InvalidType(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("invalid dimension: {0}")]
    InvalidDimension(String),

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("invalid scope: {0}")]
    InvalidScope(String),

    #[error("invalid graph: {0}")]
    InvalidGraph(String),

    #[error("invalid node: {0}")]
    InvalidNode(String),

    #[error("invalid link: {0}")]
    InvalidLink(String),

    #[error("missing required parameter: {0}")]
    NotSufficient(String),

    #[error("multiple writers: {0}")]
    MultipleWriters(String),

    #[error("graph abandoned by callback")]
    GraphAbandoned,

    #[error("allocation failed: {0}")]
    NoMemory(String),

    #[error("no resources: {0}")]
    NoResources(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("operation failed: {0}")]
    Failure(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VxError {
    /// Stable discriminant name, used by log callbacks.
    pub fn kind_name(&self) -> &'static str {
        match self {
            VxError::InvalidReference(_) => "InvalidReference",
            VxError::InvalidParameters(_) => "InvalidParameters",
            VxError::InvalidType(_) => "InvalidType",
            VxError::InvalidValue(_) => "InvalidValue",
            VxError::InvalidDimension(_) => "InvalidDimension",
            VxError::InvalidFormat(_) => "InvalidFormat",
            VxError::InvalidScope(_) => "InvalidScope",
            VxError::InvalidGraph(_) => "InvalidGraph",
            VxError::InvalidNode(_) => "InvalidNode",
            VxError::InvalidLink(_) => "InvalidLink",
            VxError::NotSufficient(_) => "NotSufficient",
            VxError::MultipleWriters(_) => "MultipleWriters",
            VxError::GraphAbandoned => "GraphAbandoned",
            VxError::NoMemory(_) => "NoMemory",
            VxError::NoResources(_) => "NoResources",
            VxError::NotSupported(_) => "NotSupported",
            VxError::NotImplemented(_) => "NotImplemented",
            VxError::Failure(_) => "Failure",
            VxError::Io(_) => "Io",
            VxError::Other(_) => "Other",
        }
    }
}

pub type Result<T> = std::result::Result<T, VxError>;

/// Accumulator for multi-attribute query sequences.
///
/// Records the first error seen but lets the caller keep issuing the
/// remaining independent queries; `finish` surfaces the recorded error.
#[derive(Default)]
pub struct StatusAcc {
    first: Option<VxError>,
}

impl StatusAcc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one query result, yielding its value when it succeeded.
    pub fn merge<T>(&mut self, result: Result<T>) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(e) => {
                if self.first.is_none() {
                    self.first = Some(e);
                }
                None
            }
        }
    }

    pub fn is_ok(&self) -> bool {
        self.first.is_none()
    }

    pub fn finish(self) -> Result<()> {
        match self.first {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }
}
