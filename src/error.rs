//! Fault taxonomy shared by all subsystems.
//!
//! Every fault is handled at the subsystem boundary and turned into an
//! error response; nothing here ever halts the control loop.

#[derive(Debug, Clone, PartialEq)]
pub enum ProfilerError {
    /// Malformed command arguments. Rejected without state mutation.
    Validation(String),
    /// Checksum mismatch, empty or unreadable profile slot.
    Integrity(String),
    /// Non-finite interpolation result, clamped to zero pressure.
    Arithmetic,
    /// Missing hardware timer or persistence backend.
    Resource(String),
}

impl ProfilerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ProfilerError::Validation(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        ProfilerError::Integrity(msg.into())
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        ProfilerError::Resource(msg.into())
    }

    /// Machine readable reason carried in `*_error` responses.
    pub fn reason(&self) -> String {
        match self {
            ProfilerError::Validation(msg) => format!("validation_error: {}", msg),
            ProfilerError::Integrity(msg) => format!("integrity_error: {}", msg),
            ProfilerError::Arithmetic => "arithmetic_fault".to_string(),
            ProfilerError::Resource(msg) => format!("resource_fault: {}", msg),
        }
    }
}

impl std::fmt::Display for ProfilerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProfilerError::Validation(msg) => write!(f, "Validation error: {}", msg),
            ProfilerError::Integrity(msg) => write!(f, "Integrity error: {}", msg),
            ProfilerError::Arithmetic => write!(f, "Arithmetic fault: non-finite pressure"),
            ProfilerError::Resource(msg) => write!(f, "Resource fault: {}", msg),
        }
    }
}

impl std::error::Error for ProfilerError {}

/// Errors from the byte-oriented key-value persistence port.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageError {
    Backend(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Backend(msg) => write!(f, "storage backend error: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<StorageError> for ProfilerError {
    fn from(e: StorageError) -> Self {
        ProfilerError::resource(e.to_string())
    }
}

/// Errors raised by the phase firing engine.
#[derive(Debug, Clone, PartialEq)]
pub enum DimmerError {
    /// The one-shot alarm could not be armed or cancelled. The engine latches off.
    Alarm(String),
    /// A previous alarm failure latched the engine off.
    Faulted,
}

impl std::fmt::Display for DimmerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DimmerError::Alarm(msg) => write!(f, "firing alarm error: {}", msg),
            DimmerError::Faulted => write!(f, "firing engine faulted, output held off"),
        }
    }
}

impl std::error::Error for DimmerError {}

impl From<DimmerError> for ProfilerError {
    fn from(e: DimmerError) -> Self {
        ProfilerError::resource(e.to_string())
    }
}
