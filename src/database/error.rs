use std::fmt;

/// Storage error kinds for order and transaction persistence
#[derive(Debug, Clone)]
pub enum DatabaseErrorKind {
    /// Connection pool is exhausted
    PoolExhausted,
    /// Record not found
    NotFound {
        entity: String,
        id: String,
    },
    /// The host state machine rejected a transition from the stored state
    InvalidTransition {
        from: String,
        to: String,
    },
    /// Query execution error
    QueryError {
        message: String,
    },
    /// Database connection error
    ConnectionError {
        message: String,
    },
    /// Stored data could not be decoded
    CorruptRecord {
        message: String,
    },
    /// Configuration error
    ConfigError {
        message: String,
    },
    /// Unknown error
    Unknown {
        message: String,
    },
}

/// Result type for database operations
pub type DbResult<T> = Result<T, DatabaseError>;

#[derive(Debug, Clone)]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
    pub context: Option<String>,
    pub is_retryable: bool,
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        let is_retryable = matches!(
            kind,
            DatabaseErrorKind::PoolExhausted
                | DatabaseErrorKind::ConnectionError { .. }
        );

        Self {
            kind,
            context: None,
            is_retryable,
        }
    }

    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::new(DatabaseErrorKind::NotFound {
            entity: entity.into(),
            id: id.into(),
        })
    }

    pub fn invalid_transition(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::new(DatabaseErrorKind::InvalidTransition {
            from: from.into(),
            to: to.into(),
        })
    }

    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::new(DatabaseErrorKind::CorruptRecord {
            message: message.into(),
        })
    }

    pub fn with_context<S: Into<String>>(mut self, context: S) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.is_retryable
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::NotFound { .. })
    }

    pub fn is_invalid_transition(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::InvalidTransition { .. })
    }

    /// Map SQLx error to our custom error type
    #[cfg(feature = "postgres")]
    pub fn from_sqlx(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => Self::not_found("Record", "unknown"),
            sqlx::Error::PoolTimedOut => Self::new(DatabaseErrorKind::PoolExhausted),
            sqlx::Error::PoolClosed => Self::new(DatabaseErrorKind::ConnectionError {
                message: "Connection pool is closed".to_string(),
            }),
            sqlx::Error::Configuration(msg) => Self::new(DatabaseErrorKind::ConfigError {
                message: msg.to_string(),
            }),
            sqlx::Error::Database(db_err) => Self::new(DatabaseErrorKind::QueryError {
                message: db_err.message().to_string(),
            }),
            sqlx::Error::Io(io_err) => Self::new(DatabaseErrorKind::ConnectionError {
                message: io_err.to_string(),
            }),
            sqlx::Error::ColumnDecode { index, source } => Self::corrupt(format!(
                "column {} could not be decoded: {}",
                index, source
            )),
            _ => Self::new(DatabaseErrorKind::Unknown {
                message: error.to_string(),
            }),
        }
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match &self.kind {
            DatabaseErrorKind::PoolExhausted => {
                "Database connection pool exhausted. Please try again.".to_string()
            }
            DatabaseErrorKind::NotFound { entity, id } => {
                format!("{} with ID '{}' not found", entity, id)
            }
            DatabaseErrorKind::InvalidTransition { from, to } => {
                format!("State machine does not allow '{}' -> '{}'", from, to)
            }
            DatabaseErrorKind::QueryError { message } => {
                format!("Database query failed: {}", message)
            }
            DatabaseErrorKind::ConnectionError { message } => {
                format!("Database connection error: {}", message)
            }
            DatabaseErrorKind::CorruptRecord { message } => {
                format!("Stored record is corrupt: {}", message)
            }
            DatabaseErrorKind::ConfigError { message } => {
                format!("Database configuration error: {}", message)
            }
            DatabaseErrorKind::Unknown { message } => {
                format!("Unknown database error: {}", message)
            }
        };

        if let Some(context) = &self.context {
            write!(f, "{} ({})", message, context)
        } else {
            write!(f, "{}", message)
        }
    }
}

impl std::error::Error for DatabaseError {}
