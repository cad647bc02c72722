use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

str_enum!(PiiKind {
    Name => "name",
    Ssn => "ssn",
    Dob => "dob",
    Address => "address",
});

impl PiiKind {
    pub const ALL: [PiiKind; 4] = [PiiKind::Name, PiiKind::Ssn, PiiKind::Dob, PiiKind::Address];

    /// Placeholder written into redacted document text.
    pub fn redaction_label(&self) -> &'static str {
        match self {
            Self::Name => "[NAME]",
            Self::Ssn => "[SSN]",
            Self::Dob => "[DOB]",
            Self::Address => "[ADDRESS]",
        }
    }
}

str_enum!(DocumentSource {
    Manual => "manual",
    Upload => "upload",
    Batch => "batch",
});

str_enum!(PatientStatus {
    Pending => "pending",
    Processed => "processed",
    ReviewRequired => "review_required",
    Failed => "failed",
});

str_enum!(Priority {
    Normal => "normal",
    Urgent => "urgent",
});

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

str_enum!(QualityBand {
    Excellent => "excellent",
    Good => "good",
    Fair => "fair",
    Poor => "poor",
});

impl QualityBand {
    /// Band derived from a 1–5 accuracy rating.
    pub fn from_rating(rating: u8) -> Self {
        match rating {
            5 => Self::Excellent,
            4 => Self::Good,
            3 => Self::Fair,
            _ => Self::Poor,
        }
    }
}

str_enum!(FailureClass {
    Configuration => "configuration",
    Authentication => "authentication",
    Transient => "transient",
    MalformedRequest => "malformed_request",
    Unsupported => "unsupported",
    NotFound => "not_found",
});

str_enum!(SelectionPolicy {
    BestPerforming => "best_performing",
    AbTest => "ab_test",
    Latest => "latest",
});

str_enum!(DetectionSource {
    Local => "local",
    External => "external",
});

str_enum!(JobStatus {
    Queued => "queued",
    Running => "running",
    Done => "done",
    Failed => "failed",
});
