// 🛑 Fatal pipeline errors
// Everything else (bad rows, bad fields, failed lookups) is recovered locally.

use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// A required input file does not exist.
    MissingInput { role: &'static str, path: PathBuf },
    /// A required column is absent from an input or report header.
    MissingColumn { source: String, column: String },
    /// A record has fewer fields than the fixed layout requires.
    ShortRecord {
        source: String,
        line: u64,
        expected: usize,
        found: usize,
    },
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingInput { role, path } => {
                write!(f, "missing {role} input: {}", path.display())
            }
            Self::MissingColumn { source, column } => {
                write!(f, "{source}: missing required column '{column}'")
            }
            Self::ShortRecord {
                source,
                line,
                expected,
                found,
            } => write!(
                f,
                "{source}, line {line}: expected {expected} fields, found {found}"
            ),
        }
    }
}

impl std::error::Error for PipelineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = PipelineError::MissingInput {
            role: "inventory",
            path: PathBuf::from("raw_data/Stock161026.dat"),
        };
        assert_eq!(
            err.to_string(),
            "missing inventory input: raw_data/Stock161026.dat"
        );

        let err = PipelineError::MissingColumn {
            source: "report.xlsx".to_string(),
            column: "Plate Number".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "report.xlsx: missing required column 'Plate Number'"
        );
    }

    #[test]
    fn test_downcast_through_anyhow() {
        let err: anyhow::Error = PipelineError::ShortRecord {
            source: "inventory".to_string(),
            line: 4,
            expected: 7,
            found: 5,
        }
        .into();

        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::ShortRecord { found: 5, .. })
        ));
    }
}
