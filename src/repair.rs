// 🩹 Row Repair - Rebuild listing records from a malformed export
//
// The listings export spills part of each record into "continuation" rows
// that only carry a value in the first column. Every other row is a
// "primary" row. One record comes out per primary row; the first
// delimiter-bearing continuation value that follows it becomes its details.

use serde::{Deserialize, Serialize};

/// Delimiter that marks a continuation value as carrying vehicle details.
pub const DETAILS_DELIMITER: char = '|';

/// Columns of a continuation row inspected for a details value.
const CONTINUATION_COLUMNS: usize = 3;

/// One row as read from a tabular export. Empty cells are `None`.
pub type RawRow = Vec<Option<String>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairedRow {
    /// The primary row, untouched.
    pub cells: RawRow,
    /// Details absorbed from the continuation rows that followed it.
    /// Empty when none qualified.
    pub details: String,
}

/// A primary row has at least one populated field beyond the first column.
pub fn is_primary(row: &[Option<String>]) -> bool {
    row.iter().skip(1).any(|cell| is_populated(cell))
}

fn is_populated(cell: &Option<String>) -> bool {
    cell.as_deref().map_or(false, |v| !v.trim().is_empty())
}

/// Single left-to-right pass. Continuation rows before the first primary
/// row have no owner and are dropped. Input with no primary rows yields an
/// empty output.
pub fn repair_rows<I>(rows: I) -> Vec<RepairedRow>
where
    I: IntoIterator<Item = RawRow>,
{
    let mut repaired = Vec::new();
    let mut current: Option<RawRow> = None;
    let mut pending: Vec<RawRow> = Vec::new();

    for row in rows {
        if is_primary(&row) {
            if let Some(cells) = current.take() {
                repaired.push(RepairedRow {
                    details: first_details(&pending).unwrap_or_default(),
                    cells,
                });
            }
            pending.clear();
            current = Some(row);
        } else {
            pending.push(row);
        }
    }

    if let Some(cells) = current {
        repaired.push(RepairedRow {
            details: first_details(&pending).unwrap_or_default(),
            cells,
        });
    }

    repaired
}

/// First match wins: rows are inspected in input order and the first
/// populated cell (within the leading columns) containing the delimiter is
/// returned.
fn first_details(pending: &[RawRow]) -> Option<String> {
    pending.iter().find_map(|row| {
        row.iter()
            .take(CONTINUATION_COLUMNS)
            .flatten()
            .find(|value| value.contains(DETAILS_DELIMITER))
            .cloned()
    })
}
