//! In-memory tables moved between the store and the pipeline stages.

use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(v) => Some(*v as f64),
            Cell::Real(v) if v.is_finite() => Some(*v),
            _ => None,
        }
    }

    /// Numeric coercion that also accepts numeric text; anything else is missing.
    pub fn coerce_f64(&self) -> Option<f64> {
        match self {
            Cell::Text(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
            other => other.as_f64(),
        }
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            Cell::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Ordering for group keys: numbers numerically, then text lexically.
    pub fn key_cmp(&self, other: &Cell) -> Ordering {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.to_string().cmp(&other.to_string()),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => Ok(()),
            Cell::Int(v) => write!(f, "{}", v),
            Cell::Real(v) => write!(f, "{}", v),
            Cell::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
}

impl ColumnType {
    pub fn sql(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Real)
    }

    /// Narrowest type that holds every non-null cell. All-null columns are text.
    pub fn infer<'a>(cells: impl IntoIterator<Item = &'a Cell>) -> Self {
        let mut ty: Option<ColumnType> = None;
        for cell in cells {
            let cell_ty = match cell {
                Cell::Null => continue,
                Cell::Int(_) => ColumnType::Integer,
                Cell::Real(_) => ColumnType::Real,
                Cell::Text(_) => return ColumnType::Text,
            };
            ty = Some(match (ty, cell_ty) {
                (None, t) => t,
                (Some(ColumnType::Integer), ColumnType::Integer) => ColumnType::Integer,
                _ => ColumnType::Real,
            });
        }
        ty.unwrap_or(ColumnType::Text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(name: &str, columns: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            columns,
            rows: Vec::new(),
        }
    }

    /// Build a table from raw text fields, inferring one type per column.
    /// Empty fields become NULL; a column is text as soon as one field is non-numeric.
    pub fn from_text_rows(name: &str, columns: Vec<String>, raw: Vec<Vec<String>>) -> Self {
        let types: Vec<ColumnType> = (0..columns.len())
            .map(|i| infer_text_column(raw.iter().map(|r| r[i].as_str())))
            .collect();
        let rows = raw
            .into_iter()
            .map(|r| {
                r.into_iter()
                    .zip(&types)
                    .map(|(field, ty)| text_to_cell(field, *ty))
                    .collect()
            })
            .collect();
        Self {
            name: name.to_string(),
            columns,
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// First column whose name contains `needle`, ignoring case.
    pub fn find_column(&self, needle: &str) -> Option<usize> {
        let needle = needle.to_lowercase();
        self.columns
            .iter()
            .position(|c| c.to_lowercase().contains(&needle))
    }

    pub fn column_type(&self, idx: usize) -> ColumnType {
        ColumnType::infer(self.rows.iter().map(|r| &r[idx]))
    }

    pub fn numeric_columns(&self) -> Vec<usize> {
        (0..self.columns.len())
            .filter(|&i| self.column_type(i).is_numeric())
            .collect()
    }
}

fn infer_text_column<'a>(fields: impl Iterator<Item = &'a str>) -> ColumnType {
    let mut ty: Option<ColumnType> = None;
    for field in fields {
        let field = field.trim();
        if field.is_empty() {
            continue;
        }
        let field_ty = if field.parse::<i64>().is_ok() {
            ColumnType::Integer
        } else if field.parse::<f64>().is_ok() {
            ColumnType::Real
        } else {
            return ColumnType::Text;
        };
        ty = Some(match (ty, field_ty) {
            (None, t) => t,
            (Some(ColumnType::Integer), ColumnType::Integer) => ColumnType::Integer,
            _ => ColumnType::Real,
        });
    }
    ty.unwrap_or(ColumnType::Text)
}

fn text_to_cell(field: String, ty: ColumnType) -> Cell {
    let trimmed = field.trim();
    if trimmed.is_empty() {
        return Cell::Null;
    }
    match ty {
        ColumnType::Integer => trimmed.parse().map(Cell::Int).unwrap_or(Cell::Null),
        ColumnType::Real => trimmed.parse().map(Cell::Real).unwrap_or(Cell::Null),
        ColumnType::Text => Cell::Text(field),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(rows: &[&[&str]]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|r| r.iter().map(|s| s.to_string()).collect())
            .collect()
    }

    #[test]
    fn infers_one_type_per_column() {
        let table = Table::from_text_rows(
            "t",
            vec!["Batch".into(), "Year".into(), "Titer".into()],
            raw(&[&["B-1", "2020", "1.5"], &["B-2", "2021", "2"], &["B-3", "", "NaN-ish"]]),
        );
        assert_eq!(table.column_type(0), ColumnType::Text);
        assert_eq!(table.column_type(1), ColumnType::Integer);
        assert_eq!(table.rows[2][1], Cell::Null);
        // one non-numeric field turns the whole column into text
        assert_eq!(table.column_type(2), ColumnType::Text);
        assert_eq!(table.rows[1][2], Cell::Text("2".into()));
    }

    #[test]
    fn integers_widen_to_real() {
        let table = Table::from_text_rows(
            "t",
            vec!["v".into()],
            raw(&[&["1"], &["2.5"]]),
        );
        assert_eq!(table.column_type(0), ColumnType::Real);
        assert_eq!(table.rows[0][0], Cell::Real(1.0));
        assert_eq!(table.numeric_columns(), vec![0]);
    }

    #[test]
    fn find_column_is_case_insensitive() {
        let table = Table::new("t", vec!["Time (h)".into(), "BatchID".into()]);
        assert_eq!(table.find_column("time"), Some(0));
        assert_eq!(table.find_column("batch"), Some(1));
        assert_eq!(table.find_column("year"), None);
    }

    #[test]
    fn group_keys_sort_numbers_numerically() {
        let mut keys = vec![Cell::Int(10), Cell::Text("b".into()), Cell::Int(9)];
        keys.sort_by(|a, b| a.key_cmp(b));
        assert_eq!(keys, vec![Cell::Int(9), Cell::Int(10), Cell::Text("b".into())]);
    }

    #[test]
    fn coerce_reads_numeric_text() {
        assert_eq!(Cell::Text(" 3.5 ".into()).coerce_f64(), Some(3.5));
        assert_eq!(Cell::Text("n/a".into()).coerce_f64(), None);
        assert_eq!(Cell::Null.coerce_f64(), None);
    }
}
