//! Schema-free reading of STAR files.
//!
//! Nothing about a STAR file is found at a fixed offset. A table is located by scanning
//! for its title and the `loop_` that follows it, columns are located by scanning the
//! header block for their names, and values are pulled out of a data line by splitting
//! on whitespace. Different versions of the producing tools spell some columns
//! differently, so a logical column is described by a [`ColumnSpec`] holding an ordered
//! list of spellings which are tried in turn.
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use super::constants::{COLUMN_NUMBER_PREFIX, COLUMN_PREFIX, LOOP_TOKEN};
use super::error::StarError;

/// Line boundaries of one table within a STAR file. All line numbers are 1-based.
///
/// `table_start < header_start <= data_start <= data_end + 1` always holds. A table
/// without any data rows has `data_start == data_end + 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StarTable {
    pub title: String,
    pub table_start: usize,
    pub header_start: usize,
    pub data_start: usize,
    pub data_end: usize,
}

impl StarTable {
    /// Last line of the header block
    pub fn header_end(&self) -> usize {
        self.data_start - 1
    }

    pub fn header_lines(&self) -> RangeInclusive<usize> {
        self.header_start..=self.header_end()
    }

    pub fn record_lines(&self) -> RangeInclusive<usize> {
        self.data_start..=self.data_end
    }

    pub fn n_records(&self) -> usize {
        (self.data_end + 1) - self.data_start
    }
}

/// A resolved column: the name that matched and its 1-based index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub index: usize,
}

/// One logical column: a primary name followed by the fallback spellings to try, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub fallbacks: &'static [&'static str],
}

impl ColumnSpec {
    pub const fn new(name: &'static str, fallbacks: &'static [&'static str]) -> Self {
        Self { name, fallbacks }
    }

    pub fn candidates(&self) -> impl Iterator<Item = &'static str> + '_ {
        std::iter::once(self.name).chain(self.fallbacks.iter().copied())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Title,
    Loop,
    Header,
    Data,
}

/// The lines of a STAR file, read once and then scanned as often as needed.
#[derive(Debug, Clone)]
pub struct StarFile {
    path: PathBuf,
    lines: Vec<String>,
}

impl StarFile {
    /// Read a STAR file from disk
    pub fn open(path: &Path) -> Result<Self, StarError> {
        if !path.exists() {
            return Err(StarError::BadFilePath(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::from_contents(path, &contents))
    }

    /// Wrap STAR text that is already in memory
    pub fn from_contents(path: &Path, contents: &str) -> Self {
        Self {
            path: path.to_path_buf(),
            lines: contents.lines().map(String::from).collect(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn n_lines(&self) -> usize {
        self.lines.len()
    }

    /// Get a line by its 1-based number
    pub fn line(&self, number: usize) -> Option<&str> {
        number
            .checked_sub(1)
            .and_then(|idx| self.lines.get(idx))
            .map(String::as_str)
    }

    /// Find the boundaries of the table with the given title.
    ///
    /// Only the first table carrying the title is considered.
    pub fn locate_table(&self, title: &str) -> Result<StarTable, StarError> {
        let mut state = ScanState::Title;
        let mut table_start = 0;
        let mut header_start = 0;
        let mut data_start = 0;

        for (idx, line) in self.lines.iter().enumerate() {
            let number = idx + 1;
            match state {
                ScanState::Title => {
                    if leading_token(line) == Some(title) {
                        table_start = number;
                        state = ScanState::Loop;
                    }
                }
                ScanState::Loop => match leading_token(line) {
                    Some(LOOP_TOKEN) => {
                        header_start = number + 1;
                        state = ScanState::Header;
                    }
                    // Reached the next block; this table is not a loop table
                    Some(token) if token.starts_with("data_") => break,
                    _ => (),
                },
                ScanState::Header => {
                    if !line.trim_start().starts_with(COLUMN_PREFIX) {
                        data_start = number;
                        if line.trim().is_empty() {
                            return Ok(StarTable {
                                title: title.to_string(),
                                table_start,
                                header_start,
                                data_start,
                                data_end: number - 1,
                            });
                        }
                        state = ScanState::Data;
                    }
                }
                ScanState::Data => {
                    if line.trim().is_empty() {
                        return Ok(StarTable {
                            title: title.to_string(),
                            table_start,
                            header_start,
                            data_start,
                            data_end: number - 1,
                        });
                    }
                }
            }
        }

        let n_lines = self.lines.len();
        match state {
            ScanState::Title | ScanState::Loop => {
                Err(StarError::MissingTable(vec![title.to_string()]))
            }
            ScanState::Header => Ok(StarTable {
                title: title.to_string(),
                table_start,
                header_start,
                data_start: n_lines + 1,
                data_end: n_lines,
            }),
            ScanState::Data => Ok(StarTable {
                title: title.to_string(),
                table_start,
                header_start,
                data_start,
                data_end: n_lines,
            }),
        }
    }

    /// Locate the first of several possible table titles which is present
    pub fn locate_first_table(&self, titles: &[&str]) -> Result<StarTable, StarError> {
        for title in titles {
            match self.locate_table(title) {
                Ok(table) => return Ok(table),
                Err(StarError::MissingTable(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(StarError::MissingTable(
            titles.iter().map(|t| t.to_string()).collect(),
        ))
    }

    /// Resolve a logical column within a table's header.
    ///
    /// Candidates are tried in order and the first one present wins. The index is read
    /// from the `#N` token following the name; a header line without one gets its
    /// position in the header block.
    pub fn resolve_column(
        &self,
        table: &StarTable,
        spec: &ColumnSpec,
    ) -> Result<Column, StarError> {
        for candidate in spec.candidates() {
            if let Some(column) = self.find_column(table, candidate)? {
                return Ok(column);
            }
        }
        Err(StarError::MissingColumn(
            spec.candidates().map(String::from).collect(),
            table.title.clone(),
        ))
    }

    /// Resolve an optional column; a column absent under every spelling is None
    pub fn resolve_optional_column(
        &self,
        table: &StarTable,
        spec: &ColumnSpec,
    ) -> Result<Option<Column>, StarError> {
        match self.resolve_column(table, spec) {
            Ok(column) => Ok(Some(column)),
            Err(StarError::MissingColumn(_, _)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn find_column(&self, table: &StarTable, name: &str) -> Result<Option<Column>, StarError> {
        for number in table.header_lines() {
            let Some(line) = self.line(number) else {
                break;
            };
            let mut tokens = line.split_whitespace();
            if tokens.next() != Some(name) {
                continue;
            }
            let index = match tokens.next() {
                Some(token) => token
                    .strip_prefix(COLUMN_NUMBER_PREFIX)
                    .and_then(|n| n.parse::<usize>().ok())
                    .filter(|n| *n > 0)
                    .ok_or(StarError::BadColumnNumber(number))?,
                None => number - table.header_start + 1,
            };
            return Ok(Some(Column {
                name: name.to_string(),
                index,
            }));
        }
        Ok(None)
    }

    /// Iterate the data lines of a table as (line number, line)
    pub fn records<'a>(
        &'a self,
        table: &StarTable,
    ) -> impl Iterator<Item = (usize, &'a str)> + 'a {
        let lines = table.record_lines();
        lines.filter_map(move |number| self.line(number).map(|line| (number, line)))
    }
}

fn leading_token(line: &str) -> Option<&str> {
    line.split_whitespace().next()
}

/// Get the value at a 1-based column index from one data line.
///
/// Returns None when the line holds fewer values than requested.
pub fn get_field(line: &str, index: usize) -> Option<&str> {
    index
        .checked_sub(1)
        .and_then(|idx| line.split_whitespace().nth(idx))
}

/// Get the value of a required column, treating absence as a malformed record
pub fn require_field<'a>(
    line: &'a str,
    line_number: usize,
    column: &Column,
) -> Result<&'a str, StarError> {
    get_field(line, column.index).ok_or_else(|| StarError::MalformedRecord {
        line: line_number,
        column: column.name.clone(),
        index: column.index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const IMAGE: ColumnSpec = ColumnSpec::new("_rlnImageName", &[]);
    const ORIGIN_X: ColumnSpec = ColumnSpec::new("_rlnOriginXAngst", &["_rlnOriginX"]);

    const TWO_TABLES: &str = "# version 30001

data_optics

loop_
_rlnOpticsGroupName #1
_rlnOpticsGroup #2
optics_1\t1


# version 30001

data_particles

loop_
_rlnImageName #1
_rlnDefocusU #2
_rlnOriginX #3
0@stacks/a.mrcs\t10000.0\t1.5
1@stacks/a.mrcs\t11000.0\t-2.0
0@stacks/b.mrcs\t12000.0\t0.0
";

    fn star(contents: &str) -> StarFile {
        StarFile::from_contents(Path::new("test.star"), contents)
    }

    fn check_invariant(table: &StarTable) {
        assert!(table.table_start < table.header_start);
        assert!(table.header_start <= table.data_start);
        assert!(table.data_start <= table.data_end + 1);
    }

    #[test]
    fn test_locate_tables() {
        let file = star(TWO_TABLES);
        let optics = file.locate_table("data_optics").unwrap();
        check_invariant(&optics);
        assert_eq!(optics.table_start, 3);
        assert_eq!(optics.header_start, 6);
        assert_eq!(optics.data_start, 8);
        assert_eq!(optics.data_end, 8);
        assert_eq!(optics.n_records(), 1);

        let particles = file.locate_table("data_particles").unwrap();
        check_invariant(&particles);
        assert_eq!(particles.header_start, 16);
        assert_eq!(particles.data_start, 19);
        // No trailing blank line: the table runs to the end of the file
        assert_eq!(particles.data_end, file.n_lines());
        assert_eq!(particles.n_records(), 3);
    }

    #[test]
    fn test_table_without_rows() {
        let file = star("data_particles\nloop_\n_rlnImageName #1\n\ndata_other\n");
        let table = file.locate_table("data_particles").unwrap();
        check_invariant(&table);
        assert_eq!(table.n_records(), 0);
        assert_eq!(file.records(&table).count(), 0);

        let file = star("data_particles\nloop_\n_rlnImageName #1\n");
        let table = file.locate_table("data_particles").unwrap();
        check_invariant(&table);
        assert_eq!(table.n_records(), 0);
    }

    #[test]
    fn test_first_duplicate_wins() {
        let file = star("data_a\nloop_\n_x #1\n1\n\ndata_a\nloop_\n_x #1\n2\n3\n");
        let table = file.locate_table("data_a").unwrap();
        assert_eq!(table.table_start, 1);
        assert_eq!(table.n_records(), 1);
    }

    #[test]
    fn test_missing_table() {
        let file = star(TWO_TABLES);
        assert!(matches!(
            file.locate_table("data_micrographs"),
            Err(StarError::MissingTable(_))
        ));
        // A block without a loop_ does not borrow the next block's loop
        let file = star("data_general\n_rlnKey 1\n\ndata_b\nloop_\n_x #1\n1\n");
        assert!(file.locate_table("data_general").is_err());
        let table = file
            .locate_first_table(&["data_particles", "data_b"])
            .unwrap();
        assert_eq!(table.title, "data_b");
    }

    #[test]
    fn test_resolve_with_fallback() {
        let file = star(TWO_TABLES);
        let table = file.locate_table("data_particles").unwrap();
        let column = file.resolve_column(&table, &ORIGIN_X).unwrap();
        assert_eq!(column.name, "_rlnOriginX");
        assert_eq!(column.index, 3);
        // Resolving twice gives the same answer
        assert_eq!(file.resolve_column(&table, &ORIGIN_X).unwrap(), column);
    }

    #[test]
    fn test_missing_column_lists_candidates() {
        let file = star(TWO_TABLES);
        let table = file.locate_table("data_optics").unwrap();
        match file.resolve_column(&table, &ORIGIN_X) {
            Err(StarError::MissingColumn(names, title)) => {
                assert_eq!(names, vec!["_rlnOriginXAngst", "_rlnOriginX"]);
                assert_eq!(title, "data_optics");
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert!(file
            .resolve_optional_column(&table, &ORIGIN_X)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_header_without_numbers_uses_position() {
        let file = star("data_\nloop_\n_rlnMicrographName\n_rlnImageName\nmic.mrc 3@a.mrcs\n");
        let table = file.locate_table("data_").unwrap();
        let column = file.resolve_column(&table, &IMAGE).unwrap();
        assert_eq!(column.index, 2);
        let (number, line) = file.records(&table).next().unwrap();
        assert_eq!(require_field(line, number, &column).unwrap(), "3@a.mrcs");
    }

    #[test]
    fn test_bad_column_number() {
        let file = star("data_\nloop_\n_rlnImageName #x\na\n");
        let table = file.locate_table("data_").unwrap();
        assert!(matches!(
            file.resolve_column(&table, &IMAGE),
            Err(StarError::BadColumnNumber(3))
        ));
    }

    #[test]
    fn test_record_round_trip() {
        let values = ["12@stacks/x.mrcs", "-0.25", "1.0e4", "optics_1", "7"];
        let mut contents = String::from("data_t\n\nloop_\n");
        for (idx, _) in values.iter().enumerate() {
            contents.push_str(&format!("_field{} #{}\n", idx, idx + 1));
        }
        contents.push_str(&values.join("\t"));
        contents.push('\n');
        let file = star(&contents);
        let table = file.locate_table("data_t").unwrap();
        let (number, line) = file.records(&table).next().unwrap();
        for (idx, value) in values.iter().enumerate() {
            let column = file
                .find_column(&table, &format!("_field{idx}"))
                .unwrap()
                .unwrap();
            assert_eq!(require_field(line, number, &column).unwrap(), *value);
        }
    }

    #[test]
    fn test_short_record_is_absent() {
        assert_eq!(get_field("a  b\tc", 3), Some("c"));
        assert_eq!(get_field("a b c", 4), None);
        assert_eq!(get_field("a b c", 0), None);
        let column = Column {
            name: String::from("_rlnDefocusV"),
            index: 4,
        };
        assert!(matches!(
            require_field("a b c", 12, &column),
            Err(StarError::MalformedRecord { line: 12, index: 4, .. })
        ));
    }
}
