use fxhash::FxHashMap;
use std::path::{Path, PathBuf};

use super::config::Config;
use super::constants::{PROJECT_RELATIVE_MARKER, UID_FIELD};
use super::cs_file::{CsDataset, FieldKind};
use super::error::SchemaError;

/// Which dataset holds a field, and at what position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldLocation {
    source: usize,
    field: usize,
}

/// Named-field access over a CS particle dataset.
///
/// The upstream tool splits particle metadata between a main file and "passthrough"
/// files which share the particle uid. The adapter hides that split: every field is
/// looked up by name, and rows of a passthrough dataset are joined to the main dataset
/// through the uid. The name map and the joins are built once.
#[derive(Debug)]
pub struct SchemaAdapter {
    datasets: Vec<CsDataset>,
    fields: FxHashMap<String, FieldLocation>,
    // Per dataset: main row -> dataset row (None for the main dataset itself)
    row_maps: Vec<Option<Vec<usize>>>,
}

impl SchemaAdapter {
    /// Wrap a single dataset
    pub fn new(primary: CsDataset) -> Self {
        let mut fields = FxHashMap::default();
        for (idx, field) in primary.fields().iter().enumerate() {
            fields.insert(
                field.name.clone(),
                FieldLocation {
                    source: 0,
                    field: idx,
                },
            );
        }
        Self {
            datasets: vec![primary],
            fields,
            row_maps: vec![None],
        }
    }

    /// Wrap a main dataset and its passthrough datasets.
    ///
    /// Fields of the main dataset win over passthrough fields of the same name. Every
    /// main row must have a matching uid in every passthrough dataset.
    pub fn with_passthrough(
        primary: CsDataset,
        passthrough: Vec<CsDataset>,
    ) -> Result<Self, SchemaError> {
        let mut adapter = Self::new(primary);
        if passthrough.is_empty() {
            return Ok(adapter);
        }

        let primary_uids = read_uids(&adapter.datasets[0])?;
        for dataset in passthrough.into_iter() {
            let source = adapter.datasets.len();
            let mut uid_rows = FxHashMap::<u64, usize>::default();
            for (row, uid) in read_uids(&dataset)?.into_iter().enumerate() {
                uid_rows.insert(uid, row);
            }
            let row_map = primary_uids
                .iter()
                .map(|uid| {
                    uid_rows
                        .get(uid)
                        .copied()
                        .ok_or(SchemaError::MissingPassthroughRow(*uid, source))
                })
                .collect::<Result<Vec<usize>, SchemaError>>()?;

            for (idx, field) in dataset.fields().iter().enumerate() {
                adapter
                    .fields
                    .entry(field.name.clone())
                    .or_insert(FieldLocation { source, field: idx });
            }
            spdlog::info!(
                "Joined passthrough dataset {} ({} fields)",
                dataset.path().display(),
                dataset.fields().len()
            );
            adapter.datasets.push(dataset);
            adapter.row_maps.push(Some(row_map));
        }
        Ok(adapter)
    }

    /// Open the datasets named in the configuration
    pub fn from_config(config: &Config) -> Result<Self, SchemaError> {
        let primary = CsDataset::open(&config.cs_path)?;
        let passthrough = config
            .passthrough_paths
            .iter()
            .map(|path| CsDataset::open(path))
            .collect::<Result<Vec<CsDataset>, _>>()?;
        Self::with_passthrough(primary, passthrough)
    }

    /// Number of particles (rows of the main dataset)
    pub fn len(&self) -> usize {
        self.datasets[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets[0].is_empty()
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// The first candidate name that exists, if any
    pub fn first_present<'a>(&self, candidates: &[&'a str]) -> Option<&'a str> {
        candidates.iter().copied().find(|name| self.has_field(name))
    }

    /// Fail unless every field exists; the error lists the missing ones
    pub fn require_fields(&self, names: &[&str]) -> Result<(), SchemaError> {
        let missing: Vec<String> = names
            .iter()
            .filter(|name| !self.has_field(name))
            .map(|name| name.to_string())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(SchemaError::MissingField(missing))
        }
    }

    fn locate(&self, name: &str, row: usize) -> Result<(&CsDataset, usize, usize), SchemaError> {
        let location = self
            .fields
            .get(name)
            .ok_or_else(|| SchemaError::MissingField(vec![name.to_string()]))?;
        let row = match &self.row_maps[location.source] {
            Some(map) => map[row],
            None => row,
        };
        Ok((&self.datasets[location.source], location.field, row))
    }

    /// One component of a numeric field (component 0 for scalars)
    pub fn component(&self, name: &str, row: usize, component: usize) -> Result<f64, SchemaError> {
        let (dataset, field, row) = self.locate(name, row)?;
        if !dataset.fields()[field].is_numeric() {
            return Err(SchemaError::NotNumeric(name.to_string()));
        }
        dataset
            .numeric(field, row, component)
            .ok_or_else(|| SchemaError::ComponentOutOfRange(name.to_string(), component))
    }

    pub fn scalar(&self, name: &str, row: usize) -> Result<f64, SchemaError> {
        self.component(name, row, 0)
    }

    /// Every component of a numeric vector field
    pub fn vector(&self, name: &str, row: usize) -> Result<Vec<f64>, SchemaError> {
        let (dataset, field, _) = self.locate(name, row)?;
        let n_components = dataset.fields()[field].n_components();
        (0..n_components)
            .map(|component| self.component(name, row, component))
            .collect()
    }

    /// A component of an optional field; an absent field reads as zero
    pub fn component_or_zero(
        &self,
        name: Option<&str>,
        row: usize,
        component: usize,
    ) -> Result<f64, SchemaError> {
        match name {
            Some(name) => self.component(name, row, component),
            None => Ok(0.0),
        }
    }

    /// A byte-string field decoded as text with padding removed
    pub fn text(&self, name: &str, row: usize) -> Result<String, SchemaError> {
        let (dataset, field, row) = self.locate(name, row)?;
        if !matches!(
            dataset.fields()[field].kind,
            FieldKind::Bytes | FieldKind::Void
        ) {
            return Err(SchemaError::NotText(name.to_string()));
        }
        Ok(String::from_utf8_lossy(dataset.raw(field, row))
            .trim_end_matches('\0')
            .trim()
            .to_string())
    }

    /// A path field resolved against the project directory
    pub fn path(&self, name: &str, row: usize, project: &Path) -> Result<PathBuf, SchemaError> {
        Ok(resolve_project_path(project, &self.text(name, row)?))
    }
}

fn read_uids(dataset: &CsDataset) -> Result<Vec<u64>, SchemaError> {
    let field = dataset
        .fields()
        .iter()
        .position(|f| f.name == UID_FIELD)
        .ok_or_else(|| SchemaError::MissingUid(dataset.path().to_path_buf()))?;
    (0..dataset.len())
        .map(|row| {
            dataset
                .unsigned(field, row)
                .ok_or_else(|| SchemaError::NotNumeric(UID_FIELD.to_string()))
        })
        .collect()
}

/// Join a stored path onto the project directory.
///
/// A single leading marker means the path is relative to the project directory and is
/// dropped before joining.
pub fn resolve_project_path(project: &Path, raw: &str) -> PathBuf {
    let stripped = raw.strip_prefix(PROJECT_RELATIVE_MARKER).unwrap_or(raw);
    project.join(stripped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CsFixture, FixtureColumn};

    fn dataset(fixture: CsFixture) -> CsDataset {
        CsDataset::from_bytes(Path::new("test.cs"), fixture.to_bytes()).unwrap()
    }

    fn main_fixture() -> CsFixture {
        CsFixture::new()
            .column("uid", FixtureColumn::U64(vec![11, 22, 33]))
            .column(
                "blob/path",
                FixtureColumn::Text(
                    32,
                    vec![
                        String::from(">J5/extract/1_mic.mrc"),
                        String::from("  J5/extract/2_mic.mrc"),
                        String::from("/abs/3_mic.mrc"),
                    ],
                ),
            )
            .column(
                "blob/shape",
                FixtureColumn::U32x2(vec![[128, 128], [128, 128], [128, 128]]),
            )
    }

    #[test]
    fn test_paths_and_text() {
        let adapter = SchemaAdapter::new(dataset(main_fixture()));
        let project = Path::new("/data/P3");
        assert_eq!(
            adapter.path("blob/path", 0, project).unwrap(),
            PathBuf::from("/data/P3/J5/extract/1_mic.mrc")
        );
        assert_eq!(
            adapter.path("blob/path", 1, project).unwrap(),
            PathBuf::from("/data/P3/J5/extract/2_mic.mrc")
        );
        assert_eq!(
            adapter.path("blob/path", 2, project).unwrap(),
            PathBuf::from("/abs/3_mic.mrc")
        );
        assert_eq!(
            resolve_project_path(project, ">>x.mrc"),
            PathBuf::from("/data/P3/>x.mrc")
        );
        assert!(matches!(
            adapter.text("blob/shape", 0),
            Err(SchemaError::NotText(_))
        ));
    }

    #[test]
    fn test_vectors_and_missing_fields() {
        let adapter = SchemaAdapter::new(dataset(main_fixture()));
        assert_eq!(adapter.vector("blob/shape", 2).unwrap(), vec![128.0, 128.0]);
        assert_eq!(adapter.scalar("blob/shape", 2).unwrap(), 128.0);
        assert!(matches!(
            adapter.scalar("ctf/cs_mm", 0),
            Err(SchemaError::MissingField(_))
        ));
        assert!(matches!(
            adapter.scalar("blob/path", 0),
            Err(SchemaError::NotNumeric(_))
        ));
        assert_eq!(adapter.component_or_zero(None, 0, 1).unwrap(), 0.0);
        assert_eq!(
            adapter.first_present(&["alignments3D/shift", "blob/shape"]),
            Some("blob/shape")
        );
        match adapter.require_fields(&["uid", "ctf/df1_A", "ctf/df2_A"]) {
            Err(SchemaError::MissingField(missing)) => {
                assert_eq!(missing, vec!["ctf/df1_A", "ctf/df2_A"])
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_passthrough_join_by_uid() {
        let passthrough = CsFixture::new()
            .column("uid", FixtureColumn::U64(vec![33, 11, 22, 44]))
            .column("ctf/df1_A", FixtureColumn::F32(vec![3.0, 1.0, 2.0, 4.0]))
            .column(
                "blob/shape",
                FixtureColumn::U32x2(vec![[1, 1], [1, 1], [1, 1], [1, 1]]),
            );
        let adapter = SchemaAdapter::with_passthrough(
            dataset(main_fixture()),
            vec![dataset(passthrough)],
        )
        .unwrap();
        assert_eq!(adapter.len(), 3);
        assert_eq!(adapter.scalar("ctf/df1_A", 0).unwrap(), 1.0);
        assert_eq!(adapter.scalar("ctf/df1_A", 1).unwrap(), 2.0);
        assert_eq!(adapter.scalar("ctf/df1_A", 2).unwrap(), 3.0);
        // The main dataset wins on shared names
        assert_eq!(adapter.scalar("blob/shape", 0).unwrap(), 128.0);
    }

    #[test]
    fn test_passthrough_missing_row() {
        let passthrough = CsFixture::new()
            .column("uid", FixtureColumn::U64(vec![11, 22]))
            .column("ctf/df1_A", FixtureColumn::F32(vec![1.0, 2.0]));
        assert!(matches!(
            SchemaAdapter::with_passthrough(dataset(main_fixture()), vec![dataset(passthrough)]),
            Err(SchemaError::MissingPassthroughRow(33, 1))
        ));
    }
}
