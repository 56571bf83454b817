use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, Float32Array, Float64Array, Scalar, StringArray, StringDictionaryBuilder,
    UInt32Array,
};
use arrow::compute::kernels::cmp::{gt_eq, lt_eq};
use arrow::datatypes::{DataType, Field, Int32Type, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::{ArrowPredicateFn, ParquetRecordBatchReaderBuilder, RowFilter};
use parquet::arrow::{ArrowWriter, ProjectionMask};

use super::model::{Axis, AxisKind, Dataset, Instrument, Observation, Scope, Tags};
use crate::error::StoreError;

// ---------------------------------------------------------------------------
// File layout
// ---------------------------------------------------------------------------
//
// One row per (measurement, axis position):
//
//   measurement  u32            position of the observation in the dataset
//   instrument   dict<utf8>
//   condition    u32
//   sequence     u32  nullable
//   subject      dict<utf8> nullable
//   scope        dict<utf8> nullable
//   excerpt      dict<utf8> nullable
//   source       utf8
//   axis         f64
//   response     f32
//
// Schema metadata carries the declared instrument and condition orders and
// the axis kind.

const META_INSTRUMENTS: &str = "phasediff.instruments";
const META_CONDITIONS: &str = "phasediff.conditions";
const META_AXIS: &str = "phasediff.axis";

fn dict_utf8() -> DataType {
    DataType::Dictionary(Box::new(DataType::Int32), Box::new(DataType::Utf8))
}

fn schema(dataset: &Dataset) -> Result<SchemaRef, StoreError> {
    let fields = vec![
        Field::new("measurement", DataType::UInt32, false),
        Field::new("instrument", dict_utf8(), false),
        Field::new("condition", DataType::UInt32, false),
        Field::new("sequence", DataType::UInt32, true),
        Field::new("subject", dict_utf8(), true),
        Field::new("scope", dict_utf8(), true),
        Field::new("excerpt", dict_utf8(), true),
        Field::new("source", DataType::Utf8, false),
        Field::new("axis", DataType::Float64, false),
        Field::new("response", DataType::Float32, false),
    ];
    let metadata = HashMap::from([
        (
            META_INSTRUMENTS.to_string(),
            serde_json::to_string(dataset.instruments())?,
        ),
        (
            META_CONDITIONS.to_string(),
            serde_json::to_string(dataset.conditions())?,
        ),
        (
            META_AXIS.to_string(),
            dataset.axis().kind().as_str().to_string(),
        ),
    ]);
    Ok(Arc::new(Schema::new_with_metadata(fields, metadata)))
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Flatten a dataset into one long-format record batch.
pub fn to_record_batch(dataset: &Dataset) -> Result<RecordBatch, StoreError> {
    let width = dataset.axis().len();
    let rows = dataset.len() * width;

    let mut measurement = Vec::with_capacity(rows);
    let mut instrument = StringDictionaryBuilder::<Int32Type>::new();
    let mut condition = Vec::with_capacity(rows);
    let mut sequence = Vec::with_capacity(rows);
    let mut subject = StringDictionaryBuilder::<Int32Type>::new();
    let mut scope = StringDictionaryBuilder::<Int32Type>::new();
    let mut excerpt = StringDictionaryBuilder::<Int32Type>::new();
    let mut source = Vec::with_capacity(rows);
    let mut axis = Vec::with_capacity(rows);
    let mut response = Vec::with_capacity(rows);

    for (m, obs) in dataset.observations().iter().enumerate() {
        let tags = &obs.tags;
        let inst = tags.instrument().map(|i| i.name()).unwrap_or_default();
        for (x, y) in dataset.axis().values().iter().zip(&obs.response) {
            measurement.push(m as u32);
            instrument.append_value(inst);
            condition.push(tags.condition().unwrap_or_default());
            sequence.push(tags.sequence());
            subject.append_option(tags.subject());
            scope.append_option(tags.scope().map(Scope::as_str));
            excerpt.append_option(tags.excerpt());
            source.push(obs.source.as_str());
            axis.push(*x);
            response.push(*y);
        }
    }

    let columns: Vec<ArrayRef> = vec![
        Arc::new(UInt32Array::from(measurement)),
        Arc::new(instrument.finish()),
        Arc::new(UInt32Array::from(condition)),
        Arc::new(UInt32Array::from(sequence)),
        Arc::new(subject.finish()),
        Arc::new(scope.finish()),
        Arc::new(excerpt.finish()),
        Arc::new(StringArray::from(source)),
        Arc::new(Float64Array::from(axis)),
        Arc::new(Float32Array::from(response)),
    ];
    Ok(RecordBatch::try_new(schema(dataset)?, columns)?)
}

/// Persist a dataset as a parquet file, creating parent directories.
pub fn save(dataset: &Dataset, path: &Path) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }

    let batch = to_record_batch(dataset)?;
    let file = File::create(path).map_err(io_err)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
    writer.write(&batch)?;
    writer.close()?;

    log::info!(
        "Saved {} observations × {} points to {}",
        dataset.len(),
        dataset.axis().len(),
        path.display()
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Load a persisted dataset in full.
pub fn load(path: &Path) -> Result<Dataset, StoreError> {
    read(path, None)
}

/// Load only the axis points in `[lo, hi]`.
///
/// The bounds are evaluated on the `axis` column alone; other columns are
/// decoded only for the rows that pass.
pub fn load_range(path: &Path, lo: f64, hi: f64) -> Result<Dataset, StoreError> {
    read(path, Some((lo, hi)))
}

fn read(path: &Path, range: Option<(f64, f64)>) -> Result<Dataset, StoreError> {
    let file = File::open(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let schema = builder.schema().clone();

    if let Some((lo, hi)) = range {
        let leaf = builder
            .parquet_schema()
            .columns()
            .iter()
            .position(|c| c.name() == "axis")
            .ok_or(StoreError::MissingColumn("axis"))?;
        let mask = ProjectionMask::leaves(builder.parquet_schema(), [leaf]);
        let predicate = ArrowPredicateFn::new(mask, move |batch: RecordBatch| {
            let axis = batch.column(0);
            let above = gt_eq(axis, &Scalar::new(Float64Array::from(vec![lo])))?;
            let below = lt_eq(axis, &Scalar::new(Float64Array::from(vec![hi])))?;
            arrow::compute::and(&above, &below)
        });
        builder = builder.with_row_filter(RowFilter::new(vec![Box::new(predicate)]));
    }

    let instruments: Vec<String> = metadata_json(&schema, META_INSTRUMENTS)?;
    let conditions: Vec<u32> = metadata_json(&schema, META_CONDITIONS)?;
    let kind = match schema.metadata().get(META_AXIS) {
        Some(s) => s.parse::<AxisKind>().map_err(|value| StoreError::InvalidTag {
            column: "axis",
            value,
        })?,
        None => AxisKind::Frequency,
    };

    let mut partials: BTreeMap<u32, Partial> = BTreeMap::new();
    for batch in builder.build()? {
        let batch = batch?;
        let cols = Columns::new(&batch)?;
        for row in 0..batch.num_rows() {
            let m = cols.measurement.value(row);
            let partial = match partials.entry(m) {
                std::collections::btree_map::Entry::Occupied(e) => e.into_mut(),
                std::collections::btree_map::Entry::Vacant(e) => {
                    e.insert(Partial::new(cols.tags(row, &instruments)?, &cols, row))
                }
            };
            partial.axis.push(cols.axis.value(row));
            partial.response.push(cols.response.value(row));
        }
    }

    let mut iter = partials.into_iter();
    let Some((_, first)) = iter.next() else {
        return Err(StoreError::Empty);
    };
    let axis = Arc::new(Axis::from_values(kind, first.axis.clone()));
    let mut observations = vec![first.into_observation(&axis)];
    for (m, partial) in iter {
        if !axis.matches(&Axis::from_values(kind, partial.axis.clone())) {
            return Err(StoreError::InconsistentAxis { measurement: m });
        }
        observations.push(partial.into_observation(&axis));
    }

    log::info!(
        "Loaded {} observations × {} points from {}",
        observations.len(),
        axis.len(),
        path.display()
    );
    Ok(Dataset::from_admitted(axis, observations, instruments, conditions))
}

fn metadata_json<T: serde::de::DeserializeOwned + Default>(
    schema: &Schema,
    key: &'static str,
) -> Result<T, StoreError> {
    match schema.metadata().get(key) {
        Some(text) => serde_json::from_str(text).map_err(|e| StoreError::InvalidTag {
            column: key,
            value: e.to_string(),
        }),
        None => Ok(T::default()),
    }
}

// -- Parquet / Arrow helpers --

struct Partial {
    tags: Tags,
    source: String,
    axis: Vec<f64>,
    response: Vec<f32>,
}

impl Partial {
    fn new(tags: Tags, cols: &Columns, row: usize) -> Self {
        Partial {
            tags,
            source: cols.source.value(row).to_string(),
            axis: Vec::new(),
            response: Vec::new(),
        }
    }

    fn into_observation(self, axis: &Arc<Axis>) -> Observation {
        Observation {
            tags: self.tags,
            axis: Arc::clone(axis),
            response: self.response,
            source: self.source,
        }
    }
}

/// Typed views of one batch's columns. Dictionary columns are cast to plain
/// strings so files written by other tools with plain `utf8` also load.
struct Columns {
    measurement: UInt32Array,
    instrument: StringArray,
    condition: UInt32Array,
    sequence: UInt32Array,
    subject: StringArray,
    scope: StringArray,
    excerpt: StringArray,
    source: StringArray,
    axis: Float64Array,
    response: Float32Array,
}

impl Columns {
    fn new(batch: &RecordBatch) -> Result<Self, StoreError> {
        Ok(Columns {
            measurement: typed(batch, "measurement")?,
            instrument: text(batch, "instrument")?,
            condition: typed(batch, "condition")?,
            sequence: typed(batch, "sequence")?,
            subject: text(batch, "subject")?,
            scope: text(batch, "scope")?,
            excerpt: text(batch, "excerpt")?,
            source: text(batch, "source")?,
            axis: typed(batch, "axis")?,
            response: typed(batch, "response")?,
        })
    }

    fn tags(&self, row: usize, instruments: &[String]) -> Result<Tags, StoreError> {
        let name = self.instrument.value(row);
        let rank = instruments
            .iter()
            .position(|i| i == name)
            .ok_or_else(|| StoreError::InvalidTag {
                column: "instrument",
                value: name.to_string(),
            })?;
        let mut tags = Tags::new(
            Instrument::new(rank as u16, name),
            self.condition.value(row),
        );
        if self.sequence.is_valid(row) {
            tags = tags.with_sequence(self.sequence.value(row));
        }
        if self.subject.is_valid(row) {
            tags = tags.with_subject(self.subject.value(row));
        }
        if self.scope.is_valid(row) {
            let value = self.scope.value(row);
            let scope = value.parse().map_err(|_| StoreError::InvalidTag {
                column: "scope",
                value: value.to_string(),
            })?;
            tags = tags.with_scope(scope);
        }
        if self.excerpt.is_valid(row) {
            tags = tags.with_excerpt(self.excerpt.value(row));
        }
        Ok(tags)
    }
}

fn column<'a>(batch: &'a RecordBatch, name: &'static str) -> Result<&'a ArrayRef, StoreError> {
    batch
        .column_by_name(name)
        .ok_or(StoreError::MissingColumn(name))
}

fn typed<A: Array + Clone + 'static>(
    batch: &RecordBatch,
    name: &'static str,
) -> Result<A, StoreError> {
    let col = column(batch, name)?;
    col.as_any()
        .downcast_ref::<A>()
        .cloned()
        .ok_or_else(|| StoreError::ColumnType {
            column: name,
            found: format!("{:?}", col.data_type()),
        })
}

fn text(batch: &RecordBatch, name: &'static str) -> Result<StringArray, StoreError> {
    let col = column(batch, name)?;
    let plain = arrow::compute::cast(col, &DataType::Utf8)?;
    plain
        .as_any()
        .downcast_ref::<StringArray>()
        .cloned()
        .ok_or_else(|| StoreError::ColumnType {
            column: name,
            found: format!("{:?}", col.data_type()),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset() -> Dataset {
        let axis = Arc::new(Axis::linear(AxisKind::Frequency, 0.0, 25_600.0, 257));
        let instruments = vec!["klimke".to_string(), "levaggi".to_string()];
        let mut observations = Vec::new();
        for cond in [1u32, 2] {
            for (rank, name) in instruments.iter().enumerate() {
                for seq in 1..=2u32 {
                    let mut tags = Tags::new(Instrument::new(rank as u16, name.clone()), cond)
                        .with_sequence(seq);
                    if seq == 2 {
                        tags = tags.with_subject("SMD").with_scope(Scope::Test);
                    }
                    observations.push(Observation {
                        tags,
                        axis: Arc::clone(&axis),
                        response: (0..axis.len())
                            .map(|i| (i as f32 + 1.0) * cond as f32 / 7.0)
                            .collect(),
                        source: format!("{name}_{cond}_{seq}.json"),
                    });
                }
            }
        }
        Dataset::from_parts(axis, observations, instruments, vec![1, 2]).unwrap()
    }

    #[test]
    fn round_trip_preserves_axis_and_tags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/ds.parquet");
        let original = dataset();
        save(&original, &path).unwrap();
        let loaded = load(&path).unwrap();

        assert!(loaded.axis().matches(original.axis()));
        assert_eq!(loaded.instruments(), original.instruments());
        assert_eq!(loaded.conditions(), original.conditions());
        assert_eq!(loaded.len(), original.len());
        for (a, b) in original.observations().iter().zip(loaded.observations()) {
            assert_eq!(a.tags, b.tags);
            assert_eq!(a.source, b.source);
            assert_eq!(a.response, b.response);
            assert!(Arc::ptr_eq(&b.axis, loaded.shared_axis()));
        }
    }

    #[test]
    fn range_read_matches_in_memory_band() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ds.parquet");
        let original = dataset();
        save(&original, &path).unwrap();

        let on_disk = load_range(&path, 180.0, 5000.0).unwrap();
        let in_memory = original.select_axis_range(180.0, 5000.0);
        assert!(on_disk.axis().matches(in_memory.axis()));
        assert!(on_disk.axis().first().unwrap() >= 180.0);
        assert!(on_disk.axis().last().unwrap() <= 5000.0);
        for (a, b) in in_memory.observations().iter().zip(on_disk.observations()) {
            assert_eq!(a.response, b.response);
            assert_eq!(a.tags, b.tags);
        }
    }

    #[test]
    fn range_outside_axis_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ds.parquet");
        save(&dataset(), &path).unwrap();
        assert!(matches!(
            load_range(&path, 1e6, 2e6),
            Err(StoreError::Empty)
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load(&dir.path().join("absent.parquet")),
            Err(StoreError::Io { .. })
        ));
    }

    #[test]
    fn batch_has_one_row_per_point() {
        let ds = dataset();
        let batch = to_record_batch(&ds).unwrap();
        assert_eq!(batch.num_rows(), ds.len() * ds.axis().len());
        assert_eq!(batch.schema().metadata()[META_AXIS], "frequency");
        let instruments: Vec<String> =
            serde_json::from_str(&batch.schema().metadata()[META_INSTRUMENTS]).unwrap();
        assert_eq!(instruments, ds.instruments());
        let conditions: Vec<u32> =
            serde_json::from_str(&batch.schema().metadata()[META_CONDITIONS]).unwrap();
        assert_eq!(conditions, ds.conditions());
    }

    #[test]
    fn metadata_encoding_errors_are_store_errors() {
        let err: StoreError = serde_json::from_str::<Vec<u32>>("[1,").unwrap_err().into();
        assert!(matches!(err, StoreError::Metadata(_)));
        assert!(err.to_string().starts_with("invalid dataset metadata"));
    }
}
