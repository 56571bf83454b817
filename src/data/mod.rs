/// Data layer: calibration, assembly, the tagged store, and persistence.
///
/// Architecture:
/// ```text
///  raw/phase_{c}/{instrument}/{kind}/*.json
///        │
///        ▼
///   ┌──────────┐
///   │  source   │  enumerate one partition → RecordEntry
///   └──────────┘
///        │
///        ▼
///   ┌───────────┐
///   │ calibrate  │  validate + scale → Calibrated (axis, response)
///   └───────────┘
///        │
///        ▼
///   ┌──────────┐
///   │ assemble  │  tag, check shared axis → Dataset
///   └──────────┘
///        │
///        ├──────────────┐
///        ▼              ▼
///   ┌──────────┐   ┌──────────┐
///   │  filter   │   │  store    │  parquet save / load / load_range
///   └──────────┘   └──────────┘
/// ```

pub mod assemble;
pub mod calibrate;
pub mod filter;
pub mod model;
pub mod source;
pub mod store;
