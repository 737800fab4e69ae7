//! Diagnostic output writers: scalar JSON lines, global field dumps,
//! tracked particles and binning histograms as bincode records.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::json;

use larmor_core::error::Error;

/// Append-only JSON-lines file of per-step scalar records.
pub struct ScalarWriter {
    out: BufWriter<File>,
}

impl ScalarWriter {
    pub fn create(dir: &Path) -> Result<Self, Error> {
        fs::create_dir_all(dir)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("scalars.jsonl"))?;
        Ok(Self {
            out: BufWriter::new(file),
        })
    }

    pub fn write(&mut self, step: usize, time: f64, values: &[(String, f64)]) -> Result<(), Error> {
        let mut record = serde_json::Map::new();
        record.insert("step".into(), json!(step));
        record.insert("time".into(), json!(time));
        for (name, value) in values {
            record.insert(name.clone(), json!(value));
        }
        serde_json::to_writer(&mut self.out, &record)
            .map_err(|e| Error::Serialize(e.to_string()))?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }
}

/// One global field snapshot, reassembled in Hilbert order upstream.
#[derive(Debug, Serialize, Deserialize)]
pub struct FieldDump {
    pub step: usize,
    pub time: f64,
    /// Global sample counts per axis (ghost-free)
    pub dims: [usize; 3],
    pub fields: Vec<(String, Vec<f64>)>,
}

impl FieldDump {
    pub fn save(&self, dir: &Path) -> Result<PathBuf, Error> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("fields-{:08}.bin", self.step));
        let data = bincode::serialize(self).map_err(|e| Error::Serialize(e.to_string()))?;
        fs::write(&path, data)?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        let data = fs::read(path)?;
        bincode::deserialize(&data).map_err(|e| Error::Serialize(e.to_string()))
    }
}

/// Sampled state of a tracked species.
#[derive(Debug, Serialize, Deserialize)]
pub struct TrackDump {
    pub step: usize,
    pub species: String,
    pub id: Vec<u64>,
    pub position: Vec<Vec<f64>>,
    pub momentum: Vec<Vec<f64>>,
    pub weight: Vec<f64>,
}

impl TrackDump {
    pub fn save(&self, dir: &Path) -> Result<PathBuf, Error> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("track-{}-{:08}.bin", self.species, self.step));
        let data = bincode::serialize(self).map_err(|e| Error::Serialize(e.to_string()))?;
        fs::write(&path, data)?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        let data = fs::read(path)?;
        bincode::deserialize(&data).map_err(|e| Error::Serialize(e.to_string()))
    }
}

/// Weight histogram over configured axes.
#[derive(Debug, Serialize, Deserialize)]
pub struct BinningDump {
    pub step: usize,
    pub index: usize,
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

impl BinningDump {
    pub fn save(&self, dir: &Path) -> Result<PathBuf, Error> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("binning{}-{:08}.bin", self.index, self.step));
        let data = bincode::serialize(self).map_err(|e| Error::Serialize(e.to_string()))?;
        fs::write(&path, data)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_lines_are_valid_json() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = ScalarWriter::create(dir.path()).unwrap();
        w.write(0, 0.0, &[("Utot".into(), 1.5)]).unwrap();
        w.write(10, 0.5, &[("Utot".into(), 1.4)]).unwrap();
        drop(w);
        let text = std::fs::read_to_string(dir.path().join("scalars.jsonl")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let rec: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(rec["step"], 10);
        assert_eq!(rec["Utot"], 1.4);
    }

    #[test]
    fn field_dump_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let dump = FieldDump {
            step: 42,
            time: 3.99,
            dims: [16, 1, 1],
            fields: vec![("Ey".into(), vec![0.25; 16])],
        };
        let path = dump.save(dir.path()).unwrap();
        let back = FieldDump::load(&path).unwrap();
        assert_eq!(back.dims, [16, 1, 1]);
        assert_eq!(back.fields[0].1[7], 0.25);
    }
}
