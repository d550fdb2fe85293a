use crate::api::{AnalysisSummary, DetectedVehicleRecord};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};
use tracing::{debug, info};

/// Persistence for analysis results and plate billing status.
pub trait RecordStore {
    /// Drops every record of `video_id` and stores `records` in their place.
    fn replace_video_records(
        &mut self,
        video_id: &str,
        summary: AnalysisSummary,
        records: Vec<DetectedVehicleRecord>,
    ) -> anyhow::Result<()>;

    fn records_for_video(&self, video_id: &str) -> anyhow::Result<Vec<DetectedVehicleRecord>>;

    fn summary_for_video(&self, video_id: &str) -> anyhow::Result<Option<AnalysisSummary>>;

    fn find_by_plate(&self, plate_text: &str) -> anyhow::Result<Vec<DetectedVehicleRecord>>;

    /// Manual correction. `Ok(false)` when no such record exists.
    fn update_plate_text(
        &mut self,
        video_id: &str,
        vehicle_index: usize,
        plate_text: Option<String>,
    ) -> anyhow::Result<bool>;

    fn set_paid(&mut self, plate_text: &str, paid: bool) -> anyhow::Result<()>;

    /// Distinct recognized plates not marked as paid.
    fn unpaid_plates(&self) -> anyhow::Result<Vec<String>>;
}

/// Whitespace insensitive form plates are compared and billed by.
pub fn normalize_plate(plate_text: &str) -> String {
    plate_text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct VideoEntry {
    summary: AnalysisSummary,
    records: Vec<DetectedVehicleRecord>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreDocument {
    videos: BTreeMap<String, VideoEntry>,
    paid_plates: BTreeSet<String>,
}

impl StoreDocument {
    fn replace(&mut self, video_id: &str, summary: AnalysisSummary, records: Vec<DetectedVehicleRecord>) {
        let previous = self
            .videos
            .insert(video_id.to_string(), VideoEntry { summary, records })
            .map_or(0, |entry| entry.records.len());
        debug!(%video_id, previous, "Replaced video records");
    }

    fn records(&self, video_id: &str) -> Vec<DetectedVehicleRecord> {
        self.videos
            .get(video_id)
            .map(|entry| entry.records.clone())
            .unwrap_or_default()
    }

    fn find(&self, plate_text: &str) -> Vec<DetectedVehicleRecord> {
        let wanted = normalize_plate(plate_text);
        self.videos
            .values()
            .flat_map(|entry| &entry.records)
            .filter(|r| r.plate_text.as_deref().map(normalize_plate).as_deref() == Some(wanted.as_str()))
            .cloned()
            .collect()
    }

    fn update_plate(&mut self, video_id: &str, vehicle_index: usize, plate_text: Option<String>) -> bool {
        let Some(record) = self
            .videos
            .get_mut(video_id)
            .and_then(|entry| entry.records.iter_mut().find(|r| r.vehicle_index == vehicle_index))
        else {
            return false;
        };
        record.plate_text = plate_text.map(|text| normalize_plate(&text)).filter(|t| !t.is_empty());
        true
    }

    fn set_paid(&mut self, plate_text: &str, paid: bool) {
        let plate = normalize_plate(plate_text);
        if paid {
            self.paid_plates.insert(plate);
        } else {
            self.paid_plates.remove(&plate);
        }
    }

    fn unpaid(&self) -> Vec<String> {
        self.videos
            .values()
            .flat_map(|entry| &entry.records)
            .filter_map(|r| r.plate_text.as_deref().map(normalize_plate))
            .filter(|plate| !self.paid_plates.contains(plate))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    document: StoreDocument,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryRecordStore {
    fn replace_video_records(
        &mut self,
        video_id: &str,
        summary: AnalysisSummary,
        records: Vec<DetectedVehicleRecord>,
    ) -> anyhow::Result<()> {
        self.document.replace(video_id, summary, records);
        Ok(())
    }

    fn records_for_video(&self, video_id: &str) -> anyhow::Result<Vec<DetectedVehicleRecord>> {
        Ok(self.document.records(video_id))
    }

    fn summary_for_video(&self, video_id: &str) -> anyhow::Result<Option<AnalysisSummary>> {
        Ok(self.document.videos.get(video_id).map(|entry| entry.summary))
    }

    fn find_by_plate(&self, plate_text: &str) -> anyhow::Result<Vec<DetectedVehicleRecord>> {
        Ok(self.document.find(plate_text))
    }

    fn update_plate_text(
        &mut self,
        video_id: &str,
        vehicle_index: usize,
        plate_text: Option<String>,
    ) -> anyhow::Result<bool> {
        Ok(self.document.update_plate(video_id, vehicle_index, plate_text))
    }

    fn set_paid(&mut self, plate_text: &str, paid: bool) -> anyhow::Result<()> {
        self.document.set_paid(plate_text, paid);
        Ok(())
    }

    fn unpaid_plates(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.document.unpaid())
    }
}

/// Whole store in one JSON file, rewritten through a temporary file and a rename on every change.
#[derive(Debug)]
pub struct JsonRecordStore {
    path: PathBuf,
    document: StoreDocument,
}

impl JsonRecordStore {
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let document = if path.exists() {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read record store {}", path.display()))?;
            serde_json::from_str(&json)
                .with_context(|| format!("Record store {} is corrupt", path.display()))?
        } else {
            StoreDocument::default()
        };
        info!(
            path = %path.display(),
            videos = document.videos.len(),
            "Opened record store"
        );
        Ok(Self { path, document })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes `document` and makes it the current state only once it is on disk.
    fn commit(&mut self, document: StoreDocument) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&document)?;
        let temp = self.path.with_extension("json.tmp");
        std::fs::write(&temp, json)
            .with_context(|| format!("Failed to write {}", temp.display()))?;
        std::fs::rename(&temp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        self.document = document;
        Ok(())
    }
}

impl RecordStore for JsonRecordStore {
    fn replace_video_records(
        &mut self,
        video_id: &str,
        summary: AnalysisSummary,
        records: Vec<DetectedVehicleRecord>,
    ) -> anyhow::Result<()> {
        let mut document = self.document.clone();
        document.replace(video_id, summary, records);
        self.commit(document)
    }

    fn records_for_video(&self, video_id: &str) -> anyhow::Result<Vec<DetectedVehicleRecord>> {
        Ok(self.document.records(video_id))
    }

    fn summary_for_video(&self, video_id: &str) -> anyhow::Result<Option<AnalysisSummary>> {
        Ok(self.document.videos.get(video_id).map(|entry| entry.summary))
    }

    fn find_by_plate(&self, plate_text: &str) -> anyhow::Result<Vec<DetectedVehicleRecord>> {
        Ok(self.document.find(plate_text))
    }

    fn update_plate_text(
        &mut self,
        video_id: &str,
        vehicle_index: usize,
        plate_text: Option<String>,
    ) -> anyhow::Result<bool> {
        let mut document = self.document.clone();
        if !document.update_plate(video_id, vehicle_index, plate_text) {
            return Ok(false);
        }
        self.commit(document)?;
        Ok(true)
    }

    fn set_paid(&mut self, plate_text: &str, paid: bool) -> anyhow::Result<()> {
        let mut document = self.document.clone();
        document.set_paid(plate_text, paid);
        self.commit(document)
    }

    fn unpaid_plates(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.document.unpaid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(video_id: &str, vehicle_index: usize, plate_text: Option<&str>) -> DetectedVehicleRecord {
        DetectedVehicleRecord {
            video_id: video_id.into(),
            vehicle_index,
            crop_image: format!("car_{video_id}_v{vehicle_index}.jpg"),
            plate_image: plate_text.map(|_| format!("plate_{video_id}_v{vehicle_index}.jpg")),
            plate_text: plate_text.map(str::to_string),
            car_color: "White".into(),
            driver_face_image: None,
            vehicle_confidence: 0.8,
            plate_confidence: plate_text.map(|_| 0.5),
            face_confidence: None,
            timestamp: vehicle_index as f64,
            created_at: Utc::now(),
        }
    }

    fn store_with_two_videos(store: &mut dyn RecordStore) {
        let first = vec![record("1", 0, Some("أ ب ج 1234")), record("1", 1, None)];
        store
            .replace_video_records("1", AnalysisSummary::from_records(&first), first)
            .unwrap();
        let second = vec![record("2", 0, Some("5678"))];
        store
            .replace_video_records("2", AnalysisSummary::from_records(&second), second)
            .unwrap();
    }

    #[test]
    fn replacement_is_total() {
        let mut store = MemoryRecordStore::new();
        store_with_two_videos(&mut store);
        assert_eq!(store.records_for_video("1").unwrap().len(), 2);

        let rerun = vec![record("1", 0, Some("أ ب ج 1234"))];
        store
            .replace_video_records("1", AnalysisSummary::from_records(&rerun), rerun)
            .unwrap();
        assert_eq!(store.records_for_video("1").unwrap().len(), 1);
        assert_eq!(store.records_for_video("2").unwrap().len(), 1);
        assert_eq!(store.summary_for_video("1").unwrap().unwrap().vehicles_detected, 1);
        assert!(store.records_for_video("3").unwrap().is_empty());
    }

    #[test]
    fn lookup_ignores_spacing() {
        let mut store = MemoryRecordStore::new();
        store_with_two_videos(&mut store);
        let found = store.find_by_plate("أ  ب ج   1234").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].video_id, "1");
        assert!(store.find_by_plate("0000").unwrap().is_empty());
    }

    #[test]
    fn manual_correction() {
        let mut store = MemoryRecordStore::new();
        store_with_two_videos(&mut store);
        assert!(store.update_plate_text("1", 1, Some(" 9999 ".into())).unwrap());
        assert_eq!(store.find_by_plate("9999").unwrap().len(), 1);
        assert!(!store.update_plate_text("1", 7, None).unwrap());
        assert!(store.update_plate_text("1", 1, None).unwrap());
        assert!(store.find_by_plate("9999").unwrap().is_empty());
    }

    #[test]
    fn billing_status() {
        let mut store = MemoryRecordStore::new();
        store_with_two_videos(&mut store);
        assert_eq!(store.unpaid_plates().unwrap(), vec!["5678", "أ ب ج 1234"]);
        store.set_paid("5678", true).unwrap();
        assert_eq!(store.unpaid_plates().unwrap(), vec!["أ ب ج 1234"]);
        store.set_paid("5678", false).unwrap();
        assert_eq!(store.unpaid_plates().unwrap().len(), 2);
    }

    #[test]
    fn json_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db").join("records.json");
        {
            let mut store = JsonRecordStore::open(&path).unwrap();
            store_with_two_videos(&mut store);
            store.set_paid("أ ب ج 1234", true).unwrap();
        }
        let store = JsonRecordStore::open(&path).unwrap();
        assert_eq!(store.records_for_video("1").unwrap().len(), 2);
        assert_eq!(store.summary_for_video("2").unwrap().unwrap().plates_detected, 1);
        assert_eq!(store.unpaid_plates().unwrap(), vec!["5678"]);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn failed_write_keeps_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");
        let mut store = JsonRecordStore::open(&path).unwrap();
        store_with_two_videos(&mut store);

        // A directory at the temporary path makes every write fail.
        std::fs::create_dir(path.with_extension("json.tmp")).unwrap();

        assert!(store.set_paid("5678", true).is_err());
        assert_eq!(store.unpaid_plates().unwrap(), vec!["5678", "أ ب ج 1234"]);

        let rerun = vec![record("1", 0, None)];
        assert!(
            store
                .replace_video_records("1", AnalysisSummary::from_records(&rerun), rerun)
                .is_err()
        );
        assert_eq!(store.records_for_video("1").unwrap().len(), 2);
        assert_eq!(store.summary_for_video("1").unwrap().unwrap().vehicles_detected, 2);

        assert!(store.update_plate_text("2", 0, Some("9999".into())).is_err());
        assert_eq!(store.find_by_plate("5678").unwrap().len(), 1);
        assert!(store.find_by_plate("9999").unwrap().is_empty());
        assert!(!store.update_plate_text("2", 5, None).unwrap());

        let reopened = JsonRecordStore::open(&path).unwrap();
        assert_eq!(reopened.unpaid_plates().unwrap(), store.unpaid_plates().unwrap());
        assert_eq!(reopened.records_for_video("1").unwrap().len(), 2);
    }

    #[test]
    fn corrupt_json_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = JsonRecordStore::open(&path).unwrap_err();
        assert!(err.to_string().contains("corrupt"));
    }
}
