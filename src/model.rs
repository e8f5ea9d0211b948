//! Detection model metadata.
//!
//! The model config JSON is produced by the model export tooling. Only the
//! label mapping is interpreted here; anchors and thresholds are carried
//! through for the device pipeline.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{LabelError, ModelConfigError};

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    #[serde(default)]
    nn_config: NnConfigFile,
    #[serde(default)]
    mappings: MappingsFile,
}

#[derive(Debug, Deserialize, Default)]
struct NnConfigFile {
    #[serde(rename = "NN_specific_metadata", default)]
    nn_specific_metadata: NnMetadataFile,
}

#[derive(Debug, Deserialize, Default)]
struct NnMetadataFile {
    classes: Option<usize>,
    coordinates: Option<usize>,
    #[serde(default)]
    anchors: Vec<f32>,
    #[serde(default)]
    anchor_masks: BTreeMap<String, Vec<u32>>,
    iou_threshold: Option<f32>,
    confidence_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct MappingsFile {
    #[serde(default)]
    labels: Vec<String>,
}

/// Parsed and validated model metadata.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub classes: usize,
    pub coordinates: usize,
    pub anchors: Vec<f32>,
    pub anchor_masks: BTreeMap<String, Vec<u32>>,
    pub iou_threshold: f32,
    pub confidence_threshold: f32,
    labels: LabelMap,
}

impl ModelConfig {
    pub fn load(path: &Path) -> Result<Self, ModelConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ModelConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ModelConfigError> {
        let file: ModelConfigFile = serde_json::from_str(raw)?;
        let meta = file.nn_config.nn_specific_metadata;
        let labels = LabelMap::new(file.mappings.labels)?;
        let classes = meta.classes.unwrap_or(labels.len());
        if classes != labels.len() {
            return Err(ModelConfigError::LabelCount {
                classes,
                labels: labels.len(),
            });
        }
        Ok(Self {
            classes,
            coordinates: meta.coordinates.unwrap_or(4),
            anchors: meta.anchors,
            anchor_masks: meta.anchor_masks,
            iou_threshold: meta.iou_threshold.unwrap_or(0.5),
            confidence_threshold: meta.confidence_threshold.unwrap_or(0.5),
            labels,
        })
    }

    pub fn label_map(&self) -> &LabelMap {
        &self.labels
    }
}

/// Label index -> human readable class name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap {
    labels: Vec<String>,
}

impl LabelMap {
    pub fn new(labels: Vec<String>) -> Result<Self, ModelConfigError> {
        if labels.is_empty() {
            return Err(ModelConfigError::NoLabels);
        }
        Ok(Self { labels })
    }

    pub fn resolve(&self, index: u32) -> Result<&str, LabelError> {
        self.labels
            .get(index as usize)
            .map(String::as_str)
            .ok_or(LabelError::Unknown {
                index,
                count: self.labels.len(),
            })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YOLO_CONFIG: &str = r#"{
        "model": {"xml": "yolov5n_320.xml", "bin": "yolov5n_320.bin"},
        "nn_config": {
            "output_format": "detection",
            "NN_family": "YOLO",
            "input_size": "320x320",
            "NN_specific_metadata": {
                "classes": 1,
                "coordinates": 4,
                "anchors": [10.0, 13.0, 16.0, 30.0, 33.0, 23.0],
                "anchor_masks": {"side40": [0, 1, 2], "side20": [3, 4, 5]},
                "iou_threshold": 0.5,
                "confidence_threshold": 0.5
            }
        },
        "mappings": {"labels": ["insect"]}
    }"#;

    #[test]
    fn parses_yolo_metadata() {
        let cfg = ModelConfig::from_json(YOLO_CONFIG).unwrap();
        assert_eq!(cfg.classes, 1);
        assert_eq!(cfg.coordinates, 4);
        assert_eq!(cfg.anchors.len(), 6);
        assert_eq!(cfg.anchor_masks["side20"], vec![3, 4, 5]);
        assert_eq!(cfg.label_map().resolve(0).unwrap(), "insect");
    }

    #[test]
    fn rejects_class_count_mismatch() {
        let raw = r#"{
            "nn_config": {"NN_specific_metadata": {"classes": 3}},
            "mappings": {"labels": ["insect"]}
        }"#;
        let err = ModelConfig::from_json(raw).unwrap_err();
        assert!(matches!(
            err,
            ModelConfigError::LabelCount {
                classes: 3,
                labels: 1
            }
        ));
    }

    #[test]
    fn rejects_missing_labels() {
        let err = ModelConfig::from_json("{}").unwrap_err();
        assert!(matches!(err, ModelConfigError::NoLabels));
    }

    #[test]
    fn unknown_label_index_fails() {
        let labels = LabelMap::new(vec!["insect".into(), "spider".into()]).unwrap();
        assert_eq!(labels.resolve(1).unwrap(), "spider");
        assert_eq!(
            labels.resolve(2),
            Err(LabelError::Unknown { index: 2, count: 2 })
        );
    }
}
