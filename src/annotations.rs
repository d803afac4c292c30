//! Read-only lookup into the external annotation document: `images[]`
//! entries name files, `annotations[]` entries reference an image by id.
//! This core never mutates the document.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageEntry {
    pub id: i64,
    pub file_name: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    pub id: i64,
    pub image_id: i64,
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(default)]
    pub bbox: Option<Vec<f64>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationDoc {
    #[serde(default)]
    pub images: Vec<ImageEntry>,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
}

/// Annotations for one filename: the entries whose `image_id` matches the
/// document's image record for that file. Read/parse failures propagate —
/// annotation context is required when a document is configured. A known
/// file with no annotations yields an empty vec.
pub fn for_file(doc_path: &Path, file_name: &str) -> Result<Vec<Annotation>> {
    let raw = fs::read_to_string(doc_path)
        .with_context(|| format!("read annotation document {}", doc_path.display()))?;
    let doc: AnnotationDoc = serde_json::from_str(&raw)
        .with_context(|| format!("parse annotation document {}", doc_path.display()))?;

    let Some(image) = doc.images.iter().find(|i| i.file_name == file_name) else {
        return Ok(Vec::new());
    };
    let id = image.id;
    Ok(doc
        .annotations
        .into_iter()
        .filter(|a| a.image_id == id)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "images": [
            {"id": 1, "file_name": "a.png", "width": 640},
            {"id": 2, "file_name": "b.dcm"}
        ],
        "annotations": [
            {"id": 10, "image_id": 1, "category_id": 3, "bbox": [1.0, 2.0, 30.0, 40.0]},
            {"id": 11, "image_id": 2, "score": 0.9},
            {"id": 12, "image_id": 1}
        ]
    }"#;

    fn doc_file(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("annotations.json");
        std::fs::write(&path, DOC).unwrap();
        path
    }

    #[test]
    fn returns_annotations_joined_by_image_id() {
        let dir = tempfile::tempdir().unwrap();
        let doc = doc_file(dir.path());

        let anns = for_file(&doc, "a.png").unwrap();
        assert_eq!(anns.len(), 2);
        assert!(anns.iter().all(|a| a.image_id == 1));
        assert_eq!(anns[0].bbox.as_deref(), Some(&[1.0, 2.0, 30.0, 40.0][..]));
    }

    #[test]
    fn unknown_fields_survive_the_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let doc = doc_file(dir.path());

        let anns = for_file(&doc, "b.dcm").unwrap();
        assert_eq!(anns.len(), 1);
        assert_eq!(
            anns[0].extra.get("score").and_then(|v| v.as_f64()),
            Some(0.9)
        );
    }

    #[test]
    fn unlisted_file_yields_empty() {
        let dir = tempfile::tempdir().unwrap();
        let doc = doc_file(dir.path());
        assert!(for_file(&doc, "ghost.png").unwrap().is_empty());
    }

    #[test]
    fn missing_document_propagates() {
        assert!(for_file(Path::new("/nonexistent/ann.json"), "a.png").is_err());
    }

    #[test]
    fn unparsable_document_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("annotations.json");
        std::fs::write(&path, b"{broken").unwrap();
        assert!(for_file(&path, "a.png").is_err());
    }
}
