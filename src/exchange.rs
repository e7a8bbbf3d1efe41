use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
const TEMPLATE_ENTRY: &str = "template.json";
pub const BUNDLE_FORMAT_V1: &str = "attendance-template-v1";

/// A template as it travels between workspaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplatePayload {
    pub name: String,
    pub description: Option<String>,
    pub semester: Option<String>,
    pub section: Option<String>,
    pub batch: Option<String>,
    pub subjects: Vec<TemplateSubjectPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSubjectPayload {
    pub name: String,
    pub color: String,
    pub slots: Vec<TemplateSlotPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSlotPayload {
    pub day_of_week: String,
    pub period_start: i64,
    pub period_end: i64,
    pub merged: bool,
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub subject_count: usize,
}

fn payload_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn export_template_bundle(
    payload: &TemplatePayload,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }

    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let template_text =
        serde_json::to_string_pretty(payload).context("failed to serialize template payload")?;

    let exported_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let manifest = json!({
        "format": BUNDLE_FORMAT_V1,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": exported_at,
        "payloadSha256": payload_digest(template_text.as_bytes()),
    });

    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    zip.start_file(TEMPLATE_ENTRY, opts)
        .context("failed to start template entry")?;
    zip.write_all(template_text.as_bytes())
        .context("failed to write template entry")?;

    zip.finish().context("failed to finalize zip bundle")?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        subject_count: payload.subjects.len(),
    })
}

pub fn import_template_bundle(in_path: &Path) -> anyhow::Result<TemplatePayload> {
    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: serde_json::Value =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid JSON")?;

    let format = manifest
        .get("format")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if format != BUNDLE_FORMAT_V1 {
        return Err(anyhow!("unsupported bundle format: {}", format));
    }
    let expected_digest = manifest
        .get("payloadSha256")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("manifest missing payloadSha256"))?
        .to_string();

    let mut template_text = String::new();
    archive
        .by_name(TEMPLATE_ENTRY)
        .context("bundle missing template.json")?
        .read_to_string(&mut template_text)
        .context("failed to read template.json")?;

    let actual_digest = payload_digest(template_text.as_bytes());
    if actual_digest != expected_digest {
        return Err(anyhow!(
            "payload checksum mismatch: expected {}, got {}",
            expected_digest,
            actual_digest
        ));
    }

    serde_json::from_str(&template_text).context("template.json is invalid JSON")
}
