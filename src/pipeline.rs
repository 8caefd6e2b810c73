// src/pipeline.rs

use crate::attributes::AttributeList;
use crate::heuristics::{AttributeMap, CODE_KEY, Classifier};
use crate::nameplate_db::{NameplateStore, StoredNameplate};
use crate::table::Table;
use crate::vision::{self, ERROR_KEY, VisionModel};
use std::path::{Path, PathBuf};
use tracing::{Instrument, error, info, warn};

pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

pub const LONG_HEADERS: [&str; 4] = ["FILE", "POWTR_CODE", "ATTRIBUTE", "VALUE"];

/// What happened to one image.
#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    pub file_name: String,
    pub uid: String,
    pub attributes: AttributeMap,
    pub code: Option<String>,
    pub error: Option<String>,
    /// Taken from the store instead of calling the model again.
    pub reused: bool,
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.iter().any(|x| x.eq_ignore_ascii_case(e)))
}

/// Expand directories to the images directly inside them (sorted by name).
/// Files named explicitly are kept whatever their extension.
pub fn collect_images(inputs: &[PathBuf]) -> Result<Vec<PathBuf>, Box<dyn std::error::Error>> {
    let mut images = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut found: Vec<PathBuf> = std::fs::read_dir(input)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && has_image_extension(p))
                .collect();
            found.sort();
            info!(dir = %input.display(), images = found.len(), "Scanned directory");
            images.extend(found);
        } else if input.is_file() {
            images.push(input.clone());
        } else {
            return Err(format!("No such file or directory: {}", input.display()).into());
        }
    }
    Ok(images)
}

/// Derive the code for `map` and merge it in under `POWTR_CODE`. A code
/// already present in the map wins. Returns the code the map carries.
pub fn assign_code(classifier: &Classifier, map: &mut AttributeMap) -> String {
    let derived = classifier.code_string(map);
    map.ensure_code(&derived)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

async fn process_image<M: VisionModel + ?Sized>(
    model: &M,
    classifier: &Classifier,
    attributes: Option<&AttributeList>,
    instruction: &str,
    file_name: String,
    uid: String,
    image: &[u8],
) -> (ExtractionOutcome, Option<String>) {
    let mime = vision::sniff_mime(image);
    let raw = match model.describe(image, mime, instruction).await {
        Ok(raw) => raw,
        Err(e) => {
            error!(error = %e, model = model.name(), "Vision call failed");
            let outcome = ExtractionOutcome {
                file_name,
                uid,
                attributes: AttributeMap::new(),
                code: None,
                error: Some(e.to_string()),
                reused: false,
            };
            return (outcome, None);
        }
    };

    let mut attributes_map = vision::parse_response(&raw, attributes);
    let unparsable = attributes_map.len() == 1 && attributes_map.get(ERROR_KEY).is_some();
    let (code, error) = if unparsable {
        (None, Some("Unparsable model response".to_string()))
    } else {
        let code = assign_code(classifier, &mut attributes_map);
        info!(code = %code, attributes = attributes_map.len(), "Coded");
        (Some(code), None)
    };

    let outcome = ExtractionOutcome {
        file_name,
        uid,
        attributes: attributes_map,
        code,
        error,
        reused: false,
    };
    (outcome, Some(raw))
}

fn stored_outcome(plate: StoredNameplate) -> ExtractionOutcome {
    ExtractionOutcome {
        attributes: plate.attributes(),
        file_name: plate.file_name,
        uid: plate.uid,
        code: plate.code,
        error: plate.error,
        reused: true,
    }
}

/// Run every image through the model one after another, code it and keep
/// the result in the store. Images already stored without an error are
/// not sent again. A failed image is logged and recorded; the batch goes
/// on. Only store failures abort the run.
pub async fn run_extraction<M: VisionModel + ?Sized>(
    model: &M,
    store: &NameplateStore,
    classifier: &Classifier,
    attributes: Option<&AttributeList>,
    images: &[PathBuf],
) -> Result<Vec<ExtractionOutcome>, Box<dyn std::error::Error>> {
    let instruction = attributes.map(AttributeList::build_prompt).unwrap_or_else(|| {
        AttributeList::default().build_prompt()
    });
    info!(images = images.len(), model = model.name(), "Starting extraction");

    let mut outcomes = Vec::with_capacity(images.len());
    for path in images {
        let file_name = file_name_of(path);
        let span = tracing::info_span!("image", file = %file_name);

        let image = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                span.in_scope(|| error!(error = %e, "Failed to read image"));
                outcomes.push(ExtractionOutcome {
                    file_name,
                    uid: String::new(),
                    attributes: AttributeMap::new(),
                    code: None,
                    error: Some(e.to_string()),
                    reused: false,
                });
                continue;
            }
        };
        let uid = NameplateStore::generate_uid(&image);

        if let Some(plate) = store.get_by_uid(&uid)?.filter(|p| p.error.is_none()) {
            span.in_scope(|| info!(uid = %uid, code = ?plate.code, "Already processed"));
            outcomes.push(stored_outcome(plate));
            continue;
        }

        let (outcome, raw) = process_image(
            model,
            classifier,
            attributes,
            &instruction,
            file_name,
            uid,
            &image,
        )
        .instrument(span)
        .await;

        store.upsert(&StoredNameplate {
            uid: outcome.uid.clone(),
            file_name: outcome.file_name.clone(),
            raw_response: raw,
            attributes_json: (!outcome.attributes.is_empty())
                .then(|| outcome.attributes.to_json().to_string()),
            code: outcome.code.clone(),
            error: outcome.error.clone(),
        })?;
        outcomes.push(outcome);
    }

    let failed = outcomes.iter().filter(|o| o.error.is_some()).count();
    let reused = outcomes.iter().filter(|o| o.reused).count();
    if failed > 0 {
        warn!(failed, "Some images could not be coded");
    }
    info!(
        total = outcomes.len(),
        coded = outcomes.len() - failed,
        reused,
        failed,
        "Extraction complete"
    );
    Ok(outcomes)
}

/// One row per attribute: `FILE, POWTR_CODE, ATTRIBUTE, VALUE`. A failed
/// image gets a single `error` row.
pub fn long_table(outcomes: &[ExtractionOutcome]) -> Table {
    let mut table = Table::new(LONG_HEADERS.iter().map(|h| h.to_string()).collect());
    for outcome in outcomes {
        let code = outcome.code.clone().unwrap_or_default();
        if let Some(err) = &outcome.error {
            table.push_row(vec![
                outcome.file_name.clone(),
                code,
                ERROR_KEY.to_string(),
                err.clone(),
            ]);
            continue;
        }
        for (key, value) in outcome.attributes.iter().filter(|(k, _)| *k != CODE_KEY) {
            table.push_row(vec![
                outcome.file_name.clone(),
                code.clone(),
                key.to_string(),
                value.to_string(),
            ]);
        }
    }
    table
}
