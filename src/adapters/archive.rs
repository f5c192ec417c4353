use crate::adapters::raster::{decode_geotiff, first_band};
use crate::domain::model::BBox;
use crate::utils::error::{EtlError, Result};
use ndarray::{Array2, Array3};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use zip::write::{FileOptions, ZipWriter};
use zip::ZipArchive;

const IMAGERY_DIR: &str = "imagery";
const METADATA_DIR: &str = "metadata";
const CLEANABLE_EXTENSIONS: [&str; 3] = ["npy", "tif", "png"];

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort();
    Ok(entries)
}

fn subdirectories(dir: &Path) -> Result<Vec<PathBuf>> {
    Ok(sorted_entries(dir)?
        .into_iter()
        .filter(|p| p.is_dir())
        .collect())
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    for path in sorted_entries(dir)? {
        if path.is_dir() {
            collect_files(&path, files)?;
        } else {
            files.push(path);
        }
    }
    Ok(())
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "run".to_string())
}

/// Most recently modified run directory directly under `outputs_root`.
pub fn latest_output_dir(outputs_root: &Path) -> Result<PathBuf> {
    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    for dir in subdirectories(outputs_root)? {
        let modified = fs::metadata(&dir)?.modified()?;
        if newest.as_ref().map_or(true, |(t, _)| modified > *t) {
            newest = Some((modified, dir));
        }
    }
    newest.map(|(_, dir)| dir).ok_or_else(|| EtlError::ValidationError {
        message: format!("no run directories under {}", outputs_root.display()),
    })
}

/// Zips a run directory into `<archive_dir>/<label>.zip`. Entry names are
/// relative to the run directory.
pub fn archive_job_outputs(
    from_dir: Option<&Path>,
    outputs_root: &Path,
    label: Option<&str>,
    archive_dir: &Path,
) -> Result<PathBuf> {
    let run_dir = match from_dir {
        Some(dir) => dir.to_path_buf(),
        None => latest_output_dir(outputs_root)?,
    };
    if !run_dir.is_dir() {
        return Err(EtlError::ValidationError {
            message: format!("{} is not a directory", run_dir.display()),
        });
    }

    let label = match label {
        Some(label) => label.trim_end_matches(".zip").to_string(),
        None => format!(
            "{}_{}",
            dir_name(&run_dir),
            chrono::Utc::now().format("%Y%m%dT%H%M%SZ")
        ),
    };
    fs::create_dir_all(archive_dir)?;
    let zip_path = archive_dir.join(format!("{}.zip", label));

    let mut files = Vec::new();
    collect_files(&run_dir, &mut files)?;

    let mut zip = ZipWriter::new(File::create(&zip_path)?);
    for file in &files {
        let relative = file.strip_prefix(&run_dir).map_err(|e| EtlError::ProcessingError {
            message: format!("{} escapes {}: {}", file.display(), run_dir.display(), e),
        })?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let mut data = Vec::new();
        File::open(file)?.read_to_end(&mut data)?;
        zip.start_file::<_, ()>(name, FileOptions::default())?;
        zip.write_all(&data)?;
    }
    zip.finish()?;

    tracing::info!(
        "📦 Archived {} files from {} to {}",
        files.len(),
        run_dir.display(),
        zip_path.display()
    );
    Ok(zip_path)
}

pub fn extract_archive(zip_path: &Path, target: &Path) -> Result<()> {
    let mut archive = ZipArchive::new(File::open(zip_path)?)?;
    fs::create_dir_all(target)?;
    archive.extract(target)?;
    Ok(())
}

/// Per-run provenance digest read from the metadata directory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataSummary {
    pub strategies: Vec<String>,
    pub orbit_dates: Vec<String>,
    pub products: Vec<(String, Option<f64>)>,
    pub average_cloud_coverage: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub label: String,
    pub ndvi: Array2<f32>,
    pub true_color: Option<Array3<f32>>,
    pub bbox: Option<BBox>,
    pub metadata_summary: MetadataSummary,
}

#[derive(Debug, Clone)]
pub struct RunView {
    pub frames: Vec<Frame>,
    pub is_timeseries: bool,
}

fn read_json(path: &Path) -> Result<Value> {
    Ok(serde_json::from_slice(&fs::read(path)?)?)
}

fn summarize_metadata(metadata_dir: &Path) -> Result<MetadataSummary> {
    if !metadata_dir.is_dir() {
        return Ok(MetadataSummary::default());
    }

    let mut strategies = BTreeSet::new();
    let mut dates = BTreeSet::new();
    let mut clouds = Vec::new();
    for path in sorted_entries(metadata_dir)? {
        let is_selection = path
            .file_name()
            .is_some_and(|n| n.to_string_lossy().ends_with("_selected_orbit.json"));
        if !is_selection {
            continue;
        }
        let selected = read_json(&path)?;
        if let Some(s) = selected.get("strategy").and_then(Value::as_str) {
            strategies.insert(s.to_string());
        }
        if let Some(d) = selected.get("orbit_date").and_then(Value::as_str) {
            dates.insert(d.to_string());
        }
        if let Some(c) = selected.get("cloud_coverage").and_then(Value::as_f64) {
            clouds.push(c);
        }
    }

    let mut products = Vec::new();
    let product_file = metadata_dir.join("product_metadata.json");
    if product_file.is_file() {
        if let Value::Object(map) = read_json(&product_file)? {
            for (id, feature) in map {
                let cloud = feature
                    .pointer("/properties/eo:cloud_cover")
                    .and_then(Value::as_f64);
                products.push((id, cloud));
            }
        }
    }

    let average_cloud_coverage =
        (!clouds.is_empty()).then(|| clouds.iter().sum::<f64>() / clouds.len() as f64);

    Ok(MetadataSummary {
        strategies: strategies.into_iter().collect(),
        orbit_dates: dates.into_iter().collect(),
        products,
        average_cloud_coverage,
    })
}

fn load_frame(dir: &Path) -> Result<Frame> {
    let imagery = dir.join(IMAGERY_DIR);
    let ndvi_raster = decode_geotiff(&fs::read(imagery.join("ndvi.tif"))?)?;
    let true_color_path = imagery.join("true_color.tif");
    let true_color = if true_color_path.is_file() {
        Some(decode_geotiff(&fs::read(true_color_path)?)?.data)
    } else {
        None
    };

    Ok(Frame {
        label: dir_name(dir),
        ndvi: first_band(&ndvi_raster),
        true_color,
        bbox: ndvi_raster.bbox,
        metadata_summary: summarize_metadata(&dir.join(METADATA_DIR))?,
    })
}

/// Single frame when `path/imagery` exists, otherwise one frame per
/// sub-directory that has its own `imagery/`.
pub fn load_run(path: &Path) -> Result<RunView> {
    if path.join(IMAGERY_DIR).is_dir() {
        return Ok(RunView {
            frames: vec![load_frame(path)?],
            is_timeseries: false,
        });
    }

    let frames = subdirectories(path)?
        .into_iter()
        .filter(|dir| dir.join(IMAGERY_DIR).is_dir())
        .map(|dir| load_frame(&dir))
        .collect::<Result<Vec<_>>>()?;
    if frames.is_empty() {
        return Err(EtlError::ValidationError {
            message: format!("{} holds no imagery", path.display()),
        });
    }
    Ok(RunView {
        frames,
        is_timeseries: true,
    })
}

fn resolve_archive(archive: &str, archive_dir: &Path) -> PathBuf {
    let direct = PathBuf::from(archive);
    if direct.exists() {
        return direct;
    }
    let named = archive_dir.join(archive);
    if named.exists() || archive.ends_with(".zip") {
        named
    } else {
        archive_dir.join(format!("{}.zip", archive))
    }
}

/// Loads a run from an archive (zip file or directory) or, without one, the
/// latest run under `outputs_root`.
pub fn view_run(outputs_root: &Path, archive: Option<&str>, archive_dir: &Path) -> Result<RunView> {
    let Some(archive) = archive else {
        let dir = latest_output_dir(outputs_root)?;
        tracing::info!("🔎 Viewing {}", dir.display());
        return load_run(&dir);
    };

    let path = resolve_archive(archive, archive_dir);
    if path.is_dir() {
        tracing::info!("🔎 Viewing {}", path.display());
        return load_run(&path);
    }
    if !path.is_file() {
        return Err(EtlError::ValidationError {
            message: format!("archive {} not found", path.display()),
        });
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());
    // A fresh directory per view; dropping it removes the extracted copy.
    let scratch = tempfile::Builder::new()
        .prefix(&format!("{}.", stem))
        .tempdir_in(archive_dir)?;
    let target = scratch.path().join(&stem);
    extract_archive(&path, &target)?;
    tracing::info!("🔎 Viewing {} (extracted to {})", path.display(), target.display());
    load_run(&target)
}

pub fn format_metadata_summary(summary: &MetadataSummary) -> String {
    let mut lines = vec![
        format!("Strategies: {}", summary.strategies.join(", ")),
        format!("Orbit dates: {}", summary.orbit_dates.join(", ")),
    ];
    if summary.products.is_empty() {
        lines.push("Products: none recorded".to_string());
    } else {
        lines.push("Products:".to_string());
        for (id, cloud) in &summary.products {
            match cloud {
                Some(c) => lines.push(format!("  - {} (cloud {:.2}%)", id, c)),
                None => lines.push(format!("  - {}", id)),
            }
        }
    }
    match summary.average_cloud_coverage {
        Some(c) => lines.push(format!("Average cloud coverage: {:.2}%", c)),
        None => lines.push("Average cloud coverage: n/a".to_string()),
    }
    lines.join("\n")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanReport {
    pub dirs_removed: usize,
    pub files_removed: usize,
}

/// Removes every directory and every raster artifact directly under `base`.
pub fn clean_all_outputs(base: &Path) -> Result<CleanReport> {
    let mut report = CleanReport::default();
    if !base.exists() {
        return Ok(report);
    }

    for path in sorted_entries(base)? {
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
            report.dirs_removed += 1;
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| CLEANABLE_EXTENSIONS.contains(&e))
        {
            fs::remove_file(&path)?;
            report.files_removed += 1;
        }
    }

    tracing::info!(
        "🧹 Removed {} directories and {} files from {}",
        report.dirs_removed,
        report.files_removed,
        base.display()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::raster::{encode_geotiff_gray, encode_geotiff_rgb};
    use ndarray::array;
    use serde_json::json;
    use tempfile::TempDir;

    fn same_pixels<'a>(
        a: impl IntoIterator<Item = &'a f32>,
        b: impl IntoIterator<Item = &'a f32>,
    ) -> bool {
        a.into_iter()
            .zip(b)
            .all(|(x, y)| x == y || (x.is_nan() && y.is_nan()))
    }

    fn write_run(dir: &Path, ndvi: &Array2<f32>, date: &str) {
        let bbox = BBox::new(172.5, -43.9, 172.6, -43.8);
        let (h, w) = ndvi.dim();
        let rgb = Array3::from_shape_fn((h, w, 3), |(r, c, b)| (r + c + b) as f32 / 10.0);

        fs::create_dir_all(dir.join("imagery")).unwrap();
        fs::create_dir_all(dir.join("metadata")).unwrap();
        fs::write(
            dir.join("imagery/ndvi.tif"),
            encode_geotiff_gray(ndvi, &bbox).unwrap(),
        )
        .unwrap();
        fs::write(
            dir.join("imagery/true_color.tif"),
            encode_geotiff_rgb(&rgb, &bbox).unwrap(),
        )
        .unwrap();
        fs::write(
            dir.join("metadata/region_tile0_selected_orbit.json"),
            serde_json::to_vec(&json!({
                "strategy": "least_cloud",
                "orbit_date": date,
                "product_ids": ["S2A_X"],
                "cloud_coverage": 12.5
            }))
            .unwrap(),
        )
        .unwrap();
        fs::write(
            dir.join("metadata/product_metadata.json"),
            serde_json::to_vec(&json!({"S2A_X": {"properties": {"eo:cloud_cover": 11.0}}})).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn test_archive_then_view_round_trips_pixels() {
        let temp = TempDir::new().unwrap();
        let outputs = temp.path().join("outputs");
        let archive_dir = temp.path().join("archive");
        let run = outputs.join("region__20220101_20220131");
        let ndvi = array![[0.5f32, f32::NAN], [-0.25, 0.75]];
        write_run(&run, &ndvi, "2022-01-12");

        let zip_path =
            archive_job_outputs(Some(&run), &outputs, Some("jan"), &archive_dir).unwrap();
        assert_eq!(zip_path, archive_dir.join("jan.zip"));

        let direct = load_run(&run).unwrap();
        let view = view_run(&outputs, Some("jan"), &archive_dir).unwrap();
        assert!(!view.is_timeseries);
        assert_eq!(view.frames.len(), 1);

        let (a, b) = (&direct.frames[0], &view.frames[0]);
        assert!(same_pixels(&a.ndvi, &b.ndvi));
        assert!(same_pixels(
            a.true_color.as_ref().unwrap(),
            b.true_color.as_ref().unwrap()
        ));
        assert_eq!(b.metadata_summary.orbit_dates, vec!["2022-01-12"]);
        assert_eq!(b.metadata_summary.products, vec![("S2A_X".to_string(), Some(11.0))]);

        assert_eq!(b.label, "jan");

        // Only the zip is left once the view is loaded.
        let left: Vec<PathBuf> = sorted_entries(&archive_dir).unwrap();
        assert_eq!(left, vec![zip_path]);
    }

    #[test]
    fn test_view_leaves_existing_directories_alone() {
        let temp = TempDir::new().unwrap();
        let outputs = temp.path().join("outputs");
        let archive_dir = temp.path().join("archive");
        let run = outputs.join("run");
        write_run(&run, &array![[0.3f32]], "2022-01-12");
        archive_job_outputs(Some(&run), &outputs, Some("jan"), &archive_dir).unwrap();

        let notes = archive_dir.join("jan/notes.txt");
        fs::create_dir_all(notes.parent().unwrap()).unwrap();
        fs::write(&notes, "keep me").unwrap();

        let view = view_run(&outputs, Some("jan.zip"), &archive_dir).unwrap();
        assert_eq!(view.frames.len(), 1);
        assert!(!view.is_timeseries);
        assert_eq!(fs::read_to_string(&notes).unwrap(), "keep me");
    }

    #[test]
    fn test_archive_entries_are_relative() {
        let temp = TempDir::new().unwrap();
        let run = temp.path().join("outputs/run");
        write_run(&run, &array![[0.1f32]], "2022-01-12");

        let zip_path =
            archive_job_outputs(Some(&run), temp.path(), Some("r"), &temp.path().join("a"))
                .unwrap();
        let archive = ZipArchive::new(File::open(zip_path).unwrap()).unwrap();
        let mut names: Vec<&str> = archive.file_names().collect();
        names.sort();
        assert!(names.contains(&"imagery/ndvi.tif"));
        assert!(names.iter().all(|n| !n.starts_with('/') && !n.contains("outputs")));
    }

    #[test]
    fn test_timeseries_run_has_one_frame_per_subjob() {
        let temp = TempDir::new().unwrap();
        let parent = temp.path().join("region__20220101_20220331");
        write_run(
            &parent.join("region__20220201_20220228"),
            &array![[0.2f32]],
            "2022-02-03",
        );
        write_run(
            &parent.join("region__20220101_20220131"),
            &array![[0.1f32]],
            "2022-01-12",
        );
        fs::write(parent.join("timeseries_summary.csv"), "job_id\n").unwrap();

        let view = load_run(&parent).unwrap();
        assert!(view.is_timeseries);
        let labels: Vec<&str> = view.frames.iter().map(|f| f.label.as_str()).collect();
        assert_eq!(
            labels,
            vec!["region__20220101_20220131", "region__20220201_20220228"]
        );
    }

    #[test]
    fn test_default_archive_uses_latest_run() {
        let temp = TempDir::new().unwrap();
        let outputs = temp.path().join("outputs");
        write_run(&outputs.join("older"), &array![[0.1f32]], "2022-01-01");
        write_run(&outputs.join("newer"), &array![[0.2f32]], "2022-02-01");
        let past = std::time::SystemTime::now() - std::time::Duration::from_secs(3600);
        File::open(outputs.join("older"))
            .unwrap()
            .set_modified(past)
            .unwrap();

        assert_eq!(latest_output_dir(&outputs).unwrap(), outputs.join("newer"));
        let zip_path = archive_job_outputs(None, &outputs, None, &temp.path().join("a")).unwrap();
        let name = zip_path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("newer_"));
    }

    #[test]
    fn test_missing_archive_is_an_error() {
        let temp = TempDir::new().unwrap();
        assert!(view_run(temp.path(), Some("nope"), temp.path()).is_err());
        assert!(latest_output_dir(temp.path()).is_err());
    }

    #[test]
    fn test_clean_all_outputs_counts() {
        let temp = TempDir::new().unwrap();
        write_run(&temp.path().join("run"), &array![[0.1f32]], "2022-01-12");
        fs::write(temp.path().join("stray.npy"), b"x").unwrap();
        fs::write(temp.path().join("quick.png"), b"x").unwrap();
        fs::write(temp.path().join("notes.txt"), b"keep").unwrap();

        let report = clean_all_outputs(temp.path()).unwrap();
        assert_eq!(
            report,
            CleanReport {
                dirs_removed: 1,
                files_removed: 2
            }
        );
        assert!(temp.path().join("notes.txt").exists());
        assert_eq!(clean_all_outputs(&temp.path().join("absent")).unwrap(), CleanReport::default());
    }

    #[test]
    fn test_format_metadata_summary() {
        let summary = MetadataSummary {
            strategies: vec!["least_cloud".to_string()],
            orbit_dates: vec!["2022-01-12".to_string()],
            products: vec![("S2A_X".to_string(), Some(11.0))],
            average_cloud_coverage: Some(12.5),
        };
        let text = format_metadata_summary(&summary);
        assert!(text.contains("Strategies: least_cloud"));
        assert!(text.contains("S2A_X (cloud 11.00%)"));
        assert!(text.contains("Average cloud coverage: 12.50%"));
    }
}
