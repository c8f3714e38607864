use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use indexmap::IndexMap;

use crate::{
    error::{ForecastResult, SiteId},
    frame::SiteFrame,
    metrics::MetricsRecord,
};

/// Metrics per target column, persisted as `{"O3_target": {...}, "NO2_target": {...}}`.
pub type SiteMetrics = IndexMap<String, MetricsRecord>;

/// Stable on-disk locations of per-site outputs under one root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    root: PathBuf,
}

/// Paths of a completed site's outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedArtifacts {
    /// Prediction table.
    pub prediction_path: PathBuf,
    /// Metrics document.
    pub metrics_path: PathBuf,
}

impl ArtifactLayout {
    /// Layout rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Output root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `predictions/` directory.
    #[must_use]
    pub fn predictions_dir(&self) -> PathBuf {
        self.root.join("predictions")
    }

    /// `metrics/` directory.
    #[must_use]
    pub fn metrics_dir(&self) -> PathBuf {
        self.root.join("metrics")
    }

    /// `predictions/predictions_site_{n}.csv`.
    #[must_use]
    pub fn prediction_path(&self, site: SiteId) -> PathBuf {
        self.predictions_dir()
            .join(format!("predictions_site_{site}.csv"))
    }

    /// `metrics/metrics_site_{n}.json`.
    #[must_use]
    pub fn metrics_path(&self, site: SiteId) -> PathBuf {
        self.metrics_dir().join(format!("metrics_site_{site}.json"))
    }

    /// Writes both outputs of a site so that readers see either both complete files or neither.
    ///
    /// Each file is written to a `.tmp` sibling first and the renames happen only after both
    /// temporaries are complete. An existing pair is moved to `.bak` siblings for the duration
    /// of the renames and put back if either rename fails.
    pub fn persist(
        &self,
        site: SiteId,
        predictions: &SiteFrame,
        metrics: &SiteMetrics,
    ) -> ForecastResult<PersistedArtifacts> {
        fs::create_dir_all(self.predictions_dir())?;
        fs::create_dir_all(self.metrics_dir())?;
        let prediction_path = self.prediction_path(site);
        let metrics_path = self.metrics_path(site);
        let prediction_tmp = tmp_sibling(&prediction_path);
        let metrics_tmp = tmp_sibling(&metrics_path);

        let staged = write_file(&prediction_tmp, |writer| predictions.write_csv(writer)).and_then(
            |()| {
                write_file(&metrics_tmp, |writer| {
                    serde_json::to_writer_pretty(&mut *writer, metrics)?;
                    writer.write_all(b"\n")?;
                    Ok(())
                })
            },
        );
        if let Err(err) = staged {
            discard(&[&prediction_tmp, &metrics_tmp]);
            return Err(err);
        }
        let previous = match set_aside(&[&prediction_path, &metrics_path]) {
            Ok(previous) => previous,
            Err(err) => {
                discard(&[&prediction_tmp, &metrics_tmp]);
                return Err(err.into());
            }
        };
        let published = fs::rename(&prediction_tmp, &prediction_path)
            .and_then(|()| fs::rename(&metrics_tmp, &metrics_path));
        if let Err(err) = published {
            discard(&[&prediction_tmp, &metrics_tmp, &prediction_path]);
            restore(&previous);
            return Err(err.into());
        }
        for (_, backup) in &previous {
            discard(&[backup.as_path()]);
        }
        Ok(PersistedArtifacts {
            prediction_path,
            metrics_path,
        })
    }

    /// Reads a persisted metrics document.
    pub fn read_metrics(&self, site: SiteId) -> ForecastResult<SiteMetrics> {
        let file = File::open(self.metrics_path(site))?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }

    /// Reads a persisted prediction table.
    pub fn read_predictions(&self, site: SiteId) -> ForecastResult<SiteFrame> {
        SiteFrame::read_csv(self.prediction_path(site))
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn bak_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".bak");
    path.with_file_name(name)
}

/// Moves existing regular files to `.bak` siblings, returning `(original, backup)` pairs.
fn set_aside(paths: &[&Path]) -> std::io::Result<Vec<(PathBuf, PathBuf)>> {
    let mut moved = Vec::new();
    for path in paths {
        if !path.is_file() {
            continue;
        }
        let backup = bak_sibling(path);
        if let Err(err) = fs::rename(path, &backup) {
            restore(&moved);
            return Err(err);
        }
        moved.push((path.to_path_buf(), backup));
    }
    Ok(moved)
}

/// Removes whatever was published at each original path and puts its backup back.
fn restore(moved: &[(PathBuf, PathBuf)]) {
    for (original, backup) in moved {
        let _ = fs::remove_file(original);
        let _ = fs::rename(backup, original);
    }
}

fn write_file(
    path: &Path,
    fill: impl FnOnce(&mut BufWriter<File>) -> ForecastResult<()>,
) -> ForecastResult<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    fill(&mut writer)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

fn discard(paths: &[&Path]) {
    for path in paths {
        // Missing files are fine here.
        let _ = fs::remove_file(path);
    }
}
