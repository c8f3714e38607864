use std::path::PathBuf;

use crate::{
    error::{ForecastError, ForecastResult, SiteId},
    frame::SiteFrame,
};

/// Raw tables for one site.
#[derive(Debug, Clone)]
pub struct SiteData {
    /// Site identifier.
    pub site: SiteId,
    /// Historical records with targets.
    pub train: SiteFrame,
    /// Records to forecast; targets optional.
    pub unseen: SiteFrame,
}

/// Provider of per-site input tables.
pub trait SiteSource: Send + Sync {
    /// Loads both tables, failing with [`ForecastError::DataNotFound`] when either is absent.
    fn load(&self, site: SiteId) -> ForecastResult<SiteData>;
}

/// Reads `site_{n}_train_data.csv` and `site_{n}_unseen_input_data.csv` from one directory.
#[derive(Debug, Clone)]
pub struct CsvSiteSource {
    data_dir: PathBuf,
}

impl CsvSiteSource {
    /// Creates a source rooted at `data_dir`.
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Training table location.
    #[must_use]
    pub fn train_path(&self, site: SiteId) -> PathBuf {
        self.data_dir.join(format!("site_{site}_train_data.csv"))
    }

    /// Unseen table location.
    #[must_use]
    pub fn unseen_path(&self, site: SiteId) -> PathBuf {
        self.data_dir
            .join(format!("site_{site}_unseen_input_data.csv"))
    }
}

impl SiteSource for CsvSiteSource {
    fn load(&self, site: SiteId) -> ForecastResult<SiteData> {
        let train_path = self.train_path(site);
        let unseen_path = self.unseen_path(site);
        for path in [&train_path, &unseen_path] {
            if !path.is_file() {
                return Err(ForecastError::DataNotFound {
                    site,
                    path: path.clone(),
                });
            }
        }
        Ok(SiteData {
            site,
            train: SiteFrame::read_csv(&train_path)?,
            unseen: SiteFrame::read_csv(&unseen_path)?,
        })
    }
}
