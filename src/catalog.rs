//! KPI catalog: which source tables are forecast, how, and how they are shown.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::naming;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KpiKind {
    /// One value per batch or year ("bar" tables).
    Aggregate,
    /// Repeated readings over time, optionally per batch.
    TimeSeries,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiEntry {
    /// Display name; also the source table name.
    pub name: String,
    pub kind: KpiKind,
    /// Reference image file name under the assets directory.
    pub image: String,
    /// Metric shown on the page (time-series only).
    #[serde(default)]
    pub metric: Option<String>,
    /// Explicit forecast target for aggregate tables.
    #[serde(default)]
    pub value_column: Option<String>,
    /// Explicit metric columns for time-series tables.
    #[serde(default)]
    pub metrics: Option<Vec<String>>,
}

impl KpiEntry {
    pub fn aggregate(name: &str, image: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: KpiKind::Aggregate,
            image: image.to_string(),
            metric: None,
            value_column: None,
            metrics: None,
        }
    }

    pub fn time_series(name: &str, image: &str, metric: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: KpiKind::TimeSeries,
            image: image.to_string(),
            metric: Some(metric.to_string()),
            value_column: None,
            metrics: None,
        }
    }

    pub fn source_table(&self) -> &str {
        &self.name
    }

    pub fn forecast_table(&self) -> String {
        match self.kind {
            KpiKind::Aggregate => naming::bar_forecast_table(&self.name),
            KpiKind::TimeSeries => naming::ts_forecast_table(&self.name),
        }
    }

    pub fn page_file(&self) -> String {
        naming::page_file(&self.forecast_table())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub entries: Vec<KpiEntry>,
}

impl Catalog {
    /// The fermentation KPIs tracked by default.
    pub fn builtin() -> Self {
        let entries = vec![
            KpiEntry::aggregate("Batches per year", "BatchesPerYear.jpg"),
            KpiEntry::aggregate("GFP Concentration (gL)", "GFPConcentration(gL).jpg"),
            KpiEntry::aggregate("Total GFP (g)", "TotalGFP.jpg"),
            KpiEntry::aggregate("Final OD600", "FinalOD600.jpg"),
            KpiEntry::aggregate("Initial Glucose (gL)", "InitialGlucose.jpg"),
            KpiEntry::aggregate("Volumetric productivity (ghrL)", "volumeProductivity.jpg"),
            KpiEntry::aggregate("ProductBiomass (gg)", "ProductBiomass.jpg"),
            KpiEntry::aggregate("SpecificGrowth Rate (1hr)", "specificgrowthrate - Copy.jpg"),
            KpiEntry::time_series("Aeration", "Aeration.jpg", "Air_Sparge_PV"),
            KpiEntry::time_series("Agitation", "Agitation.jpg", "Agitation_PV"),
            KpiEntry::time_series("Dissolved Oxygen", "DissolvedOxygen.jpg", "DO_PV"),
            KpiEntry::time_series("OD600", "OD600Time.jpg", "OD600"),
            KpiEntry::time_series("Glucose", "GlucoseTime.jpg", "Sum_of_Glucose"),
            KpiEntry::time_series("pH", "pH.jpg", "pH_PV"),
            KpiEntry::time_series("Temperature_PV", "TempPV.jpg", "Temperature_PV"),
            KpiEntry::time_series("Pressure_PV", "pressurePV.jpg", "Pressure_PV"),
            KpiEntry::time_series("Weight_PV", "WeightPV.jpg", "Weight_PV"),
        ];
        Self { entries }
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        let catalog: Catalog = serde_json::from_str(&raw)
            .map_err(|e| PipelineError::Catalog(format!("{}: {}", path.display(), e)))?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Load from `path` when given, otherwise the built-in catalog.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let catalog = match path {
            Some(p) => Self::from_json_file(p)?,
            None => Self::builtin(),
        };
        catalog.validate()?;
        Ok(catalog)
    }

    /// Display names must be unique and must not collide after sanitizing,
    /// and no two entries may derive the same forecast table (and page).
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for entry in &self.entries {
            if entry.name.is_empty() {
                return Err(PipelineError::Catalog("empty display name".to_string()));
            }
            if !seen.insert(entry.name.as_str()) {
                return Err(PipelineError::Catalog(format!(
                    "duplicate display name `{}`",
                    entry.name
                )));
            }
        }
        naming::check_collisions(self.entries.iter().map(|e| e.name.as_str()))?;

        let mut tables: HashMap<String, &str> = HashMap::new();
        for entry in &self.entries {
            let table = entry.forecast_table();
            if let Some(first) = tables.get(&table) {
                return Err(PipelineError::SharedOutput {
                    first: first.to_string(),
                    second: entry.name.clone(),
                    table,
                });
            }
            tables.insert(table, &entry.name);
        }
        Ok(())
    }

    pub fn aggregates(&self) -> impl Iterator<Item = &KpiEntry> {
        self.entries.iter().filter(|e| e.kind == KpiKind::Aggregate)
    }

    pub fn time_series(&self) -> impl Iterator<Item = &KpiEntry> {
        self.entries.iter().filter(|e| e.kind == KpiKind::TimeSeries)
    }

    /// Bar names first, then time-series names.
    pub fn display_names(&self) -> Vec<&str> {
        self.aggregates()
            .chain(self.time_series())
            .map(|e| e.name.as_str())
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&KpiEntry> {
        self.entries.iter().find(|e| e.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_is_valid() {
        let catalog = Catalog::builtin();
        catalog.validate().unwrap();
        assert_eq!(catalog.aggregates().count(), 8);
        assert_eq!(catalog.time_series().count(), 9);
    }

    #[test]
    fn builtin_tables_match_published_names() {
        let catalog = Catalog::builtin();
        let gfp = catalog.get("GFP Concentration (gL)").unwrap();
        assert_eq!(gfp.forecast_table(), "GFP_Concentration__gL__forecast");
        let dissolved = catalog.get("Dissolved Oxygen").unwrap();
        assert_eq!(dissolved.forecast_table(), "Dissolved_Oxygen_ts_forecast");
        assert_eq!(dissolved.page_file(), "Dissolved_Oxygen_ts_forecast.html");
    }

    #[test]
    fn display_names_list_bars_first() {
        let mut catalog = Catalog::builtin();
        catalog.entries.reverse();
        let names = catalog.display_names();
        assert_eq!(names[0], "SpecificGrowth Rate (1hr)");
        assert_eq!(names[8], "Weight_PV");
    }

    #[test]
    fn duplicate_names_rejected() {
        let catalog = Catalog {
            entries: vec![
                KpiEntry::aggregate("OD600", "a.jpg"),
                KpiEntry::time_series("OD600", "b.jpg", "OD600"),
            ],
        };
        assert!(matches!(catalog.validate(), Err(PipelineError::Catalog(_))));
    }

    #[test]
    fn bar_and_time_series_sharing_a_table_rejected() {
        let catalog = Catalog {
            entries: vec![
                KpiEntry::aggregate("Agitation_ts", "a.jpg"),
                KpiEntry::time_series("Agitation", "b.jpg", "Agitation_PV"),
            ],
        };
        assert_eq!(
            catalog.entries[0].page_file(),
            catalog.entries[1].page_file()
        );
        match catalog.validate() {
            Err(PipelineError::SharedOutput { first, second, table }) => {
                assert_eq!(first, "Agitation_ts");
                assert_eq!(second, "Agitation");
                assert_eq!(table, "Agitation_ts_forecast");
            }
            other => panic!("expected shared output, got {:?}", other),
        }
    }

    #[test]
    fn json_catalog_round_trips_optional_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(
            &path,
            r#"{"entries":[
                {"name":"Titer","kind":"aggregate","image":"t.jpg","value_column":"Titer_gL"},
                {"name":"DO","kind":"time_series","image":"d.jpg","metric":"DO_PV"}
            ]}"#,
        )
        .unwrap();
        let catalog = Catalog::from_json_file(&path).unwrap();
        assert_eq!(catalog.entries[0].value_column.as_deref(), Some("Titer_gL"));
        assert_eq!(catalog.entries[1].metric.as_deref(), Some("DO_PV"));
        assert!(catalog.entries[1].metrics.is_none());
    }
}
