//! Derived names for forecast tables and page files.
//!
//! Every name is a pure function of the display name, so the pipeline and the
//! viewer agree without sharing state.

use std::collections::HashMap;

use crate::error::{PipelineError, Result};

pub const BAR_SUFFIX: &str = "_forecast";
pub const TS_SUFFIX: &str = "_ts_forecast";
pub const PAGE_EXT: &str = "html";

/// Replace every character outside `[0-9A-Za-z_]` with `_`.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

pub fn bar_forecast_table(display: &str) -> String {
    format!("{}{}", sanitize(display), BAR_SUFFIX)
}

pub fn ts_forecast_table(display: &str) -> String {
    format!("{}{}", sanitize(display), TS_SUFFIX)
}

/// Page file name for a forecast table (`<table>.html`).
pub fn page_file(forecast_table: &str) -> String {
    format!("{}.{}", forecast_table, PAGE_EXT)
}

/// Fails if two distinct display names in the combined set share a token.
pub fn check_collisions<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<()> {
    let mut seen: HashMap<String, &str> = HashMap::new();
    for name in names {
        let token = sanitize(name);
        match seen.get(&token) {
            Some(prev) if *prev != name => {
                return Err(PipelineError::NameCollision {
                    first: prev.to_string(),
                    second: name.to_string(),
                    token,
                });
            }
            _ => {
                seen.insert(token, name);
            }
        }
    }
    Ok(())
}
