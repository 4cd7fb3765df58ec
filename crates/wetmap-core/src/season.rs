//! Seasonal window planning.
//!
//! Seasons are cut at fixed calendar breakpoints (Dec 1, Mar 1, Jun 1, Sep 1)
//! and iterated in the order winter, spring, summer, fall for every year.
//!
//! Year-boundary rules:
//!   - winter of Y spans [Y-1-12-01, Y-03-01) and is labelled `winter{Y-1}`,
//!     the year it starts in.
//!   - fall of Y spans [Y-09-01, Y+1-12-01); its end wraps to the next
//!     year's winter breakpoint.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Season {
    Winter,
    Spring,
    Summer,
    Fall,
}

impl Season {
    /// Fixed iteration order.
    pub const ORDER: [Season; 4] = [Season::Winter, Season::Spring, Season::Summer, Season::Fall];

    pub fn name(self) -> &'static str {
        match self {
            Season::Winter => "winter",
            Season::Spring => "spring",
            Season::Summer => "summer",
            Season::Fall => "fall",
        }
    }

    /// (month, day) at which the season starts.
    fn breakpoint(self) -> (u32, u32) {
        match self {
            Season::Winter => (12, 1),
            Season::Spring => (3, 1),
            Season::Summer => (6, 1),
            Season::Fall => (9, 1),
        }
    }
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Season {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "winter" => Ok(Season::Winter),
            "spring" => Ok(Season::Spring),
            "summer" => Ok(Season::Summer),
            "fall" | "autumn" => Ok(Season::Fall),
            other => Err(PipelineError::config(format!("unknown season '{other}'"))),
        }
    }
}

/// A named half-open date range `[start, end)` for one season of one year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalWindow {
    /// Season name followed by the label year, e.g. `summer2021`.
    pub label: String,
    pub season: Season,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl TemporalWindow {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date < self.end
    }

    /// Band name for a temporal band of this window, e.g. `VV_summer2021`.
    pub fn band_name(&self, base: &str) -> String {
        format!("{base}_{}", self.label)
    }
}

fn date(year: i32, (month, day): (u32, u32)) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| PipelineError::config(format!("year {year} is out of the supported date range")))
}

/// Window for one (year, season) pair.
pub fn window_for(year: i32, season: Season) -> Result<TemporalWindow> {
    let (label_year, start, end) = match season {
        Season::Winter => (
            year - 1,
            date(year - 1, Season::Winter.breakpoint())?,
            date(year, Season::Spring.breakpoint())?,
        ),
        Season::Spring => (
            year,
            date(year, Season::Spring.breakpoint())?,
            date(year, Season::Summer.breakpoint())?,
        ),
        Season::Summer => (
            year,
            date(year, Season::Summer.breakpoint())?,
            date(year, Season::Fall.breakpoint())?,
        ),
        Season::Fall => (
            year,
            date(year, Season::Fall.breakpoint())?,
            date(year + 1, Season::Winter.breakpoint())?,
        ),
    };
    Ok(TemporalWindow {
        label: format!("{}{label_year}", season.name()),
        season,
        start,
        end,
    })
}

/// Plan every requested window: years in the given order, seasons in the fixed
/// winter → fall order, filtered to `seasons`.
pub fn plan_windows(years: &[i32], seasons: &[Season]) -> Result<Vec<TemporalWindow>> {
    if years.is_empty() {
        return Err(PipelineError::config("no years requested"));
    }
    if seasons.is_empty() {
        return Err(PipelineError::config("no seasons requested"));
    }
    for (i, y) in years.iter().enumerate() {
        if years[..i].contains(y) {
            return Err(PipelineError::config(format!("year {y} requested twice")));
        }
    }

    let mut windows = Vec::with_capacity(years.len() * seasons.len());
    for &year in years {
        for season in Season::ORDER {
            if seasons.contains(&season) {
                windows.push(window_for(year, season)?);
            }
        }
    }
    log::debug!(
        "[planner] {} windows: {}",
        windows.len(),
        windows.iter().map(|w| w.label.as_str()).collect::<Vec<_>>().join(", ")
    );
    Ok(windows)
}
