//! Helpers behind the `incinerators` command line tool.

use std::fmt::Write as _;
use std::time::Duration;

use catalog::REGIONS;
use foundation::{BoundsError, MapBounds};
use streaming::{ViewportController, ViewportSnapshot};
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub enum BoundsArgError {
    WrongArity(usize),
    NotANumber(String),
    Invalid(BoundsError),
}

impl std::fmt::Display for BoundsArgError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BoundsArgError::WrongArity(n) => {
                write!(f, "expected 4 values north,south,east,west, got {n}")
            }
            BoundsArgError::NotANumber(v) => write!(f, "not a number: {v:?}"),
            BoundsArgError::Invalid(e) => write!(f, "invalid bounds: {e}"),
        }
    }
}

impl std::error::Error for BoundsArgError {}

/// Parses `north,south,east,west`, or a region name from the static table.
pub fn parse_bounds(arg: &str) -> Result<MapBounds, BoundsArgError> {
    if let Some(region) = REGIONS.iter().find(|r| r.name.eq_ignore_ascii_case(arg.trim())) {
        return Ok(region.bounds);
    }
    let parts: Vec<&str> = arg.split(',').map(str::trim).collect();
    if parts.len() != 4 {
        return Err(BoundsArgError::WrongArity(parts.len()));
    }
    let mut values = [0.0; 4];
    for (slot, part) in values.iter_mut().zip(&parts) {
        *slot = part
            .parse()
            .map_err(|_| BoundsArgError::NotANumber(part.to_string()))?;
    }
    let [north, south, east, west] = values;
    MapBounds::new(north, south, east, west).map_err(BoundsArgError::Invalid)
}

/// Waits until the controller is idle without an error, or `limit` passes.
///
/// Retryable failures clear themselves, so a caller that wants a final
/// answer has to sit through the retry delays.
pub async fn wait_until_settled(
    controller: &ViewportController,
    limit: Duration,
) -> ViewportSnapshot {
    let deadline = Instant::now() + limit;
    let mut rx = controller.subscribe();
    loop {
        let snap = rx.borrow_and_update().clone();
        let retrying = snap.error.as_ref().is_some_and(|e| e.kind.is_retryable());
        if !snap.loading && !retrying {
            return snap;
        }
        match tokio::time::timeout_at(deadline, rx.changed()).await {
            Ok(Ok(())) => continue,
            _ => return controller.snapshot(),
        }
    }
}

pub fn render_snapshot(snap: &ViewportSnapshot) -> String {
    let mut out = String::new();
    let source = if snap.using_remote_api { "remote" } else { "local" };
    let region = snap.current_region_name.unwrap_or("-");
    let _ = writeln!(out, "source:    {source}");
    let _ = writeln!(out, "region:    {region}");
    let _ = writeln!(
        out,
        "shown:     {} of {}{}",
        snap.incinerators.len(),
        snap.total_count,
        if snap.clustered { " (clustered)" } else { "" }
    );
    if let Some(err) = &snap.error {
        let _ = writeln!(out, "error:     {err}");
    }
    for inc in &snap.incinerators {
        let state = if inc.operational { "" } else { " [not operational]" };
        let _ = writeln!(
            out,
            "  {:<20} {:>9.4} {:>9.4}  {}{state}",
            inc.id, inc.location.lat, inc.location.lng, inc.name
        );
    }
    out
}

pub fn render_regions() -> String {
    let mut out = String::new();
    for r in &REGIONS {
        let _ = writeln!(
            out,
            "{:<18} {}  delay {:>4} ms  x{:.1}",
            r.name,
            r.bounds,
            r.load_delay.as_millis(),
            r.result_multiplier
        );
    }
    out
}
