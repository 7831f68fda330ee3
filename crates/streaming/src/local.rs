use std::sync::Arc;
use std::time::Duration;

use catalog::{Catalog, Region, region_for_bounds, region_multiplier};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::error::LoadError;
use crate::protocol::{
    LOCAL_DETAIL_ZOOM, ViewportRequest, ViewportResponse, base_cap_for_zoom, clustered_for_zoom,
};
use crate::source::{BoxFuture, IncineratorSource};

/// Knobs for the simulated network behind the local dataset.
#[derive(Debug, Clone)]
pub struct LocalSourceConfig {
    /// Delay used when the viewport matches no region.
    pub default_delay: Duration,
    /// The delay is scaled by a uniform factor from this range.
    pub jitter: (f64, f64),
    /// Chance that a call takes twice as long.
    pub slow_probability: f64,
    /// Chance that a call fails with [`LoadError::Simulated`].
    pub failure_probability: f64,
    /// Zoom from which site geometry is kept in responses.
    pub detail_zoom: f64,
    /// Fixed RNG seed for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for LocalSourceConfig {
    fn default() -> Self {
        Self {
            default_delay: Duration::from_millis(500),
            jitter: (0.8, 1.2),
            slow_probability: 0.05,
            failure_probability: 0.02,
            detail_zoom: LOCAL_DETAIL_ZOOM,
            seed: None,
        }
    }
}

impl LocalSourceConfig {
    /// No delay and no injected failures.
    pub fn instant() -> Self {
        Self {
            default_delay: Duration::ZERO,
            jitter: (1.0, 1.0),
            slow_probability: 0.0,
            failure_probability: 0.0,
            ..Self::default()
        }
    }
}

/// Pure part of a local fetch: filter, strip, count, cap.
///
/// Returns the response together with the region that shaped it.
pub fn query_catalog(
    catalog: &Catalog,
    request: &ViewportRequest,
    detail_zoom: f64,
) -> (ViewportResponse, Option<&'static Region>) {
    let region = region_for_bounds(&request.bounds);

    let matches: Vec<_> = catalog
        .within(&request.bounds)
        .map(|inc| {
            if request.zoom < detail_zoom {
                inc.to_summary()
            } else {
                inc.clone()
            }
        })
        .collect();
    let total_count = matches.len();

    let cap = (base_cap_for_zoom(request.zoom) as f64 * region_multiplier(region)).floor() as usize;
    let incinerators = if request.zoom < 8.0 && region.is_none() {
        Vec::new()
    } else {
        matches.into_iter().take(cap).collect()
    };

    let response = ViewportResponse {
        incinerators,
        total_count,
        clustered: clustered_for_zoom(request.zoom),
    };
    (response, region)
}

/// Serves viewports from an in-memory [`Catalog`] with simulated latency
/// and transient failures.
pub struct LocalSource {
    catalog: Arc<Catalog>,
    config: LocalSourceConfig,
    rng: Mutex<StdRng>,
}

impl LocalSource {
    pub fn new(catalog: Arc<Catalog>, config: LocalSourceConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            catalog,
            config,
            rng: Mutex::new(rng),
        }
    }

    pub fn bundled(config: LocalSourceConfig) -> Self {
        Self::new(Arc::new(Catalog::bundled().clone()), config)
    }

    /// Draws the simulated delay and whether this call fails.
    ///
    /// The slow-request and failure draws are independent.
    fn simulate(&self, region: Option<&Region>) -> (Duration, bool) {
        let base = region
            .map(|r| r.load_delay)
            .unwrap_or(self.config.default_delay);
        let (lo, hi) = self.config.jitter;
        let mut rng = self.rng.lock();
        let factor = if hi > lo { rng.gen_range(lo..=hi) } else { lo };
        let mut delay = base.mul_f64(factor.max(0.0));
        if rng.gen_bool(self.config.slow_probability.clamp(0.0, 1.0)) {
            delay *= 2;
        }
        let fail = rng.gen_bool(self.config.failure_probability.clamp(0.0, 1.0));
        (delay, fail)
    }
}

impl IncineratorSource for LocalSource {
    fn name(&self) -> &'static str {
        "local"
    }

    fn fetch_viewport(
        &self,
        request: &ViewportRequest,
    ) -> BoxFuture<'_, Result<ViewportResponse, LoadError>> {
        let request = *request;
        Box::pin(async move {
            let (response, region) = query_catalog(&self.catalog, &request, self.config.detail_zoom);
            let (delay, fail) = self.simulate(region);
            let region_name = region.map(|r| r.name).unwrap_or("unknown region");

            debug!(
                region = region_name,
                delay_ms = delay.as_millis() as u64,
                total = response.total_count,
                returned = response.incinerators.len(),
                "local fetch for {request}"
            );

            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            if fail {
                return Err(LoadError::Simulated {
                    region: region_name.to_string(),
                });
            }
            Ok(response)
        })
    }
}
