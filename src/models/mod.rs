pub mod binomial;
pub mod black_scholes;
pub mod volatility;

use crate::errors::{EngineError, EngineResult};
use crate::types::{MarketInputs, ModelKind, OptionKind};

/// All pricing engines implement this trait.
/// price() must be a pure function: deterministic output from inputs only.
/// Send + Sync required so one engine can be shared across batch workers.
pub trait PricingModel: Send + Sync {
    fn kind(&self) -> ModelKind;

    /// Theoretical price for every strike, `sigmas` aligned to `strikes`.
    /// Output has the same length and order as `strikes`.
    fn price(
        &self,
        market: &MarketInputs,
        strikes: &[f64],
        sigmas: &[f64],
        kind: OptionKind,
    ) -> EngineResult<Vec<f64>>;
}

/// Strikes within one call must be positive, finite and unique.
pub fn validate_strikes(strikes: &[f64]) -> EngineResult<()> {
    for (i, &k) in strikes.iter().enumerate() {
        if !(k.is_finite() && k > 0.0) {
            return Err(EngineError::config(format!(
                "strike at index {i} must be positive and finite, got {k}"
            )));
        }
    }
    let mut sorted = strikes.to_vec();
    sorted.sort_by(f64::total_cmp);
    if let Some(w) = sorted.windows(2).find(|w| w[0] == w[1]) {
        return Err(EngineError::config(format!("duplicate strike {}", w[0])));
    }
    Ok(())
}

/// Volatility array must be length-aligned to strikes and free of NaN.
pub fn validate_sigmas(strikes: &[f64], sigmas: &[f64]) -> EngineResult<()> {
    if sigmas.len() != strikes.len() {
        return Err(EngineError::config(format!(
            "volatility array has {} entries but there are {} strikes",
            sigmas.len(),
            strikes.len()
        )));
    }
    if let Some(i) = sigmas.iter().position(|s| s.is_nan()) {
        return Err(EngineError::config(format!(
            "volatility for strike {} is NaN",
            strikes[i]
        )));
    }
    Ok(())
}
