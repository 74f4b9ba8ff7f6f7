use crate::errors::{EngineError, EngineResult};
use crate::models::{validate_sigmas, validate_strikes, PricingModel};
use crate::types::{MarketInputs, ModelKind, OptionKind};
use statrs::distribution::{ContinuousCDF, Normal};

/// Closed-form Black-Scholes-Merton pricing for European options.
///
/// d1 = (ln(S/K) + (r - q + sigma^2/2) * T) / (sigma * sqrt(T)),  d2 = d1 - sigma * sqrt(T)
/// price = w * (S e^{-qT} N(w d1) - K e^{-rT} N(w d2)),  w = +1 call / -1 put
///
/// European only. Callers that need early exercise go through the binomial engine.
pub struct BlackScholes {
    /// Standard normal distribution (created once, reused)
    normal: Normal,
}

impl BlackScholes {
    pub fn new() -> Self {
        Self {
            normal: Normal::standard(),
        }
    }

    #[inline]
    fn price_one(&self, market: &MarketInputs, strike: f64, sigma: f64, kind: OptionKind) -> f64 {
        let t = market.tau();

        // Guard: no time value or no volatility collapses to discounted intrinsic
        if sigma <= 0.0 || t <= 0.0 {
            return market.discounted_intrinsic(kind, strike);
        }

        let sigma_sqrt_t = sigma * t.sqrt();
        let d1 = ((market.spot / strike).ln()
            + (market.rate - market.dividend_yield + 0.5 * sigma * sigma) * t)
            / sigma_sqrt_t;
        let d2 = d1 - sigma_sqrt_t;

        let w = kind.sign();
        let fwd_spot = market.spot * (-market.dividend_yield * t).exp();
        let pv_strike = strike * (-market.rate * t).exp();
        let px = w * (fwd_spot * self.normal.cdf(w * d1) - pv_strike * self.normal.cdf(w * d2));

        px.max(0.0)
    }
}

impl Default for BlackScholes {
    fn default() -> Self {
        Self::new()
    }
}

impl PricingModel for BlackScholes {
    #[inline]
    fn kind(&self) -> ModelKind {
        ModelKind::BlackScholes
    }

    fn price(
        &self,
        market: &MarketInputs,
        strikes: &[f64],
        sigmas: &[f64],
        kind: OptionKind,
    ) -> EngineResult<Vec<f64>> {
        market.validate()?;
        validate_strikes(strikes)?;
        validate_sigmas(strikes, sigmas)?;

        Ok(strikes
            .iter()
            .zip(sigmas)
            .map(|(&k, &sigma)| self.price_one(market, k, sigma, kind))
            .collect())
    }
}

/// price(S, K, T, r, sigma, kind, q) for a single European option.
pub fn black_scholes_price(
    spot: f64,
    strike: f64,
    expiry_years: f64,
    rate: f64,
    sigma: f64,
    kind: OptionKind,
    dividend_yield: f64,
) -> EngineResult<f64> {
    let market = MarketInputs {
        spot,
        expiry_years,
        rate,
        dividend_yield,
    };
    market.validate()?;
    if !(strike.is_finite() && strike > 0.0) {
        return Err(EngineError::config(format!(
            "strike must be positive and finite, got {strike}"
        )));
    }
    if sigma.is_nan() {
        return Err(EngineError::config("volatility is NaN"));
    }
    Ok(BlackScholes::new().price_one(&market, strike, sigma, kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_put_parity() {
        let (s, k, t, r, sigma) = (100.0, 100.0, 1.0, 0.05, 0.2);
        let c = black_scholes_price(s, k, t, r, sigma, OptionKind::Call, 0.0).unwrap();
        let p = black_scholes_price(s, k, t, r, sigma, OptionKind::Put, 0.0).unwrap();
        let parity = s - k * (-r * t).exp();
        assert!((c - p - parity).abs() < 1e-8, "c-p={} parity={parity}", c - p);
    }

    #[test]
    fn test_parity_with_dividends() {
        let (s, k, t, r, q, sigma) = (100.0, 95.0, 0.5, 0.03, 0.02, 0.3);
        let c = black_scholes_price(s, k, t, r, sigma, OptionKind::Call, q).unwrap();
        let p = black_scholes_price(s, k, t, r, sigma, OptionKind::Put, q).unwrap();
        let parity = s * (-q * t).exp() - k * (-r * t).exp();
        assert!((c - p - parity).abs() < 1e-8, "c-p={} parity={parity}", c - p);
    }

    #[test]
    fn test_known_value() {
        // Hull-style reference: S=K=100, T=1, r=5%, sigma=20% -> 10.4506
        let c = black_scholes_price(100.0, 100.0, 1.0, 0.05, 0.2, OptionKind::Call, 0.0).unwrap();
        assert!((c - 10.4506).abs() < 1e-3, "call={c}");
    }

    #[test]
    fn test_zero_volatility_is_discounted_intrinsic() {
        let (s, k, t, r) = (100.0, 105.0, 0.5, 0.03);
        let call = black_scholes_price(s, k, t, r, 0.0, OptionKind::Call, 0.0).unwrap();
        assert!((call - (s - k * (-r * t).exp()).max(0.0)).abs() < 1e-12);
        let put = black_scholes_price(s, k, t, r, 0.0, OptionKind::Put, 0.0).unwrap();
        assert!((put - (k * (-r * t).exp() - s).max(0.0)).abs() < 1e-12);
    }

    #[test]
    fn test_zero_or_negative_time_is_intrinsic() {
        for t in [0.0, -0.25] {
            let call = black_scholes_price(110.0, 100.0, t, 0.05, 0.2, OptionKind::Call, 0.0).unwrap();
            let put = black_scholes_price(110.0, 100.0, t, 0.05, 0.2, OptionKind::Put, 0.0).unwrap();
            assert_eq!(call, 10.0);
            assert_eq!(put, 0.0);
        }
    }

    #[test]
    fn test_vector_form_matches_scalar() {
        let model = BlackScholes::new();
        let market = MarketInputs { spot: 100.0, expiry_years: 0.25, rate: 0.01, dividend_yield: 0.0 };
        let strikes = [90.0, 100.0, 110.0];
        let sigmas = [0.25, 0.2, 0.18];
        let px = model.price(&market, &strikes, &sigmas, OptionKind::Put).unwrap();
        for ((&k, &sigma), got) in strikes.iter().zip(&sigmas).zip(&px) {
            let want = black_scholes_price(100.0, k, 0.25, 0.01, sigma, OptionKind::Put, 0.0).unwrap();
            assert_eq!(*got, want);
        }
    }

    #[test]
    fn test_rejects_bad_spot_and_strike() {
        assert!(black_scholes_price(0.0, 100.0, 1.0, 0.0, 0.2, OptionKind::Call, 0.0).is_err());
        assert!(black_scholes_price(100.0, -1.0, 1.0, 0.0, 0.2, OptionKind::Call, 0.0).is_err());
    }
}
